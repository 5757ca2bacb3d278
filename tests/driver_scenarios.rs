use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::json;

use guarded_exec::config::SandboxConfig;
use guarded_exec::sandbox::execute_batch;
use guarded_exec::{Driver, ExecutionRequest, ExecutionResult, FixtureStore};

const FIXTURES: &str = r#"{
    "users": {
        "1": {
            "accounts": [
                {"account_id": 11, "account_name": "Everyday", "account_type": "depository", "account_subtype": "checking", "balance_available": 1500.0, "balance_current": 1520.0},
                {"account_id": 12, "account_name": "Visa", "account_type": "credit", "account_subtype": "credit card", "balance_available": 4200.0, "balance_current": 800.0}
            ],
            "transactions": [
                {"transaction_id": 1, "date": "2025-03-01", "transaction_name": "PAYROLL", "amount": -3200.0, "category": "income_salary"},
                {"transaction_id": 2, "date": "2025-03-02", "transaction_name": "FRESH MARKET [POS 11]", "amount": 84.2, "category": "meals_groceries"}
            ]
        },
        "2": {
            "accounts": [
                {"account_id": 21, "account_name": "Joint", "account_type": "depository", "account_subtype": "savings", "balance_available": 300.0, "balance_current": 300.0}
            ]
        }
    }
}"#;

fn driver() -> Driver {
    let store = FixtureStore::from_json(FIXTURES).unwrap();
    Driver::new(SandboxConfig::default(), Arc::new(store))
}

fn run(body: &str) -> ExecutionResult {
    driver().execute(&format!("def process_input():\n{body}"), 1)
}

// ── guard properties ────────────────────────────────────

#[test]
fn test_disallowed_imports_fail_and_name_the_module() {
    for module in ["os", "subprocess", "sys", "socket", "importlib"] {
        let source = format!("import {module}\ndef process_input():\n    return True, {{}}\n");
        let result = driver().execute(&source, 1);
        assert!(!result.success, "{module} was importable");
        assert!(result.output_text.contains(module));
        assert!(result.output_text.contains("GuardDenied"));
        assert!(result.metadata.is_none());
    }
}

#[test]
fn test_only_import_os_snippet() {
    let result = driver().execute("import os", 1);
    assert!(!result.success);
    assert!(result.output_text.contains("os"));
    assert!(result.metadata.is_none());
}

#[test]
fn test_guard_denial_cannot_be_caught() {
    let result = run("    try:\n        import os\n    except Exception:\n        return True, {'escaped': True}\n    return True, {}\n");
    assert!(!result.success);
    assert!(result.output_text.contains("GuardDenied: import of 'os' denied on module"));
}

#[test]
fn test_private_attribute_denial_is_per_value_kind() {
    let denied = run("    x = {}\n    return True, {'v': x._items}\n");
    assert!(!denied.success);
    assert!(denied
        .output_text
        .contains("GuardDenied: attribute read of '_items' denied on dict"));

    let allowed = run("    df = retrieve_depository_accounts()\n    return True, {'v': df._items}\n");
    assert!(!allowed.success);
    assert!(allowed.output_text.contains("AttributeError"));
    assert!(!allowed.output_text.contains("GuardDenied"));
}

// ── result contract ─────────────────────────────────────

#[test]
fn test_logs_keep_call_order() {
    let result = run("    log('first line')\n    log('second line')\n    return True, {'x': 1}\n");
    assert!(result.success, "{}", result.output_text);
    assert_eq!(result.metadata, Some(json!({"x": 1}).as_object().unwrap().clone()));
    let first = result.logs.find("first line").unwrap();
    let second = result.logs.find("second line").unwrap();
    assert!(first < second);
}

#[test]
fn test_unserializable_metadata_is_dropped_and_counted() {
    let result = run("    df = retrieve_depository_accounts()\n    return True, {'a': 1, 'b': df}\n");
    assert!(result.success, "{}", result.output_text);
    assert_eq!(result.metadata, Some(json!({"a": 1}).as_object().unwrap().clone()));
    assert!(result.logs.contains("dropped 1 non-serializable key(s)"));
}

#[test]
fn test_wrong_return_shape_is_execution_error() {
    let result = run("    return 'done'\n");
    assert!(!result.success);
    assert!(result.output_text.starts_with("**Execution Error**"));
    assert!(result.output_text.contains("ContractViolation"));
}

#[test]
fn test_fenced_reply_is_extracted() {
    let reply = "Sure, here is the code:\n```python\ndef process_input():\n    print('fenced')\n    return True, None\n```\nLet me know!";
    let result = driver().execute(reply, 1);
    assert!(result.success, "{}", result.output_text);
    assert_eq!(result.output_text, "fenced\n");
}

// ── capabilities ────────────────────────────────────────

#[test]
fn test_account_listing_through_helpers() {
    let result = run(concat!(
        "    df = retrieve_depository_accounts()\n",
        "    text, meta = account_names_and_balances(df, '{account_name}: {balance_current}')\n",
        "    print(text)\n",
        "    return True, {'accounts': meta}\n",
    ));
    assert!(result.success, "{}", result.output_text);
    assert_eq!(result.output_text, "Everyday: $1,520\n");
    assert_eq!(
        result.metadata.unwrap()["accounts"],
        json!([{"account_id": 11, "account_name": "Everyday"}])
    );
    assert!(result.logs.contains("Retrieved Depository Accounts"));
}

#[test]
fn test_spending_total_through_helpers() {
    let result = run(concat!(
        "    df = retrieve_spending_transactions()\n",
        "    print(utter_transaction_total(df, 'You {spending_total_amount} this month.'))\n",
        "    return True, {}\n",
    ));
    assert!(result.success, "{}", result.output_text);
    assert_eq!(result.output_text, "You spent $84 this month.\n");
}

#[test]
fn test_weekly_gas_budget_scenario() {
    let result = run(concat!(
        "    ok, message = create_goals([{'type': 'category', 'granularity': 'weekly', 'amount': 60.0,\n",
        "        'match_category': 'transportation_car', 'start_date': '', 'end_date': '', 'title': 'Gas'}])\n",
        "    print(message)\n",
        "    return ok, {}\n",
    ));
    assert!(result.success, "{}", result.output_text);
    assert!(result.output_text.contains("'Gas'"));
    assert!(result.output_text.contains("$60.00"));
    let start = result
        .output_text
        .split(" from ")
        .nth(1)
        .and_then(|rest| rest.get(..10))
        .unwrap();
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap();
    assert_eq!(start.weekday(), Weekday::Sun);
}

#[test]
fn test_missing_granularity_scenario() {
    let result = run(concat!(
        "    ok, message = create_goals([{'type': 'category', 'granularity': '', 'amount': 200.0,\n",
        "        'match_category': 'meals_groceries'}])\n",
        "    return ok, message\n",
    ));
    assert!(!result.success);
    assert!(result.output_text.contains("What time periods are you looking to track"));
}

#[test]
fn test_every_distinct_clarification_is_returned() {
    let result = run(concat!(
        "    ok, message = create_goals([\n",
        "        {'granularity': 'daily', 'amount': 10, 'match_category': 'meals'},\n",
        "        {'granularity': 'monthly', 'amount': -5, 'match_category': 'meals'},\n",
        "        {'granularity': 'monthly', 'amount': 5, 'match_category': 'nope', 'category': 'coffee'},\n",
        "    ])\n",
        "    return ok, message\n",
    ));
    assert!(!result.success);
    let prompts: Vec<&str> = result.output_text.lines().collect();
    assert_eq!(prompts.len(), 3);
    assert!(prompts[0].starts_with("What time periods"));
    assert!(prompts[1].starts_with("What is the target amount"));
    assert!(prompts[2].contains("category for coffee"));
}

// ── concurrency ─────────────────────────────────────────

#[tokio::test]
async fn test_concurrent_callers_see_only_their_data() {
    let source = concat!(
        "def process_input():\n",
        "    df = retrieve_depository_accounts()\n",
        "    names = [n for n in df['account_name']]\n",
        "    log('caller sees ' + ', '.join(names))\n",
        "    return True, {'names': names}\n",
    );
    let requests: Vec<ExecutionRequest> = (0..12)
        .map(|i| ExecutionRequest {
            source_text: source.to_string(),
            caller_id: 1 + (i % 2),
        })
        .collect();
    let results = execute_batch(Arc::new(driver()), requests).await;
    for (i, result) in results.iter().enumerate() {
        assert!(result.success, "{}", result.output_text);
        let expected = if i % 2 == 0 { "Everyday" } else { "Joint" };
        assert_eq!(result.metadata.as_ref().unwrap()["names"], json!([expected]));
        assert_eq!(result.logs.matches("caller sees").count(), 1);
    }
}
