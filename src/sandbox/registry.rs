//! Per-run guest namespace.
//!
//! Everything that reaches external data closes over the caller id given
//! here; no guest-visible function takes an identity argument. Building
//! a namespace does no I/O.

use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::capabilities::readers::Readers;
use crate::capabilities::{calendar, goals, utter, FinancialData};
use crate::error::SandboxError;
use crate::interp::value::Value;
use crate::interp::{builtins, modules, ops, Namespace};

use super::capture::Capture;
use super::guard;

type Reader = fn(&Readers) -> Result<Value, SandboxError>;
type ForecastReader = fn(&Readers, &str) -> Result<Value, SandboxError>;

fn bind_reader(ns: &mut Namespace, readers: &Readers, name: &'static str, read: Reader) {
    let readers = readers.clone();
    ns.insert(
        name,
        Value::native(name, move |_, args| {
            args.exact::<0>(name)?;
            read(&readers)
        }),
    );
}

fn bind_forecast_reader(
    ns: &mut Namespace,
    readers: &Readers,
    name: &'static str,
    read: ForecastReader,
) {
    let readers = readers.clone();
    ns.insert(
        name,
        Value::native(name, move |_, args| {
            let slots = args.bind(name, &["granularity"], 0)?;
            let granularity = match slots.into_iter().next().flatten() {
                None | Some(Value::None) => "monthly".to_string(),
                Some(value) => value.expect_str("granularity")?.to_string(),
            };
            read(&readers, &granularity)
        }),
    );
}

/// Builds the namespace for one run of `caller_id`.
pub fn build(
    caller_id: i64,
    data: Arc<dyn FinancialData>,
    capture: &Rc<Capture>,
    allowed_modules: &[String],
) -> Namespace {
    let mut ns = Namespace::default();
    builtins::install(&mut ns);
    guard::install(&mut ns, allowed_modules);
    ns.insert("_print_", Value::Printer(capture.clone()));

    let log_capture = capture.clone();
    ns.insert(
        "log",
        Value::native("log", move |_, args| {
            let [message] = args.exact::<1>("log")?;
            log_capture.log(ops::to_str(&message));
            Ok(Value::None)
        }),
    );

    calendar::install(&mut ns);
    if allowed_modules.iter().any(|m| m == "pandas") {
        if let Some(pandas) = modules::load("pandas") {
            ns.insert("pd", pandas.clone());
            ns.insert("pandas", pandas);
        }
    }

    let readers = Readers::new(data, caller_id, capture.clone());
    bind_reader(&mut ns, &readers, "retrieve_depository_accounts", Readers::depository_accounts);
    bind_reader(&mut ns, &readers, "retrieve_credit_accounts", Readers::credit_accounts);
    bind_reader(&mut ns, &readers, "retrieve_income_transactions", Readers::income_transactions);
    bind_reader(&mut ns, &readers, "retrieve_spending_transactions", Readers::spending_transactions);
    bind_reader(&mut ns, &readers, "retrieve_subscriptions", Readers::subscriptions);
    bind_forecast_reader(&mut ns, &readers, "retrieve_spending_forecasts", Readers::spending_forecasts);
    bind_forecast_reader(&mut ns, &readers, "retrieve_income_forecasts", Readers::income_forecasts);

    goals::install(&mut ns, capture);
    utter::install(&mut ns, capture);

    debug!(caller_id, names = ns.len(), "namespace built");
    ns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FixtureStore;
    use crate::interp::{compile, Interpreter, Limits};

    const FIXTURES: &str = r#"{
        "users": {
            "1": {"accounts": [{"account_id": 10, "account_name": "Mine", "account_type": "depository", "account_subtype": "checking", "balance_current": 5.0}]},
            "2": {"accounts": [{"account_id": 20, "account_name": "Theirs", "account_type": "depository", "account_subtype": "checking", "balance_current": 9.0}]}
        }
    }"#;

    fn store() -> Arc<dyn FinancialData> {
        Arc::new(FixtureStore::from_json(FIXTURES).unwrap())
    }

    fn allowed(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn run(caller_id: i64, source: &str) -> (Interpreter, Rc<Capture>) {
        let capture = Capture::new();
        let ns = build(caller_id, store(), &capture, &allowed(&["datetime", "pandas"]));
        let mut interp = Interpreter::new(ns, Limits::default());
        interp.exec(&compile(source).unwrap()).unwrap();
        (interp, capture)
    }

    #[test]
    fn test_readers_are_bound_to_caller() {
        let source = "df = retrieve_depository_accounts()\nname = df['account_name'].iloc[0]\n";
        let (mine, _) = run(1, source);
        let (theirs, _) = run(2, source);
        assert_eq!(mine.global("name"), Some(Value::str("Mine")));
        assert_eq!(theirs.global("name"), Some(Value::str("Theirs")));
    }

    #[test]
    fn test_readers_take_no_identity_argument() {
        let capture = Capture::new();
        let ns = build(1, store(), &capture, &[]);
        let mut interp = Interpreter::new(ns, Limits::default());
        let err = interp
            .exec(&compile("retrieve_depository_accounts(2)\n").unwrap())
            .unwrap_err();
        assert!(err.to_string().starts_with("TypeError"));
    }

    #[test]
    fn test_print_and_log_reach_capture() {
        let (_, capture) = run(1, "print('hello', 3)\nlog('first')\nlog('second')\n");
        let drained = capture.drain();
        assert_eq!(drained.printed, "hello 3\n");
        assert_eq!(drained.logs, "first\n\nsecond");
    }

    #[test]
    fn test_pandas_bound_only_when_allowed() {
        let capture = Capture::new();
        let without = build(1, store(), &capture, &allowed(&["datetime"]));
        assert!(!without.contains("pd"));
        let with = build(1, store(), &capture, &allowed(&["pandas"]));
        assert!(with.contains("pd") && with.contains("pandas"));
    }

    #[test]
    fn test_namespaces_are_independent() {
        let (a, _) = run(1, "x = 1\n");
        let (b, _) = run(1, "y = 2\n");
        assert!(a.global("y").is_none());
        assert!(b.global("x").is_none());
    }

    #[test]
    fn test_capability_surface_is_present() {
        let capture = Capture::new();
        let ns = build(1, store(), &capture, &[]);
        for name in [
            "_getattr_",
            "_getitem_",
            "_write_",
            "_getiter_",
            "_inplacevar_",
            "__import__",
            "_print_",
            "get_date",
            "get_after_periods",
            "retrieve_income_forecasts",
            "create_goals",
            "create_budget_or_goal",
            "account_names_and_balances",
            "utter_absolute_amount",
            "log",
        ] {
            assert!(ns.contains(name), "{name} missing");
        }
    }
}
