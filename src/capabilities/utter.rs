//! Template helpers that turn tables into user-facing sentences.
//!
//! Templates use `{name}` placeholders. Format specs after a colon are
//! accepted and ignored: money is always rendered as whole dollars with
//! thousands separators, prefixed with `$` unless the template already
//! writes `$` right before the placeholder. `{{` and `}}` are literal
//! braces. An unknown placeholder raises `KeyError`.

use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;

use super::readers::{describe, is_income_category, INCOME_FORECAST_IDS};
use crate::error::SandboxError;
use crate::interp::table::{as_frame, DataFrame, FrameData};
use crate::interp::value::{Dict, Value};
use crate::interp::{ops, Namespace};
use crate::sandbox::capture::Capture;

/// Rows listed before the remainder is summarized as "N more transactions."
const MAX_TRANSACTIONS: usize = 10;

const SAVINGS_TYPES: [&str; 3] = ["deposit_savings", "deposit_checking", "deposit_money_market"];
const CREDIT_TYPES: [&str; 5] = [
    "credit_card",
    "loan_home_equity",
    "loan_line_of_credit",
    "loan_mortgage",
    "loan_auto",
];

fn account_type_label(account_type: &str) -> Option<&'static str> {
    Some(match account_type {
        "deposit_savings" => "savings",
        "deposit_money_market" => "money market",
        "deposit_checking" => "checking",
        "credit_card" => "credit card",
        "loan_home_equity" => "home equity loan",
        "loan_line_of_credit" => "line of credit",
        "loan_mortgage" => "mortgage",
        "loan_auto" => "auto loan",
        _ => return None,
    })
}

// ── rendering ───────────────────────────────────────────

enum Fill {
    Text(String),
    Money(f64),
}

#[derive(Default)]
struct Fields(Vec<(String, Fill)>);

impl Fields {
    fn set(&mut self, name: &str, fill: Fill) {
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = fill,
            None => self.0.push((name.to_string(), fill)),
        }
    }

    fn text(&mut self, name: &str, text: impl Into<String>) {
        self.set(name, Fill::Text(text.into()));
    }

    fn money(&mut self, name: &str, amount: Option<f64>) {
        match amount {
            Some(x) => self.set(name, Fill::Money(x)),
            None => self.text(name, "Unknown"),
        }
    }

    fn get(&self, name: &str) -> Option<&Fill> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Adds every frame column of row `r` not already provided.
    fn extra_columns(&mut self, frame: &FrameData, r: usize) {
        for (c, name) in frame.columns.iter().enumerate() {
            if !self.contains(name) {
                self.text(name, cell_text(&frame.data[c][r]));
            }
        }
    }
}

/// Whole dollars with thousands separators, no sign.
pub fn dollars(amount: f64) -> String {
    let whole = format!("{:.0}", amount.abs());
    let mut out = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `$1,234` style amount; negative amounts read `-$1,234`.
pub fn money(amount: f64) -> String {
    let sign = if amount < 0.0 && dollars(amount) != "0" { "-" } else { "" };
    format!("{sign}${}", dollars(amount))
}

fn push_money(out: &mut String, amount: f64) {
    if out.ends_with('$') {
        if amount < 0.0 && dollars(amount) != "0" {
            out.push('-');
        }
        out.push_str(&dollars(amount));
    } else {
        out.push_str(&money(amount));
    }
}

fn render(template: &str, fields: &Fields) -> Result<String, SandboxError> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => inner.push(ch),
                        None => {
                            return Err(SandboxError::value_error(
                                "expected '}' before end of string",
                            ))
                        }
                    }
                }
                let name = inner.split([':', '!']).next().unwrap_or("").trim();
                match fields.get(name) {
                    Some(Fill::Text(text)) => out.push_str(text),
                    Some(Fill::Money(amount)) => push_money(&mut out, *amount),
                    None => return Err(SandboxError::key_error(format!("'{name}'"))),
                }
            }
            '}' => {
                return Err(SandboxError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Placeholder names used by `template`, format specs stripped.
fn placeholders(template: &str) -> Vec<String> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([^{}:!]+)[^{}]*\}").ok())
        .as_ref()
    else {
        return Vec::new();
    };
    re.captures_iter(template)
        .map(|c| c[1].trim().to_string())
        .collect()
}

fn uses_any(template: &str, names: &[&str]) -> bool {
    placeholders(template).iter().any(|p| names.contains(&p.as_str()))
}

// ── cells ───────────────────────────────────────────────

fn cell_text(value: &Value) -> String {
    match value {
        Value::None => "Unknown".to_string(),
        Value::Float(f) if f.is_nan() => "Unknown".to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%d").to_string(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        other => ops::to_str(other),
    }
}

fn cell_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|f| !f.is_nan())
}

fn cell<'a>(frame: &'a FrameData, column: &str, r: usize) -> Option<&'a Value> {
    frame.column(column).map(|values| &values[r])
}

fn cell_str<'a>(frame: &'a FrameData, column: &str, r: usize) -> &'a str {
    cell(frame, column, r).and_then(Value::as_str).unwrap_or("")
}

fn column_sum(frame: &FrameData, column: &str) -> f64 {
    frame
        .column(column)
        .map(|values| values.iter().filter_map(cell_number).sum())
        .unwrap_or(0.0)
}

fn frame_arg(value: &Value, fname: &str) -> Result<DataFrame, SandboxError> {
    as_frame(value).ok_or_else(|| {
        SandboxError::type_error(format!(
            "{fname}() expects a DataFrame, not {}",
            value.kind()
        ))
    })
}

fn missing_columns(frame: &FrameData, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|c| frame.column_position(c).is_none())
        .map(|c| c.to_string())
        .collect()
}

fn columns_repr(frame: &FrameData) -> String {
    let quoted: Vec<String> = frame.columns.iter().map(|c| ops::str_repr(c)).collect();
    format!("[{}]", quoted.join(", "))
}

fn more_line(total: usize) -> Option<String> {
    let remaining = total.checked_sub(MAX_TRANSACTIONS).filter(|n| *n > 0)?;
    Some(format!(
        "{remaining} more transaction{}.",
        if remaining == 1 { "" } else { "s" }
    ))
}

fn clean_transaction_name(name: &str) -> String {
    static BRACKETS: OnceLock<Option<Regex>> = OnceLock::new();
    match BRACKETS
        .get_or_init(|| Regex::new(r"\s*\[.*?\]\s*").ok())
        .as_ref()
    {
        Some(re) => re.replace_all(name, "").trim().to_string(),
        None => name.trim().to_string(),
    }
}

fn record(pairs: Vec<(&str, Value)>) -> Value {
    let mut dict = Dict::new();
    for (k, v) in pairs {
        // String keys are always hashable.
        let _ = dict.insert(Value::str(k), v);
    }
    Value::dict(dict)
}

fn id_value(value: Option<&Value>) -> Value {
    match value {
        Some(Value::Int(i)) => Value::Int(*i),
        Some(Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => Value::Int(*f as i64),
        _ => Value::None,
    }
}

/// Verb for a signed amount: money in reads `earned`/`received`, money
/// out reads `spent`/`lost`.
struct Directions {
    income: &'static str,
    spending: &'static str,
}

fn directions(amount: f64) -> Directions {
    if amount >= 0.0 {
        Directions { income: "earned", spending: "spent" }
    } else {
        Directions { income: "lost", spending: "received" }
    }
}

fn log_empty(capture: &Capture) {
    capture.log("- **`df` is empty**, returning empty string.");
}

fn log_utterances(capture: &Capture, utterances: &[String]) {
    capture.log(format!("**Utterances**:\n  - `{}`", utterances.join("`\n  - `")));
}

// ── accounts ────────────────────────────────────────────

/// Lists accounts (or an aggregate when the frame has no `account_name`)
/// and returns `(text, [{account_id, account_name}])`.
pub fn account_names_and_balances(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<Value, SandboxError> {
    let frame = frame_arg(df, "account_names_and_balances")?;
    let data = frame.data();
    capture.log(format!("**Account Names/Balances**: {}", describe(&data)));
    if data.nrows() == 0 {
        log_empty(capture);
        return Ok(Value::tuple(vec![Value::str(""), Value::list(Vec::new())]));
    }
    let has_available = data.column_position("balance_available").is_some();
    let has_current = data.column_position("balance_current").is_some();
    if !has_available && !has_current {
        capture.log("- **`df` has no balance columns**.");
        return Err(SandboxError::value_error(format!(
            "DataFrame must have at least one balance column. Available columns: {}",
            columns_repr(&data)
        )));
    }

    let mut utterances = Vec::new();
    let mut metadata = Vec::new();
    if data.column_position("account_name").is_some() {
        capture.log(format!("**Listing Individual Accounts**: Processing {} items.", data.nrows()));
        for r in 0..data.nrows() {
            let name = cell(&data, "account_name", r).map(cell_text).unwrap_or_default();
            let balance = |column: &str| cell(&data, column, r).and_then(cell_number);
            let (available, current, limit) = (
                balance("balance_available"),
                balance("balance_current"),
                balance("balance_limit"),
            );
            let shown = |b: Option<f64>| b.map_or("None".to_string(), money);
            let account_id = cell(&data, "account_id", r);
            capture.log(format!(
                "  - `A-{}`]  **Name**: `{name}`  |  **A**: `{}`  |  **C**: `{}`  |  **L**: `{}`",
                account_id.map(cell_text).unwrap_or_default(),
                shown(available),
                shown(current),
                shown(limit),
            ));

            let mut fields = Fields::default();
            fields.text("name", name.clone());
            fields.text("account_name", name.clone());
            let kind = cell_str(&data, "account_type", r);
            fields.text("account_type", account_type_label(kind).unwrap_or("Unknown"));
            fields.money("balance_available", available);
            fields.money("balance_current", current);
            fields.money("balance_limit", limit);
            fields.extra_columns(&data, r);
            utterances.push(render(template, &fields)?);

            metadata.push(record(vec![
                ("account_id", id_value(account_id)),
                ("account_name", Value::str(&name)),
            ]));
        }
    } else {
        capture.log(format!("**Aggregated Totals**: Processing {} items.", data.nrows()));
        let mut fields = Fields::default();
        fields.text("name", "Total");
        fields.money("balance_available", has_available.then(|| column_sum(&data, "balance_available")));
        fields.money("balance_current", has_current.then(|| column_sum(&data, "balance_current")));
        utterances.push(render(template, &fields)?);
    }

    capture.log(format!("**Returning** {} utterances.", utterances.len()));
    log_utterances(capture, &utterances);
    Ok(Value::tuple(vec![
        Value::str(utterances.join("\n")),
        Value::list(metadata),
    ]))
}

/// Overall and savings/credit balance totals.
///
/// When the frame mixes savings and credit accounts but the template
/// only asks for overall totals, a fixed two-part sentence is returned
/// instead, since a single sum of assets and debts is meaningless.
pub fn utter_account_totals(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<String, SandboxError> {
    let frame = frame_arg(df, "utter_account_totals")?;
    let data = frame.data();
    capture.log(format!("**Account Totals**: {}", describe(&data)));
    if data.nrows() == 0 {
        log_empty(capture);
        return Ok(String::new());
    }
    let missing = missing_columns(&data, &["balance_available", "balance_current"]);
    if !missing.is_empty() {
        capture.log("- **`df` is missing required columns**");
        return Err(SandboxError::value_error(format!(
            "- **`df` is missing required columns**: `{}`. Available columns: `{}`",
            missing.join(", "),
            data.columns.join(", ")
        )));
    }

    let subtotal = |types: &[&str]| -> Option<(f64, f64)> {
        let rows: Vec<usize> = (0..data.nrows())
            .filter(|&r| types.contains(&cell_str(&data, "account_type", r)))
            .collect();
        if rows.is_empty() {
            return None;
        }
        let sum = |column: &str| {
            rows.iter()
                .filter_map(|&r| cell(&data, column, r).and_then(cell_number))
                .sum::<f64>()
        };
        Some((sum("balance_available"), sum("balance_current")))
    };
    let (savings, credit) = if data.column_position("account_type").is_some() {
        (subtotal(&SAVINGS_TYPES), subtotal(&CREDIT_TYPES))
    } else {
        (None, None)
    };
    if data.column_position("account_type").is_some() {
        let part = |t: Option<(f64, f64)>, pick: fn((f64, f64)) -> f64| {
            t.map_or("0".to_string(), |t| dollars(pick(t)))
        };
        capture.log(format!(
            "**Separated Totals**: STA: `${}` | STC: `${}` | CTA: `${}` | CTC: `${}`",
            part(savings, |t| t.0),
            part(savings, |t| t.1),
            part(credit, |t| t.0),
            part(credit, |t| t.1),
        ));
    }

    let separated = [
        "savings_balance_available",
        "savings_balance_current",
        "credit_balance_available",
        "credit_balance_current",
    ];
    if let (Some(s), Some(c)) = (savings, credit) {
        if !uses_any(template, &separated) {
            let result = format!(
                "Your savings accounts (checking, savings, money market) have a total current balance of {} and available balance of {}. Your credit accounts (credit cards, loans) have a total current balance of {} and available balance of {}.",
                money(s.1),
                money(s.0),
                money(c.1),
                money(c.0)
            );
            capture.log(format!("**Auto-separated Utterance**: `{result}`"));
            return Ok(result);
        }
    }

    let total_available = column_sum(&data, "balance_available");
    let total_current = column_sum(&data, "balance_current");
    capture.log(format!(
        "**Calculated Totals**: **TA**: `{}`  |  **TC**: `{}`",
        money(total_available),
        money(total_current)
    ));
    let mut fields = Fields::default();
    fields.money("balance_available", Some(total_available));
    fields.money("balance_current", Some(total_current));
    fields.money("savings_balance_available", savings.map(|t| t.0));
    fields.money("savings_balance_current", savings.map(|t| t.1));
    fields.money("credit_balance_available", credit.map(|t| t.0));
    fields.money("credit_balance_current", credit.map(|t| t.1));
    let result = render(template, &fields)?;
    capture.log(format!("**Utterance**: `{result}`"));
    Ok(result)
}

/// Net worth with state words (`net worth deficit of $500`).
pub fn utter_net_worth(
    capture: &Capture,
    total_assets: f64,
    total_liabilities: f64,
    template: &str,
) -> Result<String, SandboxError> {
    capture.log(format!(
        "**Net Worth Calculation**: Assets: {}, Liabilities: {}",
        money(total_assets),
        money(total_liabilities)
    ));
    let net_worth = total_assets - total_liabilities;
    let state = |value: f64, negative: &str, positive: &str| {
        let word = if value < 0.0 { negative } else { positive };
        format!("{word} of ${}", dollars(value))
    };
    let mut fields = Fields::default();
    fields.text(
        "net_worth_state_with_amount",
        state(net_worth, "net worth deficit", "net worth surplus"),
    );
    fields.text(
        "total_asset_state_with_amount",
        state(total_assets, "net asset shortfall", "net asset"),
    );
    fields.text(
        "total_liability_state_with_amount",
        state(total_liabilities, "net liability surplus", "net liability"),
    );
    let result = render(template, &fields)?;
    capture.log(format!("**Net Worth Utterance**: `{result}`"));
    Ok(result)
}

// ── transactions ────────────────────────────────────────

fn amount_fields(fields: &mut Fields, amount: f64, is_income: bool) {
    let d = directions(amount);
    let verb = if is_income { d.income } else { d.spending };
    let shown = format!("${}", dollars(amount));
    fields.money("amount", Some(amount.abs()));
    fields.text("amount_with_direction", format!("{shown} {verb}"));
    fields.text("income_amount", format!("{} {shown}", d.income));
    fields.text("income_total_amount", format!("{} {shown}", d.income));
    fields.text("spending_amount", format!("{} {shown}", d.spending));
    fields.text("spending_total_amount", format!("{} {shown}", d.spending));
}

/// One line per transaction (at most ten, then a remainder line).
/// Frames without `transaction_name` but with `category` are grouped by
/// category instead.
pub fn transaction_names_and_amounts(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<String, SandboxError> {
    let frame = frame_arg(df, "transaction_names_and_amounts")?;
    let data = frame.data();
    capture.log(format!("**Transaction Names/Amounts**: {}", describe(&data)));
    if data.nrows() == 0 {
        log_empty(capture);
        return Ok(String::new());
    }
    let missing = missing_columns(&data, &["transaction_name", "amount"]);
    if !missing.is_empty() {
        if missing_columns(&data, &["category", "amount"]).is_empty() {
            return transaction_category_grouped(capture, &data, template);
        }
        let message = format!(
            "DataFrame is missing required columns: [{}]. Available columns: {}",
            missing.iter().map(|c| ops::str_repr(c)).collect::<Vec<_>>().join(", "),
            columns_repr(&data)
        );
        capture.log(message.clone());
        return Err(SandboxError::value_error(message));
    }

    let total = data.nrows();
    capture.log(format!(
        "**Listing Individual Transactions**: Processing up to {MAX_TRANSACTIONS} items (out of {total} total)."
    ));
    let mut utterances = Vec::new();
    for r in 0..total.min(MAX_TRANSACTIONS) {
        let raw_name = cell(&data, "transaction_name", r).map(cell_text).unwrap_or_default();
        let amount = cell(&data, "amount", r).and_then(cell_number).unwrap_or(0.0);
        let category = cell_str(&data, "category", r);
        let date = cell(&data, "date", r).map_or("Unknown".to_string(), cell_text);
        capture.log(format!(
            "  - `T-{}`]  **Name**: `{raw_name}`  |  **Amount**: `{}`  |  **Date**: `{date}`  |  **Category**: `{category}`",
            cell(&data, "transaction_id", r).map(cell_text).unwrap_or_default(),
            money(amount.abs()),
        ));

        let mut fields = Fields::default();
        fields.text("name", raw_name.clone());
        fields.text("transaction_name", clean_transaction_name(&raw_name));
        fields.text("date", date);
        fields.text("category", if category.is_empty() { "Unknown" } else { category });
        amount_fields(&mut fields, amount, is_income_category(category));
        fields.extra_columns(&data, r);
        utterances.push(render(template, &fields)?);
    }

    let mut text = utterances.join("\n");
    if let Some(more) = more_line(total) {
        text.push('\n');
        text.push_str(&more);
    }
    capture.log(format!(
        "**Returning** {} utterances. Has more: {}",
        utterances.len(),
        if total > MAX_TRANSACTIONS { "True" } else { "False" }
    ));
    log_utterances(capture, &utterances);
    Ok(text)
}

fn transaction_category_grouped(
    capture: &Capture,
    data: &FrameData,
    template: &str,
) -> Result<String, SandboxError> {
    let mut groups: Vec<(String, f64)> = Vec::new();
    for r in 0..data.nrows() {
        let category = cell(data, "category", r).map(cell_text).unwrap_or_default();
        let amount = cell(data, "amount", r).and_then(cell_number).unwrap_or(0.0);
        match groups.iter_mut().find(|(c, _)| *c == category) {
            Some(group) => group.1 += amount,
            None => groups.push((category, amount)),
        }
    }
    // Sorted on a stable key so equal sums keep category order.
    groups.sort_by(|a, b| a.0.cmp(&b.0));
    groups.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    let total = groups.len();
    capture.log(format!(
        "**Listing Category Groups**: Processing up to {MAX_TRANSACTIONS} categories (out of {total} total)."
    ));

    let mut utterances = Vec::new();
    for (category, amount) in groups.iter().take(MAX_TRANSACTIONS) {
        capture.log(format!(
            "  - **Category**: `{category}`  |  **Total Amount**: `{}`",
            money(amount.abs())
        ));
        let mut fields = Fields::default();
        fields.text("category", category.clone());
        amount_fields(&mut fields, *amount, is_income_category(category));
        utterances.push(render(template, &fields)?);
    }
    let mut text = utterances.join("\n");
    if let Some(more) = more_line(total) {
        text.push('\n');
        text.push_str(&more);
    }
    log_utterances(capture, &utterances);
    Ok(text)
}

/// Sum of `amount` with verbs: `{income_total_amount}` reads
/// `earned $X`, `{spending_total_amount}` reads `spent $X`.
pub fn utter_transaction_total(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<String, SandboxError> {
    let frame = frame_arg(df, "utter_transaction_total")?;
    let data = frame.data();
    capture.log(format!("**Transaction Total**: {}", describe(&data)));
    if data.nrows() == 0 {
        log_empty(capture);
        return Ok(String::new());
    }
    if data.column_position("amount").is_none() {
        let message = format!(
            "- **`df` is missing required columns**: `amount`. Available columns: `{}`",
            data.columns.join(", ")
        );
        capture.log(message.clone());
        return Err(SandboxError::value_error(message));
    }
    let total = column_sum(&data, "amount");
    capture.log(format!("**Calculated Total**: **Amount**: `{}`", money(total)));
    let d = directions(total);
    let shown = format!("${}", dollars(total));
    let mut fields = Fields::default();
    fields.text("income_total_amount", format!("{} {shown}", d.income));
    fields.text("spending_total_amount", format!("{} {shown}", d.spending));
    fields.money("total_amount", Some(total));
    let result = render(template, &fields)?;
    capture.log(format!("**Transaction Total Utterance**: `{result}`"));
    Ok(result)
}

// ── subscriptions ───────────────────────────────────────

/// One line per subscription transaction, with
/// `[{transaction_id, transaction_name}]` metadata.
pub fn subscription_names_and_amounts(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<Value, SandboxError> {
    let frame = frame_arg(df, "subscription_names_and_amounts")?;
    let data = frame.data();
    capture.log(format!("**Subscription Names/Amounts**: {}", describe(&data)));
    if data.nrows() == 0 {
        capture.log("- **`df` is empty**, returning empty string and metadata.");
        return Ok(Value::tuple(vec![Value::str(""), Value::list(Vec::new())]));
    }
    let missing = missing_columns(
        &data,
        &["transaction_name", "amount", "date", "category", "transaction_id"],
    );
    if !missing.is_empty() {
        let message = format!(
            "DataFrame is missing required columns: [{}]. Available columns: {}",
            missing.iter().map(|c| ops::str_repr(c)).collect::<Vec<_>>().join(", "),
            columns_repr(&data)
        );
        capture.log(message.clone());
        return Err(SandboxError::value_error(message));
    }

    capture.log(format!(
        "**Listing Individual Subscription Transactions**: Processing {} items.",
        data.nrows()
    ));
    let mut utterances = Vec::new();
    let mut metadata = Vec::new();
    for r in 0..data.nrows() {
        let name = cell(&data, "transaction_name", r).map(cell_text).unwrap_or_default();
        let subscription = match cell(&data, "subscription_name", r) {
            Some(v) if !v.is_none() => cell_text(v),
            _ => name.clone(),
        };
        let amount = cell(&data, "amount", r).and_then(cell_number).unwrap_or(0.0);
        let category = cell_str(&data, "category", r);
        let (direction, preposition) = match (is_income_category(category), amount < 0.0) {
            (true, true) => ("earned", "from"),
            (true, false) => ("refunded", "to"),
            (false, false) => ("spent", "on"),
            (false, true) => ("received", "from"),
        };
        let date = cell(&data, "date", r).map_or("Unknown".to_string(), cell_text);
        let transaction_id = cell(&data, "transaction_id", r);
        capture.log(format!(
            "  - `T-{}`]  **Name**: `{name}`  |  **Subscription**: `{subscription}`  |  **Amount**: `{}`  |  **Date**: `{date}`  |  **Category**: `{category}`",
            transaction_id.map(cell_text).unwrap_or_default(),
            money(amount.abs()),
        ));

        let mut fields = Fields::default();
        fields.text("name", name.clone());
        fields.text("transaction_name", name.clone());
        fields.text("subscription_name", subscription);
        fields.money("amount", Some(amount.abs()));
        fields.text("date", date);
        fields.text("category", category);
        fields.text("direction", direction);
        fields.text("preposition", preposition);
        fields.extra_columns(&data, r);
        utterances.push(render(template, &fields)?);

        metadata.push(record(vec![
            ("transaction_id", id_value(transaction_id)),
            ("transaction_name", Value::str(&name)),
        ]));
    }

    capture.log(format!(
        "**Returning** {} utterances and {} metadata entries.",
        utterances.len(),
        metadata.len()
    ));
    log_utterances(capture, &utterances);
    Ok(Value::tuple(vec![
        Value::str(utterances.join("\n")),
        Value::list(metadata),
    ]))
}

/// Direction suffix for totals: empty for the expected flow, otherwise
/// `(outflow)` / `(inflow)`.
fn total_direction(total: f64, is_income: bool) -> &'static str {
    match (is_income, total) {
        (true, t) if t < 0.0 => "",
        (true, _) => "(outflow)",
        (false, t) if t > 0.0 => "",
        (false, _) => "(inflow)",
    }
}

fn strip_empty_parens(text: &str) -> String {
    static EMPTY_PARENS: OnceLock<Option<Regex>> = OnceLock::new();
    match EMPTY_PARENS
        .get_or_init(|| Regex::new(r"\s*\(\)").ok())
        .as_ref()
    {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    }
}

fn render_total(template: &str, total: f64, direction: &str) -> Result<String, SandboxError> {
    let mut fields = Fields::default();
    fields.money("total_amount", Some(total.abs()));
    fields.money("amount", Some(total.abs()));
    fields.text("direction", direction);
    Ok(strip_empty_parens(&render(template, &fields)?))
}

pub fn utter_subscription_totals(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<String, SandboxError> {
    let frame = frame_arg(df, "utter_subscription_totals")?;
    let data = frame.data();
    capture.log(format!("**Subscription Totals**: {}", describe(&data)));
    if data.nrows() == 0 {
        log_empty(capture);
        return Ok(String::new());
    }
    if data.column_position("amount").is_none() {
        let message = format!(
            "- **`df` is missing required columns**: `amount`. Available columns: `{}`",
            data.columns.join(", ")
        );
        capture.log(message.clone());
        return Err(SandboxError::value_error(message));
    }
    let total = column_sum(&data, "amount");
    let is_income = (0..data.nrows()).any(|r| is_income_category(cell_str(&data, "category", r)));
    capture.log(format!(
        "**Calculated Total**: **Amount**: `{}` | **Count**: `{}`",
        money(total.abs()),
        data.nrows()
    ));
    render_total(template, total, total_direction(total, is_income))
}

// ── forecasts ───────────────────────────────────────────

fn forecast_is_income(data: &FrameData, r: usize) -> bool {
    match cell(data, "ai_category_id", r).and_then(Value::as_int) {
        Some(id) => INCOME_FORECAST_IDS.contains(&id),
        None => is_income_category(cell_str(data, "category", r)),
    }
}

/// One line per forecast row, with
/// `[{ai_category_id, forecasted_amount, start_date}]` metadata. The
/// period date is read from `start_date`, `month_date` or `sunday_date`.
pub fn forecast_dates_and_amount(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<Value, SandboxError> {
    let frame = frame_arg(df, "forecast_dates_and_amount")?;
    let data = frame.data();
    let empty = || Value::tuple(vec![Value::str(""), Value::list(Vec::new())]);
    if data.nrows() == 0 {
        capture.log("**Forecast Dates and Amounts**: Empty DataFrame");
        return Ok(empty());
    }
    let Some(date_column) = ["start_date", "month_date", "sunday_date"]
        .into_iter()
        .find(|c| data.column_position(c).is_some())
    else {
        capture.log("**Forecast Dates and Amounts**: DataFrame must have a 'start_date' column");
        return Ok(empty());
    };

    let mut utterances = Vec::new();
    let mut metadata = Vec::new();
    for r in 0..data.nrows() {
        let amount = cell(&data, "forecasted_amount", r).and_then(cell_number).unwrap_or(0.0);
        let is_income = forecast_is_income(&data, r);
        let (verb, preposition, direction) = match (is_income, amount) {
            (true, a) if a < 0.0 => ("receive", "from", "earned"),
            (true, _) => ("return", "to", "refunded"),
            (false, a) if a > 0.0 => ("pay for", "for", "spent"),
            (false, _) => ("be refunded", "from", "received"),
        };
        let date = cell(&data, date_column, r).map_or("Unknown".to_string(), cell_text);
        let category_id = cell(&data, "ai_category_id", r).and_then(Value::as_int).unwrap_or(0);

        let mut fields = Fields::default();
        fields.text("date", date.clone());
        fields.text("start_date", date.clone());
        fields.text("direction", direction);
        fields.text(
            "amount_and_direction",
            format!("{verb} ${} {preposition}", dollars(amount)),
        );
        fields.text("ai_category_id", category_id.to_string());
        fields.text("category", cell(&data, "category", r).map_or("Unknown".to_string(), cell_text));
        fields.money("amount", Some(amount.abs()));
        fields.money("forecasted_amount", Some(amount.abs()));
        fields.extra_columns(&data, r);
        utterances.push(render(template, &fields)?);

        metadata.push(record(vec![
            ("ai_category_id", Value::Int(category_id)),
            ("forecasted_amount", Value::Float(amount)),
            ("start_date", Value::str(&date)),
        ]));
    }
    capture.log(format!(
        "**Forecast Dates and Amounts**: Returning {} utterances and {} metadata entries.",
        utterances.len(),
        metadata.len()
    ));
    log_utterances(capture, &utterances);
    Ok(Value::tuple(vec![
        Value::str(utterances.join("\n")),
        Value::list(metadata),
    ]))
}

/// Total of `forecasted_amount`; an empty frame reads `$0.00`.
pub fn utter_forecast_totals(
    capture: &Capture,
    df: &Value,
    template: &str,
) -> Result<String, SandboxError> {
    let frame = frame_arg(df, "utter_forecast_totals")?;
    let data = frame.data();
    capture.log(format!("**Forecast Totals**: {}", describe(&data)));
    if data.nrows() == 0 {
        capture.log("- **`df` is empty**, returning $0.00.");
        return Ok("$0.00".to_string());
    }
    if data.column_position("forecasted_amount").is_none() {
        let message = format!(
            "- **`df` is missing required columns**: `forecasted_amount`. Available columns: `{}`",
            data.columns.join(", ")
        );
        capture.log(message.clone());
        return Err(SandboxError::value_error(message));
    }
    let total = column_sum(&data, "forecasted_amount");
    capture.log(format!("**Calculated Total**: **Amount**: `{}`", money(total.abs())));
    let is_income = (0..data.nrows()).any(|r| forecast_is_income(&data, r));
    let result = render_total(template, total, total_direction(total, is_income))?;
    capture.log("**Forecast Totals**: Template formatted successfully");
    Ok(result)
}

/// `{amount}` as the absolute value of `amount`.
pub fn utter_absolute_amount(amount: f64, template: &str) -> Result<String, SandboxError> {
    let mut fields = Fields::default();
    fields.money("amount", Some(amount.abs()));
    render(template, &fields)
}

// ── registration ────────────────────────────────────────

type FrameHelper = fn(&Capture, &Value, &str) -> Result<Value, SandboxError>;

fn frame_helper(ns: &mut Namespace, capture: &Rc<Capture>, name: &'static str, f: FrameHelper) {
    let capture = capture.clone();
    ns.insert(
        name,
        Value::native(name, move |_, args| {
            let [df, template] = args.exact::<2>(name)?;
            let template = template.expect_str("template")?;
            f(&capture, &df, &template)
        }),
    );
}

fn text_helper(
    f: fn(&Capture, &Value, &str) -> Result<String, SandboxError>,
) -> impl Fn(&Capture, &Value, &str) -> Result<Value, SandboxError> {
    move |capture, df, template| f(capture, df, template).map(Value::str)
}

/// Registers every template helper, logging to `capture`.
pub fn install(ns: &mut Namespace, capture: &Rc<Capture>) {
    frame_helper(ns, capture, "account_names_and_balances", account_names_and_balances);
    frame_helper(ns, capture, "subscription_names_and_amounts", subscription_names_and_amounts);
    frame_helper(ns, capture, "forecast_dates_and_amount", forecast_dates_and_amount);

    let text_helpers: [(&'static str, fn(&Capture, &Value, &str) -> Result<String, SandboxError>); 7] = [
        ("utter_account_totals", utter_account_totals),
        ("transaction_names_and_amounts", transaction_names_and_amounts),
        ("utter_transaction_total", utter_transaction_total),
        ("utter_subscription_totals", utter_subscription_totals),
        ("utter_forecast_totals", utter_forecast_totals),
        ("utter_spending_forecast_totals", utter_forecast_totals),
        ("utter_income_forecast_totals", utter_forecast_totals),
    ];
    for (name, f) in text_helpers {
        let capture = capture.clone();
        let f = text_helper(f);
        ns.insert(
            name,
            Value::native(name, move |_, args| {
                let [df, template] = args.exact::<2>(name)?;
                let template = template.expect_str("template")?;
                f(&capture, &df, &template)
            }),
        );
    }

    let net_worth_capture = capture.clone();
    ns.insert(
        "utter_net_worth",
        Value::native("utter_net_worth", move |_, args| {
            let [assets, liabilities, template] = args.exact::<3>("utter_net_worth")?;
            utter_net_worth(
                &net_worth_capture,
                assets.expect_f64("total_assets")?,
                liabilities.expect_f64("total_liabilities")?,
                &template.expect_str("template")?,
            )
            .map(Value::str)
        }),
    );
    ns.insert(
        "utter_absolute_amount",
        Value::native("utter_absolute_amount", |_, args| {
            let [amount, template] = args.exact::<2>("utter_absolute_amount")?;
            utter_absolute_amount(amount.expect_f64("amount")?, &template.expect_str("template")?)
                .map(Value::str)
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(columns: Vec<(&str, Vec<Value>)>) -> Value {
        DataFrame::new(FrameData::from_columns(
            columns.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
        ))
        .into_value()
    }

    fn strs(items: &[&str]) -> Vec<Value> {
        items.iter().map(|s| Value::str(s)).collect()
    }

    fn floats(items: &[f64]) -> Vec<Value> {
        items.iter().map(|f| Value::Float(*f)).collect()
    }

    fn text_of(value: &Value) -> String {
        match value {
            Value::Tuple(items) => items[0].as_str().unwrap().to_string(),
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    // ── rendering ───────────────────────────────────────

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(1234.4), "$1,234");
        assert_eq!(money(-1234567.0), "-$1,234,567");
        assert_eq!(money(12.0), "$12");
        assert_eq!(dollars(999.6), "1,000");
    }

    #[test]
    fn test_render_respects_existing_dollar_sign() {
        let mut fields = Fields::default();
        fields.money("amount", Some(42.0));
        assert_eq!(render("Paid {amount}", &fields).unwrap(), "Paid $42");
        assert_eq!(render("Paid ${amount:.2f}", &fields).unwrap(), "Paid $42");
        assert_eq!(render("{{literal}} {amount}", &fields).unwrap(), "{literal} $42");
    }

    #[test]
    fn test_render_unknown_placeholder_is_key_error() {
        let err = render("{nope}", &Fields::default()).unwrap_err();
        assert_eq!(err.to_string(), "KeyError: 'nope'");
        assert!(render("{open", &Fields::default()).is_err());
    }

    #[test]
    fn test_placeholder_names() {
        assert_eq!(
            placeholders("{a} and {b:.0f} and {{c}}"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    // ── accounts ────────────────────────────────────────

    fn accounts() -> Value {
        frame(vec![
            ("account_id", vec![Value::Int(1), Value::Int(2)]),
            ("account_name", strs(&["Everyday", "Visa"])),
            ("account_type", strs(&["deposit_checking", "credit_card"])),
            ("balance_available", vec![Value::Float(1500.0), Value::None]),
            ("balance_current", floats(&[1520.0, 310.0])),
        ])
    }

    #[test]
    fn test_account_names_and_balances_lists_each_account() {
        let capture = Capture::new();
        let out = account_names_and_balances(
            &capture,
            &accounts(),
            "{account_name} ({account_type}): {balance_available} available",
        )
        .unwrap();
        assert_eq!(
            text_of(&out),
            "Everyday (checking): $1,500 available\nVisa (credit card): Unknown available"
        );
        let Value::Tuple(items) = out else { unreachable!() };
        let Value::List(meta) = &items[1] else { panic!("metadata") };
        assert_eq!(meta.borrow().len(), 2);
        assert!(capture.drain().logs.contains("**Listing Individual Accounts**"));
    }

    #[test]
    fn test_account_names_requires_balance_column() {
        let df = frame(vec![("account_name", strs(&["Everyday"]))]);
        let err = account_names_and_balances(&Capture::new(), &df, "{name}").unwrap_err();
        assert!(err.to_string().contains("at least one balance column"));
    }

    #[test]
    fn test_account_totals_auto_separates_mixed_accounts() {
        let out = utter_account_totals(&Capture::new(), &accounts(), "Total: {balance_current}").unwrap();
        assert!(out.starts_with("Your savings accounts (checking, savings, money market) have a total current balance of $1,520"));
        assert!(out.contains("Your credit accounts (credit cards, loans) have a total current balance of $310"));
    }

    #[test]
    fn test_account_totals_separated_placeholders() {
        let out = utter_account_totals(
            &Capture::new(),
            &accounts(),
            "Savings {savings_balance_current}, credit {credit_balance_current}",
        )
        .unwrap();
        assert_eq!(out, "Savings $1,520, credit $310");
    }

    #[test]
    fn test_net_worth_states() {
        let out = utter_net_worth(&Capture::new(), 1000.0, 1500.0, "You have a {net_worth_state_with_amount}.").unwrap();
        assert_eq!(out, "You have a net worth deficit of $500.");
    }

    // ── transactions ────────────────────────────────────

    #[test]
    fn test_transaction_lines_clean_names_and_cap() {
        let n = 12;
        let df = frame(vec![
            ("transaction_name", (0..n).map(|i| Value::str(format!("Shop {i} [REF]"))).collect()),
            ("amount", (0..n).map(|i| Value::Float(10.0 + i as f64)).collect()),
            ("category", (0..n).map(|_| Value::str("shopping")).collect()),
        ]);
        let out = transaction_names_and_amounts(&Capture::new(), &df, "{transaction_name}: {amount_with_direction}").unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[0], "Shop 0: $10 spent");
        assert_eq!(lines[10], "2 more transactions.");
    }

    #[test]
    fn test_transaction_lines_fall_back_to_categories() {
        let df = frame(vec![
            ("category", strs(&["meals_groceries", "transportation", "meals_groceries"])),
            ("amount", floats(&[20.0, 75.0, 30.0])),
        ]);
        let out = transaction_names_and_amounts(&Capture::new(), &df, "{category}: {amount}").unwrap();
        assert_eq!(out, "transportation: $75\nmeals_groceries: $50");
    }

    #[test]
    fn test_transaction_total_verbs() {
        let df = frame(vec![("amount", floats(&[-40.0, 15.0]))]);
        let out = utter_transaction_total(&Capture::new(), &df, "You {spending_total_amount}; net {total_amount}").unwrap();
        assert_eq!(out, "You received $25; net -$25");
    }

    #[test]
    fn test_missing_amount_column_raises() {
        let df = frame(vec![("name", strs(&["x"]))]);
        let err = utter_transaction_total(&Capture::new(), &df, "{total_amount}").unwrap_err();
        assert!(err.to_string().starts_with("ValueError"));
    }

    // ── subscriptions / forecasts ───────────────────────

    #[test]
    fn test_subscription_lines_and_totals() {
        let df = frame(vec![
            ("transaction_id", vec![Value::Int(9)]),
            ("transaction_name", strs(&["STREAMFLIX*123"])),
            ("subscription_name", strs(&["Streamflix"])),
            ("amount", floats(&[15.99])),
            ("date", strs(&["2025-03-05"])),
            ("category", strs(&["leisure_entertainment"])),
        ]);
        let capture = Capture::new();
        let out = subscription_names_and_amounts(&capture, &df, "{subscription_name}: {direction} {amount} {preposition} {date}").unwrap();
        assert_eq!(text_of(&out), "Streamflix: spent $16 on 2025-03-05");
        let total = utter_subscription_totals(&capture, &df, "Subscriptions cost {total_amount} {direction}").unwrap();
        assert_eq!(total, "Subscriptions cost $16 ");
    }

    #[test]
    fn test_forecast_lines_use_period_column() {
        let df = frame(vec![
            ("ai_category_id", vec![Value::Int(4)]),
            ("month_date", strs(&["2025-04-01"])),
            ("forecasted_amount", floats(&[320.0])),
            ("category", strs(&["Groceries"])),
        ]);
        let out = forecast_dates_and_amount(&Capture::new(), &df, "{date}: {category} {amount}").unwrap();
        assert_eq!(text_of(&out), "2025-04-01: Groceries $320");
    }

    #[test]
    fn test_forecast_totals_empty_and_income() {
        let empty = frame(vec![]);
        assert_eq!(utter_forecast_totals(&Capture::new(), &empty, "{total_amount}").unwrap(), "$0.00");
        let df = frame(vec![
            ("ai_category_id", vec![Value::Int(36)]),
            ("forecasted_amount", floats(&[-3000.0])),
        ]);
        let out = utter_forecast_totals(&Capture::new(), &df, "Expected income {total_amount} ({direction})").unwrap();
        assert_eq!(out, "Expected income $3,000");
    }

    #[test]
    fn test_absolute_amount() {
        assert_eq!(utter_absolute_amount(-12.4, "about {amount}").unwrap(), "about $12");
    }
}
