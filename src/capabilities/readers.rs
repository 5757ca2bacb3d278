//! Data-reader capabilities.
//!
//! Each reader pulls records for the bound caller from the
//! [`FinancialData`] collaborator, shapes them into a table and writes a
//! one-line summary to the guest log channel.

use std::rc::Rc;
use std::sync::Arc;

use tracing::warn;

use super::{FinancialData, Granularity, Record};
use crate::error::SandboxError;
use crate::interp::table::{DataFrame, FrameData};
use crate::interp::value::{Dict, Value};
use crate::interp::{format, ops};
use crate::sandbox::capture::Capture;

pub const INCOME_CATEGORIES: [&str; 5] = [
    "income_salary",
    "income_sidegig",
    "income_business",
    "income_interest",
    "income",
];

pub const INCOME_FORECAST_IDS: [i64; 4] = [36, 37, 38, 39];

const FORECAST_CATEGORY_NAMES: &[(i64, &str)] = &[
    (-1, "Uncategorized"),
    (1, "Meals"),
    (2, "Dining Out"),
    (3, "Delivered Food"),
    (4, "Groceries"),
    (5, "Leisure"),
    (6, "Entertainment"),
    (7, "Travel & Vacations"),
    (8, "Pets"),
    (9, "Bills"),
    (10, "Connectivity"),
    (11, "Insurance"),
    (12, "Taxes"),
    (13, "Service Fees"),
    (14, "Shelter"),
    (15, "Home"),
    (16, "Utilities"),
    (17, "Upkeep"),
    (18, "Education"),
    (19, "Kids Activities"),
    (20, "Tuition"),
    (21, "Shopping"),
    (22, "Clothing"),
    (23, "Gadgets"),
    (24, "Kids"),
    (25, "Transport"),
    (26, "Car & Fuel"),
    (27, "Public Transit"),
    (28, "Health"),
    (29, "Medical & Pharmacy"),
    (30, "Gym & Wellness"),
    (31, "Personal Care"),
    (32, "Donations & Gifts"),
    (33, "Miscellaneous"),
    (36, "Salary"),
    (37, "Side-Gig"),
    (38, "Business"),
    (39, "Interest"),
    (41, "Food"),
    (42, "Others"),
    (43, "Bills"),
    (44, "Shopping"),
    (45, "Transfer"),
    (46, "Income"),
    (47, "Income"),
];

const SUBSCRIPTION_COLUMNS: [&str; 10] = [
    "transaction_id",
    "user_id",
    "account_id",
    "date",
    "transaction_name",
    "amount",
    "category",
    "subscription_name",
    "confidence_score_bills",
    "reviewer_bills",
];

const SUBSCRIPTION_PREFIXES: [&str; 5] = ["meals ", "income ", "bills ", "leisure ", "shelter "];

/// Standardized account type for a raw (type, subtype) pair.
pub fn standard_account_type(kind: &str, subtype: &str) -> String {
    let mapped = match (kind, subtype) {
        ("depository", "savings" | "depository") => "deposit_savings",
        ("depository", "money market") => "deposit_money_market",
        ("depository", "checking") => "deposit_checking",
        ("credit", "credit card") => "credit_card",
        ("loan", "home equity" | "loan") => "loan_home_equity",
        ("loan", "line of credit") => "loan_line_of_credit",
        ("loan", "mortgage") => "loan_mortgage",
        ("loan", "auto") => "loan_auto",
        _ => return format!("{kind}_{subtype}"),
    };
    mapped.to_string()
}

pub fn is_income_category(category: &str) -> bool {
    INCOME_CATEGORIES.contains(&category)
}

/// Converts a JSON field to a guest value. String fields whose name
/// mentions `date` and that parse as ISO dates become datetimes.
pub fn json_to_value(field: &str, json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => {
            if field.contains("date") {
                if let Some(dt) = format::parse_iso(s) {
                    return Value::DateTime(dt);
                }
            }
            Value::str(s)
        }
        serde_json::Value::Array(items) => {
            Value::list(items.iter().map(|v| json_to_value(field, v)).collect())
        }
        serde_json::Value::Object(map) => {
            let mut dict = Dict::new();
            for (k, v) in map {
                // String keys are always hashable.
                let _ = dict.insert(Value::str(k), json_to_value(k, v));
            }
            Value::dict(dict)
        }
    }
}

type Row = Vec<(String, Value)>;

fn to_row(record: &Record) -> Row {
    record
        .iter()
        .map(|(k, v)| (k.clone(), json_to_value(k, v)))
        .collect()
}

fn field<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    row.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn field_str<'a>(row: &'a Row, name: &str) -> &'a str {
    field(row, name).and_then(Value::as_str).unwrap_or("")
}

fn set_field(row: &mut Row, name: &str, value: Value) {
    match row.iter_mut().find(|(k, _)| k == name) {
        Some(entry) => entry.1 = value,
        None => row.push((name.to_string(), value)),
    }
}

fn negate(value: &Value) -> Value {
    match value {
        Value::Int(i) => i.checked_neg().map_or(Value::Float(-(*i as f64)), Value::Int),
        Value::Float(f) => Value::Float(-f),
        other => other.clone(),
    }
}

/// Frame from rows; with no rows, the frame still carries `empty_columns`.
fn frame_of(rows: &[Row], empty_columns: &[&str]) -> FrameData {
    if rows.is_empty() {
        return FrameData::from_columns(
            empty_columns.iter().map(|c| (c.to_string(), Vec::new())).collect(),
        );
    }
    FrameData::from_records(rows)
}

/// Guest log line describing a table's shape and columns.
pub fn describe(frame: &FrameData) -> String {
    format!(
        "`df: ({}, {})` w/ **cols**:\n  - `{}`",
        frame.nrows(),
        frame.columns.len(),
        frame.columns.join("`, `")
    )
}

/// Display form of a subscription category (`meals_dining_out` → `Dining Out`).
pub fn output_category(category: &str) -> String {
    if category.is_empty() {
        return "Unknown".to_string();
    }
    let formatted = ops::title_case(&category.replace('_', " "));
    let lower = formatted.to_lowercase();
    for prefix in SUBSCRIPTION_PREFIXES {
        if lower.starts_with(prefix) {
            return formatted[prefix.len()..].to_string();
        }
    }
    formatted
}

fn forecast_category_name(id: &Value) -> Value {
    id.as_int()
        .and_then(|id| FORECAST_CATEGORY_NAMES.iter().find(|(k, _)| *k == id))
        .map_or(Value::str("Unknown"), |(_, name)| Value::str(name))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flow {
    Income,
    Spending,
}

impl Flow {
    fn label(self) -> &'static str {
        match self {
            Flow::Income => "Income",
            Flow::Spending => "Spending",
        }
    }
}

/// Readers bound to one caller and one capture.
#[derive(Clone)]
pub struct Readers {
    data: Arc<dyn FinancialData>,
    caller_id: i64,
    capture: Rc<Capture>,
}

impl Readers {
    pub fn new(data: Arc<dyn FinancialData>, caller_id: i64, capture: Rc<Capture>) -> Self {
        Readers {
            data,
            caller_id,
            capture,
        }
    }

    fn fetch(
        &self,
        what: &str,
        records: anyhow::Result<Vec<Record>>,
    ) -> Result<Vec<Row>, SandboxError> {
        match records {
            Ok(records) => Ok(records.iter().map(to_row).collect()),
            Err(e) => {
                warn!(caller_id = self.caller_id, "{what} unavailable: {e}");
                Err(SandboxError::runtime_error(format!("{what} unavailable: {e}")))
            }
        }
    }

    fn summarize(&self, title: &str, frame: FrameData) -> Value {
        self.capture.log(format!(
            "**{title}** of `U-{}`: {}",
            self.caller_id,
            describe(&frame)
        ));
        DataFrame::new(frame).into_value()
    }

    fn empty(&self, title: &str) -> Value {
        self.capture
            .log(format!("**{title}** of `U-{}`: empty DataFrame", self.caller_id));
        DataFrame::new(FrameData::default()).into_value()
    }

    fn accounts(&self) -> Result<Vec<Row>, SandboxError> {
        let mut rows = self.fetch("accounts", self.data.accounts(self.caller_id))?;
        for row in &mut rows {
            let (Some(Value::Str(kind)), Some(Value::Str(subtype))) =
                (field(row, "account_type"), field(row, "account_subtype"))
            else {
                continue;
            };
            let mapped = standard_account_type(kind, subtype);
            set_field(row, "account_type", Value::str(mapped));
        }
        Ok(rows)
    }

    /// Checking, savings and money-market accounts.
    pub fn depository_accounts(&self) -> Result<Value, SandboxError> {
        const TITLE: &str = "Retrieved Depository Accounts";
        let rows = self.accounts()?;
        if rows.is_empty() {
            return Ok(self.empty(TITLE));
        }
        let all = FrameData::from_records(&rows);
        let kept: Vec<usize> = (0..rows.len())
            .filter(|&r| field_str(&rows[r], "account_type").starts_with("deposit_"))
            .collect();
        Ok(self.summarize(TITLE, all.take(&kept)))
    }

    /// Credit cards first, then loans.
    pub fn credit_accounts(&self) -> Result<Value, SandboxError> {
        const TITLE: &str = "Retrieved Credit and Loan Accounts";
        let rows = self.accounts()?;
        if rows.is_empty() {
            return Ok(self.empty(TITLE));
        }
        let cards = rows
            .iter()
            .filter(|r| field_str(r, "account_type") == "credit_card");
        let loans = rows
            .iter()
            .filter(|r| field_str(r, "account_type").starts_with("loan_"));
        let combined: Vec<Row> = cards.chain(loans).cloned().collect();
        Ok(self.summarize(TITLE, frame_of(&combined, &[])))
    }

    fn transactions(&self, flow: Flow) -> Result<Value, SandboxError> {
        let title = format!("Retrieved {} Transactions", flow.label());
        let rows = self.fetch("transactions", self.data.transactions(self.caller_id))?;
        if rows.is_empty() {
            return Ok(self.empty(&title));
        }
        let all = FrameData::from_records(&rows);
        let kept: Vec<usize> = (0..rows.len())
            .filter(|&r| is_income_category(field_str(&rows[r], "category")) == (flow == Flow::Income))
            .collect();
        let mut frame = all.take(&kept);
        if flow == Flow::Income {
            if let Some(amounts) = frame.column("amount") {
                let flipped: Vec<Value> = amounts.iter().map(negate).collect();
                frame.set_column("amount", flipped);
            }
        }
        Ok(self.summarize(&title, frame))
    }

    /// Income transactions; amounts are sign-flipped so money in is positive.
    pub fn income_transactions(&self) -> Result<Value, SandboxError> {
        self.transactions(Flow::Income)
    }

    pub fn spending_transactions(&self) -> Result<Value, SandboxError> {
        self.transactions(Flow::Spending)
    }

    fn forecasts(&self, flow: Flow, granularity: &str) -> Result<Value, SandboxError> {
        let granularity = match Granularity::parse(granularity) {
            Some(g @ (Granularity::Monthly | Granularity::Weekly)) => g,
            _ => {
                self.capture.log(format!(
                    "**Error**: Invalid granularity '{granularity}'. Must be 'monthly' or 'weekly'."
                ));
                return Ok(DataFrame::new(FrameData::default()).into_value());
            }
        };
        let date_column = match granularity {
            Granularity::Weekly => "sunday_date",
            _ => "month_date",
        };
        let title = format!(
            "Retrieved {} Forecasts** of `U-{}` (granularity: {granularity})",
            flow.label(),
            self.caller_id
        );
        let empty_columns = ["user_id", "ai_category_id", date_column, "forecasted_amount", "category"];
        let rows = self.fetch(
            "forecasts",
            self.data.forecasts(self.caller_id, granularity),
        )?;
        if rows.is_empty() {
            self.capture.log(format!("**{title}: No forecasts found"));
            return Ok(DataFrame::new(frame_of(&[], &empty_columns)).into_value());
        }
        let mut kept: Vec<Row> = rows
            .into_iter()
            .filter(|row| {
                let is_income = field(row, "ai_category_id")
                    .and_then(Value::as_int)
                    .is_some_and(|id| INCOME_FORECAST_IDS.contains(&id));
                is_income == (flow == Flow::Income)
            })
            .collect();
        if kept.is_empty() {
            self.capture.log(format!(
                "**{title}: No {} forecasts found",
                flow.label().to_lowercase()
            ));
            return Ok(DataFrame::new(frame_of(&[], &empty_columns)).into_value());
        }
        for row in &mut kept {
            let name = field(row, "ai_category_id").map_or(Value::str("Unknown"), forecast_category_name);
            set_field(row, "category", name);
        }
        let frame = FrameData::from_records(&kept);
        self.capture.log(format!("**{title}: {}", describe(&frame)));
        Ok(DataFrame::new(frame).into_value())
    }

    pub fn spending_forecasts(&self, granularity: &str) -> Result<Value, SandboxError> {
        self.forecasts(Flow::Spending, granularity)
    }

    pub fn income_forecasts(&self, granularity: &str) -> Result<Value, SandboxError> {
        self.forecasts(Flow::Income, granularity)
    }

    /// Recurring subscription transactions, with a display-ready
    /// `output_category` column.
    pub fn subscriptions(&self) -> Result<Value, SandboxError> {
        const TITLE: &str = "Retrieved Subscription Transactions";
        let mut rows = self.fetch("subscriptions", self.data.subscriptions(self.caller_id))?;
        if rows.is_empty() {
            self.capture.log(format!(
                "**{TITLE}** of `U-{}`: No subscription transactions found",
                self.caller_id
            ));
            return Ok(DataFrame::new(frame_of(&[], &SUBSCRIPTION_COLUMNS)).into_value());
        }
        if rows.iter().any(|r| field(r, "category").is_some()) {
            for row in &mut rows {
                let display = output_category(field_str(row, "category"));
                set_field(row, "output_category", Value::str(display));
            }
        }
        Ok(self.summarize(TITLE, FrameData::from_records(&rows)))
    }
}
