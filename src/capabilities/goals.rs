//! Goal and budget creation.
//!
//! Requests are validated into clarification prompts first; only a batch
//! with no prompts at all gets its dates normalized and confirmed.

use std::rc::Rc;

use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::Granularity;
use crate::error::SandboxError;
use crate::interp::ops;
use crate::interp::value::{Dict, Value};
use crate::interp::Namespace;
use crate::sandbox::capture::Capture;
use crate::sandbox::result::to_json;

pub const DEFAULT_END_DATE: &str = "2099-12-31";

pub const OFFICIAL_CATEGORIES: [&str; 40] = [
    "meals",
    "meals_groceries",
    "meals_dining_out",
    "meals_delivered_food",
    "leisure",
    "leisure_entertainment",
    "leisure_travel",
    "bills",
    "bills_connectivity",
    "bills_insurance",
    "bills_tax",
    "bills_service_fees",
    "shelter",
    "shelter_home",
    "shelter_utilities",
    "shelter_upkeep",
    "education",
    "education_kids_activities",
    "education_tuition",
    "shopping",
    "shopping_clothing",
    "shopping_gadgets",
    "shopping_kids",
    "shopping_pets",
    "transportation",
    "transportation_public",
    "transportation_car",
    "health",
    "health_medical_pharmacy",
    "health_gym_wellness",
    "health_personal_care",
    "donations_gifts",
    "income",
    "income_salary",
    "income_sidegig",
    "income_business",
    "income_interest",
    "uncategorized",
    "transfers",
    "miscellaneous",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalType {
    Category,
    CreditXAmount,
    SaveXAmount,
    Credit0,
    Save0,
}

impl GoalType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "" | "category" => Some(GoalType::Category),
            "credit_X_amount" => Some(GoalType::CreditXAmount),
            "save_X_amount" => Some(GoalType::SaveXAmount),
            "credit_0" => Some(GoalType::Credit0),
            "save_0" => Some(GoalType::Save0),
            _ => None,
        }
    }

    /// Types that track a total to reach by a date.
    pub fn reaches_total(self) -> bool {
        matches!(self, GoalType::CreditXAmount | GoalType::SaveXAmount)
    }
}

/// One goal as the guest or a caller describes it. Every field is
/// optional on the wire; nulls read as empty strings and numeric strings
/// are accepted where a number is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalRequest {
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub goal_type: String,
    #[serde(deserialize_with = "lenient_string")]
    pub granularity: String,
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_number")]
    pub amount: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub start_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub end_date: String,
    #[serde(deserialize_with = "lenient_string")]
    pub category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub match_category: String,
    #[serde(deserialize_with = "lenient_string")]
    pub match_caveats: String,
    #[serde(deserialize_with = "lenient_string")]
    pub clarification_needed: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(deserialize_with = "lenient_id")]
    pub account_id: Option<i64>,
    #[serde(deserialize_with = "lenient_number")]
    pub percent: Option<f64>,
}

impl Default for GoalRequest {
    fn default() -> Self {
        GoalRequest {
            goal_type: "category".to_string(),
            granularity: String::new(),
            title: String::new(),
            amount: None,
            start_date: String::new(),
            end_date: String::new(),
            category: String::new(),
            match_category: String::new(),
            match_caveats: String::new(),
            clarification_needed: String::new(),
            description: String::new(),
            account_id: None,
            percent: None,
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    })
}

fn lenient_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

impl GoalRequest {
    fn kind(&self) -> Option<GoalType> {
        GoalType::parse(self.goal_type.trim())
    }

    fn granularity(&self) -> Option<Granularity> {
        Granularity::parse(self.granularity.trim())
            .filter(|g| *g != Granularity::Daily)
    }

    fn name_for_prompt(&self) -> &str {
        [&self.title, &self.category]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }

    fn display_name(&self) -> &str {
        [&self.title, &self.category, &self.match_category]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("goal")
    }

    fn is_budget(&self) -> bool {
        self.kind() == Some(GoalType::Category)
    }
}

/// Outcome of a goal-creation call, mirrored to guest code as
/// `(success, message)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalResult {
    pub success: bool,
    pub message: String,
}

impl GoalResult {
    fn failed(message: impl Into<String>) -> Self {
        GoalResult {
            success: false,
            message: message.into(),
        }
    }

    pub fn into_value(self) -> Value {
        Value::tuple(vec![Value::Bool(self.success), Value::str(self.message)])
    }
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d").ok()
}

// ── validation ──────────────────────────────────────────

/// Clarification prompts for one goal, in a fixed order. Empty means the
/// goal can be created.
pub fn validate(goal: &GoalRequest) -> Vec<String> {
    let mut asks = Vec::new();
    let name = goal.name_for_prompt();
    let kind = goal.kind();

    if goal.granularity().is_none() {
        let suffix = if name.is_empty() {
            String::new()
        } else {
            format!(" {name} budget")
        };
        asks.push(format!(
            "What time periods are you looking to track for this{suffix}, like monthly?"
        ));
    }

    match goal.amount {
        Some(amount) if amount >= 0.0 => {
            if kind.is_some_and(GoalType::reaches_total) && amount == 0.0 {
                asks.push(if name.is_empty() {
                    "What total amount do you want to reach?".to_string()
                } else {
                    format!("What total amount do you want to reach for the {name}?")
                });
            }
        }
        _ => {
            let suffix = if name.is_empty() {
                "?".to_string()
            } else {
                format!(" of the {name}?")
            };
            asks.push(format!("What is the target amount{suffix}"));
        }
    }
    if kind.is_some_and(GoalType::reaches_total) && goal.end_date.trim().is_empty() {
        asks.push("By when do you want to reach this target?".to_string());
    }

    if kind == Some(GoalType::Category)
        && !OFFICIAL_CATEGORIES.contains(&goal.match_category.trim())
    {
        let subject = if goal.category.trim().is_empty() {
            "this goal"
        } else {
            goal.category.trim()
        };
        asks.push(format!(
            "Could you clarify the category for {subject}? Please specify a valid category name."
        ));
    }

    let start_text = goal.start_date.trim();
    let end_text = goal.end_date.trim();
    let start = parse_date(start_text);
    let end = parse_date(end_text);
    if !start_text.is_empty() && start.is_none() {
        asks.push("Please clarify when do you want this to start?".to_string());
    }
    if !end_text.is_empty() && end.is_none() {
        asks.push("Please clarify when do you want this to end?".to_string());
    }
    if let (Some(start), Some(end)) = (start, end) {
        if end < start {
            asks.push(
                "Please clarify the start and end dates for this, we might have reversed it."
                    .to_string(),
            );
        } else {
            let min_days = if goal.granularity() == Some(Granularity::Weekly) { 6 } else { 7 };
            if (end - start).num_days() < min_days {
                asks.push(
                    "Please clarify the start and end dates as it is too short. It needs to cover the full selected period."
                        .to_string(),
                );
            }
        }
    }

    match kind {
        None => asks.push(format!(
            "Invalid goal type '{}'. Must be one of: category, credit_X_amount, save_X_amount, credit_0, save_0.",
            goal.goal_type
        )),
        Some(GoalType::CreditXAmount | GoalType::SaveXAmount) => {
            if goal.percent.is_some_and(|p| !(0.0..=100.0).contains(&p)) {
                asks.push("Percent must be between 0 and 100.".to_string());
            }
        }
        Some(_) => {}
    }
    asks
}

// ── normalization ───────────────────────────────────────

fn sunday_on_or_before(d: NaiveDate) -> NaiveDate {
    d - Duration::days(i64::from(d.weekday().num_days_from_sunday()))
}

fn saturday_on_or_after(d: NaiveDate) -> NaiveDate {
    d + Duration::days(6 - i64::from(d.weekday().num_days_from_sunday()))
}

fn first_of_month(d: NaiveDate) -> NaiveDate {
    d.with_day(1).unwrap_or(d)
}

fn last_of_month(d: NaiveDate) -> NaiveDate {
    d.with_day(ops::days_in_month(d.year(), d.month())).unwrap_or(d)
}

/// Snaps a validated goal's dates to its granularity's period bounds.
/// A missing start becomes `today`; a missing end becomes the far-future
/// sentinel.
pub fn normalize(goal: &GoalRequest, today: NaiveDate) -> GoalRequest {
    let mut goal = goal.clone();
    let granularity = goal.granularity();
    let start = parse_date(&goal.start_date).unwrap_or(today);
    let start = match granularity {
        Some(Granularity::Weekly) => sunday_on_or_before(start),
        Some(Granularity::Monthly | Granularity::Yearly) => first_of_month(start),
        _ => start,
    };
    goal.start_date = start.format("%Y-%m-%d").to_string();

    goal.end_date = match parse_date(&goal.end_date) {
        None => DEFAULT_END_DATE.to_string(),
        Some(end) => {
            let end = match granularity {
                Some(Granularity::Weekly) => saturday_on_or_after(end),
                Some(Granularity::Monthly) => last_of_month(end),
                Some(Granularity::Yearly) => {
                    NaiveDate::from_ymd_opt(end.year(), 12, 31).unwrap_or(end)
                }
                _ => end,
            };
            end.format("%Y-%m-%d").to_string()
        }
    };
    goal
}

// ── batch entry points ──────────────────────────────────

fn confirmation(goal: &GoalRequest) -> String {
    let mut line = format!(
        "Successfully created '{}' from {} to {} with target amount ${:.2}.",
        goal.display_name(),
        goal.start_date,
        goal.end_date,
        goal.amount.unwrap_or(0.0)
    );
    let caveats = goal.match_caveats.trim();
    if !caveats.is_empty() {
        line.push_str(" Note: ");
        line.push_str(caveats);
    }
    line
}

/// Validates a whole batch, and creates it only if every goal is valid.
pub fn create_goals(capture: &Capture, goals: &[GoalRequest], today: NaiveDate) -> GoalResult {
    capture.log(format!("**Create Goal**: Processing {} goal(s)", goals.len()));
    if goals.is_empty() {
        capture.log("**Goal Creation Failed**: No goals provided");
        return GoalResult::failed("No goals provided.");
    }
    if let Some(ask) = goals
        .iter()
        .map(|g| g.clarification_needed.trim())
        .find(|c| !c.is_empty())
    {
        capture.log(format!("**Goal Creation Skipped**: Clarification needed - {ask}"));
        return GoalResult::failed(ask);
    }

    let mut asks: Vec<String> = Vec::new();
    for (i, goal) in goals.iter().enumerate() {
        capture.log(format!(
            "**Processing Goal {}**: type={}, granularity={}, title={}, amount={}, start_date={}, end_date={}, category={}, match_category={}",
            i + 1,
            goal.goal_type,
            goal.granularity,
            goal.title,
            goal.amount.map_or("None".to_string(), |a| a.to_string()),
            goal.start_date,
            goal.end_date,
            goal.category,
            goal.match_category,
        ));
        for ask in validate(goal) {
            if !asks.contains(&ask) {
                asks.push(ask);
            }
        }
    }
    if !asks.is_empty() {
        capture.log(format!("**Goal Creation Needs Clarification**: {} prompt(s)", asks.len()));
        return GoalResult::failed(asks.join("\n"));
    }

    let created: Vec<GoalRequest> = goals.iter().map(|g| normalize(g, today)).collect();
    let budgets = created.iter().filter(|g| g.is_budget()).count();
    let mut lines = vec![format!(
        "Created {budgets} budget(s) and {} goal(s).",
        created.len() - budgets
    )];
    lines.extend(created.iter().map(confirmation));
    debug!(budgets, goals = created.len() - budgets, "goals created");
    if let Ok(json) = serde_json::to_string_pretty(&created) {
        capture.log(format!("**Created Goals**:\n```json\n{json}\n```"));
    }
    GoalResult {
        success: true,
        message: lines.join("\n"),
    }
}

/// Single category budget routed through the batch validator.
pub fn create_budget_or_goal(
    capture: &Capture,
    goal: GoalRequest,
    today: NaiveDate,
) -> GoalResult {
    let asks = validate(&goal);
    if !asks.is_empty() {
        capture.log(format!("**Budget Needs Clarification**: {} prompt(s)", asks.len()));
        return GoalResult::failed(asks.join("\n"));
    }
    let goal = normalize(&goal, today);
    let line = confirmation(&goal);
    capture.log(format!("**Budget Created**: `{line}`"));
    GoalResult {
        success: true,
        message: line,
    }
}

// ── guest surface ───────────────────────────────────────

fn field_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::DateTime(dt) => Some(dt.format("%Y-%m-%d").to_string().into()),
        Value::Date(d) => Some(d.format("%Y-%m-%d").to_string().into()),
        other => to_json(other),
    }
}

/// Reads a guest dict into a request; fields that cannot be represented
/// are treated as missing.
pub fn request_from_dict(dict: &Dict) -> Result<GoalRequest, SandboxError> {
    let mut object = serde_json::Map::new();
    for (key, value) in dict.items() {
        let Some(key) = key.as_str() else { continue };
        if let Some(json) = field_json(&value) {
            object.insert(key.to_string(), json);
        }
    }
    serde_json::from_value(serde_json::Value::Object(object))
        .map_err(|e| SandboxError::value_error(format!("invalid goal: {e}")))
}

fn requests_from_value(value: &Value) -> Result<Vec<GoalRequest>, SandboxError> {
    let items = match value {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Dict(_) => vec![value.clone()],
        Value::None => Vec::new(),
        other => {
            return Err(SandboxError::type_error(format!(
                "create_goals() expects a list of dicts, not {}",
                other.kind()
            )))
        }
    };
    items
        .iter()
        .map(|item| match item {
            Value::Dict(dict) => request_from_dict(&dict.borrow()),
            other => Err(SandboxError::type_error(format!(
                "each goal must be a dict, not {}",
                other.kind()
            ))),
        })
        .collect()
}

fn text_arg(value: Option<Value>) -> String {
    match value {
        Some(Value::Str(s)) => s.to_string(),
        Some(v @ (Value::DateTime(_) | Value::Date(_))) => {
            field_json(&v).and_then(|j| j.as_str().map(str::to_string)).unwrap_or_default()
        }
        _ => String::new(),
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn install(ns: &mut Namespace, capture: &Rc<Capture>) {
    let batch_capture = capture.clone();
    ns.insert(
        "create_goals",
        Value::native("create_goals", move |_, args| {
            let [goals] = args.exact::<1>("create_goals")?;
            let requests = requests_from_value(&goals)?;
            Ok(create_goals(&batch_capture, &requests, today()).into_value())
        }),
    );

    let single_capture = capture.clone();
    ns.insert(
        "create_budget_or_goal",
        Value::native("create_budget_or_goal", move |_, args| {
            let slots = args.bind(
                "create_budget_or_goal",
                &["category", "granularity", "start_date", "end_date", "amount", "title"],
                6,
            )?;
            let [category, granularity, start_date, end_date, amount, title] =
                [0, 1, 2, 3, 4, 5].map(|i| slots[i].clone());
            let category = text_arg(category);
            let goal = GoalRequest {
                goal_type: "category".to_string(),
                match_category: category.clone(),
                category,
                granularity: text_arg(granularity),
                start_date: text_arg(start_date),
                end_date: text_arg(end_date),
                amount: amount.and_then(|a| a.as_f64()),
                title: text_arg(title),
                ..GoalRequest::default()
            };
            Ok(create_budget_or_goal(&single_capture, goal, today()).into_value())
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn goal(json: &str) -> GoalRequest {
        serde_json::from_str(json).unwrap()
    }

    // ── request parsing ─────────────────────────────────

    #[test]
    fn test_request_is_lenient() {
        let g = goal(r#"{"amount": "1,200", "title": null, "account_id": "42"}"#);
        assert_eq!(g.goal_type, "category");
        assert_eq!(g.amount, Some(1200.0));
        assert_eq!(g.title, "");
        assert_eq!(g.account_id, Some(42));
    }

    // ── validation ──────────────────────────────────────

    #[test]
    fn test_missing_granularity_asks_for_period() {
        let g = goal(r#"{"type": "category", "granularity": "", "amount": 200.0, "match_category": "meals_groceries"}"#);
        assert_eq!(
            validate(&g),
            vec!["What time periods are you looking to track for this, like monthly?"]
        );
    }

    #[test]
    fn test_prompts_name_the_goal() {
        let g = goal(r#"{"title": "Dining", "granularity": "monthly", "match_category": "meals_dining_out"}"#);
        assert_eq!(validate(&g), vec!["What is the target amount of the Dining?"]);
    }

    #[test]
    fn test_unknown_category_and_bad_dates() {
        let g = goal(r#"{"granularity": "monthly", "amount": 10, "category": "coffee", "match_category": "coffee", "start_date": "soon", "end_date": "2025-13-01"}"#);
        assert_eq!(
            validate(&g),
            vec![
                "Could you clarify the category for coffee? Please specify a valid category name.",
                "Please clarify when do you want this to start?",
                "Please clarify when do you want this to end?",
            ]
        );
    }

    #[test]
    fn test_date_order_and_window() {
        let mut g = goal(r#"{"granularity": "monthly", "amount": 10, "match_category": "meals"}"#);
        g.start_date = "2025-03-10".into();
        g.end_date = "2025-03-01".into();
        assert!(validate(&g)[0].contains("we might have reversed it"));
        g.end_date = "2025-03-15".into();
        assert!(validate(&g)[0].contains("too short"));
        g.granularity = "weekly".into();
        g.end_date = "2025-03-16".into();
        assert!(validate(&g).is_empty());
    }

    #[test]
    fn test_reach_total_types() {
        let g = goal(r#"{"type": "save_X_amount", "granularity": "monthly", "amount": 0, "title": "Trip", "percent": 120}"#);
        assert_eq!(
            validate(&g),
            vec![
                "What total amount do you want to reach for the Trip?",
                "By when do you want to reach this target?",
                "Percent must be between 0 and 100.",
            ]
        );
        let bad = goal(r#"{"type": "save_big", "granularity": "monthly", "amount": 5}"#);
        assert!(validate(&bad)[0].starts_with("Invalid goal type 'save_big'"));
    }

    // ── normalization ───────────────────────────────────

    #[test]
    fn test_normalize_weekly() {
        // 2025-03-12 is a Wednesday.
        let g = goal(r#"{"granularity": "weekly", "start_date": "2025-03-12", "end_date": "2025-03-26"}"#);
        let n = normalize(&g, day(2025, 1, 1));
        assert_eq!(n.start_date, "2025-03-09");
        assert_eq!(n.end_date, "2025-03-29");
    }

    #[test]
    fn test_normalize_is_idempotent_for_months_and_years() {
        for granularity in ["monthly", "yearly"] {
            let g = GoalRequest {
                granularity: granularity.to_string(),
                start_date: "2024-02-17".to_string(),
                end_date: "2024-05-09".to_string(),
                ..GoalRequest::default()
            };
            let once = normalize(&g, day(2025, 1, 1));
            let twice = normalize(&once, day(2025, 1, 1));
            assert_eq!(once, twice);
            assert_eq!(once.start_date, "2024-02-01");
        }
        let yearly = normalize(
            &GoalRequest {
                granularity: "yearly".into(),
                end_date: "2024-05-09".into(),
                ..GoalRequest::default()
            },
            day(2025, 6, 18),
        );
        assert_eq!(yearly.start_date, "2025-06-01");
        assert_eq!(yearly.end_date, "2024-12-31");
    }

    #[test]
    fn test_normalize_missing_end_uses_sentinel() {
        let g = goal(r#"{"granularity": "monthly"}"#);
        assert_eq!(normalize(&g, day(2025, 1, 20)).end_date, DEFAULT_END_DATE);
    }

    // ── batches ─────────────────────────────────────────

    #[test]
    fn test_weekly_gas_budget_is_created() {
        let g = goal(r#"{"type": "category", "granularity": "weekly", "amount": 60.0, "match_category": "transportation_car", "start_date": "", "end_date": "", "title": "Gas"}"#);
        // 2025-03-12 is a Wednesday; the week starts on Sunday the 9th.
        let result = create_goals(&Capture::new(), &[g], day(2025, 3, 12));
        assert!(result.success);
        assert_eq!(
            result.message,
            "Created 1 budget(s) and 0 goal(s).\nSuccessfully created 'Gas' from 2025-03-09 to 2099-12-31 with target amount $60.00."
        );
    }

    #[test]
    fn test_batch_reports_every_prompt_once() {
        let a = goal(r#"{"granularity": "", "amount": 5, "match_category": "meals"}"#);
        let b = goal(r#"{"granularity": "", "amount": -1, "match_category": "meals"}"#);
        let result = create_goals(&Capture::new(), &[a, b], day(2025, 1, 1));
        assert!(!result.success);
        assert_eq!(
            result.message,
            "What time periods are you looking to track for this, like monthly?\nWhat is the target amount?"
        );
    }

    #[test]
    fn test_explicit_clarification_fails_fast() {
        let a = goal(r#"{"granularity": "", "amount": -1}"#);
        let b = goal(r#"{"clarification_needed": "Which account should this use?"}"#);
        let result = create_goals(&Capture::new(), &[a, b], day(2025, 1, 1));
        assert_eq!(result, GoalResult::failed("Which account should this use?"));
    }

    #[test]
    fn test_empty_batch() {
        let result = create_goals(&Capture::new(), &[], day(2025, 1, 1));
        assert_eq!(result.message, "No goals provided.");
        assert!(!result.success);
    }

    #[test]
    fn test_caveats_and_goal_counts() {
        let budget = goal(r#"{"granularity": "monthly", "amount": 300, "category": "food", "match_category": "meals", "match_caveats": "Includes dining out."}"#);
        let saving = goal(r#"{"type": "save_0", "granularity": "yearly", "amount": 1000, "title": "Rainy day"}"#);
        let result = create_goals(&Capture::new(), &[budget, saving], day(2025, 4, 10));
        let lines: Vec<&str> = result.message.lines().collect();
        assert_eq!(lines[0], "Created 1 budget(s) and 1 goal(s).");
        assert!(lines[1].starts_with("Successfully created 'food' from 2025-04-01 to 2099-12-31"));
        assert!(lines[1].ends_with(" Note: Includes dining out."));
        assert!(lines[2].contains("'Rainy day'"));
    }
}
