//! Capabilities exposed to guest code.
//!
//! Data readers and business helpers live here. The sandbox registry
//! binds them to a caller identity before guest code can see them;
//! nothing in this module knows about the interpreter's guards.

pub mod calendar;
pub mod fixture;
pub mod goals;
pub mod readers;
pub mod utter;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use fixture::FixtureStore;

/// One row from a data collaborator, as a JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Storage behind the data-reader capabilities.
///
/// Implementations are shared across concurrent runs, so they must be
/// `Send + Sync`. Every call is scoped to one caller; the sandbox never
/// lets guest code choose `caller_id`.
pub trait FinancialData: Send + Sync {
    /// Linked accounts with raw `account_type` / `account_subtype`.
    fn accounts(&self, caller_id: i64) -> anyhow::Result<Vec<Record>>;

    /// All transactions, income and spending alike.
    fn transactions(&self, caller_id: i64) -> anyhow::Result<Vec<Record>>;

    /// Forecast rows for one period granularity (weekly or monthly).
    fn forecasts(&self, caller_id: i64, granularity: Granularity) -> anyhow::Result<Vec<Record>>;

    /// Transactions recognised as recurring subscriptions.
    fn subscriptions(&self, caller_id: i64) -> anyhow::Result<Vec<Record>>;
}

/// Time unit windowing a goal, a forecast or a date shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Granularity {
    /// Exact lowercase name, as guest code and goal requests spell it.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "daily" => Some(Granularity::Daily),
            "weekly" => Some(Granularity::Weekly),
            "monthly" => Some(Granularity::Monthly),
            "yearly" => Some(Granularity::Yearly),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
