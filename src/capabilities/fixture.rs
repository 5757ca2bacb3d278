//! File-backed data collaborator.
//!
//! A single JSON document keyed by caller id:
//!
//! ```json
//! { "users": { "1": { "accounts": [], "transactions": [],
//!                     "subscriptions": [], "weekly_forecasts": [],
//!                     "monthly_forecasts": [] } } }
//! ```
//!
//! Unknown callers simply have no data.

use std::collections::HashMap;
use std::path::Path;

use anyhow::anyhow;
use serde::Deserialize;
use tracing::debug;

use super::{FinancialData, Granularity, Record};

#[derive(Debug, Default, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    users: HashMap<String, UserData>,
}

#[derive(Debug, Default, Clone, Deserialize)]
struct UserData {
    #[serde(default)]
    accounts: Vec<Record>,
    #[serde(default)]
    transactions: Vec<Record>,
    #[serde(default)]
    subscriptions: Vec<Record>,
    #[serde(default)]
    weekly_forecasts: Vec<Record>,
    #[serde(default)]
    monthly_forecasts: Vec<Record>,
}

#[derive(Debug, Default)]
pub struct FixtureStore {
    users: HashMap<i64, UserData>,
}

impl FixtureStore {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read fixtures {}: {e}", path.display()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let file: FixtureFile =
            serde_json::from_str(content).map_err(|e| anyhow!("Invalid fixture JSON: {e}"))?;
        let mut users = HashMap::with_capacity(file.users.len());
        for (key, data) in file.users {
            let id: i64 = key
                .trim()
                .parse()
                .map_err(|_| anyhow!("Fixture user key '{key}' is not an integer id"))?;
            users.insert(id, data);
        }
        debug!(users = users.len(), "fixtures loaded");
        Ok(FixtureStore { users })
    }

    fn user(&self, caller_id: i64) -> Option<&UserData> {
        self.users.get(&caller_id)
    }
}

impl FinancialData for FixtureStore {
    fn accounts(&self, caller_id: i64) -> anyhow::Result<Vec<Record>> {
        Ok(self.user(caller_id).map(|u| u.accounts.clone()).unwrap_or_default())
    }

    fn transactions(&self, caller_id: i64) -> anyhow::Result<Vec<Record>> {
        Ok(self
            .user(caller_id)
            .map(|u| u.transactions.clone())
            .unwrap_or_default())
    }

    fn forecasts(&self, caller_id: i64, granularity: Granularity) -> anyhow::Result<Vec<Record>> {
        let Some(user) = self.user(caller_id) else {
            return Ok(Vec::new());
        };
        match granularity {
            Granularity::Weekly => Ok(user.weekly_forecasts.clone()),
            Granularity::Monthly => Ok(user.monthly_forecasts.clone()),
            other => Err(anyhow!("No {other} forecasts are stored")),
        }
    }

    fn subscriptions(&self, caller_id: i64) -> anyhow::Result<Vec<Record>> {
        Ok(self
            .user(caller_id)
            .map(|u| u.subscriptions.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "users": {
            "7": {
                "accounts": [{"account_id": 1, "account_name": "Checking"}],
                "monthly_forecasts": [{"ai_category_id": 4, "forecasted_amount": 310.0}]
            }
        }
    }"#;

    #[test]
    fn test_records_are_scoped_by_caller() {
        let store = FixtureStore::from_json(SAMPLE).unwrap();
        assert_eq!(store.accounts(7).unwrap().len(), 1);
        assert!(store.accounts(8).unwrap().is_empty());
        assert!(store.transactions(7).unwrap().is_empty());
    }

    #[test]
    fn test_forecasts_by_granularity() {
        let store = FixtureStore::from_json(SAMPLE).unwrap();
        assert_eq!(store.forecasts(7, Granularity::Monthly).unwrap().len(), 1);
        assert!(store.forecasts(7, Granularity::Weekly).unwrap().is_empty());
        assert!(store.forecasts(7, Granularity::Yearly).is_err());
    }

    #[test]
    fn test_non_numeric_user_key_rejected() {
        let err = FixtureStore::from_json(r#"{"users": {"alice": {}}}"#).unwrap_err();
        assert!(err.to_string().contains("alice"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let store = FixtureStore::load(file.path()).unwrap();
        assert_eq!(store.accounts(7).unwrap()[0]["account_name"], "Checking");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = FixtureStore::load(dir.path().join("none.json")).unwrap_err();
        assert!(err.to_string().contains("Cannot read fixtures"));
    }
}
