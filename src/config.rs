use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::interp::Limits;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    /// Guest function called after the module body runs
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Modules guest code may import; never set by guest code
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DataConfig {
    /// JSON fixtures for the file-backed data collaborator.
    /// Supports ${ENV_VAR} substitution
    pub fixtures: Option<PathBuf>,
}

fn default_entry_point() -> String {
    "process_input".to_string()
}

fn default_allowed_modules() -> Vec<String> {
    ["datetime", "math", "pandas", "dateutil", "dateutil.relativedelta"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_steps() -> u64 {
    1_000_000
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_call_depth() -> usize {
    64
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            entry_point: default_entry_point(),
            allowed_modules: default_allowed_modules(),
            max_steps: default_max_steps(),
            timeout_ms: default_timeout_ms(),
            max_call_depth: default_max_call_depth(),
        }
    }
}

impl SandboxConfig {
    pub fn limits(&self) -> Limits {
        Limits {
            max_steps: self.max_steps,
            timeout: Duration::from_millis(self.timeout_ms),
            max_call_depth: self.max_call_depth,
        }
    }

    /// Checks if guest code may import `module`
    pub fn is_allowed(&self, module: &str) -> bool {
        self.allowed_modules.iter().any(|allowed| allowed == module)
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${FIXTURES_PATH}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        if config.sandbox.entry_point.trim().is_empty() {
            anyhow::bail!("sandbox.entry_point must not be empty");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn load(content: &str) -> anyhow::Result<Config> {
        let file = write_config(content);
        Config::load(file.path().to_str().unwrap())
    }

    // ── defaults tests ──────────────────────────────────

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = load("").unwrap();
        assert_eq!(config.sandbox.entry_point, "process_input");
        assert_eq!(config.sandbox.max_steps, 1_000_000);
        assert!(config.sandbox.is_allowed("pandas"));
        assert!(!config.sandbox.is_allowed("os"));
        assert!(config.data.fixtures.is_none());
    }

    #[test]
    fn test_limits_from_config() {
        let config = load("[sandbox]\ntimeout_ms = 250\nmax_call_depth = 8\n").unwrap();
        let limits = config.sandbox.limits();
        assert_eq!(limits.timeout, Duration::from_millis(250));
        assert_eq!(limits.max_call_depth, 8);
        assert_eq!(limits.max_steps, 1_000_000);
    }

    // ── load tests ──────────────────────────────────────

    #[test]
    fn test_allowlist_replaces_default() {
        let config = load("[sandbox]\nallowed_modules = [\"math\"]\n").unwrap();
        assert!(config.sandbox.is_allowed("math"));
        assert!(!config.sandbox.is_allowed("datetime"));
    }

    #[test]
    fn test_env_expansion_in_paths() {
        std::env::set_var("GUARDED_EXEC_TEST_FIXTURES", "/tmp/fixtures.json");
        let config = load("[data]\nfixtures = \"${GUARDED_EXEC_TEST_FIXTURES}\"\n").unwrap();
        assert_eq!(
            config.data.fixtures,
            Some(PathBuf::from("/tmp/fixtures.json"))
        );
    }

    #[test]
    fn test_missing_env_var_is_error() {
        assert!(load("[data]\nfixtures = \"${GUARDED_EXEC_TEST_UNSET_VAR}\"\n").is_err());
    }

    #[test]
    fn test_empty_entry_point_rejected() {
        let err = load("[sandbox]\nentry_point = \" \"\n").unwrap_err();
        assert!(err.to_string().contains("entry_point"));
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::load("/nonexistent/sandbox.toml").is_err());
    }
}
