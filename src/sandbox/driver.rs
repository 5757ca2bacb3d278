//! Runs one guest script end to end and folds every outcome into an
//! [`ExecutionResult`]. Nothing a guest script does makes `execute`
//! return an error or panic.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::capabilities::FinancialData;
use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::interp::value::Value;
use crate::interp::{compile, Args, Interpreter, Program};

use super::capture::Capture;
use super::{registry, result};

/// One inbound call: guest source plus the caller it runs as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source_text: String,
    pub caller_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output_text: String,
    pub metadata: Option<Map<String, Json>>,
    pub logs: String,
}

impl ExecutionResult {
    fn failed(output_text: String, logs: String) -> Self {
        ExecutionResult {
            success: false,
            output_text,
            metadata: None,
            logs,
        }
    }
}

/// The script inside the first ```` ```python ```` fence (or a bare
/// ```` ``` ```` fence), or the whole text when there is none. An
/// unterminated fence runs to the end of the text.
pub fn extract_source(text: &str) -> &str {
    let body = if let Some(start) = text.find("```python") {
        &text[start + "```python".len()..]
    } else if let Some(start) = text.find("```") {
        &text[start + 3..]
    } else {
        return text.trim();
    };
    let end = body.find("```").unwrap_or(body.len());
    body[..end].trim()
}

fn error_text(kind: &str, error: &SandboxError, traceback: Option<String>) -> String {
    format!("**{kind}**: `{error}`\n{}", traceback.unwrap_or_default())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

pub struct Driver {
    config: SandboxConfig,
    data: Arc<dyn FinancialData>,
}

impl Driver {
    pub fn new(config: SandboxConfig, data: Arc<dyn FinancialData>) -> Self {
        Driver { config, data }
    }

    /// Compiles and runs `source_text` as `caller_id`.
    pub fn execute(&self, source_text: &str, caller_id: i64) -> ExecutionResult {
        let span = info_span!("execute", run_id = %Uuid::new_v4(), caller_id);
        let _enter = span.enter();

        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.run(source_text, caller_id))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("interpreter panicked: {message}");
                ExecutionResult::failed(
                    format!("**Execution Error**: `internal error: {message}`\n"),
                    String::new(),
                )
            }
        };
        if result.success {
            info!(metadata_keys = result.metadata.as_ref().map_or(0, Map::len), "run succeeded");
        } else {
            warn!("run failed: {}", result.output_text.lines().next().unwrap_or(""));
        }
        result
    }

    fn run(&self, source_text: &str, caller_id: i64) -> ExecutionResult {
        let source = extract_source(source_text).replace("_print_", "print");
        let program = match compile(&source) {
            Ok(program) => program,
            Err(e) => {
                return ExecutionResult::failed(error_text("Compilation Error", &e, None), String::new())
            }
        };

        let capture = Capture::new();
        let namespace = registry::build(
            caller_id,
            self.data.clone(),
            &capture,
            &self.config.allowed_modules,
        );
        let mut interp = Interpreter::new(namespace, self.config.limits());
        let outcome = self
            .call_entry(&mut interp, &program)
            .and_then(|returned| result::validate(&returned, &capture));
        let traceback = interp.take_traceback();
        let steps = interp.steps();
        // Guest values may hold the capture; release them before draining.
        drop(interp);
        let drained = capture.drain();
        info!(steps, "guest finished");

        match outcome {
            Ok(verdict) => ExecutionResult {
                success: verdict.success,
                output_text: verdict.text.unwrap_or(drained.printed),
                metadata: verdict.metadata,
                logs: drained.logs,
            },
            Err(e) => ExecutionResult::failed(error_text("Execution Error", &e, traceback), drained.logs),
        }
    }

    fn call_entry(&self, interp: &mut Interpreter, program: &Program) -> Result<Value, SandboxError> {
        interp.exec(program)?;
        let name = &self.config.entry_point;
        let entry = interp
            .global(name)
            .filter(Value::is_callable)
            .ok_or_else(|| SandboxError::name_error(format!("entry point '{name}' is not defined")))?;
        interp.call(&entry, Args::new(Vec::new()))
    }
}

/// Runs every request on its own blocking worker. Results come back in
/// request order.
pub async fn execute_batch(driver: Arc<Driver>, requests: Vec<ExecutionRequest>) -> Vec<ExecutionResult> {
    let workers = requests.into_iter().map(|request| {
        let driver = Arc::clone(&driver);
        tokio::task::spawn_blocking(move || driver.execute(&request.source_text, request.caller_id))
    });
    join_all(workers)
        .await
        .into_iter()
        .map(|joined| {
            joined.unwrap_or_else(|e| {
                error!("worker failed: {e}");
                ExecutionResult::failed(format!("**Execution Error**: `worker failed: {e}`\n"), String::new())
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::FixtureStore;

    fn driver() -> Driver {
        Driver::new(SandboxConfig::default(), Arc::new(FixtureStore::default()))
    }

    // ── source extraction ───────────────────────────────

    #[test]
    fn test_extract_fenced_python() {
        let text = "Here you go:\n```python\ndef f():\n    pass\n```\nDone.";
        assert_eq!(extract_source(text), "def f():\n    pass");
    }

    #[test]
    fn test_extract_unterminated_fence_and_plain_text() {
        assert_eq!(extract_source("```python\nx = 1\n"), "x = 1");
        assert_eq!(extract_source("  x = 2  \n"), "x = 2");
        assert_eq!(extract_source("```\ny = 3\n```"), "y = 3");
    }

    // ── outcomes ────────────────────────────────────────

    #[test]
    fn test_compile_error_is_reported() {
        let result = driver().execute("def process_input(:\n", 1);
        assert!(!result.success);
        assert!(result.output_text.starts_with("**Compilation Error**: `line 1"));
        assert_eq!(result.logs, "");
    }

    #[test]
    fn test_missing_entry_point() {
        let result = driver().execute("x = 1\n", 1);
        assert!(!result.success);
        assert!(result.output_text.contains("entry point 'process_input' is not defined"));
    }

    #[test]
    fn test_print_rewrite_and_output_text() {
        let source = "def process_input():\n    _print_('hi')\n    return True, {}\n";
        let result = driver().execute(source, 1);
        assert!(result.success, "{}", result.output_text);
        assert_eq!(result.output_text, "hi\n");
        assert_eq!(result.metadata, Some(Map::new()));
    }

    #[test]
    fn test_string_payload_replaces_print_output() {
        let source = "def process_input():\n    print('ignored')\n    return False, 'Please pick an account.'\n";
        let result = driver().execute(source, 1);
        assert!(!result.success);
        assert_eq!(result.output_text, "Please pick an account.");
        assert!(result.metadata.is_none());
    }

    #[test]
    fn test_runtime_error_keeps_logs_and_traceback() {
        let source = "def process_input():\n    log('before')\n    return 1 / 0\n";
        let result = driver().execute(source, 1);
        assert!(!result.success);
        assert!(result.output_text.starts_with("**Execution Error**: `ZeroDivisionError"));
        assert!(result.output_text.contains("Traceback (most recent call last):"));
        assert_eq!(result.logs, "before");
    }

    #[test]
    fn test_contract_violation_is_execution_error() {
        let result = driver().execute("def process_input():\n    return 42\n", 1);
        assert!(!result.success);
        assert!(result.output_text.contains("ContractViolation"));
    }

    #[test]
    fn test_step_budget_stops_infinite_loop() {
        let config = SandboxConfig {
            max_steps: 5_000,
            ..SandboxConfig::default()
        };
        let driver = Driver::new(config, Arc::new(FixtureStore::default()));
        let result = driver.execute("def process_input():\n    while True:\n        pass\n", 1);
        assert!(!result.success);
        assert!(result.output_text.contains("StepBudgetExceeded"));
    }

    // ── batches ─────────────────────────────────────────

    #[tokio::test]
    async fn test_batch_runs_do_not_share_capture() {
        let requests = (0..8)
            .map(|i| ExecutionRequest {
                source_text: format!(
                    "def process_input():\n    log('run {i}')\n    print({i})\n    return True, {{'i': {i}}}\n"
                ),
                caller_id: i,
            })
            .collect();
        let results = execute_batch(Arc::new(driver()), requests).await;
        assert_eq!(results.len(), 8);
        for (i, result) in results.iter().enumerate() {
            assert!(result.success);
            assert_eq!(result.logs, format!("run {i}"));
            assert_eq!(result.output_text, format!("{i}\n"));
            assert_eq!(result.metadata.as_ref().unwrap()["i"], i as i64);
        }
    }
}
