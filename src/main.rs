use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use guarded_exec::capabilities::FinancialData;
use guarded_exec::sandbox::execute_batch;
use guarded_exec::{Config, Driver, ExecutionRequest, FixtureStore};

const DEFAULT_CONFIG: &str = "config/sandbox.toml";

fn print_help() {
    println!(
        "\
guarded-exec v{}

Runs a generated finance script inside the guarded interpreter and prints
the execution result as JSON.

USAGE:
    guarded-exec [OPTIONS] [SCRIPT]

ARGUMENTS:
    SCRIPT    Path to the script (or a reply containing a ```python block).
              Use - or omit to read from stdin

OPTIONS:
    -c, --config <PATH>    Path to TOML configuration file [default: config/sandbox.toml]
    -u, --caller <ID>      Caller id the script runs as [default: 1]
    -b, --batch <PATH>     JSON-lines file of {{\"source_text\", \"caller_id\"}} requests,
                           run concurrently
    -h, --help             Print this help message and exit
    -V, --version          Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, guarded_exec=debug,warn)

EXAMPLES:
    guarded-exec script.py                     # uses config/sandbox.toml
    guarded-exec -u 42 - < reply.md            # script from stdin as caller 42
    guarded-exec --batch requests.jsonl        # concurrent batch
    RUST_LOG=debug guarded-exec script.py      # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[derive(Debug, PartialEq)]
struct Cli {
    config_path: Option<String>,
    caller_id: i64,
    batch: Option<String>,
    script: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Cli> {
    let mut cli = Cli {
        config_path: None,
        caller_id: 1,
        batch: None,
        script: None,
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "-c" | "--config" => cli.config_path = Some(value(arg.as_str())?),
            "-u" | "--caller" => {
                let raw = value(arg.as_str())?;
                cli.caller_id = raw
                    .parse()
                    .map_err(|_| anyhow!("Invalid caller id '{raw}'"))?;
            }
            "-b" | "--batch" => cli.batch = Some(value(arg.as_str())?),
            flag if flag.starts_with('-') && flag != "-" => {
                return Err(anyhow!("Unknown option '{flag}' (see --help)"));
            }
            _ if cli.script.is_some() => {
                return Err(anyhow!("Only one SCRIPT argument is accepted"));
            }
            _ => cli.script = Some(arg.clone()),
        }
    }
    Ok(cli)
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None if Path::new(DEFAULT_CONFIG).exists() => Config::load(DEFAULT_CONFIG),
        None => {
            info!("No {DEFAULT_CONFIG}, using defaults");
            Ok(Config::default())
        }
    }
}

fn read_script(script: Option<&str>) -> Result<String> {
    match script {
        None | Some("-") => {
            let mut source = String::new();
            std::io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read script {path}: {e}")),
    }
}

fn read_batch(path: &str) -> Result<Vec<ExecutionRequest>> {
    let content =
        std::fs::read_to_string(path).map_err(|e| anyhow!("Cannot read batch {path}: {e}"))?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| anyhow!("{path}:{}: {e}", n + 1))
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("guarded-exec v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging on stderr (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("guarded_exec=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args(std::env::args().skip(1))?;
    let config = load_config(cli.config_path.as_deref())?;

    info!("Entry point: {}", config.sandbox.entry_point);
    info!(
        "Allowed modules: {}",
        config.sandbox.allowed_modules.join(", ")
    );

    let data: Arc<dyn FinancialData> = match &config.data.fixtures {
        Some(path) => {
            info!("Loading fixtures from {}", path.display());
            Arc::new(FixtureStore::load(path)?)
        }
        None => {
            warn!("No [data] fixtures configured, every caller has empty data");
            Arc::new(FixtureStore::default())
        }
    };
    let driver = Arc::new(Driver::new(config.sandbox.clone(), data));

    if let Some(path) = &cli.batch {
        let requests = read_batch(path)?;
        info!("Running {} request(s) from {path}", requests.len());
        let results = execute_batch(driver, requests).await;
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let source = read_script(cli.script.as_deref())?;
    let caller_id = cli.caller_id;
    let result = tokio::task::spawn_blocking(move || driver.execute(&source, caller_id)).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    // ── parse_args tests ────────────────────────────────

    #[test]
    fn test_defaults() {
        let cli = parse_args(args(&[])).unwrap();
        assert_eq!(cli.caller_id, 1);
        assert!(cli.script.is_none() && cli.batch.is_none() && cli.config_path.is_none());
    }

    #[test]
    fn test_all_options() {
        let cli = parse_args(args(&["-c", "a.toml", "--caller", "42", "s.py"])).unwrap();
        assert_eq!(
            cli,
            Cli {
                config_path: Some("a.toml".into()),
                caller_id: 42,
                batch: None,
                script: Some("s.py".into()),
            }
        );
    }

    #[test]
    fn test_stdin_dash_is_a_script() {
        let cli = parse_args(args(&["-"])).unwrap();
        assert_eq!(cli.script.as_deref(), Some("-"));
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse_args(args(&["--caller", "abc"])).is_err());
        assert!(parse_args(args(&["--batch"])).is_err());
        assert!(parse_args(args(&["--frobnicate"])).is_err());
        assert!(parse_args(args(&["a.py", "b.py"])).is_err());
    }

    // ── batch file tests ────────────────────────────────

    #[test]
    fn test_read_batch_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"source_text": "x = 1", "caller_id": 3}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"source_text": "y = 2", "caller_id": 4}}"#).unwrap();
        let requests = read_batch(file.path().to_str().unwrap()).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].caller_id, 4);
    }

    #[test]
    fn test_read_batch_reports_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let err = read_batch(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains(":1:"));
    }
}
