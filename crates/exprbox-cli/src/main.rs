#![warn(missing_docs)]

//! exprbox: evaluate one sandboxed workflow expression from the command line.
//!
//! ```text
//! exprbox eval '$json.email.toUpperCase()' --data item.json
//! echo '{"$json": {"n": 2}}' | exprbox eval '$json.n * 21' --data -
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use exprbox_config::ExprboxConfig;
use exprbox_sandbox::{EvaluateOptions, EvaluatorPool, WorkflowData};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: exprbox eval <expression> [--data <file.json>|-] [--config <file>] [--timeout-ms <n>]
       exprbox --version";

/// Where the data roots come from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DataSource {
    None,
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EvalArgs {
    expression: String,
    data: DataSource,
    config: Option<PathBuf>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Version,
    Eval(EvalArgs),
}

fn parse_args(args: &[String]) -> Result<Command> {
    if args.iter().any(|a| a == "--version" || a == "-V") {
        return Ok(Command::Version);
    }
    let mut rest = args.iter();
    match rest.next().map(String::as_str) {
        Some("eval") => {}
        Some(other) => bail!("unknown command '{other}'\n{USAGE}"),
        None => bail!("{USAGE}"),
    }

    let mut expression = None;
    let mut data = DataSource::None;
    let mut config = None;
    let mut timeout_ms = None;
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--data" => {
                let value = rest.next().context("--data needs a file path or '-'")?;
                data = if value == "-" {
                    DataSource::Stdin
                } else {
                    DataSource::File(PathBuf::from(value))
                };
            }
            "--config" => {
                let value = rest.next().context("--config needs a file path")?;
                config = Some(PathBuf::from(value));
            }
            "--timeout-ms" => {
                let value = rest.next().context("--timeout-ms needs a number")?;
                let ms: u64 = value
                    .parse()
                    .with_context(|| format!("invalid --timeout-ms '{value}'"))?;
                if ms == 0 {
                    bail!("--timeout-ms must be greater than 0");
                }
                timeout_ms = Some(ms);
            }
            flag if flag.starts_with("--") => bail!("unknown option '{flag}'\n{USAGE}"),
            positional => {
                if expression.is_some() {
                    bail!("unexpected argument '{positional}'\n{USAGE}");
                }
                expression = Some(positional.to_string());
            }
        }
    }

    Ok(Command::Eval(EvalArgs {
        expression: expression.context(USAGE)?,
        data,
        config,
        timeout_ms,
    }))
}

/// Locate the config file.
///
/// Search order:
/// 1. `--config <path>` (must exist)
/// 2. `EXPRBOX_CONFIG` environment variable
/// 3. `./exprbox.toml` in the current directory
/// 4. None (defaults apply)
fn find_config_file(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("EXPRBOX_CONFIG") {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }

    let cwd = PathBuf::from("exprbox.toml");
    if cwd.exists() {
        return Some(cwd);
    }

    None
}

fn load_data(source: &DataSource) -> Result<WorkflowData> {
    let text = match source {
        DataSource::None => return Ok(WorkflowData::default()),
        DataSource::Stdin => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read data from stdin")?;
            buf
        }
        DataSource::File(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read data from {}", path.display()))?,
    };
    let value: Value = serde_json::from_str(&text).context("data is not valid JSON")?;
    WorkflowData::from_json(value).context("data must be a JSON object of named roots")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let eval = match parse_args(&args)? {
        Command::Version => {
            println!("exprbox {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Eval(eval) => eval,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match find_config_file(eval.config.as_ref()) {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config");
            ExprboxConfig::from_file_with_env(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))?
        }
        None => ExprboxConfig::default(),
    };

    let data = load_data(&eval.data)?;

    // One expression needs one isolate regardless of the configured pool size.
    let mut pool_config = config.pool_config();
    pool_config.workers = 1;
    let pool = EvaluatorPool::new(pool_config).context("failed to start evaluator")?;

    let options = EvaluateOptions {
        timeout: eval.timeout_ms.map(Duration::from_millis),
        ..EvaluateOptions::default()
    };
    let result = pool.evaluate(eval.expression, data, options).await;
    pool.shutdown();

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(e) => {
            tracing::debug!(code = e.code(), "evaluation failed");
            println!("{}", serde_json::to_string_pretty(&e.to_structured_error())?);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn version_flag_wins() {
        assert_eq!(parse_args(&args(&["eval", "1", "--version"])).unwrap(), Command::Version);
        assert_eq!(parse_args(&args(&["-V"])).unwrap(), Command::Version);
    }

    #[test]
    fn eval_with_all_options() {
        let cmd = parse_args(&args(&[
            "eval",
            "$json.a + 1",
            "--data",
            "item.json",
            "--config",
            "box.toml",
            "--timeout-ms",
            "250",
        ]))
        .unwrap();
        assert_eq!(
            cmd,
            Command::Eval(EvalArgs {
                expression: "$json.a + 1".into(),
                data: DataSource::File("item.json".into()),
                config: Some("box.toml".into()),
                timeout_ms: Some(250),
            })
        );
    }

    #[test]
    fn dash_reads_stdin() {
        let Command::Eval(eval) = parse_args(&args(&["eval", "1", "--data", "-"])).unwrap() else {
            panic!("expected eval");
        };
        assert_eq!(eval.data, DataSource::Stdin);
    }

    #[test]
    fn missing_expression_is_an_error() {
        assert!(parse_args(&args(&["eval"])).is_err());
        assert!(parse_args(&args(&[])).is_err());
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args(&args(&["run", "1"])).is_err());
        assert!(parse_args(&args(&["eval", "1", "2"])).is_err());
        assert!(parse_args(&args(&["eval", "1", "--fast"])).is_err());
        assert!(parse_args(&args(&["eval", "1", "--timeout-ms", "soon"])).is_err());
        assert!(parse_args(&args(&["eval", "1", "--timeout-ms", "0"])).is_err());
        assert!(parse_args(&args(&["eval", "1", "--data"])).is_err());
    }

    #[test]
    fn explicit_config_is_used_as_given() {
        let path = PathBuf::from("/nonexistent/exprbox.toml");
        assert_eq!(find_config_file(Some(&path)), Some(path));
    }

    #[test]
    fn no_data_means_empty_roots() {
        assert!(load_data(&DataSource::None).is_ok());
    }
}
