use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ps_llm::ContextFormat;
use ps_runtime::{RunOptions, run_script_file};

mod cli;
mod config;

use cli::{Cli, Commands};
use config::ProjectConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let project_root = match &cli.cd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to determine current directory")?,
    };

    match cli.command {
        Commands::Run {
            script,
            max_steps,
            max_time_ms,
            max_llm_calls,
            halt_on_loop,
            context_format,
            args,
        } => {
            let config = ProjectConfig::load(&project_root)?;

            let mut budget = config.budget();
            if let Some(max_steps) = max_steps {
                budget.max_steps = max_steps;
            }
            if let Some(max_time_ms) = max_time_ms {
                budget.max_time_ms = max_time_ms;
            }
            if let Some(max_llm_calls) = max_llm_calls {
                budget.max_llm_calls = max_llm_calls;
            }

            let context_format = match context_format.as_deref() {
                Some(name) => ContextFormat::from_name(name)
                    .with_context(|| format!("unknown context format '{name}'"))?,
                None => ContextFormat::default(),
            };

            let options = RunOptions {
                policy: config.policy(),
                budget,
                llm: config.llm_config(),
                context_format,
                halt_on_loop,
                args: parse_bound_args(&args)?,
                ..RunOptions::default()
            };

            let script_path = resolve_script(&project_root, &script);
            let outcome = run_script_file(&project_root, &script_path, options).await?;
            if let Some(error) = &outcome.error {
                eprintln!("{error}");
                eprintln!("run {} failed; logs in .ps-runs/{}", outcome.run_id, outcome.run_id);
                std::process::exit(1);
            }
            println!("run {} finished ok", outcome.run_id);
            Ok(())
        }
        Commands::Replay { run_id, follow } => {
            let timeline = ps_session::render_timeline(&project_root, &run_id, follow)?;
            print!("{timeline}");
            Ok(())
        }
    }
}

fn resolve_script(project_root: &std::path::Path, script: &std::path::Path) -> PathBuf {
    if script.is_absolute() {
        script.to_path_buf()
    } else {
        project_root.join(script)
    }
}

/// Parse repeated `--arg name=json` bindings; bare values fall back to
/// strings.
fn parse_bound_args(raw: &[String]) -> Result<Vec<(String, serde_json::Value)>> {
    let mut out = Vec::with_capacity(raw.len());
    for binding in raw {
        let Some((name, value)) = binding.split_once('=') else {
            bail!("--arg expects NAME=JSON, got '{binding}'");
        };
        let parsed = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        out.push((name.to_string(), parsed));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bound_args() {
        let parsed = parse_bound_args(&[
            "count=3".to_string(),
            "name=widget".to_string(),
            "flags=[1,2]".to_string(),
        ])
        .unwrap();
        assert_eq!(parsed[0].1, serde_json::json!(3));
        assert_eq!(parsed[1].1, serde_json::json!("widget"));
        assert_eq!(parsed[2].1, serde_json::json!([1, 2]));

        assert!(parse_bound_args(&["nonsense".to_string()]).is_err());
    }
}
