//! atelier-ctl — command-line client for the Atelier generation backend.

mod cmd;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use atelier_core::config::AtelierConfig;

use cmd::generate::GenerateArgs;

fn print_usage() {
    println!("Usage: atelier-ctl [--config <path>] [--token <token>] <command>");
    println!();
    println!("Commands:");
    println!("  generate <tryon|model|detail> [options]   Submit a job and wait for it");
    println!("      --prompt <text>        Full prompt");
    println!("      --user-prompt <text>   Supplementary prompt");
    println!("      --image <url>          Reference image (repeatable)");
    println!("      --aspect <ratio>       Aspect ratio (default 1:1)");
    println!("      --resolution <res>     Resolution (default 1K)");
    println!("      --option <key=value>   Selected option (repeatable)");
    println!("      --no-push              Track by polling only");
    println!("  task <id>                  Show one task");
    println!("  watch <id>                 Poll a task until it finishes");
    println!("  history [--status <s>] [--pages <n>] [--page-size <n>]");
    println!("                             List past tasks");
    println!("  config                     Show the effective configuration");
    println!("  config init                Write a default config file");
    println!();
    println!("Options:");
    println!("  --config <path>   Config file (default: $ATELIER_CONFIG or ~/.config/atelier/config.toml)");
    println!("  --token <token>   Auth token (overrides config and ATELIER_API__TOKEN)");
    println!();
    println!("Logging goes to stderr; set RUST_LOG=debug for detail.");
}

fn load_config(path: Option<PathBuf>) -> AtelierConfig {
    let result = match path {
        Some(path) => AtelierConfig::load_from(path),
        None => AtelierConfig::load(),
    };
    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        AtelierConfig::default()
    })
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut config_path = None;
    let mut token = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config_path = Some(PathBuf::from(
                    args.get(i).context("--config requires a value")?,
                ));
            }
            "--token" => {
                i += 1;
                token = Some(args.get(i).context("--token requires a value")?.clone());
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    let mut config = load_config(config_path);
    if let Some(token) = token {
        config.api.token = token;
    }

    match remaining.as_slice() {
        ["generate", rest @ ..] => {
            let args = GenerateArgs::parse(rest)?;
            cmd::generate::cmd_generate(&config, args).await
        }
        ["task", id] => cmd::task::cmd_task(&config, id).await,
        ["watch", id] => cmd::task::cmd_watch(&config, id).await,
        ["history", rest @ ..] => cmd::history::cmd_history(&config, rest).await,
        ["config"] => cmd::config::cmd_config_show(&config),
        ["config", "init"] => cmd::config::cmd_config_init(),
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
