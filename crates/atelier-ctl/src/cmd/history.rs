//! `history`: list past tasks.

use anyhow::{Context, Result};

use atelier_client::Session;
use atelier_core::TaskStatus;
use atelier_core::config::AtelierConfig;
use atelier_services::TaskHistory;

use super::render::{banner, print_task};

pub async fn cmd_history(config: &AtelierConfig, args: &[&str]) -> Result<()> {
    let mut status = None;
    let mut pages = 1u32;
    let mut page_size = config.history.page_size;
    let mut i = 0;
    while i < args.len() {
        match args[i] {
            "--status" => {
                i += 1;
                let s = args.get(i).context("--status requires a value")?;
                status = Some(TaskStatus::parse(s).with_context(|| format!("unknown status: {s}"))?);
            }
            "--pages" => {
                i += 1;
                pages = args
                    .get(i)
                    .context("--pages requires a value")?
                    .parse()
                    .context("--pages must be a number")?;
            }
            "--page-size" => {
                i += 1;
                page_size = args
                    .get(i)
                    .context("--page-size requires a value")?
                    .parse()
                    .context("--page-size must be a number")?;
            }
            other => anyhow::bail!("unknown history option: {other}"),
        }
        i += 1;
    }

    let session = Session::new(config)?;
    let history = TaskHistory::new(session.api.clone(), page_size).with_status(status);

    history.refresh().await?;
    for _ in 1..pages {
        if !history.has_more() {
            break;
        }
        history.load_more().await?;
    }

    let tasks = history.tasks();
    if tasks.is_empty() {
        println!("No tasks yet.");
        return Ok(());
    }

    banner(&format!("Tasks ({} of {})", tasks.len(), history.total()));
    for task in &tasks {
        print_task(task);
    }
    if history.has_more() {
        println!("\n  More available: --pages {}", pages + 1);
    }
    Ok(())
}
