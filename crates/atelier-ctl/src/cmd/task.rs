//! `task` and `watch`: inspect one task.

use std::sync::Arc;

use anyhow::{Result, bail};

use atelier_client::HttpTaskApi;
use atelier_core::config::AtelierConfig;
use atelier_core::{TaskId, TrackError};
use atelier_services::{PollSettings, SharedToken, TaskApi, TaskPoller};

use super::render::{banner, print_task};

fn api(config: &AtelierConfig) -> Result<HttpTaskApi> {
    let token = Arc::new(SharedToken::new(config.token().map(str::to_string)));
    Ok(HttpTaskApi::new(&config.api.base_url, token)?)
}

pub async fn cmd_task(config: &AtelierConfig, task_id: &str) -> Result<()> {
    let task = api(config)?.get_task(&TaskId::from(task_id)).await?;
    if let Err(e) = task.check_invariants() {
        tracing::warn!(error = %e, "backend returned an inconsistent task");
    }
    banner(&format!("Task {}", task.id.short()));
    print_task(&task);
    Ok(())
}

/// Poll until the task finishes. Ctrl-C stops polling.
pub async fn cmd_watch(config: &AtelierConfig, task_id: &str) -> Result<()> {
    let poller = TaskPoller::new(Arc::new(api(config)?), PollSettings::from(&config.poller));
    let mut handle = poller.spawn(TaskId::from(task_id));
    eprintln!(
        "  polling {task_id} every {}ms (up to {} checks)",
        config.poller.interval_ms, config.poller.max_attempts
    );

    let outcome = tokio::select! {
        outcome = handle.outcome() => outcome,
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            Err(TrackError::Cancelled)
        }
    };

    match outcome {
        Ok(task) => {
            banner(&format!("Task {} finished", task.id.short()));
            print_task(&task);
            Ok(())
        }
        Err(e) => bail!("{}", e.user_message()),
    }
}
