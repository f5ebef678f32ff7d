//! Shared terminal output.

use chrono::{DateTime, Local, Utc};

use atelier_core::Task;
use atelier_core::error::GENERIC_FAILURE_MESSAGE;

pub fn banner(title: &str) {
    println!("═══════════════════════════════════════");
    println!("  {title}");
    println!("═══════════════════════════════════════");
}

pub fn time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Seconds from start (or creation) to finish, when both are known.
pub fn elapsed(task: &Task) -> Option<i64> {
    let ts = &task.timestamps;
    let start = ts.started_at.or(ts.created_at)?;
    Some((ts.finished_at? - start).num_seconds())
}

pub fn print_task(task: &Task) {
    println!("  ┌─ {} [{}]", task.id, task.status);
    if let Some(task_type) = task.params.task_type {
        println!("  │  type     : {task_type}");
    }
    if let Some(prompt) = task.params.prompt.as_deref().filter(|p| !p.is_empty()) {
        println!("  │  prompt   : {}", truncate(prompt, 60));
    }
    println!("  │  created  : {}", time(task.timestamps.created_at));
    if let Some(secs) = elapsed(task) {
        println!("  │  took     : {secs}s");
    }
    if let Some(failure) = &task.error {
        println!("  │  error    : {}", failure.message_or(GENERIC_FAILURE_MESSAGE));
    }
    match task.result.as_ref().map(|r| r.images.as_slice()) {
        Some(images) if !images.is_empty() => {
            for image in images {
                println!("  │  image    : {}", image.best_url().unwrap_or("-"));
            }
            println!("  └─");
        }
        _ => println!("  └─"),
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}
