//! History paging over the list endpoint.

use serde_json::{json, Value};

use atelier_client::Session;
use atelier_core::{ApiError, TaskStatus};
use atelier_services::TaskHistory;

use crate::backend::{MockBackend, TOKEN};
use crate::fast_config;

/// 45 tasks, newest first; every third one failed.
fn listing() -> Vec<Value> {
    (0..45)
        .map(|i| {
            if i % 3 == 0 {
                json!({
                    "task_id": format!("h-{i}"),
                    "status": "failed",
                    "error": { "code": "OOM", "message": "out of memory" },
                })
            } else {
                json!({
                    "task_id": format!("h-{i}"),
                    "status": "succeeded",
                    "task_type": "model",
                    "result": { "images": [format!("https://img/{i}.png")] },
                    "created_at": "2026-10-16T08:00:00",
                })
            }
        })
        .collect()
}

#[tokio::test]
async fn pages_through_the_whole_listing() {
    let backend = MockBackend::start().await;
    backend.set_listing(listing());
    let session = Session::new(&fast_config(&backend.base_url(), TOKEN)).unwrap();
    let history = &session.history;

    assert_eq!(history.refresh().await.unwrap(), 20);
    assert_eq!(history.total(), 45);
    assert!(history.has_more());
    assert_eq!(history.load_more().await.unwrap(), 20);
    assert_eq!(history.load_more().await.unwrap(), 5);
    assert!(!history.has_more());
    assert_eq!(history.load_more().await.unwrap(), 0);

    let tasks = history.tasks();
    let ids: Vec<String> = tasks.iter().map(|t| t.id.to_string()).collect();
    let expected: Vec<String> = (0..45).map(|i| format!("h-{i}")).collect();
    assert_eq!(ids, expected);

    let second = &tasks[1];
    assert_eq!(second.status, TaskStatus::Succeeded);
    assert_eq!(
        second.result.as_ref().and_then(|r| r.first_url()),
        Some("https://img/1.png")
    );
    assert!(second.timestamps.created_at.is_some());
}

#[tokio::test]
async fn status_filter_reaches_the_backend() {
    let backend = MockBackend::start().await;
    backend.set_listing(listing());
    let session = Session::new(&fast_config(&backend.base_url(), TOKEN)).unwrap();
    let failed = TaskHistory::new(session.api.clone(), 10).with_status(Some(TaskStatus::Failed));

    assert_eq!(failed.refresh().await.unwrap(), 10);
    assert_eq!(failed.total(), 15);
    assert!(failed.tasks().iter().all(|t| t.status == TaskStatus::Failed));

    let tail = failed.load_page(12, 10).await.unwrap();
    let ids: Vec<&str> = tail.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["h-36", "h-39", "h-42"]);

    let window = failed.load_page(5, 5).await.unwrap();
    assert_eq!(window.len(), 5);
    assert_eq!(window[0].id.as_str(), "h-15");
}

#[tokio::test]
async fn unauthorized_listing_records_the_error() {
    let backend = MockBackend::start().await;
    backend.set_listing(listing());
    let session = Session::new(&fast_config(&backend.base_url(), "")).unwrap();

    let err = session.history.refresh().await.unwrap_err();
    assert!(matches!(err, ApiError::Http { status: 401, .. }));
    assert_eq!(session.history.last_error().as_deref(), Some("Not authenticated"));
    assert!(session.history.tasks().is_empty());
    assert!(!session.history.is_loading());

    session.token.set(TOKEN);
    assert_eq!(session.history.refresh().await.unwrap(), 20);
    assert_eq!(session.history.last_error(), None);
    let tail = TaskHistory::new(session.api.clone(), 20).load_page(40, 20).await.unwrap();
    assert_eq!(tail.len(), 5);
}
