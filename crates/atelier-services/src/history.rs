//! Paged task history.
//!
//! Keeps an in-memory list of the user's past tasks, newest first, filled
//! one page at a time. `refresh` replaces the list with the first page and
//! `load_more` appends the next one. Loads are serialized: `load_more` is a
//! no-op while another load is in flight or when everything is loaded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use atelier_core::config::HistoryConfig;
use atelier_core::wire::ListQuery;
use atelier_core::{ApiError, Task, TaskId, TaskStatus};

use crate::api::TaskApi;

#[derive(Debug, Default)]
struct View {
    tasks: Vec<Task>,
    total: u64,
    /// Last page merged into `tasks`. 0 = nothing loaded yet.
    page: u32,
    loading: bool,
    /// Bumped by `refresh`; a slower load from an older generation is discarded.
    generation: u64,
    error: Option<String>,
}

/// Cached, paged view of past tasks.
pub struct TaskHistory {
    api: Arc<dyn TaskApi>,
    page_size: u32,
    status: Option<TaskStatus>,
    view: Mutex<View>,
}

impl TaskHistory {
    pub fn new(api: Arc<dyn TaskApi>, page_size: u32) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
            status: None,
            view: Mutex::new(View::default()),
        }
    }

    pub fn from_config(api: Arc<dyn TaskApi>, config: &HistoryConfig) -> Self {
        Self::new(api, config.page_size)
    }

    /// Only list tasks in `status`.
    pub fn with_status(mut self, status: Option<TaskStatus>) -> Self {
        self.status = status;
        self
    }

    /// Fetch up to `limit` tasks starting at `offset`, bypassing the cache.
    ///
    /// The backend pages in fixed blocks of `limit`; an offset inside a
    /// block pulls the following block too and slices out the window.
    pub async fn load_page(&self, offset: u64, limit: u32) -> Result<Vec<Task>, ApiError> {
        let limit = limit.max(1);
        let first = u32::try_from(offset / u64::from(limit))
            .unwrap_or(u32::MAX - 1)
            + 1;
        let skip = (offset % u64::from(limit)) as usize;
        let wanted = limit as usize;

        let listing = self
            .api
            .list_tasks(&ListQuery::page(first, limit).with_status(self.status))
            .await?;
        let mut tasks: Vec<Task> = listing.data.into_iter().skip(skip).collect();
        let covered = u64::from(first) * u64::from(limit);
        if skip > 0 && tasks.len() < wanted && covered < listing.total {
            let next = ListQuery::page(first.saturating_add(1), limit).with_status(self.status);
            tasks.extend(self.api.list_tasks(&next).await?.data);
        }
        tasks.truncate(wanted);
        Ok(tasks)
    }

    /// Replace the cache with the first page. Returns how many tasks were
    /// loaded.
    pub async fn refresh(&self) -> Result<usize, ApiError> {
        let generation = {
            let mut view = self.lock();
            view.generation += 1;
            view.loading = true;
            view.generation
        };
        self.fetch(generation, 1, true).await
    }

    /// Append the next page. Returns how many new tasks were added; 0 when
    /// another load is in flight or there is nothing more to load.
    pub async fn load_more(&self) -> Result<usize, ApiError> {
        let (generation, page) = {
            let mut view = self.lock();
            if view.loading {
                tracing::debug!("history load already in flight");
                return Ok(0);
            }
            if view.page > 0 && !has_more(&view) {
                return Ok(0);
            }
            view.loading = true;
            (view.generation, view.page + 1)
        };
        self.fetch(generation, page, page == 1).await
    }

    async fn fetch(&self, generation: u64, page: u32, replace: bool) -> Result<usize, ApiError> {
        let query = ListQuery::page(page, self.page_size).with_status(self.status);
        let result = self.api.list_tasks(&query).await;

        let mut view = self.lock();
        if view.generation != generation {
            tracing::debug!(page, "discarding superseded history page");
            return Ok(0);
        }
        view.loading = false;
        match result {
            Ok(listing) => {
                view.error = None;
                view.total = listing.total;
                view.page = page;
                if replace {
                    view.tasks.clear();
                }
                let known: HashSet<TaskId> = view.tasks.iter().map(|t| t.id.clone()).collect();
                let before = view.tasks.len();
                // Tasks created since the previous page shift the listing;
                // anything already shown is skipped.
                view.tasks
                    .extend(listing.data.into_iter().filter(|t| !known.contains(&t.id)));
                let added = view.tasks.len() - before;
                tracing::debug!(page, added, total = view.total, "history page loaded");
                Ok(added)
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "history load failed");
                view.error = Some(e.user_message());
                Err(e)
            }
        }
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.lock().tasks.clone()
    }

    pub fn total(&self) -> u64 {
        self.lock().total
    }

    pub fn has_more(&self) -> bool {
        has_more(&self.lock())
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Message of the last failed load, cleared by the next success.
    pub fn last_error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    fn lock(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn has_more(view: &View) -> bool {
    (view.tasks.len() as u64) < view.total
}
