//! Live-pipeline set
//!
//! Enforces "at most one non-terminal pipeline per project" and keeps a
//! bounded history of finished runs for status queries.

use shipyard_core::domain::pipeline::Pipeline;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};

#[derive(Debug)]
struct Inner {
    live: HashMap<Uuid, Pipeline>,
    by_project: HashMap<Uuid, Uuid>,
    history: VecDeque<Pipeline>,
    accepting: bool,
}

#[derive(Debug)]
pub struct ActivePipelines {
    inner: Mutex<Inner>,
    history_limit: usize,
    live_count: watch::Sender<usize>,
}

impl ActivePipelines {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                live: HashMap::new(),
                by_project: HashMap::new(),
                history: VecDeque::new(),
                accepting: true,
            }),
            history_limit: history_limit.max(1),
            live_count: watch::Sender::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new pipeline, rejecting it if its project is busy
    pub fn try_claim(&self, pipeline: &Pipeline) -> Result<()> {
        let mut inner = self.lock();
        if !inner.accepting {
            return Err(OrchestrationError::ShuttingDown);
        }
        if inner.by_project.contains_key(&pipeline.project_id) {
            return Err(OrchestrationError::ProjectAlreadyActive(pipeline.project_id));
        }

        inner.by_project.insert(pipeline.project_id, pipeline.id);
        inner.live.insert(pipeline.id, pipeline.clone());
        self.live_count.send_replace(inner.live.len());
        Ok(())
    }

    /// Replace the live snapshot of a running pipeline
    pub fn publish(&self, pipeline: &Pipeline) {
        let mut inner = self.lock();
        if let Some(entry) = inner.live.get_mut(&pipeline.id) {
            *entry = pipeline.clone();
        }
    }

    /// Move a pipeline from the live set to history, releasing its project
    pub fn finish(&self, pipeline: Pipeline) {
        let mut inner = self.lock();
        inner.live.remove(&pipeline.id);
        if inner.by_project.get(&pipeline.project_id) == Some(&pipeline.id) {
            inner.by_project.remove(&pipeline.project_id);
        }

        inner.history.push_back(pipeline);
        while inner.history.len() > self.history_limit {
            if let Some(evicted) = inner.history.pop_front() {
                debug!("Evicted pipeline {} from history", evicted.id);
            }
        }
        self.live_count.send_replace(inner.live.len());
    }

    /// Live pipeline id for a project, if any
    pub fn active_for(&self, project_id: Uuid) -> Option<Uuid> {
        self.lock().by_project.get(&project_id).copied()
    }

    pub fn is_active(&self, project_id: Uuid) -> bool {
        self.active_for(project_id).is_some()
    }

    /// Live pipeline, or the most recent finished one with that id
    pub fn get(&self, id: Uuid) -> Option<Pipeline> {
        let inner = self.lock();
        inner
            .live
            .get(&id)
            .cloned()
            .or_else(|| inner.history.iter().rev().find(|p| p.id == id).cloned())
    }

    /// Live pipelines, oldest first
    pub fn list_live(&self) -> Vec<Pipeline> {
        let mut live: Vec<Pipeline> = self.lock().live.values().cloned().collect();
        live.sort_by_key(|p| p.started_at);
        live
    }

    pub fn live_count(&self) -> usize {
        *self.live_count.borrow()
    }

    /// Refuse further claims
    pub fn stop_accepting(&self) {
        self.lock().accepting = false;
    }

    /// Wait until no pipeline is live; false if `timeout` elapsed first
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.live_count.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        )
    }
}
