//! Worker dispatch and completion routing
//!
//! Completion packets are correlated by the `projectId` they echo back.
//! Each project has at most one live pipeline, so the project id selects
//! exactly one route. Packets without an id fall back to every route the
//! sending worker is part of; each route's tracker ignores targets it does
//! not own.

use shipyard_core::channel::{ChannelHandler, Connection, Packet, names};
use shipyard_core::domain::worker::Platform;
use shipyard_core::dto::build::{CompletionPacket, DispatchPacket};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::tracker::{Applied, BuildTracker};
use crate::error::Result;
use crate::registry::{WorkerHandle, WorkerRegistry};

/// Everything needed to dispatch one pipeline's local targets
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub project_id: Uuid,
    pub git_url: String,
    pub branch: String,
    pub version: Option<String>,
    /// Target name and the platform it must be built on, in request order
    pub targets: Vec<(String, Platform)>,
}

/// Targets routed to one worker
#[derive(Debug, Clone)]
pub struct Assignment {
    pub worker: WorkerHandle,
    pub targets: Vec<String>,
}

/// Group targets by the worker their platform resolves to.
///
/// Workers appear in the order their first target was requested. Fails
/// before anything is sent if any platform has no worker.
pub fn plan(registry: &WorkerRegistry, targets: &[(String, Platform)]) -> Result<Vec<Assignment>> {
    let mut assignments: Vec<Assignment> = Vec::new();

    for (target, platform) in targets {
        let worker = registry.find(*platform)?;
        match assignments.iter_mut().find(|a| a.worker.id == worker.id) {
            Some(existing) => existing.targets.push(target.clone()),
            None => assignments.push(Assignment {
                worker,
                targets: vec![target.clone()],
            }),
        }
    }

    Ok(assignments)
}

struct Route {
    pipeline_id: Uuid,
    tracker: Arc<BuildTracker>,
    workers: HashSet<String>,
}

type Routes = Arc<Mutex<HashMap<Uuid, Route>>>;

fn lock(routes: &Routes) -> MutexGuard<'_, HashMap<Uuid, Route>> {
    routes.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct BuildDispatcher {
    registry: Arc<WorkerRegistry>,
    routes: Routes,
}

impl BuildDispatcher {
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            routes: Arc::default(),
        }
    }

    /// Send one dispatch packet per resolved worker.
    ///
    /// Returns once every packet is queued; completion is observed through
    /// `tracker`. The returned guard keeps completion routing alive and
    /// removes it when dropped.
    pub async fn dispatch(
        &self,
        request: &DispatchRequest,
        tracker: Arc<BuildTracker>,
    ) -> Result<RouteGuard> {
        let assignments = plan(&self.registry, &request.targets)?;

        // Route before sending so that an immediate reply is not lost
        let guard = RouteGuard {
            routes: self.routes.clone(),
            project_id: request.project_id,
            pipeline_id: tracker.pipeline_id(),
        };
        lock(&self.routes).insert(
            request.project_id,
            Route {
                pipeline_id: tracker.pipeline_id(),
                tracker: tracker.clone(),
                workers: assignments.iter().map(|a| a.worker.id.clone()).collect(),
            },
        );

        for assignment in assignments {
            for target in &assignment.targets {
                tracker.assign(target, &assignment.worker.id);
            }

            let packet = DispatchPacket {
                project_id: request.project_id,
                targets: assignment.targets.clone(),
                git_url: request.git_url.clone(),
                branch: request.branch.clone(),
                version: request.version.clone(),
            };

            info!(
                "Dispatching {} to worker {}",
                assignment.targets.join(", "),
                assignment.worker.id
            );
            assignment
                .worker
                .connection
                .send_json(names::BUILD_RUNNER, &packet)
                .await?;
        }

        Ok(guard)
    }

    /// Fail every unfinished target routed to a worker that went away
    pub fn on_worker_disconnected(&self, worker_id: &str) {
        let routes = lock(&self.routes);
        for route in routes.values().filter(|r| r.workers.contains(worker_id)) {
            let failed = route
                .tracker
                .fail_pending_assigned_to(worker_id, "worker disconnected");
            if !failed.is_empty() {
                warn!(
                    "Worker {} disconnected; failing {} in pipeline {}",
                    worker_id,
                    failed.join(", "),
                    route.pipeline_id
                );
            }
        }
    }

    fn route_completion(&self, from: &Connection, completion: &CompletionPacket) {
        let routes = lock(&self.routes);

        let applied: Vec<Applied> = match completion.project_id {
            Some(project_id) => routes
                .get(&project_id)
                .map(|route| route.tracker.apply(completion))
                .into_iter()
                .collect(),
            None => routes
                .values()
                .filter(|route| route.workers.contains(from.id()))
                .map(|route| route.tracker.apply(completion))
                .collect(),
        };

        if !applied.iter().any(|a| *a != Applied::Ignored) {
            warn!(
                "Ignoring {:?} for target {} from worker {}: no matching pipeline",
                completion.status,
                completion.target_name,
                from.id()
            );
        }
    }
}

impl ChannelHandler for BuildDispatcher {
    fn on_packet(&self, from: &Connection, packet: Packet) {
        match packet.parse_json::<CompletionPacket>() {
            Ok(completion) => {
                debug!(
                    "Completion from {}: {} {:?}",
                    from.id(),
                    completion.target_name,
                    completion.status
                );
                self.route_completion(from, &completion);
            }
            Err(e) => warn!("Malformed completion packet from {}: {}", from.id(), e),
        }
    }
}

/// Keeps a pipeline's completion route registered
pub struct RouteGuard {
    routes: Routes,
    project_id: Uuid,
    pipeline_id: Uuid,
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        let mut routes = lock(&self.routes);
        if routes
            .get(&self.project_id)
            .is_some_and(|r| r.pipeline_id == self.pipeline_id)
        {
            routes.remove(&self.project_id);
            debug!("Removed completion route for pipeline {}", self.pipeline_id);
        }
    }
}
