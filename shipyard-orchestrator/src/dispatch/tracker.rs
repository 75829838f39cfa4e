//! Per-pipeline build completion tracking
//!
//! One [`BuildTask`] per requested target, held in a `watch` channel so the
//! pipeline can await "every task terminal" without polling. Completion
//! handlers (channel packets, broker callbacks, disconnects) mutate the set
//! through [`BuildTracker`]; repeated terminal updates are no-ops.

use chrono::Utc;
use shipyard_core::domain::build::{BuildStatus, BuildTask};
use shipyard_core::dto::build::{CompletionPacket, CompletionStatus};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{OrchestrationError, Result};

/// Result of applying one status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Task state changed
    Updated,
    /// Task was already terminal, nothing changed
    Duplicate,
    /// Target is not part of this pipeline
    Ignored,
}

#[derive(Debug)]
pub struct BuildTracker {
    pipeline_id: Uuid,
    tasks: watch::Sender<Vec<BuildTask>>,
}

impl BuildTracker {
    pub fn new(pipeline_id: Uuid, targets: &[String]) -> Self {
        let tasks = targets
            .iter()
            .map(|t| BuildTask::queued(pipeline_id, t.clone()))
            .collect();
        Self {
            pipeline_id,
            tasks: watch::Sender::new(tasks),
        }
    }

    pub fn pipeline_id(&self) -> Uuid {
        self.pipeline_id
    }

    pub fn contains(&self, target: &str) -> bool {
        self.tasks.borrow().iter().any(|t| t.target == target)
    }

    pub fn snapshot(&self) -> Vec<BuildTask> {
        self.tasks.borrow().clone()
    }

    /// Record which worker (or remote build id) a target was routed to
    pub fn assign(&self, target: &str, assignee: &str) {
        self.tasks.send_if_modified(|tasks| {
            match tasks.iter_mut().find(|t| t.target == target) {
                Some(task) if !task.is_terminal() => {
                    task.assigned_to = Some(assignee.to_string());
                    true
                }
                _ => false,
            }
        });
    }

    /// Apply a worker's completion packet
    pub fn apply(&self, packet: &CompletionPacket) -> Applied {
        match packet.status {
            CompletionStatus::Building => self.update(&packet.target_name, |task| {
                task.status = BuildStatus::Building;
            }),
            CompletionStatus::Complete => self.update(&packet.target_name, |task| {
                task.status = BuildStatus::Complete;
                task.build_time_ms = Some(packet.time);
                task.output_location = packet.output_directory.clone();
                task.completed_at = Some(Utc::now());
            }),
            CompletionStatus::Error => self.update(&packet.target_name, |task| {
                task.status = BuildStatus::Error;
                task.build_time_ms = Some(packet.time);
                task.error_message = Some(
                    packet
                        .message
                        .clone()
                        .unwrap_or_else(|| "build failed".to_string()),
                );
                task.completed_at = Some(Utc::now());
            }),
        }
    }

    pub fn complete(&self, target: &str, time_ms: i64, output: impl Into<String>) -> Applied {
        let output = output.into();
        self.update(target, |task| {
            task.status = BuildStatus::Complete;
            task.build_time_ms = Some(time_ms);
            task.output_location = Some(output);
            task.completed_at = Some(Utc::now());
        })
    }

    pub fn fail(&self, target: &str, message: impl Into<String>) -> Applied {
        let message = message.into();
        self.update(target, |task| {
            task.status = BuildStatus::Error;
            task.error_message = Some(message);
            task.completed_at = Some(Utc::now());
        })
    }

    /// Mark every unfinished task routed to `assignee` as failed.
    ///
    /// Returns the affected target names.
    pub fn fail_pending_assigned_to(&self, assignee: &str, message: &str) -> Vec<String> {
        self.fail_where(message, |task| task.assigned_to.as_deref() == Some(assignee))
    }

    fn fail_pending(&self, message: &str) -> Vec<String> {
        self.fail_where(message, |_| true)
    }

    fn fail_where(&self, message: &str, pred: impl Fn(&BuildTask) -> bool) -> Vec<String> {
        let mut failed = Vec::new();
        self.tasks.send_if_modified(|tasks| {
            for task in tasks.iter_mut().filter(|t| !t.is_terminal() && pred(t)) {
                task.status = BuildStatus::Error;
                task.error_message = Some(message.to_string());
                task.completed_at = Some(Utc::now());
                failed.push(task.target.clone());
            }
            !failed.is_empty()
        });
        failed
    }

    /// Terminal tasks never change again. Status-only `Building` updates on
    /// a task that already moved on are reported as duplicates too.
    fn update(&self, target: &str, change: impl FnOnce(&mut BuildTask)) -> Applied {
        let mut applied = Applied::Ignored;
        self.tasks.send_if_modified(|tasks| {
            let Some(task) = tasks.iter_mut().find(|t| t.target == target) else {
                return false;
            };
            if task.is_terminal() {
                applied = Applied::Duplicate;
                return false;
            }
            change(task);
            applied = Applied::Updated;
            true
        });

        match applied {
            Applied::Updated => debug!("Pipeline {} target {} updated", self.pipeline_id, target),
            Applied::Duplicate => {
                debug!("Pipeline {} target {} already finished", self.pipeline_id, target)
            }
            Applied::Ignored => {}
        }
        applied
    }

    /// Wait until every task is terminal.
    ///
    /// Fails with `BuildTargetFailed` if any task ended in error. On timeout
    /// the unfinished tasks are marked failed before `BuildTimedOut` is
    /// returned; on cancellation they are left as they are.
    pub async fn wait(&self, timeout: Duration, cancel: &CancellationToken) -> Result<Vec<BuildTask>> {
        let mut rx = self.tasks.subscribe();

        let finished = tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
            res = tokio::time::timeout(
                timeout,
                rx.wait_for(|tasks| tasks.iter().all(BuildTask::is_terminal)),
            ) => match res {
                Ok(Ok(tasks)) => tasks.clone(),
                // The sender lives in `self`, so it cannot be dropped while we wait
                Ok(Err(_)) => return Err(OrchestrationError::Cancelled),
                Err(_) => {
                    let pending = self.fail_pending("timed out waiting for worker");
                    warn!(
                        "Pipeline {} timed out waiting for {}",
                        self.pipeline_id,
                        pending.join(", ")
                    );
                    return Err(OrchestrationError::BuildTimedOut {
                        pending,
                        timeout_secs: timeout.as_secs(),
                    });
                }
            }
        };

        let failed: Vec<&BuildTask> = finished
            .iter()
            .filter(|t| t.status == BuildStatus::Error)
            .collect();
        if !failed.is_empty() {
            let message = failed
                .iter()
                .map(|t| {
                    format!(
                        "{}: {}",
                        t.target,
                        t.error_message.as_deref().unwrap_or("build failed")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(OrchestrationError::BuildTargetFailed {
                targets: failed.iter().map(|t| t.target.clone()).collect(),
                message,
            });
        }

        info!("Pipeline {}: all {} target(s) complete", self.pipeline_id, finished.len());
        Ok(finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tracker(targets: &[&str]) -> BuildTracker {
        let targets: Vec<String> = targets.iter().map(|s| s.to_string()).collect();
        BuildTracker::new(Uuid::new_v4(), &targets)
    }

    #[test]
    fn test_duplicate_completion_is_noop() {
        let pid = Uuid::new_v4();
        let t = tracker(&["LinuxBuild"]);
        let packet = CompletionPacket::complete(pid, "LinuxBuild", 1200, "/out/linux");

        assert_eq!(t.apply(&packet), Applied::Updated);
        let first = t.snapshot();
        assert_eq!(t.apply(&packet), Applied::Duplicate);
        assert_eq!(t.snapshot(), first);
    }

    #[test]
    fn test_error_after_complete_does_not_flip() {
        let pid = Uuid::new_v4();
        let t = tracker(&["LinuxBuild"]);
        t.apply(&CompletionPacket::complete(pid, "LinuxBuild", 1, "/out"));
        assert_eq!(
            t.apply(&CompletionPacket::error(pid, "LinuxBuild", 2, "late".into())),
            Applied::Duplicate
        );
        assert_eq!(t.snapshot()[0].status, BuildStatus::Complete);
    }

    #[test]
    fn test_foreign_target_is_ignored() {
        let pid = Uuid::new_v4();
        let t = tracker(&["LinuxBuild"]);
        assert_eq!(
            t.apply(&CompletionPacket::complete(pid, "WindowsBuild", 1, "/out")),
            Applied::Ignored
        );
        assert_eq!(t.snapshot()[0].status, BuildStatus::Queued);
    }

    #[test]
    fn test_building_is_informational() {
        let pid = Uuid::new_v4();
        let t = tracker(&["LinuxBuild"]);
        t.apply(&CompletionPacket::building(pid, "LinuxBuild"));
        let task = &t.snapshot()[0];
        assert_eq!(task.status, BuildStatus::Building);
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_fail_pending_assigned_to_only_touches_that_worker() {
        let t = tracker(&["A", "B", "C"]);
        t.assign("A", "w1");
        t.assign("B", "w2");
        t.assign("C", "w1");
        t.complete("C", 5, "/out/c");

        let failed = t.fail_pending_assigned_to("w1", "worker disconnected");
        assert_eq!(failed, vec!["A".to_string()]);

        let tasks = t.snapshot();
        assert_eq!(tasks[0].status, BuildStatus::Error);
        assert_eq!(tasks[1].status, BuildStatus::Queued);
        assert_eq!(tasks[2].status, BuildStatus::Complete);
    }

    #[tokio::test]
    async fn test_wait_resolves_when_all_complete() {
        let pid = Uuid::new_v4();
        let t = Arc::new(tracker(&["A", "B"]));
        let cancel = CancellationToken::new();

        let worker = t.clone();
        tokio::spawn(async move {
            worker.apply(&CompletionPacket::complete(pid, "B", 10, "/b"));
            tokio::time::sleep(Duration::from_millis(20)).await;
            worker.apply(&CompletionPacket::complete(pid, "A", 20, "/a"));
        });

        let tasks = t.wait(Duration::from_secs(5), &cancel).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == BuildStatus::Complete));
    }

    #[tokio::test]
    async fn test_wait_reports_failed_targets() {
        let pid = Uuid::new_v4();
        let t = tracker(&["AndroidBuild", "LinuxBuild"]);
        t.apply(&CompletionPacket::error(pid, "AndroidBuild", 3, "gradle exited 1".into()));
        t.apply(&CompletionPacket::complete(pid, "LinuxBuild", 3, "/out"));

        let err = t
            .wait(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            OrchestrationError::BuildTargetFailed { targets, message } => {
                assert_eq!(targets, vec!["AndroidBuild".to_string()]);
                assert!(message.contains("gradle exited 1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_and_marks_pending() {
        let pid = Uuid::new_v4();
        let t = tracker(&["A", "B"]);
        t.apply(&CompletionPacket::complete(pid, "A", 1, "/a"));

        let err = t
            .wait(Duration::from_millis(50), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestrationError::BuildTimedOut { ref pending, .. } if pending == &vec!["B".to_string()]
        ));
        assert_eq!(t.snapshot()[1].status, BuildStatus::Error);
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let t = tracker(&["A"]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = t.wait(Duration::from_secs(60), &cancel).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Cancelled));
    }
}
