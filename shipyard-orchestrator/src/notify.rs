//! Notification
//!
//! Posts a pipeline outcome summary to the project's hooks. Delivery
//! failures are logged and never change the pipeline's outcome.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};
use shipyard_core::domain::deploy::DeployOutcome;
use shipyard_core::domain::pipeline::{Pipeline, PipelineStage};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const SUCCESS_COLOR: u32 = 0x2ECC71;
const FAILURE_COLOR: u32 = 0xE74C3C;

/// Payload style understood by a hook endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Discord,
    Slack,
    Generic,
}

/// A configured webhook
#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    pub kind: HookKind,
    pub url: String,
    /// Overrides the default "<project> <version>" title
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("hook returned status {0}")]
    Status(u16),
}

/// Human-readable outcome summary
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub title: String,
    pub body: String,
    pub success: bool,
}

impl PipelineReport {
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        let success = pipeline.failure.is_none() && pipeline.stage != PipelineStage::Cancelled;
        let version = pipeline.version.as_deref().unwrap_or("unversioned");
        let title = format!("{} {}", pipeline.project_name, version);

        let mut body = String::new();
        match &pipeline.failure {
            Some(failure) => {
                body.push_str(&format!(
                    "Pipeline failed at stage {}: {}\n",
                    failure.stage, failure.reason
                ));
            }
            None if pipeline.stage == PipelineStage::Cancelled => {
                body.push_str("Pipeline cancelled\n");
            }
            None => body.push_str("Pipeline succeeded\n"),
        }
        body.push_str(&format!("Targets: {}\n", pipeline.targets.join(", ")));

        let t = &pipeline.timings;
        body.push_str(&format!(
            "Timings: prebuild {}, build {}, deploy {}, hooks {}, total {}\n",
            fmt_ms(t.prebuild_ms),
            fmt_ms(t.build_ms),
            fmt_ms(t.deploy_ms),
            fmt_ms(t.hooks_ms),
            fmt_ms(t.total_ms()),
        ));

        if !pipeline.deploys.is_empty() {
            body.push_str("Deploys:\n");
            for record in &pipeline.deploys {
                let outcome = match &record.outcome {
                    DeployOutcome::Success => "ok".to_string(),
                    DeployOutcome::Skipped => "skipped".to_string(),
                    DeployOutcome::Failure(reason) => format!("FAILED ({})", reason),
                };
                body.push_str(&format!("- {} [{}]: {}\n", record.target, record.kind, outcome));
            }
        }

        if !pipeline.changelog.is_empty() {
            body.push_str("Changelog:\n");
            for line in &pipeline.changelog {
                body.push_str(&format!("- {}\n", line));
            }
        }

        Self {
            title,
            body: body.trim_end().to_string(),
            success,
        }
    }

    pub fn color(&self) -> u32 {
        if self.success { SUCCESS_COLOR } else { FAILURE_COLOR }
    }

    /// JSON body for the given hook style
    pub fn payload(&self, kind: HookKind, title: Option<&str>) -> Value {
        let title = title.unwrap_or(&self.title);
        match kind {
            HookKind::Discord => json!({
                "embeds": [{
                    "title": title,
                    "description": self.body,
                    "color": self.color(),
                }]
            }),
            HookKind::Slack => {
                let marker = if self.success { ":white_check_mark:" } else { ":x:" };
                json!({ "text": format!("{} *{}*\n{}", marker, title, self.body) })
            }
            HookKind::Generic => json!({
                "title": title,
                "body": self.body,
                "success": self.success,
            }),
        }
    }
}

fn fmt_ms(ms: u64) -> String {
    if ms >= 60_000 {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Transport for hook payloads
#[async_trait]
pub trait HookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &Value) -> Result<(), HookError>;
}

pub struct HttpHookSender {
    client: reqwest::Client,
}

impl HttpHookSender {
    pub fn new(timeout: Duration) -> Result<Self, HookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HookSender for HttpHookSender {
    async fn send(&self, url: &str, payload: &Value) -> Result<(), HookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(HookError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Notifier {
    sender: Arc<dyn HookSender>,
}

impl Notifier {
    pub fn new(sender: Arc<dyn HookSender>) -> Self {
        Self { sender }
    }

    /// Deliver the report to every hook concurrently; returns how many
    /// succeeded
    pub async fn notify(&self, hooks: &[HookConfig], report: &PipelineReport) -> usize {
        let deliveries = hooks.iter().map(|hook| async move {
            let payload = report.payload(hook.kind, hook.title.as_deref());
            match self.sender.send(&hook.url, &payload).await {
                Ok(()) => {
                    debug!("Delivered notification to {}", hook.url);
                    true
                }
                Err(e) => {
                    warn!("Hook delivery to {} failed: {}", hook.url, e);
                    false
                }
            }
        });

        join_all(deliveries)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shipyard_core::domain::deploy::{DeployKind, DeployRecord};
    use shipyard_core::domain::pipeline::PipelineFailure;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records payloads; URLs containing "down" fail
    #[derive(Default)]
    pub(crate) struct RecordingSender {
        pub sent: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl HookSender for RecordingSender {
        async fn send(&self, url: &str, payload: &Value) -> Result<(), HookError> {
            if url.contains("down") {
                return Err(HookError::Status(503));
            }
            self.sent
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
            Ok(())
        }
    }

    fn hook(kind: HookKind, url: &str) -> HookConfig {
        HookConfig {
            kind,
            url: url.to_string(),
            title: None,
        }
    }

    fn finished_pipeline() -> Pipeline {
        let mut p = Pipeline::new(Uuid::new_v4(), "game", vec!["LinuxBuild".into()]);
        p.version = Some("1.2.4".into());
        p.changelog = vec!["Fix crash on load".into()];
        p.timings.build_ms = 95_000;
        p.deploys = vec![
            DeployRecord {
                target: "steam".into(),
                kind: DeployKind::Store,
                outcome: DeployOutcome::Success,
                duration_ms: 10,
            },
            DeployRecord {
                target: "cdn".into(),
                kind: DeployKind::Bucket,
                outcome: DeployOutcome::Failure("403".into()),
                duration_ms: 5,
            },
        ];
        p
    }

    #[test]
    fn test_report_lists_every_deploy_outcome() {
        let report = PipelineReport::from_pipeline(&finished_pipeline());
        assert!(report.success);
        assert_eq!(report.title, "game 1.2.4");
        assert!(report.body.contains("- steam [store]: ok"));
        assert!(report.body.contains("- cdn [bucket]: FAILED (403)"));
        assert!(report.body.contains("build 1m35s"));
        assert!(report.body.contains("- Fix crash on load"));
    }

    #[test]
    fn test_failure_report_names_stage() {
        let mut p = finished_pipeline();
        p.failure = Some(PipelineFailure {
            stage: PipelineStage::Building,
            reason: "AndroidBuild: gradle exited 1".into(),
        });
        let report = PipelineReport::from_pipeline(&p);
        assert!(!report.success);
        assert!(report.body.starts_with("Pipeline failed at stage Building"));
        assert_eq!(report.payload(HookKind::Discord, None)["embeds"][0]["color"], FAILURE_COLOR);
    }

    #[test]
    fn test_payload_styles() {
        let report = PipelineReport {
            title: "game 1.0.0".into(),
            body: "ok".into(),
            success: true,
        };
        assert_eq!(report.payload(HookKind::Generic, Some("custom"))["title"], "custom");
        assert!(report.payload(HookKind::Slack, None)["text"]
            .as_str()
            .unwrap()
            .contains("*game 1.0.0*"));
        assert_eq!(report.payload(HookKind::Discord, None)["embeds"][0]["color"], SUCCESS_COLOR);
    }

    #[tokio::test]
    async fn test_failed_hook_does_not_block_others() {
        let sender = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(sender.clone());
        let hooks = vec![
            hook(HookKind::Discord, "http://down.example/hook"),
            hook(HookKind::Generic, "http://up.example/hook"),
        ];

        let report = PipelineReport::from_pipeline(&finished_pipeline());
        assert_eq!(notifier.notify(&hooks, &report).await, 1);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "http://up.example/hook");
    }

    #[test]
    fn test_cancelled_report() {
        let mut p = Pipeline::new(Uuid::new_v4(), "game", vec!["LinuxBuild".into()]);
        p.version = Some("1.2.4".into());
        p.advance(PipelineStage::Cancelled).unwrap();

        let report = PipelineReport::from_pipeline(&p);
        assert!(!report.success);
        assert!(report.body.starts_with("Pipeline cancelled"));
        assert_eq!(report.payload(HookKind::Generic, None)["success"], false);
        assert_eq!(report.payload(HookKind::Discord, None)["embeds"][0]["color"], FAILURE_COLOR);
    }

    /// Hooks whose URL contains "slow" take two seconds to answer
    #[derive(Default)]
    struct SlowSender {
        finished: Mutex<Vec<(String, Duration)>>,
        started: Mutex<Option<std::time::Instant>>,
    }

    #[async_trait]
    impl HookSender for SlowSender {
        async fn send(&self, url: &str, _payload: &Value) -> Result<(), HookError> {
            let started = *self
                .started
                .lock()
                .unwrap()
                .get_or_insert_with(std::time::Instant::now);
            if url.contains("slow") {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            self.finished
                .lock()
                .unwrap()
                .push((url.to_string(), started.elapsed()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_hook_does_not_delay_others() {
        let sender = Arc::new(SlowSender::default());
        let notifier = Notifier::new(sender.clone());
        let hooks = vec![
            hook(HookKind::Discord, "http://slow.example/hook"),
            hook(HookKind::Slack, "http://fast.example/hook"),
        ];

        let report = PipelineReport::from_pipeline(&finished_pipeline());
        assert_eq!(notifier.notify(&hooks, &report).await, 2);

        let finished = sender.finished.lock().unwrap();
        assert_eq!(finished[0].0, "http://fast.example/hook");
        assert!(finished[0].1 < Duration::from_secs(1));
        assert_eq!(finished[1].0, "http://slow.example/hook");
    }
}
