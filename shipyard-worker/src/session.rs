//! Coordinator connection
//!
//! Connects over the Framed Channel, performs the handshake, then serves
//! dispatches and sends heartbeats until the connection drops. The outer
//! loop reconnects with exponential backoff.

use anyhow::{Context, Result};
use shipyard_core::channel::{Connection, FramedChannel, Packet, Router, names};
use shipyard_core::dto::build::DispatchPacket;
use shipyard_core::dto::worker::{Handshake, HandshakeAck};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::executor::BuildExecutor;

const INITIAL_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Session {
    config: Config,
    executor: Arc<BuildExecutor>,
}

impl Session {
    pub fn new(config: Config, executor: Arc<BuildExecutor>) -> Self {
        Self { config, executor }
    }

    /// Stay connected until `shutdown` fires, reconnecting with backoff
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut attempt: u32 = 0;
        let mut delay_ms = INITIAL_DELAY_MS;

        loop {
            attempt += 1;

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                outcome = self.connect_once(&shutdown) => outcome,
            };

            match outcome {
                Ok(()) => {
                    if shutdown.is_cancelled() {
                        return Ok(());
                    }
                    info!("Disconnected from coordinator, reconnecting");
                    attempt = 0;
                    delay_ms = INITIAL_DELAY_MS;
                }
                Err(e) => {
                    warn!(
                        "Failed to connect to coordinator at {} (attempt {}): {:#}",
                        self.config.coordinator_addr, attempt, e
                    );
                    warn!("Retrying in {} ms...", delay_ms);

                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                    }

                    // Exponential backoff with cap
                    delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
                }
            }
        }
    }

    async fn connect_once(&self, shutdown: &CancellationToken) -> Result<()> {
        let stream = TcpStream::connect(&self.config.coordinator_addr)
            .await
            .context("connect failed")?;
        let _ = stream.set_nodelay(true);

        let mut channel = FramedChannel::new(stream, self.config.coordinator_addr.clone());
        self.handshake(&mut channel).await?;
        info!(
            "Connected to coordinator at {} as {} ({})",
            self.config.coordinator_addr, self.config.worker_id, self.config.platform
        );

        self.serve(channel, shutdown).await;
        Ok(())
    }

    pub(crate) async fn handshake<S>(&self, channel: &mut FramedChannel<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let hello = Handshake {
            worker_id: self.config.worker_id.clone(),
            platform: self.config.platform,
            token: self.config.auth_token.clone(),
        };
        channel.send(Packet::structured(names::HANDSHAKE, &hello)?).await?;

        let reply = tokio::time::timeout(HANDSHAKE_TIMEOUT, channel.recv())
            .await
            .context("handshake timed out")??;
        let ack: HandshakeAck = reply.parse_json()?;
        if !ack.accepted {
            anyhow::bail!(
                "handshake rejected: {}",
                ack.reason.unwrap_or_else(|| "no reason given".to_string())
            );
        }
        Ok(())
    }

    /// Serve one established connection until it closes
    pub(crate) async fn serve<S>(&self, channel: FramedChannel<S>, shutdown: &CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = tokio::sync::mpsc::unbounded_channel::<DispatchPacket>();

        let router = Router::new()
            .route(names::BUILD_RUNNER, move |from: &Connection, packet: Packet| {
                match packet.parse_json::<DispatchPacket>() {
                    Ok(dispatch) => {
                        let _ = jobs_tx.send(dispatch);
                    }
                    Err(e) => warn!("Malformed dispatch from {}: {}", from.peer(), e),
                }
            })
            .route(names::CONTROL, |_: &Connection, packet: Packet| {
                match packet.as_text() {
                    Ok("shutdown") => info!("Coordinator is shutting down"),
                    Ok(other) => debug!("Ignoring control message '{}'", other),
                    Err(e) => warn!("Malformed control message: {}", e),
                }
            });

        let (connection, reader) =
            channel.into_connection(self.config.worker_id.clone(), Arc::new(router));
        let jobs = self.executor.clone().run_queue(jobs_rx, connection.clone());
        let heartbeat = tokio::spawn(heartbeat_loop(
            connection.clone(),
            self.config.heartbeat_interval,
        ));

        tokio::select! {
            _ = reader => {}
            _ = shutdown.cancelled() => connection.close(),
        }

        connection.close();
        heartbeat.abort();
        // A build in progress keeps running; its report is dropped
        jobs.abort();
    }
}

async fn heartbeat_loop(connection: Connection, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = connection.closed() => break,
            _ = ticker.tick() => {
                if let Err(e) = connection.send_text(names::HEARTBEAT, "ping").await {
                    debug!("Heartbeat failed: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::FakeHost;
    use shipyard_core::domain::worker::Platform;
    use shipyard_core::dto::build::{CompletionPacket, CompletionStatus};
    use tokio::io::DuplexStream;
    use uuid::Uuid;

    fn session(dir: &std::path::Path) -> Session {
        let config = Config {
            worker_id: "linux-1".into(),
            platform: Platform::Linux,
            auth_token: Some("secret".into()),
            heartbeat_interval: Duration::from_millis(20),
            workspace_root: dir.to_path_buf(),
            ..Config::default()
        };
        let executor = Arc::new(BuildExecutor::new(Arc::new(FakeHost::default()), dir));
        Session::new(config, executor)
    }

    fn pair() -> (FramedChannel<DuplexStream>, FramedChannel<DuplexStream>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        (FramedChannel::new(a, "coordinator"), FramedChannel::new(b, "worker"))
    }

    async fn accept(coordinator: &mut FramedChannel<DuplexStream>, accepted: bool) -> Handshake {
        let hello: Handshake = coordinator.recv().await.unwrap().parse_json().unwrap();
        let ack = HandshakeAck {
            accepted,
            reason: (!accepted).then(|| "invalid token".to_string()),
        };
        coordinator
            .send(Packet::structured(names::HANDSHAKE, &ack).unwrap())
            .await
            .unwrap();
        hello
    }

    #[tokio::test]
    async fn test_handshake_presents_identity() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let (mut worker_side, mut coordinator) = pair();

        let coord = tokio::spawn(async move { accept(&mut coordinator, true).await });
        session.handshake(&mut worker_side).await.unwrap();

        let hello = coord.await.unwrap();
        assert_eq!(hello.worker_id, "linux-1");
        assert_eq!(hello.platform, Platform::Linux);
        assert_eq!(hello.token.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_rejected_handshake_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let (mut worker_side, mut coordinator) = pair();

        tokio::spawn(async move { accept(&mut coordinator, false).await });
        let err = session.handshake(&mut worker_side).await.unwrap_err();
        assert!(err.to_string().contains("invalid token"));
    }

    #[tokio::test]
    async fn test_serves_dispatch_and_heartbeats() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(session(dir.path()));
        let (worker_side, mut coordinator) = pair();
        let shutdown = CancellationToken::new();

        let serving = {
            let session = session.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { session.serve(worker_side, &shutdown).await })
        };

        let project_id = Uuid::new_v4();
        let dispatch = DispatchPacket {
            project_id,
            targets: vec!["LinuxBuild".into()],
            git_url: "git@example.com:game.git".into(),
            branch: "main".into(),
            version: None,
        };
        coordinator
            .send(Packet::structured(names::BUILD_RUNNER, &dispatch).unwrap())
            .await
            .unwrap();

        let mut saw_heartbeat = false;
        let mut statuses = Vec::new();
        while statuses.len() < 2 {
            let packet = coordinator.recv().await.unwrap();
            match packet.channel() {
                names::HEARTBEAT => saw_heartbeat = true,
                names::BUILD_RUNNER => {
                    let completion: CompletionPacket = packet.parse_json().unwrap();
                    assert_eq!(completion.project_id, Some(project_id));
                    statuses.push(completion.status);
                }
                other => panic!("unexpected channel {other}"),
            }
        }
        assert_eq!(statuses, vec![CompletionStatus::Building, CompletionStatus::Complete]);

        // First tick fires immediately, so a heartbeat has been queued by now
        while !saw_heartbeat {
            saw_heartbeat = coordinator.recv().await.unwrap().channel() == names::HEARTBEAT;
        }

        shutdown.cancel();
        serving.await.unwrap();
    }
}
