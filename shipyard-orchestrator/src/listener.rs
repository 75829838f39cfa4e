//! Worker connection acceptance
//!
//! Every accepted socket must open with a handshake naming the worker and
//! its platform. Accepted workers are registered for the life of the
//! connection; on disconnect they are unregistered and their unfinished
//! targets fail.

use shipyard_core::channel::{ChannelError, ChannelHandler, Connection, FramedChannel, Packet, Router, names};
use shipyard_core::dto::worker::{Handshake, HandshakeAck};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatch::BuildDispatcher;
use crate::registry::WorkerRegistry;

#[derive(Clone)]
pub struct ChannelListener {
    registry: Arc<WorkerRegistry>,
    dispatcher: Arc<BuildDispatcher>,
    router: Arc<Router>,
    auth_token: Option<String>,
    handshake_timeout: Duration,
}

impl ChannelListener {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        dispatcher: Arc<BuildDispatcher>,
        auth_token: Option<String>,
        handshake_timeout: Duration,
    ) -> Self {
        let heartbeat_registry = registry.clone();
        let router = Router::new()
            .route_shared(names::BUILD_RUNNER, dispatcher.clone() as Arc<dyn ChannelHandler>)
            .route(names::HEARTBEAT, move |from: &Connection, _packet: Packet| {
                heartbeat_registry.touch(from.id());
            });

        Self {
            registry,
            dispatcher,
            router: Arc::new(router),
            auth_token,
            handshake_timeout,
        }
    }

    /// Accept worker connections until `shutdown` fires
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        info!(
            "Channel listener on {}",
            listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "unknown".to_string())
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let _ = stream.set_nodelay(true);
                        let this = self.clone();
                        tokio::spawn(async move {
                            this.handle(FramedChannel::new(stream, addr.to_string())).await;
                        });
                    }
                    Err(e) => error!("Failed to accept worker connection: {}", e),
                }
            }
        }

        info!("Channel listener stopped");
        for worker in self.registry.all() {
            worker.connection.close();
        }
    }

    /// Drive one connection from handshake to disconnect
    pub async fn handle<S>(&self, mut channel: FramedChannel<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer = channel.peer().to_string();
        let handshake = match self.read_handshake(&mut channel).await {
            Ok(handshake) => handshake,
            Err(reason) => {
                warn!("Rejecting connection from {}: {}", peer, reason);
                let ack = HandshakeAck {
                    accepted: false,
                    reason: Some(reason),
                };
                if let Ok(packet) = Packet::structured(names::HANDSHAKE, &ack) {
                    let _ = channel.send(packet).await;
                }
                return;
            }
        };

        let ack = HandshakeAck {
            accepted: true,
            reason: None,
        };
        let sent = match Packet::structured(names::HANDSHAKE, &ack) {
            Ok(packet) => channel.send(packet).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Lost worker {} during handshake: {}", handshake.worker_id, e);
            return;
        }

        // Reports for work sent on a replaced connection never arrive; fail it
        // before the new connection becomes routable.
        if let Some(previous) = self.registry.get(&handshake.worker_id) {
            warn!(
                "Worker {} reconnected from {}; dropping its previous connection",
                handshake.worker_id, peer
            );
            previous.connection.close();
            self.dispatcher.on_worker_disconnected(&handshake.worker_id);
        }

        let (connection, reader) = channel.into_connection(&handshake.worker_id, self.router.clone());
        self.registry
            .register(&handshake.worker_id, handshake.platform, connection.clone());

        if let Err(e) = reader.await {
            error!("Reader task for worker {} failed: {}", handshake.worker_id, e);
        }
        connection.close();

        if self.registry.unregister(&handshake.worker_id, &connection) {
            self.dispatcher.on_worker_disconnected(&handshake.worker_id);
        }
        debug!("Connection from {} finished", peer);
    }

    async fn read_handshake<S>(&self, channel: &mut FramedChannel<S>) -> Result<Handshake, String>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let packet = tokio::time::timeout(self.handshake_timeout, channel.recv())
            .await
            .map_err(|_| "handshake timed out".to_string())?
            .map_err(|e: ChannelError| e.to_string())?;

        if packet.channel() != names::HANDSHAKE {
            return Err(format!("expected handshake, got channel '{}'", packet.channel()));
        }
        let handshake: Handshake = packet.parse_json().map_err(|e| e.to_string())?;

        if let Some(expected) = &self.auth_token {
            if handshake.token.as_deref() != Some(expected.as_str()) {
                return Err(format!("invalid token from worker {}", handshake.worker_id));
            }
        }
        Ok(handshake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{BuildTracker, DispatchRequest};
    use shipyard_core::domain::worker::Platform;
    use tokio::io::DuplexStream;
    use uuid::Uuid;

    fn listener(token: Option<&str>) -> (ChannelListener, Arc<WorkerRegistry>) {
        let (listener, registry, _) = listener_with_dispatcher(token);
        (listener, registry)
    }

    fn listener_with_dispatcher(
        token: Option<&str>,
    ) -> (ChannelListener, Arc<WorkerRegistry>, Arc<BuildDispatcher>) {
        let registry = Arc::new(WorkerRegistry::new());
        let dispatcher = Arc::new(BuildDispatcher::new(registry.clone()));
        let listener = ChannelListener::new(
            registry.clone(),
            dispatcher.clone(),
            token.map(str::to_string),
            Duration::from_millis(200),
        );
        (listener, registry, dispatcher)
    }

    fn connect(listener: &ChannelListener) -> (FramedChannel<DuplexStream>, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let this = listener.clone();
        let task = tokio::spawn(async move {
            this.handle(FramedChannel::new(server, "test-worker")).await;
        });
        (FramedChannel::new(client, "coordinator"), task)
    }

    async fn handshake(worker: &mut FramedChannel<DuplexStream>, token: Option<&str>) -> HandshakeAck {
        let hello = Handshake {
            worker_id: "linux-1".into(),
            platform: Platform::Linux,
            token: token.map(str::to_string),
        };
        worker
            .send(Packet::structured(names::HANDSHAKE, &hello).unwrap())
            .await
            .unwrap();
        worker.recv().await.unwrap().parse_json().unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_handshake_registers_until_disconnect() {
        let (listener, registry) = listener(None);
        let (mut worker, task) = connect(&listener);

        assert!(handshake(&mut worker, None).await.accepted);
        eventually(|| registry.find(Platform::Linux).is_ok()).await;

        drop(worker);
        task.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_bad_token_is_rejected() {
        let (listener, registry) = listener(Some("secret"));
        let (mut worker, task) = connect(&listener);

        let ack = handshake(&mut worker, Some("wrong")).await;
        assert!(!ack.accepted);
        task.await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_good_token_is_accepted() {
        let (listener, registry) = listener(Some("secret"));
        let (mut worker, _task) = connect(&listener);

        assert!(handshake(&mut worker, Some("secret")).await.accepted);
        eventually(|| registry.len() == 1).await;
    }

    #[tokio::test]
    async fn test_silent_connection_times_out() {
        let (listener, registry) = listener(None);
        let (_worker, task) = connect(&listener);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_fails_work_sent_on_replaced_connection() {
        let (listener, registry, dispatcher) = listener_with_dispatcher(None);
        let (mut first, _first_task) = connect(&listener);
        assert!(handshake(&mut first, None).await.accepted);
        eventually(|| registry.len() == 1).await;

        let targets = vec!["LinuxBuild".to_string()];
        let tracker = Arc::new(BuildTracker::new(Uuid::new_v4(), &targets));
        let request = DispatchRequest {
            project_id: Uuid::new_v4(),
            git_url: "git@example.com:game.git".into(),
            branch: "main".into(),
            version: None,
            targets: vec![("LinuxBuild".into(), Platform::Linux)],
        };
        let _route = dispatcher.dispatch(&request, tracker.clone()).await.unwrap();
        assert_eq!(first.recv().await.unwrap().channel(), names::BUILD_RUNNER);

        // Same identity on a new socket while the old one is still open
        let (mut second, _second_task) = connect(&listener);
        assert!(handshake(&mut second, None).await.accepted);

        let err = tracker
            .wait(Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("LinuxBuild: worker disconnected"));

        eventually(|| registry.len() == 1 && registry.find(Platform::Linux).is_ok()).await;
    }

    #[tokio::test]
    async fn test_heartbeat_updates_last_seen() {
        let (listener, registry) = listener(None);
        let (mut worker, _task) = connect(&listener);
        handshake(&mut worker, None).await;
        eventually(|| registry.len() == 1).await;

        let before = registry.workers()[0].last_seen_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        worker.send(Packet::text(names::HEARTBEAT, "ping")).await.unwrap();
        eventually(|| registry.workers()[0].last_seen_at > before).await;
    }
}
