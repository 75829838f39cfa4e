//! Channel-name based packet routing

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::channel::connection::Connection;
use crate::channel::packet::Packet;

/// Receives every packet arriving on one channel name.
///
/// Called from the connection's reader task; implementations must not block.
pub trait ChannelHandler: Send + Sync {
    fn on_packet(&self, from: &Connection, packet: Packet);
}

impl<F> ChannelHandler for F
where
    F: Fn(&Connection, Packet) + Send + Sync,
{
    fn on_packet(&self, from: &Connection, packet: Packet) {
        self(from, packet)
    }
}

/// Maps channel names to handlers. Built once, then shared by all connections.
#[derive(Default, Clone)]
pub struct Router {
    handlers: HashMap<String, Arc<dyn ChannelHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, channel: impl Into<String>, handler: impl ChannelHandler + 'static) -> Self {
        self.handlers.insert(channel.into(), Arc::new(handler));
        self
    }

    pub fn route_shared(mut self, channel: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Self {
        self.handlers.insert(channel.into(), handler);
        self
    }

    /// Deliver a packet to its channel's handler.
    ///
    /// Packets for unregistered channels are dropped with a warning; returns
    /// whether a handler received it.
    pub fn dispatch(&self, from: &Connection, packet: Packet) -> bool {
        match self.handlers.get(packet.channel()) {
            Some(handler) => {
                handler.on_packet(from, packet);
                true
            }
            None => {
                warn!(
                    "Dropping packet for unregistered channel '{}' from {}",
                    packet.channel(),
                    from.id()
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("channels", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
