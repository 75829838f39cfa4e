//! Worker Registry
//!
//! Process-wide table of connected build workers. Mutated only when workers
//! connect or disconnect; read concurrently by every pipeline. The lock is
//! never held across an await.

use chrono::Utc;
use shipyard_core::channel::{Connection, Packet};
use shipyard_core::domain::worker::{Platform, Worker, WorkerStatus};
use std::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{OrchestrationError, Result};

/// Routing view of one registered worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub id: String,
    pub platform: Platform,
    pub connection: Connection,
}

#[derive(Debug)]
struct Entry {
    info: Worker,
    connection: Connection,
}

impl Entry {
    fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            id: self.info.id.clone(),
            platform: self.info.platform,
            connection: self.connection.clone(),
        }
    }

    fn is_live(&self) -> bool {
        !self.connection.is_closed()
    }
}

/// Registration order is preserved so lookups are deterministic
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker, or replace the entry with the same id in place.
    ///
    /// A replaced entry's old connection is closed.
    pub fn register(&self, id: &str, platform: Platform, connection: Connection) -> Worker {
        let now = Utc::now();
        let info = Worker {
            id: id.to_string(),
            platform,
            address: connection.peer().to_string(),
            connected_at: now,
            last_seen_at: now,
            status: WorkerStatus::Online,
        };

        let mut entries = self.write();
        let entry = Entry {
            info: info.clone(),
            connection,
        };

        match entries.iter_mut().find(|e| e.info.id == id) {
            Some(existing) => {
                warn!("Worker {} re-registered, replacing previous connection", id);
                let previous = std::mem::replace(existing, entry);
                previous.connection.close();
            }
            None => entries.push(entry),
        }

        info!("Worker registered: {} ({})", id, platform);
        info
    }

    /// Remove a worker if `connection` is still the one registered for it.
    ///
    /// A stale disconnect after a re-registration leaves the new entry alone.
    pub fn unregister(&self, id: &str, connection: &Connection) -> bool {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| !(e.info.id == id && e.connection.same_as(connection)));
        let removed = entries.len() != before;

        if removed {
            info!("Worker unregistered: {}", id);
        }
        removed
    }

    /// First live worker with exactly this platform. Never waits.
    pub fn find(&self, platform: Platform) -> Result<WorkerHandle> {
        self.read()
            .iter()
            .find(|e| e.info.platform == platform && e.is_live())
            .map(Entry::handle)
            .ok_or(OrchestrationError::NoWorkerAvailable(platform))
    }

    pub fn get(&self, id: &str) -> Option<WorkerHandle> {
        self.read().iter().find(|e| e.info.id == id).map(Entry::handle)
    }

    /// Snapshot of all live workers; safe to iterate while others register
    pub fn all(&self) -> Vec<WorkerHandle> {
        self.read()
            .iter()
            .filter(|e| e.is_live())
            .map(Entry::handle)
            .collect()
    }

    /// Snapshot of worker records for display
    pub fn workers(&self) -> Vec<Worker> {
        self.read()
            .iter()
            .map(|e| {
                let mut info = e.info.clone();
                if !e.is_live() {
                    info.status = WorkerStatus::Offline;
                }
                info
            })
            .collect()
    }

    /// Record liveness for a worker
    pub fn touch(&self, id: &str) {
        if let Some(entry) = self.write().iter_mut().find(|e| e.info.id == id) {
            entry.info.last_seen_at = Utc::now();
            debug!("Heartbeat from worker {}", id);
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send a packet to every live worker; returns how many accepted it
    pub async fn broadcast(&self, packet: Packet) -> usize {
        let mut delivered = 0;
        for worker in self.all() {
            match worker.connection.send(packet.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Broadcast to worker {} failed: {}", worker.id, e),
            }
        }
        delivered
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
