use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::warn;

use crate::messages::DownstreamMessage;

/// Logical index a group of ingestors writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestorKind {
    Action,
    Delta,
    Block,
    Abi,
    Logs,
    Table(String),
}

impl IngestorKind {
    pub fn name(&self) -> String {
        match self {
            IngestorKind::Action => "action".to_string(),
            IngestorKind::Delta => "delta".to_string(),
            IngestorKind::Block => "block".to_string(),
            IngestorKind::Abi => "abi".to_string(),
            IngestorKind::Logs => "logs".to_string(),
            IngestorKind::Table(table) => format!("table-{}", table),
        }
    }
}

/// Role-specific portion of a worker assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerRole {
    Reader {
        first_block: u64,
        last_block: u64,
    },
    ContinuousReader {
        last_processed_block: u64,
    },
    Deserializer {
        queue: String,
        live_mode: bool,
    },
    Ingestor {
        queue: String,
        kind: IngestorKind,
    },
    Router,
    DsPoolWorker {
        local_id: u32,
    },
}

impl WorkerRole {
    pub fn kind_str(&self) -> &'static str {
        match self {
            WorkerRole::Reader { .. } => "reader",
            WorkerRole::ContinuousReader { .. } => "continuous_reader",
            WorkerRole::Deserializer { .. } => "deserializer",
            WorkerRole::Ingestor { .. } => "ingestor",
            WorkerRole::Router => "router",
            WorkerRole::DsPoolWorker { .. } => "ds_pool_worker",
        }
    }
}

/// Channel endpoint for sending messages to a spawned worker process.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<DownstreamMessage>,
}

impl WorkerHandle {
    pub fn new(tx: mpsc::UnboundedSender<DownstreamMessage>) -> Self {
        Self { tx }
    }

    pub fn send(&self, msg: DownstreamMessage) {
        if self.tx.send(msg).is_err() {
            warn!("Dropped message to a disconnected worker");
        }
    }
}

/// One worker assignment. The handle is attached after launch and cleared
/// when the process disconnects; ids are never reused within a run.
#[derive(Debug, Clone)]
pub struct WorkerDef {
    pub id: u64,
    pub role: WorkerRole,
    pub handle: Option<WorkerHandle>,
}

/// In-memory table of worker definitions with monotonic ids.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    next_id: u64,
    workers: Vec<WorkerDef>,
    // ds-pool local id -> worker id
    pool_index: HashMap<u32, u64>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            workers: Vec::new(),
            pool_index: HashMap::new(),
        }
    }

    /// Registers a new worker definition and returns its id.
    pub fn add(&mut self, role: WorkerRole) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if let WorkerRole::DsPoolWorker { local_id } = &role {
            self.pool_index.insert(*local_id, id);
        }
        self.workers.push(WorkerDef {
            id,
            role,
            handle: None,
        });
        id
    }

    pub fn all(&self) -> &[WorkerDef] {
        &self.workers
    }

    pub fn get(&self, id: u64) -> Option<&WorkerDef> {
        self.workers.iter().find(|w| w.id == id)
    }

    pub fn attach_handle(&mut self, id: u64, handle: WorkerHandle) {
        if let Some(worker) = self.workers.iter_mut().find(|w| w.id == id) {
            worker.handle = Some(handle);
        }
    }

    /// Drops the handle of a disconnected worker.
    pub fn mark_exited(&mut self, id: u64) {
        if let Some(worker) = self.workers.iter_mut().find(|w| w.id == id) {
            worker.handle = None;
        }
    }

    /// Number of workers with a live process behind them.
    pub fn live_count(&self) -> usize {
        self.workers.iter().filter(|w| w.handle.is_some()).count()
    }

    pub fn send(&self, id: u64, msg: DownstreamMessage) {
        if let Some(handle) = self.get(id).and_then(|w| w.handle.as_ref()) {
            handle.send(msg);
        }
    }

    /// Sends the same message to every live worker.
    pub fn broadcast(&self, msg: &DownstreamMessage) {
        for worker in &self.workers {
            if let Some(handle) = &worker.handle {
                handle.send(msg.clone());
            }
        }
    }

    /// Sends a message to every deserializer, optionally excluding one id.
    pub fn send_to_deserializers(&self, msg: &DownstreamMessage, except: Option<u64>) {
        for worker in &self.workers {
            if let WorkerRole::Deserializer { .. } = worker.role {
                if Some(worker.id) == except {
                    continue;
                }
                if let Some(handle) = &worker.handle {
                    handle.send(msg.clone());
                }
            }
        }
    }

    pub fn send_to_pool_worker(&self, local_id: u32, msg: DownstreamMessage) {
        if let Some(id) = self.pool_index.get(&local_id) {
            self.send(*id, msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let mut registry = WorkerRegistry::new();
        let a = registry.add(WorkerRole::Reader {
            first_block: 0,
            last_block: 100,
        });
        let b = registry.add(WorkerRole::Router);
        let c = registry.add(WorkerRole::DsPoolWorker { local_id: 0 });
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(registry.all().len(), 3);
    }

    #[test]
    fn test_pool_index_routes_by_local_id() {
        let mut registry = WorkerRegistry::new();
        registry.add(WorkerRole::Router);
        let pool_id = registry.add(WorkerRole::DsPoolWorker { local_id: 4 });

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.attach_handle(pool_id, WorkerHandle::new(tx));
        registry.send_to_pool_worker(
            4,
            DownstreamMessage::RemoveContract {
                contract: "eosio.token".to_string(),
            },
        );
        let received = rx.try_recv().unwrap();
        assert_eq!(
            received,
            DownstreamMessage::RemoveContract {
                contract: "eosio.token".to_string()
            }
        );
    }

    #[test]
    fn test_live_count_follows_handles() {
        let mut registry = WorkerRegistry::new();
        let id = registry.add(WorkerRole::Router);
        assert_eq!(registry.live_count(), 0);

        let (tx, _rx) = mpsc::unbounded_channel();
        registry.attach_handle(id, WorkerHandle::new(tx));
        assert_eq!(registry.live_count(), 1);

        registry.mark_exited(id);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_deserializer_fanout_excludes_sender() {
        let mut registry = WorkerRegistry::new();
        let a = registry.add(WorkerRole::Deserializer {
            queue: "wax:blocks:1".to_string(),
            live_mode: false,
        });
        let b = registry.add(WorkerRole::Deserializer {
            queue: "wax:blocks:2".to_string(),
            live_mode: false,
        });
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.attach_handle(a, WorkerHandle::new(tx_a));
        registry.attach_handle(b, WorkerHandle::new(tx_b));

        registry.send_to_deserializers(&DownstreamMessage::ConnectWs, Some(a));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
