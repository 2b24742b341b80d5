use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Per-contract usage accounting. `assigned_workers` holds ds-pool local
/// ids in fill order.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UsageEntry {
    pub current_hits: u64,
    pub last_share: f64,
    pub assigned_workers: Vec<u32>,
}

/// Result of one rebalance pass. Removals must be delivered to the affected
/// pool workers; the snapshot is broadcast to deserializers afterwards.
#[derive(Debug, Clone)]
pub struct RebalanceOutcome {
    pub removals: Vec<(u32, String)>,
    pub assignments: Vec<(u32, String)>,
    pub worker_shares: Vec<f64>,
    pub snapshot: Value,
}

/// Reassigns ds-pool workers to contracts in proportion to observed hit
/// shares, with a hard per-worker cap of `1 / pool_size`.
///
/// Contracts are iterated in key order, so stable workloads keep stable
/// worker assignments and the broadcast only ever carries real changes.
#[derive(Debug)]
pub struct ContractUsageBalancer {
    pool_size: u32,
    total_contract_hits: u64,
    usage_map: BTreeMap<String, UsageEntry>,
}

impl ContractUsageBalancer {
    pub fn new(pool_size: u32) -> Self {
        Self {
            pool_size,
            total_contract_hits: 0,
            usage_map: BTreeMap::new(),
        }
    }

    pub fn total_contract_hits(&self) -> u64 {
        self.total_contract_hits
    }

    pub fn usage(&self, contract: &str) -> Option<&UsageEntry> {
        self.usage_map.get(contract)
    }

    /// Folds one `contract_usage_report` into the cumulative counters.
    pub fn record_usage(&mut self, total_hits: u64, data: &BTreeMap<String, u64>) {
        self.total_contract_hits += total_hits;
        for (contract, hits) in data {
            self.usage_map
                .entry(contract.clone())
                .or_default()
                .current_hits += hits;
        }
    }

    /// Runs one greedy rebalance pass over all observed contracts.
    ///
    /// Returns `None` when nothing has been observed yet (no broadcast).
    pub fn tick(&mut self) -> Option<RebalanceOutcome> {
        if self.total_contract_hits == 0 || self.usage_map.is_empty() || self.pool_size == 0 {
            return None;
        }

        let cap = 1.0 / self.pool_size as f64;
        let mut worker_shares = vec![0.0_f64; self.pool_size as usize];
        let mut removals = Vec::new();
        let mut assignments = Vec::new();

        for (contract, entry) in self.usage_map.iter_mut() {
            let share = entry.current_hits as f64 / self.total_contract_hits as f64;

            let mut proposed: Vec<u32> = Vec::new();
            let mut used = 0.0_f64;
            for i in 0..self.pool_size as usize {
                if used >= share {
                    break;
                }
                if worker_shares[i] >= cap {
                    continue;
                }
                let rem = share - used;
                let avail = cap - worker_shares[i];
                let delta = rem.min(avail);
                worker_shares[i] += delta;
                used += delta;
                proposed.push(i as u32);
            }

            for worker in &entry.assigned_workers {
                if !proposed.contains(worker) {
                    removals.push((*worker, contract.clone()));
                }
            }
            for worker in &proposed {
                if !entry.assigned_workers.contains(worker) {
                    assignments.push((*worker, contract.clone()));
                }
            }

            entry.assigned_workers = proposed;
            entry.last_share = share;
        }

        let snapshot = serde_json::to_value(&self.usage_map).unwrap_or(Value::Null);
        Some(RebalanceOutcome {
            removals,
            assignments,
            worker_shares,
            snapshot,
        })
    }
}
