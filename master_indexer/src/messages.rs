use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Producer list attached to a schedule change.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NewProducers {
    pub producers: Vec<String>,
}

/// Messages sent upstream by worker processes.
///
/// The wire format is a JSON object tagged by its `event` field. Events the
/// controller does not know about deserialize into [`WorkerEvent::Unknown`]
/// through [`parse_worker_event`] and are ignored (monitoring records are
/// recognized and logged at debug).
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    ConsumedBlock {
        #[serde(default)]
        live: bool,
        block_num: u64,
        #[serde(default)]
        producer: Option<String>,
    },
    InitAbi {
        data: Value,
    },
    RouterReady,
    SaveAbi {
        #[serde(default)]
        live_mode: bool,
        #[serde(default)]
        worker_id: Option<u64>,
        data: Value,
    },
    Completed {
        id: u64,
    },
    AddIndex {
        size: u64,
    },
    DsReport {
        actions: u64,
        deltas: u64,
    },
    DsError {
        data: Value,
    },
    ReadBlock {
        #[serde(default)]
        live: bool,
    },
    NewSchedule {
        #[serde(default)]
        live: bool,
        block_num: u64,
        new_producers: NewProducers,
    },
    DsReady,
    ContractUsageReport {
        total_hits: u64,
        data: BTreeMap<String, u64>,
    },
    #[serde(skip)]
    Unknown(Value),
}

/// Parses a raw worker message, falling back to `Unknown` for any payload
/// that does not match a known event.
pub fn parse_worker_event(value: Value) -> WorkerEvent {
    match serde_json::from_value::<WorkerEvent>(value.clone()) {
        Ok(event) => event,
        Err(_) => WorkerEvent::Unknown(value),
    }
}

/// Returns true when an unknown record is an opaque monitoring report.
pub fn is_monitor_record(value: &Value) -> bool {
    value["type"].as_str() == Some("axm:monitor")
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockRangeData {
    pub first_block: u64,
    pub last_block: u64,
}

/// Messages sent downstream from the controller to worker processes.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DownstreamMessage {
    InitializeAbi { data: Value },
    ConnectWs,
    UpdateAbi { abi: Value },
    NewRange { target: u64, data: BlockRangeData },
    RemoveContract { contract: String },
    UpdatePoolMap { data: Value },
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_consumed_block() {
        let event = parse_worker_event(json!({
            "event": "consumed_block",
            "live": true,
            "block_num": 1234,
            "producer": "alice"
        }));
        assert_eq!(
            event,
            WorkerEvent::ConsumedBlock {
                live: true,
                block_num: 1234,
                producer: Some("alice".to_string())
            }
        );
    }

    #[test]
    fn test_parse_defaults_live_to_false() {
        let event = parse_worker_event(json!({ "event": "read_block" }));
        assert_eq!(event, WorkerEvent::ReadBlock { live: false });
    }

    #[test]
    fn test_parse_contract_usage_report() {
        let event = parse_worker_event(json!({
            "event": "contract_usage_report",
            "total_hits": 100,
            "data": { "eosio.token": 70, "atomicassets": 30 }
        }));
        match event {
            WorkerEvent::ContractUsageReport { total_hits, data } => {
                assert_eq!(total_hits, 100);
                assert_eq!(data["eosio.token"], 70);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_preserved() {
        let raw = json!({ "event": "telemetry_blip", "data": 1 });
        let event = parse_worker_event(raw.clone());
        assert_eq!(event, WorkerEvent::Unknown(raw));
    }

    #[test]
    fn test_monitor_record_detection() {
        let raw = json!({ "type": "axm:monitor", "data": { "cpu": { "value": 0.5 } } });
        assert!(is_monitor_record(&raw));
        assert!(!is_monitor_record(&json!({ "event": "other" })));
    }

    #[test]
    fn test_downstream_serialization() {
        let msg = DownstreamMessage::NewRange {
            target: 3,
            data: BlockRangeData {
                first_block: 100,
                last_block: 200,
            },
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "new_range");
        assert_eq!(value["target"], 3);
        assert_eq!(value["data"]["first_block"], 100);

        let stop = serde_json::to_value(&DownstreamMessage::Stop).unwrap();
        assert_eq!(stop["event"], "stop");
    }
}
