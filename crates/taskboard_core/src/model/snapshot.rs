//! Full-board snapshot exchanged with cloud providers.
//!
//! # Invariants
//! - A snapshot always carries complete collections (tombstones included);
//!   providers only ever overwrite it whole.
//! - Wire keys are camelCase: `tasks`, `notes`, `subtasks`, `nextTaskId`,
//!   `nextNoteId`, `nextSubtaskId`, and on envelopes `lastSync`, `deviceId`.

use crate::model::entity::EntityKind;
use crate::model::{Note, Subtask, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Next-id counters, one per entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdCounters {
    #[serde(default)]
    pub next_task_id: u64,
    #[serde(default)]
    pub next_note_id: u64,
    #[serde(default)]
    pub next_subtask_id: u64,
}

impl IdCounters {
    pub fn get(&self, kind: EntityKind) -> u64 {
        match kind {
            EntityKind::Task => self.next_task_id,
            EntityKind::Note => self.next_note_id,
            EntityKind::Subtask => self.next_subtask_id,
        }
    }

    pub fn set(&mut self, kind: EntityKind, value: u64) {
        match kind {
            EntityKind::Task => self.next_task_id = value,
            EntityKind::Note => self.next_note_id = value,
            EntityKind::Subtask => self.next_subtask_id = value,
        }
    }

    /// Per-kind maximum of both counter sets.
    pub fn max(self, other: IdCounters) -> IdCounters {
        IdCounters {
            next_task_id: self.next_task_id.max(other.next_task_id),
            next_note_id: self.next_note_id.max(other.next_note_id),
            next_subtask_id: self.next_subtask_id.max(other.next_subtask_id),
        }
    }

    /// Per-kind `self` unless it is zero, then `fallback`.
    pub fn or_fallback(self, fallback: IdCounters) -> IdCounters {
        let pick = |value: u64, fallback: u64| if value == 0 { fallback } else { value };
        IdCounters {
            next_task_id: pick(self.next_task_id, fallback.next_task_id),
            next_note_id: pick(self.next_note_id, fallback.next_note_id),
            next_subtask_id: pick(self.next_subtask_id, fallback.next_subtask_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(flatten)]
    pub counters: IdCounters,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.notes.is_empty() && self.subtasks.is_empty()
    }
}

/// Snapshot as stored by a provider, stamped with writer and write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "EnvelopeWire", into = "EnvelopeWire")]
pub struct SyncEnvelope {
    pub snapshot: Snapshot,
    pub last_sync: DateTime<Utc>,
    pub device_id: String,
}

impl SyncEnvelope {
    pub fn stamp(snapshot: Snapshot, last_sync: DateTime<Utc>, device_id: impl Into<String>) -> Self {
        Self {
            snapshot,
            last_sync,
            device_id: device_id.into(),
        }
    }
}

// Collections sit at the top level of the wire object. Flattening the whole
// `Snapshot` would route records through serde's buffered content, which
// cannot carry 128-bit ids.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeWire {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    notes: Vec<Note>,
    #[serde(default)]
    subtasks: Vec<Subtask>,
    #[serde(flatten)]
    counters: IdCounters,
    last_sync: DateTime<Utc>,
    device_id: String,
}

impl From<EnvelopeWire> for SyncEnvelope {
    fn from(wire: EnvelopeWire) -> Self {
        Self {
            snapshot: Snapshot {
                tasks: wire.tasks,
                notes: wire.notes,
                subtasks: wire.subtasks,
                counters: wire.counters,
            },
            last_sync: wire.last_sync,
            device_id: wire.device_id,
        }
    }
}

impl From<SyncEnvelope> for EnvelopeWire {
    fn from(envelope: SyncEnvelope) -> Self {
        let Snapshot {
            tasks,
            notes,
            subtasks,
            counters,
        } = envelope.snapshot;
        Self {
            tasks,
            notes,
            subtasks,
            counters,
            last_sync: envelope.last_sync,
            device_id: envelope.device_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IdCounters, SyncEnvelope};
    use chrono::{TimeZone, Utc};

    #[test]
    fn envelope_uses_camel_case_wire_keys() {
        let mut envelope = SyncEnvelope::stamp(
            Default::default(),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            "device-a",
        );
        envelope.snapshot.counters.next_task_id = 7;

        let value = serde_json::to_value(&envelope).expect("envelope should serialize");
        assert_eq!(value["nextTaskId"], 7);
        assert_eq!(value["deviceId"], "device-a");
        assert_eq!(value["lastSync"], "2024-01-02T03:04:05Z");
        assert!(value["tasks"].as_array().expect("tasks array").is_empty());
    }

    #[test]
    fn missing_counters_default_to_zero() {
        let envelope: SyncEnvelope = serde_json::from_str(
            r#"{"tasks":[],"lastSync":"2024-01-02T03:04:05Z","deviceId":"d"}"#,
        )
        .expect("envelope without counters should parse");
        assert_eq!(envelope.snapshot.counters, IdCounters::default());
    }
}
