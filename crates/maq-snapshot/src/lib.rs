use chrono::{DateTime, Local, NaiveDateTime};
use maq_core::{BoardState, MachineStatus, OTHER_REASON};
use maq_storage::{HANDOVER_DOC_PREFIX, SNAPSHOT_DOC_PREFIX};
use maq_sync::RemoteDocument;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod wizard;

pub use wizard::{
    HandoverDraft, HandoverWizard, WizardState, OBSERVATIONS_ONLY_OPERATOR, OPERATOR_ROSTER,
};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid wizard transition: {action} while in {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error("operator name must not be empty")]
    EmptyOperator,
}

/// One machine in a recorded snapshot: display text, not enum codes, so
/// the record stays readable if the label set is ever reworded. The icon
/// reference is the one cached when the status was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub category_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_label: Option<String>,
    pub icon_ref: String,
}

impl SnapshotEntry {
    fn from_status(status: &MachineStatus) -> Self {
        let reason_label = status
            .reason_index
            .and_then(|index| status.category.reason_at(index))
            .map(|label| {
                if label == OTHER_REASON {
                    status
                        .reason_text
                        .clone()
                        .unwrap_or_else(|| OTHER_REASON.to_string())
                } else {
                    label.to_string()
                }
            });
        Self {
            category_label: status.category.label().to_string(),
            reason_label,
            icon_ref: status.icon_ref.clone(),
        }
    }
}

/// Operator metadata written next to a snapshot under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoverRecord {
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reviewed: BTreeMap<String, String>,
    pub recorded_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOutcome {
    pub key: String,
    pub machines_recorded: usize,
    pub observations_only: bool,
}

/// Sortable key from local wall-clock time, one-second resolution.
/// Lexicographic order equals chronological order.
pub fn snapshot_key(now: DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Short display form of a snapshot key: `dd/mm/yy hh:mm`. Returns `None`
/// for keys that do not parse, rather than failing a listing over one bad
/// record.
pub fn display_date(key: &str) -> Option<String> {
    NaiveDateTime::parse_from_str(key, "%Y%m%d_%H%M%S")
        .ok()
        .map(|parsed| parsed.format("%d/%m/%y %H:%M").to_string())
}

/// Captures the current board plus operator annotations into two related
/// immutable records sharing one timestamp key. Records are never edited;
/// a correction is a new snapshot under a new key.
pub struct SnapshotRecorder<R: RemoteDocument> {
    remote: Arc<R>,
}

impl<R: RemoteDocument> SnapshotRecorder<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self { remote }
    }

    pub fn record(
        &self,
        board: &BoardState,
        draft: &HandoverDraft,
        now: DateTime<Local>,
    ) -> SnapshotOutcome {
        let key = snapshot_key(now);
        let observations_only = draft.observations_only();

        let mut machines_recorded = 0;
        if !observations_only {
            // Only exceptions are worth logging; producing machines are the
            // default and stay out of the record.
            let entries: BTreeMap<&String, SnapshotEntry> = board
                .iter()
                .filter(|(_, status)| !status.is_producing())
                .map(|(machine_id, status)| (machine_id, SnapshotEntry::from_status(status)))
                .collect();
            machines_recorded = entries.len();
            let body = serde_json::to_value(&entries).unwrap_or(Value::Null);
            self.remote
                .write(&format!("{SNAPSHOT_DOC_PREFIX}{key}"), body);
        }

        let record = HandoverRecord {
            operator: draft.operator.clone(),
            observations: draft.observations.clone(),
            reviewed: draft.reviewed.clone(),
            recorded_at: now.to_rfc3339(),
        };
        let body = serde_json::to_value(&record).unwrap_or(Value::Null);
        self.remote
            .write(&format!("{HANDOVER_DOC_PREFIX}{key}"), body);

        info!(
            event = "snapshot_recorded",
            key = %key,
            machines = machines_recorded,
            observations_only = observations_only
        );
        SnapshotOutcome {
            key,
            machines_recorded,
            observations_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use maq_core::MachineCategory;
    use maq_sync::MemoryRemote;

    fn at(hour: u32, min: u32, sec: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, 14, hour, min, sec)
            .single()
            .expect("valid timestamp")
    }

    fn draft(operator: &str) -> HandoverDraft {
        HandoverDraft {
            operator: operator.to_string(),
            reviewed: BTreeMap::new(),
            observations: Some("cambio de turno".to_string()),
        }
    }

    #[test]
    fn keys_are_distinct_and_increase_with_time() {
        let first = snapshot_key(at(6, 59, 59));
        let second = snapshot_key(at(7, 0, 0));
        let third = snapshot_key(at(19, 0, 0));
        assert_eq!(first, "20260314_065959");
        assert!(first < second && second < third);
    }

    #[test]
    fn display_date_round_trips_a_key() {
        assert_eq!(
            display_date("20260314_190001").as_deref(),
            Some("14/03/26 19:00")
        );
        assert!(display_date("not-a-key").is_none());
    }

    #[test]
    fn producing_machines_are_filtered_out() {
        let remote = Arc::new(MemoryRemote::new());
        let recorder = SnapshotRecorder::new(remote.clone());

        let cuchillas = MachineCategory::Mechanical
            .reasons()
            .iter()
            .position(|label| *label == "Cuchillas")
            .unwrap();
        let mut board = BoardState::new();
        board.set("S1", MachineStatus::producing());
        board.set(
            "S2",
            MachineStatus::new(MachineCategory::Mechanical, Some(cuchillas), None).unwrap(),
        );

        let outcome = recorder.record(&board, &draft("Leonel"), at(19, 0, 0));
        assert_eq!(outcome.machines_recorded, 1);

        let snapshot = remote
            .document(&format!("snapshots/{}", outcome.key))
            .expect("snapshot written");
        assert!(snapshot.get("S1").is_none());
        let entry = snapshot.get("S2").expect("exception recorded");
        assert_eq!(entry.get("categoryLabel"), Some(&serde_json::json!("Mecánico")));
        assert_eq!(entry.get("reasonLabel"), Some(&serde_json::json!("Cuchillas")));
    }

    #[test]
    fn other_reason_records_the_free_text() {
        let remote = Arc::new(MemoryRemote::new());
        let recorder = SnapshotRecorder::new(remote.clone());

        let otros = MachineCategory::Electronic
            .reasons()
            .iter()
            .position(|label| *label == OTHER_REASON)
            .unwrap();
        let mut board = BoardState::new();
        board.set(
            "S7",
            MachineStatus::new(
                MachineCategory::Electronic,
                Some(otros),
                Some("tarjeta quemada".to_string()),
            )
            .unwrap(),
        );

        let outcome = recorder.record(&board, &draft("Jairo"), at(7, 0, 0));
        let snapshot = remote
            .document(&format!("snapshots/{}", outcome.key))
            .expect("snapshot written");
        assert_eq!(
            snapshot["S7"]["reasonLabel"],
            serde_json::json!("tarjeta quemada")
        );
    }

    #[test]
    fn observations_only_operator_skips_machine_states() {
        let remote = Arc::new(MemoryRemote::new());
        let recorder = SnapshotRecorder::new(remote.clone());

        let mut board = BoardState::new();
        board.set(
            "S2",
            MachineStatus::new(MachineCategory::Barring, Some(0), None).unwrap(),
        );

        let outcome = recorder.record(
            &board,
            &draft(OBSERVATIONS_ONLY_OPERATOR),
            at(12, 30, 0),
        );
        assert!(outcome.observations_only);
        assert_eq!(outcome.machines_recorded, 0);
        assert!(remote
            .document(&format!("snapshots/{}", outcome.key))
            .is_none());

        let handover = remote
            .document(&format!("handover/{}", outcome.key))
            .expect("handover written");
        assert_eq!(handover["operator"], serde_json::json!("Supervisión"));
        assert_eq!(handover["observations"], serde_json::json!("cambio de turno"));
    }

    #[test]
    fn both_records_share_the_key() {
        let remote = Arc::new(MemoryRemote::new());
        let recorder = SnapshotRecorder::new(remote.clone());

        let mut board = BoardState::new();
        board.set(
            "S5",
            MachineStatus::new(MachineCategory::Tracking, Some(0), None).unwrap(),
        );
        let mut handover = draft("Fredy");
        handover
            .reviewed
            .insert("S5".to_string(), "revisada en turno 1".to_string());

        let outcome = recorder.record(&board, &handover, at(19, 0, 1));
        let writes = remote.writes();
        let paths: Vec<_> = writes.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                format!("snapshots/{}", outcome.key).as_str(),
                format!("handover/{}", outcome.key).as_str(),
            ]
        );
    }
}
