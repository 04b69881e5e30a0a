use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod sanitize;

pub use sanitize::strip_nulls;

/// Sentinel reason label whose selection enables free-text input.
pub const OTHER_REASON: &str = "Otros";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("unknown category code {0}")]
    UnknownCategoryCode(u8),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
    #[error("category {category} has no reason at index {index}")]
    ReasonOutOfRange {
        category: MachineCategory,
        index: usize,
    },
    #[error("category {0} takes no reason")]
    ReasonNotAllowed(MachineCategory),
    #[error("free-text reason requires the '{OTHER_REASON}' reason to be selected")]
    TextWithoutOther,
}

/// Top-level classification of a machine's state. The numeric codes are the
/// ones the deployed board stored, so documents written by older clients
/// keep their meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MachineCategory {
    Mechanical,
    Barring,
    Electronic,
    Producing,
    Tracking,
    SizeChange,
}

impl MachineCategory {
    pub const ALL: [MachineCategory; 6] = [
        MachineCategory::Mechanical,
        MachineCategory::Barring,
        MachineCategory::Electronic,
        MachineCategory::Producing,
        MachineCategory::Tracking,
        MachineCategory::SizeChange,
    ];

    pub fn code(self) -> u8 {
        match self {
            MachineCategory::Mechanical => 1,
            MachineCategory::Barring => 2,
            MachineCategory::Electronic => 3,
            MachineCategory::Producing => 4,
            MachineCategory::Tracking => 5,
            MachineCategory::SizeChange => 6,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, ModelError> {
        match code {
            1 => Ok(MachineCategory::Mechanical),
            2 => Ok(MachineCategory::Barring),
            3 => Ok(MachineCategory::Electronic),
            4 => Ok(MachineCategory::Producing),
            5 => Ok(MachineCategory::Tracking),
            6 => Ok(MachineCategory::SizeChange),
            other => Err(ModelError::UnknownCategoryCode(other)),
        }
    }

    /// Display label as it appears on the board.
    pub fn label(self) -> &'static str {
        match self {
            MachineCategory::Mechanical => "Mecánico",
            MachineCategory::Barring => "Barrado",
            MachineCategory::Electronic => "Electrónico",
            MachineCategory::Producing => "Producción",
            MachineCategory::Tracking => "Seguimiento",
            MachineCategory::SizeChange => "Cambio de talla",
        }
    }

    /// Asset name of the icon shown for this category. Cached into every
    /// written status so old snapshots keep rendering if the set changes.
    pub fn icon_ref(self) -> &'static str {
        match self {
            MachineCategory::Mechanical => "cpdrojo.png",
            MachineCategory::Barring => "cpdnegro.png",
            MachineCategory::Electronic => "cpdamarillo.png",
            MachineCategory::Producing => "cpdblanco.png",
            MachineCategory::Tracking => "cpdverde.png",
            MachineCategory::SizeChange => "cpdazul.png",
        }
    }

    /// Fixed sub-reason list for this category. Index positions are part of
    /// the stored format; the Tracking list is the union the deployed board
    /// used, duplicate "Motores MPP" included.
    pub fn reasons(self) -> &'static [&'static str] {
        match self {
            MachineCategory::Mechanical => &[
                "Transferencia",
                "Vanizado",
                "Reviente LC",
                "Succion",
                "Reviente L180",
                "Huecos y rotos",
                "Aguja",
                "Selectores",
                "Motores MPP",
                "Cuchillas",
                "Otros",
            ],
            MachineCategory::Barring => &["Materia prima", "Motores"],
            MachineCategory::Electronic => &[
                "Valvulas",
                "Motores MPP",
                "No enciende",
                "Turbina",
                "Motor principal",
                "Paros",
                "Sin programa",
                "Fusible",
                "Otros",
            ],
            MachineCategory::Producing => &[],
            MachineCategory::Tracking => &[
                "Transferencia",
                "Vanizado",
                "Reviente LC",
                "Succion",
                "Reviente L180",
                "Huecos y rotos",
                "Aguja",
                "Selectores",
                "Motores MPP",
                "Cuchillas",
                "Valvulas",
                "Motores MPP",
                "No enciende",
                "Turbina",
                "Motor principal",
                "Paros",
                "Sin programa",
                "Fusible",
                "Materia prima",
                "Motores",
                "Otros",
            ],
            MachineCategory::SizeChange => &[],
        }
    }

    pub fn reason_at(self, index: usize) -> Option<&'static str> {
        self.reasons().get(index).copied()
    }

    pub fn is_other_reason(self, index: usize) -> bool {
        self.reason_at(index) == Some(OTHER_REASON)
    }
}

impl From<MachineCategory> for u8 {
    fn from(category: MachineCategory) -> u8 {
        category.code()
    }
}

impl TryFrom<u8> for MachineCategory {
    type Error = ModelError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        MachineCategory::from_code(code)
    }
}

impl fmt::Display for MachineCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MachineCategory {
    type Err = ModelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        if let Ok(code) = normalized.parse::<u8>() {
            return MachineCategory::from_code(code);
        }
        match normalized.as_str() {
            "mecanico" | "mecánico" | "mechanical" => Ok(MachineCategory::Mechanical),
            "barrado" | "barring" => Ok(MachineCategory::Barring),
            "electronico" | "electrónico" | "electronic" => Ok(MachineCategory::Electronic),
            "produccion" | "producción" | "producing" => Ok(MachineCategory::Producing),
            "seguimiento" | "tracking" => Ok(MachineCategory::Tracking),
            "cambio de talla" | "talla" | "size-change" | "size_change" => {
                Ok(MachineCategory::SizeChange)
            }
            other => Err(ModelError::UnknownCategory(other.to_string())),
        }
    }
}

/// Status of one machine on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    pub category: MachineCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_text: Option<String>,
    pub icon_ref: String,
}

impl MachineStatus {
    /// Builds a status, enforcing the model invariants: Producing carries no
    /// reason, reason indexes must exist in the category's list, and free
    /// text is only valid on the "Otros" sentinel.
    pub fn new(
        category: MachineCategory,
        reason_index: Option<usize>,
        reason_text: Option<String>,
    ) -> Result<Self, ModelError> {
        if let Some(index) = reason_index {
            if category.reasons().is_empty() {
                return Err(ModelError::ReasonNotAllowed(category));
            }
            if category.reason_at(index).is_none() {
                return Err(ModelError::ReasonOutOfRange { category, index });
            }
        }
        let reason_text = reason_text.filter(|text| !text.trim().is_empty());
        if reason_text.is_some() {
            let selected_other = reason_index
                .map(|index| category.is_other_reason(index))
                .unwrap_or(false);
            if !selected_other {
                return Err(ModelError::TextWithoutOther);
            }
        }
        Ok(Self {
            category,
            reason_index,
            reason_text,
            icon_ref: category.icon_ref().to_string(),
        })
    }

    pub fn producing() -> Self {
        Self {
            category: MachineCategory::Producing,
            reason_index: None,
            reason_text: None,
            icon_ref: MachineCategory::Producing.icon_ref().to_string(),
        }
    }

    pub fn is_producing(&self) -> bool {
        self.category == MachineCategory::Producing
    }
}

impl Default for MachineStatus {
    fn default() -> Self {
        Self::producing()
    }
}

/// Resolves a status to its display text. Used by both the live board and
/// snapshot serialization so the two can never disagree.
pub fn resolve_label(
    category: MachineCategory,
    reason_index: Option<usize>,
    reason_text: Option<&str>,
) -> String {
    let reason = reason_index.and_then(|index| category.reason_at(index));
    match reason {
        None => category.label().to_string(),
        Some(OTHER_REASON) => {
            let text = reason_text
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .unwrap_or(OTHER_REASON);
            format!("{} - {}", category.label(), text)
        }
        Some(label) => format!("{} - {}", category.label(), label),
    }
}

/// The in-memory board: machine id to status. Absence of a key means the
/// machine was never set and reads as Producing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    #[serde(flatten)]
    machines: BTreeMap<String, MachineStatus>,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, machine_id: impl Into<String>, status: MachineStatus) {
        self.machines.insert(machine_id.into(), status);
    }

    pub fn get(&self, machine_id: &str) -> Option<&MachineStatus> {
        self.machines.get(machine_id)
    }

    pub fn status_or_default(&self, machine_id: &str) -> MachineStatus {
        self.machines
            .get(machine_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Wholesale replacement from a remote document snapshot.
    pub fn replace_all(&mut self, other: BoardState) {
        self.machines = other.machines;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MachineStatus)> {
        self.machines.iter()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }

    /// Best-effort parse of a stored document. Entries that fail to parse
    /// are dropped instead of failing the whole board; a non-object payload
    /// yields an empty board.
    pub fn from_value(value: &Value) -> Self {
        let mut board = BoardState::new();
        let Some(entries) = value.as_object() else {
            return board;
        };
        for (machine_id, entry) in entries {
            match serde_json::from_value::<MachineStatus>(entry.clone()) {
                Ok(status) => board.set(machine_id.clone(), status),
                Err(_) => continue,
            }
        }
        board
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_codes_round_trip() {
        for category in MachineCategory::ALL {
            assert_eq!(
                MachineCategory::from_code(category.code()).unwrap(),
                category
            );
        }
        assert!(MachineCategory::from_code(0).is_err());
        assert!(MachineCategory::from_code(7).is_err());
    }

    #[test]
    fn producing_takes_no_reason() {
        let err = MachineStatus::new(MachineCategory::Producing, Some(0), None);
        assert!(matches!(err, Err(ModelError::ReasonNotAllowed(_))));
        let status = MachineStatus::new(MachineCategory::Producing, None, None).unwrap();
        assert!(status.is_producing());
        assert_eq!(status.icon_ref, "cpdblanco.png");
    }

    #[test]
    fn reason_index_must_exist() {
        let err = MachineStatus::new(MachineCategory::Barring, Some(5), None);
        assert!(matches!(err, Err(ModelError::ReasonOutOfRange { .. })));
    }

    #[test]
    fn free_text_requires_other_sentinel() {
        // "Selectores" is index 7 in the mechanical list, not "Otros".
        let err = MachineStatus::new(
            MachineCategory::Mechanical,
            Some(7),
            Some("detalle".to_string()),
        );
        assert!(matches!(err, Err(ModelError::TextWithoutOther)));

        let other_index = MachineCategory::Mechanical
            .reasons()
            .iter()
            .position(|label| *label == OTHER_REASON)
            .unwrap();
        let status = MachineStatus::new(
            MachineCategory::Mechanical,
            Some(other_index),
            Some("rotura de plato".to_string()),
        )
        .unwrap();
        assert_eq!(status.reason_text.as_deref(), Some("rotura de plato"));
    }

    #[test]
    fn resolve_label_selects_display_text() {
        assert_eq!(
            resolve_label(MachineCategory::Mechanical, Some(7), None),
            "Mecánico - Selectores"
        );
        assert_eq!(
            resolve_label(MachineCategory::Mechanical, Some(9), None),
            "Mecánico - Cuchillas"
        );
        assert_eq!(
            resolve_label(MachineCategory::Producing, None, None),
            "Producción"
        );
        assert_eq!(
            resolve_label(MachineCategory::Mechanical, Some(10), Some("eje roto")),
            "Mecánico - eje roto"
        );
        // Out-of-range index degrades to the category label.
        assert_eq!(
            resolve_label(MachineCategory::Barring, Some(99), None),
            "Barrado"
        );
    }

    #[test]
    fn board_document_round_trip() {
        let mut board = BoardState::new();
        board.set(
            "S1",
            MachineStatus::new(MachineCategory::Mechanical, Some(7), None).unwrap(),
        );
        board.set("S2", MachineStatus::producing());

        let value = board.to_value();
        let parsed = BoardState::from_value(&value);
        assert_eq!(parsed, board);
    }

    #[test]
    fn malformed_entries_are_dropped_not_fatal() {
        let value = serde_json::json!({
            "S1": { "category": 1, "iconRef": "cpdrojo.png" },
            "S2": { "category": 99, "iconRef": "x.png" },
            "S3": "garbage"
        });
        let board = BoardState::from_value(&value);
        assert_eq!(board.len(), 1);
        assert!(board.get("S1").is_some());

        assert!(BoardState::from_value(&Value::Null).is_empty());
        assert!(BoardState::from_value(&serde_json::json!([1, 2])).is_empty());
    }

    #[test]
    fn absent_machine_reads_as_producing() {
        let board = BoardState::new();
        assert!(board.status_or_default("S4").is_producing());
    }
}
