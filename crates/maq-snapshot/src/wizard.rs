use crate::SnapshotError;
use std::collections::BTreeMap;

/// Roster offered when selecting who records the handover. Free-text names
/// are accepted too; the roster is convenience data, not an ACL.
pub const OPERATOR_ROSTER: [&str; 4] = ["Leonel", "Jairo", "Fredy", "Supervisión"];

/// Operator identity whose handovers record observations only, never
/// machine states. A policy carve-out, not a validation gap.
pub const OBSERVATIONS_ONLY_OPERATOR: &str = "Supervisión";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WizardState {
    #[default]
    SelectOperator,
    EditLog,
    Confirm,
}

impl WizardState {
    pub fn as_str(self) -> &'static str {
        match self {
            WizardState::SelectOperator => "select_operator",
            WizardState::EditLog => "edit_log",
            WizardState::Confirm => "confirm",
        }
    }
}

/// Everything a confirmed handover carries besides the board itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoverDraft {
    pub operator: String,
    pub reviewed: BTreeMap<String, String>,
    pub observations: Option<String>,
}

impl HandoverDraft {
    pub fn observations_only(&self) -> bool {
        self.operator == OBSERVATIONS_ONLY_OPERATOR
    }
}

/// The multi-step handover entry flow as an explicit state machine:
/// SelectOperator → EditLog → Confirm. Driven by data, independent of any
/// rendering; invalid transitions are errors, never panics.
#[derive(Debug, Default)]
pub struct HandoverWizard {
    state: WizardState,
    draft: HandoverDraft,
}

impl HandoverWizard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WizardState {
        self.state
    }

    pub fn draft(&self) -> &HandoverDraft {
        &self.draft
    }

    pub fn select_operator(&mut self, name: &str) -> Result<(), SnapshotError> {
        self.expect(WizardState::SelectOperator, "select_operator")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SnapshotError::EmptyOperator);
        }
        self.draft.operator = name.to_string();
        self.state = WizardState::EditLog;
        Ok(())
    }

    /// Adds one "reviewed today" note for a machine. Independent of the
    /// live board: the operator can log a machine that is producing again.
    pub fn add_log_entry(&mut self, machine_id: &str, note: &str) -> Result<(), SnapshotError> {
        self.expect(WizardState::EditLog, "add_log_entry")?;
        self.draft
            .reviewed
            .insert(machine_id.to_string(), note.to_string());
        Ok(())
    }

    pub fn set_observations(&mut self, text: &str) -> Result<(), SnapshotError> {
        self.expect(WizardState::EditLog, "set_observations")?;
        let text = text.trim();
        self.draft.observations = if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
        Ok(())
    }

    /// Moves from editing to the confirmation step.
    pub fn review(&mut self) -> Result<(), SnapshotError> {
        self.expect(WizardState::EditLog, "review")?;
        self.state = WizardState::Confirm;
        Ok(())
    }

    /// Steps back one state without losing entered data.
    pub fn back(&mut self) -> Result<(), SnapshotError> {
        match self.state {
            WizardState::EditLog => {
                self.state = WizardState::SelectOperator;
                Ok(())
            }
            WizardState::Confirm => {
                self.state = WizardState::EditLog;
                Ok(())
            }
            WizardState::SelectOperator => Err(SnapshotError::InvalidTransition {
                action: "back",
                state: WizardState::SelectOperator.as_str(),
            }),
        }
    }

    pub fn confirm(self) -> Result<HandoverDraft, SnapshotError> {
        match self.state {
            WizardState::Confirm => Ok(self.draft),
            state => Err(SnapshotError::InvalidTransition {
                action: "confirm",
                state: state.as_str(),
            }),
        }
    }

    fn expect(&self, expected: WizardState, action: &'static str) -> Result<(), SnapshotError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SnapshotError::InvalidTransition {
                action,
                state: self.state.as_str(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_wizard_starts_at_operator_selection() {
        let wizard = HandoverWizard::default();
        assert_eq!(wizard.state(), WizardState::SelectOperator);
        assert!(wizard.draft().operator.is_empty());

        let mut wizard = wizard;
        wizard.select_operator("Leonel").expect("select");
        assert_eq!(wizard.state(), WizardState::EditLog);
    }

    #[test]
    fn walks_the_happy_path() {
        let mut wizard = HandoverWizard::new();
        wizard.select_operator("Leonel").expect("select");
        wizard.add_log_entry("S1", "aguja cambiada turno 2").expect("log");
        wizard.set_observations("turno sin novedades").expect("obs");
        wizard.review().expect("review");
        let draft = wizard.confirm().expect("confirm");
        assert_eq!(draft.operator, "Leonel");
        assert_eq!(draft.reviewed.len(), 1);
        assert_eq!(draft.observations.as_deref(), Some("turno sin novedades"));
        assert!(!draft.observations_only());
    }

    #[test]
    fn rejects_out_of_order_operations() {
        let mut wizard = HandoverWizard::new();
        assert!(matches!(
            wizard.add_log_entry("S1", "nota"),
            Err(SnapshotError::InvalidTransition { .. })
        ));
        wizard.select_operator("Jairo").expect("select");
        assert!(matches!(
            wizard.select_operator("Fredy"),
            Err(SnapshotError::InvalidTransition { .. })
        ));

        let wizard = HandoverWizard::new();
        assert!(matches!(
            wizard.confirm(),
            Err(SnapshotError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn empty_operator_is_rejected() {
        let mut wizard = HandoverWizard::new();
        assert!(matches!(
            wizard.select_operator("   "),
            Err(SnapshotError::EmptyOperator)
        ));
        assert_eq!(wizard.state(), WizardState::SelectOperator);
    }

    #[test]
    fn back_preserves_entered_data() {
        let mut wizard = HandoverWizard::new();
        wizard.select_operator("Fredy").expect("select");
        wizard.add_log_entry("S3", "limpieza general").expect("log");
        wizard.review().expect("review");
        wizard.back().expect("back to edit");
        wizard.back().expect("back to operator");
        assert_eq!(wizard.state(), WizardState::SelectOperator);
        assert_eq!(wizard.draft().reviewed.len(), 1);
        assert!(wizard.back().is_err());
    }

    #[test]
    fn supervision_flags_observations_only() {
        let mut wizard = HandoverWizard::new();
        wizard.select_operator(OBSERVATIONS_ONLY_OPERATOR).expect("select");
        wizard.set_observations("revisión de planta").expect("obs");
        wizard.review().expect("review");
        let draft = wizard.confirm().expect("confirm");
        assert!(draft.observations_only());
    }
}
