//! Conversation phase state machine.
//!
//! The phase only moves along a fixed set of edges:
//!
//! ```text
//! intake ──► clarification ──► generation ──► revision ─┐
//!   ▲              │                              ▲     │
//!   └──────────────┘                              └─────┘
//! ```
//!
//! [`next_phase`] is a pure function of the current phase, a view of the
//! session, and what the last tool reported. It moves at most one edge per
//! call so no phase is ever skipped.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Intake,
    Clarification,
    Generation,
    Revision,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Intake => "intake",
            Phase::Clarification => "clarification",
            Phase::Generation => "generation",
            Phase::Revision => "revision",
        }
    }

    /// Whether `self → to` is an allowed edge. Staying put is not an edge
    /// except for `revision → revision`.
    pub fn can_transition_to(self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Intake, Phase::Clarification)
                | (Phase::Clarification, Phase::Intake)
                | (Phase::Clarification, Phase::Generation)
                | (Phase::Generation, Phase::Revision)
                | (Phase::Revision, Phase::Revision)
        )
    }

    /// Phases in which document sections may be generated or revised.
    pub fn allows_drafting(self) -> bool {
        matches!(self, Phase::Generation | Phase::Revision)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of a `validate_completeness` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Complete, ready, no validation errors, nothing missing.
    Ready,
    /// Anything else: missing or contradictory fields were reported.
    NotReady,
}

/// The parts of a session the phase machine looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseView {
    pub document_type_set: bool,
    pub missing_fields_empty: bool,
    /// `current_document` holds every configured section.
    pub document_complete: bool,
}

impl PhaseView {
    fn facts_complete(&self) -> bool {
        self.document_type_set && self.missing_fields_empty
    }
}

/// Compute the phase after one dispatched tool call.
pub fn next_phase(current: Phase, view: PhaseView, confirmation: Option<Confirmation>) -> Phase {
    match current {
        Phase::Intake if view.facts_complete() => Phase::Clarification,
        Phase::Intake => Phase::Intake,
        Phase::Clarification if !view.facts_complete() => Phase::Intake,
        Phase::Clarification => match confirmation {
            Some(Confirmation::Ready) => Phase::Generation,
            Some(Confirmation::NotReady) => Phase::Intake,
            None => Phase::Clarification,
        },
        Phase::Generation if view.document_complete => Phase::Revision,
        Phase::Generation => Phase::Generation,
        Phase::Revision => Phase::Revision,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::session::{DocumentType, Session};
    use proptest::prelude::*;

    fn view(document_type_set: bool, missing_fields_empty: bool, document_complete: bool) -> PhaseView {
        PhaseView {
            document_type_set,
            missing_fields_empty,
            document_complete,
        }
    }

    #[test]
    fn test_intake_needs_type_and_facts() {
        assert_eq!(next_phase(Phase::Intake, view(false, true, false), None), Phase::Intake);
        assert_eq!(next_phase(Phase::Intake, view(true, false, false), None), Phase::Intake);
        assert_eq!(
            next_phase(Phase::Intake, view(true, true, false), None),
            Phase::Clarification
        );
    }

    #[test]
    fn test_confirmation_in_intake_only_reaches_clarification() {
        assert_eq!(
            next_phase(Phase::Intake, view(true, true, false), Some(Confirmation::Ready)),
            Phase::Clarification
        );
    }

    #[test]
    fn test_clarification_edges() {
        let complete = view(true, true, false);
        assert_eq!(next_phase(Phase::Clarification, complete, None), Phase::Clarification);
        assert_eq!(
            next_phase(Phase::Clarification, complete, Some(Confirmation::Ready)),
            Phase::Generation
        );
        assert_eq!(
            next_phase(Phase::Clarification, complete, Some(Confirmation::NotReady)),
            Phase::Intake
        );
        assert_eq!(
            next_phase(Phase::Clarification, view(true, false, false), Some(Confirmation::Ready)),
            Phase::Intake
        );
    }

    #[test]
    fn test_generation_and_revision() {
        assert_eq!(next_phase(Phase::Generation, view(true, true, false), None), Phase::Generation);
        assert_eq!(next_phase(Phase::Generation, view(true, true, true), None), Phase::Revision);
        assert_eq!(
            next_phase(Phase::Revision, view(true, false, false), Some(Confirmation::NotReady)),
            Phase::Revision
        );
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Phase::Clarification).unwrap(), r#""clarification""#);
        assert!(!Phase::Intake.can_transition_to(Phase::Generation));
        assert!(!Phase::Revision.can_transition_to(Phase::Intake));
    }

    /// One observable effect of a dispatched tool.
    #[derive(Debug, Clone)]
    enum Step {
        SetType(u8),
        SetField(u8),
        ClearField(u8),
        Confirm(bool),
        WriteAllSections,
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u8..4).prop_map(Step::SetType),
            (0u8..10).prop_map(Step::SetField),
            (0u8..10).prop_map(Step::ClearField),
            any::<bool>().prop_map(Step::Confirm),
            Just(Step::WriteAllSections),
        ]
    }

    fn document_type(n: u8) -> DocumentType {
        match n {
            0 => DocumentType::Nda,
            1 => DocumentType::Employment,
            2 => DocumentType::Service,
            _ => DocumentType::Lease,
        }
    }

    proptest! {
        #[test]
        fn test_only_enumerated_edges_are_observable(steps in prop::collection::vec(step_strategy(), 1..60)) {
            let mut session = Session::new("prop", 50);
            for step in steps {
                let mut confirmation = None;
                match step {
                    Step::SetType(n) => {
                        if !session.phase().allows_drafting() {
                            session.set_document_type(document_type(n));
                        }
                    }
                    Step::SetField(i) => {
                        let required = session.required_fields();
                        if let Some(field) = required.get(i as usize % required.len().max(1)) {
                            session.set_field(*field, "value");
                        }
                    }
                    Step::ClearField(i) => {
                        let required = session.required_fields();
                        if let Some(field) = required.get(i as usize % required.len().max(1)) {
                            session.set_field(*field, "");
                        }
                    }
                    Step::Confirm(ok) => {
                        confirmation = Some(if ok { Confirmation::Ready } else { Confirmation::NotReady });
                    }
                    Step::WriteAllSections => {
                        if session.phase().allows_drafting() {
                            if let Some(dt) = session.document_type() {
                                for section in crate::agent_core::sections::section_order(dt) {
                                    session.set_section(section, "text");
                                }
                            }
                        }
                    }
                }
                prop_assert!(session.check_invariant());

                let before = session.phase();
                let after = next_phase(before, session.phase_view(), confirmation);
                prop_assert!(
                    before == after || before.can_transition_to(after),
                    "illegal edge {} -> {}", before, after
                );
                if before != after {
                    session.transition_to(after).unwrap();
                }
            }
        }
    }
}
