//! Lifecycle status enums with an explicit edge list.
//!
//! Payment and subscription statuses implement this so every transition
//! goes through one validated path.

use super::ValidationError;

/// Implementors list their edges; everything else is derived.
///
/// Self-loops are not edges. "Already there" is handled by the aggregate,
/// which reports it as an unchanged transition.
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Outgoing edges of this status.
    fn valid_transitions(&self) -> Vec<Self>;

    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// No outgoing edges.
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}
