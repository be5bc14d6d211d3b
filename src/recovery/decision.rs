/// Recovery decision table
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::OperationalPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryAction {
    ContinueNormal,
    UpdatePositions,
    SwitchToManaging,
    SwitchToSeeking,
    ContinueSeeking,
    ManualReviewNeeded,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::ContinueNormal => "CONTINUE_NORMAL",
            RecoveryAction::UpdatePositions => "UPDATE_POSITIONS",
            RecoveryAction::SwitchToManaging => "SWITCH_TO_MANAGING",
            RecoveryAction::SwitchToSeeking => "SWITCH_TO_SEEKING",
            RecoveryAction::ContinueSeeking => "CONTINUE_SEEKING",
            RecoveryAction::ManualReviewNeeded => "MANUAL_REVIEW_NEEDED",
        }
    }

    /// Phase the process resumes in after executing this action
    pub fn resulting_phase(&self, correct_phase: OperationalPhase) -> OperationalPhase {
        match self {
            RecoveryAction::ManualReviewNeeded => OperationalPhase::SeekingEntry,
            _ => correct_phase,
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pure mapping from (saved phase, correct phase, counts) to an action.
///
/// `correct_phase` must agree with `real_count`; any inconsistent input maps
/// to `ManualReviewNeeded`.
pub fn select_action(
    saved_phase: OperationalPhase,
    correct_phase: OperationalPhase,
    saved_count: usize,
    real_count: usize,
) -> RecoveryAction {
    use OperationalPhase::{ManagingPositions as Managing, SeekingEntry as Seeking};

    if OperationalPhase::for_open_count(real_count) != correct_phase {
        return RecoveryAction::ManualReviewNeeded;
    }

    match (saved_phase, correct_phase) {
        (Managing, Managing) if saved_count == real_count => RecoveryAction::ContinueNormal,
        (Managing, Managing) => RecoveryAction::UpdatePositions,
        (Seeking, Managing) => RecoveryAction::SwitchToManaging,
        (Managing, Seeking) => RecoveryAction::SwitchToSeeking,
        (Seeking, Seeking) => RecoveryAction::ContinueSeeking,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn phase_strategy() -> impl Strategy<Value = OperationalPhase> {
        prop_oneof![
            Just(OperationalPhase::SeekingEntry),
            Just(OperationalPhase::ManagingPositions),
        ]
    }

    #[test]
    fn test_table_rows() {
        use OperationalPhase::*;
        assert_eq!(
            select_action(ManagingPositions, ManagingPositions, 1, 1),
            RecoveryAction::ContinueNormal
        );
        assert_eq!(
            select_action(ManagingPositions, ManagingPositions, 1, 2),
            RecoveryAction::UpdatePositions
        );
        assert_eq!(
            select_action(SeekingEntry, ManagingPositions, 0, 1),
            RecoveryAction::SwitchToManaging
        );
        assert_eq!(
            select_action(ManagingPositions, SeekingEntry, 1, 0),
            RecoveryAction::SwitchToSeeking
        );
        assert_eq!(
            select_action(SeekingEntry, SeekingEntry, 0, 0),
            RecoveryAction::ContinueSeeking
        );
        // correct phase contradicting the real count
        assert_eq!(
            select_action(SeekingEntry, SeekingEntry, 0, 3),
            RecoveryAction::ManualReviewNeeded
        );
        assert_eq!(
            select_action(ManagingPositions, ManagingPositions, 2, 0),
            RecoveryAction::ManualReviewNeeded
        );
    }

    #[test]
    fn test_manual_review_always_resumes_seeking() {
        for correct in [OperationalPhase::SeekingEntry, OperationalPhase::ManagingPositions] {
            assert_eq!(
                RecoveryAction::ManualReviewNeeded.resulting_phase(correct),
                OperationalPhase::SeekingEntry
            );
        }
    }

    proptest! {
        #[test]
        fn prop_select_action_is_deterministic(
            saved in phase_strategy(),
            correct in phase_strategy(),
            saved_count in 0usize..4,
            real_count in 0usize..4,
        ) {
            let first = select_action(saved, correct, saved_count, real_count);
            let second = select_action(saved, correct, saved_count, real_count);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_consistent_inputs_follow_table(
            saved in phase_strategy(),
            saved_count in 0usize..4,
            real_count in 0usize..4,
        ) {
            let correct = OperationalPhase::for_open_count(real_count);
            let action = select_action(saved, correct, saved_count, real_count);

            let expected = match (saved, correct) {
                (OperationalPhase::ManagingPositions, OperationalPhase::ManagingPositions) => {
                    if saved_count == real_count {
                        RecoveryAction::ContinueNormal
                    } else {
                        RecoveryAction::UpdatePositions
                    }
                }
                (OperationalPhase::SeekingEntry, OperationalPhase::ManagingPositions) => RecoveryAction::SwitchToManaging,
                (OperationalPhase::ManagingPositions, OperationalPhase::SeekingEntry) => RecoveryAction::SwitchToSeeking,
                (OperationalPhase::SeekingEntry, OperationalPhase::SeekingEntry) => RecoveryAction::ContinueSeeking,
            };
            prop_assert_eq!(action, expected);
            // phase correctness: managing iff something is open
            prop_assert_eq!(
                action.resulting_phase(correct) == OperationalPhase::ManagingPositions,
                real_count > 0
            );
        }
    }
}
