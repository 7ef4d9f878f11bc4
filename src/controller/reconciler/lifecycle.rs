//! # Lifecycle
//!
//! Phase transitions of an attendee, kept free of I/O.
//!
//! ```text
//! Unset --FirstObserved--> Creating --AllChildrenPresent--> Ready
//!                           ^   |                            |
//!                           +---+ ChildCreated               |
//!                           +--------------ChildCreated------+
//! any --DeletionRequested--> Deleting
//! ```

use crate::crd::AttendeePhase;

/// Something the reconciler observed or did during a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The attendee was reconciled with no phase recorded yet
    FirstObserved,
    /// A missing child resource was (re)created
    ChildCreated,
    /// A pass found every child resource already present
    AllChildrenPresent,
    /// The attendee carries a deletion marker
    DeletionRequested,
}

/// Phase after `event`, starting from `current`
///
/// Absent a deletion, phases only move Unset -> Creating -> Ready (and back
/// to Creating when a child is recreated); Ready is never reached without
/// passing through Creating. Deleting is terminal.
#[must_use]
pub fn transition(current: Option<AttendeePhase>, event: LifecycleEvent) -> Option<AttendeePhase> {
    use AttendeePhase::{Creating, Deleting, Ready};
    match (current, event) {
        (Some(Deleting), _) | (_, LifecycleEvent::DeletionRequested) => Some(Deleting),
        (None, LifecycleEvent::FirstObserved | LifecycleEvent::ChildCreated) => Some(Creating),
        (Some(Creating | Ready), LifecycleEvent::ChildCreated) => Some(Creating),
        (Some(Creating), LifecycleEvent::AllChildrenPresent) => Some(Ready),
        (phase, _) => phase,
    }
}

/// Whether a pass should publish the kubeconfig and move to Ready
///
/// Only a pass that created nothing, starting from Creating, finalizes. That
/// makes the completion side effect fire once per Creating -> Ready crossing.
#[must_use]
pub fn should_finalize(observed: Option<AttendeePhase>, created: usize) -> bool {
    created == 0 && observed == Some(AttendeePhase::Creating)
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendeePhase::{Creating, Deleting, Ready};
    use LifecycleEvent::{AllChildrenPresent, ChildCreated, DeletionRequested, FirstObserved};

    #[test]
    fn test_first_observation_enters_creating() {
        assert_eq!(transition(None, FirstObserved), Some(Creating));
        assert_eq!(transition(Some(Ready), FirstObserved), Some(Ready));
    }

    #[test]
    fn test_unset_never_skips_creating() {
        assert_eq!(transition(None, AllChildrenPresent), None);
    }

    #[test]
    fn test_child_recreation_reverts_ready() {
        assert_eq!(transition(Some(Ready), ChildCreated), Some(Creating));
        assert_eq!(transition(Some(Creating), ChildCreated), Some(Creating));
    }

    #[test]
    fn test_all_present_completes_creating() {
        assert_eq!(transition(Some(Creating), AllChildrenPresent), Some(Ready));
        assert_eq!(transition(Some(Ready), AllChildrenPresent), Some(Ready));
    }

    #[test]
    fn test_deletion_wins_from_any_phase() {
        for phase in [None, Some(Creating), Some(Ready), Some(Deleting)] {
            assert_eq!(transition(phase, DeletionRequested), Some(Deleting));
        }
        assert_eq!(transition(Some(Deleting), ChildCreated), Some(Deleting));
    }

    #[test]
    fn test_monotonic_without_deletion() {
        let rank = |p: Option<AttendeePhase>| match p {
            None => 0,
            Some(Creating) => 1,
            Some(Ready) => 2,
            Some(Deleting) => 3,
        };
        let events = [FirstObserved, ChildCreated, AllChildrenPresent];
        for start in [None, Some(Creating), Some(Ready)] {
            for event in events {
                let next = transition(start, event);
                if start.is_some() {
                    assert_ne!(next, None, "{start:?} --{event:?}--> Unset");
                }
                assert_ne!(next, Some(Deleting));
                // The only step backwards is Ready -> Creating on recreation
                if rank(next) < rank(start) {
                    assert_eq!((start, event, next), (Some(Ready), ChildCreated, Some(Creating)));
                }
                // Ready is only reached from Creating or Ready
                if next == Some(Ready) {
                    assert!(matches!(start, Some(Creating | Ready)));
                }
            }
        }
    }

    #[test]
    fn test_should_finalize_guard() {
        assert!(should_finalize(Some(Creating), 0));
        assert!(!should_finalize(Some(Creating), 1));
        assert!(!should_finalize(Some(Ready), 0));
        assert!(!should_finalize(None, 0));
    }
}
