//! State machine transition table
//!
//! The transition function is total: every `(state, event)` pair either
//! yields the next state or is an explicit no-op (`None`). Stale events from
//! a job stopped mid-flight therefore never corrupt the machine.

use crate::monitoring::{DetectionMode, InternalEvent, MonitoringState};

/// Compute the state following `event`, or `None` when the event is ignored
/// in the current state.
///
/// The destination of `CardRemoved` depends on the detection mode: a
/// repeating reader goes back to waiting for the next card, a single-shot
/// reader returns to idle.
pub(crate) fn transition(
    state: MonitoringState,
    event: InternalEvent,
    mode: DetectionMode,
) -> Option<MonitoringState> {
    use InternalEvent::*;
    use MonitoringState::*;

    match (state, event) {
        (WaitForStartDetection, StartDetect) => Some(WaitForCardInsertion),
        (WaitForCardInsertion, CardInserted) => Some(WaitForCardProcessing),
        (WaitForCardInsertion, TimeOut) => Some(WaitForStartDetection),
        (WaitForCardProcessing, CardProcessed) => Some(WaitForCardRemoval),
        (WaitForCardProcessing | WaitForCardRemoval, CardRemoved) => Some(match mode {
            DetectionMode::Repeating => WaitForCardInsertion,
            DetectionMode::Singleshot => WaitForStartDetection,
        }),
        (WaitForCardRemoval, TimeOut) => Some(WaitForStartDetection),
        (
            WaitForCardInsertion | WaitForCardProcessing | WaitForCardRemoval,
            StopDetect,
        ) => Some(WaitForStartDetection),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [MonitoringState; 4] = [
        MonitoringState::WaitForStartDetection,
        MonitoringState::WaitForCardInsertion,
        MonitoringState::WaitForCardProcessing,
        MonitoringState::WaitForCardRemoval,
    ];

    const EVENTS: [InternalEvent; 6] = [
        InternalEvent::StartDetect,
        InternalEvent::StopDetect,
        InternalEvent::CardInserted,
        InternalEvent::CardProcessed,
        InternalEvent::CardRemoved,
        InternalEvent::TimeOut,
    ];

    #[test]
    fn test_every_pair_is_defined_or_ignored() {
        for state in STATES {
            for event in EVENTS {
                for mode in [DetectionMode::Repeating, DetectionMode::Singleshot] {
                    // Must not panic; the result itself is checked below
                    let _ = transition(state, event, mode);
                }
            }
        }
    }

    #[test]
    fn test_nominal_detection_cycle() {
        use InternalEvent::*;
        use MonitoringState::*;
        let mode = DetectionMode::Repeating;

        let mut state = WaitForStartDetection;
        for (event, expected) in [
            (StartDetect, WaitForCardInsertion),
            (CardInserted, WaitForCardProcessing),
            (CardProcessed, WaitForCardRemoval),
            (CardRemoved, WaitForCardInsertion),
        ] {
            state = transition(state, event, mode).unwrap();
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn test_singleshot_returns_to_idle_on_removal() {
        use InternalEvent::*;
        use MonitoringState::*;

        assert_eq!(
            transition(WaitForCardRemoval, CardRemoved, DetectionMode::Singleshot),
            Some(WaitForStartDetection)
        );
        assert_eq!(
            transition(WaitForCardProcessing, CardRemoved, DetectionMode::Singleshot),
            Some(WaitForStartDetection)
        );
    }

    #[test]
    fn test_stop_detect_returns_to_idle_from_active_states() {
        use InternalEvent::*;
        use MonitoringState::*;

        for state in [WaitForCardInsertion, WaitForCardProcessing, WaitForCardRemoval] {
            assert_eq!(
                transition(state, StopDetect, DetectionMode::Repeating),
                Some(WaitForStartDetection)
            );
        }
        assert_eq!(
            transition(WaitForStartDetection, StopDetect, DetectionMode::Repeating),
            None
        );
    }

    #[test]
    fn test_stale_events_are_ignored() {
        use InternalEvent::*;
        use MonitoringState::*;
        let mode = DetectionMode::Repeating;

        // A job stopped mid-flight may still deliver its event late
        assert_eq!(transition(WaitForStartDetection, CardInserted, mode), None);
        assert_eq!(transition(WaitForStartDetection, CardRemoved, mode), None);
        assert_eq!(transition(WaitForCardInsertion, CardProcessed, mode), None);
        assert_eq!(transition(WaitForCardRemoval, StartDetect, mode), None);
    }
}
