// Detection loop state machine
//
// Transitions are pure: the coordinator feeds a command in, applies the new
// state and carries out the returned effects.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Idle,
    Running,
    /// Stop requested while a step was in flight
    Stopping,
}

/// How often the loop steps while running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Step on every refresh tick until stopped
    Continuous,
    /// A single step, then Idle
    OneShot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    Start { cadence: Cadence },
    Stop,
    /// Refresh boundary reached
    Tick,
    /// The step started under `epoch` finished
    StepResolved { epoch: u64, outcome: StepOutcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEffect {
    /// Capture a frame and call the estimator
    BeginStep { epoch: u64 },
    /// Forward the step result to the transcript and sinks
    RecordFrame,
    /// Surface the step error
    SurfaceFailure,
    /// Drop the step result unobserved
    DiscardResult,
    /// Step again on the next refresh boundary
    ScheduleTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopState {
    pub phase: LoopPhase,
    pub cadence: Cadence,
    /// Bumped on every start and stop
    pub epoch: u64,
    /// Epoch of the step currently awaiting the estimator
    pub in_flight: Option<u64>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            phase: LoopPhase::Idle,
            cadence: Cadence::Continuous,
            epoch: 0,
            in_flight: None,
        }
    }
}

impl LoopState {
    pub fn is_running(&self) -> bool {
        self.phase == LoopPhase::Running
    }

    pub fn transition(self, command: LoopCommand) -> (LoopState, Vec<LoopEffect>) {
        let mut next = self;

        match command {
            LoopCommand::Start { cadence } => {
                if self.phase == LoopPhase::Running {
                    return (self, vec![]);
                }
                next.phase = LoopPhase::Running;
                next.cadence = cadence;
                next.epoch += 1;
                (next, vec![LoopEffect::ScheduleTick])
            }

            LoopCommand::Stop => {
                if self.phase != LoopPhase::Running {
                    return (self, vec![]);
                }
                next.epoch += 1;
                next.phase = if self.in_flight.is_some() {
                    LoopPhase::Stopping
                } else {
                    LoopPhase::Idle
                };
                (next, vec![])
            }

            LoopCommand::Tick => {
                if self.phase != LoopPhase::Running || self.in_flight.is_some() {
                    return (self, vec![]);
                }
                next.in_flight = Some(self.epoch);
                (next, vec![LoopEffect::BeginStep { epoch: self.epoch }])
            }

            LoopCommand::StepResolved { epoch, outcome } => {
                if self.in_flight != Some(epoch) {
                    return (self, vec![]);
                }
                next.in_flight = None;

                if self.phase == LoopPhase::Stopping {
                    next.phase = LoopPhase::Idle;
                    return (next, vec![LoopEffect::DiscardResult]);
                }
                if epoch != self.epoch || self.phase != LoopPhase::Running {
                    return (next, vec![LoopEffect::DiscardResult]);
                }

                match (outcome, self.cadence) {
                    (StepOutcome::Succeeded, Cadence::OneShot) => {
                        next.phase = LoopPhase::Idle;
                        (next, vec![LoopEffect::RecordFrame])
                    }
                    (StepOutcome::Succeeded, Cadence::Continuous) => {
                        (next, vec![LoopEffect::RecordFrame, LoopEffect::ScheduleTick])
                    }
                    (StepOutcome::Failed, _) => {
                        next.phase = LoopPhase::Idle;
                        (next, vec![LoopEffect::SurfaceFailure])
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(cadence: Cadence) -> LoopState {
        let (state, effects) = LoopState::default().transition(LoopCommand::Start { cadence });
        assert_eq!(effects, vec![LoopEffect::ScheduleTick]);
        state
    }

    fn resolved(state: LoopState, epoch: u64, outcome: StepOutcome) -> (LoopState, Vec<LoopEffect>) {
        state.transition(LoopCommand::StepResolved { epoch, outcome })
    }

    #[test]
    fn test_start_from_idle() {
        let state = running(Cadence::Continuous);
        assert_eq!(state.phase, LoopPhase::Running);
        assert_eq!(state.epoch, 1);
        assert_eq!(state.in_flight, None);
    }

    #[test]
    fn test_start_while_running_is_noop() {
        let state = running(Cadence::Continuous);
        let (again, effects) = state.transition(LoopCommand::Start {
            cadence: Cadence::OneShot,
        });
        assert_eq!(again, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_tick_begins_one_step_at_a_time() {
        let state = running(Cadence::Continuous);
        let (state, effects) = state.transition(LoopCommand::Tick);
        assert_eq!(effects, vec![LoopEffect::BeginStep { epoch: 1 }]);
        assert_eq!(state.in_flight, Some(1));

        let (same, effects) = state.transition(LoopCommand::Tick);
        assert!(effects.is_empty());
        assert_eq!(same, state);
    }

    #[test]
    fn test_tick_while_idle_does_nothing() {
        let (state, effects) = LoopState::default().transition(LoopCommand::Tick);
        assert_eq!(state, LoopState::default());
        assert!(effects.is_empty());
    }

    #[test]
    fn test_continuous_success_reschedules() {
        let (state, _) = running(Cadence::Continuous).transition(LoopCommand::Tick);
        let (state, effects) = resolved(state, 1, StepOutcome::Succeeded);
        assert_eq!(effects, vec![LoopEffect::RecordFrame, LoopEffect::ScheduleTick]);
        assert_eq!(state.phase, LoopPhase::Running);
        assert_eq!(state.in_flight, None);
    }

    #[test]
    fn test_one_shot_success_goes_idle() {
        let (state, _) = running(Cadence::OneShot).transition(LoopCommand::Tick);
        let (state, effects) = resolved(state, 1, StepOutcome::Succeeded);
        assert_eq!(effects, vec![LoopEffect::RecordFrame]);
        assert_eq!(state.phase, LoopPhase::Idle);
    }

    #[test]
    fn test_failure_halts_loop() {
        let (state, _) = running(Cadence::Continuous).transition(LoopCommand::Tick);
        let (state, effects) = resolved(state, 1, StepOutcome::Failed);
        assert_eq!(effects, vec![LoopEffect::SurfaceFailure]);
        assert_eq!(state.phase, LoopPhase::Idle);

        let (_, effects) = state.transition(LoopCommand::Tick);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stop_with_step_in_flight_discards_result() {
        let (state, _) = running(Cadence::Continuous).transition(LoopCommand::Tick);
        let (state, effects) = state.transition(LoopCommand::Stop);
        assert!(effects.is_empty());
        assert_eq!(state.phase, LoopPhase::Stopping);
        assert_eq!(state.epoch, 2);

        let (state, effects) = resolved(state, 1, StepOutcome::Succeeded);
        assert_eq!(effects, vec![LoopEffect::DiscardResult]);
        assert_eq!(state.phase, LoopPhase::Idle);
        assert_eq!(state.in_flight, None);
    }

    #[test]
    fn test_restart_during_stopping_discards_stale_step() {
        let (state, _) = running(Cadence::Continuous).transition(LoopCommand::Tick);
        let (state, _) = state.transition(LoopCommand::Stop);
        let (state, effects) = state.transition(LoopCommand::Start {
            cadence: Cadence::Continuous,
        });
        assert_eq!(effects, vec![LoopEffect::ScheduleTick]);
        assert_eq!(state.phase, LoopPhase::Running);
        assert_eq!(state.epoch, 3);

        // New ticks wait for the old step to drain
        let (state, effects) = state.transition(LoopCommand::Tick);
        assert!(effects.is_empty());

        let (state, effects) = resolved(state, 1, StepOutcome::Succeeded);
        assert_eq!(effects, vec![LoopEffect::DiscardResult]);
        assert_eq!(state.phase, LoopPhase::Running);

        let (_, effects) = state.transition(LoopCommand::Tick);
        assert_eq!(effects, vec![LoopEffect::BeginStep { epoch: 3 }]);
    }

    #[test]
    fn test_unknown_step_resolution_ignored() {
        let state = running(Cadence::Continuous);
        let (same, effects) = resolved(state, 7, StepOutcome::Failed);
        assert_eq!(same, state);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (state, effects) = LoopState::default().transition(LoopCommand::Stop);
        assert_eq!(state, LoopState::default());
        assert!(effects.is_empty());
    }
}
