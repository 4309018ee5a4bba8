//! Seam to the externally defined session stage machine.
//!
//! The transition table and guards live outside this crate. The runtime only
//! needs `apply_event(state, event, config, guards) -> TransitionResult` and
//! treats the reducer as a pure black box.

use crate::error::StageError;
use tracing::debug;

/// Outcome of applying an event, as defined by the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult<S> {
    Transitioned { state: S },
    Rejected { reason: String },
}

pub trait StageReducer: Send + Sync {
    type State: Clone;
    type Event;
    type Config;
    type Guards;

    fn apply_event(
        &self,
        state: &Self::State,
        event: &Self::Event,
        config: &Self::Config,
        guards: &Self::Guards,
    ) -> TransitionResult<Self::State>;
}

/// Holds the current stage state and feeds events through the reducer.
pub struct StageDriver<R: StageReducer> {
    reducer: R,
    state: R::State,
    config: R::Config,
    guards: R::Guards,
}

impl<R: StageReducer> StageDriver<R> {
    pub fn new(reducer: R, initial: R::State, config: R::Config, guards: R::Guards) -> Self {
        Self {
            reducer,
            state: initial,
            config,
            guards,
        }
    }

    pub fn state(&self) -> &R::State {
        &self.state
    }

    pub fn guards_mut(&mut self) -> &mut R::Guards {
        &mut self.guards
    }

    /// Apply `event`. On rejection the current state is kept.
    pub fn send_event(&mut self, event: &R::Event) -> Result<&R::State, StageError> {
        match self
            .reducer
            .apply_event(&self.state, event, &self.config, &self.guards)
        {
            TransitionResult::Transitioned { state } => {
                self.state = state;
                Ok(&self.state)
            }
            TransitionResult::Rejected { reason } => {
                debug!("[Stage] Event rejected: {}", reason);
                Err(StageError::Rejected(reason))
            }
        }
    }
}
