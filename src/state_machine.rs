//! Session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! `transition` decides the next state and the effects to run, the runtime
//! executes them.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{ErrorKind, SessionContext, SessionState};
pub use transition::{transition, TransitionError, TransitionResult};
