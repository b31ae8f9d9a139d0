//! Countdown gate for local recording: a pure state store plus the
//! controller that owns the single ticking timer.

mod controller;
pub mod error;
mod store;

pub use controller::{ControllerPhase, CountdownController, CountdownGate, CountdownSettings};
pub use error::CountdownError;
pub use store::{
    reduce, Continuation, CountdownCommand, CountdownSnapshot, CountdownState, CountdownStore,
    COUNTDOWN_START,
};
