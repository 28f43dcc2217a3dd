//! Connection state: the state machine and the observable store.

pub mod machine;
pub mod store;

pub use machine::{ConnectionStatus, SessionInfo, SessionState, Unplug};
pub use store::{StateChange, StateSnapshot, StateStore, Subscription};
