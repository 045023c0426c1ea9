//! Observable session state and event types.

pub mod events;
