//! Step definitions and world for the chat hub features

pub mod step_definitions;

pub use support::ChatWorld;
