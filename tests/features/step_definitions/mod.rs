//! Step definitions for Cucumber tests

pub mod presence_steps;
