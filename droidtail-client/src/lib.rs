//! Droidtail Client Library
//!
//! Terminal rendering for the droidtail binary.

pub mod ui;

pub use ui::{format_status, priority_of, TerminalUi, UiConfig};
