/// State management module
///
/// This module handles the application state, including:
/// - Worker reports and run status (data.rs)
/// - The desktop state machine and enabled controls (session.rs)

pub mod data;
pub mod session;

pub use data::{RunEvent, RunStage, RunStatus};
pub use session::{AppState, Controls, Session};
