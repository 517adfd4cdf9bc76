// src/modules/mod.rs

pub mod controller;
pub mod dispatcher;
pub mod reevaluation;
pub mod script_runner;
pub mod watcher;

// Re-export for easier access
pub use controller::WatchLoopController;
pub use dispatcher::StatusActionDispatcher;
pub use reevaluation::{NetworkReevaluationStrategy, NetworkReevaluator};
pub use script_runner::ProcessScriptRunner;
pub use watcher::ConfigValueWatcher;
