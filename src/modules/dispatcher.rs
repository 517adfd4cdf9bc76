// src/modules/dispatcher.rs
use crate::modules::reevaluation::NetworkReevaluator;
use crate::modules::script_runner::ScriptRunner;
use crate::status::StatusValue;
use log::{debug, error};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Turns an observed status into its side effects. Never fails: every error
/// is logged here.
pub struct StatusActionDispatcher {
    script: Arc<dyn ScriptRunner>,
    reevaluator: Option<Arc<dyn NetworkReevaluator>>,
}

impl StatusActionDispatcher {
    /// `reevaluator` is `None` when network re-evaluation is switched off.
    pub fn new(
        script: Arc<dyn ScriptRunner>,
        reevaluator: Option<Arc<dyn NetworkReevaluator>>,
    ) -> Self {
        Self {
            script,
            reevaluator,
        }
    }

    pub async fn dispatch(&self, status: &StatusValue, cancel: &CancellationToken) {
        if let Err(e) = self.script.run(status).await {
            error!("Error executing script: {}", e);
        }

        if !status.triggers_reevaluation() {
            debug!("Status {} does not warrant network re-evaluation", status);
            return;
        }
        match &self.reevaluator {
            Some(reevaluator) => {
                reevaluator.run(status, cancel).await;
            }
            None => debug!("Network re-evaluation disabled"),
        }
    }
}
