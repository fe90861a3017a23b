//! Operator-facing progress reporting.

use tracing::{error, info};

/// Sink for progress and error messages shown to the operator.
pub trait Ui: Send + Sync {
    /// Reports progress.
    fn say(&self, message: &str);
    /// Reports an error the operator has to act on.
    fn error(&self, message: &str);
}

/// [`Ui`] that forwards messages to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingUi;

impl Ui for TracingUi {
    fn say(&self, message: &str) {
        info!(target: "snapwright::ui", "{message}");
    }

    fn error(&self, message: &str) {
        error!(target: "snapwright::ui", "{message}");
    }
}
