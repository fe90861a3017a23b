//! Sequential step driver with reverse-order rollback.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::steps::{BuildContext, Step, StepAction};

/// How a pipeline run ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PipelineOutcome {
    /// Every step continued.
    Completed,
    /// A step halted the run.
    Halted {
        /// Name of the halting step.
        step: &'static str,
    },
    /// Cancellation was observed before a step started.
    Cancelled,
}

/// Result of [`run_pipeline`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PipelineRun {
    /// How the run ended.
    pub outcome: PipelineOutcome,
    /// State exports taken once the last step returned, before rollback
    /// clears what it removed.
    pub exports: BTreeMap<&'static str, String>,
}

/// Runs `steps` in order against `context`.
///
/// The run stops at the first step that halts, or before the next step once
/// the context's cancellation token has fired. Every step that started is
/// then cleaned up in reverse order, whatever the outcome.
pub async fn run_pipeline(steps: &[Box<dyn Step>], context: &mut BuildContext) -> PipelineRun {
    let mut executed = 0;
    let mut outcome = PipelineOutcome::Completed;

    for step in steps {
        if context.cancel.is_cancelled() {
            warn!(step = step.name(), "run cancelled, skipping remaining steps");
            outcome = PipelineOutcome::Cancelled;
            break;
        }
        debug!(step = step.name(), "running step");
        executed += 1;
        if step.run(context).await == StepAction::Halt {
            info!(step = step.name(), "step halted the pipeline");
            outcome = PipelineOutcome::Halted { step: step.name() };
            break;
        }
    }

    let exports = context.state.exports();
    for step in steps.iter().take(executed).rev() {
        debug!(step = step.name(), "cleaning up step");
        step.cleanup(context).await;
    }

    PipelineRun { outcome, exports }
}
