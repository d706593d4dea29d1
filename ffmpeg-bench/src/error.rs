use thiserror::Error;

/// Failures that abort a pipeline run before or during stage setup.
///
/// Runtime submit/drain failures are not errors of the run: they end the
/// loop and show up in the report's stop reason.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("no input units to process")]
    NoInput,

    #[error("decoder setup failed: {0:#}")]
    DecoderSetup(#[source] anyhow::Error),

    #[error("scaler setup failed for output {output}: {source:#}")]
    ScalerSetup {
        output: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("encoder setup failed for output {output}: {source:#}")]
    EncoderSetup {
        output: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("fan-out worker pool unavailable: {0:#}")]
    WorkerPool(#[source] anyhow::Error),

    #[error("fan-out branch {branch} failed: {source:#}")]
    Branch {
        branch: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Reports a scaler or encoder setup failure inside a fan-out branch
    /// as a branch failure. Other kinds pass through.
    pub(crate) fn in_branch(self) -> Self {
        match self {
            PipelineError::ScalerSetup { output, source }
            | PipelineError::EncoderSetup { output, source } => PipelineError::Branch {
                branch: output,
                source,
            },
            other => other,
        }
    }

    /// Negative status code of this failure kind.
    pub fn status(&self) -> i32 {
        match self {
            PipelineError::DecoderSetup(_) => -1,
            PipelineError::ScalerSetup { .. } => -2,
            PipelineError::EncoderSetup { .. } => -3,
            PipelineError::Branch { .. } => -4,
            PipelineError::InvalidJob(_) => -5,
            PipelineError::NoInput => -6,
            PipelineError::WorkerPool(_) => -7,
        }
    }
}
