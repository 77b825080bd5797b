//! Error types for the pipeline engine
//!
//! Component implementations report failures as `anyhow::Error`; the engine
//! attributes each one to the [`Stage`] it came from.

use crate::registry::ComponentKind;
use std::fmt;
use thiserror::Error;

/// Registration and lookup failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} '{name}' is already registered")]
    Duplicate { kind: ComponentKind, name: String },

    #[error("{kind} '{name}' requires datasource type '{datasource}', which is not registered")]
    UnknownDatasource {
        kind: ComponentKind,
        name: String,
        datasource: String,
    },

    #[error("no {kind} registered with name '{name}'")]
    NotRegistered { kind: ComponentKind, name: String },
}

/// Position of a component inside a pipeline, used to attribute errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    PreExecute,
    Source,
    /// Zero-based position in the processor chain plus its type name
    Processor { index: usize, kind: String },
    Sink,
    PostExecute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PreExecute => f.write_str("pre-execute executor"),
            Stage::Source => f.write_str("source"),
            Stage::Processor { index, kind } => write!(f, "processor #{} ({})", index + 1, kind),
            Stage::Sink => f.write_str("sink"),
            Stage::PostExecute => f.write_str("post-execute executor"),
        }
    }
}

/// Failures of a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to resolve {stage} config: {source:#}")]
    ConfigResolution {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to open {stage}: {source:#}")]
    Setup {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("{stage} error: {source:#}")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to close {stage}: {source:#}")]
    Close {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    #[error("post-execute executor failed: {0:#}")]
    PostExecute(#[source] anyhow::Error),

    #[error("failed to finish output files: {0:#}")]
    FileFinish(#[source] anyhow::Error),

    #[error("pipeline run was cancelled")]
    Cancelled,

    #[error("{stage} worker panicked")]
    WorkerPanicked { stage: Stage },

    #[error("{}", join_messages(.0))]
    Multiple(Vec<PipelineError>),
}

impl PipelineError {
    /// Join errors into one, flattening nested [`PipelineError::Multiple`].
    ///
    /// Returns `None` for an empty input and the error itself for a single one.
    pub fn join(errors: impl IntoIterator<Item = PipelineError>) -> Option<PipelineError> {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                PipelineError::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(PipelineError::Multiple(flat)),
        }
    }

    /// Individual errors, in report order
    pub fn errors(&self) -> Vec<&PipelineError> {
        match self {
            PipelineError::Multiple(inner) => inner.iter().collect(),
            other => vec![other],
        }
    }

    /// Whether this report, or any error joined into it, matches `predicate`
    pub fn any(&self, predicate: impl Fn(&PipelineError) -> bool) -> bool {
        self.errors().into_iter().any(predicate)
    }
}

fn join_messages(errors: &[PipelineError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures turning a pipeline definition into runnable components
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to parse pipeline definition: {0}")]
    Parse(String),

    #[error("failed to read pipeline definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("{component} references unknown datasource '{name}'")]
    UnknownDatasourceRef { component: String, name: String },

    #[error("{component} requires a '{expected}' datasource but none is configured")]
    MissingDatasource { component: String, expected: String },

    #[error("{component} requires a '{expected}' datasource, but '{name}' is of type '{found}'")]
    DatasourceMismatch {
        component: String,
        name: String,
        expected: String,
        found: String,
    },

    #[error("{component} does not use a datasource, but '{name}' was configured")]
    UnexpectedDatasource { component: String, name: String },

    #[error("{component} is missing required parameters: {}", .keys.join(", "))]
    MissingParams { component: String, keys: Vec<String> },

    #[error("failed to initialize datasource '{name}' for {component}: {source:#}")]
    DatasourceInit {
        component: String,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to resolve {component} config: {source:#}")]
    ConfigResolution {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("placeholder '${{{0}}}' does not name a configured variable")]
    UnknownVariable(String),

    #[error("invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("failed to resolve variable '{name}': {source:#}")]
    Variable {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}
