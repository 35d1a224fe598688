//! DR-007: Error taxonomy for parse, template, build, and execution failures.

use std::path::PathBuf;
use thiserror::Error;

/// A malformed recipe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: unknown section '%{name}'")]
    UnknownSection { name: String, line: usize },

    #[error("recipe has no %runscript or %startscript command")]
    MissingRunCommand,

    #[error("line {line}: unknown header keyword '{key}'")]
    UnknownHeader { key: String, line: usize },

    #[error("missing required header '{0}:'")]
    MissingHeader(&'static str),

    #[error("line {line}: duplicate header '{key}'")]
    DuplicateHeader { key: String, line: usize },

    #[error("line {line}: section '%{name}' appears more than once")]
    DuplicateSection { name: String, line: usize },

    #[error("line {line}: expected 'Key: value', got '{text}'")]
    MalformedHeader { text: String, line: usize },

    #[error("line {line}: section '%{name}' takes no arguments")]
    SectionArguments { name: String, line: usize },

    #[error("line {line}: invalid environment entry '{text}'")]
    InvalidEnvironment { text: String, line: usize },

    #[error("line {line}: {message}")]
    Syntax { message: String, line: usize },
}

/// A `{{ name }}` placeholder that cannot be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unclosed template at position {0}")]
    Unclosed(usize),

    #[error("unknown template value '{0}' (pass --set {0}=...)")]
    UnknownValue(String),
}

/// Failure while materializing a recipe into a root filesystem.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cannot create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("setup step {index} failed (exit {exit_code}): {stderr}")]
    StepFailed {
        index: usize,
        exit_code: i32,
        stderr: String,
    },

    #[error("setup step {index} could not start: {message}")]
    StepSpawn { index: usize, message: String },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot serialize image labels: {0}")]
    Labels(#[from] serde_json::Error),
}

/// Failure launching a run hook.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("executable not found: {0}")]
    NotFound(String),

    #[error("not executable: {0}")]
    NotExecutable(String),

    #[error("cannot spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutionError {
    /// Shell-convention exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecutionError::NotFound(_) => 127,
            ExecutionError::NotExecutable(_) => 126,
            ExecutionError::Spawn { .. } => 1,
        }
    }
}

/// Top-level error surfaced by the CLI.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("recipe parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("invalid values: {0}")]
    Values(String),

    #[error("image metadata: {0}")]
    Metadata(String),

    #[error("{0} validation error(s)")]
    Invalid(usize),

    #[error("cannot render JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Execution(e) => e.exit_code(),
            _ => 1,
        }
    }
}
