use std::{error::Error, fmt, io, path::PathBuf};

use comms::RouterErr;
use machine_learning::MlErr;

/// The controller's result type.
pub type Result<T> = std::result::Result<T, ControllerErr>;

/// Failures of the local artifact store.
#[derive(Debug)]
pub enum StoreErr {
    Io { path: PathBuf, source: io::Error },
    NotFound(PathBuf),
    Bundle(zip::result::ZipError),
}

impl StoreErr {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

impl fmt::Display for StoreErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErr::Io { path, source } => write!(f, "io error at {}: {source}", path.display()),
            StoreErr::NotFound(path) => write!(f, "{} does not exist", path.display()),
            StoreErr::Bundle(e) => write!(f, "invalid transfer bundle: {e}"),
        }
    }
}

impl Error for StoreErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreErr::Io { source, .. } => Some(source),
            StoreErr::Bundle(e) => Some(e),
            StoreErr::NotFound(_) => None,
        }
    }
}

impl From<zip::result::ZipError> for StoreErr {
    fn from(value: zip::result::ZipError) -> Self {
        Self::Bundle(value)
    }
}

/// A task list the controller refuses to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationErr {
    NoTasks,
    MissingModel { index: usize },
    EmptyConfig { index: usize },
    MissingSeq { index: usize },
    BadSequence { index: usize, got: i64, expected: i64 },
    UnknownModel { index: usize, model: String },
}

impl fmt::Display for TaskValidationErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskValidationErr::NoTasks => write!(f, "at least one task is required"),
            TaskValidationErr::MissingModel { index } => write!(f, "task {index} has no model"),
            TaskValidationErr::EmptyConfig { index } => write!(f, "task {index} has an empty config"),
            TaskValidationErr::MissingSeq { index } => write!(f, "task {index} has no seq"),
            TaskValidationErr::BadSequence {
                index,
                got,
                expected,
            } => write!(f, "task {index} has seq {got}, expected {expected}"),
            TaskValidationErr::UnknownModel { index, model } => {
                write!(f, "task {index} uses unknown model {model:?}")
            }
        }
    }
}

impl Error for TaskValidationErr {}

/// Controller runtime failures.
#[derive(Debug)]
pub enum ControllerErr {
    Router(RouterErr),
    Store(StoreErr),
    Ml(MlErr),
    Json(serde_json::Error),
    /// The router has no bundle for the request yet.
    Missing(&'static str),
    /// The run's current task carries no round number.
    NoRound { run: u64 },
    /// A round step ran before the data was prepared.
    NotPrepared,
    /// Nothing usable was found to build a result from.
    NoResults(&'static str),
}

impl ControllerErr {
    /// Whether the failure may clear up by itself, so the run should wait
    /// rather than be failed.
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerErr::Router(e) => e.is_transient(),
            ControllerErr::Missing(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ControllerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerErr::Router(e) => write!(f, "router: {e}"),
            ControllerErr::Store(e) => write!(f, "store: {e}"),
            ControllerErr::Ml(e) => write!(f, "model: {e}"),
            ControllerErr::Json(e) => write!(f, "artifact encoding: {e}"),
            ControllerErr::Missing(what) => write!(f, "router has no {what} yet"),
            ControllerErr::NoRound { run } => write!(f, "run {run} has no current round"),
            ControllerErr::NotPrepared => write!(f, "data was not prepared"),
            ControllerErr::NoResults(what) => write!(f, "no {what} to aggregate"),
        }
    }
}

impl Error for ControllerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ControllerErr::Router(e) => Some(e),
            ControllerErr::Store(e) => Some(e),
            ControllerErr::Ml(e) => Some(e),
            ControllerErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RouterErr> for ControllerErr {
    fn from(value: RouterErr) -> Self {
        Self::Router(value)
    }
}

impl From<StoreErr> for ControllerErr {
    fn from(value: StoreErr) -> Self {
        Self::Store(value)
    }
}

impl From<MlErr> for ControllerErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<serde_json::Error> for ControllerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Invalid or missing environment configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigErr {
    Missing(&'static str),
    Invalid { var: &'static str, value: String },
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Missing(var) => write!(f, "environment variable {var} is required"),
            ConfigErr::Invalid { var, value } => write!(f, "invalid value {value:?} for {var}"),
        }
    }
}

impl Error for ConfigErr {}

/// Boundary conversion for the binary.
impl From<ConfigErr> for io::Error {
    fn from(value: ConfigErr) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, value)
    }
}
