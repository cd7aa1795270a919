//! The error type shared by the residual, output and solver layers.
use mach_optimize::bfgs::BfgsError;
use mach_optimize::line_search::LineSearchConfigError;
use mach_optimize::newton::NewtonError;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum MachError {
    /// No output with the given name can be created by the residual.
    UnknownOutput(String),
    /// An input key that the receiving object does not understand.
    UnknownInput(String),
    /// An input that the operation requires is absent.
    MissingInput(String),
    /// An input was given as a scalar where a field was expected, or vice versa.
    BadInputType { key: String, expected: &'static str },
    /// An option selected a type (line search, time stepper, flux, ...) that does not exist.
    UnknownOption { key: String, value: String },
    /// The operation is not available for this object or configuration.
    Unsupported(String),
    SizeMismatch { expected: usize, actual: usize },
    /// Two Jacobian representations could not be combined.
    OperatorMismatch(String),
    LinearSolve(Box<dyn Error>),
    NonlinearSolve(Box<dyn Error>),
    /// Options could not be parsed into their typed representation.
    Options(serde_json::Error),
    Other(String),
}

impl fmt::Display for MachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOutput(name) => write!(f, "Output with name \"{}\" not supported.", name),
            Self::UnknownInput(key) => write!(f, "Input \"{}\" is not recognized.", key),
            Self::MissingInput(key) => write!(f, "Required input \"{}\" was not provided.", key),
            Self::BadInputType { key, expected } => {
                write!(f, "Input \"{}\" must be a {}.", key, expected)
            }
            Self::UnknownOption { key, value } => {
                write!(f, "Unknown value \"{}\" for option \"{}\".", value, key)
            }
            Self::Unsupported(what) => write!(f, "Unsupported operation: {}", what),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "Size mismatch: expected {}, got {}.", expected, actual)
            }
            Self::OperatorMismatch(what) => write!(f, "Incompatible operators: {}", what),
            Self::LinearSolve(err) => write!(f, "Linear solve failed. Error: {}", err),
            Self::NonlinearSolve(err) => write!(f, "Nonlinear solve failed. Error: {}", err),
            Self::Options(err) => write!(f, "Malformed options. Error: {}", err),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for MachError {}

impl From<serde_json::Error> for MachError {
    fn from(err: serde_json::Error) -> Self {
        Self::Options(err)
    }
}

impl From<NewtonError> for MachError {
    fn from(err: NewtonError) -> Self {
        Self::NonlinearSolve(Box::new(err))
    }
}

impl From<BfgsError> for MachError {
    fn from(err: BfgsError) -> Self {
        Self::NonlinearSolve(Box::new(err))
    }
}

impl From<LineSearchConfigError> for MachError {
    fn from(err: LineSearchConfigError) -> Self {
        match err {
            LineSearchConfigError::UnknownType(value) => Self::UnknownOption {
                key: "linesearch.type".to_string(),
                value,
            },
            LineSearchConfigError::Malformed(err) => Self::Options(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, MachError>;
