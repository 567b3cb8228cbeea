use derive_more::Display;
use thiserror::Error;

/// Status codes reported by the engine when an operation completes or an accessor fails.
///
/// Displays as the human-readable description the engine uses for the status.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorCode {
    /// The operation completed successfully.
    #[display("Ok")]
    Ok,

    /// The operation failed for an unspecified reason.
    #[display("Failed")]
    Failed,

    /// The engine does not support the requested operation.
    #[display("Not supported")]
    NotSupported,

    /// The engine or the target resource is in a state that does not allow the operation.
    #[display("Invalid state")]
    InvalidState,

    /// An argument passed to the engine was rejected.
    #[display("Invalid argument")]
    InvalidArgument,

    /// The engine or the resource was stopped before the operation could complete.
    #[display("Stopped")]
    Stopped,

    /// The remote side closed the stream before the requested data arrived.
    #[display("End of file")]
    EndOfFile,

    /// The engine ran out of memory or another bounded resource.
    #[display("Out of memory")]
    OutOfMemory,

    /// The referenced resource does not exist.
    #[display("Not found")]
    NotFound,

    /// The operation was aborted.
    #[display("Aborted")]
    Aborted,

    /// Another operation of the same kind is already in progress on the resource.
    #[display("Operation in progress")]
    OperationInProgress,

    /// The operation was not permitted.
    #[display("Access denied")]
    AccessDenied,

    /// The request carried no data where data was expected.
    #[display("No data")]
    NoData,

    /// The device is not attached to the basestation.
    #[display("Not attached")]
    NotAttached,

    /// The engine reported a status that this crate does not know about.
    #[display("Unknown error")]
    Unknown,
}

impl ErrorCode {
    /// Whether the status indicates success.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Converts the status into the result a consumer observes: success resolves,
    /// anything else rejects with an [`EngineError`] carrying this code.
    pub const fn into_result(self) -> std::result::Result<(), EngineError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(EngineError { code: self })
        }
    }
}

/// A non-OK status reported by the engine.
///
/// This is how engine-side failures reach the consumer: a rejected delivery, or a failed
/// synchronous accessor. It is never treated as fatal by this crate and is never retried
/// automatically.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
#[error("{code}")]
pub struct EngineError {
    code: ErrorCode,
}

impl EngineError {
    /// Creates an error for a non-OK status code.
    ///
    /// # Panics
    ///
    /// Panics if `code` is [`ErrorCode::Ok`], which does not describe an error.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        assert!(!code.is_ok(), "an OK status is not an engine error");

        Self { code }
    }

    /// The status code reported by the engine.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }
}

/// The consumer used a future context or listener in a way its state machine does not allow.
///
/// These are programming errors. They are reported synchronously, at the call that violated the
/// contract, and leave the shared state untouched.
#[derive(Clone, Copy, Debug, Eq, Error, Hash, PartialEq)]
#[non_exhaustive]
pub enum UsageError {
    /// An operation is already armed; its result must be awaited (or the context stopped)
    /// before it can be armed again.
    #[error("an operation is already armed and its result has not been delivered")]
    AlreadyArmed,

    /// There is no armed operation to await.
    #[error("no operation is armed")]
    NotArmed,

    /// The future context or listener has been stopped and cannot be used any more.
    #[error("the operation has been stopped")]
    Stopped,

    /// No occurrence is available: none was delivered yet, the last delivery failed or the
    /// occurrence was invalidated by a rearm.
    #[error("no current occurrence; it was never delivered or has been invalidated by a rearm")]
    NoOccurrence,

    /// The operation has not completed successfully, so its output cannot be retrieved.
    #[error("the operation has not completed successfully")]
    NotCompleted,
}

/// Errors returned by the public API of this crate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The engine reported a failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The API was used in violation of its state machine.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// Device options failed validation before reaching the engine.
    #[error("invalid device options: '{field}' {problem}")]
    InvalidOptions {
        /// The option that was rejected.
        field: &'static str,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// An argument could not be translated into something the engine understands.
    #[error("invalid argument '{argument}': {problem}")]
    InvalidArgument {
        /// The argument that was rejected.
        argument: &'static str,

        /// A human-readable description of the problem.
        problem: String,
    },
}

impl Error {
    /// The engine status code, if this error originated from the engine.
    #[must_use]
    pub fn engine_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Engine(e) => Some(e.code()),
            _ => None,
        }
    }

    /// The usage violation, if this error is one.
    #[must_use]
    pub fn usage(&self) -> Option<UsageError> {
        match self {
            Self::Usage(e) => Some(*e),
            _ => None,
        }
    }
}

/// A specialized `Result` type for this crate, returning [`Error`] as the error value.
pub type Result<T> = std::result::Result<T, Error>;
