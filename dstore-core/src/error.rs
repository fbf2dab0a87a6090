use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid key path: {0}")]
    InvalidKeyPath(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid transaction state: {0}")]
    InvalidTransactionState(String),

    #[error("Mutation conflict: {0}")]
    MutationConflict(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl Error {
    /// Returns a stable error code for this error variant.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidKeyPath(_) => "INVALID_KEY_PATH",
            Error::InvalidValue(_) => "INVALID_VALUE",
            Error::InvalidQuery(_) => "INVALID_QUERY",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::InvalidTransactionState(_) => "INVALID_TRANSACTION_STATE",
            Error::MutationConflict(_) => "MUTATION_CONFLICT",
            Error::Transport(_) => "TRANSPORT_ERROR",
        }
    }

    /// Returns true if the error was raised by local validation and the
    /// request never reached the store.
    pub fn is_local(&self) -> bool {
        match self {
            Error::InvalidKeyPath(_) => true,
            Error::InvalidValue(_) => true,
            Error::InvalidQuery(_) => true,
            Error::InvalidConfig(_) => true,
            Error::InvalidTransactionState(_) => true,

            Error::MutationConflict(_) => false,
            Error::Transport(_) => false,
        }
    }

    /// Returns true if a caller may reasonably re-issue the same request.
    ///
    /// The client never retries on its own; conflicts in particular must be
    /// handled by the caller because re-sending a commit can double-apply it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Prefixes the message with operation context, keeping the variant.
    pub fn with_context(self, context: &str) -> Error {
        match self {
            Error::InvalidKeyPath(msg) => Error::InvalidKeyPath(format!("{}: {}", context, msg)),
            Error::InvalidValue(msg) => Error::InvalidValue(format!("{}: {}", context, msg)),
            Error::InvalidQuery(msg) => Error::InvalidQuery(format!("{}: {}", context, msg)),
            Error::InvalidConfig(msg) => Error::InvalidConfig(format!("{}: {}", context, msg)),
            Error::InvalidTransactionState(msg) => {
                Error::InvalidTransactionState(format!("{}: {}", context, msg))
            }
            Error::MutationConflict(msg) => Error::MutationConflict(format!("{}: {}", context, msg)),
            Error::Transport(msg) => Error::Transport(format!("{}: {}", context, msg)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
