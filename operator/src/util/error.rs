#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("Invalid cron expression: {source}")]
    Cron {
        #[from]
        source: cron::error::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

/// The error taxonomy spec.md §7 requires, applied as a classification on
/// top of any underlying [`Error`] rather than as new `Error` variants --
/// the same underlying error can be retryable in one caller's context and
/// not in another's (a 409 on create usually means "already exists, next
/// sync will converge"; the same 409 on a status patch means "someone else
/// changed it, refetch and retry now").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    NonRetryable,
    WaitForNextSync,
}

#[derive(Debug)]
pub struct ClassifiedError {
    pub class: ErrorClass,
    pub error: Error,
}

impl ClassifiedError {
    pub fn retryable(error: impl Into<Error>) -> Self {
        Self {
            class: ErrorClass::Retryable,
            error: error.into(),
        }
    }

    pub fn non_retryable(error: impl Into<Error>) -> Self {
        Self {
            class: ErrorClass::NonRetryable,
            error: error.into(),
        }
    }

    pub fn wait_for_next_sync(error: impl Into<Error>) -> Self {
        Self {
            class: ErrorClass::WaitForNextSync,
            error: error.into(),
        }
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Classifies a raw `kube::Error` the way every rewriter in the
/// transformation pipeline does (spec.md §4.3 "Error categorization").
pub fn classify_kube_error(err: &kube::Error) -> ErrorClass {
    match err {
        kube::Error::Api(resp) => match resp.code {
            409 => ErrorClass::WaitForNextSync,
            422 | 400 | 403 => ErrorClass::NonRetryable,
            _ => ErrorClass::Retryable,
        },
        _ => ErrorClass::Retryable,
    }
}

/// Classifies an already-converted [`Error`], used by callers (PVC transfer
/// retries, spec.md §4.4.5) that only see the unwrapped error type.
pub fn classify_error(err: &Error) -> ErrorClass {
    match err {
        Error::Kube { source } => classify_kube_error(source),
        Error::UserInput(_) => ErrorClass::NonRetryable,
        _ => ErrorClass::Retryable,
    }
}
