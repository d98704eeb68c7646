use thiserror::Error;

/// Error taxonomy for the question-answering core.
///
/// Every fallible operation in the pipeline surfaces one of these variants;
/// the binary maps any of them to a non-zero exit code.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Caller-supplied input is unusable (empty question, blank scope).
    #[error("validation error: {0}")]
    Validation(String),

    /// An external service call (embedding, chat completion, store) failed
    /// after any configured retries.
    #[error("{service} call failed: {detail}")]
    Upstream {
        service: &'static str,
        detail: String,
    },

    /// A required foreign-key dereference during fact serialization found
    /// nothing; the offending row is named for diagnosis.
    #[error("broken reference in {table} row {row_id}: {detail}")]
    DataIntegrity {
        table: String,
        row_id: String,
        detail: String,
    },

    /// Reading or writing locally persisted state failed.
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CoreError {
    pub fn upstream<E: std::fmt::Display>(service: &'static str, err: E) -> Self {
        CoreError::Upstream {
            service,
            detail: err.to_string(),
        }
    }

    pub fn persistence<E: std::fmt::Display>(err: E) -> Self {
        CoreError::Persistence(err.to_string())
    }

    /// Append provenance (e.g. "table=x row=y") to the error detail so a
    /// failure deep in the pipeline still names the row that caused it.
    pub fn annotate(self, context: &str) -> Self {
        match self {
            CoreError::Upstream { service, detail } => CoreError::Upstream {
                service,
                detail: format!("{detail} ({context})"),
            },
            CoreError::Persistence(detail) => {
                CoreError::Persistence(format!("{detail} ({context})"))
            }
            other => other,
        }
    }
}
