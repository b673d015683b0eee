use thiserror::Error;

/// Errors reported by the engine.
///
/// Everything except [`EngineError::Database`] and [`EngineError::Pool`] is
/// a domain outcome: the transaction it arose in has been rolled back and
/// the caller can relay the message to the offending user as-is.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("not enough unused titles: need {needed}, have {available}")]
    InsufficientTitles { needed: usize, available: usize },

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Invalid(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        EngineError::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }

    /// Whether retrying the same call could succeed. Only infrastructure
    /// failures qualify; the domain outcomes are final.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Database(_) | EngineError::Pool(_))
    }
}

#[cfg(test)]
mod test {
    use super::EngineError;

    #[test]
    fn test_transient_split() {
        assert!(
            EngineError::Database(diesel::result::Error::RollbackTransaction)
                .is_transient()
        );
        assert!(!EngineError::conflict("a round is running").is_transient());
        assert!(!EngineError::InsufficientTitles {
            needed: 3,
            available: 1
        }
        .is_transient());
    }
}
