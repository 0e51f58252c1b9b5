//! Error types for user lookup and persistence.

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The identifier is not a canonical 128-bit token.
    #[error("invalid user id: {0}")]
    InvalidId(String),

    /// A field value the policy checks could not interpret.
    #[error("invalid field: {0}")]
    InvalidField(String),

    #[error("user not found")]
    NotFound,

    /// An insert collided with an existing identifier.
    #[error("user already exists: {0}")]
    AlreadyExists(String),

    /// Store or cache failure (database, network, ...).
    #[error("backend error: {0}")]
    Backend(String),

    /// A cached value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl AuthError {
    /// Create a backend error from any error type.
    #[inline]
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<bincode::Error> for AuthError {
    fn from(err: bincode::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

#[cfg(feature = "sql")]
impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::AlreadyExists(db.message().to_string())
            }
            _ => Self::Backend(err.to_string()),
        }
    }
}
