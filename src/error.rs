use crate::models::HierarchyViolation;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Database,
    Forbidden,
    Integrity,
    InvalidInput,
    NotFound,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub violation: Option<HierarchyViolation>,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn database(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Database,
            code: "database_error",
            public,
            violation: None,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            violation: None,
            source,
        }
    }

    pub fn forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Forbidden,
            code: "forbidden",
            public,
            violation: None,
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            violation: None,
            source,
        }
    }

    /// Rejection of a requested change, classified by the violation itself.
    pub fn from_violation(violation: HierarchyViolation, source: anyhow::Error) -> Self {
        Self {
            kind: violation.kind(),
            code: violation.error_code(),
            public: violation.public_message(),
            violation: Some(violation),
            source,
        }
    }

    /// Stored data already breaks a hierarchy invariant. Never retried.
    pub fn integrity(violation: HierarchyViolation, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Integrity,
            code: violation.error_code(),
            public: violation.public_message(),
            violation: Some(violation),
            source,
        }
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.public, self.code, self.source)
    }
}

impl std::error::Error for LibError {}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for LibError {
    fn from(value: sqlx::Error) -> Self {
        Self::database("Database request failed", anyhow::Error::new(value))
    }
}
