#![forbid(unsafe_code)]

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Json(serde_json::Error),
    InvalidInput(&'static str),
    NotFound {
        entity: &'static str,
        id: String,
    },
    NotActive {
        session_id: String,
        status: &'static str,
    },
    SchemaMismatch {
        session_version: i64,
        current_version: i64,
    },
    CorruptSession {
        session_id: String,
        reason: String,
    },
}

impl StorageError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Sql(_) | Self::Json(_) => "INTERNAL",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NotActive { .. } => "NOT_ACTIVE",
            Self::SchemaMismatch { .. } => "SCHEMA_MISMATCH",
            Self::CorruptSession { .. } => "CORRUPT_SESSION",
        }
    }

    /// Whether a retry may succeed without changing inputs. Lock contention
    /// and busy handlers qualify; everything else does not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sql(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::NotActive { session_id, status } => {
                write!(f, "session {session_id} is not active (status={status})")
            }
            Self::SchemaMismatch {
                session_version,
                current_version,
            } => write!(
                f,
                "session schema version {session_version} is newer than current {current_version}"
            ),
            Self::CorruptSession { session_id, reason } => {
                write!(f, "corrupt session {session_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
