use thiserror::Error;

/// Store-level failures. Only ever raised at startup (schema open/migrate)
/// or when SQLite itself misbehaves mid-run — lookups that simply find
/// nothing (`UnknownMapping` in spec.md §7) return `Option`/`bool`, never
/// this type.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
