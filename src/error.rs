use thiserror::Error;

/// Failure taxonomy for the screening pipeline.
///
/// Configuration problems are fatal at construction and propagate to the
/// caller. Schema problems are fatal to the table or hazard they name;
/// sibling units keep running. Database and HTTP errors are operation
/// scoped: the failed operation reports, the caller decides what continues.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("table not found ({0})")]
    MissingTable(String),

    #[error("column not found ({table}.{column})")]
    MissingColumn { table: String, column: String },

    #[error("could not determine spatial reference for {table}.{column}")]
    UnknownSrid { table: String, column: String },

    #[error("threshold '{threshold}' is not a member of the value order for hazard field {field}")]
    ThresholdNotInOrder { field: String, threshold: String },

    #[error("value '{0}' is not numeric")]
    NotNumeric(String),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("database error: {0}")]
    Db(#[from] tokio_postgres::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collection failed: {0}")]
    Collection(String),
}

impl Error {
    /// Schema-class errors: the unit they name cannot make progress, so
    /// its remaining stages are aborted. Everything else is operation
    /// scoped and the pipeline moves on to the next stage.
    pub fn is_schema(&self) -> bool {
        match self {
            Self::MissingTable(_) | Self::MissingColumn { .. } | Self::UnknownSrid { .. } => true,
            Self::Db(db) => matches!(
                db.code(),
                Some(code)
                    if *code == tokio_postgres::error::SqlState::UNDEFINED_TABLE
                        || *code == tokio_postgres::error::SqlState::UNDEFINED_COLUMN
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
