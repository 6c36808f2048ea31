use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to insert room `{code}`")]
    InsertRoom {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load room `{code}`")]
    LoadRoom {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write room `{code}`")]
    WriteRoom {
        code: String,
        #[source]
        source: MongoError,
    },
}

/// Whether `err` reports a unique index violation.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}
