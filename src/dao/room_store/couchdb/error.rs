//! Error types of the CouchDB room store.

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias for CouchDB store operations.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while interacting with CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// A required environment variable is not set.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// The HTTP client could not be built.
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The database lookup request could not be sent.
    #[error("failed to query CouchDB database `{database}`")]
    DatabaseQuery {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// Creating the rooms database failed.
    #[error("failed to create CouchDB database `{database}`")]
    DatabaseCreate {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// The database lookup answered with an unexpected status.
    #[error("unexpected CouchDB database response status {status} for `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// A document request could not be sent.
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// A document request answered with an unexpected status.
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// A response body did not match the expected document shape.
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
}
