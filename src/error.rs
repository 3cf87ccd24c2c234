//! Error types for shellgpt.
//!
//! One enum covers the transport, the completion engine, the response cache,
//! the chat-session store, and the role store. Only [`Error::Validation`] is a
//! usage error; the binary maps it to exit status 2.

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

type Source = Option<Arc<dyn error::Error + Send + Sync>>;

/// The main error type for shellgpt.
#[derive(Clone, Debug)]
pub enum Error {
    /// The endpoint answered with a status no other variant covers.
    Api {
        /// HTTP status code.
        status: u16,
        /// The `error.type` field of the response body, when present.
        kind: Option<String>,
        message: String,
        /// Value of the `x-request-id` response header.
        request_id: Option<String>,
    },

    /// The API key is missing or was refused (401/403).
    Authentication { message: String },

    /// A model, role, or chat that does not exist.
    NotFound {
        message: String,
        /// What was looked up: "model", "role".
        what: &'static str,
    },

    /// The request itself was rejected (400).
    BadRequest {
        message: String,
        /// Offending request field, as reported by the endpoint.
        param: Option<String>,
    },

    /// Rate limited or overloaded (429, 502-504).
    Unavailable {
        status: u16,
        message: String,
        /// Seconds from the `retry-after` header.
        retry_after: Option<u64>,
    },

    /// No answer within the configured request timeout.
    Timeout { message: String },

    /// The endpoint could not be reached.
    Connection { message: String, source: Source },

    /// Any other failure inside the HTTP client.
    HttpClient { message: String, source: Source },

    /// A body, chunk, session, role, or config file did not (de)serialize.
    Serialization { message: String, source: Source },

    /// Streamed bytes were not valid UTF-8.
    Encoding { message: String, source: Source },

    /// The response stream broke off.
    Streaming { message: String, source: Source },

    /// Local file-system failure outside the cache.
    Io {
        message: String,
        source: Arc<io::Error>,
    },

    /// The configured base URL does not parse.
    Url {
        message: String,
        source: Option<url::ParseError>,
    },

    /// Invalid user input: incompatible flags, missing prompt, role mismatch.
    Validation {
        message: String,
        /// The command-line option at fault.
        param: Option<String>,
    },

    /// The on-disk response cache could not be read or written.
    ///
    /// Cache faults never invalidate an answer that was already computed.
    Cache {
        message: String,
        source: Option<Arc<io::Error>>,
    },

    /// A model-requested function could not be resolved or executed.
    Function { message: String, name: String },
}

impl Error {
    pub fn api(
        status: u16,
        kind: Option<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Error::Api {
            status,
            kind,
            message: message.into(),
            request_id,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    pub fn not_found(what: &'static str, message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
            what,
        }
    }

    pub fn bad_request(message: impl Into<String>, param: Option<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
            param,
        }
    }

    pub fn unavailable(status: u16, message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::Unavailable {
            status,
            message: message.into(),
            retry_after,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Error::Timeout {
            message: message.into(),
        }
    }

    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn streaming(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Streaming {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    pub fn cache(message: impl Into<String>, source: Option<io::Error>) -> Self {
        Error::Cache {
            message: message.into(),
            source: source.map(Arc::new),
        }
    }

    pub fn function(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Function {
            message: message.into(),
            name: name.into(),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// True for local response-cache faults, which callers log and skip.
    pub fn is_cache(&self) -> bool {
        matches!(self, Error::Cache { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Error::Function { .. })
    }

    /// Process exit status for this error: 2 for usage errors, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_validation() { 2 } else { 1 }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Api {
                status,
                kind,
                message,
                request_id,
            } => {
                write!(f, "API error {status}")?;
                if let Some(kind) = kind {
                    write!(f, " ({kind})")?;
                }
                write!(f, ": {message}")?;
                if let Some(request_id) = request_id {
                    write!(f, " [request {request_id}]")?;
                }
                Ok(())
            }
            Error::Authentication { message } => write!(f, "Authentication failed: {message}"),
            Error::NotFound { message, what } => write!(f, "Unknown {what}: {message}"),
            Error::BadRequest { message, param } => match param {
                Some(param) => write!(f, "Request rejected: {message} (field: {param})"),
                None => write!(f, "Request rejected: {message}"),
            },
            Error::Unavailable {
                status,
                message,
                retry_after,
            } => match retry_after {
                Some(secs) => write!(
                    f,
                    "Service unavailable ({status}): {message}; retry in {secs}s"
                ),
                None => write!(f, "Service unavailable ({status}): {message}"),
            },
            Error::Timeout { message } => write!(f, "Timed out: {message}"),
            Error::Connection { message, .. } => write!(f, "Connection error: {message}"),
            Error::HttpClient { message, .. } => write!(f, "HTTP client error: {message}"),
            Error::Serialization { message, .. } => write!(f, "Serialization error: {message}"),
            Error::Encoding { message, .. } => write!(f, "Encoding error: {message}"),
            Error::Streaming { message, .. } => write!(f, "Streaming error: {message}"),
            Error::Io { message, .. } => write!(f, "I/O error: {message}"),
            Error::Url { message, .. } => write!(f, "URL error: {message}"),
            Error::Validation { message, param } => match param {
                Some(param) => write!(f, "Error: {message} (option: {param})"),
                None => write!(f, "Error: {message}"),
            },
            Error::Cache { message, .. } => write!(f, "Cache error: {message}"),
            Error::Function { message, name } => write!(f, "Function error ({name}): {message}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. }
            | Error::HttpClient { source, .. }
            | Error::Serialization { source, .. }
            | Error::Encoding { source, .. }
            | Error::Streaming { source, .. } => source
                .as_deref()
                .map(|e| e as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source.as_ref() as &(dyn error::Error + 'static)),
            Error::Url { source, .. } => source.as_ref().map(|e| e as &(dyn error::Error + 'static)),
            Error::Cache { source, .. } => source
                .as_deref()
                .map(|e| e as &(dyn error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("YAML error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

/// A specialized Result type for shellgpt operations.
pub type Result<T> = std::result::Result<T, Error>;
