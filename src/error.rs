use std::fmt;

#[derive(Debug)]
#[allow(dead_code)]
pub enum ProxyCtlError {
    NotFound(String),
    Validation(String),
    Renewal { domains: Vec<String>, cause: String },
    Expired(String),
    LockNotAcquired(String),
    Subprocess { command: String, output: String },
    TransientDb(String),
    Db(sqlx::Error),
    Io(std::io::Error),
}

impl fmt::Display for ProxyCtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyCtlError::NotFound(what) => write!(f, "not found: {}", what),
            ProxyCtlError::Validation(msg) => write!(f, "validation error: {}", msg),
            ProxyCtlError::Renewal { domains, cause } => {
                write!(f, "renewal failed for [{}]: {}", domains.join(";"), cause)
            }
            ProxyCtlError::Expired(what) => write!(f, "expired: {}", what),
            ProxyCtlError::LockNotAcquired(name) => write!(f, "lock not acquired: {}", name),
            ProxyCtlError::Subprocess { command, output } => {
                write!(f, "subprocess error running {}: {}", command, output)
            }
            ProxyCtlError::TransientDb(msg) => write!(f, "transient db error: {}", msg),
            ProxyCtlError::Db(e) => write!(f, "db error: {}", e),
            ProxyCtlError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for ProxyCtlError {}

impl From<sqlx::Error> for ProxyCtlError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                ProxyCtlError::TransientDb(e.to_string())
            }
            _ => ProxyCtlError::Db(e),
        }
    }
}

impl From<std::io::Error> for ProxyCtlError {
    fn from(e: std::io::Error) -> Self {
        ProxyCtlError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ProxyCtlError>;

/// HTTP status mapping lives here, at the boundary consuming the error taxonomy,
/// not on the error type itself.
pub fn http_status(err: &ProxyCtlError) -> u16 {
    match err {
        ProxyCtlError::NotFound(_) => 404,
        ProxyCtlError::Validation(_) => 400,
        ProxyCtlError::Renewal { .. } => 500,
        ProxyCtlError::Expired(_) => 410,
        ProxyCtlError::LockNotAcquired(_) => 500,
        ProxyCtlError::Subprocess { .. } => 500,
        ProxyCtlError::TransientDb(_) => 503,
        ProxyCtlError::Db(_) => 500,
        ProxyCtlError::Io(_) => 500,
    }
}
