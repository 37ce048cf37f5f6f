use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    UnknownPath,
    ConfigInvalid(String),
    ConfigSource(String),
    Http(reqwest::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::UnknownPath => write!(f, "no mount point matched"),
            ProxyError::ConfigInvalid(msg) => write!(f, "invalid configuration: {}", msg),
            ProxyError::ConfigSource(msg) => write!(f, "config source error: {}", msg),
            ProxyError::Http(e) => write!(f, "http error: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {}
