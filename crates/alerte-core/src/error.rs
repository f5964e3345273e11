use thiserror::Error;

/// Maximum length for request URLs in error messages
const MAX_ERROR_URL_LENGTH: usize = 200;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request to {url} failed with status {status}")]
    Status { status: u16, url: String },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable for {0}")]
    Unreachable(String),
}

impl NetworkError {
    /// Truncate a URL to avoid logging excessive data (data: URLs, long queries)
    fn truncate_url(url: &str) -> String {
        if url.len() <= MAX_ERROR_URL_LENGTH {
            url.to_string()
        } else {
            let mut end = MAX_ERROR_URL_LENGTH;
            while !url.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &url[..end], url.len())
        }
    }

    pub fn from_status(status: u16, url: &str) -> Self {
        NetworkError::Status {
            status,
            url: Self::truncate_url(url),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache storage I/O failed ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry is corrupt ({context}): {source}")]
    Corrupt {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn corrupt(context: impl Into<String>, source: serde_json::Error) -> Self {
        StorageError::Corrupt {
            context: context.into(),
            source,
        }
    }
}

/// A manifest entry could not be fetched while installing a generation.
#[derive(Error, Debug)]
#[error("Failed to fetch manifest entry {path}: {source}")]
pub struct ManifestFetchError {
    pub path: String,
    #[source]
    pub source: NetworkError,
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    ManifestFetch(#[from] ManifestFetchError),

    #[error("Failed to store cache generation: {0}")]
    Storage(#[from] StorageError),
}

/// Deleting a superseded generation failed. Never fatal to activation.
#[derive(Error, Debug)]
#[error("Failed to delete cache generation {generation}: {source}")]
pub struct CleanupError {
    pub generation: String,
    #[source]
    pub source: StorageError,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Offline fallback page {path} is not cached (network failed: {source})")]
    FallbackMissing {
        path: String,
        #[source]
        source: NetworkError,
    },
}

/// The host rejected one of the effects the agent asked for.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Host rejected {effect}: {reason}")]
    Rejected { effect: &'static str, reason: String },

    #[error("Window client not found: {0}")]
    UnknownClient(String),
}

impl HostError {
    pub fn rejected(effect: &'static str, reason: impl Into<String>) -> Self {
        HostError::Rejected {
            effect,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Install failed: {0}")]
    Install(#[from] InstallError),

    #[error("Activation failed: {0}")]
    Activate(#[from] StorageError),

    #[error("Fetch failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Host(#[from] HostError),
}
