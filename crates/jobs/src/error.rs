use {
    thiserror::Error,
    trawl_browser::{BrowserError, ResourceType},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{resource_type} queue is full ({depth} jobs pending)")]
    QueueFull {
        resource_type: ResourceType,
        depth: usize,
    },

    #[error("{resource_type} queue is closed")]
    QueueClosed { resource_type: ResourceType },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("all {permits} browser sessions are busy")]
    Saturated { permits: usize },

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl Error {
    /// The client sent something unusable, as opposed to the service being
    /// unavailable.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
