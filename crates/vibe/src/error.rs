//! Error types for the component library
//!
//! DOM, HTTP and JSON failures pass through via `#[from]`; mount and
//! context failures are this crate's own.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, VibeError>;

#[derive(Debug, Error)]
pub enum VibeError {
    #[error("DOM error: {0}")]
    Dom(#[from] dom::DomError),

    #[error("Whoops! could not mount to {target} element after {attempts} attempts")]
    MountTargetNotFound { target: String, attempts: u32 },

    #[error("Element {0} was never rendered")]
    NotMounted(dom::NodeId),

    #[error("Context was torn down")]
    Closed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
