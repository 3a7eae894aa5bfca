pub mod bitmap;

use serde::{Deserialize, Serialize};

/// Error envelope used by all non-2xx HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
}
