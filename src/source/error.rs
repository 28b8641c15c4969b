use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to build HTTP client")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to decode response body from {0}")]
    Decode(String, #[source] reqwest::Error),

    #[error("Malformed observation payload: {0}")]
    MalformedPayload(String),

    #[error("Observation source unavailable: {0}")]
    Unavailable(String),
}
