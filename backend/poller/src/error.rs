use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Sync returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed sync payload: {0}")]
    Malformed(String),
}
