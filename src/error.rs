//! Error types for the session and push-source layers.
//!
//! Nothing in the data path returns these: bad payloads, missing data and
//! dropped connections are recorded in the session state instead. These only
//! cover lifecycle misuse and failure to set up a subscription.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Invalid source address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Source is shut down")]
    Closed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session was stopped; create a new session to start again")]
    Terminated,

    #[error("Subscription failed: {0}")]
    Subscribe(#[from] SourceError),
}
