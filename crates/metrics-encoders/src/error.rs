//! Error types shared by every encoder

use metrics_retry::Classification;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors an encoder or its transport call can raise. Classified so the
/// retry engine can tell a transient delivery failure from one that will
/// never succeed on retry.
#[derive(Error, Debug)]
pub enum Error {
    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("transport request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("aws cloudwatch request failed: {0}")]
    CloudWatch(String),
}

impl metrics_retry::Classify for Error {
    fn classify(&self) -> Classification {
        match self {
            Error::Encode(_) => Classification::Fatal,
            Error::Transport(e) => {
                if e.is_timeout() || e.is_connect() {
                    Classification::Transient
                } else {
                    Classification::Fatal
                }
            }
            Error::Rejected { status, .. } => match *status {
                429 | 500..=599 => Classification::Transient,
                _ => Classification::Fatal,
            },
            Error::CloudWatch(_) => Classification::Transient,
        }
    }
}
