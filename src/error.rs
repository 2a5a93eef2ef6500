//! # Errors
//!
//! Error type for the fallible edges of the compiler. Extraction, template
//! generation and verification are total and never produce these; they only
//! surface from the external generation path and settings loading.

use thiserror::Error;

/// Errors raised outside the total core pipeline
#[derive(Error, Debug)]
pub enum AgcError {
    /// The external generator could not produce a response
    #[error("external generation failed: {0}")]
    ExternalGeneration(String),

    /// Transport failure talking to the external generator
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The external generator answered, but not with usable code
    #[error("invalid generator response: {0}")]
    InvalidResponse(String),

    /// A required credential is not present in the environment
    #[error("missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    /// Generator settings could not be parsed
    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgcError>;
