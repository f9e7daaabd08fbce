//! Error types shared across the crate.
//!
//! Only configuration and I/O problems surface as errors. Proposals that leave
//! a parameter's support are rejections inside the chain, never errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodivError {
    /// Malformed priors, inconsistent fixed partitions, unknown operators.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A state log that cannot be read back into a model state.
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

pub type Result<T> = std::result::Result<T, CodivError>;

impl CodivError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }
}
