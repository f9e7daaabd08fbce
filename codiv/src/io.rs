//! Reading and writing sampled states.

pub mod state_log;

pub use state_log::{StateLogWriter, header, read_last_state};
