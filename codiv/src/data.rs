pub mod partition;

pub use partition::{Event, EventPartition};
