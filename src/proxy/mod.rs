pub mod forwarder;
pub mod tee;

pub use tee::{shared_accumulator, BodyAccumulator, SharedAccumulator, TeeStream};
