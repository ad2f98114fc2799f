pub mod llm;
pub mod record;
pub mod redact;
pub mod store;
pub mod tags;

pub use record::{BodyKind, CaptureRecord, CapturedRequest, CapturedResponse, ListFilter};
pub use store::CaptureStore;
pub use tags::FlowTags;
