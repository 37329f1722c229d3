pub mod classifier;
pub mod retention;
pub mod service;

pub use classifier::{Classification, ContextInfo, QueryClass, QueryClassifier};
pub use retention::{RetentionController, RetentionCounters};
pub use service::{
    DeleteOutcome, ListPayload, MemoryService, RequestContext, RetrieveOutcome, SearchPayload,
    SearchResult, StoreOutcome, StorePayload, Timings, UpdatePayload,
};
