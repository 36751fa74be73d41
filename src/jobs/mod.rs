//! Asynchronous traversal jobs: the store, the home context that owns the
//! graph, the dispatch pool, and chunked retrieval of finished payloads.

pub mod chunk;
pub mod home;
pub mod scheduler;
pub mod store;

pub use chunk::{ChunkWindow, Payload, HARD_MAX_LIMIT};
pub use home::{HomeContext, HomeHandle};
pub use scheduler::{DispatchPool, JobOutcome, JobScheduler, TraversalRequest};
pub use store::{Clock, JobRecord, JobStatus, JobStore};
