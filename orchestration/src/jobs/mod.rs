//! Job Store & Chunk Executor
//!
//! Job lifecycle for the chunked strategy: records, the repository seam with
//! its process-local and shared-store backends, and the executor that drives
//! chunks through the remote analyzer.

pub mod executor;
pub mod kv;
pub mod memory;
pub mod repository;
pub mod types;

pub use executor::{ChunkExecutor, ChunkStep};
pub use kv::{KvJobRepository, KvStoreConfig};
pub use memory::InMemoryJobRepository;
pub use repository::{JobRepository, SharedJobRepository, StoreError, StoreResult};
pub use types::{
    ChunkError, ChunkLease, ChunkResult, Claim, Job, JobCreated, JobSnapshot, JobStatus, Progress,
};
