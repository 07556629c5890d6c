// Event pipeline: fetching, normalization and dedup, storage, run orchestration

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod storage;

pub use orchestrator::{RunCoordinator, RunSettings};
