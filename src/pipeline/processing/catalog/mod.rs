// Catalog writes: idempotent upsert with venue, slug, series and image bookkeeping

pub mod upsert;

pub use upsert::{UpsertEngine, UpsertOutcome};
