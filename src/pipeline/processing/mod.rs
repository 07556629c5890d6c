// Per-event processing: normalize, validate, dedup, upsert into the catalog

pub mod catalog;
pub mod dedup;
pub mod normalize;
pub mod quality_gate;
