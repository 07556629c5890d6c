// Adapters to systems outside the pipeline

pub mod asset_store;

pub use asset_store::{AssetStore, FsAssetStore};
