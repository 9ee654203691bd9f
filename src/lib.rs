// src/lib.rs
//! Content-addressed texture cache for a graphics-emulation backend: hashes
//! incoming tile-memory uploads, batches them through an async GPU pipeline,
//! resolves on-disk replacement assets, and evicts cold entries under a
//! frame-aged LRU (see each module's doc comment for its slice of this).

pub mod cache;
pub mod config;
pub mod context;
pub mod dds;
#[cfg(feature = "dump")]
pub mod dump;
pub mod error;
pub mod fingerprint;
pub mod gpu;
pub mod replacement;
pub mod rice_hash;
pub mod texture_map;
pub mod upload_pipeline;

pub use cache::TextureCache;
pub use config::TextureCacheConfig;
pub use error::{Error, Result};
pub use fingerprint::{ClutMode, FingerprintEngine, LoadTile, PixelFormat, PixelSize};
pub use gpu::{GpuBackend, GpuScope, NullGpuBackend};
pub use texture_map::{Scale2f, TextureIndex};
