// src/config.rs
//! Tunables for the texture cache, separated from the cache logic itself so
//! callers can build one without reaching into `TextureCache`'s internals.

use std::path::PathBuf;

/// Configuration for a [`crate::cache::TextureCache`].
#[derive(Debug, Clone)]
pub struct TextureCacheConfig {
    /// Number of frames the GPU may have in flight. Governs the LRU floor
    /// (`min_max_age = 2 * pipeline_depth`, §4.3).
    pub pipeline_depth: u64,
    /// Whether replacements are substituted at all; `use_texture`'s `replaced`
    /// flag is forced `false` when this is off even if a slot has one attached.
    pub replacements_enabled: bool,
    /// Emit `.tmem`/`.tile.json`/`.rice.*` dump sidecars next to uploads.
    /// Only takes effect when the crate is built with the `dump` feature.
    pub dump_enabled: bool,
    /// Directory dump sidecars are written to when `dump_enabled` is set.
    pub dump_directory: PathBuf,
}

impl Default for TextureCacheConfig {
    fn default() -> Self {
        Self {
            pipeline_depth: 2,
            replacements_enabled: true,
            dump_enabled: false,
            dump_directory: PathBuf::from("./dump"),
        }
    }
}

impl TextureCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// `min_max_age` from §4.3: twice the worst-case pipelined frame depth.
    #[inline]
    pub fn min_max_age(&self) -> u64 {
        self.pipeline_depth.saturating_mul(2)
    }

    pub fn with_pipeline_depth(mut self, depth: u64) -> Self {
        self.pipeline_depth = depth;
        self
    }

    pub fn with_replacements_enabled(mut self, enabled: bool) -> Self {
        self.replacements_enabled = enabled;
        self
    }

    pub fn with_dump_enabled(mut self, enabled: bool) -> Self {
        self.dump_enabled = enabled;
        self
    }

    pub fn with_dump_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dump_directory = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_age_is_twice_pipeline_depth() {
        let cfg = TextureCacheConfig::new().with_pipeline_depth(2);
        assert_eq!(cfg.min_max_age(), 4);
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = TextureCacheConfig::default();
        assert!(cfg.replacements_enabled);
        assert!(!cfg.dump_enabled);
    }
}
