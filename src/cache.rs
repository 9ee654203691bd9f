// src/cache.rs
//! `TextureCache`: the public facade combining `UploadPipeline`, `TextureMap`,
//! and `ReplacementMap` behind the two-mutex discipline and lock-counted
//! deferred-destroy protocol (§4.5, §5).

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::TextureCacheConfig;
use crate::context::Context;
use crate::error::Result;
use crate::fingerprint::{ClutMode, LoadTile};
use crate::gpu::GpuBackend;
use crate::replacement::ReplacementTexture;
use crate::texture_map::{Scale2f, TextureEntry, TextureIndex, UseResult};
use crate::upload_pipeline::{SharedMaps, UploadPipeline, UploadRecord};

/// Public surface listed in §6 "Facade methods".
pub struct TextureCache<B: GpuBackend + 'static> {
    config: TextureCacheConfig,
    maps: Arc<Mutex<SharedMaps>>,
    pipeline: UploadPipeline<B>,
    lock_counter: AtomicU32,
}

impl<B: GpuBackend + 'static> TextureCache<B> {
    pub fn new(backend: B, config: TextureCacheConfig) -> Self {
        let maps = Arc::new(Mutex::new(SharedMaps::new(config.min_max_age())));
        maps.lock().textures.set_replacements_enabled(config.replacements_enabled);
        let pipeline = UploadPipeline::new(Arc::new(backend), maps.clone(), config.clone());
        Self { config, maps, pipeline, lock_counter: AtomicU32::new(0) }
    }

    pub fn config(&self) -> &TextureCacheConfig {
        &self.config
    }

    /// §6 `queue_upload`.
    #[allow(clippy::too_many_arguments)]
    pub fn queue_upload(
        &self,
        fingerprint: u64,
        creation_frame: u64,
        tmem_bytes: Vec<u8>,
        width: u16,
        height: u16,
        clut_mode: ClutMode,
        load_tile: LoadTile,
    ) {
        self.pipeline.queue_upload(UploadRecord {
            fingerprint,
            creation_frame,
            tmem_bytes,
            width,
            height,
            clut_mode,
            load_tile,
        });
    }

    /// §6 `flush`.
    pub fn flush(&self) {
        self.pipeline.flush();
    }

    /// §6 `use_texture`.
    pub fn use_texture(&self, fingerprint: u64, frame: u64) -> UseResult {
        self.maps.lock().textures.use_texture(fingerprint, frame)
    }

    /// §6 `use_index`: convenience wrapper returning just the hit flag and
    /// index.
    pub fn use_index(&self, fingerprint: u64, frame: u64) -> (bool, TextureIndex) {
        let result = self.use_texture(fingerprint, frame);
        (result.found, result.index)
    }

    /// §6 `add_replacement`: synchronous GPU upload for a single path.
    pub fn add_replacement(&self, fingerprint: u64, relative_path: &str) -> Result<bool> {
        let mut guard = self.maps.lock();
        let Some(full_path) = guard.replacements.full_path(relative_path) else {
            return Ok(false);
        };
        let bytes = std::fs::read(&full_path).with_context(|| format!("reading {}", full_path.display()))?;
        guard.replacements.load_from_bytes(fingerprint, relative_path, &bytes)?;
        if let Some(entry) = guard.replacements.loaded_entry(fingerprint).cloned() {
            guard.textures.replace(fingerprint, entry);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// §6 `load_replacement_directory`. Matches the original
    /// `TextureCache::loadReplacementDirectory`: drop every currently loaded
    /// replacement before reading the new directory, then requeue every
    /// resident fingerprint so the worker re-detects replacements against the
    /// freshly loaded database.
    pub fn load_replacement_directory(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut guard = self.maps.lock();
        guard.textures.clear_replacements();
        {
            let SharedMaps { textures, replacements } = &mut *guard;
            replacements.clear(&mut textures.evicted_replacements);
        }
        if self.lock_counter.load(Ordering::Acquire) == 0 {
            guard.textures.evicted_textures.clear();
            guard.textures.evicted_replacements.clear();
        }
        guard.replacements.load_directory(path.as_ref())?;
        let fingerprints = guard.textures.fingerprints();
        drop(guard);
        self.pipeline.requeue_replacement_candidates(fingerprints);
        Ok(())
    }

    /// §6 `save_replacement_database`.
    pub fn save_replacement_database(&self) -> Result<()> {
        self.maps.lock().replacements.save_database()
    }

    /// §6 `remove_unused_entries_from_database`.
    pub fn remove_unused_entries_from_database(&self) {
        self.maps.lock().replacements.remove_unused_entries();
    }

    pub fn add_database_entry(&self, texture: ReplacementTexture) {
        self.maps.lock().replacements.add_database_entry(texture);
    }

    /// §6 `evict`.
    pub fn evict(&self, frame: u64) -> Vec<u64> {
        let mut guard = self.maps.lock();
        let evicted = guard.textures.evict(frame);
        self.pipeline.remove_from_seen(&evicted);
        if self.lock_counter.load(Ordering::Acquire) == 0 {
            guard.textures.evicted_textures.clear();
            guard.textures.evicted_replacements.clear();
        }
        evicted
    }

    /// §6 `get_texture`.
    pub fn get_texture(&self, index: TextureIndex) -> Option<TextureEntry> {
        self.maps.lock().textures.get_texture(index).cloned()
    }

    /// §4.5 `increment_lock`.
    pub fn increment_lock(&self) {
        self.lock_counter.fetch_add(1, Ordering::AcqRel);
    }

    /// §4.5 `decrement_lock`: draining staged evictions is only safe once
    /// the counter returns to zero.
    pub fn decrement_lock(&self) {
        let previous = self.lock_counter.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "decrement_lock called without a matching increment_lock");
        if previous == 1 {
            let mut guard = self.maps.lock();
            guard.textures.evicted_textures.clear();
            guard.textures.evicted_replacements.clear();
        }
    }

    pub fn global_version(&self) -> u64 {
        self.maps.lock().textures.global_version()
    }

    pub fn scale_for(&self, fingerprint: u64, frame: u64) -> Scale2f {
        self.use_texture(fingerprint, frame).scale
    }

    /// Entries retired by `evict`/`clear_replacements` but still referenced
    /// by an outstanding lock bracket. Used by tests to assert staging
    /// behaves per the deferred-destroy protocol.
    pub fn staged_count(&self) -> usize {
        let guard = self.maps.lock();
        guard.textures.evicted_textures.len() + guard.textures.evicted_replacements.len()
    }
}

// Not derived via `#[derive(Clone)]` on `TextureEntry`/`ReplacementEntry`
// because `get_texture` hands back an owned snapshot — callers that need to
// hold it across an eviction should bracket the read with
// `increment_lock`/`decrement_lock` rather than relying on reference
// lifetimes, matching §4.5's "a render bracket is the borrow" design note.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullGpuBackend;

    fn cache() -> TextureCache<NullGpuBackend> {
        TextureCache::new(NullGpuBackend::new(), TextureCacheConfig::new().with_pipeline_depth(2))
    }

    #[test]
    fn single_upload_single_use_scenario() {
        let cache = cache();
        cache.queue_upload(0x1234_5678, 5, vec![0u8; 64], 32, 32, ClutMode::None, LoadTile::default());
        cache.flush();
        let result = cache.use_texture(0x1234_5678, 6);
        assert!(result.found);
        assert_eq!(result.index, 0);
        assert_eq!(result.scale, Scale2f::IDENTITY);
        assert!(!result.replaced);
        assert!(cache.global_version() >= 2);
    }

    #[test]
    fn eviction_respects_pipeline_depth() {
        let cache = cache();
        assert_eq!(cache.config().min_max_age(), 4);
        cache.queue_upload(0xAAAA, 0, vec![0u8; 64], 16, 16, ClutMode::None, LoadTile::default());
        cache.flush();
        cache.use_texture(0xAAAA, 1);
        assert!(cache.evict(2).is_empty());
        assert!(cache.evict(4).is_empty());
        assert_eq!(cache.evict(5), vec![0xAAAA]);
    }

    #[test]
    fn lock_counter_defers_destruction_across_eviction() {
        let cache = cache();
        cache.queue_upload(0xBEEF, 0, vec![0u8; 64], 16, 16, ClutMode::None, LoadTile::default());
        cache.flush();
        cache.use_texture(0xBEEF, 1);

        cache.increment_lock();
        cache.evict(10);
        assert_eq!(cache.staged_count(), 1);
        cache.decrement_lock();
        assert_eq!(cache.staged_count(), 0);
    }
}
