// src/upload_pipeline.rs
//! Background worker that drains the upload queue into batched GPU copy →
//! decode → barrier sequences (§4.2). Grounded on `offload.rs`'s
//! single-worker-thread-plus-queue shape, generalized from its generic task
//! closures to the fixed copy/decode/barrier sequence this cache always runs.
//!
//! GPU resource *lifetime* beyond a single execution scope is the
//! `GpuBackend` implementation's concern, not this module's or
//! `TextureMap`'s: the trait boundary in §1 excludes the concrete
//! device/pool layer, so handles allocated via `GpuScope` are threaded only
//! as far as the decode dispatch that consumes them, and backends are
//! expected to keep their own index-keyed pool if persistence is needed.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{error, trace};
use parking_lot::{Condvar, Mutex};

use crate::config::TextureCacheConfig;
use crate::fingerprint::{ClutMode, LoadTile};
use crate::gpu::{DecodeParams, GpuBackend, GpuScope};
use crate::replacement::ReplacementMap;
use crate::texture_map::{TextureEntry, TextureMap};

/// One queued tile upload (§4.2 public enqueue parameters).
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub fingerprint: u64,
    pub creation_frame: u64,
    pub tmem_bytes: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub clut_mode: ClutMode,
    pub load_tile: LoadTile,
}

/// `TextureMap` and `ReplacementMap` share one mutex (§5 `map_mutex`): the
/// worker inserts new entries and resolves replacements under the same lock
/// render threads briefly hold for `use_texture`/`evict`.
pub struct SharedMaps {
    pub textures: TextureMap,
    pub replacements: ReplacementMap,
}

impl SharedMaps {
    pub fn new(min_max_age: u64) -> Self {
        Self { textures: TextureMap::new(min_max_age), replacements: ReplacementMap::new() }
    }
}

struct QueueState {
    uploads: VecDeque<UploadRecord>,
    replacement_fingerprints: VecDeque<u64>,
}

/// Single background worker thread draining queued uploads (§4.2).
pub struct UploadPipeline<B: GpuBackend + 'static> {
    queue: Arc<Mutex<QueueState>>,
    work_cv: Arc<Condvar>,
    empty_cv: Arc<Condvar>,
    running: Arc<AtomicBool>,
    seen_fingerprints: Arc<Mutex<HashSet<u64>>>,
    worker: Option<JoinHandle<()>>,
    _backend: std::marker::PhantomData<B>,
}

impl<B: GpuBackend + 'static> UploadPipeline<B> {
    pub fn new(backend: Arc<B>, maps: Arc<Mutex<SharedMaps>>, config: TextureCacheConfig) -> Self {
        let queue = Arc::new(Mutex::new(QueueState {
            uploads: VecDeque::new(),
            replacement_fingerprints: VecDeque::new(),
        }));
        let work_cv = Arc::new(Condvar::new());
        let empty_cv = Arc::new(Condvar::new());
        let running = Arc::new(AtomicBool::new(true));
        let seen_fingerprints = Arc::new(Mutex::new(HashSet::new()));

        let worker = {
            let queue = queue.clone();
            let work_cv = work_cv.clone();
            let empty_cv = empty_cv.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("texture-cache-upload".into())
                .spawn(move || worker_loop(backend, maps, queue, work_cv, empty_cv, running, config))
                .expect("failed to spawn upload worker thread")
        };

        Self {
            queue,
            work_cv,
            empty_cv,
            running,
            seen_fingerprints,
            worker: Some(worker),
            _backend: std::marker::PhantomData,
        }
    }

    /// §4.2 public enqueue. Dedup happens here via `seen_fingerprints`
    /// (§3 invariant 6): a fingerprint already offered to the pipeline is
    /// silently dropped.
    pub fn queue_upload(&self, record: UploadRecord) {
        {
            let mut seen = self.seen_fingerprints.lock();
            if !seen.insert(record.fingerprint) {
                trace!("upload for fingerprint {:#018x} deduplicated", record.fingerprint);
                return;
            }
        }
        let mut queue = self.queue.lock();
        queue.uploads.push_back(record);
        self.work_cv.notify_one();
    }

    /// §4.2 public wait: blocks until the upload queue has drained.
    pub fn flush(&self) {
        let mut queue = self.queue.lock();
        while !queue.uploads.is_empty() {
            self.empty_cv.wait(&mut queue);
        }
    }

    pub fn remove_from_seen(&self, fingerprints: &[u64]) {
        let mut seen = self.seen_fingerprints.lock();
        for fp in fingerprints {
            seen.remove(fp);
        }
    }

    /// Replaces the pending replacement-detection queue wholesale (§4.2 step
    /// 1's `replacement_fingerprints`). Used by
    /// `TextureCache::load_replacement_directory` to re-check every
    /// already-resident fingerprint against a freshly loaded directory.
    pub fn requeue_replacement_candidates(&self, fingerprints: Vec<u64>) {
        let mut queue = self.queue.lock();
        queue.replacement_fingerprints.clear();
        queue.replacement_fingerprints.extend(fingerprints);
        self.work_cv.notify_all();
    }
}

impl<B: GpuBackend + 'static> Drop for UploadPipeline<B> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.work_cv.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop<B: GpuBackend + 'static>(
    backend: Arc<B>,
    maps: Arc<Mutex<SharedMaps>>,
    queue: Arc<Mutex<QueueState>>,
    work_cv: Arc<Condvar>,
    empty_cv: Arc<Condvar>,
    running: Arc<AtomicBool>,
    config: TextureCacheConfig,
) {
    loop {
        let batch: Vec<UploadRecord>;
        let replacement_candidates: Vec<u64>;
        {
            let mut state = queue.lock();
            while state.uploads.is_empty() && running.load(Ordering::SeqCst) {
                work_cv.wait(&mut state);
            }
            if !running.load(Ordering::SeqCst) && state.uploads.is_empty() {
                return;
            }
            batch = state.uploads.drain(..).collect();
            replacement_candidates = state.replacement_fingerprints.drain(..).collect();
        }

        dump_batch(&batch, &config);

        let mut decoded_fingerprints = replacement_candidates;
        match process_batch(backend.as_ref(), &batch) {
            Ok(mut newly_decoded) => decoded_fingerprints.append(&mut newly_decoded),
            Err(e) => error!("upload batch failed: {e}"),
        }

        {
            let mut guard = maps.lock();
            for record in &batch {
                let entry = TextureEntry {
                    fingerprint: record.fingerprint,
                    creation_frame: record.creation_frame,
                    width: record.width,
                    height: record.height,
                    mip_count: 1,
                    raw_tmem: None,
                };
                guard.textures.add(record.fingerprint, record.creation_frame, entry);
            }

            for fingerprint in &decoded_fingerprints {
                let relative_path = guard.replacements.relative_path_for_fingerprint(*fingerprint);
                if relative_path.is_empty() {
                    continue;
                }
                if guard.replacements.loaded_entry(*fingerprint).is_some() {
                    continue;
                }
                let Some(full_path) = guard.replacements.full_path(&relative_path) else { continue };
                match std::fs::read(&full_path) {
                    Ok(file_bytes) => {
                        if let Err(e) = guard.replacements.load_from_bytes(*fingerprint, &relative_path, &file_bytes)
                        {
                            error!("failed to load replacement {relative_path}: {e}");
                            continue;
                        }
                        if let Some(replacement) = guard.replacements.loaded_entry(*fingerprint).cloned() {
                            guard.textures.replace(*fingerprint, replacement);
                        }
                    }
                    Err(e) => error!("failed to read replacement file {}: {e}", full_path.display()),
                }
            }
        }

        {
            let mut state = queue.lock();
            if state.uploads.is_empty() {
                empty_cv.notify_all();
            }
        }
    }
}

/// Writes developer-mode sidecars for a batch (§6 "Dump sidecars") when the
/// crate is built with the `dump` feature and `config.dump_enabled` is set.
/// A no-op build-time stub otherwise, so the call site in `worker_loop`
/// never needs its own `#[cfg]`.
#[cfg(feature = "dump")]
fn dump_batch(batch: &[UploadRecord], config: &TextureCacheConfig) {
    if !config.dump_enabled {
        return;
    }
    for record in batch {
        let Ok(tmem): Result<[u8; crate::fingerprint::TMEM_BYTES], _> = record.tmem_bytes.as_slice().try_into()
        else {
            trace!(
                "skipping dump sidecars for {:#018x}: tmem_bytes is not a full TMEM window",
                record.fingerprint
            );
            continue;
        };
        let clut_u32 = match record.clut_mode {
            ClutMode::None => 0,
            ClutMode::Rgba16 => 1,
            ClutMode::IntensityAlpha16 => 2,
        };
        let palette = crate::fingerprint::clut_palette_range(&record.load_tile, record.clut_mode)
            .map(|(offset, len)| &tmem[offset..offset + len]);
        if let Err(e) = crate::dump::dump_texture(
            &config.dump_directory,
            record.fingerprint,
            &tmem,
            &record.load_tile,
            record.width,
            record.height,
            clut_u32,
            &record.tmem_bytes,
            palette,
        ) {
            error!("failed to write dump sidecars for {:#018x}: {e}", record.fingerprint);
        }
    }
}

#[cfg(not(feature = "dump"))]
fn dump_batch(_batch: &[UploadRecord], _config: &TextureCacheConfig) {}

/// §4.2 step 3: one GPU execution scope covering every upload in the batch.
fn process_batch<B: GpuBackend>(backend: &B, batch: &[UploadRecord]) -> crate::error::Result<Vec<u64>> {
    let mut decoded = Vec::new();
    let mut scope = backend.begin_scope()?;

    let mut tile_handles = Vec::with_capacity(batch.len());
    for record in batch {
        let handle = scope.alloc_tile_texture(record.tmem_bytes.len())?;
        scope.copy_bytes_to_tile_texture(&handle, &record.tmem_bytes)?;
        scope.barrier_copy_dest(&handle);
        tile_handles.push(handle);
    }
    for handle in &tile_handles {
        scope.barrier_shader_read(handle);
    }

    for (record, tile_handle) in batch.iter().zip(tile_handles.iter()) {
        if record.width == 0 || record.height == 0 {
            continue;
        }
        let rgba_handle = scope.alloc_rgba_texture(record.width, record.height, 1)?;
        scope.barrier_general(&rgba_handle);
        let params = DecodeParams {
            width: record.width,
            height: record.height,
            fmt: record.load_tile.fmt as u8,
            siz: record.load_tile.siz as u8,
            palette: record.load_tile.palette,
            _pad: 0,
            address: (record.load_tile.tmem_word as u32) << 3,
            stride: (record.load_tile.line as u32) << 3,
            clut_mode: match record.clut_mode {
                ClutMode::None => 0,
                ClutMode::Rgba16 => 1,
                ClutMode::IntensityAlpha16 => 2,
            },
        };
        scope.dispatch_decode(tile_handle, &rgba_handle, params)?;
        scope.barrier_shader_read(&rgba_handle);
        decoded.push(record.fingerprint);
    }

    scope.finish()?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::NullGpuBackend;

    fn record(fingerprint: u64, frame: u64, w: u16, h: u16) -> UploadRecord {
        UploadRecord {
            fingerprint,
            creation_frame: frame,
            tmem_bytes: vec![0u8; 256],
            width: w,
            height: h,
            clut_mode: ClutMode::None,
            load_tile: LoadTile::default(),
        }
    }

    #[test]
    fn single_upload_is_visible_after_flush() {
        let backend = Arc::new(NullGpuBackend::new());
        let maps = Arc::new(Mutex::new(SharedMaps::new(4)));
        let pipeline = UploadPipeline::new(backend, maps.clone(), TextureCacheConfig::new());

        pipeline.queue_upload(record(0x12345678, 5, 32, 32));
        pipeline.flush();

        let mut guard = maps.lock();
        let result = guard.textures.use_texture(0x12345678, 6);
        assert!(result.found);
    }

    #[test]
    fn duplicate_fingerprint_is_deduplicated_before_enqueue() {
        let backend = Arc::new(NullGpuBackend::new());
        let maps = Arc::new(Mutex::new(SharedMaps::new(4)));
        let pipeline = UploadPipeline::new(backend, maps.clone(), TextureCacheConfig::new());

        pipeline.queue_upload(record(0xAAAA, 0, 16, 16));
        pipeline.queue_upload(record(0xAAAA, 0, 16, 16));
        pipeline.flush();

        let guard = maps.lock();
        assert_eq!(guard.textures.len(), 1);
    }
}
