// src/texture_map.rs
//! Dense slot-recycling table keyed by fingerprint, with a frame-aged LRU
//! eviction policy (§4.3). Grounded on `resource_manager.rs`'s slab +
//! generation-counter + LRU pattern, generalized to the fingerprint-keyed
//! eviction rule this cache needs instead of a fixed capacity bound — which
//! is also why this hand-rolls the intrusive list rather than reaching for
//! the `lru` crate: `lru::LruCache` has no way to express "evict while
//! `age >= max_age`" against a caller-supplied frame clock, or to keep a
//! slot's back-reference stable across LRU motion.

use std::collections::HashMap;

use log::{debug, trace};

/// Sentinel marking "no index" in the intrusive LRU list and the freelist.
pub const NONE: u32 = u32::MAX;

pub type TextureIndex = u32;

/// Scale factor applied by the shader when a slot has a replacement texture
/// attached; `(1.0, 1.0)` whenever no replacement is present (§3 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale2f {
    pub x: f32,
    pub y: f32,
}

impl Scale2f {
    pub const IDENTITY: Scale2f = Scale2f { x: 1.0, y: 1.0 };
}

/// Decoded texture owned by a slot (§3 "TextureEntry").
#[derive(Debug, Clone)]
pub struct TextureEntry {
    pub fingerprint: u64,
    pub creation_frame: u64,
    pub width: u16,
    pub height: u16,
    pub mip_count: u32,
    /// Developer-mode copy of the source tile bytes, retained only when dump
    /// sidecars are enabled.
    pub raw_tmem: Option<Vec<u8>>,
}

/// Replacement texture attached to a slot (§3 "ReplacementEntry").
#[derive(Debug, Clone)]
pub struct ReplacementEntry {
    pub width: u16,
    pub height: u16,
    pub mip_count: u32,
    pub path_hash: u64,
}

struct Slot {
    entry: Option<TextureEntry>,
    replacement: Option<ReplacementEntry>,
    scale: Scale2f,
    fingerprint: u64,
    version: u64,
    creation_frame: u64,
    last_use_frame: u64,
    lru_prev: u32,
    lru_next: u32,
    in_lru: bool,
}

impl Slot {
    fn vacant() -> Self {
        Self {
            entry: None,
            replacement: None,
            scale: Scale2f::IDENTITY,
            fingerprint: 0,
            version: 0,
            creation_frame: 0,
            last_use_frame: 0,
            lru_prev: NONE,
            lru_next: NONE,
            in_lru: false,
        }
    }
}

/// Result of [`TextureMap::use_texture`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UseResult {
    pub found: bool,
    pub index: TextureIndex,
    pub scale: Scale2f,
    pub replaced: bool,
    pub has_mipmaps: bool,
}

impl UseResult {
    fn miss() -> Self {
        Self { found: false, index: 0, scale: Scale2f::IDENTITY, replaced: false, has_mipmaps: false }
    }
}

/// The dense slot table described in §3/§4.3.
pub struct TextureMap {
    slots: Vec<Slot>,
    freelist: Vec<u32>,
    fingerprint_to_slot: HashMap<u64, u32>,
    lru_head: u32,
    lru_tail: u32,
    global_version: u64,
    min_max_age: u64,
    replacements_enabled: bool,
    /// Entries moved out of circulation by `evict`/`clear_replacements` but
    /// not yet freed because the lock counter (owned by the facade) is
    /// nonzero. Drained by the facade once it reaches zero.
    pub evicted_textures: Vec<TextureEntry>,
    pub evicted_replacements: Vec<ReplacementEntry>,
}

impl TextureMap {
    pub fn new(min_max_age: u64) -> Self {
        Self {
            slots: Vec::new(),
            freelist: Vec::new(),
            fingerprint_to_slot: HashMap::new(),
            lru_head: NONE,
            lru_tail: NONE,
            global_version: 0,
            min_max_age,
            replacements_enabled: true,
            evicted_textures: Vec::new(),
            evicted_replacements: Vec::new(),
        }
    }

    pub fn set_replacements_enabled(&mut self, enabled: bool) {
        self.replacements_enabled = enabled;
    }

    pub fn global_version(&self) -> u64 {
        self.global_version
    }

    pub fn len(&self) -> usize {
        self.fingerprint_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprint_to_slot.is_empty()
    }

    fn lru_unlink(&mut self, index: u32) {
        let (prev, next) = {
            let slot = &self.slots[index as usize];
            (slot.lru_prev, slot.lru_next)
        };
        if prev != NONE {
            self.slots[prev as usize].lru_next = next;
        } else {
            self.lru_head = next;
        }
        if next != NONE {
            self.slots[next as usize].lru_prev = prev;
        } else {
            self.lru_tail = prev;
        }
        let slot = &mut self.slots[index as usize];
        slot.lru_prev = NONE;
        slot.lru_next = NONE;
        slot.in_lru = false;
    }

    fn lru_push_head(&mut self, index: u32) {
        let old_head = self.lru_head;
        {
            let slot = &mut self.slots[index as usize];
            slot.lru_prev = NONE;
            slot.lru_next = old_head;
            slot.in_lru = true;
        }
        if old_head != NONE {
            self.slots[old_head as usize].lru_prev = index;
        }
        self.lru_head = index;
        if self.lru_tail == NONE {
            self.lru_tail = index;
        }
    }

    /// §4.3 `add`. Precondition: `fingerprint` absent. Violating it is a
    /// caller bug, flagged in debug builds; release builds refuse silently.
    pub fn add(&mut self, fingerprint: u64, creation_frame: u64, entry: TextureEntry) -> TextureIndex {
        debug_assert!(
            !self.fingerprint_to_slot.contains_key(&fingerprint),
            "duplicate fingerprint passed to TextureMap::add"
        );
        if self.fingerprint_to_slot.contains_key(&fingerprint) {
            return self.fingerprint_to_slot[&fingerprint];
        }

        let index = if let Some(free) = self.freelist.pop() {
            free
        } else {
            self.slots.push(Slot::vacant());
            (self.slots.len() - 1) as u32
        };

        {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            slot.replacement = None;
            slot.scale = Scale2f::IDENTITY;
            slot.fingerprint = fingerprint;
            slot.version += 1;
            slot.creation_frame = creation_frame;
            slot.last_use_frame = creation_frame;
        }
        self.lru_push_head(index);
        self.fingerprint_to_slot.insert(fingerprint, index);
        self.global_version += 1;
        trace!("texture slot allocated: fingerprint={:#018x} index={}", fingerprint, index);
        index
    }

    /// §4.3 `replace`. No-op if the fingerprint is unknown.
    pub fn replace(&mut self, fingerprint: u64, replacement: ReplacementEntry) {
        let Some(&index) = self.fingerprint_to_slot.get(&fingerprint) else {
            return;
        };
        let slot = &mut self.slots[index as usize];
        let Some(entry) = slot.entry.as_ref() else { return };
        let scale = Scale2f {
            x: replacement.width as f32 / entry.width.max(1) as f32,
            y: replacement.height as f32 / entry.height.max(1) as f32,
        };
        slot.replacement = Some(replacement);
        slot.scale = scale;
        slot.version += 1;
        self.global_version += 1;
    }

    /// §4.3 `use_texture`.
    pub fn use_texture(&mut self, fingerprint: u64, submission_frame: u64) -> UseResult {
        let Some(&index) = self.fingerprint_to_slot.get(&fingerprint) else {
            return UseResult::miss();
        };
        self.lru_unlink(index);
        self.lru_push_head(index);
        let slot = &mut self.slots[index as usize];
        slot.last_use_frame = submission_frame;
        let replaced = self.replacements_enabled && slot.replacement.is_some();
        let has_mipmaps = slot.replacement.as_ref().map(|r| r.mip_count > 1).unwrap_or(false);
        UseResult { found: true, index, scale: slot.scale, replaced, has_mipmaps }
    }

    /// §4.3 `evict`. Walks from the LRU tail (coldest) while `age >=
    /// max_age`, short-circuiting at the first entry still used this frame.
    pub fn evict(&mut self, submission_frame: u64) -> Vec<u64> {
        let mut evicted = Vec::new();
        let mut cursor = self.lru_tail;
        while cursor != NONE {
            let prev = self.slots[cursor as usize].lru_prev;
            let slot = &self.slots[cursor as usize];
            let age = submission_frame.saturating_sub(slot.last_use_frame);
            if age == 0 {
                break;
            }
            let lived = slot.last_use_frame.saturating_sub(slot.creation_frame);
            let max_age = lived.max(self.min_max_age);
            if age < max_age {
                break;
            }

            let fingerprint = slot.fingerprint;
            self.lru_unlink(cursor);
            self.fingerprint_to_slot.remove(&fingerprint);
            let removed_entry = self.slots[cursor as usize].entry.take();
            let removed_replacement = self.slots[cursor as usize].replacement.take();
            if let Some(entry) = removed_entry {
                self.evicted_textures.push(entry);
            }
            if let Some(replacement) = removed_replacement {
                self.evicted_replacements.push(replacement);
            }
            self.slots[cursor as usize].fingerprint = 0;
            self.slots[cursor as usize].scale = Scale2f::IDENTITY;
            self.freelist.push(cursor);
            self.global_version += 1;
            evicted.push(fingerprint);
            debug!(
                "texture slot evicted: fingerprint={:#018x} age={} max_age={}",
                fingerprint, age, max_age
            );

            cursor = prev;
        }
        evicted
    }

    /// §4.3 `clear_replacements`.
    pub fn clear_replacements(&mut self) {
        for slot in &mut self.slots {
            if let Some(replacement) = slot.replacement.take() {
                self.evicted_replacements.push(replacement);
                slot.scale = Scale2f::IDENTITY;
                slot.version += 1;
                self.global_version += 1;
            }
        }
    }

    pub fn get_texture(&self, index: TextureIndex) -> Option<&TextureEntry> {
        self.slots.get(index as usize).and_then(|s| s.entry.as_ref())
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// All fingerprints currently resident in the map, in no particular
    /// order. Used by `TextureCache::load_replacement_directory` to requeue
    /// every already-loaded texture for replacement re-detection against a
    /// newly loaded directory.
    pub fn fingerprints(&self) -> Vec<u64> {
        self.fingerprint_to_slot.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fingerprint: u64, frame: u64) -> TextureEntry {
        TextureEntry { fingerprint, creation_frame: frame, width: 32, height: 32, mip_count: 1, raw_tmem: None }
    }

    #[test]
    fn add_then_use_returns_identity_scale() {
        let mut map = TextureMap::new(4);
        map.add(0x1234, 5, entry(0x1234, 5));
        let result = map.use_texture(0x1234, 6);
        assert!(result.found);
        assert_eq!(result.scale, Scale2f::IDENTITY);
        assert!(!result.replaced);
        assert!(map.global_version() >= 2);
    }

    #[test]
    fn use_unknown_fingerprint_misses_without_touching_lru() {
        let mut map = TextureMap::new(4);
        let result = map.use_texture(0xDEAD, 1);
        assert_eq!(result, UseResult::miss());
    }

    #[test]
    fn evict_respects_pipeline_depth() {
        let mut map = TextureMap::new(4);
        map.add(0xAAAA, 0, entry(0xAAAA, 0));
        map.use_texture(0xAAAA, 1);
        assert!(map.evict(2).is_empty());
        assert!(map.evict(3).is_empty());
        assert!(map.evict(4).is_empty());
        let evicted = map.evict(5);
        assert_eq!(evicted, vec![0xAAAA]);
    }

    #[test]
    fn evict_never_drops_same_frame_entry() {
        let mut map = TextureMap::new(1);
        map.add(0x1, 0, entry(0x1, 0));
        assert!(map.evict(0).is_empty());
    }

    #[test]
    fn freelist_recycles_slot_indices() {
        let mut map = TextureMap::new(1);
        let idx_a = map.add(0x1, 0, entry(0x1, 0));
        map.use_texture(0x1, 0);
        map.evict(10);
        let idx_b = map.add(0x2, 10, entry(0x2, 10));
        assert_eq!(idx_a, idx_b);
        assert_eq!(map.slot_count(), 1);
    }

    #[test]
    fn replace_updates_scale_and_replaced_flag() {
        let mut map = TextureMap::new(4);
        map.add(0x1, 0, entry(0x1, 0));
        map.replace(0x1, ReplacementEntry { width: 64, height: 64, mip_count: 4, path_hash: 7 });
        let result = map.use_texture(0x1, 1);
        assert!(result.replaced);
        assert!(result.has_mipmaps);
        assert_eq!(result.scale, Scale2f { x: 2.0, y: 2.0 });
    }

    #[test]
    fn clear_replacements_resets_scale_but_keeps_entry() {
        let mut map = TextureMap::new(4);
        map.add(0x1, 0, entry(0x1, 0));
        map.replace(0x1, ReplacementEntry { width: 64, height: 64, mip_count: 1, path_hash: 7 });
        map.clear_replacements();
        let result = map.use_texture(0x1, 1);
        assert!(!result.replaced);
        assert_eq!(result.scale, Scale2f::IDENTITY);
        assert_eq!(map.evicted_replacements.len(), 1);
    }
}
