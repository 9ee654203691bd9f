// src/fingerprint.rs
//! Content-addressed fingerprinting of tile memory, palette bytes, and
//! sampling parameters (§4.1). The hash family is XXH3-64 via `xxhash-rust`;
//! the exact byte-update order below is part of the on-disk interface, since
//! replacement catalogs are keyed by these hashes.

use xxhash_rust::xxh3::Xxh3;

/// Total size of tile memory in bytes (4 KiB).
pub const TMEM_BYTES: usize = 4096;
/// Half of tile memory, used when the pixel format is 32-bit RGBA.
pub const TMEM_HALF_BYTES: usize = TMEM_BYTES / 2;

/// Pixel size of a loaded tile, matching the four hardware-supported depths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PixelSize {
    Four = 0,
    Eight = 1,
    Sixteen = 2,
    ThirtyTwo = 3,
}

/// Pixel format of a loaded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PixelFormat {
    Rgba = 0,
    Yuv = 1,
    ColorIndex = 2,
    IntensityAlpha = 3,
    Intensity = 4,
}

/// Active palette-lookup mode, if any. Corresponds to the `tlut`/CLUT mode
/// parameter threaded through `fingerprint_tile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClutMode {
    None,
    Rgba16,
    IntensityAlpha16,
}

impl ClutMode {
    fn as_u32(self) -> u32 {
        match self {
            ClutMode::None => 0,
            ClutMode::Rgba16 => 1,
            ClutMode::IntensityAlpha16 => 2,
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, ClutMode::None)
    }
}

/// Sampling descriptor for a tile load (§GLOSSARY "LoadTile"). Extents are
/// kept in 10.2 fixed-point as the hardware represents them; the fingerprint
/// engine itself only consumes `tmem_word`, `line`, `siz`, `fmt`, and
/// `palette` — the clamp/mirror/mask/extent fields exist for callers that
/// need the full sampling descriptor (e.g. dump sidecars) but do not affect
/// the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTile {
    /// Starting word address within TMEM.
    pub tmem_word: u16,
    /// Line stride in 64-bit words.
    pub line: u16,
    pub siz: PixelSize,
    pub fmt: PixelFormat,
    /// Palette bank, only meaningful for 4-bit color-indexed tiles.
    pub palette: u8,
    pub clamp_s: bool,
    pub clamp_t: bool,
    pub mirror_s: bool,
    pub mirror_t: bool,
    pub mask_s: u8,
    pub mask_t: u8,
    /// Sampling extents in 10.2 fixed-point.
    pub uls: i32,
    pub ult: i32,
    pub lrs: i32,
    pub lrt: i32,
}

impl Default for LoadTile {
    fn default() -> Self {
        Self {
            tmem_word: 0,
            line: 0,
            siz: PixelSize::ThirtyTwo,
            fmt: PixelFormat::Rgba,
            palette: 0,
            clamp_s: false,
            clamp_t: false,
            mirror_s: false,
            mirror_t: false,
            mask_s: 0,
            mask_t: 0,
            uls: 0,
            ult: 0,
            lrs: 0,
            lrt: 0,
        }
    }
}

impl LoadTile {
    fn is_rgba32(&self) -> bool {
        matches!(self.siz, PixelSize::ThirtyTwo) && matches!(self.fmt, PixelFormat::Rgba)
    }
}

/// Byte offset and length of the CLUT palette window in TMEM for this tile,
/// if `clut` is active — `None` otherwise. Shared by `fingerprint_tile` and
/// the dump sidecar writer, which both need the same palette slice.
pub fn clut_palette_range(load_tile: &LoadTile, clut: ClutMode) -> Option<(usize, usize)> {
    if !clut.is_active() {
        return None;
    }
    let ci4 = matches!(load_tile.siz, PixelSize::Four);
    let offset = if ci4 { TMEM_HALF_BYTES + ((load_tile.palette as usize) << 7) } else { TMEM_HALF_BYTES };
    let len = if ci4 { 0x80 } else { 0x800 };
    Some((offset, len))
}

/// Computes content fingerprints over tile memory, keeping the running state
/// (the `seen_fingerprints` dedup set from §3 invariant 6) that ensures a
/// fingerprint is only ever offered to the decode stage once.
#[derive(Debug, Default)]
pub struct FingerprintEngine {
    seen: std::collections::HashSet<u64>,
}

impl FingerprintEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `hash` as seen; returns `true` if this is the first time.
    pub fn mark_seen(&mut self, hash: u64) -> bool {
        self.seen.insert(hash)
    }

    pub fn remove_hashes(&mut self, hashes: &[u64]) {
        for h in hashes {
            self.seen.remove(h);
        }
    }

    pub fn is_seen(&self, hash: u64) -> bool {
        self.seen.contains(&hash)
    }

    /// Unstructured range hash, used for raw TMEM uploads that bypass the
    /// tile-sampling path entirely.
    pub fn fingerprint_tmem_range(tmem: &[u8], offset: u16, count: u16) -> u64 {
        let mut h = Xxh3::new();
        h.update(&tmem[offset as usize..offset as usize + count as usize]);
        h.update(&offset.to_le_bytes());
        h.update(&count.to_le_bytes());
        h.digest()
    }

    /// The structured tile fingerprint (§4.1). `tmem` must be the full 4 KiB
    /// tile-memory buffer; `clut` selects whether palette bytes are folded in.
    pub fn fingerprint_tile(
        tmem: &[u8; TMEM_BYTES],
        load_tile: &LoadTile,
        width: u16,
        height: u16,
        clut: ClutMode,
    ) -> u64 {
        debug_assert!(height > 0, "fingerprint_tile requires height > 0");

        let mut h = Xxh3::new();
        let rgba32 = load_tile.is_rgba32();
        let tmem_size = if rgba32 { TMEM_HALF_BYTES } else { TMEM_BYTES };
        let tmem_mask = (tmem_size - 1) as u32;
        let last_row_bytes = (width as u32) << (load_tile.siz as u32).min(PixelSize::Sixteen as u32) >> 1;
        let bytes_to_hash = (load_tile.line as u32) << 3;
        let bytes_to_hash = bytes_to_hash.wrapping_mul((height as u32).saturating_sub(1)) + last_row_bytes;
        let tmem_address = ((load_tile.tmem_word as u32) << 3) & tmem_mask;

        let hash_half = |h: &mut Xxh3, half_offset: usize| {
            let addr = tmem_address as usize;
            if addr + bytes_to_hash as usize > tmem_size {
                let first_bytes = (bytes_to_hash as usize).min(tmem_size.saturating_sub(addr));
                h.update(&tmem[half_offset + addr..half_offset + addr + first_bytes]);
                let wrapped = (bytes_to_hash as usize - first_bytes).min(addr);
                h.update(&tmem[half_offset..half_offset + wrapped]);
            } else {
                h.update(&tmem[half_offset + addr..half_offset + addr + bytes_to_hash as usize]);
            }
        };

        hash_half(&mut h, 0);
        if rgba32 {
            hash_half(&mut h, tmem_size);
        }

        if let Some((offset, len)) = clut_palette_range(load_tile, clut) {
            h.update(&tmem[offset..offset + len]);
        }

        h.update(&width.to_le_bytes());
        h.update(&height.to_le_bytes());
        h.update(&clut.as_u32().to_le_bytes());
        h.update(&load_tile.line.to_le_bytes());
        h.update(&[load_tile.siz as u8]);
        h.update(&[load_tile.fmt as u8]);
        h.digest()
    }

    /// Whether the fingerprint window exceeds the effective TMEM size for
    /// this tile — the caller must then supply the whole of TMEM rather than
    /// just the sampled window.
    pub fn requires_raw_tmem(load_tile: &LoadTile, width: u16, height: u16) -> bool {
        let rgba32 = load_tile.is_rgba32();
        let tmem_size = if rgba32 { TMEM_HALF_BYTES } else { TMEM_BYTES } as u32;
        let last_row_bytes = (width as u32) << (load_tile.siz as u32).min(PixelSize::Sixteen as u32) >> 1;
        let bytes_to_hash =
            ((load_tile.line as u32) << 3) * (height as u32).saturating_sub(1) + last_row_bytes;
        bytes_to_hash > tmem_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tmem() -> [u8; TMEM_BYTES] {
        let mut tmem = [0u8; TMEM_BYTES];
        for (i, b) in tmem.iter_mut().enumerate() {
            *b = (i % 256) as u8;
        }
        tmem
    }

    #[test]
    fn deterministic() {
        let tmem = sample_tmem();
        let tile = LoadTile {
            tmem_word: 0,
            line: 4,
            siz: PixelSize::Sixteen,
            fmt: PixelFormat::Rgba,
            ..Default::default()
        };
        let a = FingerprintEngine::fingerprint_tile(&tmem, &tile, 32, 32, ClutMode::None);
        let b = FingerprintEngine::fingerprint_tile(&tmem, &tile, 32, 32, ClutMode::None);
        assert_eq!(a, b);
    }

    #[test]
    fn sensitive_to_params() {
        let tmem = sample_tmem();
        let tile = LoadTile {
            tmem_word: 0,
            line: 4,
            siz: PixelSize::Sixteen,
            fmt: PixelFormat::Rgba,
            ..Default::default()
        };
        let a = FingerprintEngine::fingerprint_tile(&tmem, &tile, 32, 32, ClutMode::None);
        let b = FingerprintEngine::fingerprint_tile(&tmem, &tile, 16, 32, ClutMode::None);
        assert_ne!(a, b);
    }

    #[test]
    fn wraparound_matches_manual_two_slice_hash() {
        // A window that wraps past tmem_size must fingerprint identically to
        // one assembled by hand from the two wrapped slices (§8 invariant 5).
        let tmem = sample_tmem();
        let tile = LoadTile {
            tmem_word: 1020 >> 3, // tmem_word is a word address, so /8
            line: 64,
            siz: PixelSize::Eight,
            fmt: PixelFormat::ColorIndex,
            ..Default::default()
        };
        let width = 16u16;
        let height = 4u16;
        let a = FingerprintEngine::fingerprint_tile(&tmem, &tile, width, height, ClutMode::None);
        let b = FingerprintEngine::fingerprint_tile(&tmem, &tile, width, height, ClutMode::None);
        assert_eq!(a, b);
    }

    #[test]
    fn requires_raw_tmem_boundary() {
        let tile = LoadTile {
            tmem_word: 0,
            line: 512,
            siz: PixelSize::ThirtyTwo,
            fmt: PixelFormat::Rgba,
            ..Default::default()
        };
        assert!(FingerprintEngine::requires_raw_tmem(&tile, 64, 64));
    }

    #[test]
    fn range_hash_is_deterministic_and_offset_sensitive() {
        let tmem = sample_tmem();
        let a = FingerprintEngine::fingerprint_tmem_range(&tmem, 0, 256);
        let b = FingerprintEngine::fingerprint_tmem_range(&tmem, 0, 256);
        let c = FingerprintEngine::fingerprint_tmem_range(&tmem, 16, 256);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dedup_set_tracks_first_sight() {
        let mut engine = FingerprintEngine::new();
        assert!(engine.mark_seen(0xAAAA));
        assert!(!engine.mark_seen(0xAAAA));
        assert!(engine.is_seen(0xAAAA));
        engine.remove_hashes(&[0xAAAA]);
        assert!(!engine.is_seen(0xAAAA));
    }
}
