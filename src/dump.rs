// src/dump.rs
//! Developer-mode sidecar dump writer (§6 "Dump sidecars"), gated behind the
//! `dump` feature. Lives alongside the fingerprint engine since both consume
//! the same RDRAM-range/tile-parameter computation; grounded on
//! `rt64_rdp_tmem.cpp::dumpTexture`.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::fingerprint::LoadTile;

#[derive(Debug, Serialize)]
struct TileInfo {
    tmem_word: u16,
    line: u16,
    siz: u8,
    fmt: u8,
    palette: u8,
    width: u16,
    height: u16,
    clut_mode: u32,
}

/// Writes `<hex16>.tmem`, `<hex16>.tile.json`, `<hex16>.rice.rdram`, and
/// `<hex16>.rice.json` (plus `.rice.palette.*` when `palette` is given) into
/// `directory`.
pub fn dump_texture(
    directory: &Path,
    fingerprint: u64,
    tmem: &[u8; crate::fingerprint::TMEM_BYTES],
    load_tile: &LoadTile,
    width: u16,
    height: u16,
    clut_mode: u32,
    rdram_bytes: &[u8],
    palette_bytes: Option<&[u8]>,
) -> Result<()> {
    std::fs::create_dir_all(directory)?;
    let stem = format!("{fingerprint:016x}");

    let mut tmem_file = std::fs::File::create(directory.join(format!("{stem}.tmem")))?;
    tmem_file.write_all(tmem)?;

    let tile_info = TileInfo {
        tmem_word: load_tile.tmem_word,
        line: load_tile.line,
        siz: load_tile.siz as u8,
        fmt: load_tile.fmt as u8,
        palette: load_tile.palette,
        width,
        height,
        clut_mode,
    };
    let tile_json = serde_json::to_string_pretty(&tile_info)?;
    std::fs::write(directory.join(format!("{stem}.tile.json")), tile_json)?;

    std::fs::write(directory.join(format!("{stem}.rice.rdram")), rdram_bytes)?;
    std::fs::write(directory.join(format!("{stem}.rice.json")), b"{\"type\":\"tile\"}")?;

    if let Some(palette) = palette_bytes {
        std::fs::write(directory.join(format!("{stem}.rice.palette.rdram")), palette)?;
        std::fs::write(directory.join(format!("{stem}.rice.palette.json")), b"{\"type\":\"tile\"}")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{PixelFormat, PixelSize};

    #[test]
    fn writes_expected_sidecar_files() {
        let dir = std::env::temp_dir().join("texture_cache_dump_test");
        let _ = std::fs::remove_dir_all(&dir);

        let tmem = [0u8; crate::fingerprint::TMEM_BYTES];
        let tile = LoadTile { siz: PixelSize::Sixteen, fmt: PixelFormat::Rgba, ..Default::default() };
        dump_texture(&dir, 0x1234, &tmem, &tile, 32, 32, 0, &[1, 2, 3, 4], None).unwrap();

        assert!(dir.join("0000000000001234.tmem").exists());
        assert!(dir.join("0000000000001234.tile.json").exists());
        assert!(dir.join("0000000000001234.rice.rdram").exists());
        assert!(dir.join("0000000000001234.rice.json").exists());
        assert!(!dir.join("0000000000001234.rice.palette.rdram").exists());
    }
}
