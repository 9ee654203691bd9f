// src/dds.rs
//! Hand-rolled DDS header parser (§4.4). DDS is the multi-mip container most
//! replacement packs ship alongside PNG, and pulling in a full DDS crate
//! for a read-only header walk would be the wrong trade for the one format
//! this cache actually needs to understand structurally (mip offsets).

use crate::error::{Error, Result};

const DDS_MAGIC: [u8; 4] = *b"DDS ";
const HEADER_SIZE: usize = 124;
const MIP_ALIGNMENT: usize = 16;

/// GPU-facing pixel format a parsed DDS maps onto. Mirrors the small set the
/// `GpuBackend::alloc_rgba_texture`/block-compressed equivalents need to
/// distinguish; anything else is rejected as `Error::Decode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdsFormat {
    Bc1,
    Bc3,
    Bc7,
    Rgba8,
}

#[derive(Debug, Clone)]
pub struct DdsImage {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: DdsFormat,
    /// Byte offset of each mip level within `data`, 16-byte aligned per
    /// §4.4's padding rule.
    pub mip_offsets: Vec<usize>,
    pub mip_sizes: Vec<usize>,
    pub data: Vec<u8>,
}

fn block_size(format: DdsFormat) -> usize {
    match format {
        DdsFormat::Bc1 => 8,
        DdsFormat::Bc3 | DdsFormat::Bc7 => 16,
        DdsFormat::Rgba8 => 0, // computed per-mip from width*height*4
    }
}

fn fourcc_format(fourcc: &[u8; 4]) -> Option<DdsFormat> {
    match fourcc {
        b"DXT1" => Some(DdsFormat::Bc1),
        b"DXT5" => Some(DdsFormat::Bc3),
        b"DX10" => None, // resolved separately via the DXGI extension header
        _ => None,
    }
}

fn dxgi_format(dxgi: u32) -> Option<DdsFormat> {
    // A handful of the DXGI_FORMAT enumeration's values, matching the
    // fixed mapping table §4.4 calls for rather than the full enum.
    match dxgi {
        71 | 72 => Some(DdsFormat::Bc1),       // BC1_UNORM / BC1_UNORM_SRGB
        77 | 78 => Some(DdsFormat::Bc3),       // BC3_UNORM / BC3_UNORM_SRGB
        98 | 99 => Some(DdsFormat::Bc7),       // BC7_UNORM / BC7_UNORM_SRGB
        28 | 29 => Some(DdsFormat::Rgba8),     // R8G8B8A8_UNORM / _SRGB
        _ => None,
    }
}

fn mip_dim(dim: u32, level: u32) -> u32 {
    (dim >> level).max(1)
}

fn mip_byte_size(format: DdsFormat, width: u32, height: u32) -> usize {
    match format {
        DdsFormat::Rgba8 => (width as usize) * (height as usize) * 4,
        _ => {
            let blocks_wide = ((width + 3) / 4).max(1) as usize;
            let blocks_high = ((height + 3) / 4).max(1) as usize;
            blocks_wide * blocks_high * block_size(format)
        }
    }
}

/// Parses a DDS byte stream into header metadata and per-mip offsets into
/// the remainder of `bytes` (the pixel payload, not copied).
pub fn parse(bytes: &[u8]) -> Result<DdsImage> {
    if bytes.len() < 4 + HEADER_SIZE || bytes[0..4] != DDS_MAGIC {
        return Err(Error::Decode("not a DDS file".into()));
    }
    let header = &bytes[4..4 + HEADER_SIZE];
    let height = u32::from_le_bytes(header[8..12].try_into().unwrap());
    let width = u32::from_le_bytes(header[12..16].try_into().unwrap());
    let mip_map_count = u32::from_le_bytes(header[24..28].try_into().unwrap()).max(1);

    let pf_flags = u32::from_le_bytes(header[76..80].try_into().unwrap());
    let fourcc: [u8; 4] = header[80..84].try_into().unwrap();
    let mut payload_offset = 4 + HEADER_SIZE;

    const DDPF_FOURCC: u32 = 0x4;
    let format = if pf_flags & DDPF_FOURCC != 0 {
        if &fourcc == b"DX10" {
            if bytes.len() < payload_offset + 20 {
                return Err(Error::Decode("truncated DX10 header".into()));
            }
            let dxgi = u32::from_le_bytes(bytes[payload_offset..payload_offset + 4].try_into().unwrap());
            payload_offset += 20;
            dxgi_format(dxgi).ok_or_else(|| Error::Decode(format!("unsupported DXGI format {dxgi}")))?
        } else {
            fourcc_format(&fourcc).ok_or_else(|| Error::Decode("unsupported DDS fourcc".into()))?
        }
    } else {
        DdsFormat::Rgba8
    };

    let mut mip_offsets = Vec::with_capacity(mip_map_count as usize);
    let mut mip_sizes = Vec::with_capacity(mip_map_count as usize);
    let mut cursor = 0usize;
    for level in 0..mip_map_count {
        let w = mip_dim(width, level);
        let h = mip_dim(height, level);
        let size = mip_byte_size(format, w, h);
        let aligned = (cursor + MIP_ALIGNMENT - 1) / MIP_ALIGNMENT * MIP_ALIGNMENT;
        mip_offsets.push(aligned);
        mip_sizes.push(size);
        cursor = aligned + size;
    }

    if payload_offset + cursor > bytes.len() {
        return Err(Error::Decode("DDS payload shorter than mip chain implies".into()));
    }

    Ok(DdsImage {
        width,
        height,
        mip_levels: mip_map_count,
        format,
        mip_offsets,
        mip_sizes,
        data: bytes[payload_offset..payload_offset + cursor].to_vec(),
    })
}

impl DdsImage {
    pub fn mip_bytes(&self, level: u32) -> &[u8] {
        let offset = self.mip_offsets[level as usize];
        let size = self.mip_sizes[level as usize];
        &self.data[offset..offset + size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_dds_dxt1(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&DDS_MAGIC);
        let mut header = vec![0u8; HEADER_SIZE];
        header[4..8].copy_from_slice(&HEADER_SIZE.to_le_bytes()[..4]);
        header[8..12].copy_from_slice(&height.to_le_bytes());
        header[12..16].copy_from_slice(&width.to_le_bytes());
        header[24..28].copy_from_slice(&1u32.to_le_bytes());
        header[76..80].copy_from_slice(&0x4u32.to_le_bytes());
        header[80..84].copy_from_slice(b"DXT1");
        bytes.extend_from_slice(&header);
        let size = mip_byte_size(DdsFormat::Bc1, width, height);
        bytes.extend(std::iter::repeat(0u8).take(size));
        bytes
    }

    #[test]
    fn parses_single_mip_dxt1() {
        let bytes = synth_dds_dxt1(64, 64);
        let image = parse(&bytes).unwrap();
        assert_eq!(image.width, 64);
        assert_eq!(image.height, 64);
        assert_eq!(image.mip_levels, 1);
        assert_eq!(image.format, DdsFormat::Bc1);
        assert_eq!(image.mip_bytes(0).len(), 64 / 4 * 64 / 4 * 8);
    }

    #[test]
    fn rejects_non_dds_magic() {
        let bytes = vec![0u8; 256];
        assert!(parse(&bytes).is_err());
    }

    #[test]
    fn mip_offsets_are_sixteen_byte_aligned() {
        let bytes = synth_dds_dxt1(32, 32);
        let image = parse(&bytes).unwrap();
        for offset in &image.mip_offsets {
            assert_eq!(offset % MIP_ALIGNMENT, 0);
        }
    }
}
