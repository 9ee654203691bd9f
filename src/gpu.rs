// src/gpu.rs
//! `GpuBackend` trait boundary standing in for the concrete device/command-list
//! layer (§1 "out of scope"). `UploadPipeline` and `ReplacementMap` are
//! generic over this trait so the cache itself never names a graphics API.

use crate::error::Result;

/// Pixel format for a GPU texture allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// Raw byte storage for tile memory, one texel per byte.
    R8Uint,
    /// Decoded RGBA output, and the format replacement assets are uploaded as.
    Rgba8Unorm,
}

/// Opaque handle to a GPU texture allocation. The concrete backend decides
/// what this wraps; the cache only ever threads it through.
pub trait TextureHandle: std::fmt::Debug + Send + Sync + 'static {}

/// Parameters for a single decode dispatch (§4.2 step 3c). Plain POD layout
/// so a real backend can upload it as a push-constant block without a
/// separate staging struct.
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DecodeParams {
    pub width: u16,
    pub height: u16,
    pub fmt: u8,
    pub siz: u8,
    pub palette: u8,
    pub _pad: u8,
    pub address: u32,
    pub stride: u32,
    pub clut_mode: u32,
}

/// One open GPU execution scope (§4.2 step 3): a batch of copies, a decode
/// dispatch, and the barriers that separate them. Implementations are
/// expected to record commands into a single command list and submit on
/// drop or on an explicit `finish`.
pub trait GpuScope {
    type Handle: TextureHandle;

    fn alloc_tile_texture(&mut self, byte_len: usize) -> Result<Self::Handle>;
    fn alloc_rgba_texture(&mut self, width: u16, height: u16, mip_levels: u32) -> Result<Self::Handle>;
    fn copy_bytes_to_tile_texture(&mut self, handle: &Self::Handle, bytes: &[u8]) -> Result<()>;
    fn copy_mip_region(
        &mut self,
        handle: &Self::Handle,
        mip: u32,
        bytes: &[u8],
        row_pitch: u32,
    ) -> Result<()>;
    fn dispatch_decode(&mut self, tile: &Self::Handle, target: &Self::Handle, params: DecodeParams) -> Result<()>;
    fn barrier_copy_dest(&mut self, handle: &Self::Handle);
    fn barrier_shader_read(&mut self, handle: &Self::Handle);
    fn barrier_general(&mut self, handle: &Self::Handle);
    fn finish(self) -> Result<()>;
}

/// Device-level entry point: opens scopes and owns format capability queries.
/// `UploadPipeline` and `ReplacementMap` hold a `Box<dyn GpuBackend<...>>` (or
/// a generic parameter in the common case where a single concrete backend is
/// known at compile time).
pub trait GpuBackend: Send + Sync {
    type Handle: TextureHandle;
    type Scope: GpuScope<Handle = Self::Handle>;

    fn begin_scope(&self) -> Result<Self::Scope>;
    fn supports_format(&self, format: TextureFormat) -> bool;
}

/// A handle type with no backing resource, used by [`NullGpuBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullHandle(pub u64);

impl TextureHandle for NullHandle {}

/// No-op GPU backend: allocates monotonically increasing handle ids and
/// performs no real device work. Used by tests and by callers that only
/// want the cache's bookkeeping (fingerprinting, LRU, replacement
/// resolution) without an actual rendering surface.
#[derive(Debug, Default)]
pub struct NullGpuBackend {
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl NullGpuBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct NullScope {
    next_id: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl NullScope {
    fn next_handle(&self) -> NullHandle {
        NullHandle(self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }
}

impl GpuScope for NullScope {
    type Handle = NullHandle;

    fn alloc_tile_texture(&mut self, _byte_len: usize) -> Result<Self::Handle> {
        Ok(self.next_handle())
    }

    fn alloc_rgba_texture(&mut self, _width: u16, _height: u16, _mip_levels: u32) -> Result<Self::Handle> {
        Ok(self.next_handle())
    }

    fn copy_bytes_to_tile_texture(&mut self, _handle: &Self::Handle, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    fn copy_mip_region(
        &mut self,
        _handle: &Self::Handle,
        _mip: u32,
        _bytes: &[u8],
        _row_pitch: u32,
    ) -> Result<()> {
        Ok(())
    }

    fn dispatch_decode(&mut self, _tile: &Self::Handle, _target: &Self::Handle, _params: DecodeParams) -> Result<()> {
        Ok(())
    }

    fn barrier_copy_dest(&mut self, _handle: &Self::Handle) {}
    fn barrier_shader_read(&mut self, _handle: &Self::Handle) {}
    fn barrier_general(&mut self, _handle: &Self::Handle) {}

    fn finish(self) -> Result<()> {
        Ok(())
    }
}

impl GpuBackend for NullGpuBackend {
    type Handle = NullHandle;
    type Scope = NullScope;

    fn begin_scope(&self) -> Result<Self::Scope> {
        Ok(NullScope { next_id: self.next_id.clone() })
    }

    fn supports_format(&self, _format: TextureFormat) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_hands_out_unique_handles() {
        let backend = NullGpuBackend::new();
        let mut scope = backend.begin_scope().unwrap();
        let a = scope.alloc_tile_texture(4096).unwrap();
        let b = scope.alloc_tile_texture(4096).unwrap();
        assert_ne!(a, b);
        scope.finish().unwrap();
    }

    #[test]
    fn null_backend_supports_everything() {
        let backend = NullGpuBackend::new();
        assert!(backend.supports_format(TextureFormat::R8Uint));
        assert!(backend.supports_format(TextureFormat::Rgba8Unorm));
    }
}
