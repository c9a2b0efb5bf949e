// THEORY:
// The pixel source is the compositor's only window onto stored pixel data. It is
// an external collaborator (a file, a memory map, a remote store), so it is
// modelled as a trait with an explicit open/close lifecycle. Reads hand back
// shared, immutable byte blocks that region tasks decode lazily.
//
// Key architectural principles:
// 1.  **Scoped Acquisition**: A source is only ever used through a
//     `PixelSourceGuard`. The guard opens the source on creation and closes it
//     on every exit path: `release()` on success so a close failure reaches the
//     caller, and `Drop` on early returns and task failures.
// 2.  **Idempotent Close**: Closing twice is harmless; implementations must not
//     fail the second close.
// 3.  **Shared Blocks**: Reads return `Arc<[u8]>` so a block can outlive the
//     borrow of the source and be handed to worker threads.

use log::{debug, error};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::core_modules::pixels::{PixelType, PixelsMeta};
use crate::error::{RenderError, RenderResult};

/// Access to the stored samples of one pixels set.
pub trait PixelSource: Send + Sync {
    /// Acquires whatever the source needs before reads (file handles, mappings).
    fn open(&self) -> io::Result<()>;

    /// Bytes of one XY plane, laid out row-major with X fastest.
    fn read_plane(&self, z: usize, c: usize, t: usize) -> io::Result<Arc<[u8]>>;

    /// Bytes of the Z-stack of one channel at one timepoint (planes in Z order).
    fn read_stack(&self, c: usize, t: usize) -> io::Result<Arc<[u8]>>;

    /// Releases the source. Must be idempotent.
    fn close(&self) -> io::Result<()>;
}

/// Keeps a pixel source open for the lifetime of the guard.
pub struct PixelSourceGuard<'a> {
    source: &'a dyn PixelSource,
    released: bool,
}

impl<'a> PixelSourceGuard<'a> {
    /// Opens `source`, mapping failures to `ResourceError`.
    pub fn acquire(source: &'a dyn PixelSource) -> RenderResult<Self> {
        source.open().map_err(|e| {
            error!("Pixels could not be opened: {}", e);
            RenderError::ResourceError(e.to_string())
        })?;
        debug!("pixel source acquired");
        Ok(Self {
            source,
            released: false,
        })
    }

    pub fn source(&self) -> &'a dyn PixelSource {
        self.source
    }

    /// Closes the source and reports a close failure to the caller.
    pub fn release(mut self) -> RenderResult<()> {
        self.released = true;
        close_source(self.source)
    }
}

impl Drop for PixelSourceGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            // The error is already logged; there is nobody left to return it to.
            let _ = close_source(self.source);
        }
    }
}

fn close_source(source: &dyn PixelSource) -> RenderResult<()> {
    source.close().map_err(|e| {
        error!("Pixels could not be closed successfully: {}", e);
        RenderError::ResourceError(format!("{} Please check server log.", e))
    })?;
    debug!("pixel source released");
    Ok(())
}

/// A pixel source backed by an in-memory XYZCT byte volume.
pub struct InMemoryPixelSource {
    meta: PixelsMeta,
    data: Arc<[u8]>,
    is_open: AtomicBool,
    open_count: AtomicUsize,
    close_count: AtomicUsize,
}

impl InMemoryPixelSource {
    /// Wraps `data`, which must hold exactly one full volume described by `meta`.
    pub fn new(meta: PixelsMeta, data: Vec<u8>) -> RenderResult<Self> {
        let expected = meta.storage_bytes(meta.total_samples());
        if data.len() != expected {
            return Err(RenderError::ResourceError(format!(
                "volume holds {} bytes, metadata describes {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            meta,
            data: data.into(),
            is_open: AtomicBool::new(false),
            open_count: AtomicUsize::new(0),
            close_count: AtomicUsize::new(0),
        })
    }

    pub fn meta(&self) -> &PixelsMeta {
        &self.meta
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    /// How many times the source has been opened.
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Acquire)
    }

    /// How many close calls actually released the source.
    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "pixel source is not open"))
        }
    }

    fn check_channel(&self, c: usize, t: usize) -> io::Result<()> {
        if c >= self.meta.size_c || t >= self.meta.size_t {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("channel {} / timepoint {} out of range", c, t),
            ));
        }
        Ok(())
    }

    /// Copies `count` samples starting at sample `start`.
    fn copy_samples(&self, start: usize, count: usize) -> Arc<[u8]> {
        if self.meta.pixel_type == PixelType::Bit {
            return extract_bits(&self.data, start, count).into();
        }
        let width = self.meta.bytes_per_sample();
        self.data[start * width..(start + count) * width].into()
    }
}

impl PixelSource for InMemoryPixelSource {
    fn open(&self) -> io::Result<()> {
        self.is_open.store(true, Ordering::Release);
        self.open_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn read_plane(&self, z: usize, c: usize, t: usize) -> io::Result<Arc<[u8]>> {
        self.ensure_open()?;
        self.check_channel(c, t)?;
        if z >= self.meta.size_z {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("z {} out of range", z),
            ));
        }
        let plane = self.meta.plane_samples();
        let stack_start = (t * self.meta.size_c + c) * self.meta.stack_samples();
        Ok(self.copy_samples(stack_start + z * plane, plane))
    }

    fn read_stack(&self, c: usize, t: usize) -> io::Result<Arc<[u8]>> {
        self.ensure_open()?;
        self.check_channel(c, t)?;
        let stack = self.meta.stack_samples();
        let stack_start = (t * self.meta.size_c + c) * stack;
        Ok(self.copy_samples(stack_start, stack))
    }

    fn close(&self) -> io::Result<()> {
        if self.is_open.swap(false, Ordering::AcqRel) {
            self.close_count.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }
}

/// Re-packs `count` bits starting at bit `start` into a fresh MSB-first buffer.
fn extract_bits(data: &[u8], start: usize, count: usize) -> Vec<u8> {
    if start % 8 == 0 {
        let first = start / 8;
        let mut out = data[first..first + count.div_ceil(8)].to_vec();
        // Clear trailing bits that belong to the next block.
        if count % 8 != 0 {
            if let Some(last) = out.last_mut() {
                *last &= 0xFFu8 << (8 - count % 8);
            }
        }
        return out;
    }

    let mut out = vec![0u8; count.div_ceil(8)];
    for i in 0..count {
        let src = start + i;
        let bit = (data[src / 8] >> (7 - src % 8)) & 1;
        out[i / 8] |= bit << (7 - i % 8);
    }
    out
}
