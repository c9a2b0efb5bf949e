// Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use hsb_render::{Compositor, CompositorConfig, InMemoryPixelSource, PixelSource, PixelType, PixelsMeta};

pub fn compositor(max_tasks: usize) -> Compositor {
    Compositor::new(CompositorConfig {
        max_tasks,
        ..CompositorConfig::default()
    })
    .unwrap()
}

/// A Uint8 volume with one Z section; `channels[c]` holds the XY plane of channel c.
pub fn uint8_planes(size_x: usize, size_y: usize, channels: &[Vec<u8>]) -> (PixelsMeta, Arc<InMemoryPixelSource>) {
    let meta = PixelsMeta::new(size_x, size_y, 1, channels.len(), 1, PixelType::Uint8);
    let data = channels.iter().flatten().copied().collect();
    let source = InMemoryPixelSource::new(meta.clone(), data).unwrap();
    (meta, Arc::new(source))
}

/// A single-channel plane filled with `value`.
pub fn constant_plane(size_x: usize, size_y: usize, value: u8) -> Vec<u8> {
    vec![value; size_x * size_y]
}

/// A deterministic pseudo-random plane.
pub fn noise_plane(size_x: usize, size_y: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..size_x * size_y)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}

/// Delegates to an in-memory source but fails every close.
pub struct FailingCloseSource {
    pub inner: InMemoryPixelSource,
}

impl PixelSource for FailingCloseSource {
    fn open(&self) -> io::Result<()> {
        self.inner.open()
    }

    fn read_plane(&self, z: usize, c: usize, t: usize) -> io::Result<Arc<[u8]>> {
        self.inner.read_plane(z, c, t)
    }

    fn read_stack(&self, c: usize, t: usize) -> io::Result<Arc<[u8]>> {
        self.inner.read_stack(c, t)
    }

    fn close(&self) -> io::Result<()> {
        self.inner.close()?;
        Err(io::Error::other("disk went away"))
    }
}
