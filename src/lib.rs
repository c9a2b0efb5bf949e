// THEORY:
// This file is the entry point for the `hsb_render` library crate. The crate
// renders one 2-D plane of a multi-channel scientific volume (X, Y, Z, channel,
// time) into an RGB image. Each visible channel is quantized to 8 bits through
// its own display window, tinted in its own color and summed with the others.
// 1-bit overlays are added on top, and the result goes through a chain of
// 8-bit codomain transforms.
//
// The public surface is the `Compositor` with its three entry points, the
// `RenderingContext` that holds the display state, and the collaborator traits a
// host implements (`PixelSource`, `QuantumStrategy`, `RenderingStats`). The
// building blocks under `core_modules` are public for hosts that need to plug in
// their own pieces, but most callers only need the re-exports below.

pub mod compositor;
pub mod config;
pub mod core_modules;
pub mod error;

pub use crate::compositor::{Compositor, image_size, num_tasks, partition, plane_dims_as_string};
pub use crate::config::{CompositorConfig, Optimizations};
pub use crate::core_modules::channel::{ChannelBinding, Overlay, Rgba};
pub use crate::core_modules::codomain::{CodomainChain, CodomainMap};
pub use crate::core_modules::context::RenderingContext;
pub use crate::core_modules::output_buffer::{ByteRgbBuffer, Component, IntArgbBuffer, IntRgbaBuffer, OutputBuffer};
pub use crate::core_modules::pixel_source::{InMemoryPixelSource, PixelSource};
pub use crate::core_modules::pixels::{ByteOrder, ChannelStats, PixelType, PixelsMeta};
pub use crate::core_modules::plane_def::{PlaneDef, Region, Slice};
pub use crate::core_modules::quantum::{Family, QuantumDef, QuantumStrategy};
pub use crate::core_modules::stats::{NoStats, RenderingStats, TimingStats};
pub use crate::core_modules::worker_pool::WorkerPool;
pub use crate::error::{RenderError, RenderResult};
