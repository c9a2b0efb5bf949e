// THEORY:
// `Plane2D` is the lazy 2-D view a region task reads samples from. It holds the
// raw bytes of either one XY plane or one Z-stack, plus enough of the volume
// metadata to turn an output coordinate (x1, x2) into a sample offset. Nothing is
// decoded until `pixel_value` is called, so the cost of a render is paid inside
// the region tasks, in parallel.
//
// Key architectural principles:
// 1.  **Slice Projection**: The orientation decides which of x, y, z the free
//     axes map onto; the fixed axis comes from the `PlaneDef`.
// 2.  **Output Coordinates**: Callers always address the plane in output
//     coordinates. Region-of-interest offsets and stride are applied here.
// 3.  **Masks Are Planes Too**: An overlay's 1-bit mask is wrapped in the same
//     type, addressed directly by output index, so the region task treats
//     overlays and channels identically.

use std::sync::Arc;

use crate::core_modules::pixel_source::PixelSource;
use crate::core_modules::pixels::{ByteOrder, PixelType, PixelsMeta, decode_sample};
use crate::core_modules::plane_def::{PlaneDef, PlaneGeometry, Slice};
use crate::error::{RenderError, RenderResult};

/// How the backing bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    /// One XY plane of the volume.
    Plane,
    /// One Z-stack, sliced along `slice` at `fixed`.
    Stack { slice: Slice, fixed: usize },
    /// A bit mask indexed by output pixel.
    Mask,
}

/// A lazily decoded 2-D plane.
#[derive(Debug, Clone)]
pub struct Plane2D {
    geometry: PlaneGeometry,
    pixel_type: PixelType,
    byte_order: ByteOrder,
    size_x: usize,
    size_y: usize,
    layout: Layout,
    data: Arc<[u8]>,
}

impl Plane2D {
    /// Wraps an overlay mask: one bit per output pixel, MSB-first.
    pub fn from_mask(geometry: PlaneGeometry, mask: Arc<[u8]>) -> Self {
        Self {
            geometry,
            pixel_type: PixelType::Bit,
            byte_order: ByteOrder::BigEndian,
            size_x: geometry.size_x1,
            size_y: geometry.size_x2,
            layout: Layout::Mask,
            data: mask,
        }
    }

    /// Decodes the sample shown at output coordinate `(x1, x2)`.
    pub fn pixel_value(&self, x1: usize, x2: usize) -> RenderResult<f64> {
        let invalid = || RenderError::InvalidCoordinate {
            x1,
            x2,
            size_x1: self.geometry.size_x1,
            size_x2: self.geometry.size_x2,
        };
        if x1 >= self.geometry.size_x1 || x2 >= self.geometry.size_x2 {
            return Err(invalid());
        }

        let index = match self.layout {
            Layout::Mask => self.geometry.index(x1, x2),
            Layout::Plane => {
                let (x, y) = self.geometry.to_plane(x1, x2);
                y * self.size_x + x
            }
            Layout::Stack { slice, fixed } => {
                let (p1, p2) = self.geometry.to_plane(x1, x2);
                let (x, y, z) = match slice {
                    Slice::XZ => (p1, fixed, p2),
                    Slice::ZY => (fixed, p2, p1),
                    Slice::XY => (p1, p2, fixed),
                };
                (z * self.size_y + y) * self.size_x + x
            }
        };

        decode_sample(self.pixel_type, self.byte_order, &self.data, index).ok_or_else(invalid)
    }
}

/// Builds `Plane2D`s from a pixel source.
pub struct PlaneFactory;

impl PlaneFactory {
    /// Reads the data for `channel` at `def` and wraps it as a lazy plane.
    pub fn create_plane(
        def: &PlaneDef,
        channel: usize,
        meta: &PixelsMeta,
        source: &dyn PixelSource,
    ) -> RenderResult<Plane2D> {
        // Also rejects a fixed axis or timepoint outside the volume.
        let geometry = PlaneGeometry::new(def, meta)?;
        if channel >= meta.size_c {
            return Err(RenderError::InvalidCoordinate {
                x1: channel,
                x2: def.t,
                size_x1: meta.size_c,
                size_x2: meta.size_t,
            });
        }

        let (layout, data, samples) = match def.slice {
            Slice::XY => (
                Layout::Plane,
                source.read_plane(def.fixed, channel, def.t)?,
                meta.plane_samples(),
            ),
            slice => (
                Layout::Stack {
                    slice,
                    fixed: def.fixed,
                },
                source.read_stack(channel, def.t)?,
                meta.stack_samples(),
            ),
        };

        let expected = meta.storage_bytes(samples);
        if data.len() < expected {
            return Err(RenderError::ResourceError(format!(
                "short read for channel {}: got {} bytes, expected {}",
                channel,
                data.len(),
                expected
            )));
        }

        Ok(Plane2D {
            geometry,
            pixel_type: meta.pixel_type,
            byte_order: meta.byte_order,
            size_x: meta.size_x,
            size_y: meta.size_y,
            layout,
            data,
        })
    }
}
