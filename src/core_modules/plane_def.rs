// THEORY:
// A `PlaneDef` is a request for one 2-D slice of the volume. The slice
// orientation picks the two free axes (x1 is always the fast one in the output),
// the fixed-axis index pins the third spatial axis, and `t` pins time. An
// optional region of interest crops the slice, and an optional stride subsamples
// it for previews.
//
// `PlaneGeometry` is the per-call, immutable answer to "how big is the output and
// which plane coordinate does output pixel (x1, x2) come from". It replaces any
// size state that would otherwise live on the compositor itself.

use serde::{Deserialize, Serialize};

use crate::core_modules::pixels::PixelsMeta;
use crate::error::{RenderError, RenderResult};

/// Slice orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slice {
    /// Free axes X, Y; Z is fixed.
    XY,
    /// Free axes X, Z; Y is fixed.
    XZ,
    /// Free axes Z, Y; X is fixed.
    ZY,
}

impl Slice {
    pub const XY_ID: u8 = 0;
    pub const ZY_ID: u8 = 1;
    pub const XZ_ID: u8 = 2;

    /// Maps a wire-level slice ID to an orientation.
    pub fn from_id(id: u8) -> RenderResult<Self> {
        match id {
            Self::XY_ID => Ok(Slice::XY),
            Self::ZY_ID => Ok(Slice::ZY),
            Self::XZ_ID => Ok(Slice::XZ),
            other => Err(RenderError::InvalidSlice(other)),
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Slice::XY => Self::XY_ID,
            Slice::ZY => Self::ZY_ID,
            Slice::XZ => Self::XZ_ID,
        }
    }
}

/// A rectangle in plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }
}

/// A request for one plane of the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneDef {
    pub slice: Slice,
    /// Index along the fixed axis: z for XY, y for XZ, x for ZY.
    pub fixed: usize,
    pub t: usize,
    #[serde(default)]
    pub region: Option<Region>,
    /// Keep every `stride + 1`-th sample along both free axes.
    #[serde(default)]
    pub stride: usize,
}

impl PlaneDef {
    pub fn xy(z: usize, t: usize) -> Self {
        Self::new(Slice::XY, z, t)
    }

    pub fn xz(y: usize, t: usize) -> Self {
        Self::new(Slice::XZ, y, t)
    }

    pub fn zy(x: usize, t: usize) -> Self {
        Self::new(Slice::ZY, x, t)
    }

    pub fn new(slice: Slice, fixed: usize, t: usize) -> Self {
        Self {
            slice,
            fixed,
            t,
            region: None,
            stride: 0,
        }
    }

    /// Builds a plane definition from a raw slice ID.
    pub fn from_slice_id(slice_id: u8, fixed: usize, t: usize) -> RenderResult<Self> {
        Ok(Self::new(Slice::from_id(slice_id)?, fixed, t))
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }
}

/// Output extent of a plane and the mapping back into plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    /// Output width (fast axis).
    pub size_x1: usize,
    /// Output height (slow axis).
    pub size_x2: usize,
    /// Full extent of the slice before cropping.
    pub plane_x1: usize,
    pub plane_x2: usize,
    pub origin_x1: usize,
    pub origin_x2: usize,
    pub step: usize,
}

impl PlaneGeometry {
    /// Sizes the output for `def` against the volume described by `meta`.
    pub fn new(def: &PlaneDef, meta: &PixelsMeta) -> RenderResult<Self> {
        let (plane_x1, plane_x2, fixed_limit) = match def.slice {
            Slice::XY => (meta.size_x, meta.size_y, meta.size_z),
            Slice::XZ => (meta.size_x, meta.size_z, meta.size_y),
            Slice::ZY => (meta.size_z, meta.size_y, meta.size_x),
        };
        if def.fixed >= fixed_limit || def.t >= meta.size_t {
            return Err(RenderError::InvalidCoordinate {
                x1: def.fixed,
                x2: def.t,
                size_x1: fixed_limit,
                size_x2: meta.size_t,
            });
        }

        let (origin_x1, origin_x2, extent_x1, extent_x2) = match def.region {
            Some(region) => {
                let end_x1 = region.x.saturating_add(region.width);
                let end_x2 = region.y.saturating_add(region.height);
                if end_x1 > plane_x1 || end_x2 > plane_x2 {
                    return Err(RenderError::InvalidCoordinate {
                        x1: end_x1,
                        x2: end_x2,
                        size_x1: plane_x1,
                        size_x2: plane_x2,
                    });
                }
                (region.x, region.y, region.width, region.height)
            }
            None => (0, 0, plane_x1, plane_x2),
        };

        let step = def.stride + 1;
        Ok(Self {
            size_x1: extent_x1.div_ceil(step),
            size_x2: extent_x2.div_ceil(step),
            plane_x1,
            plane_x2,
            origin_x1,
            origin_x2,
            step,
        })
    }

    /// Number of output pixels.
    pub fn pixel_count(&self) -> usize {
        self.size_x1 * self.size_x2
    }

    /// Linear output index of `(x1, x2)`.
    #[inline]
    pub fn index(&self, x1: usize, x2: usize) -> usize {
        x2 * self.size_x1 + x1
    }

    /// Maps an output coordinate into plane coordinates.
    #[inline]
    pub fn to_plane(&self, x1: usize, x2: usize) -> (usize, usize) {
        (self.origin_x1 + x1 * self.step, self.origin_x2 + x2 * self.step)
    }
}
