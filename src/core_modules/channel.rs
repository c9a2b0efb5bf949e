// THEORY:
// A `ChannelBinding` is the user's display choice for one channel of the volume:
// whether it is shown, which color it is painted in, and how its intensities are
// squeezed into 8 bits. An `Overlay` is a 1-bit mask with a color; the compositor
// treats it as one more channel whose quantizer only knows "on" and "off".
//
// Colors are always stored as straight RGBA bytes. Packed overlay colors are
// interpreted as 0xRRGGBBAA so every color in a render has the same channel order.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core_modules::output_buffer::Component;
use crate::core_modules::quantum::Family;

/// An RGBA display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Rgba {
    pub const RED: Rgba = Rgba::new(255, 0, 0, 255);
    pub const GREEN: Rgba = Rgba::new(0, 255, 0, 255);
    pub const BLUE: Rgba = Rgba::new(0, 0, 255, 255);

    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Unpacks `0xRRGGBBAA`.
    pub const fn from_packed_rgba(packed: u32) -> Self {
        Self::new(
            (packed >> 24) as u8,
            (packed >> 16) as u8,
            (packed >> 8) as u8,
            packed as u8,
        )
    }

    pub const fn to_packed_rgba(self) -> u32 {
        (self.red as u32) << 24 | (self.green as u32) << 16 | (self.blue as u32) << 8 | self.alpha as u32
    }

    /// The primary this color is, if it is exactly one of full red, green or blue.
    ///
    /// Alpha is not considered.
    pub fn primary(self) -> Option<Component> {
        match (self.red, self.green, self.blue) {
            (255, 0, 0) => Some(Component::Red),
            (0, 255, 0) => Some(Component::Green),
            (0, 0, 255) => Some(Component::Blue),
            _ => None,
        }
    }
}

/// Display settings for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub active: bool,
    pub color: Rgba,
    /// Start of the input window, in native sample units.
    pub input_start: f64,
    /// End of the input window, in native sample units.
    pub input_end: f64,
    pub family: Family,
    /// Curve coefficient for the polynomial and exponential families.
    #[serde(default = "default_coefficient")]
    pub coefficient: f64,
    #[serde(default)]
    pub noise_reduction: bool,
}

fn default_coefficient() -> f64 {
    1.0
}

impl ChannelBinding {
    /// An active, linear binding over `[input_start, input_end]`.
    pub fn new(color: Rgba, input_start: f64, input_end: f64) -> Self {
        Self {
            active: true,
            color,
            input_start,
            input_end,
            family: Family::Linear,
            coefficient: default_coefficient(),
            noise_reduction: false,
        }
    }

    pub fn with_family(mut self, family: Family, coefficient: f64) -> Self {
        self.family = family;
        self.coefficient = coefficient;
        self
    }

    pub fn with_noise_reduction(mut self, noise_reduction: bool) -> Self {
        self.noise_reduction = noise_reduction;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A 1-bit mask painted in a single color on top of the channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    /// One bit per output pixel, MSB-first, in `x2 * size_x1 + x1` order.
    pub mask: Arc<[u8]>,
    /// Packed `0xRRGGBBAA`.
    pub color: u32,
}

impl Overlay {
    pub fn new(mask: Vec<u8>, color: u32) -> Self {
        Self {
            mask: mask.into(),
            color,
        }
    }

    pub fn rgba(&self) -> Rgba {
        Rgba::from_packed_rgba(self.color)
    }
}
