// THEORY:
// `PixelsMeta` describes the 5-D pixel volume a plane is cut from: its extent
// along X, Y, Z, C and T, the native numeric type of one sample, and the byte
// order that type is stored in. It is the single source of truth for turning a
// (x, y, z, c, t) coordinate into a byte (or bit) offset and for decoding the
// bytes found there into an `f64`.
//
// Key architectural principles:
// 1.  **Immutable Metadata**: A `PixelsMeta` is built once and only read during a
//     render, so it is freely shared between region tasks.
// 2.  **XYZCT Layout**: Samples are laid out with X fastest, then Y, Z, C and T.
//     A Z-stack for one (c, t) pair is therefore contiguous.
// 3.  **Bit Volumes**: The 1-bit mask type is addressed in bits, packed MSB-first.

use serde::{Deserialize, Serialize};

/// Native numeric type of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelType {
    Bit,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float,
    Double,
}

impl PixelType {
    /// Storage width in bits.
    pub const fn bits(self) -> usize {
        match self {
            PixelType::Bit => 1,
            PixelType::Int8 | PixelType::Uint8 => 8,
            PixelType::Int16 | PixelType::Uint16 => 16,
            PixelType::Int32 | PixelType::Uint32 | PixelType::Float => 32,
            PixelType::Double => 64,
        }
    }

    /// Bytes per sample; `0` for the bit type, which is addressed in bits.
    pub const fn bytes_per_sample(self) -> usize {
        self.bits() / 8
    }

    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            PixelType::Int8 | PixelType::Int16 | PixelType::Int32 | PixelType::Float | PixelType::Double
        )
    }

    pub const fn is_floating_point(self) -> bool {
        matches!(self, PixelType::Float | PixelType::Double)
    }

    /// The full value range representable by this type.
    pub fn value_range(self) -> (f64, f64) {
        match self {
            PixelType::Bit => (0.0, 1.0),
            PixelType::Int8 => (i8::MIN as f64, i8::MAX as f64),
            PixelType::Uint8 => (0.0, u8::MAX as f64),
            PixelType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            PixelType::Uint16 => (0.0, u16::MAX as f64),
            PixelType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            PixelType::Uint32 => (0.0, u32::MAX as f64),
            PixelType::Float => (f32::MIN as f64, f32::MAX as f64),
            PixelType::Double => (f64::MIN, f64::MAX),
        }
    }
}

/// Byte order of multi-byte samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Pre-computed global range of one channel, used to size lookup tables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub global_min: f64,
    pub global_max: f64,
}

/// Metadata of a pixels set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelsMeta {
    pub size_x: usize,
    pub size_y: usize,
    pub size_z: usize,
    pub size_c: usize,
    pub size_t: usize,
    pub pixel_type: PixelType,
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Optional per-channel statistics; missing entries fall back to the type range.
    #[serde(default)]
    pub channel_stats: Vec<ChannelStats>,
}

impl PixelsMeta {
    pub fn new(
        size_x: usize,
        size_y: usize,
        size_z: usize,
        size_c: usize,
        size_t: usize,
        pixel_type: PixelType,
    ) -> Self {
        Self {
            size_x,
            size_y,
            size_z,
            size_c,
            size_t,
            pixel_type,
            byte_order: ByteOrder::default(),
            channel_stats: Vec::new(),
        }
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_channel_stats(mut self, stats: Vec<ChannelStats>) -> Self {
        self.channel_stats = stats;
        self
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.pixel_type.bytes_per_sample()
    }

    /// Samples in one XY plane.
    pub fn plane_samples(&self) -> usize {
        self.size_x * self.size_y
    }

    /// Samples in one Z-stack.
    pub fn stack_samples(&self) -> usize {
        self.plane_samples() * self.size_z
    }

    pub fn total_samples(&self) -> usize {
        self.stack_samples() * self.size_c * self.size_t
    }

    /// Bytes needed to hold `samples` samples of this type.
    pub fn storage_bytes(&self, samples: usize) -> usize {
        match self.pixel_type {
            PixelType::Bit => samples.div_ceil(8),
            other => samples * other.bytes_per_sample(),
        }
    }

    /// Global range for a channel, from the stats if present, else the type range.
    pub fn channel_range(&self, channel: usize) -> (f64, f64) {
        match self.channel_stats.get(channel) {
            Some(stats) => (stats.global_min, stats.global_max),
            None => self.pixel_type.value_range(),
        }
    }
}

/// Decodes one sample of `pixel_type` from `bytes`.
pub fn decode_sample(pixel_type: PixelType, order: ByteOrder, bytes: &[u8], index: usize) -> Option<f64> {
    if pixel_type == PixelType::Bit {
        let byte = *bytes.get(index / 8)?;
        return Some(((byte >> (7 - (index % 8))) & 1) as f64);
    }

    let width = pixel_type.bytes_per_sample();
    let start = index.checked_mul(width)?;
    let raw = bytes.get(start..start + width)?;

    macro_rules! read {
        ($ty:ty) => {{
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            buf.copy_from_slice(raw);
            match order {
                ByteOrder::BigEndian => <$ty>::from_be_bytes(buf) as f64,
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(buf) as f64,
            }
        }};
    }

    let value = match pixel_type {
        PixelType::Int8 => raw[0] as i8 as f64,
        PixelType::Uint8 => raw[0] as f64,
        PixelType::Int16 => read!(i16),
        PixelType::Uint16 => read!(u16),
        PixelType::Int32 => read!(i32),
        PixelType::Uint32 => read!(u32),
        PixelType::Float => read!(f32),
        PixelType::Double => read!(f64),
        PixelType::Bit => unreachable!("bit type handled above"),
    };
    Some(value)
}
