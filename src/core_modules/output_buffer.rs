// THEORY:
// The compositor can hand its result back in three raster shapes. They all hold
// the same RGB content for `size_x1 * size_x2` pixels, addressed by the linear
// index `x2 * size_x1 + x1`; they only differ in how a pixel is stored:
//
// - `ByteRgbBuffer`: three parallel byte planes (R, G, B).
// - `IntArgbBuffer`: one packed `i32` per pixel, `0xFF_RR_GG_BB`.
// - `IntRgbaBuffer`: one packed `i32` per pixel, `0xRR_GG_BB_FF`.
//
// Key architectural principles:
// 1.  **One Writer Per Pixel**: A buffer is split into disjoint row strips before
//     the region tasks start. Each task owns its strip outright, so writes never
//     race and nothing needs a lock. The strips are joined back in order.
// 2.  **Alpha Is Pinned**: The packed forms always carry a fully opaque alpha;
//     alpha never takes part in `image_size`.
// 3.  **Zero Start**: Every buffer starts all-zero.

use image::{Rgb, RgbImage, Rgba, RgbaImage};

/// A color component of the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Red,
    Green,
    Blue,
}

/// Common surface of the three output shapes.
pub trait OutputBuffer: Send + Sized + 'static {
    /// An all-zero buffer of `size_x1 * size_x2` pixels.
    fn zeroed(size_x1: usize, size_x2: usize) -> Self;

    fn size_x1(&self) -> usize;

    fn size_x2(&self) -> usize;

    fn pixel_count(&self) -> usize {
        self.size_x1() * self.size_x2()
    }

    /// Reported image size; alpha is never counted.
    fn image_size(&self) -> usize {
        self.pixel_count() * 3
    }

    /// Stores one composed pixel at linear `index`.
    fn write_rgb(&mut self, index: usize, red: u8, green: u8, blue: u8);

    /// Reads back the RGB content at linear `index`.
    fn rgb_at(&self, index: usize) -> (u8, u8, u8);

    /// Splits into strips of `rows` full rows each (the last may be shorter).
    fn split_rows(self, rows: usize) -> Vec<Self>;

    /// Concatenates strips produced by `split_rows`, in order.
    fn join_rows(strips: Vec<Self>) -> Self;
}

/// Splits `data` into consecutive chunks of `chunk` elements without copying the head.
fn split_vec<T>(mut data: Vec<T>, chunk: usize) -> Vec<Vec<T>> {
    if chunk == 0 || data.len() <= chunk {
        return vec![data];
    }
    let mut strips = Vec::with_capacity(data.len().div_ceil(chunk));
    while data.len() > chunk {
        let start = (data.len() - 1) / chunk * chunk;
        strips.push(data.split_off(start));
    }
    strips.push(data);
    strips.reverse();
    strips
}

fn join_vec<T>(strips: impl IntoIterator<Item = Vec<T>>) -> Vec<T> {
    let mut iter = strips.into_iter();
    let mut joined = iter.next().unwrap_or_default();
    for mut strip in iter {
        joined.append(&mut strip);
    }
    joined
}

fn rows_of(len: usize, size_x1: usize) -> usize {
    if size_x1 == 0 { 0 } else { len / size_x1 }
}

// --- Byte planes ---

/// Three parallel byte planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRgbBuffer {
    size_x1: usize,
    size_x2: usize,
    red: Vec<u8>,
    green: Vec<u8>,
    blue: Vec<u8>,
}

impl ByteRgbBuffer {
    #[inline]
    pub fn set_component(&mut self, index: usize, component: Component, value: u8) {
        match component {
            Component::Red => self.red[index] = value,
            Component::Green => self.green[index] = value,
            Component::Blue => self.blue[index] = value,
        }
    }

    pub fn component(&self, index: usize, component: Component) -> u8 {
        match component {
            Component::Red => self.red[index],
            Component::Green => self.green[index],
            Component::Blue => self.blue[index],
        }
    }

    pub fn red_band(&self) -> &[u8] {
        &self.red
    }

    pub fn green_band(&self) -> &[u8] {
        &self.green
    }

    pub fn blue_band(&self) -> &[u8] {
        &self.blue
    }

    /// Interleaves the planes into an `image` RGB buffer.
    pub fn to_rgb_image(&self) -> RgbImage {
        let width = self.size_x1;
        RgbImage::from_fn(self.size_x1 as u32, self.size_x2 as u32, |x, y| {
            let i = y as usize * width + x as usize;
            Rgb([self.red[i], self.green[i], self.blue[i]])
        })
    }
}

impl OutputBuffer for ByteRgbBuffer {
    fn zeroed(size_x1: usize, size_x2: usize) -> Self {
        let n = size_x1 * size_x2;
        Self {
            size_x1,
            size_x2,
            red: vec![0; n],
            green: vec![0; n],
            blue: vec![0; n],
        }
    }

    fn size_x1(&self) -> usize {
        self.size_x1
    }

    fn size_x2(&self) -> usize {
        self.size_x2
    }

    #[inline]
    fn write_rgb(&mut self, index: usize, red: u8, green: u8, blue: u8) {
        self.red[index] = red;
        self.green[index] = green;
        self.blue[index] = blue;
    }

    fn rgb_at(&self, index: usize) -> (u8, u8, u8) {
        (self.red[index], self.green[index], self.blue[index])
    }

    fn split_rows(self, rows: usize) -> Vec<Self> {
        let chunk = rows * self.size_x1;
        let size_x1 = self.size_x1;
        let reds = split_vec(self.red, chunk);
        let greens = split_vec(self.green, chunk);
        let blues = split_vec(self.blue, chunk);
        reds.into_iter()
            .zip(greens)
            .zip(blues)
            .map(|((red, green), blue)| Self {
                size_x1,
                size_x2: rows_of(red.len(), size_x1),
                red,
                green,
                blue,
            })
            .collect()
    }

    fn join_rows(strips: Vec<Self>) -> Self {
        let size_x1 = strips.first().map_or(0, |s| s.size_x1);
        let size_x2 = strips.iter().map(|s| s.size_x2).sum();
        let mut reds = Vec::with_capacity(strips.len());
        let mut greens = Vec::with_capacity(strips.len());
        let mut blues = Vec::with_capacity(strips.len());
        for strip in strips {
            reds.push(strip.red);
            greens.push(strip.green);
            blues.push(strip.blue);
        }
        Self {
            size_x1,
            size_x2,
            red: join_vec(reds),
            green: join_vec(greens),
            blue: join_vec(blues),
        }
    }
}

// --- Packed integers ---

macro_rules! packed_buffer {
    ($(#[$doc:meta])* $name:ident, pack = $pack:expr, unpack = $unpack:expr, alpha = $alpha:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            size_x1: usize,
            size_x2: usize,
            data: Vec<i32>,
        }

        impl $name {
            /// Stores a packed pixel; the alpha byte is forced to `0xFF`.
            #[inline]
            pub fn set_packed(&mut self, index: usize, packed: i32) {
                self.data[index] = ((packed as u32) | $alpha) as i32;
            }

            pub fn packed(&self, index: usize) -> i32 {
                self.data[index]
            }

            pub fn as_slice(&self) -> &[i32] {
                &self.data
            }

            /// Copies into an `image` RGBA buffer.
            pub fn to_rgba_image(&self) -> RgbaImage {
                let width = self.size_x1;
                RgbaImage::from_fn(self.size_x1 as u32, self.size_x2 as u32, |x, y| {
                    let (r, g, b) = self.rgb_at(y as usize * width + x as usize);
                    Rgba([r, g, b, 0xFF])
                })
            }
        }

        impl OutputBuffer for $name {
            fn zeroed(size_x1: usize, size_x2: usize) -> Self {
                Self {
                    size_x1,
                    size_x2,
                    data: vec![0; size_x1 * size_x2],
                }
            }

            fn size_x1(&self) -> usize {
                self.size_x1
            }

            fn size_x2(&self) -> usize {
                self.size_x2
            }

            #[inline]
            fn write_rgb(&mut self, index: usize, red: u8, green: u8, blue: u8) {
                let pack: fn(u32, u32, u32) -> u32 = $pack;
                self.set_packed(index, pack(red as u32, green as u32, blue as u32) as i32);
            }

            fn rgb_at(&self, index: usize) -> (u8, u8, u8) {
                let unpack: fn(u32) -> (u8, u8, u8) = $unpack;
                unpack(self.data[index] as u32)
            }

            fn split_rows(self, rows: usize) -> Vec<Self> {
                let size_x1 = self.size_x1;
                split_vec(self.data, rows * size_x1)
                    .into_iter()
                    .map(|data| Self {
                        size_x1,
                        size_x2: rows_of(data.len(), size_x1),
                        data,
                    })
                    .collect()
            }

            fn join_rows(strips: Vec<Self>) -> Self {
                let size_x1 = strips.first().map_or(0, |s| s.size_x1);
                let size_x2 = strips.iter().map(|s| s.size_x2).sum();
                Self {
                    size_x1,
                    size_x2,
                    data: join_vec(strips.into_iter().map(|s| s.data)),
                }
            }
        }
    };
}

packed_buffer!(
    /// One `0xFF_RR_GG_BB` integer per pixel.
    IntArgbBuffer,
    pack = |r, g, b| 0xFF00_0000 | r << 16 | g << 8 | b,
    unpack = |v| ((v >> 16) as u8, (v >> 8) as u8, v as u8),
    alpha = 0xFF00_0000
);

packed_buffer!(
    /// One `0xRR_GG_BB_FF` integer per pixel.
    IntRgbaBuffer,
    pack = |r, g, b| r << 24 | g << 16 | b << 8 | 0xFF,
    unpack = |v| ((v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8),
    alpha = 0x0000_00FF
);
