// THEORY:
// A `RegionTask` is the unit of parallel work: it composites one rectangle of the
// output, `[x1_start, x1_end) x [x2_start, x2_end)`, into a strip of the output
// buffer that it owns outright.
//
// For every pixel it walks the layers (active channels, then overlays) in order,
// quantizes the layer's sample, and adds `v * color / 255` to each of the R, G, B
// accumulators. The sums are clipped to [0, 255], pushed through the codomain
// chain, and stored.
//
// Key architectural principles:
// 1.  **Owned Output, Shared Input**: The strip is moved into the task and moved
//     back out on success. Layers and the codomain chain are shared read-only
//     through `Arc`; they are fully built before any task exists.
// 2.  **Primary Fast Path**: When every layer's color is a pure primary, each
//     quantized value goes straight into its component with no multiply/divide.
//     The result is identical to the general path.
// 3.  **Fail Loudly**: The first failing read or quantization aborts the task. A
//     quantization failure is tagged with the channel of the layer that caused it.

use log::trace;
use std::sync::Arc;

use crate::config::Optimizations;
use crate::core_modules::channel::Rgba;
use crate::core_modules::codomain::CodomainChain;
use crate::core_modules::output_buffer::{Component, OutputBuffer};
use crate::core_modules::plane::Plane2D;
use crate::core_modules::quantum::QuantumStrategy;
use crate::error::{RenderError, RenderResult};

/// One contributor to the composite: its data, its quantizer and its color.
#[derive(Debug, Clone)]
pub struct Layer {
    /// Reported in quantization failures. Channels use their index in the
    /// volume; overlays follow on after the last channel.
    pub channel: usize,
    pub plane: Plane2D,
    pub strategy: Arc<dyn QuantumStrategy>,
    pub color: Rgba,
}

impl Layer {
    pub fn new(channel: usize, plane: Plane2D, strategy: Arc<dyn QuantumStrategy>, color: Rgba) -> Self {
        Self {
            channel,
            plane,
            strategy,
            color,
        }
    }

    /// Quantized value of this layer at `(x1, x2)`.
    #[inline]
    fn sample(&self, x1: usize, x2: usize) -> RenderResult<i32> {
        let value = self.plane.pixel_value(x1, x2)?;
        self.strategy
            .quantize(value)
            .map(i32::from)
            .map_err(|e| e.for_channel(self.channel))
    }
}

/// The rectangle of the output one task is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBounds {
    pub x1_start: usize,
    pub x1_end: usize,
    pub x2_start: usize,
    pub x2_end: usize,
}

impl RegionBounds {
    pub fn rows(&self) -> usize {
        self.x2_end - self.x2_start
    }
}

/// Composites one region into its strip of the output.
pub struct RegionTask<B: OutputBuffer> {
    strip: B,
    layers: Arc<[Layer]>,
    codomain: Arc<CodomainChain>,
    optimizations: Optimizations,
    bounds: RegionBounds,
}

impl<B: OutputBuffer> RegionTask<B> {
    /// `strip` must span exactly the rows of `bounds`, at full output width.
    pub fn new(
        strip: B,
        layers: Arc<[Layer]>,
        codomain: Arc<CodomainChain>,
        optimizations: Optimizations,
        bounds: RegionBounds,
    ) -> Self {
        Self {
            strip,
            layers,
            codomain,
            optimizations,
            bounds,
        }
    }

    /// Per-layer target component, if the primary fast path applies.
    fn primary_components(&self) -> Option<Vec<Component>> {
        if !self.optimizations.primary_color_fast_path {
            return None;
        }
        self.layers
            .iter()
            .map(|layer| {
                layer
                    .color
                    .primary()
                    .filter(|_| self.optimizations.alpha_less || layer.color.alpha == 255)
            })
            .collect()
    }

    pub fn run(mut self) -> RenderResult<B> {
        let bounds = self.bounds;
        if self.strip.size_x2() != bounds.rows() || bounds.x1_end > self.strip.size_x1() {
            return Err(RenderError::InternalError(format!(
                "strip of {}x{} cannot hold region {:?}",
                self.strip.size_x1(),
                self.strip.size_x2(),
                bounds
            )));
        }
        trace!("region task {:?} started over {} layers", bounds, self.layers.len());

        let size_x1 = self.strip.size_x1();
        let primaries = self.primary_components();
        let alpha_less = self.optimizations.alpha_less;

        for x2 in bounds.x2_start..bounds.x2_end {
            let row_offset = (x2 - bounds.x2_start) * size_x1;
            for x1 in bounds.x1_start..bounds.x1_end {
                let (mut red, mut green, mut blue) = (0i32, 0i32, 0i32);

                match &primaries {
                    Some(components) => {
                        for (layer, component) in self.layers.iter().zip(components) {
                            let v = layer.sample(x1, x2)?;
                            match component {
                                Component::Red => red += v,
                                Component::Green => green += v,
                                Component::Blue => blue += v,
                            }
                        }
                    }
                    None => {
                        for layer in self.layers.iter() {
                            let v = layer.sample(x1, x2)?;
                            let color = layer.color;
                            if alpha_less {
                                red += v * color.red as i32 / 255;
                                green += v * color.green as i32 / 255;
                                blue += v * color.blue as i32 / 255;
                            } else {
                                let alpha = color.alpha as i32;
                                red += v * color.red as i32 * alpha / (255 * 255);
                                green += v * color.green as i32 * alpha / (255 * 255);
                                blue += v * color.blue as i32 * alpha / (255 * 255);
                            }
                        }
                    }
                }

                let red = self.codomain.transform(red.clamp(0, 255) as u8);
                let green = self.codomain.transform(green.clamp(0, 255) as u8);
                let blue = self.codomain.transform(blue.clamp(0, 255) as u8);
                self.strip.write_rgb(row_offset + x1, red, green, blue);
            }
        }

        trace!("region task {:?} finished", bounds);
        Ok(self.strip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::output_buffer::{ByteRgbBuffer, IntArgbBuffer};
    use crate::core_modules::pixels::{PixelType, PixelsMeta};
    use crate::core_modules::plane_def::{PlaneDef, PlaneGeometry};
    use crate::core_modules::quantum::BinaryMaskQuantizer;

    /// A layer whose "plane" is a mask and whose quantizer maps bits to 0/255.
    fn mask_layer(channel: usize, size_x1: usize, size_x2: usize, mask: Vec<u8>, color: Rgba) -> Layer {
        let meta = PixelsMeta::new(size_x1, size_x2, 1, 1, 1, PixelType::Uint8);
        let geometry = PlaneGeometry::new(&PlaneDef::xy(0, 0), &meta).unwrap();
        Layer::new(channel, Plane2D::from_mask(geometry, mask.into()), Arc::new(BinaryMaskQuantizer), color)
    }

    fn full_bounds(size_x1: usize, size_x2: usize) -> RegionBounds {
        RegionBounds {
            x1_start: 0,
            x1_end: size_x1,
            x2_start: 0,
            x2_end: size_x2,
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl QuantumStrategy for Failing {
        fn quantize(&self, value: f64) -> RenderResult<u8> {
            Err(RenderError::quantization(0, value, "always fails"))
        }
    }

    #[test]
    fn general_path_scales_by_color() {
        let layers: Arc<[Layer]> = vec![mask_layer(0, 2, 1, vec![0b1000_0000], Rgba::new(255, 128, 0, 255))].into();
        let task = RegionTask::new(
            ByteRgbBuffer::zeroed(2, 1),
            layers,
            Arc::new(CodomainChain::identity()),
            Optimizations::default(),
            full_bounds(2, 1),
        );
        let out = task.run().unwrap();
        assert_eq!(out.rgb_at(0), (255, 128, 0));
        assert_eq!(out.rgb_at(1), (0, 0, 0));
    }

    #[test]
    fn sums_are_clipped() {
        let layers: Arc<[Layer]> = vec![
            mask_layer(0, 1, 1, vec![0x80], Rgba::new(200, 0, 0, 255)),
            mask_layer(0, 1, 1, vec![0x80], Rgba::new(200, 10, 0, 255)),
        ]
        .into();
        let task = RegionTask::new(
            IntArgbBuffer::zeroed(1, 1),
            layers,
            Arc::new(CodomainChain::identity()),
            Optimizations::default(),
            full_bounds(1, 1),
        );
        assert_eq!(task.run().unwrap().rgb_at(0), (255, 10, 0));
    }

    #[test]
    fn fast_path_matches_general_path() {
        let make_layers = || -> Arc<[Layer]> {
            vec![
                mask_layer(0, 4, 2, vec![0b1100_1010], Rgba::RED),
                mask_layer(0, 4, 2, vec![0b0110_0101], Rgba::GREEN),
                mask_layer(0, 4, 2, vec![0b1111_0000], Rgba::RED),
            ]
            .into()
        };
        let run = |optimizations: Optimizations| {
            RegionTask::new(
                ByteRgbBuffer::zeroed(4, 2),
                make_layers(),
                Arc::new(CodomainChain::identity()),
                optimizations,
                full_bounds(4, 2),
            )
            .run()
            .unwrap()
        };
        let fast = run(Optimizations::default());
        let slow = run(Optimizations {
            primary_color_fast_path: false,
            alpha_less: true,
        });
        assert_eq!(fast, slow);
    }

    #[test]
    fn alpha_weights_when_not_alpha_less() {
        let layers: Arc<[Layer]> = vec![mask_layer(0, 1, 1, vec![0x80], Rgba::new(255, 0, 0, 51))].into();
        let task = RegionTask::new(
            ByteRgbBuffer::zeroed(1, 1),
            layers,
            Arc::new(CodomainChain::identity()),
            Optimizations {
                primary_color_fast_path: true,
                alpha_less: false,
            },
            full_bounds(1, 1),
        );
        assert_eq!(task.run().unwrap().rgb_at(0), (51, 0, 0));
    }

    #[test]
    fn writes_are_strip_local() {
        let layers: Arc<[Layer]> = vec![mask_layer(0, 2, 3, vec![0b0000_1100], Rgba::BLUE)].into();
        let bounds = RegionBounds {
            x1_start: 0,
            x1_end: 2,
            x2_start: 1,
            x2_end: 2,
        };
        let task = RegionTask::new(
            ByteRgbBuffer::zeroed(2, 1),
            layers,
            Arc::new(CodomainChain::identity()),
            Optimizations::default(),
            bounds,
        );
        let strip = task.run().unwrap();
        assert_eq!(strip.rgb_at(0), (0, 0, 0));
        assert_eq!(strip.rgb_at(1), (0, 0, 0));

        let layers: Arc<[Layer]> = vec![mask_layer(0, 2, 3, vec![0b0000_1100], Rgba::BLUE)].into();
        let bounds = RegionBounds {
            x2_start: 2,
            x2_end: 3,
            ..bounds
        };
        let strip = RegionTask::new(
            ByteRgbBuffer::zeroed(2, 1),
            layers,
            Arc::new(CodomainChain::identity()),
            Optimizations::default(),
            bounds,
        )
        .run()
        .unwrap();
        assert_eq!(strip.rgb_at(0), (0, 0, 255));
        assert_eq!(strip.rgb_at(1), (0, 0, 255));
    }

    #[test]
    fn quantization_failure_names_the_channel() {
        let ok = mask_layer(0, 1, 1, vec![0x80], Rgba::RED);
        let mut bad = mask_layer(4, 1, 1, vec![0x80], Rgba::GREEN);
        bad.strategy = Arc::new(Failing);
        let task = RegionTask::new(
            ByteRgbBuffer::zeroed(1, 1),
            vec![ok, bad].into(),
            Arc::new(CodomainChain::identity()),
            Optimizations::default(),
            full_bounds(1, 1),
        );
        assert!(matches!(
            task.run(),
            Err(RenderError::QuantizationError { channel: 4, .. })
        ));
    }

    #[test]
    fn mismatched_strip_is_an_internal_error() {
        let task = RegionTask::new(
            ByteRgbBuffer::zeroed(2, 2),
            Vec::<Layer>::new().into(),
            Arc::new(CodomainChain::identity()),
            Optimizations::default(),
            full_bounds(2, 1),
        );
        assert!(matches!(task.run(), Err(RenderError::InternalError(_))));
    }
}
