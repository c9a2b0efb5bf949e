// THEORY:
// Quantization maps a native sample (any of the volume's numeric types, carried
// as `f64`) into the 8-bit codomain the compositor mixes colors in. Each channel
// owns one `QuantumStrategy`, built from its binding by the `QuantumManager`.
//
// Key architectural principles:
// 1.  **Window, Then Curve**: The input window [start, end] clips the sample
//     first; values outside it saturate to the codomain ends. Inside the window
//     the family curve f is normalized so f(start) -> 0 and f(end) -> 1, then
//     spread over [cd_start, cd_end] in `bit_resolution` steps.
// 2.  **Read-Only After Construction**: Strategies validate everything up front
//     and are never mutated afterwards, so region tasks share them through `Arc`
//     without locking.
// 3.  **Lookup Tables For Small Types**: 8- and 16-bit integer channels precompute
//     every answer over the channel's global range; wider and floating point
//     types evaluate the curve per sample.
// 4.  **Masks**: The binary-mask quantizer ignores windows entirely. Any nonzero
//     sample is full intensity; zero is nothing.

use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core_modules::channel::ChannelBinding;
use crate::core_modules::pixels::{PixelType, PixelsMeta};
use crate::error::{RenderError, RenderResult};

/// Fraction of the window at each end that noise reduction collapses.
pub const NOISE_REDUCTION_FRACTION: f64 = 0.1;

/// Largest lookup table the factory will build.
const MAX_LUT_ENTRIES: usize = 1 << 16;

/// Maps one native sample to an 8-bit codomain value.
pub trait QuantumStrategy: Send + Sync + fmt::Debug {
    fn quantize(&self, value: f64) -> RenderResult<u8>;
}

/// Curve family of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    Linear,
    Polynomial,
    Logarithmic,
    Exponential,
    BinaryMask,
}

impl Family {
    /// Evaluates the un-normalized curve.
    fn transform(self, x: f64, k: f64) -> f64 {
        match self {
            Family::Linear | Family::BinaryMask => x,
            Family::Polynomial => x.powf(k),
            Family::Logarithmic => x.ln(),
            Family::Exponential => x.powf(k).exp(),
        }
    }
}

/// Codomain settings shared by every channel of a rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantumDef {
    pub cd_start: u8,
    pub cd_end: u8,
    /// Number of discrete steps between `cd_start` and `cd_end`.
    pub bit_resolution: u32,
}

impl Default for QuantumDef {
    fn default() -> Self {
        Self {
            cd_start: 0,
            cd_end: 255,
            bit_resolution: 255,
        }
    }
}

/// Evaluates the windowed curve for every sample.
#[derive(Debug, Clone)]
pub struct CurveQuantizer {
    def: QuantumDef,
    family: Family,
    coefficient: f64,
    window_start: f64,
    window_end: f64,
    noise_reduction: bool,
    curve_start: f64,
    curve_end: f64,
}

impl CurveQuantizer {
    /// Validates the window and curve for `channel` and precomputes its ends.
    pub fn new(def: QuantumDef, binding: &ChannelBinding, channel: usize) -> RenderResult<Self> {
        let (start, end) = (binding.input_start, binding.input_end);
        let fail = |reason: &str| RenderError::quantization(channel, start, reason);

        if !start.is_finite() || !end.is_finite() || start >= end {
            return Err(fail("impossible window"));
        }
        if def.cd_start > def.cd_end || def.bit_resolution == 0 {
            return Err(fail("impossible codomain"));
        }
        match binding.family {
            Family::Logarithmic if start <= 0.0 => {
                return Err(fail("logarithmic window must be strictly positive"));
            }
            Family::Polynomial | Family::Exponential if binding.coefficient <= 0.0 => {
                return Err(fail("curve coefficient must be positive"));
            }
            _ => {}
        }

        let curve_start = binding.family.transform(start, binding.coefficient);
        let curve_end = binding.family.transform(end, binding.coefficient);
        if !curve_start.is_finite() || !curve_end.is_finite() || curve_end <= curve_start {
            return Err(fail("curve is not defined over the window"));
        }

        Ok(Self {
            def,
            family: binding.family,
            coefficient: binding.coefficient,
            window_start: start,
            window_end: end,
            noise_reduction: binding.noise_reduction,
            curve_start,
            curve_end,
        })
    }

    fn spread(&self, normalized: f64) -> u8 {
        let steps = self.def.bit_resolution as f64;
        let level = (normalized * steps).round() / steps;
        let span = (self.def.cd_end - self.def.cd_start) as f64;
        (self.def.cd_start as f64 + level * span).round() as u8
    }
}

impl QuantumStrategy for CurveQuantizer {
    fn quantize(&self, value: f64) -> RenderResult<u8> {
        if !value.is_finite() {
            return Err(RenderError::quantization(0, value, "sample is not finite"));
        }

        let (mut low, mut high) = (self.window_start, self.window_end);
        if self.noise_reduction {
            let margin = (high - low) * NOISE_REDUCTION_FRACTION;
            low += margin;
            high -= margin;
        }
        if value <= low {
            return Ok(self.def.cd_start);
        }
        if value >= high {
            return Ok(self.def.cd_end);
        }

        let curve = self.family.transform(value, self.coefficient);
        let normalized = (curve - self.curve_start) / (self.curve_end - self.curve_start);
        if !normalized.is_finite() {
            return Err(RenderError::quantization(0, value, "curve overflowed"));
        }
        Ok(self.spread(normalized.clamp(0.0, 1.0)))
    }
}

/// Answers from a table built over an integer channel's global range.
#[derive(Clone)]
pub struct LutQuantizer {
    min: i64,
    table: Vec<u8>,
    fallback: CurveQuantizer,
}

impl fmt::Debug for LutQuantizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LutQuantizer")
            .field("min", &self.min)
            .field("entries", &self.table.len())
            .finish()
    }
}

impl LutQuantizer {
    /// Tabulates `curve` over the integers of `[min, max]`.
    pub fn new(curve: CurveQuantizer, min: i64, max: i64) -> RenderResult<Self> {
        let entries = (max - min + 1).max(0) as usize;
        let table = (0..entries)
            .map(|i| curve.quantize((min + i as i64) as f64))
            .collect::<RenderResult<Vec<u8>>>()?;
        Ok(Self {
            min,
            table,
            fallback: curve,
        })
    }
}

impl QuantumStrategy for LutQuantizer {
    fn quantize(&self, value: f64) -> RenderResult<u8> {
        if value.fract() == 0.0 {
            let offset = value as i64 - self.min;
            if offset >= 0 {
                if let Some(&entry) = self.table.get(offset as usize) {
                    return Ok(entry);
                }
            }
        }
        // Off-table (or non-integral) samples go through the curve.
        self.fallback.quantize(value)
    }
}

/// Maps nonzero samples to 255 and zero to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryMaskQuantizer;

impl QuantumStrategy for BinaryMaskQuantizer {
    fn quantize(&self, value: f64) -> RenderResult<u8> {
        if value.is_nan() {
            return Err(RenderError::quantization(0, value, "mask sample is not a number"));
        }
        Ok(if value != 0.0 { 255 } else { 0 })
    }
}

/// Picks the strategy implementation for a channel.
pub struct QuantumFactory;

impl QuantumFactory {
    pub fn strategy_for(
        def: QuantumDef,
        binding: &ChannelBinding,
        meta: &PixelsMeta,
        channel: usize,
    ) -> RenderResult<Arc<dyn QuantumStrategy>> {
        if binding.family == Family::BinaryMask {
            return Ok(Arc::new(BinaryMaskQuantizer));
        }

        let curve = CurveQuantizer::new(def, binding, channel)?;
        let tabulated = matches!(
            meta.pixel_type,
            PixelType::Int8 | PixelType::Uint8 | PixelType::Int16 | PixelType::Uint16
        );
        if !tabulated {
            return Ok(Arc::new(curve));
        }

        let (type_min, type_max) = meta.pixel_type.value_range();
        let (min, max) = meta.channel_range(channel);
        let min = min.max(type_min).floor() as i64;
        let max = max.min(type_max).ceil() as i64;
        if max < min || (max - min) as usize >= MAX_LUT_ENTRIES {
            return Ok(Arc::new(curve));
        }
        let lut = LutQuantizer::new(curve, min, max).map_err(|e| e.for_channel(channel))?;
        Ok(Arc::new(lut))
    }
}

/// Owns one quantum strategy per channel of the volume.
#[derive(Debug, Clone)]
pub struct QuantumManager {
    meta: PixelsMeta,
    def: QuantumDef,
    strategies: Vec<Option<Arc<dyn QuantumStrategy>>>,
}

impl QuantumManager {
    pub fn new(meta: &PixelsMeta, def: QuantumDef) -> Self {
        Self {
            meta: meta.clone(),
            def,
            strategies: vec![None; meta.size_c],
        }
    }

    pub fn quantum_def(&self) -> QuantumDef {
        self.def
    }

    /// Builds a strategy for every active binding.
    ///
    /// Inactive channels are never rendered, so their windows are not checked
    /// and they get no strategy until they are activated.
    pub fn init_strategies(&mut self, bindings: &[ChannelBinding]) -> RenderResult<()> {
        if bindings.len() > self.meta.size_c {
            return Err(RenderError::InternalError(format!(
                "{} channel bindings for a volume with {} channels",
                bindings.len(),
                self.meta.size_c
            )));
        }
        for (channel, binding) in bindings.iter().enumerate() {
            if !binding.active {
                self.strategies[channel] = None;
                continue;
            }
            let strategy = QuantumFactory::strategy_for(self.def, binding, &self.meta, channel)?;
            debug!("channel {}: {:?} quantizer {:?}", channel, binding.family, strategy);
            self.strategies[channel] = Some(strategy);
        }
        Ok(())
    }

    /// Replaces the strategy of one channel.
    pub fn set_strategy(&mut self, channel: usize, strategy: Arc<dyn QuantumStrategy>) -> RenderResult<()> {
        let slot = self.strategies.get_mut(channel).ok_or_else(|| {
            RenderError::InternalError(format!("no channel {} in this volume", channel))
        })?;
        *slot = Some(strategy);
        Ok(())
    }

    pub fn strategy_for(&self, channel: usize) -> RenderResult<Arc<dyn QuantumStrategy>> {
        self.strategies
            .get(channel)
            .cloned()
            .flatten()
            .ok_or_else(|| RenderError::InternalError(format!("no quantum strategy for channel {}", channel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::channel::Rgba;

    fn linear(start: f64, end: f64) -> ChannelBinding {
        ChannelBinding::new(Rgba::RED, start, end)
    }

    #[test]
    fn linear_window_is_identity_over_bytes() {
        let q = CurveQuantizer::new(QuantumDef::default(), &linear(0.0, 255.0), 0).unwrap();
        for v in [0.0, 64.0, 128.0, 255.0] {
            assert_eq!(q.quantize(v).unwrap() as f64, v);
        }
    }

    #[test]
    fn out_of_window_samples_saturate() {
        let q = CurveQuantizer::new(QuantumDef::default(), &linear(100.0, 200.0), 0).unwrap();
        assert_eq!(q.quantize(-5.0).unwrap(), 0);
        assert_eq!(q.quantize(100.0).unwrap(), 0);
        assert_eq!(q.quantize(150.0).unwrap(), 128);
        assert_eq!(q.quantize(5000.0).unwrap(), 255);
    }

    #[test]
    fn codomain_interval_is_respected() {
        let def = QuantumDef {
            cd_start: 10,
            cd_end: 20,
            bit_resolution: 10,
        };
        let q = CurveQuantizer::new(def, &linear(0.0, 10.0), 0).unwrap();
        assert_eq!(q.quantize(0.0).unwrap(), 10);
        assert_eq!(q.quantize(5.0).unwrap(), 15);
        assert_eq!(q.quantize(10.0).unwrap(), 20);
    }

    #[test]
    fn curves_bend_the_midpoint() {
        let def = QuantumDef::default();
        let poly = CurveQuantizer::new(def, &linear(0.0, 100.0).with_family(Family::Polynomial, 2.0), 0).unwrap();
        // (50^2 - 0) / (100^2 - 0) = 0.25
        assert_eq!(poly.quantize(50.0).unwrap(), 64);

        let log = CurveQuantizer::new(def, &linear(1.0, 100.0).with_family(Family::Logarithmic, 1.0), 0).unwrap();
        // ln(10) / ln(100) = 0.5, which sits on a rounding edge.
        let mid = log.quantize(10.0).unwrap();
        assert!((127..=128).contains(&mid), "log midpoint was {}", mid);

        let exp = CurveQuantizer::new(def, &linear(0.0, 2.0).with_family(Family::Exponential, 1.0), 0).unwrap();
        let mid = exp.quantize(1.0).unwrap();
        assert!(mid < 128, "exponential curve should sit below the diagonal, got {}", mid);
    }

    #[test]
    fn impossible_windows_are_rejected() {
        let def = QuantumDef::default();
        assert!(CurveQuantizer::new(def, &linear(10.0, 10.0), 3).is_err());
        assert!(CurveQuantizer::new(def, &linear(0.0, f64::NAN), 3).is_err());
        let err = CurveQuantizer::new(def, &linear(0.0, 10.0).with_family(Family::Logarithmic, 1.0), 3).unwrap_err();
        assert!(matches!(err, RenderError::QuantizationError { channel: 3, .. }));
        assert!(CurveQuantizer::new(def, &linear(0.0, 1.0e6).with_family(Family::Exponential, 1.0), 0).is_err());
    }

    #[test]
    fn non_finite_samples_fail() {
        let q = CurveQuantizer::new(QuantumDef::default(), &linear(0.0, 255.0), 0).unwrap();
        assert!(q.quantize(f64::NAN).is_err());
        assert!(q.quantize(f64::INFINITY).is_err());
    }

    #[test]
    fn noise_reduction_collapses_window_ends() {
        let binding = linear(0.0, 100.0).with_noise_reduction(true);
        let q = CurveQuantizer::new(QuantumDef::default(), &binding, 0).unwrap();
        assert_eq!(q.quantize(5.0).unwrap(), 0);
        assert_eq!(q.quantize(95.0).unwrap(), 255);
        assert_eq!(q.quantize(50.0).unwrap(), 128);
    }

    #[test]
    fn lookup_table_matches_curve() {
        let binding = linear(10.0, 300.0).with_family(Family::Polynomial, 1.5);
        let curve = CurveQuantizer::new(QuantumDef::default(), &binding, 0).unwrap();
        let lut = LutQuantizer::new(curve.clone(), 0, 400).unwrap();
        for v in (0..=400).step_by(7) {
            let v = v as f64;
            assert_eq!(lut.quantize(v).unwrap(), curve.quantize(v).unwrap());
        }
        // Off-table samples still answer.
        assert_eq!(lut.quantize(1000.0).unwrap(), 255);
        assert!(lut.quantize(f64::NAN).is_err());
    }

    #[test]
    fn binary_mask_ignores_windows() {
        let q = BinaryMaskQuantizer;
        assert_eq!(q.quantize(0.0).unwrap(), 0);
        assert_eq!(q.quantize(1.0).unwrap(), 255);
        assert_eq!(q.quantize(-3.0).unwrap(), 255);
    }

    #[test]
    fn manager_builds_and_serves_strategies() {
        let meta = PixelsMeta::new(2, 2, 1, 3, 1, PixelType::Uint8);
        let mut manager = QuantumManager::new(&meta, QuantumDef::default());
        let bindings = vec![
            linear(0.0, 255.0),
            linear(0.0, 255.0).inactive(),
            linear(0.0, 1.0).with_family(Family::BinaryMask, 1.0),
        ];
        manager.init_strategies(&bindings).unwrap();
        assert_eq!(manager.strategy_for(0).unwrap().quantize(64.0).unwrap(), 64);
        assert!(manager.strategy_for(1).is_err());
        assert_eq!(manager.strategy_for(2).unwrap().quantize(1.0).unwrap(), 255);
        assert!(manager.strategy_for(3).is_err());
    }

    #[test]
    fn inactive_placeholder_windows_are_not_validated() {
        let meta = PixelsMeta::new(2, 2, 1, 2, 1, PixelType::Uint16);
        let mut manager = QuantumManager::new(&meta, QuantumDef::default());
        manager
            .init_strategies(&[linear(0.0, 0.0).inactive(), linear(0.0, 100.0)])
            .unwrap();
        assert!(manager.strategy_for(0).is_err());

        // Activating the channel later validates the window.
        let err = manager.init_strategies(&[linear(0.0, 0.0), linear(0.0, 100.0)]).unwrap_err();
        assert!(matches!(err, RenderError::QuantizationError { channel: 0, .. }));
    }

    #[test]
    fn manager_reports_the_failing_channel() {
        let meta = PixelsMeta::new(2, 2, 1, 2, 1, PixelType::Float);
        let mut manager = QuantumManager::new(&meta, QuantumDef::default());
        let err = manager
            .init_strategies(&[linear(0.0, 1.0), linear(5.0, 1.0)])
            .unwrap_err();
        assert!(matches!(err, RenderError::QuantizationError { channel: 1, .. }));
    }
}
