// THEORY:
// The codomain chain is the last stage of a render: an ordered list of 8-bit to
// 8-bit maps applied to every color component after the channels have been
// summed and clipped. The empty chain is the identity.
//
// Key architectural principles:
// 1.  **Closed Interval**: Every map works inside the chain's codomain interval
//     [start, end]. Inputs are clamped into it before the first map runs, so each
//     map can assume its input is in range.
// 2.  **Validated Once**: Maps are checked when added; `transform` cannot fail.
// 3.  **Shared Read-Only**: The chain is immutable during a render and is shared
//     between region tasks through `Arc`.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// One codomain transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodomainMap {
    /// Piecewise linear stretch through `(x_start, y_start)` and `(x_end, y_end)`.
    ContrastStretching {
        x_start: u8,
        y_start: u8,
        x_end: u8,
        y_end: u8,
    },
    /// Mirrors the interval: `end - v + start`.
    ReverseIntensity,
    /// Bit-plane slicing: keeps the values in `(plane_previous, plane_selected]`.
    PlaneSlicing {
        lower_limit: u8,
        upper_limit: u8,
        plane_previous: u8,
        plane_selected: u8,
        /// Paint the slice with `upper_limit` instead of keeping its values.
        constant: bool,
    },
}

impl CodomainMap {
    fn validate(&self, start: u8, end: u8) -> RenderResult<()> {
        let inside = |v: u8| (start..=end).contains(&v);
        let ok = match *self {
            CodomainMap::ContrastStretching {
                x_start,
                y_start,
                x_end,
                y_end,
            } => x_start <= x_end && [x_start, y_start, x_end, y_end].into_iter().all(inside),
            CodomainMap::ReverseIntensity => true,
            CodomainMap::PlaneSlicing {
                lower_limit,
                upper_limit,
                plane_previous,
                plane_selected,
                ..
            } => lower_limit <= upper_limit && plane_previous <= plane_selected && inside(lower_limit) && inside(upper_limit),
        };
        if ok {
            Ok(())
        } else {
            Err(RenderError::Config(format!(
                "codomain map {:?} does not fit the interval [{}, {}]",
                self, start, end
            )))
        }
    }

    fn apply(&self, v: u8, start: u8, end: u8) -> u8 {
        match *self {
            CodomainMap::ContrastStretching {
                x_start,
                y_start,
                x_end,
                y_end,
            } => {
                if v <= x_start {
                    interpolate(v, (start, start), (x_start, y_start))
                } else if v <= x_end {
                    interpolate(v, (x_start, y_start), (x_end, y_end))
                } else {
                    interpolate(v, (x_end, y_end), (end, end))
                }
            }
            CodomainMap::ReverseIntensity => end - (v - start),
            CodomainMap::PlaneSlicing {
                lower_limit,
                upper_limit,
                plane_previous,
                plane_selected,
                constant,
            } => {
                let in_slice = v > plane_previous && v <= plane_selected;
                match (in_slice, constant) {
                    (true, true) => upper_limit,
                    (true, false) => v,
                    (false, _) => lower_limit,
                }
            }
        }
    }
}

/// Linear interpolation of `v` on the segment `a -> b`.
fn interpolate(v: u8, a: (u8, u8), b: (u8, u8)) -> u8 {
    if b.0 == a.0 {
        return b.1;
    }
    let t = (v as f64 - a.0 as f64) / (b.0 as f64 - a.0 as f64);
    (a.1 as f64 + t * (b.1 as f64 - a.1 as f64)).round().clamp(0.0, 255.0) as u8
}

/// An ordered sequence of codomain maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedChain")]
pub struct CodomainChain {
    start: u8,
    end: u8,
    maps: Vec<CodomainMap>,
}

/// Wire form of a chain; only becomes a `CodomainChain` through validation.
#[derive(Deserialize)]
struct UncheckedChain {
    start: u8,
    end: u8,
    #[serde(default)]
    maps: Vec<CodomainMap>,
}

impl TryFrom<UncheckedChain> for CodomainChain {
    type Error = RenderError;

    fn try_from(raw: UncheckedChain) -> RenderResult<Self> {
        let mut chain = CodomainChain::new(raw.start, raw.end)?;
        for map in raw.maps {
            chain.add(map)?;
        }
        Ok(chain)
    }
}

impl Default for CodomainChain {
    fn default() -> Self {
        Self::identity()
    }
}

impl CodomainChain {
    /// The empty chain over the full byte range.
    pub fn identity() -> Self {
        Self {
            start: 0,
            end: 255,
            maps: Vec::new(),
        }
    }

    pub fn new(start: u8, end: u8) -> RenderResult<Self> {
        if start > end {
            return Err(RenderError::Config(format!(
                "codomain interval [{}, {}] is empty",
                start, end
            )));
        }
        Ok(Self {
            start,
            end,
            maps: Vec::new(),
        })
    }

    /// Appends a map after validating it against the interval.
    pub fn add(&mut self, map: CodomainMap) -> RenderResult<()> {
        map.validate(self.start, self.end)?;
        self.maps.push(map);
        Ok(())
    }

    pub fn with(mut self, map: CodomainMap) -> RenderResult<Self> {
        self.add(map)?;
        Ok(self)
    }

    pub fn remove(&mut self, index: usize) -> Option<CodomainMap> {
        (index < self.maps.len()).then(|| self.maps.remove(index))
    }

    pub fn maps(&self) -> &[CodomainMap] {
        &self.maps
    }

    pub fn is_identity(&self) -> bool {
        self.maps.is_empty()
    }

    /// Runs `v` through every map in order.
    #[inline]
    pub fn transform(&self, v: u8) -> u8 {
        if self.maps.is_empty() {
            return v;
        }
        self.maps
            .iter()
            .fold(v.clamp(self.start, self.end), |acc, map| map.apply(acc, self.start, self.end))
    }
}
