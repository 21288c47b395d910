//! Transform specifications and the sampling maps derived from them.
//!
//! Every variant of a TI layer is described by a [`TransformSpec`]. The
//! [`TransformCatalog`] turns the ordered spec list into one [`SamplingMap`]
//! per variant, computed once at setup for the layer's kernel size.

use serde::{Deserialize, Serialize};

use crate::error::{TiConvError, TiResult};

/// Geometric transformation applied to the base filter bank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Identity,
    /// Isotropic scale factor; > 1 enlarges the filter pattern.
    Scale(f64),
    /// Rotation in degrees; positive angles turn +x toward +y.
    Rotation(f64),
}

/// Resampling rule used when a transformed tap falls between base taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interp {
    #[default]
    Nearest,
    Bilinear,
}

/// One configured variant: what transform, and how to resample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub kind: TransformKind,
    #[serde(default)]
    pub interp: Interp,
}

impl TransformSpec {
    pub fn identity() -> Self {
        TransformSpec { kind: TransformKind::Identity, interp: Interp::Nearest }
    }

    pub fn scale(factor: f64) -> Self {
        TransformSpec { kind: TransformKind::Scale(factor), interp: Interp::Nearest }
    }

    pub fn rotation(degrees: f64) -> Self {
        TransformSpec { kind: TransformKind::Rotation(degrees), interp: Interp::Nearest }
    }

    pub fn with_interp(mut self, interp: Interp) -> Self {
        self.interp = interp;
        self
    }

    /// Reject parameters that cannot describe an invertible transform.
    pub fn validate(&self) -> TiResult<()> {
        match self.kind {
            TransformKind::Identity => Ok(()),
            TransformKind::Scale(s) if !s.is_finite() || s <= 0.0 => {
                Err(TiConvError::InvalidScale(s))
            }
            TransformKind::Rotation(d) if !d.is_finite() => Err(TiConvError::InvalidRotation(d)),
            _ => Ok(()),
        }
    }

    /// Map a transformed-kernel coordinate back into the base kernel.
    ///
    /// Coordinates are `(row, col)` offsets from the kernel center.
    fn inverse(&self, y: f64, x: f64) -> (f64, f64) {
        match self.kind {
            TransformKind::Identity => (y, x),
            TransformKind::Scale(s) => (y / s, x / s),
            TransformKind::Rotation(deg) => {
                let (sin, cos) = deg.to_radians().sin_cos();
                (cos * y - sin * x, cos * x + sin * y)
            }
        }
    }
}

impl Default for TransformSpec {
    fn default() -> Self {
        Self::identity()
    }
}

/// A base-kernel tap contributing to a transformed tap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapSample {
    /// Flat index `row * kernel_w + col` into the base kernel.
    pub source: usize,
    pub weight: f64,
}

/// Per-tap mapping from a transformed kernel back to the base kernel.
///
/// An empty source list is the zero-weight sentinel: that transformed tap
/// samples outside the base kernel and always resamples to 0. Bilinear
/// weights at the border are not renormalized, so a tap may carry a total
/// weight below 1.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingMap {
    kernel_h: usize,
    kernel_w: usize,
    taps: Vec<Vec<TapSample>>,
}

impl SamplingMap {
    /// 1:1 map with unit weights.
    pub fn identity(kernel_h: usize, kernel_w: usize) -> Self {
        let taps = (0..kernel_h * kernel_w)
            .map(|t| vec![TapSample { source: t, weight: 1.0 }])
            .collect();
        SamplingMap { kernel_h, kernel_w, taps }
    }

    /// Build the map for one transform. `spec` must already be validated.
    pub fn build(spec: &TransformSpec, kernel_h: usize, kernel_w: usize) -> Self {
        if spec.kind == TransformKind::Identity {
            return Self::identity(kernel_h, kernel_w);
        }

        let cy = (kernel_h as f64 - 1.0) / 2.0;
        let cx = (kernel_w as f64 - 1.0) / 2.0;
        let mut taps = Vec::with_capacity(kernel_h * kernel_w);

        for i in 0..kernel_h {
            for j in 0..kernel_w {
                let (dy, dx) = spec.inverse(i as f64 - cy, j as f64 - cx);
                let samples = match spec.interp {
                    Interp::Nearest => {
                        let sy = nearest_tap(cy, dy);
                        let sx = nearest_tap(cx, dx);
                        match flat_tap(sy, sx, kernel_h, kernel_w) {
                            Some(source) => vec![TapSample { source, weight: 1.0 }],
                            None => Vec::new(),
                        }
                    }
                    Interp::Bilinear => bilinear_taps(cy + dy, cx + dx, kernel_h, kernel_w),
                };
                taps.push(samples);
            }
        }

        SamplingMap { kernel_h, kernel_w, taps }
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        (self.kernel_h, self.kernel_w)
    }

    /// Number of taps, `kernel_h * kernel_w`.
    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn taps(&self) -> &[Vec<TapSample>] {
        &self.taps
    }

    /// Sources of transformed tap `tap`.
    pub fn sources(&self, tap: usize) -> &[TapSample] {
        &self.taps[tap]
    }

    /// Sum of the interpolation weights feeding `tap`.
    pub fn total_weight(&self, tap: usize) -> f64 {
        self.taps[tap].iter().map(|s| s.weight).sum()
    }

    /// True when every tap reads exactly itself with weight 1.
    pub fn is_identity(&self) -> bool {
        self.taps.iter().enumerate().all(|(t, s)| {
            s.len() == 1 && s[0].source == t && s[0].weight == 1.0
        })
    }
}

/// Nearest integer to `center + offset`, ties rounded away from the center
/// so the map stays symmetric.
fn nearest_tap(center: f64, offset: f64) -> f64 {
    if offset >= 0.0 {
        (center + offset + 0.5).floor()
    } else {
        (center + offset - 0.5).ceil()
    }
}

fn flat_tap(row: f64, col: f64, kernel_h: usize, kernel_w: usize) -> Option<usize> {
    let (r, c) = (row as isize, col as isize);
    if row.is_nan() || col.is_nan() || r < 0 || c < 0 {
        return None;
    }
    let (r, c) = (r as usize, c as usize);
    if r >= kernel_h || c >= kernel_w {
        return None;
    }
    Some(r * kernel_w + c)
}

fn bilinear_taps(sy: f64, sx: f64, kernel_h: usize, kernel_w: usize) -> Vec<TapSample> {
    let y0 = sy.floor();
    let x0 = sx.floor();
    let fy = sy - y0;
    let fx = sx - x0;

    let corners = [
        (y0, x0, (1.0 - fy) * (1.0 - fx)),
        (y0, x0 + 1.0, (1.0 - fy) * fx),
        (y0 + 1.0, x0, fy * (1.0 - fx)),
        (y0 + 1.0, x0 + 1.0, fy * fx),
    ];

    corners
        .iter()
        .filter(|&&(_, _, w)| w > 0.0)
        .filter_map(|&(r, c, weight)| {
            flat_tap(r, c, kernel_h, kernel_w).map(|source| TapSample { source, weight })
        })
        .collect()
}

/// Ordered set of variants and their sampling maps for one kernel size.
///
/// Argmax indices produced by the layer refer to positions in this list.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformCatalog {
    specs: Vec<TransformSpec>,
    maps: Vec<SamplingMap>,
    kernel_h: usize,
    kernel_w: usize,
}

impl TransformCatalog {
    pub fn new(specs: Vec<TransformSpec>, kernel_h: usize, kernel_w: usize) -> TiResult<Self> {
        if specs.is_empty() {
            return Err(TiConvError::EmptyTransforms);
        }
        if kernel_h == 0 || kernel_w == 0 {
            return Err(TiConvError::InvalidKernel { kernel_h, kernel_w });
        }
        for spec in &specs {
            spec.validate()?;
        }

        let maps = specs
            .iter()
            .map(|spec| SamplingMap::build(spec, kernel_h, kernel_w))
            .collect();

        Ok(TransformCatalog { specs, maps, kernel_h, kernel_w })
    }

    /// Number of variants (K + 1).
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[TransformSpec] {
        &self.specs
    }

    pub fn maps(&self) -> &[SamplingMap] {
        &self.maps
    }

    pub fn map(&self, variant: usize) -> Option<&SamplingMap> {
        self.maps.get(variant)
    }

    pub fn kernel_size(&self) -> (usize, usize) {
        (self.kernel_h, self.kernel_w)
    }
}
