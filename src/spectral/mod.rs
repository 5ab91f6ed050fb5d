//! Spectral-function accumulators.
//!
//! Per-step delta peaks are collected into log-spaced bins around |ω|, one
//! one-sided array per frequency sign, and merged into the run-wide spectrum
//! either through the energy-window patching of the conventional algorithms
//! or verbatim for the complete-Fock-space ones. Matsubara accumulators bin
//! into the fixed grid `ω_n = (2n+δ)πT`.

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use num_complex::Complex64;

use crate::error::NrgError;
use crate::params::Params;
use crate::scalar::Weight;
use crate::step::Step;

pub mod algo;


/// Statistics of a Green function: fixes the sign convention and the
/// Matsubara frequency offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfType {
    Bosonic,
    Fermionic,
}

/// Sign factor entering the spectral weights: +1 bosonic, -1 fermionic.
pub fn gf_sign(gt: GfType) -> f64 {
    match gt {
        GfType::Bosonic => 1.0,
        GfType::Fermionic => -1.0,
    }
}

/// Matsubara frequency `ω_n = (2n+δ)πT` with δ ∈ {0 bosonic, 1 fermionic}.
pub fn ww(n: usize, gt: GfType, t: f64) -> f64 {
    match gt {
        GfType::Bosonic => t * std::f64::consts::PI * (2 * n) as f64,
        GfType::Fermionic => t * std::f64::consts::PI * (2 * n + 1) as f64,
    }
}

/// One-sided array of log-spaced bins over |ω| ∈ [emin, emax].
#[derive(Clone, Debug)]
pub struct Bins {
    emin: f64,
    per_decade: usize,
    values: Vec<Weight>,
}

impl Bins {
    pub fn new(p: &Params) -> Self {
        let decades = (p.emax / p.emin).log10().max(1.0);
        let nr = (decades * p.per_decade() as f64).ceil() as usize + 1;
        Self {
            emin: p.emin,
            per_decade: p.per_decade(),
            values: vec![Weight::new(0.0, 0.0); nr],
        }
    }

    fn index(&self, energy: f64) -> usize {
        debug_assert!(energy >= 0.0);
        if energy <= self.emin {
            return 0;
        }
        let pos = (energy / self.emin).log10() * self.per_decade as f64;
        (pos as usize).min(self.values.len() - 1)
    }

    /// Bin center of index `i`.
    pub fn energy(&self, i: usize) -> f64 {
        self.emin * 10f64.powf((i as f64 + 0.5) / self.per_decade as f64)
    }

    pub fn add(&mut self, energy: f64, weight: Weight) {
        let i = self.index(energy);
        self.values[i] += weight;
    }

    pub fn total_weight(&self) -> Weight {
        self.values.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, Weight)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &w)| (self.energy(i), w))
    }

    fn merge(&mut self, other: &Bins, window: Option<(f64, f64)>) {
        debug_assert_eq!(self.values.len(), other.values.len());
        for i in 0..self.values.len() {
            let e = self.energy(i);
            if let Some((lo, hi)) = window {
                if e < lo || e >= hi {
                    continue;
                }
            }
            self.values[i] += other.values[i];
        }
    }
}

/// The binned delta peaks of a single step, both frequency signs.
#[derive(Clone, Debug)]
pub struct ChainBinning {
    pub pos: Bins,
    pub neg: Bins,
}

impl ChainBinning {
    pub fn new(p: &Params) -> Self {
        Self {
            pos: Bins::new(p),
            neg: Bins::new(p),
        }
    }

    pub fn add(&mut self, energy: f64, weight: Weight) {
        if energy >= 0.0 {
            self.pos.add(energy, weight);
        } else {
            self.neg.add(-energy, weight);
        }
    }

    pub fn total_weight(&self) -> Weight {
        self.pos.total_weight() + self.neg.total_weight()
    }
}

/// The run-wide real-frequency spectrum of one correlation function.
#[derive(Clone, Debug)]
pub struct SpectrumRealFreq {
    pub name: String,
    pub algoname: &'static str,
    filename: String,
    lambda: f64,
    pos: Bins,
    neg: Bins,
}

impl SpectrumRealFreq {
    pub fn new(name: &str, algoname: &'static str, filename: String, p: &Params) -> Self {
        log::info!("Spectrum: {name} {algoname} -> {filename}.dat");
        Self {
            name: name.to_string(),
            algoname,
            filename,
            lambda: p.lambda,
            pos: Bins::new(p),
            neg: Bins::new(p),
        }
    }

    /// Windowed merge for the conventional single-shell algorithms: each
    /// step is trusted in the band `[scale, √Λ·scale)` it resolves, so that
    /// consecutive shells tile the frequency axis; the first step extends
    /// upward, the last one down to zero frequency.
    pub fn merge_windowed(&mut self, cb: &ChainBinning, step: &Step) {
        let lo = if step.last() { 0.0 } else { step.scale() };
        let hi = if step.first() {
            f64::INFINITY
        } else {
            step.scale() * self.lambda.sqrt()
        };
        self.pos.merge(&cb.pos, Some((lo, hi)));
        self.neg.merge(&cb.neg, Some((lo, hi)));
    }

    /// Verbatim merge for the complete-Fock-space algorithms, whose shell
    /// decomposition is already exact.
    pub fn merge_full(&mut self, cb: &ChainBinning) {
        self.pos.merge(&cb.pos, None);
        self.neg.merge(&cb.neg, None);
    }

    /// Integrated spectral weight over both branches.
    pub fn total_weight(&self) -> Weight {
        self.pos.total_weight() + self.neg.total_weight()
    }

    /// Writes the binned spectrum, negative branch first, ascending in ω.
    pub fn save(&self) -> Result<(), NrgError> {
        let path = PathBuf::from(format!("{}.dat", self.filename));
        let mut out = String::new();
        let mut rows: Vec<(f64, Weight)> = Vec::new();
        for (e, w) in self.neg.iter() {
            if w.norm() > 0.0 {
                rows.push((-e, w));
            }
        }
        for (e, w) in self.pos.iter() {
            if w.norm() > 0.0 {
                rows.push((e, w));
            }
        }
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (e, w) in rows {
            let _ = writeln!(out, "{:.16e} {:.16e}", e, w.re);
        }
        fs::write(&path, out).map_err(|e| NrgError::io(path, e))
    }
}

/// Green function on the Matsubara axis.
#[derive(Clone, Debug)]
pub struct Matsubara {
    gt: GfType,
    t: f64,
    values: Vec<Weight>,
}

impl Matsubara {
    pub fn new(mats: usize, gt: GfType, t: f64) -> Self {
        Self {
            gt,
            t,
            values: vec![Weight::new(0.0, 0.0); mats],
        }
    }

    pub fn omega(&self, n: usize) -> f64 {
        ww(n, self.gt, self.t)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn add(&mut self, n: usize, w: Weight) {
        self.values[n] += w;
    }

    pub fn iter_weights(&self) -> impl Iterator<Item = &Weight> {
        self.values.iter()
    }

    /// Adds the pole `weight/(iω_n - de)` to every grid frequency. The
    /// degenerate bosonic `ω_0 = de = 0` case takes the l'Hospital form
    /// supplied by the caller.
    pub fn add_pole(&mut self, de: f64, weight: Weight, degenerate: Weight) {
        for n in 0..self.values.len() {
            let denom = Complex64::new(-de, self.omega(n));
            if denom.norm() < 1e-14 {
                self.values[n] += degenerate;
            } else {
                self.values[n] += weight / denom;
            }
        }
    }

    pub fn merge(&mut self, other: &Matsubara) {
        debug_assert_eq!(self.values.len(), other.values.len());
        for (a, b) in self.values.iter_mut().zip(other.values.iter()) {
            *a += b;
        }
    }

    pub fn save(&self, filename: &str) -> Result<(), NrgError> {
        let path = PathBuf::from(format!("{filename}.dat"));
        let mut out = String::new();
        for (n, w) in self.values.iter().enumerate() {
            let _ = writeln!(out, "{:.16e} {:.16e} {:.16e}", self.omega(n), w.re, w.im);
        }
        fs::write(&path, out).map_err(|e| NrgError::io(path, e))
    }
}

/// Construct the output-file stem of one spectrum.
pub fn spec_fn(name: &str, prefix: &str, algoname: &str) -> String {
    format!("{prefix}_{algoname}_dens_{name}")
}
