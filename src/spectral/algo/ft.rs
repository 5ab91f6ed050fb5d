//! Conventional finite-temperature (single-shell) algorithms.

use crate::eigen::Eigen;
use crate::error::NrgError;
use crate::invar::Invar;
use crate::operators::DensMatElements;
use crate::params::Params;
use crate::scalar::{Matrix, Scalar};
use crate::spectral::algo::{weight_of, Algo};
use crate::spectral::{gf_sign, spec_fn, ChainBinning, GfType, Matsubara, SpectrumRealFreq};
use crate::stats::Stats;
use crate::step::Step;

/// Finite-temperature spectral function with grand-canonical weights,
/// evaluated on each shell and patched together over energy windows.
pub struct AlgoFT {
    spec: SpectrumRealFreq,
    sign: f64,
    cb: Option<ChainBinning>,
    p: Params,
}

impl AlgoFT {
    pub const NAME: &'static str = "FT";

    pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
        Self {
            spec: SpectrumRealFreq::new(name, Self::NAME, spec_fn(name, prefix, Self::NAME), p),
            sign: gf_sign(gt),
            cb: None,
            p: p.clone(),
        }
    }
}

impl<S: Scalar> Algo<S> for AlgoFT {
    fn begin(&mut self, _step: &Step) {
        self.cb = Some(ChainBinning::new(&self.p));
    }

    fn calc(
        &mut self,
        step: &Step,
        diag_ip: &Eigen<S>,
        diag_i1: &Eigen<S>,
        op1: &Matrix<S>,
        op2: &Matrix<S>,
        factor: f64,
        _ip: &Invar,
        _i1: &Invar,
        _rho: &DensMatElements<S>,
        stats: &Stats<S>,
    ) {
        let cb = self.cb.as_mut().expect("begin() opens the accumulator");
        let sc_t = step.sc_t();
        for r1 in diag_i1.stored() {
            let e1 = diag_i1.value_zero[r1];
            for rp in diag_ip.stored() {
                let ep = diag_ip.value_zero[rp];
                let boltzmann = (-ep * sc_t).exp() - self.sign * (-e1 * sc_t).exp();
                let w = weight_of(op1[(r1, rp)], op2[(r1, rp)]) * (factor / stats.zft * boltzmann);
                cb.add(step.scale() * (e1 - ep), w);
            }
        }
    }

    fn end(&mut self, step: &Step) {
        let cb = self.cb.take().expect("begin() opened the accumulator");
        self.spec.merge_windowed(&cb, step);
    }

    fn save(&self) -> Result<(), NrgError> {
        self.spec.save()
    }
}

/// Finite-temperature Green function on the Matsubara grid.
pub struct AlgoFTmats {
    results: Matsubara,
    filename: String,
    sign: f64,
    beta: f64,
}

impl AlgoFTmats {
    pub const NAME: &'static str = "FTmats";

    pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
        Self {
            results: Matsubara::new(p.mats, gt, p.t),
            filename: spec_fn(name, prefix, Self::NAME),
            sign: gf_sign(gt),
            beta: 1.0 / p.t,
        }
    }
}

impl<S: Scalar> Algo<S> for AlgoFTmats {
    fn begin(&mut self, _step: &Step) {}

    fn calc(
        &mut self,
        step: &Step,
        diag_ip: &Eigen<S>,
        diag_i1: &Eigen<S>,
        op1: &Matrix<S>,
        op2: &Matrix<S>,
        factor: f64,
        _ip: &Invar,
        _i1: &Invar,
        _rho: &DensMatElements<S>,
        stats: &Stats<S>,
    ) {
        let sc_t = step.sc_t();
        for r1 in diag_i1.stored() {
            let e1 = diag_i1.value_zero[r1];
            for rp in diag_ip.stored() {
                let ep = diag_ip.value_zero[rp];
                let matel = weight_of(op1[(r1, rp)], op2[(r1, rp)]) * (factor / stats.zft);
                let w = matel * ((-ep * sc_t).exp() - self.sign * (-e1 * sc_t).exp());
                // Degenerate bosonic ω_0 = 0 term in the l'Hospital form.
                let degenerate = matel * (-self.beta * (-e1 * sc_t).exp());
                self.results
                    .add_pole(step.scale() * (e1 - ep), w, degenerate);
            }
        }
    }

    fn end(&mut self, _step: &Step) {}

    fn save(&self) -> Result<(), NrgError> {
        self.results.save(&self.filename)
    }
}
