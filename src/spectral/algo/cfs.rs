//! Complete-Fock-space spectral functions.
//!
//! The excitation spectrum is split into a positive-frequency ("less than")
//! and a negative-frequency ("greater than") branch built from
//! discarded × kept state pairs, with the reduced density matrix contracted
//! into the operator block before the pair loop. On the last shell both
//! branches reduce to the Lehmann sum over the full shell.

use ndarray::s;

use crate::eigen::Eigen;
use crate::error::NrgError;
use crate::invar::Invar;
use crate::operators::DensMatElements;
use crate::params::Params;
use crate::scalar::{Matrix, Scalar};
use crate::spectral::algo::{weight_of, Algo, RhoType};
use crate::spectral::{gf_sign, spec_fn, ChainBinning, GfType, SpectrumRealFreq};
use crate::stats::Stats;
use crate::step::Step;

#[cfg(test)]
#[path = "cfs_tests.rs"]
mod cfs_tests;

/// Positive-frequency branch: discarded-at-I1 × kept-at-Ip pairs, the
/// density matrix contracted with `op2`.
#[allow(clippy::too_many_arguments)]
fn cfs_ls_calc<S: Scalar>(
    cb: &mut ChainBinning,
    step: &Step,
    diag_ip: &Eigen<S>,
    diag_i1: &Eigen<S>,
    op1: &Matrix<S>,
    op2: &Matrix<S>,
    factor: f64,
    rho_p: Option<&Matrix<S>>,
    sign: f64,
    stats_zft: f64,
) {
    let sc_t = step.sc_t();
    if step.last() {
        for r1 in diag_i1.kept() {
            let e1 = diag_i1.value_zero[r1];
            for rp in diag_ip.kept() {
                let ep = diag_ip.value_zero[rp];
                let w = weight_of(op1[(r1, rp)], op2[(r1, rp)])
                    * (factor / stats_zft * (-e1 * sc_t).exp() * (-sign));
                cb.add(step.scale() * (e1 - ep), w);
            }
        }
    } else {
        let Some(rho_p) = rho_p else { return };
        let kp = rho_p.nrows().min(op2.ncols());
        if op2.nrows() == 0 || kp == 0 {
            return;
        }
        let op2_m_rho = op2.slice(s![.., ..kp]).dot(&rho_p.slice(s![..kp, ..kp]));
        for rl in diag_i1.discarded() {
            let el = diag_i1.value_zero[rl];
            for rk in 0..kp {
                let ek = diag_ip.value_zero[rk];
                let w = weight_of(op1[(rl, rk)], op2_m_rho[(rl, rk)]) * (factor * (-sign));
                cb.add(step.scale() * (el - ek), w);
            }
        }
    }
}

/// Negative-frequency branch: kept-at-I1 × discarded-at-Ip pairs, the
/// density matrix contracted with `op1`.
#[allow(clippy::too_many_arguments)]
fn cfs_gt_calc<S: Scalar>(
    cb: &mut ChainBinning,
    step: &Step,
    diag_ip: &Eigen<S>,
    diag_i1: &Eigen<S>,
    op1: &Matrix<S>,
    op2: &Matrix<S>,
    factor: f64,
    rho_1: Option<&Matrix<S>>,
    stats_zft: f64,
) {
    let sc_t = step.sc_t();
    if step.last() {
        for r1 in diag_i1.kept() {
            let e1 = diag_i1.value_zero[r1];
            for rp in diag_ip.kept() {
                let ep = diag_ip.value_zero[rp];
                let w = weight_of(op1[(r1, rp)], op2[(r1, rp)])
                    * (factor / stats_zft * (-ep * sc_t).exp());
                cb.add(step.scale() * (e1 - ep), w);
            }
        }
    } else {
        let Some(rho_1) = rho_1 else { return };
        let k1 = rho_1.nrows().min(op1.nrows());
        if op1.ncols() == 0 || k1 == 0 {
            return;
        }
        // Σ_r' ρ(r', rk)·conj(op1(r', rl))
        let op1_conj = op1.slice(s![..k1, ..]).mapv(|x| x.conj());
        let op1_m_rho = rho_1.slice(s![..k1, ..k1]).t().dot(&op1_conj);
        for rk in 0..k1 {
            let ek = diag_i1.value_zero[rk];
            for rl in diag_ip.discarded() {
                let el = diag_ip.value_zero[rl];
                let w = (op1_m_rho[(rk, rl)] * op2[(rk, rl)]).as_c() * factor;
                cb.add(step.scale() * (ek - el), w);
            }
        }
    }
}

pub struct AlgoCFSls {
    spec: SpectrumRealFreq,
    sign: f64,
    cb: Option<ChainBinning>,
    p: Params,
}

impl AlgoCFSls {
    pub const NAME: &'static str = "CFSls";

    pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
        Self {
            spec: SpectrumRealFreq::new(name, Self::NAME, spec_fn(name, prefix, Self::NAME), p),
            sign: gf_sign(gt),
            cb: None,
            p: p.clone(),
        }
    }
}

impl<S: Scalar> Algo<S> for AlgoCFSls {
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
        ip: &Invar,
        _i1: &Invar,
        rho: &DensMatElements<S>,
        stats: &Stats<S>,
    ) {
        let cb = self.cb.as_mut().expect("begin() opens the accumulator");
        cfs_ls_calc(
            cb, step, diag_ip, diag_i1, op1, op2, factor,
            rho.get(ip),
            self.sign,
            stats.zft,
        );
    }

    fn end(&mut self, _step: &Step) {
        let cb = self.cb.take().expect("begin() opened the accumulator");
        self.spec.merge_full(&cb);
    }

    fn rho_type(&self) -> RhoType {
        RhoType::Rho
    }

    fn save(&self) -> Result<(), NrgError> {
        self.spec.save()
    }
}

pub struct AlgoCFSgt {
    spec: SpectrumRealFreq,
    sign: f64,
    cb: Option<ChainBinning>,
    p: Params,
}

impl AlgoCFSgt {
    pub const NAME: &'static str = "CFSgt";

    pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
        Self {
            spec: SpectrumRealFreq::new(name, Self::NAME, spec_fn(name, prefix, Self::NAME), p),
            sign: gf_sign(gt),
            cb: None,
            p: p.clone(),
        }
    }
}

impl<S: Scalar> Algo<S> for AlgoCFSgt {
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
        i1: &Invar,
        rho: &DensMatElements<S>,
        stats: &Stats<S>,
    ) {
        let cb = self.cb.as_mut().expect("begin() opens the accumulator");
        cfs_gt_calc(
            cb, step, diag_ip, diag_i1, op1, op2, factor,
            rho.get(i1),
            stats.zft,
        );
    }

    fn end(&mut self, _step: &Step) {
        let cb = self.cb.take().expect("begin() opened the accumulator");
        self.spec.merge_full(&cb);
    }

    fn rho_type(&self) -> RhoType {
        RhoType::Rho
    }

    fn save(&self) -> Result<(), NrgError> {
        self.spec.save()
    }
}

/// Both branches merged into a single spectrum.
pub struct AlgoCFS {
    spec: SpectrumRealFreq,
    sign: f64,
    cb: Option<ChainBinning>,
    p: Params,
}

impl AlgoCFS {
    pub const NAME: &'static str = "CFS";

    pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
        Self {
            spec: SpectrumRealFreq::new(name, Self::NAME, spec_fn(name, prefix, Self::NAME), p),
            sign: gf_sign(gt),
            cb: None,
            p: p.clone(),
        }
    }
}

impl<S: Scalar> Algo<S> for AlgoCFS {
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
        ip: &Invar,
        i1: &Invar,
        rho: &DensMatElements<S>,
        stats: &Stats<S>,
    ) {
        let cb = self.cb.as_mut().expect("begin() opens the accumulator");
        // On the last shell the two Lehmann sums supply the two halves of
        // the anticommutator weight.
        cfs_gt_calc(
            cb, step, diag_ip, diag_i1, op1, op2, factor,
            rho.get(i1),
            stats.zft,
        );
        cfs_ls_calc(
            cb, step, diag_ip, diag_i1, op1, op2, factor,
            rho.get(ip),
            self.sign,
            stats.zft,
        );
    }

    fn end(&mut self, _step: &Step) {
        let cb = self.cb.take().expect("begin() opened the accumulator");
        self.spec.merge_full(&cb);
    }

    fn rho_type(&self) -> RhoType {
        RhoType::Rho
    }

    fn save(&self) -> Result<(), NrgError> {
        self.spec.save()
    }
}
