//! Full-density-matrix spectral functions.
//!
//! Same branch structure as the complete-Fock-space algorithms, but the
//! kept-sector weights come from the full density matrix and the
//! discarded-discarded terms carry the extended-precision shell weights
//! `wn`. Every shell contributes exactly; no patching is involved.

use ndarray::s;

use crate::eigen::Eigen;
use crate::error::NrgError;
use crate::invar::Invar;
use crate::operators::DensMatElements;
use crate::params::Params;
use crate::scalar::{Matrix, Scalar, Weight};
use crate::spectral::algo::{weight_of, Algo, RhoType};
use crate::spectral::{gf_sign, spec_fn, ChainBinning, GfType, Matsubara, SpectrumRealFreq};
use crate::stats::Stats;
use crate::step::Step;

/// Weights of shells with `wn` below this threshold are dropped.
const WN_CUTOFF: f64 = 1e-16;

/// Discarded-state range of the FDM sums; the last shell has no kept
/// sector.
fn discarded_range<S: Scalar>(step: &Step, eig: &Eigen<S>) -> std::ops::Range<usize> {
    if step.last() {
        0..eig.nr_stored()
    } else {
        eig.discarded()
    }
}

/// Positive-frequency branch.
#[allow(clippy::too_many_arguments)]
fn fdm_ls_calc<S: Scalar, F: FnMut(f64, Weight)>(
    mut emit: F,
    step: &Step,
    diag_ip: &Eigen<S>,
    diag_i1: &Eigen<S>,
    op1: &Matrix<S>,
    op2: &Matrix<S>,
    factor: f64,
    rho_p: Option<&Matrix<S>>,
    sign: f64,
    stats: &Stats<S>,
    t: f64,
) {
    let n = step.ndx();
    let wn = stats.wn[n];
    // Discarded × discarded: thermal occupation of the Ip states.
    if wn > WN_CUTOFF {
        let znd = stats.zn_dn_d[n];
        for rl in discarded_range(step, diag_i1) {
            let el = diag_i1.value_zero[rl];
            for rp in discarded_range(step, diag_ip) {
                let ep = diag_ip.value_zero[rp];
                let occ = (-diag_ip.absenergy_n[rp] / t).exp() / znd;
                let w = weight_of(op1[(rl, rp)], op2[(rl, rp)]) * (factor * wn * occ * (-sign));
                emit(step.scale() * (el - ep), w);
            }
        }
    }
    // Discarded × kept through the full density matrix.
    if !step.last() {
        let Some(rho_p) = rho_p else { return };
        let kp = diag_ip.nr_kept().min(rho_p.nrows()).min(op2.ncols());
        if op2.nrows() == 0 || kp == 0 {
            return;
        }
        let op2_m_rho = op2.slice(s![.., ..kp]).dot(&rho_p.slice(s![..kp, ..kp]));
        for rl in diag_i1.discarded() {
            let el = diag_i1.value_zero[rl];
            for rk in 0..kp {
                let ek = diag_ip.value_zero[rk];
                let w = weight_of(op1[(rl, rk)], op2_m_rho[(rl, rk)]) * (factor * (-sign));
                emit(step.scale() * (el - ek), w);
            }
        }
    }
}

/// Negative-frequency branch.
#[allow(clippy::too_many_arguments)]
fn fdm_gt_calc<S: Scalar, F: FnMut(f64, Weight)>(
    mut emit: F,
    step: &Step,
    diag_ip: &Eigen<S>,
    diag_i1: &Eigen<S>,
    op1: &Matrix<S>,
    op2: &Matrix<S>,
    factor: f64,
    rho_1: Option<&Matrix<S>>,
    stats: &Stats<S>,
    t: f64,
) {
    let n = step.ndx();
    let wn = stats.wn[n];
    if wn > WN_CUTOFF {
        let znd = stats.zn_dn_d[n];
        for rl in discarded_range(step, diag_i1) {
            let el = diag_i1.value_zero[rl];
            let occ = (-diag_i1.absenergy_n[rl] / t).exp() / znd;
            for rp in discarded_range(step, diag_ip) {
                let ep = diag_ip.value_zero[rp];
                let w = weight_of(op1[(rl, rp)], op2[(rl, rp)]) * (factor * wn * occ);
                emit(step.scale() * (el - ep), w);
            }
        }
    }
    if !step.last() {
        let Some(rho_1) = rho_1 else { return };
        let k1 = diag_i1.nr_kept().min(rho_1.nrows()).min(op1.nrows());
        if op1.ncols() == 0 || k1 == 0 {
            return;
        }
        let op1_conj = op1.slice(s![..k1, ..]).mapv(|x| x.conj());
        let op1_m_rho = rho_1.slice(s![..k1, ..k1]).t().dot(&op1_conj);
        for rk in 0..k1 {
            let ek = diag_i1.value_zero[rk];
            for rl in diag_ip.discarded() {
                let el = diag_ip.value_zero[rl];
                let w = (op1_m_rho[(rk, rl)] * op2[(rk, rl)]).as_c() * factor;
                emit(step.scale() * (ek - el), w);
            }
        }
    }
}

macro_rules! fdm_realfreq_algo {
    ($name:ident, $algoname:literal, $ls:expr, $gt:expr) => {
        pub struct $name {
            spec: SpectrumRealFreq,
            sign: f64,
            cb: Option<ChainBinning>,
            p: Params,
        }

        impl $name {
            pub const NAME: &'static str = $algoname;

            pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
                Self {
                    spec: SpectrumRealFreq::new(
                        name,
                        Self::NAME,
                        spec_fn(name, prefix, Self::NAME),
                        p,
                    ),
                    sign: gf_sign(gt),
                    cb: None,
                    p: p.clone(),
                }
            }
        }

        impl<S: Scalar> Algo<S> for $name {
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
                let t = self.p.t;
                if $ls {
                    fdm_ls_calc(
                        |e, w| cb.add(e, w),
                        step,
                        diag_ip,
                        diag_i1,
                        op1,
                        op2,
                        factor,
                        rho.get(ip),
                        self.sign,
                        stats,
                        t,
                    );
                }
                if $gt {
                    fdm_gt_calc(
                        |e, w| cb.add(e, w),
                        step,
                        diag_ip,
                        diag_i1,
                        op1,
                        op2,
                        factor,
                        rho.get(i1),
                        stats,
                        t,
                    );
                }
            }

            fn end(&mut self, _step: &Step) {
                let cb = self.cb.take().expect("begin() opened the accumulator");
                self.spec.merge_full(&cb);
            }

            fn rho_type(&self) -> RhoType {
                RhoType::RhoFdm
            }

            fn save(&self) -> Result<(), NrgError> {
                self.spec.save()
            }
        }
    };
}

fdm_realfreq_algo!(AlgoFDMls, "FDMls", true, false);
fdm_realfreq_algo!(AlgoFDMgt, "FDMgt", false, true);
fdm_realfreq_algo!(AlgoFDM, "FDM", true, true);

/// FDM Green function on the Matsubara grid.
pub struct AlgoFDMmats {
    results: Matsubara,
    filename: String,
    sign: f64,
    p: Params,
}

impl AlgoFDMmats {
    pub const NAME: &'static str = "FDMmats";

    pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
        Self {
            results: Matsubara::new(p.mats, gt, p.t),
            filename: spec_fn(name, prefix, Self::NAME),
            sign: gf_sign(gt),
            p: p.clone(),
        }
    }
}

impl<S: Scalar> Algo<S> for AlgoFDMmats {
    fn begin(&mut self, _step: &Step) {}

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
        let t = self.p.t;
        let beta = 1.0 / t;
        let results = &mut self.results;
        fdm_ls_calc(
            |e, w| results.add_pole(e, w, w * (-beta)),
            step,
            diag_ip,
            diag_i1,
            op1,
            op2,
            factor,
            rho.get(ip),
            self.sign,
            stats,
            t,
        );
        let results = &mut self.results;
        fdm_gt_calc(
            |e, w| results.add_pole(e, w, w * (-beta)),
            step,
            diag_ip,
            diag_i1,
            op1,
            op2,
            factor,
            rho.get(i1),
            stats,
            t,
        );
    }

    fn end(&mut self, _step: &Step) {}

    fn rho_type(&self) -> RhoType {
        RhoType::RhoFdm
    }

    fn save(&self) -> Result<(), NrgError> {
        self.results.save(&self.filename)
    }
}
