//! Density-matrix NRG: single-shell evaluation weighted by the reduced
//! density matrix instead of the grand-canonical weights.

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

pub struct AlgoDMNRG {
    spec: SpectrumRealFreq,
    sign: f64,
    cb: Option<ChainBinning>,
    p: Params,
}

impl AlgoDMNRG {
    pub const NAME: &'static str = "DMNRG";

    pub fn new(name: &str, prefix: &str, gt: GfType, p: &Params) -> Self {
        Self {
            spec: SpectrumRealFreq::new(name, Self::NAME, spec_fn(name, prefix, Self::NAME), p),
            sign: gf_sign(gt),
            cb: None,
            p: p.clone(),
        }
    }
}

impl<S: Scalar> Algo<S> for AlgoDMNRG {
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
        _stats: &Stats<S>,
    ) {
        let cb = self.cb.as_mut().expect("begin() opens the accumulator");
        let (Some(rho_p), Some(rho_1)) = (rho.get(ip), rho.get(i1)) else {
            return;
        };
        // The reduced density matrices live on the kept states; the two
        // anticommutator halves weight the excitation by the occupation of
        // either side.
        let kp = rho_p.nrows().min(op2.ncols());
        let k1 = rho_1.nrows().min(op2.nrows());
        if kp > 0 {
            let a = op2.slice(ndarray::s![.., ..kp]).dot(rho_p);
            for r1 in diag_i1.stored() {
                let e1 = diag_i1.value_zero[r1];
                for rp in 0..kp {
                    let ep = diag_ip.value_zero[rp];
                    let w = weight_of(op1[(r1, rp)], a[(r1, rp)]) * factor;
                    cb.add(step.scale() * (e1 - ep), w);
                }
            }
        }
        if k1 > 0 {
            let b = rho_1.dot(&op2.slice(ndarray::s![..k1, ..]));
            for r1 in 0..k1 {
                let e1 = diag_i1.value_zero[r1];
                for rp in diag_ip.stored() {
                    let ep = diag_ip.value_zero[rp];
                    let w = weight_of(op1[(r1, rp)], b[(r1, rp)]) * (-self.sign * factor);
                    cb.add(step.scale() * (e1 - ep), w);
                }
            }
        }
    }

    fn end(&mut self, step: &Step) {
        let cb = self.cb.take().expect("begin() opened the accumulator");
        self.spec.merge_windowed(&cb, step);
    }

    fn rho_type(&self) -> RhoType {
        RhoType::Rho
    }

    fn save(&self) -> Result<(), NrgError> {
        self.spec.save()
    }
}
