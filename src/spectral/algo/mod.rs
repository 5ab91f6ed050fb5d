//! Spectral-accumulation algorithms.
//!
//! Each algorithm is an accumulator object driven per step with the
//! eigenspectra of one subspace pair, the two operator blocks connecting
//! them, and the density matrices required by its weighting scheme.

use crate::eigen::Eigen;
use crate::error::NrgError;
use crate::invar::Invar;
use crate::operators::DensMatElements;
use crate::scalar::{Matrix, Scalar, Weight};
use crate::stats::Stats;
use crate::step::Step;

pub mod cfs;
pub mod dmnrg;
pub mod fdm;
pub mod ft;

/// Which density matrix an algorithm consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RhoType {
    None,
    Rho,
    RhoFdm,
}

/// A spectral-function algorithm with a fixed weighting scheme.
pub trait Algo<S: Scalar>: Send {
    /// Opens the per-step accumulator.
    fn begin(&mut self, step: &Step);

    /// Accumulates the contributions of one subspace pair `(I1, Ip)`.
    #[allow(clippy::too_many_arguments)]
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
    );

    /// Merges the per-step accumulator into the run-wide spectrum.
    fn end(&mut self, step: &Step);

    fn rho_type(&self) -> RhoType {
        RhoType::None
    }

    /// Writes the accumulated spectrum to its output file.
    fn save(&self) -> Result<(), NrgError>;
}

/// `conj(a)·b` promoted to a spectral weight.
pub(crate) fn weight_of<S: Scalar>(a: S, b: S) -> Weight {
    (a.conj() * b).as_c()
}
