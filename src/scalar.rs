//! Scalar-kind abstraction separating the real-valued and complex-valued
//! renditions of the solver.
//!
//! The entire engine is generic over one scalar parameter: matrix elements,
//! Wilson-chain coefficients and expectation values all share the kind, while
//! eigenvalues stay real and spectral weights stay complex regardless.

use ndarray::{Array1, Array2, LinalgScalar};
use ndarray_linalg::{Lapack, Scalar as LapackScalar};
use num_complex::Complex64;

/// Matrix type for operator blocks and eigenvector stores.
pub type Matrix<S> = Array2<S>;

/// Eigenvalues are always real, independently of the scalar kind.
pub type EnergyVec = Array1<f64>;

/// Spectral-weight accumulators are always complex.
pub type Weight = Complex64;

/// Scalar kinds admitted by the engine: `f64` for time-reversal-symmetric
/// models, [`Complex64`] when the chain coefficients or operators carry
/// phases.
///
/// The [`LapackScalar`] supertrait supplies conjugation (`conj`), promotion
/// from real coefficients (`from_real`) and the complex view (`as_c`) used by
/// the spectral accumulators; conjugation is the identity in the real case.
pub trait Scalar:
    LapackScalar<Real = f64, Complex = Complex64> + Lapack + LinalgScalar + Send + Sync + 'static
{
    /// `true` for the complex rendition of the engine.
    const IS_COMPLEX: bool;

    /// Builds a scalar from its Cartesian parts; `None` when an imaginary
    /// part is forced onto the real kind.
    fn from_parts(re: f64, im: f64) -> Option<Self>;
}

impl Scalar for f64 {
    const IS_COMPLEX: bool = false;

    fn from_parts(re: f64, im: f64) -> Option<Self> {
        (im == 0.0).then_some(re)
    }
}

impl Scalar for Complex64 {
    const IS_COMPLEX: bool = true;

    fn from_parts(re: f64, im: f64) -> Option<Self> {
        Some(Complex64::new(re, im))
    }
}

/// Frobenius norm of an operator block, without the final square root.
pub fn frobenius_norm<S: Scalar>(m: &Matrix<S>) -> f64 {
    m.iter().map(|x| x.square()).sum()
}

/// Sum of the diagonal elements, checked to be real within `tol`.
///
/// Density matrices and thermodynamic traces are real by construction; a
/// residual imaginary part signals an arithmetic bug upstream.
pub fn trace_real<S: Scalar>(m: &Matrix<S>, tol: f64) -> f64 {
    debug_assert_eq!(m.nrows(), m.ncols());
    let tr: Complex64 = m.diag().iter().map(|x| x.as_c()).sum();
    if tr.im.abs() > tol * (1.0 + tr.re.abs()) {
        log::warn!("expected a real trace, got {tr}");
    }
    tr.re
}

/// Compares two floats for equality up to a relative tolerance, treating
/// values that are both below the tolerance as equal.
pub fn num_equal(a: f64, b: f64, eps: f64) -> bool {
    if a == 0.0 && b == 0.0 {
        return true;
    }
    if a.abs() < eps && b.abs() < eps {
        return true;
    }
    (a - b).abs() < eps * (a.abs() + b.abs())
}

#[cfg(test)]
#[path = "scalar_tests.rs"]
mod scalar_tests;
