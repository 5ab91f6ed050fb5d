use approx::assert_relative_eq;
use ndarray::array;
use num_complex::Complex64;

use crate::scalar::{frobenius_norm, num_equal, trace_real};

#[test]
fn test_scalar_frobenius_norm() {
    let m = array![[1.0, 2.0], [3.0, 4.0]];
    assert_relative_eq!(frobenius_norm::<f64>(&m), 30.0);

    let mc = array![
        [Complex64::new(0.0, 1.0), Complex64::new(1.0, 1.0)],
        [Complex64::new(0.0, 0.0), Complex64::new(2.0, 0.0)]
    ];
    assert_relative_eq!(frobenius_norm::<Complex64>(&mc), 1.0 + 2.0 + 4.0);
}

#[test]
fn test_scalar_trace_real() {
    let m = array![[1.5, 9.0], [9.0, 2.5]];
    assert_relative_eq!(trace_real::<f64>(&m, 1e-8), 4.0);

    let mc = array![
        [Complex64::new(1.0, 1e-15), Complex64::new(0.0, 5.0)],
        [Complex64::new(0.0, -5.0), Complex64::new(0.25, -1e-15)]
    ];
    assert_relative_eq!(trace_real::<Complex64>(&mc, 1e-8), 1.25);
}

#[test]
fn test_scalar_num_equal() {
    assert!(num_equal(1.0, 1.0 + 1e-14, 1e-12));
    assert!(!num_equal(1.0, 1.0 + 1e-10, 1e-12));
    assert!(num_equal(0.0, 0.0, 1e-12));
    assert!(num_equal(1e-15, -1e-15, 1e-12));
}
