use approx::assert_relative_eq;
use ndarray::{array, Array1};

use crate::eigen::{DiagInfo, Eigen};
use crate::error::NrgError;
use crate::invar::Invar;
use crate::params::Params;
use crate::step::{RunType, Step};
use crate::symmetry::qs::SymmetryQS;
use crate::truncation::{highest_retained_energy, truncate_prepare};

fn diag_from(spectra: &[(&[i32], &[f64])]) -> DiagInfo<f64> {
    let mut diag = DiagInfo::new();
    for (qn, evs) in spectra {
        let mut eig: Eigen<f64> = Eigen::diagonal(Array1::from_vec(evs.to_vec()));
        eig.subtract_egs(0.0);
        diag.insert(Invar::new(qn.to_vec()), eig);
    }
    diag
}

fn params(keep: usize) -> Params {
    let mut p = Params::default();
    p.nmax = 5;
    p.keep = keep;
    p.safeguard = 0.0;
    p.channels = 1;
    p
}

#[test]
fn test_truncation_keep_count() {
    let diag = diag_from(&[
        (&[0, 1], &[0.0, 1.0, 2.0, 3.0]),
        (&[1, 2], &[0.5, 1.5, 2.5]),
    ]);
    let p = params(4);
    let step = Step::new(&p, RunType::Nrg);
    let emax = highest_retained_energy(&step, &diag, &p).expect("valid spectrum");
    // Pooled and sorted: 0.0 0.5 1.0 1.5 | 2.0 2.5 3.0
    assert_relative_eq!(emax, 1.5);
}

#[test]
fn test_truncation_requires_zero_ground_state() {
    let mut diag = DiagInfo::new();
    diag.insert(
        Invar::new(vec![0, 1]),
        Eigen::<f64>::diagonal(array![0.3, 1.0]),
    );
    let p = params(2);
    let step = Step::new(&p, RunType::Nrg);
    assert!(matches!(
        highest_retained_energy(&step, &diag, &p),
        Err(NrgError::ToleranceViolation(_))
    ));
}

#[test]
fn test_truncation_keepenergy_clamps() {
    let diag = diag_from(&[(&[0, 1], &[0.0, 0.1, 0.2, 5.0, 6.0, 7.0])]);
    let mut p = params(100);
    p.keepenergy = 1.0;
    p.keepmin = 2;
    let step = Step::new(&p, RunType::Nrg);
    // Three states below the cutoff plus the first discarded one.
    let emax = highest_retained_energy(&step, &diag, &p).expect("valid spectrum");
    assert_relative_eq!(emax, 5.0);
}

#[test]
fn test_truncation_safeguard_clears_degenerate_cluster() {
    let diag = diag_from(&[(
        &[0, 1],
        &[0.0, 1.0, 2.0, 2.0 + 1e-8, 2.0 + 2e-8, 4.0],
    )]);
    let mut p = params(3);
    p.safeguard = 1e-5;
    p.safeguardmax = 10;
    let step = Step::new(&p, RunType::Nrg);
    let emax = highest_retained_energy(&step, &diag, &p).expect("valid spectrum");
    // The cut moves past the whole degenerate cluster at E = 2.
    assert_relative_eq!(emax, 2.0 + 2e-8);
    let mut diag = diag;
    truncate_prepare(&step, &mut diag, &SymmetryQS::new(), &p).expect("sufficient states");
    let eig = diag.get(&Invar::new(vec![0, 1])).expect("subspace");
    assert_eq!(eig.nr_kept(), 5);
}

#[test]
fn test_truncation_detects_insufficient_states() {
    // Subspace (1,2) was diagonalized partially: 2 of 4 states computed,
    // all below the global cut.
    let mut diag = DiagInfo::new();
    let mut full: Eigen<f64> = Eigen::diagonal(array![0.0, 1.0, 2.0, 3.0]);
    full.subtract_egs(0.0);
    diag.insert(Invar::new(vec![0, 1]), full);
    let mut partial = Eigen::new(
        array![0.5, 0.6],
        ndarray::Array2::<f64>::zeros((2, 4)),
    );
    partial.subtract_egs(0.0);
    diag.insert(Invar::new(vec![1, 2]), partial);
    let p = params(6);
    let step = Step::new(&p, RunType::Nrg);
    assert!(matches!(
        truncate_prepare(&step, &mut diag, &SymmetryQS::new(), &p),
        Err(NrgError::InsufficientStates)
    ));
}
