use approx::assert_relative_eq;
use ndarray::array;

use crate::coef::Coef;
use crate::diag::{
    build_hamiltonian, diagonalise, make_backend, DiagContext, DiagParams, DiagonalizerBackend,
    MessagePassingDiag, SharedMemoryDiag,
};
use crate::eigen::{DiagInfo, Eigen};
use crate::invar::Invar;
use crate::operators::{MatrixElements, Opch};
use crate::params::Params;
use crate::step::{RunType, Step};
use crate::subspaces::SubspaceStructure;
use crate::symmetry::qs::SymmetryQS;
use crate::symmetry::Symmetry;

fn qs(v: &[i32]) -> Invar {
    Invar::new(v.to_vec())
}

/// A free site at half filling: one state in each of (-1,1), (0,2), (1,1),
/// all at zero energy, with the f matrix elements in the engine's own
/// convention.
fn free_site() -> (DiagInfo<f64>, Opch<f64>) {
    let mut diag = DiagInfo::new();
    for (i, e) in [
        (qs(&[-1, 1]), 0.0),
        (qs(&[0, 2]), 0.0),
        (qs(&[1, 1]), 0.0),
    ] {
        let mut eig: Eigen<f64> = Eigen::diagonal(array![e]);
        eig.subtract_egs(0.0);
        diag.insert(i, eig);
    }
    let mut f: MatrixElements<f64> = MatrixElements::new();
    f.insert((qs(&[0, 2]), qs(&[-1, 1])), array![[1.0]]);
    f.insert(
        (qs(&[1, 1]), qs(&[0, 2])),
        array![[-std::f64::consts::SQRT_2]],
    );
    let mut opch = Opch::new(1, 1);
    opch.set(0, 0, f);
    (diag, opch)
}

fn chain_coef(t: f64) -> Coef<f64> {
    let mut coef = Coef::new();
    coef.xi.set(vec![vec![t, t]]);
    coef.zeta.set(vec![vec![0.0, 0.0, 0.0]]);
    coef
}

fn test_params() -> Params {
    let mut p = Params::default();
    p.lambda = 1.0000001; // rescaling irrelevant on a zero-energy shell
    p.nmax = 2;
    p.channels = 1;
    p.perchannel = 1;
    p.combs = 4;
    p
}

#[test]
fn test_diag_two_site_exact_spectra() {
    // Two tight-binding sites with hopping t: single-particle levels ±t.
    let (diag0, opch) = free_site();
    let coef = chain_coef(1.0);
    let p = test_params();
    let step = Step::new(&p, RunType::Nrg);
    let sym = SymmetryQS::new();
    let ctx = DiagContext {
        step: &step,
        opch: &opch,
        coef: &coef,
        diagprev: &diag0,
        sym: &sym,
        p: &p,
    };
    let dp = DiagParams::new(1.0);
    let expect: &[(&[i32], &[f64])] = &[
        (&[-2, 1], &[0.0]),
        (&[-1, 2], &[-1.0, 1.0]),
        (&[0, 1], &[-2.0, 0.0, 2.0]),
        (&[0, 3], &[0.0]),
        (&[1, 2], &[-1.0, 1.0]),
        (&[2, 1], &[0.0]),
    ];
    for (iv, evs) in expect {
        let i = qs(iv);
        let h = build_hamiltonian(&ctx, &i);
        assert_eq!(h.nrows(), evs.len(), "dimension of sector {i}");
        let eig = diagonalise(h, &dp).expect("solvable");
        for (k, &e) in evs.iter().enumerate() {
            assert_relative_eq!(eig.value_orig[k], e, epsilon = 1e-12, max_relative = 1e-12);
        }
    }
}

#[test]
fn test_diag_diagratio_keeps_leading_fraction() {
    let h = ndarray::Array2::from_diag(&array![4.0, 1.0, 3.0, 2.0]);
    let eig = diagonalise::<f64>(h, &DiagParams::new(0.5)).expect("solvable");
    assert_eq!(eig.nr_computed(), 2);
    assert_relative_eq!(eig.value_orig[0], 1.0);
    assert_relative_eq!(eig.value_orig[1], 2.0);
    assert_eq!(eig.dim(), 4);
}

#[test]
fn test_diag_backend_equivalence() {
    let (diag0, opch) = free_site();
    let coef = chain_coef(0.7);
    let p = test_params();
    let step = Step::new(&p, RunType::Nrg);
    let sym = SymmetryQS::new();
    let ctx = DiagContext {
        step: &step,
        opch: &opch,
        coef: &coef,
        diagprev: &diag0,
        sym: &sym,
        p: &p,
    };
    let tasks = SubspaceStructure::new(&diag0, &sym as &dyn Symmetry<f64>).task_list();
    assert!(!tasks.is_empty());
    let dp = DiagParams::new(1.0);
    let shared = SharedMemoryDiag { workers: 2 }
        .diagonalize(&ctx, &tasks, &dp)
        .expect("shared backend");
    let mp = MessagePassingDiag { workers: 3 }
        .diagonalize(&ctx, &tasks, &dp)
        .expect("message-passing backend");
    assert_eq!(shared.len(), mp.len());
    for ((i1, e1), (i2, e2)) in shared.iter().zip(mp.iter()) {
        assert_eq!(i1, i2);
        assert_eq!(e1.nr_computed(), e2.nr_computed());
        for (a, b) in e1.value_orig.iter().zip(e2.value_orig.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-13);
        }
    }
}

#[test]
fn test_diag_backend_selection() {
    let mut p = test_params();
    let shared: Box<dyn DiagonalizerBackend<f64>> = make_backend(&p);
    assert_eq!(shared.name(), "shared-memory");
    p.diag_mode = "MPI".to_string();
    let mp: Box<dyn DiagonalizerBackend<f64>> = make_backend(&p);
    assert_eq!(mp.name(), "message-passing");
}
