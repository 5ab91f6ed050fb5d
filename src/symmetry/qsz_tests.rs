use approx::assert_relative_eq;
use ndarray::array;

use crate::coef::Coef;
use crate::diag::{build_hamiltonian, diagonalise, DiagContext, DiagParams};
use crate::eigen::{DiagInfo, Eigen};
use crate::invar::Invar;
use crate::operators::{MatrixElements, Opch};
use crate::params::Params;
use crate::step::{RunType, Step};
use crate::symmetry::qsz::SymmetryQSZ;
use crate::symmetry::Symmetry;

fn iv(v: &[i32]) -> Invar {
    Invar::new(v.to_vec())
}

fn s(sym: &SymmetryQSZ) -> &dyn Symmetry<f64> {
    sym
}

/// A free site in the Sz-resolved basis, with the f matrix elements in the
/// engine's own convention.
fn free_site() -> (DiagInfo<f64>, Opch<f64>) {
    let mut diag = DiagInfo::new();
    for i in [iv(&[-1, 0]), iv(&[0, 1]), iv(&[0, -1]), iv(&[1, 0])] {
        let mut eig: Eigen<f64> = Eigen::diagonal(array![0.0]);
        eig.subtract_egs(0.0);
        diag.insert(i, eig);
    }
    let mut f_up: MatrixElements<f64> = MatrixElements::new();
    f_up.insert((iv(&[0, 1]), iv(&[-1, 0])), array![[1.0]]);
    f_up.insert((iv(&[1, 0]), iv(&[0, -1])), array![[1.0]]);
    let mut f_down: MatrixElements<f64> = MatrixElements::new();
    f_down.insert((iv(&[0, -1]), iv(&[-1, 0])), array![[1.0]]);
    f_down.insert((iv(&[1, 0]), iv(&[0, 1])), array![[-1.0]]);
    let mut opch = Opch::new(1, 2);
    opch.set(0, 0, f_up);
    opch.set(0, 1, f_down);
    (diag, opch)
}

#[test]
fn test_qsz_capabilities() {
    let sym = SymmetryQSZ::new();
    assert_eq!(s(&sym).mult(&iv(&[3, -2])), 1);
    assert!(s(&sym).is_field());
    assert!(s(&sym).check_spin(&iv(&[1, 1]), &iv(&[0, 0]), 1));
    assert!(!s(&sym).check_spin(&iv(&[1, 1]), &iv(&[0, 0]), -1));
    assert!(s(&sym).check_spin(&iv(&[1, 1]), &iv(&[0, 0]), 0));
    let i = iv(&[0, 1]);
    for anc in s(&sym).ancestors(&i) {
        assert!(s(&sym).new_subspaces(&anc).contains(&i));
    }
}

#[test]
fn test_qsz_two_site_exact_spectra() {
    let (diag0, opch) = free_site();
    let mut coef = Coef::new();
    coef.xi.set(vec![vec![1.0, 1.0]]);
    coef.zeta.set(vec![vec![0.0, 0.0, 0.0]]);
    let mut p = Params::default();
    p.lambda = 1.0000001;
    p.nmax = 2;
    p.channels = 1;
    p.perchannel = 2;
    p.combs = 4;
    let step = Step::new(&p, RunType::Nrg);
    let sym = SymmetryQSZ::new();
    let ctx = DiagContext {
        step: &step,
        opch: &opch,
        coef: &coef,
        diagprev: &diag0,
        sym: &sym,
        p: &p,
    };
    let dp = DiagParams::new(1.0);
    // Two tight-binding sites: single-particle levels ±1 per spin.
    let expect: &[(&[i32], &[f64])] = &[
        (&[-2, 0], &[0.0]),
        (&[-1, 1], &[-1.0, 1.0]),
        (&[-1, -1], &[-1.0, 1.0]),
        (&[0, 0], &[-2.0, 0.0, 0.0, 2.0]),
        (&[0, 2], &[0.0]),
        (&[0, -2], &[0.0]),
        (&[1, 1], &[-1.0, 1.0]),
        (&[1, -1], &[-1.0, 1.0]),
        (&[2, 0], &[0.0]),
    ];
    for (qn, evs) in expect {
        let i = iv(qn);
        let h = build_hamiltonian(&ctx, &i);
        assert_eq!(h.nrows(), evs.len(), "dimension of sector {i}");
        let eig = diagonalise(h, &dp).expect("solvable");
        for (k, &e) in evs.iter().enumerate() {
            assert_relative_eq!(eig.value_orig[k], e, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_qsz_f_tables_cover_both_spins() {
    let sym = SymmetryQSZ::new();
    let ip = iv(&[0, 1]);
    let up = s(&sym).recalc_f_targets(&ip, 0, 0);
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].i1, iv(&[1, 2]));
    let down = s(&sym).recalc_f_targets(&ip, 0, 1);
    assert_eq!(down.len(), 1);
    assert_eq!(down[0].i1, iv(&[1, 0]));
    for target in up.iter().chain(down.iter()) {
        for r in &target.table {
            assert!(r.factor.abs() > 0.0);
        }
    }
}

#[test]
fn test_qsz_doublet_targets_split_by_spin() {
    let sym = SymmetryQSZ::new();
    let i1 = iv(&[1, 1]);
    let targets = s(&sym).recalc_doublet_targets(&i1);
    assert_eq!(targets.len(), 2);
    let ips: Vec<&Invar> = targets.iter().map(|t| &t.ip).collect();
    assert!(ips.contains(&&iv(&[0, 0])));
    assert!(ips.contains(&&iv(&[0, 2])));
    for target in &targets {
        for r in &target.table {
            assert_relative_eq!(r.factor, 1.0);
        }
    }
}
