use approx::assert_relative_eq;

use crate::invar::Invar;
use crate::symmetry::qs::SymmetryQS;
use crate::symmetry::Symmetry;

fn qs(v: &[i32]) -> Invar {
    Invar::new(v.to_vec())
}

fn sym() -> SymmetryQS {
    SymmetryQS::new()
}

fn s(sym: &SymmetryQS) -> &dyn Symmetry<f64> {
    sym
}

#[test]
fn test_qs_multiplicity_and_admissibility() {
    let sym = sym();
    assert_eq!(s(&sym).mult(&qs(&[0, 1])), 1);
    assert_eq!(s(&sym).mult(&qs(&[1, 4])), 4);
    assert!(s(&sym).invar_allowed(&qs(&[-2, 1])));
    assert!(!s(&sym).invar_allowed(&qs(&[0, 0])));
}

#[test]
fn test_qs_ancestors_invert_new_subspaces() {
    let sym = sym();
    let i = qs(&[0, 2]);
    for anc in s(&sym).ancestors(&i) {
        assert!(
            s(&sym).new_subspaces(&anc).contains(&i),
            "{i} must be reachable from its ancestor {anc}"
        );
    }
}

#[test]
fn test_qs_triangle_selection() {
    let sym = sym();
    // Doublet operator connecting (1,2) to (0,1) and (0,3).
    let iop = qs(&[1, 2]);
    assert!(s(&sym).triangle_allowed(&qs(&[1, 2]), &qs(&[0, 1]), &iop));
    assert!(s(&sym).triangle_allowed(&qs(&[1, 2]), &qs(&[0, 3]), &iop));
    assert!(!s(&sym).triangle_allowed(&qs(&[1, 2]), &qs(&[0, 2]), &iop));
    assert!(!s(&sym).triangle_allowed(&qs(&[2, 2]), &qs(&[0, 1]), &iop));
}

#[test]
fn test_qs_specdens_factors_sum_to_site_dimension() {
    let sym = sym();
    // Σ over the two spin channels of a doublet: (S+1) + S = 2S+1 = SS.
    for ssp in [1, 2, 5] {
        let up = s(&sym).specdens_factor(&qs(&[0, ssp]), &qs(&[1, ssp + 1]));
        let total = if ssp > 1 {
            up + s(&sym).specdens_factor(&qs(&[0, ssp]), &qs(&[1, ssp - 1]))
        } else {
            up
        };
        assert_relative_eq!(total, f64::from(ssp));
    }
}

#[test]
fn test_qs_doublet_tables_connect_allowed_ancestors() {
    let sym = sym();
    let i1 = qs(&[0, 2]);
    let targets = s(&sym).recalc_doublet_targets(&i1);
    assert_eq!(targets.len(), 2);
    for target in &targets {
        assert!(!target.table.is_empty());
        for r in &target.table {
            assert!(s(&sym).triangle_allowed(&r.in1, &r.inp, &target.iop));
            assert!(r.factor.is_finite());
            assert!(r.factor.abs() > 1e-14);
        }
    }
    // The spin-raising target keeps the empty- and double-site spectator
    // entries with unit weight.
    let raising = targets
        .iter()
        .find(|t| t.ip == qs(&[-1, 3]))
        .expect("raising target");
    let empty = raising
        .table
        .iter()
        .find(|r| r.i1 == 0 && r.ip == 0)
        .expect("empty-site entry");
    assert_relative_eq!(empty.factor.abs(), 1.0, epsilon = 1e-12);
}

#[test]
fn test_qs_f_tables_share_ancestors() {
    let sym = sym();
    let ip = qs(&[0, 2]);
    let targets = s(&sym).recalc_f_targets(&ip, 0, 0);
    assert_eq!(targets.len(), 2);
    for target in &targets {
        assert_eq!(target.i1.qn(0), 1);
        for r in &target.table {
            let anc1 = s(&sym).ancestors(&target.i1);
            let ancp = s(&sym).ancestors(&ip);
            assert_eq!(anc1[r.i1], ancp[r.ip]);
        }
    }
}

#[test]
fn test_qs_triplet_tables_respect_spin_selection() {
    let sym = sym();
    let i1 = qs(&[0, 3]);
    let targets = s(&sym).recalc_triplet_targets(&i1);
    for target in &targets {
        assert_eq!(target.ip.qn(0), 0);
        assert!((target.ip.qn(1) - 3).abs() <= 2);
    }
    // A triplet cannot lower SS = 1 further down.
    let targets1 = s(&sym).recalc_triplet_targets(&qs(&[0, 1]));
    assert!(targets1.iter().all(|t| t.ip.qn(1) >= 1));
}
