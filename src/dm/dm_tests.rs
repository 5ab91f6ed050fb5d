use approx::assert_relative_eq;
use ndarray::array;

use crate::dm::{calc_zn_d, fdm_thermodynamics, grand_canonical_z, init_rho};
use crate::eigen::{DiagInfo, Eigen};
use crate::invar::Invar;
use crate::params::Params;
use crate::stats::Stats;
use crate::step::{RunType, Step};
use crate::subspaces::{AllSteps, SubspaceStructure};
use crate::symmetry::qsz::SymmetryQSZ;
use crate::symmetry::Symmetry;

fn single_shell() -> (DiagInfo<f64>, AllSteps) {
    let mut diag: DiagInfo<f64> = DiagInfo::new();
    let mut eig = Eigen::diagonal(array![0.0, 1.0]);
    eig.subtract_egs(0.0);
    eig.absenergy = vec![0.0, 1.0];
    eig.absenergy_g = vec![0.0, 1.0];
    eig.absenergy_n = vec![0.0, 1.0];
    diag.insert(Invar::new(vec![0, 0]), eig);
    let mut all_steps = AllSteps::new(0, 1);
    all_steps.store(0, &diag, &SubspaceStructure::default(), true);
    (diag, all_steps)
}

fn params(t: f64) -> Params {
    let mut p = Params::default();
    p.nmax = 0;
    p.t = t;
    p.channels = 1;
    p
}

#[test]
fn test_dm_init_rho_normalization() {
    let (diag, _) = single_shell();
    let p = params(0.5);
    let mut step = Step::new(&p, RunType::Nrg);
    step.set_zbw();
    let sym = SymmetryQSZ::new();
    let z = grand_canonical_z(&step, &diag, &sym as &dyn Symmetry<f64>, 1.0);
    let sc_t = step.sc_t();
    assert_relative_eq!(z, 1.0 + (-sc_t).exp(), epsilon = 1e-14);
    let rho = init_rho(&step, &diag, &sym as &dyn Symmetry<f64>).expect("normalizable");
    assert_relative_eq!(rho.trace(|_| 1), 1.0, epsilon = 1e-12);
    let block = rho.get(&Invar::new(vec![0, 0])).expect("subspace");
    assert!(block[(0, 0)] > block[(1, 1)]);
    assert_relative_eq!(block[(0, 1)], 0.0);
}

#[test]
fn test_dm_shell_weights_sum_to_one() {
    let (_, all_steps) = single_shell();
    let p = params(1.0);
    let mut stats: Stats<f64> = Stats::new(&p);
    let sym = SymmetryQSZ::new();
    calc_zn_d(&all_steps, &mut stats, &sym as &dyn Symmetry<f64>, p.t).expect("weights");
    assert_relative_eq!(stats.wn[0], 1.0, epsilon = 1e-14);
    let zn = 1.0 + (-1.0_f64).exp();
    assert_relative_eq!(stats.zn_dg[0].to_f64(), zn, epsilon = 1e-14);
    assert_relative_eq!(stats.zzg, zn, epsilon = 1e-14);
}

#[test]
fn test_dm_fdm_thermodynamics_consistency() {
    let (_, all_steps) = single_shell();
    let t = 0.7;
    let p = params(t);
    let mut stats: Stats<f64> = Stats::new(&p);
    stats.gs_energy = 0.0;
    let sym = SymmetryQSZ::new();
    calc_zn_d(&all_steps, &mut stats, &sym as &dyn Symmetry<f64>, t).expect("weights");
    fdm_thermodynamics(&all_steps, &mut stats, &sym as &dyn Symmetry<f64>, t);
    // Two-level system at temperature t, exact values.
    let z = 1.0 + (-1.0_f64 / t).exp();
    let e = (-1.0_f64 / t).exp() / z;
    assert_relative_eq!(stats.z_fdm, z, epsilon = 1e-12);
    assert_relative_eq!(stats.e_fdm, e, epsilon = 1e-12);
    assert_relative_eq!(stats.f_fdm, -t * z.ln(), epsilon = 1e-12);
    assert_relative_eq!(stats.s_fdm, (stats.e_fdm - stats.f_fdm) / t, epsilon = 1e-14);
    // C = β² (⟨E²⟩ - ⟨E⟩²) · ... for the two-level system: e(1-e)/t².
    assert_relative_eq!(stats.c_fdm, e * (1.0 - e) / (t * t), epsilon = 1e-10);
    // The true partition function can never undercut the ground-state term.
    assert!(stats.z_fdm >= (-stats.gs_energy / t).exp());
}
