//! Backward-pass construction of the reduced and full density matrices.
//!
//! After the forward pass, the reduced density matrix of the last shell is
//! propagated backward by tracing out the site added at each step. The FDM
//! variant instead accumulates the full tower of discarded states, with the
//! shell weights evaluated in extended precision.

use ndarray::{s, Array2};
use rug::ops::Pow;
use rug::Float;

use crate::eigen::DiagInfo;
use crate::error::NrgError;
use crate::operators::DensMatElements;
use crate::params::{Params, Workdir, FN_RHO, FN_RHOFDM};
use crate::scalar::{num_equal, Scalar};
use crate::stats::{Stats, MP_PREC};
use crate::step::Step;
use crate::subspaces::AllSteps;
use crate::symmetry::Symmetry;

#[cfg(test)]
#[path = "dm_tests.rs"]
mod dm_tests;

/// Grand-canonical partition function of the current shell over kept
/// states, `Σ_I mult(I) Σ_i exp(-E_i·scT·factor)`.
pub fn grand_canonical_z<S: Scalar>(
    step: &Step,
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    factor: f64,
) -> f64 {
    let mut zn = 0.0;
    for (i, eig) in diag.iter() {
        let mult = sym.mult(i) as f64;
        for r in eig.kept() {
            zn += mult * (-eig.value_zero[r] * step.sc_t() * factor).exp();
        }
    }
    debug_assert!(zn >= 1.0);
    zn
}

/// Verifies `Tr ρ = ref_value` within tolerance.
pub fn check_trace_rho<S: Scalar>(
    rho: &DensMatElements<S>,
    sym: &dyn Symmetry<S>,
    ref_value: f64,
) -> Result<(), NrgError> {
    let tr = rho.trace(|i| sym.mult(i));
    if !num_equal(tr, ref_value, 1e-8) {
        return Err(NrgError::ToleranceViolation(format!(
            "density-matrix trace {tr} differs from {ref_value}"
        )));
    }
    Ok(())
}

/// Density matrix of the last shell, `ρ_I = diag exp(-E/scT) / Z_N`,
/// normalized to unit trace.
pub fn init_rho<S: Scalar>(
    step: &Step,
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
) -> Result<DensMatElements<S>, NrgError> {
    let zn = grand_canonical_z(step, diag, sym, 1.0);
    let mut rho = DensMatElements::new();
    for (i, eig) in diag.iter() {
        let m = eig.diagonal_exp(step.sc_t()).mapv(|x| x.mul_real(1.0 / zn));
        rho.insert(i.clone(), m);
    }
    check_trace_rho(&rho, sym, 1.0)?;
    Ok(rho)
}

/// Reduces a shell density matrix to the previous shell by summing over the
/// added site's states with the symmetry multiplicity weights.
fn reduce_one_shell<S: Scalar>(
    rho: &DensMatElements<S>,
    diag: &DiagInfo<S>,
    all_steps: &AllSteps,
    n: usize,
    sym: &dyn Symmetry<S>,
) -> DensMatElements<S> {
    let mut rho_prev = DensMatElements::new();
    for (i, rho_i) in rho.iter() {
        let Some(eig) = diag.get(i) else { continue };
        let Some(ds) = all_steps.at(n).get(i) else {
            continue;
        };
        // The support of ρ itself decides how many rows enter: the kept
        // sector for the reduced matrices, everything for the full one.
        let rows = rho_i.nrows().min(eig.nr_stored());
        if rows == 0 {
            continue;
        }
        let mult_i = sym.mult(i) as f64;
        let anc = sym.ancestors(i);
        for (c, ip) in anc.iter().enumerate() {
            if !ds.rmax.exists(c) {
                continue;
            }
            let u = &eig.blocks[c];
            debug_assert_eq!(u.ncols(), ds.rmax.rmax(c));
            let u_rows = u.slice(s![..rows, ..]);
            // U† ρ U, weighted by the multiplicity ratio.
            let weight = mult_i / sym.mult(ip) as f64;
            let contrib = u_rows
                .mapv(|x| x.conj())
                .t()
                .dot(&rho_i.slice(s![..rows, ..rows]))
                .dot(&u_rows)
                .mapv(|x| x.mul_real(weight));
            let combined = match rho_prev.get(ip) {
                Some(existing) => existing + &contrib,
                None => contrib,
            };
            rho_prev.insert(ip.clone(), combined);
        }
    }
    rho_prev
}

/// Backward pass for the reduced density matrices: walks from the last
/// stored shell down to the first, persisting each `rho<N>`.
pub fn calc_densitymatrix<S: Scalar>(
    mut rho: DensMatElements<S>,
    all_steps: &AllSteps,
    sym: &dyn Symmetry<S>,
    workdir: &Workdir,
    load_shell: impl Fn(usize) -> Result<DiagInfo<S>, NrgError>,
) -> Result<(), NrgError> {
    for n in all_steps.nall().rev() {
        if n == all_steps.nbegin {
            break;
        }
        let diag = prepare_shell(load_shell(n)?, all_steps, n)?;
        let rho_prev = reduce_one_shell(&rho, &diag, all_steps, n, sym);
        check_trace_rho(&rho_prev, sym, 1.0)?;
        crate::io::save_rho(workdir, n - 1, FN_RHO, &rho_prev)?;
        rho = rho_prev;
    }
    Ok(())
}

/// Loads a stored shell and re-splits its eigenvectors into ancestor
/// blocks.
fn prepare_shell<S: Scalar>(
    mut diag: DiagInfo<S>,
    all_steps: &AllSteps,
    n: usize,
) -> Result<DiagInfo<S>, NrgError> {
    for (i, eig) in diag.iter_mut() {
        let Some(ds) = all_steps.at(n).get(i) else {
            return Err(NrgError::CorruptInput(format!(
                "stored shell {n} holds unknown subspace {i}"
            )));
        };
        if ds.rmax.total() == eig.dim() {
            eig.split_in_blocks(ds.rmax.sizes());
        }
    }
    Ok(diag)
}

/// Partial partition sums over discarded states, in 400-bit precision, and
/// the derived shell weights `wn` (they must sum to one).
pub fn calc_zn_d<S: Scalar>(
    all_steps: &AllSteps,
    stats: &mut Stats<S>,
    sym: &dyn Symmetry<S>,
    t: f64,
) -> Result<(), NrgError> {
    for n in all_steps.nall() {
        let mut zn_dg = Float::with_val(MP_PREC, 0.0);
        let mut zn_dn = Float::with_val(MP_PREC, 0.0);
        for (i, ds) in all_steps.at(n) {
            let mult = sym.mult(i) as f64;
            for r in ds.all() {
                zn_dg += Float::with_val(MP_PREC, mult * (-ds.absenergy_g[r] / t).exp());
                zn_dn += Float::with_val(MP_PREC, mult * (-ds.absenergy_n[r] / t).exp());
            }
        }
        stats.zn_dn_d[n] = zn_dn.to_f64();
        stats.zn_dg[n] = zn_dg;
        stats.zn_dn[n] = zn_dn;
    }
    let combs = sym.nr_combs() as f64;
    let mut zzg = Float::with_val(MP_PREC, 0.0);
    for n in all_steps.nall() {
        let b = Float::with_val(MP_PREC, combs).pow((all_steps.nend - n - 1) as u32);
        zzg += Float::with_val(MP_PREC, &stats.zn_dg[n] * &b);
    }
    stats.zzg = zzg.to_f64();
    log::info!("ZZG={:.18e}", stats.zzg);
    for n in all_steps.nall() {
        let w = combs.powi((all_steps.nend - n - 1) as i32) / stats.zzg;
        stats.wnfactor[n] = w;
        stats.wn[n] = w * stats.zn_dg[n].to_f64();
    }
    let sumwn: f64 = stats.wn.iter().sum();
    log::info!("sumwn={sumwn:.18} sumwn-1={:.3e}", sumwn - 1.0);
    if !num_equal(sumwn, 1.0, 1e-12) {
        return Err(NrgError::ToleranceViolation(format!(
            "shell weights sum to {sumwn}, not 1"
        )));
    }
    Ok(())
}

/// FDM thermodynamics referenced to the absolute ground state; the heat
/// capacity runs through the extended-precision accumulators to survive the
/// `⟨E²⟩ - ⟨E⟩²` cancellation.
pub fn fdm_thermodynamics<S: Scalar>(
    all_steps: &AllSteps,
    stats: &mut Stats<S>,
    sym: &dyn Symmetry<S>,
    t: f64,
) {
    stats.z_fdm = stats.zzg * (-stats.gs_energy / t).exp();
    stats.f_fdm = -stats.zzg.ln() * t + stats.gs_energy;
    let mut e = Float::with_val(MP_PREC, 0.0);
    let mut e2 = Float::with_val(MP_PREC, 0.0);
    for n in all_steps.nall() {
        if stats.wn[n] <= 1e-16 {
            continue;
        }
        for (i, ds) in all_steps.at(n) {
            let mult = sym.mult(i) as f64;
            for r in ds.all() {
                let mut weight = Float::with_val(
                    MP_PREC,
                    stats.wn[n] * mult * (-ds.absenergy_n[r] / t).exp(),
                );
                weight /= &stats.zn_dn[n];
                let en = Float::with_val(MP_PREC, ds.absenergy[r]);
                let en2 = Float::with_val(MP_PREC, &en * &en);
                e += Float::with_val(MP_PREC, &en * &weight);
                e2 += Float::with_val(MP_PREC, &en2 * &weight);
            }
        }
    }
    stats.e_fdm = e.to_f64();
    let sqr_e = Float::with_val(MP_PREC, &e * &e);
    let var_e = Float::with_val(MP_PREC, &e2 - &sqr_e);
    stats.c_fdm = var_e.to_f64() / (t * t);
    stats.s_fdm = (stats.e_fdm - stats.f_fdm) / t;
    stats.td_fdm.set("T", t);
    stats.td_fdm.set("Z_fdm", stats.z_fdm);
    stats.td_fdm.set("F_fdm", stats.f_fdm);
    stats.td_fdm.set("E_fdm", stats.e_fdm);
    stats.td_fdm.set("C_fdm", stats.c_fdm);
    stats.td_fdm.set("S_fdm", stats.s_fdm);
    log::info!(
        "Z_fdm={:.10e} F_fdm={:.10e} E_fdm={:.10e} C_fdm={:.10e} S_fdm={:.10e}",
        stats.z_fdm,
        stats.f_fdm,
        stats.e_fdm,
        stats.c_fdm,
        stats.s_fdm
    );
}

/// Full density matrix of the last shell: the discarded tower weighted by
/// `wn`.
pub fn init_rho_fdm<S: Scalar>(
    lastndx: usize,
    all_steps: &AllSteps,
    stats: &Stats<S>,
    sym: &dyn Symmetry<S>,
    t: f64,
) -> Result<DensMatElements<S>, NrgError> {
    let wn = stats.wn[lastndx];
    let zn_dg = stats.zn_dg[lastndx].to_f64();
    let mut rho_fdm = DensMatElements::new();
    for (i, ds) in all_steps.at(lastndx) {
        let dim = ds.max();
        let mut m = Array2::zeros((dim, dim));
        for r in ds.all() {
            m[(r, r)] = S::from_real(wn * (-ds.absenergy_g[r] / t).exp() / zn_dg);
        }
        rho_fdm.insert(i.clone(), m);
    }
    let expected = wn;
    let tr = rho_fdm.trace(|i| sym.mult(i));
    if !num_equal(tr, expected, 1e-8) {
        return Err(NrgError::ToleranceViolation(format!(
            "FDM trace {tr} differs from the last shell weight {expected}"
        )));
    }
    Ok(rho_fdm)
}

/// Backward pass for the full density matrix: reduce the accumulated
/// matrix, then add the current shell's discarded tower.
pub fn calc_fulldensitymatrix<S: Scalar>(
    mut rho_fdm: DensMatElements<S>,
    all_steps: &AllSteps,
    stats: &Stats<S>,
    sym: &dyn Symmetry<S>,
    p: &Params,
    workdir: &Workdir,
    load_shell: impl Fn(usize) -> Result<DiagInfo<S>, NrgError>,
) -> Result<(), NrgError> {
    let t = p.t;
    for n in all_steps.nall().rev() {
        if n == all_steps.nbegin {
            break;
        }
        let diag = prepare_shell(load_shell(n)?, all_steps, n)?;
        let mut rho_prev = reduce_one_shell(&rho_fdm, &diag, all_steps, n, sym);
        // The discarded tower of the previous shell enters diagonally.
        let prev = n - 1;
        let wn = stats.wn[prev];
        if wn > 1e-16 {
            let zn_dg = stats.zn_dg[prev].to_f64();
            for (i, ds) in all_steps.at(prev) {
                let dim = ds.max();
                let mut m = match rho_prev.get(i) {
                    Some(existing) => {
                        let mut grown: crate::scalar::Matrix<S> = Array2::zeros((dim, dim));
                        let sz = existing.nrows().min(dim);
                        grown
                            .slice_mut(s![..sz, ..sz])
                            .assign(&existing.slice(s![..sz, ..sz]));
                        grown
                    }
                    None => Array2::zeros((dim, dim)),
                };
                for r in ds.all() {
                    m[(r, r)] += S::from_real(wn * (-ds.absenergy_g[r] / t).exp() / zn_dg);
                }
                rho_prev.insert(i.clone(), m);
            }
        }
        let expected: f64 = (prev..all_steps.nend).map(|k| stats.wn[k]).sum();
        let tr = rho_prev.trace(|i| sym.mult(i));
        if !num_equal(tr, expected, 1e-8) {
            return Err(NrgError::ToleranceViolation(format!(
                "FDM trace {tr} at shell {prev} differs from {expected}"
            )));
        }
        crate::io::save_rho(workdir, prev, FN_RHOFDM, &rho_prev)?;
        rho_fdm = rho_prev;
    }
    Ok(())
}
