//! State selection after each diagonalization.
//!
//! The truncation is *prepared* here (per-subspace kept counts recorded);
//! the physical truncation happens only after the step's snapshot has been
//! stored for the density-matrix algorithms.

use crate::eigen::DiagInfo;
use crate::error::NrgError;
use crate::params::Params;
use crate::scalar::{num_equal, Scalar};
use crate::step::Step;
use crate::symmetry::Symmetry;

#[cfg(test)]
#[path = "truncation_tests.rs"]
mod truncation_tests;

/// Highest energy still retained, determined from the pooled spectrum.
///
/// With `keepenergy` active the cut sits just above the configured energy
/// (one extra state is admitted), clamped to `[keepmin, keep]`. The
/// safeguard then pushes the cut out of any near-degenerate cluster, up to
/// `safeguardmax` extra states.
pub fn highest_retained_energy<S: Scalar>(
    step: &Step,
    diag: &DiagInfo<S>,
    p: &Params,
) -> Result<f64, NrgError> {
    let energies = diag.sorted_energies();
    let total = energies.len();
    debug_assert!(total > 0);
    if energies[0].abs() > 1e-14 {
        return Err(NrgError::ToleranceViolation(format!(
            "ground state not at zero after subtraction: {}",
            energies[0]
        )));
    }
    let mut nrkeep = if p.keepenergy <= 0.0 {
        p.keep
    } else {
        let keepenergy = p.keepenergy * step.unscale();
        let below = energies.iter().filter(|&&e| e <= keepenergy).count();
        (1 + below).clamp(p.keepmin, p.keep)
    };
    if p.safeguard > 0.0 {
        let mut extra = 0;
        while nrkeep < total
            && energies[nrkeep] - energies[nrkeep - 1] <= p.safeguard
            && extra < p.safeguardmax
        {
            nrkeep += 1;
            extra += 1;
        }
        if extra > 0 {
            log::debug!("safeguard: keeping {extra} additional states");
        }
    }
    nrkeep = nrkeep.clamp(1, total);
    Ok(energies[nrkeep - 1])
}

/// Marks the kept states of every subspace and checks that the computed
/// spectra actually reach the truncation cut.
///
/// Returns `InsufficientStates` when some subspace was cut short by a
/// partial diagonalization (`diagratio < 1`): its topmost computed state
/// lies below `Emax` even though the subspace is larger. The caller retries
/// the step with a larger `diagratio`.
pub fn truncate_prepare<S: Scalar>(
    step: &Step,
    diag: &mut DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    p: &Params,
) -> Result<(), NrgError> {
    let emax = highest_retained_energy(step, diag, p)?;
    let keep_all = step.last() && p.keep_all_states_in_last_step();
    for (_, eig) in diag.iter_mut() {
        let kept = if keep_all {
            eig.nr_computed()
        } else {
            eig.value_zero.iter().filter(|&&e| e <= emax).count()
        };
        eig.truncate_prepare(kept);
    }
    let mut nrall = 0usize;
    let mut nrkept = 0usize;
    let mut nrkeptmult = 0usize;
    for (i, eig) in diag.iter() {
        nrall += eig.dim();
        nrkept += eig.nr_kept();
        nrkeptmult += sym.mult(i) * eig.nr_kept();
    }
    log::info!(
        "Emax={:.8} kept: {} ({} with multiplicity) out of {}, ratio={:.3}",
        emax / step.unscale(),
        nrkept,
        nrkeptmult,
        nrall,
        nrkept as f64 / nrall as f64
    );
    let insufficient = diag.iter().any(|(_, eig)| {
        let nr = eig.nr_computed();
        eig.nr_kept() == nr
            && !num_equal(eig.value_zero[nr - 1], emax, 1e-12)
            && nr < eig.dim()
    });
    if insufficient && !keep_all {
        return Err(NrgError::InsufficientStates);
    }
    Ok(())
}
