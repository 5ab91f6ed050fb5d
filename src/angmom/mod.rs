//! Angular-momentum algebra used to derive the symmetry coupling tables.
//!
//! All angular momenta are passed around as *doubled* integers (`dj = 2j`,
//! `dm = 2m`) so that half-integer spins stay exact, matching the
//! `wigner_symbols` convention. The couplings that enter the Hamiltonian
//! construction and the operator recalculations never exceed rank 1, but
//! the evaluation below is general.

use wigner_symbols::ClebschGordan;

/// Clebsch–Gordan coefficient `⟨j1 m1; j2 m2 | j m⟩` in the Condon–Shortley
/// phase convention.
///
/// Arguments are doubled angular momenta. Returns zero whenever the
/// triangle condition, the projection selection rule, or the
/// integer/half-integer pairing fails.
pub fn clebsch_gordan(dj1: i32, dm1: i32, dj2: i32, dm2: i32, dj: i32, dm: i32) -> f64 {
    if dm1 + dm2 != dm {
        return 0.0;
    }
    if !su2_triangle(dj1, dj2, dj) {
        return 0.0;
    }
    if dm1.abs() > dj1 || dm2.abs() > dj2 || dm.abs() > dj {
        return 0.0;
    }
    if (dj1 + dm1) % 2 != 0 || (dj2 + dm2) % 2 != 0 || (dj + dm) % 2 != 0 {
        return 0.0;
    }
    f64::from(
        ClebschGordan {
            tj1: dj1,
            tm1: dm1,
            tj2: dj2,
            tm2: dm2,
            tj12: dj,
            tm12: dm,
        }
        .value(),
    )
}

/// SU(2) triangle condition on doubled angular momenta.
pub fn su2_triangle(dj1: i32, dj2: i32, dj3: i32) -> bool {
    dj3 >= (dj1 - dj2).abs() && dj3 <= dj1 + dj2 && (dj1 + dj2 + dj3) % 2 == 0
}

#[cfg(test)]
#[path = "angmom_tests.rs"]
mod angmom_tests;
