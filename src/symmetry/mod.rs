//! Symmetry capability objects.
//!
//! Every symmetry supplies: the invariant-label structure, subspace
//! multiplicities, the triangle predicate, the ancestor-subspace lists, the
//! symmetry-specific Hamiltonian couplings, and the operator-recalculation
//! tables. The capability is passed explicitly to every consumer; nothing is
//! global.
//!
//! The coupling and recalculation coefficients are derived at run time from
//! Clebsch–Gordan algebra over the added-site basis states. The convention
//! is fixed once: product states are written `|ancestor⟩ ⊗ |site⟩` with the
//! site operators rightmost, so operators acting on the ancestor part cross
//! no site fermions, while site operators pick up the ancestor fermion
//! parity. The parity common to all subspaces of a step is a gauge and is
//! dropped; the subspace-dependent part `(-1)^Q` is kept.

use std::sync::Arc;

use crate::angmom::clebsch_gordan;
use crate::coef::Coef;
use crate::eigen::DiagInfo;
use crate::error::NrgError;
use crate::invar::{Invar, InvarStructure};
use crate::operators::Opch;
use crate::scalar::{Matrix, Scalar};
use crate::stats::Stats;
use crate::step::Step;
use crate::subspaces::SubspaceDimensions;

pub mod qs;
pub mod qsz;

#[cfg(test)]
#[path = "factors_tests.rs"]
mod factors_tests;

/// One entry of a recalculation table: the combination pair `(i1, ip)`, the
/// ancestor subspaces whose old matrix element is consumed, and the scalar
/// recoupling factor.
#[derive(Clone, Debug)]
pub struct Recalc {
    pub i1: usize,
    pub ip: usize,
    pub in1: Invar,
    pub inp: Invar,
    pub factor: f64,
}

/// All table entries producing one target block `(I1, Ip)` of a recalculated
/// operator, together with the operator's own quantum numbers.
#[derive(Clone, Debug)]
pub struct RecalcTarget {
    pub ip: Invar,
    pub iop: Invar,
    pub table: Vec<Recalc>,
}

/// One entry of an irreducible-f recalculation table: the combination pair
/// sharing an ancestor, and the site-transition factor.
#[derive(Clone, Debug)]
pub struct RecalcF {
    pub i1: usize,
    pub ip: usize,
    pub factor: f64,
}

/// Table producing one block `⟨I1‖f†‖Ip⟩` of the new hopping operator.
#[derive(Clone, Debug)]
pub struct RecalcFTarget {
    pub i1: Invar,
    pub table: Vec<RecalcF>,
}

/// Capability object of one symmetry.
pub trait Symmetry<S: Scalar>: Send + Sync {
    fn name(&self) -> &'static str;
    fn structure(&self) -> &InvarStructure;

    /// Number of ancestor combinations per subspace.
    fn nr_combs(&self) -> usize;

    /// Degeneracy of the subspace beyond the states stored in it.
    fn mult(&self, i: &Invar) -> usize;

    /// Whether the label denotes a physically admissible subspace.
    fn invar_allowed(&self, i: &Invar) -> bool;

    /// Selection rule `⟨I1| O(Iop) |I2⟩ ≠ 0`.
    fn triangle_allowed(&self, i1: &Invar, i2: &Invar, iop: &Invar) -> bool;

    /// Pre-image subspaces of `i`, one per combination.
    fn ancestors(&self, i: &Invar) -> Vec<Invar>;

    /// Subspaces reachable from `i` by adding one site.
    fn new_subspaces(&self, i: &Invar) -> Vec<Invar>;

    /// Quantum numbers of the site state of combination `comb`.
    fn qn_subspace(&self, comb: usize) -> Invar;

    /// Quantum numbers of a singlet operator.
    fn singlet_op(&self) -> Invar;

    /// Whether spin-up and spin-down excitations are distinguishable.
    fn is_field(&self) -> bool {
        false
    }

    /// Spin selection applied to doublet spectral functions.
    fn check_spin(&self, _i1: &Invar, _ip: &Invar, _spin: i32) -> bool {
        true
    }

    /// Weight of a doublet block in the spectral sum.
    fn specdens_factor(&self, ip: &Invar, i1: &Invar) -> f64;

    fn specdensquad_factor(&self, _ip: &Invar, _i1: &Invar) -> f64 {
        1.0
    }

    fn dynamic_susceptibility_factor(&self, _ip: &Invar, _i1: &Invar) -> f64 {
        1.0
    }

    fn correlator_factor(&self, _ip: &Invar, i1: &Invar) -> f64 {
        self.mult(i1) as f64
    }

    /// Fills the hopping couplings and on-site terms of the block
    /// Hamiltonian of subspace `i`. The rescaled diagonal of the previous
    /// spectra is already in place when this is called.
    fn make_matrix(
        &self,
        h: &mut Matrix<S>,
        step: &Step,
        rm: &SubspaceDimensions,
        i: &Invar,
        anc: &[Invar],
        opch: &Opch<S>,
        coef: &Coef<S>,
    );

    /// Recalculation tables of the doublet operators rooted at `i1`.
    fn recalc_doublet_targets(&self, i1: &Invar) -> Vec<RecalcTarget>;

    fn recalc_triplet_targets(&self, _i1: &Invar) -> Vec<RecalcTarget> {
        Vec::new()
    }

    fn recalc_quadruplet_targets(&self, _i1: &Invar) -> Vec<RecalcTarget> {
        Vec::new()
    }

    fn recalc_orb_triplet_targets(&self, _i1: &Invar) -> Vec<RecalcTarget> {
        Vec::new()
    }

    /// Tables producing the new irreducible elements of `f_{ch,flavor}`
    /// rooted at the ket subspace `ip`.
    fn recalc_f_targets(&self, ip: &Invar, ch: usize, flavor: usize) -> Vec<RecalcFTarget>;

    /// Symmetry-specific thermodynamic averages of the current step.
    fn calculate_td(&self, diag: &DiagInfo<S>, stats: &mut Stats<S>, factor: f64);

    /// Column names contributed to the thermodynamic table.
    fn td_fields(&self) -> Vec<&'static str>;
}

/// Instantiates the symmetry requested by the input data.
pub fn make_symmetry<S: Scalar>(
    name: &str,
    channels: usize,
    substeps: bool,
) -> Result<Arc<dyn Symmetry<S>>, NrgError> {
    if channels != 1 && !substeps {
        return Err(NrgError::CorruptInput(format!(
            "{channels}-channel runs are only supported in substep mode"
        )));
    }
    match name {
        "QS" => Ok(Arc::new(qs::SymmetryQS::new())),
        "QSZ" => Ok(Arc::new(qsz::SymmetryQSZ::new())),
        _ => Err(NrgError::UnsupportedSymmetry(name.to_string())),
    }
}

/// `(-1)^n`.
pub fn psgn(n: i32) -> f64 {
    if n.rem_euclid(2) == 0 {
        1.0
    } else {
        -1.0
    }
}

/// `Σ_i exp(-factor·E_i)` over the stored states of one subspace.
pub fn calculate_z<S: Scalar>(eig: &crate::eigen::Eigen<S>, factor: f64) -> f64 {
    eig.value_zero.iter().map(|&e| (-factor * e).exp()).sum()
}

// ---------------------------------------------------------------------------
// Added-site basis states and their fermion matrix elements.
// ---------------------------------------------------------------------------

/// Basis states of one added lattice site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SiteState {
    Empty,
    Up,
    Down,
    Doubly,
}

impl SiteState {
    /// Doubled spin projection.
    pub fn dsz(self) -> i32 {
        match self {
            SiteState::Up => 1,
            SiteState::Down => -1,
            _ => 0,
        }
    }

    pub fn occupation(self) -> i32 {
        match self {
            SiteState::Empty => 0,
            SiteState::Up | SiteState::Down => 1,
            SiteState::Doubly => 2,
        }
    }
}

/// Site occupation classes labelling the ancestor combinations of the
/// SU(2)-spin symmetries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SiteOcc {
    Empty,
    Single,
    Double,
}

impl SiteOcc {
    /// Doubled spin of the site multiplet.
    pub fn dspin(self) -> i32 {
        match self {
            SiteOcc::Single => 1,
            _ => 0,
        }
    }

    pub fn occupation(self) -> i32 {
        match self {
            SiteOcc::Empty => 0,
            SiteOcc::Single => 1,
            SiteOcc::Double => 2,
        }
    }

    pub fn components(self) -> &'static [SiteState] {
        match self {
            SiteOcc::Empty => &[SiteState::Empty],
            SiteOcc::Single => &[SiteState::Up, SiteState::Down],
            SiteOcc::Double => &[SiteState::Doubly],
        }
    }
}

/// `⟨to| f_σ |from⟩` with `|↑↓⟩ ≡ f†_↑ f†_↓ |0⟩`; `dsigma = ±1`.
pub fn f_annihilate(dsigma: i32, from: SiteState) -> Option<(SiteState, f64)> {
    match (dsigma, from) {
        (1, SiteState::Up) => Some((SiteState::Empty, 1.0)),
        (1, SiteState::Doubly) => Some((SiteState::Down, 1.0)),
        (-1, SiteState::Down) => Some((SiteState::Empty, 1.0)),
        (-1, SiteState::Doubly) => Some((SiteState::Up, -1.0)),
        _ => None,
    }
}

/// `⟨to| f†_σ |from⟩`.
pub fn f_create(dsigma: i32, from: SiteState) -> Option<(SiteState, f64)> {
    match (dsigma, from) {
        (1, SiteState::Empty) => Some((SiteState::Up, 1.0)),
        (1, SiteState::Down) => Some((SiteState::Doubly, 1.0)),
        (-1, SiteState::Empty) => Some((SiteState::Down, 1.0)),
        (-1, SiteState::Up) => Some((SiteState::Doubly, -1.0)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// SU(2) recoupling factors.
// ---------------------------------------------------------------------------

/// Hopping recoupling between combination blocks `i` and `j` of a subspace
/// with doubled total spin `dj`; block `j` carries one site electron more
/// than block `i`.
///
/// The returned factor multiplies the ancestor reduced matrix element
/// `⟨anc_i‖c†‖anc_j⟩`; the fermionic crossing sign is applied by the caller.
pub fn hopping_factor(
    dj: i32,
    dja_i: i32,
    occ_i: SiteOcc,
    dja_j: i32,
    occ_j: SiteOcc,
) -> f64 {
    debug_assert_eq!(occ_j.occupation(), occ_i.occupation() + 1);
    let m = dj;
    let mut sum = 0.0;
    for &stj in occ_j.components() {
        let dmsj = stj.dsz();
        let amp_j = clebsch_gordan(dja_j, m - dmsj, occ_j.dspin(), dmsj, dj, m);
        if amp_j == 0.0 {
            continue;
        }
        for dsigma in [1, -1] {
            let Some((sti, f_amp)) = f_annihilate(dsigma, stj) else {
                continue;
            };
            if !occ_i.components().contains(&sti) {
                continue;
            }
            let dmsi = sti.dsz();
            let amp_i = clebsch_gordan(dja_i, m - dmsi, occ_i.dspin(), dmsi, dj, m);
            let we = clebsch_gordan(dja_j, m - dmsj, 1, dsigma, dja_i, m - dmsi);
            sum += amp_i * amp_j * f_amp * we;
        }
    }
    sum
}

/// Recoupling of a rank-`djop/2` tensor operator acting on the ancestor
/// part, with the site state of occupation class `occ` as a spectator.
///
/// Relates the new reduced matrix element `⟨S1‖T‖Sp⟩` of the combination
/// pair to the old one `⟨Sa1‖T‖Sap⟩`.
pub fn recoupling_factor(
    dj1: i32,
    djp: i32,
    dja1: i32,
    djap: i32,
    occ: SiteOcc,
    djop: i32,
) -> f64 {
    let dsite = occ.dspin();
    let dm1 = dj1;
    let mut dmu = djop;
    while dmu >= -djop {
        let dmp = dm1 - dmu;
        if dmp.abs() <= djp {
            let denom = clebsch_gordan(djp, dmp, djop, dmu, dj1, dm1);
            if denom.abs() > 1e-12 {
                let mut sum = 0.0;
                for &st in occ.components() {
                    let dms = st.dsz();
                    sum += clebsch_gordan(dja1, dm1 - dms, dsite, dms, dj1, dm1)
                        * clebsch_gordan(djap, dmp - dms, dsite, dms, djp, dmp)
                        * clebsch_gordan(djap, dmp - dms, djop, dmu, dja1, dm1 - dms);
                }
                return sum / denom;
            }
        }
        dmu -= 2;
    }
    0.0
}

/// Factor of the site creation operator between two new subspaces built on
/// the *same* ancestor of doubled spin `dja`.
///
/// This is the recoupling entering the irreducible-f recalculation; the
/// fermionic crossing sign is applied by the caller.
pub fn site_creation_factor(
    dj1: i32,
    djp: i32,
    dja: i32,
    occ1: SiteOcc,
    occp: SiteOcc,
) -> f64 {
    debug_assert_eq!(occ1.occupation(), occp.occupation() + 1);
    let dm1 = dj1;
    for dmu in [1, -1] {
        let dmp = dm1 - dmu;
        if dmp.abs() > djp {
            continue;
        }
        let denom = clebsch_gordan(djp, dmp, 1, dmu, dj1, dm1);
        if denom.abs() <= 1e-12 {
            continue;
        }
        let mut sum = 0.0;
        for &stp in occp.components() {
            let dmsp = stp.dsz();
            let Some((st1, amp)) = f_create(dmu, stp) else {
                continue;
            };
            if !occ1.components().contains(&st1) {
                continue;
            }
            let dms1 = st1.dsz();
            sum += clebsch_gordan(dja, dmp - dmsp, occp.dspin(), dmsp, djp, dmp)
                * amp
                * clebsch_gordan(dja, dmp - dmsp, occ1.dspin(), dms1, dj1, dm1);
        }
        return sum / denom;
    }
    0.0
}

// ---------------------------------------------------------------------------
// Block-filling helpers shared by the make_matrix implementations.
// ---------------------------------------------------------------------------

/// Adds `factor · ⟨anc_i‖f†‖anc_j⟩` into block `(i, j)` of the Hamiltonian
/// and its Hermitian conjugate into block `(j, i)`.
pub fn offdiag_function<S: Scalar>(
    h: &mut Matrix<S>,
    rm: &SubspaceDimensions,
    anc: &[Invar],
    opch: &Opch<S>,
    i: usize,
    j: usize,
    ch: usize,
    fnr: usize,
    factor: S,
) {
    if !(rm.exists(i) && rm.exists(j)) {
        return;
    }
    let key = (anc[i].clone(), anc[j].clone());
    let Some(f) = opch.get(ch, fnr).get(&key) else {
        log::debug!("no f block ⟨{}|f†|{}⟩, contributes nothing", anc[i], anc[j]);
        return;
    };
    debug_assert_eq!(f.nrows(), rm.rmax(i));
    debug_assert_eq!(f.ncols(), rm.rmax(j));
    let (oi, oj) = (rm.offset(i), rm.offset(j));
    for r1 in 0..f.nrows() {
        for r2 in 0..f.ncols() {
            let v = factor * f[(r1, r2)];
            h[(oi + r1, oj + r2)] += v;
            h[(oj + r2, oi + r1)] += v.conj();
        }
    }
}

/// Adds `number · coefficient` along the diagonal of block `i`.
pub fn diag_function<S: Scalar>(
    h: &mut Matrix<S>,
    rm: &SubspaceDimensions,
    i: usize,
    number: f64,
    coefficient: S,
) {
    let offset = rm.offset(i);
    for r in 0..rm.rmax(i) {
        h[(offset + r, offset + r)] += coefficient.mul_real(number);
    }
}
