//! U(1) charge × U(1) spin-projection symmetry.
//!
//! Labels are `(Q, SSZ)` with `SSZ = 2Sz`. All composition is additive, the
//! subspace multiplicity is one, and the two spin species are independent,
//! which makes the symmetry suitable for runs with a magnetic field and for
//! spin-polarized chain coefficients. The hopping operators come in two
//! flavors per channel, one per spin direction.

use crate::coef::Coef;
use crate::eigen::DiagInfo;
use crate::invar::{Invar, InvarStructure, QuantumKind};
use crate::operators::Opch;
use crate::scalar::{Matrix, Scalar};
use crate::stats::Stats;
use crate::step::Step;
use crate::subspaces::SubspaceDimensions;
use crate::symmetry::{
    calculate_z, diag_function, f_annihilate, f_create, offdiag_function, psgn, Recalc, RecalcF,
    RecalcFTarget, RecalcTarget, SiteState, Symmetry,
};

#[cfg(test)]
#[path = "qsz_tests.rs"]
mod qsz_tests;

/// Site state added by each ancestor combination, in storage order.
const COMB_SITE: [SiteState; 4] = [
    SiteState::Empty,
    SiteState::Up,
    SiteState::Down,
    SiteState::Doubly,
];

pub struct SymmetryQSZ {
    structure: InvarStructure,
}

impl SymmetryQSZ {
    pub fn new() -> Self {
        Self {
            structure: InvarStructure::new(&[
                ("Q", QuantumKind::Additive),
                ("SSZ", QuantumKind::Additive),
            ]),
        }
    }

    fn q(i: &Invar) -> i32 {
        i.qn(0)
    }

    fn ssz(i: &Invar) -> i32 {
        i.qn(1)
    }

    fn triangle(i1: &Invar, i2: &Invar, iop: &Invar) -> bool {
        Self::q(i1) == Self::q(i2) + Self::q(iop)
            && Self::ssz(i1) == Self::ssz(i2) + Self::ssz(iop)
    }

    fn ancestor_list(i: &Invar) -> Vec<Invar> {
        let (q, sz) = (Self::q(i), Self::ssz(i));
        vec![
            Invar::new(vec![q + 1, sz]),
            Invar::new(vec![q, sz - 1]),
            Invar::new(vec![q, sz + 1]),
            Invar::new(vec![q - 1, sz]),
        ]
    }

    /// Doubled spin carried by the hopping flavor: `+1` for spin up, `-1`
    /// for spin down.
    fn flavor_dsigma(flavor: usize) -> i32 {
        match flavor {
            0 => 1,
            1 => -1,
            _ => unreachable!("hopping flavor {flavor} out of range"),
        }
    }
}

impl Default for SymmetryQSZ {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Scalar> Symmetry<S> for SymmetryQSZ {
    fn name(&self) -> &'static str {
        "QSZ"
    }

    fn structure(&self) -> &InvarStructure {
        &self.structure
    }

    fn nr_combs(&self) -> usize {
        4
    }

    fn mult(&self, _i: &Invar) -> usize {
        1
    }

    fn invar_allowed(&self, _i: &Invar) -> bool {
        true
    }

    fn triangle_allowed(&self, i1: &Invar, i2: &Invar, iop: &Invar) -> bool {
        Self::triangle(i1, i2, iop)
    }

    fn ancestors(&self, i: &Invar) -> Vec<Invar> {
        Self::ancestor_list(i)
    }

    fn new_subspaces(&self, i: &Invar) -> Vec<Invar> {
        let (q, sz) = (Self::q(i), Self::ssz(i));
        vec![
            Invar::new(vec![q - 1, sz]),
            Invar::new(vec![q, sz + 1]),
            Invar::new(vec![q, sz - 1]),
            Invar::new(vec![q + 1, sz]),
        ]
    }

    fn qn_subspace(&self, comb: usize) -> Invar {
        let st = COMB_SITE[comb];
        Invar::new(vec![st.occupation() - 1, st.dsz()])
    }

    fn singlet_op(&self) -> Invar {
        Invar::new(vec![0, 0])
    }

    fn is_field(&self) -> bool {
        true
    }

    fn check_spin(&self, i1: &Invar, ip: &Invar, spin: i32) -> bool {
        match spin {
            1 => Self::ssz(i1) == Self::ssz(ip) + 1,
            -1 => Self::ssz(i1) == Self::ssz(ip) - 1,
            _ => true,
        }
    }

    fn specdens_factor(&self, _ip: &Invar, _i1: &Invar) -> f64 {
        1.0
    }

    fn make_matrix(
        &self,
        h: &mut Matrix<S>,
        step: &Step,
        rm: &SubspaceDimensions,
        _i: &Invar,
        anc: &[Invar],
        opch: &Opch<S>,
        coef: &Coef<S>,
    ) {
        let channels = opch.nr_channels();
        let (site, active): (usize, Vec<usize>) = if step.substeps() {
            let (ntrue, m) = step.nm();
            (ntrue, vec![m])
        } else {
            (step.current_site(), (0..channels).collect())
        };
        for &ch in &active {
            // (block pair, flavor) of each hopping contribution.
            for (ci, cj, flavor) in [(0, 1, 0), (2, 3, 0), (0, 2, 1), (1, 3, 1)] {
                let dsigma = Self::flavor_dsigma(flavor);
                let Some((sti, amp)) = f_annihilate(dsigma, COMB_SITE[cj]) else {
                    unreachable!("inadmissible hopping pair ({ci}, {cj})");
                };
                debug_assert_eq!(sti, COMB_SITE[ci]);
                let xi = if dsigma == 1 {
                    coef.xi_up(site, ch)
                } else {
                    coef.xi_down(site, ch)
                };
                let factor = amp * psgn(Self::q(&anc[cj]));
                offdiag_function(h, rm, anc, opch, ci, cj, ch, flavor, xi.mul_real(factor));
            }
            let (zeta_up, zeta_down) = (coef.zeta_up(site + 1, ch), coef.zeta_down(site + 1, ch));
            diag_function(h, rm, 1, 1.0, zeta_up);
            diag_function(h, rm, 2, 1.0, zeta_down);
            diag_function(h, rm, 3, 1.0, zeta_up);
            diag_function(h, rm, 3, 1.0, zeta_down);
        }
    }

    fn recalc_doublet_targets(&self, i1: &Invar) -> Vec<RecalcTarget> {
        let (q, sz) = (Self::q(i1), Self::ssz(i1));
        // One target per spin species of the doublet operator.
        let mut targets = Vec::new();
        for dsigma in [1, -1] {
            let ip = Invar::new(vec![q - 1, sz - dsigma]);
            let iop = Invar::new(vec![1, dsigma]);
            let anc1 = Self::ancestor_list(i1);
            let ancp = Self::ancestor_list(&ip);
            let mut table = Vec::new();
            for (c, (a1, ap)) in anc1.iter().zip(ancp.iter()).enumerate() {
                // The site state is a spectator: the same combination index
                // on both sides, the operator connecting the ancestors.
                if !Self::triangle(a1, ap, &iop) {
                    continue;
                }
                table.push(Recalc {
                    i1: c,
                    ip: c,
                    in1: a1.clone(),
                    inp: ap.clone(),
                    factor: 1.0,
                });
            }
            if !table.is_empty() {
                targets.push(RecalcTarget { ip, iop, table });
            }
        }
        targets
    }

    fn recalc_triplet_targets(&self, i1: &Invar) -> Vec<RecalcTarget> {
        let (q, sz) = (Self::q(i1), Self::ssz(i1));
        // Sz is conserved: only the Sz-diagonal component survives.
        let ip = Invar::new(vec![q, sz]);
        let iop = Invar::new(vec![0, 0]);
        let anc1 = Self::ancestor_list(i1);
        let table = anc1
            .iter()
            .enumerate()
            .map(|(c, a1)| Recalc {
                i1: c,
                ip: c,
                in1: a1.clone(),
                inp: a1.clone(),
                factor: 1.0,
            })
            .collect();
        vec![RecalcTarget { ip, iop, table }]
    }

    fn recalc_f_targets(&self, ip: &Invar, _ch: usize, flavor: usize) -> Vec<RecalcFTarget> {
        let dsigma = Self::flavor_dsigma(flavor);
        let (qp, szp) = (Self::q(ip), Self::ssz(ip));
        let i1 = Invar::new(vec![qp + 1, szp + dsigma]);
        let anc1 = Self::ancestor_list(&i1);
        let ancp = Self::ancestor_list(ip);
        let mut table = Vec::new();
        for (c1, a1) in anc1.iter().enumerate() {
            for (cp, ap) in ancp.iter().enumerate() {
                if a1 != ap {
                    continue;
                }
                let Some((st1, amp)) = f_create(dsigma, COMB_SITE[cp]) else {
                    continue;
                };
                if st1 != COMB_SITE[c1] {
                    continue;
                }
                table.push(RecalcF {
                    i1: c1,
                    ip: cp,
                    factor: amp * psgn(Self::q(a1)),
                });
            }
        }
        if table.is_empty() {
            Vec::new()
        } else {
            vec![RecalcFTarget { i1, table }]
        }
    }

    fn calculate_td(&self, diag: &DiagInfo<S>, stats: &mut Stats<S>, factor: f64) {
        let (mut tr_sz, mut tr_sz2, mut tr_q, mut tr_q2) = (0.0, 0.0, 0.0, 0.0);
        for (i, eig) in diag.iter() {
            let q = f64::from(Self::q(i));
            let sz = f64::from(Self::ssz(i)) / 2.0;
            let sum_z = calculate_z(eig, factor);
            tr_sz += sum_z * sz;
            tr_sz2 += sum_z * sz * sz;
            tr_q += sum_z * q;
            tr_q2 += sum_z * q * q;
        }
        stats.td.set("<Sz>", tr_sz / stats.z);
        stats.td.set("<Sz^2>", tr_sz2 / stats.z);
        stats.td.set("<Q>", tr_q / stats.z);
        stats.td.set("<Q^2>", tr_q2 / stats.z);
    }

    fn td_fields(&self) -> Vec<&'static str> {
        vec!["<Sz>", "<Sz^2>", "<Q>", "<Q^2>"]
    }
}
