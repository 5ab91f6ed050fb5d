//! U(1) charge × SU(2) spin symmetry.
//!
//! Labels are `(Q, SS)` with `Q` the charge relative to half filling and
//! `SS = 2S+1` the spin multiplicity. The four ancestor combinations add a
//! site in the states `|0⟩`, `|σ⟩` (coupled to ancestor spin `S ± 1/2`) and
//! `|↑↓⟩`.

use crate::angmom::su2_triangle;
use crate::coef::Coef;
use crate::eigen::DiagInfo;
use crate::invar::{Invar, InvarStructure, QuantumKind};
use crate::operators::Opch;
use crate::scalar::{Matrix, Scalar};
use crate::stats::Stats;
use crate::step::Step;
use crate::subspaces::SubspaceDimensions;
use crate::symmetry::{
    calculate_z, diag_function, hopping_factor, offdiag_function, psgn, recoupling_factor,
    site_creation_factor, Recalc, RecalcF, RecalcFTarget, RecalcTarget, SiteOcc, Symmetry,
};

#[cfg(test)]
#[path = "qs_tests.rs"]
mod qs_tests;

/// Site occupation class of each ancestor combination, in storage order.
const COMB_OCC: [SiteOcc; 4] = [
    SiteOcc::Empty,
    SiteOcc::Single,
    SiteOcc::Single,
    SiteOcc::Double,
];

pub struct SymmetryQS {
    structure: InvarStructure,
}

impl SymmetryQS {
    pub fn new() -> Self {
        Self {
            structure: InvarStructure::new(&[
                ("Q", QuantumKind::Additive),
                ("SS", QuantumKind::Additive),
            ]),
        }
    }

    fn q(i: &Invar) -> i32 {
        i.qn(0)
    }

    fn ss(i: &Invar) -> i32 {
        i.qn(1)
    }

    /// Spin quantum number `S` from the multiplicity label.
    fn spin(ss: i32) -> f64 {
        f64::from(ss - 1) / 2.0
    }

    fn allowed(i: &Invar) -> bool {
        Self::ss(i) > 0
    }

    fn triangle(i1: &Invar, i2: &Invar, iop: &Invar) -> bool {
        Self::q(i1) == Self::q(i2) + Self::q(iop)
            && su2_triangle(Self::ss(i1) - 1, Self::ss(i2) - 1, Self::ss(iop) - 1)
    }

    fn ancestor_list(i: &Invar) -> Vec<Invar> {
        let (q, ss) = (Self::q(i), Self::ss(i));
        vec![
            Invar::new(vec![q + 1, ss]),
            Invar::new(vec![q, ss + 1]),
            Invar::new(vec![q, ss - 1]),
            Invar::new(vec![q - 1, ss]),
        ]
    }

    /// Recalculation tables of an ancestor-acting tensor operator of rank
    /// `djop/2` with quantum numbers `iop`, for all admissible targets.
    fn recalc_targets_for(
        &self,
        i1: &Invar,
        ips: &[Invar],
        iop: &Invar,
        djop: i32,
    ) -> Vec<RecalcTarget> {
        let mut targets = Vec::new();
        for ip in ips {
            if !Self::allowed(ip) {
                continue;
            }
            let anc1 = Self::ancestor_list(i1);
            let ancp = Self::ancestor_list(ip);
            let (dj1, djp) = (Self::ss(i1) - 1, Self::ss(ip) - 1);
            let mut table = Vec::new();
            for (c1, a1) in anc1.iter().enumerate() {
                for (cp, ap) in ancp.iter().enumerate() {
                    if COMB_OCC[c1] != COMB_OCC[cp] {
                        continue;
                    }
                    if !Self::triangle(a1, ap, iop) {
                        continue;
                    }
                    let factor = recoupling_factor(
                        dj1,
                        djp,
                        Self::ss(a1) - 1,
                        Self::ss(ap) - 1,
                        COMB_OCC[c1],
                        djop,
                    );
                    if factor.abs() > 1e-14 {
                        table.push(Recalc {
                            i1: c1,
                            ip: cp,
                            in1: a1.clone(),
                            inp: ap.clone(),
                            factor,
                        });
                    }
                }
            }
            if !table.is_empty() {
                targets.push(RecalcTarget {
                    ip: ip.clone(),
                    iop: iop.clone(),
                    table,
                });
            }
        }
        targets
    }
}

impl Default for SymmetryQS {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Scalar> Symmetry<S> for SymmetryQS {
    fn name(&self) -> &'static str {
        "QS"
    }

    fn structure(&self) -> &InvarStructure {
        &self.structure
    }

    fn nr_combs(&self) -> usize {
        4
    }

    fn mult(&self, i: &Invar) -> usize {
        Self::ss(i) as usize
    }

    fn invar_allowed(&self, i: &Invar) -> bool {
        Self::allowed(i)
    }

    fn triangle_allowed(&self, i1: &Invar, i2: &Invar, iop: &Invar) -> bool {
        Self::triangle(i1, i2, iop)
    }

    fn ancestors(&self, i: &Invar) -> Vec<Invar> {
        Self::ancestor_list(i)
    }

    fn new_subspaces(&self, i: &Invar) -> Vec<Invar> {
        let (q, ss) = (Self::q(i), Self::ss(i));
        vec![
            Invar::new(vec![q - 1, ss]),
            Invar::new(vec![q, ss - 1]),
            Invar::new(vec![q, ss + 1]),
            Invar::new(vec![q + 1, ss]),
        ]
    }

    fn qn_subspace(&self, comb: usize) -> Invar {
        match comb {
            0 => Invar::new(vec![-1, 1]),
            1 | 2 => Invar::new(vec![0, 2]),
            3 => Invar::new(vec![1, 1]),
            _ => unreachable!("combination index {comb} out of range"),
        }
    }

    fn singlet_op(&self) -> Invar {
        Invar::new(vec![0, 1])
    }

    fn specdens_factor(&self, ip: &Invar, i1: &Invar) -> f64 {
        let (ssp, ss1) = (Self::ss(ip), Self::ss(i1));
        debug_assert_eq!((ss1 - ssp).abs(), 1);
        if ss1 == ssp + 1 {
            Self::spin(ssp) + 1.0
        } else {
            Self::spin(ssp)
        }
    }

    fn dynamic_susceptibility_factor(&self, ip: &Invar, i1: &Invar) -> f64 {
        let (ssp, ss1) = (Self::ss(ip), Self::ss(i1));
        debug_assert!((ss1 - ssp).abs() == 2 || ss1 == ssp);
        let sspf = f64::from(ssp);
        if ss1 == ssp + 2 {
            1.0 + (sspf - 1.0) / 3.0
        } else if ss1 == ssp {
            sspf / 3.0
        } else {
            (sspf - 2.0) / 3.0
        }
    }

    fn make_matrix(
        &self,
        h: &mut Matrix<S>,
        step: &Step,
        rm: &SubspaceDimensions,
        i: &Invar,
        anc: &[Invar],
        opch: &Opch<S>,
        coef: &Coef<S>,
    ) {
        let dj = Self::ss(i) - 1;
        let channels = opch.nr_channels();
        // In substep mode only the channel of the current substep couples.
        let (site, active): (usize, Vec<usize>) = if step.substeps() {
            let (ntrue, m) = step.nm();
            (ntrue, vec![m])
        } else {
            (step.current_site(), (0..channels).collect())
        };
        for &ch in &active {
            let xi = coef.xi(site, ch);
            for (ci, cj) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
                let factor = hopping_factor(
                    dj,
                    Self::ss(&anc[ci]) - 1,
                    COMB_OCC[ci],
                    Self::ss(&anc[cj]) - 1,
                    COMB_OCC[cj],
                ) * psgn(Self::q(&anc[cj]));
                offdiag_function(h, rm, anc, opch, ci, cj, ch, 0, xi.mul_real(factor));
            }
            let zeta = coef.zeta(site + 1, ch);
            for (c, occ) in COMB_OCC.iter().enumerate() {
                diag_function(h, rm, c, f64::from(occ.occupation()), zeta);
            }
        }
    }

    fn recalc_doublet_targets(&self, i1: &Invar) -> Vec<RecalcTarget> {
        let (q, ss) = (Self::q(i1), Self::ss(i1));
        let ips = [
            Invar::new(vec![q - 1, ss + 1]),
            Invar::new(vec![q - 1, ss - 1]),
        ];
        self.recalc_targets_for(i1, &ips, &Invar::new(vec![1, 2]), 1)
    }

    fn recalc_triplet_targets(&self, i1: &Invar) -> Vec<RecalcTarget> {
        let (q, ss) = (Self::q(i1), Self::ss(i1));
        let ips = [
            Invar::new(vec![q, ss - 2]),
            Invar::new(vec![q, ss]),
            Invar::new(vec![q, ss + 2]),
        ];
        self.recalc_targets_for(i1, &ips, &Invar::new(vec![0, 3]), 2)
    }

    fn recalc_f_targets(&self, ip: &Invar, _ch: usize, _flavor: usize) -> Vec<RecalcFTarget> {
        let (qp, ssp) = (Self::q(ip), Self::ss(ip));
        let mut targets = Vec::new();
        for i1 in [
            Invar::new(vec![qp + 1, ssp + 1]),
            Invar::new(vec![qp + 1, ssp - 1]),
        ] {
            if !Self::allowed(&i1) {
                continue;
            }
            let anc1 = Self::ancestor_list(&i1);
            let ancp = Self::ancestor_list(ip);
            let (dj1, djp) = (Self::ss(&i1) - 1, ssp - 1);
            let mut table = Vec::new();
            for (c1, a1) in anc1.iter().enumerate() {
                for (cp, ap) in ancp.iter().enumerate() {
                    if a1 != ap {
                        continue;
                    }
                    if COMB_OCC[c1].occupation() != COMB_OCC[cp].occupation() + 1 {
                        continue;
                    }
                    let factor = site_creation_factor(
                        dj1,
                        djp,
                        Self::ss(a1) - 1,
                        COMB_OCC[c1],
                        COMB_OCC[cp],
                    ) * psgn(Self::q(a1));
                    if factor.abs() > 1e-14 {
                        table.push(RecalcF {
                            i1: c1,
                            ip: cp,
                            factor,
                        });
                    }
                }
            }
            if !table.is_empty() {
                targets.push(RecalcFTarget { i1, table });
            }
        }
        targets
    }

    fn calculate_td(&self, diag: &DiagInfo<S>, stats: &mut Stats<S>, factor: f64) {
        let (mut tr_sz2, mut tr_q, mut tr_q2) = (0.0, 0.0, 0.0);
        for (i, eig) in diag.iter() {
            let (q, ss) = (f64::from(Self::q(i)), Self::ss(i));
            let sum_z = f64::from(ss) * calculate_z(eig, factor);
            tr_sz2 += sum_z * f64::from(ss * ss - 1) / 12.0;
            tr_q += sum_z * q;
            tr_q2 += sum_z * q * q;
        }
        stats.td.set("<Sz^2>", tr_sz2 / stats.z);
        stats.td.set("<Q>", tr_q / stats.z);
        stats.td.set("<Q^2>", tr_q2 / stats.z);
    }

    fn td_fields(&self) -> Vec<&'static str> {
        vec!["<Sz^2>", "<Q>", "<Q^2>"]
    }
}
