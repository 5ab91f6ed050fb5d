//! Transformation of operator matrix elements into the new eigenbasis.
//!
//! The kernels below consume the per-symmetry recalculation tables and the
//! block-split eigenvectors of the current step. Whether they act on all
//! computed states or only the kept ones is decided by *when* they run
//! relative to the physical truncation, not by the kernels themselves.

use ndarray::Array2;

use crate::eigen::DiagInfo;
use crate::invar::Invar;
use crate::operators::{MatrixElements, Opch};
use crate::scalar::{Matrix, Scalar};
use crate::step::Step;
use crate::subspaces::SubspaceStructure;
use crate::symmetry::{Recalc, RecalcF, Symmetry};


/// Splits every subspace's eigenvectors into ancestor column blocks, as
/// required by the dense-tile products below.
pub fn split_in_blocks<S: Scalar>(diag: &mut DiagInfo<S>, structure: &SubspaceStructure) {
    for (i, eig) in diag.iter_mut() {
        let rm = structure.at_or_empty(i);
        if rm.total() == eig.dim() {
            eig.split_in_blocks(rm.sizes());
        } else {
            debug_assert_eq!(eig.dim(), 0, "block structure mismatch for {i}");
        }
    }
}

/// Accumulates one target block of a recalculated operator:
/// `cnew(I1,Ip) = Σ_i factor_i · U(I1)*[block i1] · cold(IN1,INp) · U(Ip)ᵀ[block ip]`.
///
/// Entries whose old block is absent contribute nothing; `None` is returned
/// when either subspace holds no states.
pub fn recalc_general<S: Scalar>(
    diag: &DiagInfo<S>,
    cold: &MatrixElements<S>,
    i1: &Invar,
    ip: &Invar,
    table: &[Recalc],
) -> Option<Matrix<S>> {
    let e1 = diag.get(i1)?;
    let ep = diag.get(ip)?;
    let (n1, np) = (e1.nr_stored(), ep.nr_stored());
    if n1 == 0 || np == 0 {
        return None;
    }
    let mut cnew: Matrix<S> = Array2::zeros((n1, np));
    for r in table {
        let Some(cold_block) = cold.get(&(r.in1.clone(), r.inp.clone())) else {
            continue;
        };
        if cold_block.nrows() == 0 || cold_block.ncols() == 0 {
            continue;
        }
        let u1 = &e1.blocks[r.i1];
        let up = &ep.blocks[r.ip];
        if u1.ncols() == 0 || up.ncols() == 0 {
            continue;
        }
        debug_assert_eq!(u1.ncols(), cold_block.nrows());
        debug_assert_eq!(up.ncols(), cold_block.ncols());
        let tmp = cold_block.dot(&up.t());
        let contrib = u1.mapv(|x| x.conj()).dot(&tmp);
        cnew.zip_mut_with(&contrib, |acc, &c| *acc += c.mul_real(r.factor));
    }
    Some(cnew)
}

/// Recalculates one irreducible block of the just-added site's hopping
/// operator: `⟨I1 r1|f†|Ip rp⟩ = Σ_i factor_i · U(I1)*[block i1] · U(Ip)ᵀ[block ip]`.
pub fn recalc_f<S: Scalar>(
    diag: &DiagInfo<S>,
    i1: &Invar,
    ip: &Invar,
    table: &[RecalcF],
) -> Option<Matrix<S>> {
    let e1 = diag.get(i1)?;
    let ep = diag.get(ip)?;
    let (n1, np) = (e1.nr_stored(), ep.nr_stored());
    if n1 == 0 || np == 0 {
        return None;
    }
    let mut cnew: Matrix<S> = Array2::zeros((n1, np));
    for r in table {
        let u1 = &e1.blocks[r.i1];
        let up = &ep.blocks[r.ip];
        if u1.ncols() == 0 || up.ncols() == 0 {
            continue;
        }
        debug_assert_eq!(u1.ncols(), up.ncols());
        let contrib = u1.mapv(|x| x.conj()).dot(&up.t());
        cnew.zip_mut_with(&contrib, |acc, &c| *acc += c.mul_real(r.factor));
    }
    Some(cnew)
}

/// Recalculates a whole operator of doublet character.
pub fn recalc_doublet<S: Scalar>(
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    cold: &MatrixElements<S>,
) -> MatrixElements<S> {
    recalc_by_targets(diag, cold, |i1| sym.recalc_doublet_targets(i1))
}

pub fn recalc_triplet<S: Scalar>(
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    cold: &MatrixElements<S>,
) -> MatrixElements<S> {
    recalc_by_targets(diag, cold, |i1| sym.recalc_triplet_targets(i1))
}

pub fn recalc_quadruplet<S: Scalar>(
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    cold: &MatrixElements<S>,
) -> MatrixElements<S> {
    recalc_by_targets(diag, cold, |i1| sym.recalc_quadruplet_targets(i1))
}

pub fn recalc_orb_triplet<S: Scalar>(
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    cold: &MatrixElements<S>,
) -> MatrixElements<S> {
    recalc_by_targets(diag, cold, |i1| sym.recalc_orb_triplet_targets(i1))
}

fn recalc_by_targets<S, F>(
    diag: &DiagInfo<S>,
    cold: &MatrixElements<S>,
    targets_of: F,
) -> MatrixElements<S>
where
    S: Scalar,
    F: Fn(&Invar) -> Vec<crate::symmetry::RecalcTarget>,
{
    let mut cnew = MatrixElements::new();
    for i1 in diag.subspaces() {
        for target in targets_of(i1) {
            if !diag.contains(&target.ip) {
                continue;
            }
            if let Some(m) = recalc_general(diag, cold, i1, &target.ip, &target.table) {
                cnew.insert((i1.clone(), target.ip), m);
            }
        }
    }
    cnew
}

/// Recalculates a singlet operator. Every ancestor maps onto itself with
/// unit factor; odd-parity singlets additionally flip the parity component
/// of the bra side.
pub fn recalc_singlet<S: Scalar>(
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    cold: &MatrixElements<S>,
    parity: i32,
) -> MatrixElements<S> {
    debug_assert!(parity == 1 || parity == -1);
    let mut cnew = MatrixElements::new();
    for i1 in diag.subspaces() {
        let ip = match parity {
            1 => i1.clone(),
            _ => invert_parity(i1, sym),
        };
        if !diag.contains(&ip) {
            continue;
        }
        let anc1 = sym.ancestors(i1);
        let table: Vec<Recalc> = anc1
            .iter()
            .enumerate()
            .map(|(c, a)| Recalc {
                i1: c,
                ip: c,
                in1: a.clone(),
                inp: if parity == 1 {
                    a.clone()
                } else {
                    invert_parity(a, sym)
                },
                factor: 1.0,
            })
            .collect();
        if let Some(m) = recalc_general(diag, cold, i1, &ip, &table) {
            cnew.insert((i1.clone(), ip), m);
        }
    }
    cnew
}

fn invert_parity<S: Scalar>(i: &Invar, sym: &dyn Symmetry<S>) -> Invar {
    let structure = sym.structure();
    let mut qn: Vec<i32> = (0..i.arity()).map(|k| i.qn(k)).collect();
    if let Some(idx) = structure.names().position(|n| n == "P") {
        qn[idx] = -qn[idx];
    } else {
        log::warn!(
            "odd-parity recalculation requested for symmetry without a parity label"
        );
    }
    Invar::new(qn)
}

/// Recalculates the irreducible elements of the hopping operators for the
/// next step. In substep mode only the active channel's operator is rebuilt
/// from the site tables; the others are carried along as doublets.
pub fn recalc_irreducible<S: Scalar>(
    step: &Step,
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    opch: &mut Opch<S>,
) {
    let channels = opch.nr_channels();
    let perchannel = opch.perchannel();
    if !step.substeps() {
        for ch in 0..channels {
            for fl in 0..perchannel {
                opch.set(ch, fl, recalc_f_channel(diag, sym, ch, fl));
            }
        }
    } else {
        let (_, m) = step.nm();
        for ch in 0..channels {
            for fl in 0..perchannel {
                if ch == m {
                    opch.set(ch, fl, recalc_f_channel(diag, sym, ch, fl));
                } else {
                    let carried = recalc_doublet(diag, sym, opch.get(ch, fl));
                    opch.set(ch, fl, carried);
                }
            }
        }
    }
}

fn recalc_f_channel<S: Scalar>(
    diag: &DiagInfo<S>,
    sym: &dyn Symmetry<S>,
    ch: usize,
    flavor: usize,
) -> MatrixElements<S> {
    let mut cnew = MatrixElements::new();
    for ip in diag.subspaces() {
        for target in sym.recalc_f_targets(ip, ch, flavor) {
            if !diag.contains(&target.i1) {
                continue;
            }
            if let Some(m) = recalc_f(diag, &target.i1, ip, &target.table) {
                cnew.insert((target.i1, ip.clone()), m);
            }
        }
    }
    cnew
}
