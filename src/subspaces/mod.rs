//! Subspace dimension bookkeeping.
//!
//! [`SubspaceDimensions`] records, for one target subspace, how many states
//! each ancestor combination contributes to the product basis; the prefix
//! sums of those counts are the block offsets used both when the Hamiltonian
//! is assembled and when the eigenvectors are split back into ancestor
//! blocks. [`AllSteps`] keeps one [`DimSub`] snapshot per (step, invariant),
//! which is what the density-matrix construction consumes after the forward
//! pass has ended.

use std::collections::BTreeMap;
use std::ops::Range;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::eigen::DiagInfo;
use crate::invar::Invar;
use crate::scalar::Scalar;
use crate::symmetry::Symmetry;


/// Sizes of the ancestor contributions to one subspace, in combination
/// order. A combination whose triangle test fails contributes zero.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubspaceDimensions {
    values: Vec<usize>,
}

impl SubspaceDimensions {
    /// Determines the ranges of the index `r` for subspace `i` built from
    /// the previous step's spectra.
    pub fn new<S: Scalar>(
        i: &Invar,
        ancestors: &[Invar],
        diagprev: &DiagInfo<S>,
        sym: &dyn Symmetry<S>,
    ) -> Self {
        let values = ancestors
            .iter()
            .enumerate()
            .map(|(c, anc)| {
                if sym.triangle_allowed(i, anc, &sym.qn_subspace(c)) {
                    diagprev.size_subspace(anc)
                } else {
                    0
                }
            })
            .collect();
        Self { values }
    }

    pub fn combs(&self) -> usize {
        self.values.len()
    }

    /// States contributed by combination `i`.
    pub fn rmax(&self, i: usize) -> usize {
        self.values[i]
    }

    pub fn exists(&self, i: usize) -> bool {
        self.values[i] > 0
    }

    /// Column offset of combination `i` in the product basis.
    pub fn offset(&self, i: usize) -> usize {
        self.values[..i].iter().sum()
    }

    /// Total size of the product basis.
    pub fn total(&self) -> usize {
        self.values.iter().sum()
    }

    pub fn sizes(&self) -> &[usize] {
        &self.values
    }
}

/// The block structure of every subspace of the upcoming step, plus the
/// diagonalization task list.
#[derive(Clone, Debug, Default)]
pub struct SubspaceStructure {
    map: BTreeMap<Invar, SubspaceDimensions>,
}

impl SubspaceStructure {
    pub fn new<S: Scalar>(diagprev: &DiagInfo<S>, sym: &dyn Symmetry<S>) -> Self {
        let mut map = BTreeMap::new();
        for i in new_subspaces(diagprev, sym) {
            let rm = SubspaceDimensions::new(&i, &sym.ancestors(&i), diagprev, sym);
            map.insert(i, rm);
        }
        Self { map }
    }

    pub fn get(&self, i: &Invar) -> Option<&SubspaceDimensions> {
        self.map.get(i)
    }

    pub fn at_or_empty(&self, i: &Invar) -> SubspaceDimensions {
        self.map.get(i).cloned().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Invar, &SubspaceDimensions)> {
        self.map.iter()
    }

    /// Subspaces in which diagonalizations need to be performed, largest
    /// matrix first to balance the parallel dispatch.
    pub fn task_list(&self) -> Vec<Invar> {
        let mut tasks: Vec<(usize, Invar)> = self
            .map
            .iter()
            .filter(|(_, rm)| rm.total() > 0)
            .map(|(i, rm)| (rm.total(), i.clone()))
            .collect();
        tasks.sort_by(|a, b| b.cmp(a));
        if let (Some(max), Some(min)) = (tasks.first(), tasks.last()) {
            log::debug!(
                "Diagonalization tasks: nr={} min={} max={}",
                tasks.len(),
                min.0,
                max.0
            );
        }
        tasks.into_iter().map(|(_, i)| i).collect()
    }
}

/// Subspaces reachable from the previous step's spectra, deduplicated and
/// filtered by the symmetry's admissibility predicate.
pub fn new_subspaces<S: Scalar>(diagprev: &DiagInfo<S>, sym: &dyn Symmetry<S>) -> Vec<Invar> {
    let mut subspaces: Vec<Invar> = diagprev
        .subspaces()
        .flat_map(|i| sym.new_subspaces(i))
        .filter(|i| sym.invar_allowed(i))
        .collect();
    subspaces.sort();
    subspaces.dedup();
    subspaces
}

/// Dimension and energy snapshot of one (step, invariant) pair, kept after
/// the step's eigenvectors have been dropped.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DimSub {
    /// States kept after truncation.
    pub kept: usize,
    /// Size of the product basis.
    pub total: usize,
    pub rmax: SubspaceDimensions,
    /// Shifted eigenvalues of the stored states.
    pub value_zero: Array1<f64>,
    /// Energies on the absolute scale, all computed states.
    pub absenergy: Vec<f64>,
    /// Absolute energies referenced to the absolute ground state.
    pub absenergy_g: Vec<f64>,
    /// Absolute energies referenced to this step's lowest energy.
    pub absenergy_n: Vec<f64>,
    pub is_last: bool,
}

impl DimSub {
    /// First state entering the discarded-state sums of the FDM algorithms;
    /// on the last shell every state counts as discarded.
    pub fn min(&self) -> usize {
        if self.is_last {
            0
        } else {
            self.kept
        }
    }

    pub fn max(&self) -> usize {
        self.absenergy.len()
    }

    /// Range of the discarded states summed over by the FDM weights.
    pub fn all(&self) -> Range<usize> {
        self.min()..self.max()
    }
}

/// Per-step subspace snapshots for the whole chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AllSteps {
    steps: Vec<BTreeMap<Invar, DimSub>>,
    pub nbegin: usize,
    pub nend: usize,
}

impl AllSteps {
    pub fn new(nbegin: usize, nend: usize) -> Self {
        let len = if nend == 0 { 1 } else { nend };
        Self {
            steps: vec![BTreeMap::new(); len],
            nbegin,
            nend,
        }
    }

    pub fn nall(&self) -> Range<usize> {
        self.nbegin..self.nend
    }

    pub fn at(&self, n: usize) -> &BTreeMap<Invar, DimSub> {
        &self.steps[n]
    }

    /// Records the snapshot of step `ndx` from the freshly truncated
    /// spectra.
    pub fn store<S: Scalar>(
        &mut self,
        ndx: usize,
        diag: &DiagInfo<S>,
        structure: &SubspaceStructure,
        last: bool,
    ) {
        debug_assert!(self.nbegin <= ndx && ndx < self.nend.max(1));
        for (i, eig) in diag.iter() {
            self.steps[ndx].insert(
                i.clone(),
                DimSub {
                    kept: eig.nr_kept(),
                    total: eig.dim(),
                    rmax: structure.at_or_empty(i),
                    value_zero: eig.value_zero.clone(),
                    absenergy: eig.absenergy.clone(),
                    absenergy_g: eig.absenergy_g.clone(),
                    absenergy_n: eig.absenergy_n.clone(),
                    is_last: last,
                },
            );
        }
    }

    /// References every stored absolute energy to the global ground state.
    pub fn shift_abs_energies(&mut self, gs_energy: f64) {
        for step in &mut self.steps {
            for ds in step.values_mut() {
                for x in &mut ds.absenergy_g {
                    *x -= gs_energy;
                }
            }
        }
    }
}
