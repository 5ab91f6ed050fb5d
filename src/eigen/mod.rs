//! Per-subspace eigenspectra and the per-step collection of them.

use std::collections::BTreeMap;
use std::ops::Range;

use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::invar::Invar;
use crate::scalar::{Matrix, Scalar};


/// Eigenvalues and eigenvectors of one invariant subspace, together with its
/// truncation state and block decomposition.
///
/// Eigenvectors are stored as *rows* (one row per eigenpair); the column
/// dimension is the size of the product basis the subspace was built from.
/// After [`Eigen::split_in_blocks`] the columns are additionally partitioned
/// by the ancestor subspace each basis state originated from, so that the
/// recalculation kernels can run dense matrix products on contiguous tiles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: serde::de::DeserializeOwned"
))]
pub struct Eigen<S: Scalar> {
    /// Eigenvalues as computed, weakly increasing.
    pub value_orig: Array1<f64>,
    /// Eigenvectors, one per row.
    pub vectors: Matrix<S>,
    /// Eigenvalues with the step's ground-state energy subtracted.
    pub value_zero: Array1<f64>,
    /// Number of eigenpairs surviving truncation; `None` means keep all.
    nrpost: Option<usize>,
    /// Energies on the absolute scale.
    pub absenergy: Vec<f64>,
    /// Absolute energies referenced to the absolute ground state.
    pub absenergy_g: Vec<f64>,
    /// Absolute energies referenced to the lowest energy of this step.
    pub absenergy_n: Vec<f64>,
    /// Eigenvector column blocks, one per ancestor subspace.
    pub blocks: Vec<Matrix<S>>,
}

impl<S: Scalar> Eigen<S> {
    pub fn new(values: Array1<f64>, vectors: Matrix<S>) -> Self {
        debug_assert!(values.len() <= vectors.ncols());
        debug_assert_eq!(values.len(), vectors.nrows());
        Self {
            value_zero: values.clone(),
            value_orig: values,
            vectors,
            nrpost: None,
            absenergy: Vec::new(),
            absenergy_g: Vec::new(),
            absenergy_n: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Represents a spectral decomposition in its own eigenbasis: the given
    /// eigenvalues with identity eigenvectors. Used for the initial shell.
    pub fn diagonal(values: Array1<f64>) -> Self {
        let n = values.len();
        Self::new(values, Array2::eye(n))
    }

    /// Number of computed eigenpairs.
    pub fn nr_computed(&self) -> usize {
        self.value_orig.len()
    }

    /// Size of the underlying basis; valid also after the block split.
    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    /// Number of states marked to survive truncation.
    pub fn nr_kept(&self) -> usize {
        self.nrpost.unwrap_or_else(|| self.nr_computed())
    }

    /// Number of states currently stored.
    pub fn nr_stored(&self) -> usize {
        self.value_zero.len()
    }

    pub fn nr_discarded(&self) -> usize {
        self.nr_computed() - self.nr_kept()
    }

    pub fn all(&self) -> Range<usize> {
        0..self.nr_computed()
    }

    pub fn kept(&self) -> Range<usize> {
        0..self.nr_kept()
    }

    pub fn discarded(&self) -> Range<usize> {
        self.nr_kept()..self.nr_computed()
    }

    pub fn stored(&self) -> Range<usize> {
        0..self.nr_stored()
    }

    /// Records the truncation cut; the physical truncation is deferred to
    /// [`Eigen::truncate_perform`].
    pub fn truncate_prepare(&mut self, nrpost: usize) {
        debug_assert!(nrpost <= self.nr_stored());
        self.nrpost = Some(nrpost);
    }

    /// Drops the discarded rows of every column block.
    pub fn truncate_perform(&mut self) {
        let nrpost = self.nr_kept();
        for block in &mut self.blocks {
            debug_assert!(nrpost <= block.nrows());
            *block = block.slice(s![..nrpost, ..]).to_owned();
        }
        self.value_zero = self.value_zero.slice(s![..nrpost]).to_owned();
    }

    /// Shifts the spectrum so that the step's ground state sits at zero.
    pub fn subtract_egs(&mut self, egs: f64) {
        self.value_zero = &self.value_orig - egs;
        debug_assert!(self.value_zero[0] >= -1e-14);
    }

    /// References the absolute energies to the global ground state.
    pub fn subtract_gs_energy(&mut self, gs_energy: f64) {
        for x in &mut self.absenergy_g {
            *x -= gs_energy;
        }
        debug_assert!(self.absenergy_g.first().map_or(true, |&x| x >= -1e-10));
    }

    /// Diagonal matrix with `exp(-E_i * factor)` entries over stored states.
    pub fn diagonal_exp(&self, factor: f64) -> Matrix<S> {
        let dim = self.nr_stored();
        let mut m = Array2::zeros((dim, dim));
        for i in 0..dim {
            m[(i, i)] = S::from_real((-self.value_zero[i] * factor).exp());
        }
        m
    }

    /// Splits the eigenvector columns by ancestor subspace; `sizes` are the
    /// per-ancestor column counts, in combination order.
    pub fn split_in_blocks(&mut self, sizes: &[usize]) {
        debug_assert_eq!(sizes.iter().sum::<usize>(), self.dim());
        let nr = self.nr_stored();
        self.blocks = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for &sz in sizes {
            self.blocks
                .push(self.vectors.slice(s![..nr, offset..offset + sz]).to_owned());
            offset += sz;
        }
    }

    /// Releases the eigenvector storage once a step is complete.
    pub fn clear_eigenvectors(&mut self) {
        self.blocks.clear();
        self.blocks.shrink_to_fit();
    }
}

/// All eigenspectra of one step, keyed by invariant label.
///
/// The ordered map fixes the deterministic iteration order relied upon by
/// the serial passes (recalculation, spectral accumulation, output).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: serde::de::DeserializeOwned"
))]
pub struct DiagInfo<S: Scalar> {
    map: BTreeMap<Invar, Eigen<S>>,
}

impl<S: Scalar> DiagInfo<S> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, i: Invar, eig: Eigen<S>) {
        self.map.insert(i, eig);
    }

    pub fn get(&self, i: &Invar) -> Option<&Eigen<S>> {
        self.map.get(i)
    }

    pub fn contains(&self, i: &Invar) -> bool {
        self.map.contains_key(i)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Invar, &Eigen<S>)> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Invar, &mut Eigen<S>)> {
        self.map.iter_mut()
    }

    pub fn subspaces(&self) -> impl Iterator<Item = &Invar> {
        self.map.keys()
    }

    pub fn eigs(&self) -> impl Iterator<Item = &Eigen<S>> {
        self.map.values()
    }

    pub fn eigs_mut(&mut self) -> impl Iterator<Item = &mut Eigen<S>> {
        self.map.values_mut()
    }

    /// Lowest computed eigenvalue across all subspaces.
    pub fn find_groundstate(&self) -> f64 {
        self.eigs()
            .map(|eig| eig.value_orig[0])
            .fold(f64::INFINITY, f64::min)
    }

    pub fn subtract_egs(&mut self, egs: f64) {
        for eig in self.eigs_mut() {
            eig.subtract_egs(egs);
        }
    }

    pub fn subtract_gs_energy(&mut self, gs_energy: f64) {
        for eig in self.eigs_mut() {
            eig.subtract_gs_energy(gs_energy);
        }
    }

    /// All shifted eigenvalues of the step, sorted ascending.
    pub fn sorted_energies(&self) -> Vec<f64> {
        let mut energies: Vec<f64> = self
            .eigs()
            .flat_map(|eig| eig.value_zero.iter().copied())
            .collect();
        energies.sort_by(|a, b| a.total_cmp(b));
        energies
    }

    /// Number of stored states of subspace `i`, zero when absent.
    pub fn size_subspace(&self, i: &Invar) -> usize {
        self.map.get(i).map_or(0, Eigen::nr_stored)
    }

    pub fn truncate_perform(&mut self) {
        for eig in self.eigs_mut() {
            eig.truncate_perform();
        }
    }

    pub fn clear_eigenvectors(&mut self) {
        for eig in self.eigs_mut() {
            eig.clear_eigenvectors();
        }
    }

    /// Total number of stored states, weighted by subspace multiplicity.
    pub fn count_states<MF: Fn(&Invar) -> usize>(&self, mult: MF) -> usize {
        self.iter()
            .map(|(i, eig)| mult(i) * eig.nr_stored())
            .sum()
    }

    /// Number of non-empty subspaces.
    pub fn count_subspaces(&self) -> usize {
        self.eigs().filter(|eig| eig.nr_stored() > 0).count()
    }

    /// `Tr[f(βE) exp(-βE)]` over stored states, with `βE = factor·E`.
    pub fn trace<F, MF>(&self, fnc: F, factor: f64, mult: MF) -> f64
    where
        F: Fn(f64) -> f64,
        MF: Fn(&Invar) -> usize,
    {
        self.iter()
            .map(|(i, eig)| {
                let sum: f64 = eig
                    .value_zero
                    .iter()
                    .map(|&x| {
                        let beta_e = factor * x;
                        fnc(beta_e) * (-beta_e).exp()
                    })
                    .sum();
                mult(i) as f64 * sum
            })
            .sum()
    }

    /// Logs the subspace structure before the iteration starts.
    pub fn states_report<MF: Fn(&Invar) -> usize>(&self, mult: MF) {
        log::info!("Number of invariant subspaces: {}", self.count_subspaces());
        for (i, eig) in self.iter() {
            if eig.nr_stored() > 0 {
                log::info!("({i}) {} states: {:.8}", eig.nr_stored(), eig.value_orig);
            }
        }
        log::info!(
            "Number of states (multiplicity taken into account): {}\n",
            self.count_states(mult)
        );
    }
}

impl<S: Scalar> IntoIterator for DiagInfo<S> {
    type Item = (Invar, Eigen<S>);
    type IntoIter = std::collections::btree_map::IntoIter<Invar, Eigen<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.into_iter()
    }
}
