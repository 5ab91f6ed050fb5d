//! Operator matrix-element stores.
//!
//! Irreducible matrix elements of an operator are kept as a sparse map from
//! invariant-label pairs to dense blocks. Several named sets coexist,
//! grouped by tensor character; the hopping operators form a two-level
//! channel × flavor array of such sets.

use std::collections::BTreeMap;

use ndarray::s;
use serde::{Deserialize, Serialize};

use crate::eigen::DiagInfo;
use crate::invar::{Invar, TwoInvar};
use crate::scalar::{trace_real, Matrix, Scalar};


/// Irreducible matrix elements of one operator: `(I1, I2) → ⟨I1‖O‖I2⟩`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: serde::de::DeserializeOwned"
))]
pub struct MatrixElements<S: Scalar> {
    map: BTreeMap<TwoInvar, Matrix<S>>,
}

impl<S: Scalar> MatrixElements<S> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: TwoInvar, m: Matrix<S>) {
        self.map.insert(key, m);
    }

    pub fn get(&self, key: &TwoInvar) -> Option<&Matrix<S>> {
        self.map.get(key)
    }

    pub fn contains(&self, key: &TwoInvar) -> bool {
        self.map.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TwoInvar, &Matrix<S>)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Trims every block to the dimensions actually stored in `diag`.
    ///
    /// Required with `strategy = all`, where the recalculated blocks span all
    /// computed states while the next iteration only consumes the stored
    /// ones.
    pub fn trim(&mut self, diag: &DiagInfo<S>) {
        for ((i1, i2), mat) in &mut self.map {
            let (size1, size2) = (mat.nrows(), mat.ncols());
            if size1 == 0 || size2 == 0 {
                continue;
            }
            let nr1 = diag.size_subspace(i1);
            let nr2 = diag.size_subspace(i2);
            debug_assert!(nr1 <= size1 && nr2 <= size2);
            if nr1 == size1 && nr2 == size2 {
                continue;
            }
            *mat = mat.slice(s![..nr1, ..nr2]).to_owned();
        }
    }
}

/// A named family of operators sharing one tensor character.
#[derive(Clone, Debug, Default)]
pub struct CustomOp<S: Scalar> {
    map: BTreeMap<String, MatrixElements<S>>,
}

impl<S: Scalar> CustomOp<S> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: String, op: MatrixElements<S>) {
        self.map.insert(name, op);
    }

    pub fn get(&self, name: &str) -> Option<&MatrixElements<S>> {
        self.map.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MatrixElements<S>)> {
        self.map.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut MatrixElements<S>)> {
        self.map.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn trim(&mut self, diag: &DiagInfo<S>) {
        for op in self.map.values_mut() {
            op.trim(diag);
        }
    }
}

/// Hopping operators `f_{channel,flavor}`.
#[derive(Clone, Debug, Default)]
pub struct Opch<S: Scalar> {
    channels: Vec<Vec<MatrixElements<S>>>,
}

impl<S: Scalar> Opch<S> {
    pub fn new(nr_channels: usize, perchannel: usize) -> Self {
        Self {
            channels: vec![vec![MatrixElements::new(); perchannel]; nr_channels],
        }
    }

    pub fn get(&self, ch: usize, flavor: usize) -> &MatrixElements<S> {
        &self.channels[ch][flavor]
    }

    pub fn set(&mut self, ch: usize, flavor: usize, m: MatrixElements<S>) {
        self.channels[ch][flavor] = m;
    }

    pub fn nr_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn perchannel(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }
}

/// Density-matrix blocks, one square matrix per invariant subspace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize",
    deserialize = "S: serde::de::DeserializeOwned"
))]
pub struct DensMatElements<S: Scalar> {
    map: BTreeMap<Invar, Matrix<S>>,
}

impl<S: Scalar> DensMatElements<S> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, i: Invar, m: Matrix<S>) {
        self.map.insert(i, m);
    }

    pub fn get(&self, i: &Invar) -> Option<&Matrix<S>> {
        self.map.get(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Invar, &Matrix<S>)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Multiplicity-weighted trace, `Σ_I mult(I)·Tr ρ_I`.
    pub fn trace<MF: Fn(&Invar) -> usize>(&self, mult: MF) -> f64 {
        self.map
            .iter()
            .map(|(i, m)| mult(i) as f64 * trace_real(m, 1e-8))
            .sum()
    }
}

/// All operator matrix representations entering one step of the iteration.
#[derive(Clone, Debug, Default)]
pub struct IterInfo<S: Scalar> {
    /// Hopping operators of the Wilson chains.
    pub opch: Opch<S>,
    /// Singlet operators, even parity (expectation values).
    pub ops: CustomOp<S>,
    /// Singlet operators, odd parity.
    pub opsp: CustomOp<S>,
    /// Global singlet operators.
    pub opsg: CustomOp<S>,
    /// Doublet operators (spectral functions).
    pub opd: CustomOp<S>,
    /// Triplet operators (dynamical spin susceptibility).
    pub opt: CustomOp<S>,
    /// Quadruplet operators (J = 3/2 spectral functions).
    pub opq: CustomOp<S>,
    /// Orbital triplet operators.
    pub opot: CustomOp<S>,
}

impl<S: Scalar> IterInfo<S> {
    pub fn trim_matrices(&mut self, diag: &DiagInfo<S>) {
        self.ops.trim(diag);
        self.opsp.trim(diag);
        self.opsg.trim(diag);
        self.opd.trim(diag);
        self.opt.trim(diag);
        self.opq.trim(diag);
        self.opot.trim(diag);
    }
}
