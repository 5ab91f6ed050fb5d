//! Invariant-subspace labels.
//!
//! An [`Invar`] is a fixed-arity tuple of small integers holding the
//! conserved quantum numbers of one invariant subspace (charge `Q`, twice the
//! spin `SS`, twice the spin projection `SSZ`, parity `P`, …). The arity and
//! the composition rule of each component are dictated by the symmetry in
//! force and described by an [`InvarStructure`]; the label itself stays a
//! plain value type so that it can serve as an ordered map key and be
//! persisted inside the binary blobs.

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
#[path = "invar_tests.rs"]
mod invar_tests;

/// Composition rule of one quantum-number component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuantumKind {
    /// Componentwise addition (charges, spin projections).
    Additive,
    /// Multiplication in {-1, +1} (parities).
    Multiplicative,
}

/// Names and composition rules of the quantum numbers of a symmetry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvarStructure {
    components: Vec<(String, QuantumKind)>,
}

impl InvarStructure {
    /// Builds a structure from `(name, kind)` pairs.
    pub fn new(components: &[(&str, QuantumKind)]) -> Self {
        Self {
            components: components
                .iter()
                .map(|(n, k)| ((*n).to_string(), *k))
                .collect(),
        }
    }

    /// Number of quantum numbers carried by each label.
    pub fn arity(&self) -> usize {
        self.components.len()
    }

    /// Index of the named component.
    ///
    /// # Panics
    ///
    /// Panics if the symmetry does not define a component of that name; the
    /// caller asked for a quantum number that cannot exist here.
    pub fn index_of(&self, name: &str) -> usize {
        self.components
            .iter()
            .position(|(n, _)| n == name)
            .unwrap_or_else(|| panic!("unknown quantum number `{name}`"))
    }

    /// Composition rule of component `i`.
    pub fn kind(&self, i: usize) -> QuantumKind {
        self.components[i].1
    }

    /// Component names, in storage order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|(n, _)| n.as_str())
    }

    /// Componentwise composition of two labels under this structure.
    pub fn combine(&self, a: &Invar, b: &Invar) -> Invar {
        debug_assert_eq!(a.arity(), self.arity());
        debug_assert_eq!(b.arity(), self.arity());
        Invar::new(
            (0..self.arity())
                .map(|i| match self.kind(i) {
                    QuantumKind::Additive => a.qn[i] + b.qn[i],
                    QuantumKind::Multiplicative => a.qn[i] * b.qn[i],
                })
                .collect(),
        )
    }

    /// Inverse of a label: negation of additive components; multiplicative
    /// components are their own inverse in {-1, +1}.
    pub fn invert(&self, a: &Invar) -> Invar {
        debug_assert_eq!(a.arity(), self.arity());
        Invar::new(
            (0..self.arity())
                .map(|i| match self.kind(i) {
                    QuantumKind::Additive => -a.qn[i],
                    QuantumKind::Multiplicative => a.qn[i],
                })
                .collect(),
        )
    }
}

/// Error raised when a label cannot be parsed from its textual form.
#[derive(Debug, Error)]
#[error("malformed invariant label `{0}`")]
pub struct InvarParseError(String);

/// An invariant-subspace label.
///
/// Equality and ordering are lexicographic over the components, which makes
/// `Invar` directly usable as the key of the ordered per-step maps.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Invar {
    qn: Vec<i32>,
}

impl Invar {
    pub fn new(qn: Vec<i32>) -> Self {
        Self { qn }
    }

    pub fn arity(&self) -> usize {
        self.qn.len()
    }

    /// Raw component access.
    pub fn qn(&self, i: usize) -> i32 {
        self.qn[i]
    }

    /// Named component access through the structure in force.
    pub fn get(&self, name: &str, structure: &InvarStructure) -> i32 {
        self.qn[structure.index_of(name)]
    }
}

/// A pair of labels keying an operator block `⟨I1| O |I2⟩`.
pub type TwoInvar = (Invar, Invar);

impl fmt::Display for Invar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qn.iter().join(" "))
    }
}

impl FromStr for Invar {
    type Err = InvarParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let qn = s
            .split_whitespace()
            .map(|t| t.parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| InvarParseError(s.to_string()))?;
        if qn.is_empty() {
            return Err(InvarParseError(s.to_string()));
        }
        Ok(Self { qn })
    }
}
