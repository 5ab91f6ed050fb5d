//! Statistical quantities accumulated during the iteration.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use rug::Float;

use crate::params::Params;
use crate::scalar::Scalar;

#[cfg(test)]
#[path = "stats_tests.rs"]
mod stats_tests;

/// Working precision (bits) of the extended-precision accumulators.
///
/// The alternating-sign cancellations in `⟨E²⟩ - ⟨E⟩²` and in the partial
/// partition sums lose all significance at double precision.
pub const MP_PREC: u32 = 400;

/// One row of a thermodynamic output table; insertion order fixes the
/// column order.
#[derive(Clone, Debug, Default)]
pub struct TdRecord {
    values: IndexMap<String, f64>,
}

impl TdRecord {
    pub fn set(&mut self, field: &str, value: f64) {
        self.values.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> f64 {
        self.values.get(field).copied().unwrap_or(f64::NAN)
    }

    pub fn value_for(&self, field: &str) -> Option<f64> {
        self.values.get(field).copied()
    }
}

/// Everything measured along the run: ground-state energies, partition
/// functions, thermodynamics, expectation values, and the FDM accumulators.
#[derive(Debug)]
pub struct Stats<S: Scalar> {
    /// Ground-state energy of the current step, in step units.
    pub egs: f64,
    /// Partition function of the current step.
    pub z: f64,
    /// Grand-canonical partition function over kept states, used by the
    /// conventional spectral-function weights.
    pub zft: f64,
    /// Current thermodynamic row (written to `td`).
    pub td: TdRecord,
    /// Current FDM thermodynamic row (written to `tdfdm`).
    pub td_fdm: TdRecord,
    /// Expectation values of the singlet operators.
    pub expv: BTreeMap<String, S>,
    /// Expectation values computed with the FDM algorithm.
    pub fdmexpv: BTreeMap<String, S>,
    /// Sum of the absolute ground-state energy shifts accumulated so far.
    pub total_energy: f64,
    /// Absolute ground-state energy of the whole chain; set to
    /// `total_energy` when the first pass ends.
    pub gs_energy: f64,
    /// `egs` of every step.
    pub rel_egs: Vec<f64>,
    /// `egs · scale` of every step.
    pub abs_egs: Vec<f64>,
    /// `total_energy` after every step.
    pub energy_offsets: Vec<f64>,
    /// Partial partition sums over discarded states, absolute energies.
    pub zn_dg: Vec<Float>,
    /// As `zn_dg` but referenced to each step's lowest energy.
    pub zn_dn: Vec<Float>,
    /// Double-precision copies of `zn_dn`.
    pub zn_dn_d: Vec<f64>,
    /// FDM shell weights; they sum to one.
    pub wn: Vec<f64>,
    /// `wn / ZnDG`, the prefactors entering the spectral terms.
    pub wnfactor: Vec<f64>,
    /// Grand-canonical partition function referenced to the ground state.
    pub zzg: f64,
    /// True partition function at temperature T.
    pub z_fdm: f64,
    pub f_fdm: f64,
    pub e_fdm: f64,
    pub c_fdm: f64,
    pub s_fdm: f64,
}

impl<S: Scalar> Stats<S> {
    pub fn new(p: &Params) -> Self {
        let nlen = p.nlen();
        Self {
            egs: 0.0,
            z: 0.0,
            zft: 0.0,
            td: TdRecord::default(),
            td_fdm: TdRecord::default(),
            expv: BTreeMap::new(),
            fdmexpv: BTreeMap::new(),
            total_energy: 0.0,
            gs_energy: 0.0,
            rel_egs: vec![0.0; nlen],
            abs_egs: vec![0.0; nlen],
            energy_offsets: vec![0.0; nlen],
            zn_dg: vec![Float::with_val(MP_PREC, 0.0); nlen],
            zn_dn: vec![Float::with_val(MP_PREC, 0.0); nlen],
            zn_dn_d: vec![0.0; nlen],
            wn: vec![0.0; nlen],
            wnfactor: vec![0.0; nlen],
            zzg: 0.0,
            z_fdm: 0.0,
            f_fdm: 0.0,
            e_fdm: 0.0,
            c_fdm: 0.0,
            s_fdm: 0.0,
        }
    }
}
