//! Run parameters and the scratch working directory.
//!
//! Parameters are read once at startup from a YAML file holding a single
//! `param:` mapping, frozen, and passed by reference to every component.
//! The handful of quantities dictated by the input data file (symmetry type,
//! channel count, …) are filled in by the input reader before the struct is
//! frozen.

use std::env;
use std::path::PathBuf;

use serde::Deserialize;
use tempfile::TempDir;

use crate::error::NrgError;

#[cfg(test)]
#[path = "params_tests.rs"]
mod params_tests;

/// File-name stems of the per-step scratch blobs.
pub const FN_RHO: &str = "rho";
pub const FN_RHOFDM: &str = "rhoFDM";

/// Operator recalculation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Transform with all computed eigenvectors.
    All,
    /// Transform with the kept eigenvectors only.
    Kept,
}

/// Wrapper matching the `param:` section of the parameter file.
#[derive(Debug, Deserialize)]
pub struct ParamFile {
    pub param: Params,
}

/// All run parameters. Booleans default to `false` unless stated otherwise.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Params {
    /// Discretization factor Λ > 1; the energy scale decays as √Λ per step.
    pub lambda: f64,
    /// Maximum chain length.
    pub nmax: usize,
    /// Upper bound on the number of kept states.
    pub keep: usize,
    /// Energy cutoff for the keep selection; active when positive.
    pub keepenergy: f64,
    /// Lower bound on the number of kept states.
    pub keepmin: usize,
    /// Degeneracy-gap tolerance of the truncation safeguard.
    pub safeguard: f64,
    /// Hard cap on the extra states admitted by the safeguard.
    pub safeguardmax: usize,
    /// Physical temperature entering the FDM weights and the binning grids.
    #[serde(rename = "T")]
    pub t: f64,
    /// Effective-temperature rescale factor, `Teff = scale/betabar`.
    pub betabar: f64,
    /// Fold multi-channel iterations into serial single-channel substeps.
    pub substeps: bool,
    pub strategy: Strategy,
    /// `"MPI"` selects the message-passing backend; anything else the
    /// shared-memory fan-out.
    pub diag_mode: String,
    /// Fraction of eigenpairs requested from the diagonalizer.
    pub diagratio: f64,
    /// Retry with a larger `diagratio` on insufficient states.
    pub restart: bool,
    /// Growth factor of `diagratio` between retries.
    pub restartfactor: f64,
    /// Worker count for the diagonalization backends; 0 means all cores.
    pub diagth: usize,
    /// Master switch of the second (DM-NRG) pass.
    pub dm: bool,
    pub cfs: bool,
    pub cfsgt: bool,
    pub cfsls: bool,
    pub dmnrg: bool,
    pub fdm: bool,
    pub fdmgt: bool,
    pub fdmls: bool,
    pub fdmmats: bool,
    /// Conventional finite-temperature (FT) spectra during the first pass.
    pub finite: bool,
    pub finitemats: bool,
    pub fdmexpv: bool,
    /// Step at which the FDM expectation values are evaluated.
    pub fdmexpvn: usize,
    /// Number of Matsubara frequencies accumulated.
    pub mats: usize,
    /// Spectrum name lists, space-delimited, by operator character.
    pub specs: String,
    pub specd: String,
    pub spect: String,
    pub specq: String,
    pub specchit: String,
    /// Early-exit breakpoint: `"nrg"` or `"rho"`.
    pub stopafter: String,
    /// Delete each scratch blob after it has been loaded in the second pass.
    pub removefiles: bool,
    /// Keep every computed state in the last iteration.
    pub lastall: bool,
    /// Measure thermodynamics once before the first iteration.
    pub calc0: bool,
    /// Verify the operator sum rules after each step.
    pub checksumrules: bool,
    /// Log-binning resolution, bins per decade of |ω|.
    pub bins: usize,
    /// Lower edge of the binning window.
    pub emin: f64,
    /// Upper edge of the binning window.
    pub emax: f64,
    /// Number of lowest excitations written to the flow-diagram file; 0
    /// disables the dump.
    pub dumpannotated: usize,
    /// Group degenerate levels in the flow-diagram file.
    pub dumpgroups: bool,
    /// Degeneracy tolerance used when grouping.
    pub grouptol: f64,
    pub dumpenergies: bool,
    pub dumpabsenergies: bool,
    pub dumpsubspaces: bool,
    /// Output precision for the dump files.
    pub dumpprecision: usize,

    // Quantities dictated by the data file, filled by the input reader.
    #[serde(skip)]
    pub symtype: String,
    #[serde(skip)]
    pub channels: usize,
    #[serde(skip)]
    pub perchannel: usize,
    #[serde(skip)]
    pub combs: usize,
    #[serde(skip)]
    pub ninit: usize,
    #[serde(skip)]
    pub absolute: bool,
    #[serde(skip)]
    pub data_has_rescaled_energies: bool,
    #[serde(skip)]
    pub polarized: bool,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            lambda: 2.0,
            nmax: 0,
            keep: 100,
            keepenergy: -1.0,
            keepmin: 0,
            safeguard: 1e-5,
            safeguardmax: 200,
            t: 1e-4,
            betabar: 1.0,
            substeps: false,
            strategy: Strategy::Kept,
            diag_mode: String::new(),
            diagratio: 1.0,
            restart: true,
            restartfactor: 2.0,
            diagth: 0,
            dm: false,
            cfs: false,
            cfsgt: false,
            cfsls: false,
            dmnrg: false,
            fdm: false,
            fdmgt: false,
            fdmls: false,
            fdmmats: false,
            finite: false,
            finitemats: false,
            fdmexpv: false,
            fdmexpvn: 0,
            mats: 100,
            specs: String::new(),
            specd: String::new(),
            spect: String::new(),
            specq: String::new(),
            specchit: String::new(),
            stopafter: String::new(),
            removefiles: false,
            lastall: false,
            calc0: true,
            checksumrules: false,
            bins: 1000,
            emin: 1e-12,
            emax: 10.0,
            dumpannotated: 0,
            dumpgroups: true,
            grouptol: 1e-6,
            dumpenergies: true,
            dumpabsenergies: false,
            dumpsubspaces: false,
            dumpprecision: 10,
            symtype: String::new(),
            channels: 0,
            perchannel: 0,
            combs: 0,
            ninit: 0,
            absolute: false,
            data_has_rescaled_energies: false,
            polarized: false,
        }
    }
}

impl Params {
    /// Characteristic energy scale of shell `n`, `Λ^(-(n-1)/2)`.
    pub fn scale(&self, n: i64) -> f64 {
        self.lambda.powf(-((n - 1) as f64) / 2.0)
    }

    /// Rescaling factor applied to the previous shell's eigenvalues when the
    /// next Hamiltonian is assembled: √Λ, or `Λ^(1/(2 channels))` in substep
    /// mode.
    pub fn nrg_step_scale_factor(&self) -> f64 {
        if self.substeps {
            self.lambda.powf(1.0 / (2.0 * self.channels as f64))
        } else {
            self.lambda.sqrt()
        }
    }

    /// Log-binning resolution of the spectral accumulators.
    pub fn per_decade(&self) -> usize {
        self.bins.max(1)
    }

    /// Zero-bandwidth calculation: the initial shell is also the last one.
    pub fn zbw(&self) -> bool {
        self.nmax == self.ninit
    }

    /// Number of valid shell indexes; at least one even in the ZBW case.
    pub fn nlen(&self) -> usize {
        if self.zbw() {
            self.nmax + 1
        } else {
            self.nmax
        }
    }

    /// Whether any enabled algorithm needs the reduced density matrices.
    pub fn need_rho(&self) -> bool {
        self.cfs || self.cfsgt || self.cfsls || self.dmnrg
    }

    /// Whether any enabled algorithm needs the full density matrix.
    pub fn need_rho_fdm(&self) -> bool {
        self.fdm || self.fdmgt || self.fdmls || self.fdmmats || self.fdmexpv
    }

    /// CFS-family algorithms force `strategy = all` during the second pass.
    pub fn cfs_flags(&self) -> bool {
        self.cfs || self.cfsgt || self.cfsls || self.fdm || self.fdmgt || self.fdmls || self.fdmmats
    }

    /// Keep every computed state in the last iteration; the complete-Fock
    /// -space algorithms treat all last-shell states as discarded.
    pub fn keep_all_states_in_last_step(&self) -> bool {
        self.lastall || self.cfs_flags()
    }

    /// Validates the user-facing entries once, right after parsing.
    pub fn validate(&self) -> Result<(), NrgError> {
        if self.lambda <= 1.0 {
            return Err(NrgError::CorruptInput(format!(
                "lambda must exceed 1, got {}",
                self.lambda
            )));
        }
        if !(0.0 < self.diagratio && self.diagratio <= 1.0) {
            return Err(NrgError::CorruptInput(format!(
                "diagratio must lie in (0, 1], got {}",
                self.diagratio
            )));
        }
        if self.keep == 0 {
            return Err(NrgError::CorruptInput("keep must be positive".to_string()));
        }
        if self.t <= 0.0 {
            return Err(NrgError::CorruptInput(format!(
                "temperature must be positive, got {}",
                self.t
            )));
        }
        Ok(())
    }
}

/// Unique scratch directory holding the transformation and density-matrix
/// blobs between the two passes.
///
/// The directory is created under `$NRG_WORKDIR` (or the current directory)
/// and removed when the handle is dropped.
#[derive(Debug)]
pub struct Workdir {
    dir: TempDir,
}

impl Workdir {
    pub fn new() -> Result<Self, NrgError> {
        let root = env::var("NRG_WORKDIR").unwrap_or_else(|_| ".".to_string());
        let dir = TempDir::with_prefix_in("nrg.", &root)
            .map_err(|e| NrgError::io(PathBuf::from(&root), e))?;
        log::info!("workdir={}", dir.path().display());
        Ok(Self { dir })
    }

    /// Path of the transformation blob of step `n`.
    pub fn unitary_path(&self, n: usize) -> PathBuf {
        self.dir.path().join(format!("unitary{n}"))
    }

    /// Path of a density-matrix blob of step `n`; `prefix` is [`FN_RHO`] or
    /// [`FN_RHOFDM`].
    pub fn rho_path(&self, n: usize, prefix: &str) -> PathBuf {
        self.dir.path().join(format!("{prefix}{n}"))
    }
}
