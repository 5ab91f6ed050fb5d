//! Wilson-chain coefficient tables.
//!
//! The discretization front-end supplies, per channel, the on-site energies
//! `zeta`, the hoppings `xi`, and optionally the anomalous `kappa`, the
//! isospin-breaking `delta` and the spin-polarized variants. All of them are
//! bounded random-access tables indexed by `(site, channel)`.

use crate::scalar::Scalar;


/// One named coefficient table, `[channel][site]`.
#[derive(Clone, Debug)]
pub struct CoefTable<S> {
    name: &'static str,
    values: Vec<Vec<S>>,
}

impl<S: Scalar> CoefTable<S> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            values: Vec::new(),
        }
    }

    pub fn set(&mut self, values: Vec<Vec<S>>) {
        self.values = values;
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of tabulated sites of channel `ch`.
    pub fn len(&self, ch: usize) -> usize {
        self.values.get(ch).map_or(0, Vec::len)
    }

    /// Coefficient of site `n` in channel `ch`.
    ///
    /// # Panics
    ///
    /// Panics when the table does not extend to `(n, ch)`; the chain data
    /// shipped in the input file was shorter than the requested `Nmax`.
    pub fn get(&self, n: usize, ch: usize) -> S {
        *self
            .values
            .get(ch)
            .and_then(|t| t.get(n))
            .unwrap_or_else(|| {
                panic!(
                    "coefficient table `{}` has no entry for site {n}, channel {ch}",
                    self.name
                )
            })
    }
}

/// The complete set of chain coefficients for one run.
#[derive(Clone, Debug)]
pub struct Coef<S> {
    pub xi: CoefTable<S>,
    pub zeta: CoefTable<S>,
    pub kappa: CoefTable<S>,
    pub delta: CoefTable<S>,
    pub xi_up: CoefTable<S>,
    pub xi_down: CoefTable<S>,
    pub zeta_up: CoefTable<S>,
    pub zeta_down: CoefTable<S>,
}

impl<S: Scalar> Coef<S> {
    pub fn new() -> Self {
        Self {
            xi: CoefTable::new("xi"),
            zeta: CoefTable::new("zeta"),
            kappa: CoefTable::new("kappa"),
            delta: CoefTable::new("delta"),
            xi_up: CoefTable::new("xiUP"),
            xi_down: CoefTable::new("xiDOWN"),
            zeta_up: CoefTable::new("zetaUP"),
            zeta_down: CoefTable::new("zetaDOWN"),
        }
    }

    pub fn xi(&self, n: usize, ch: usize) -> S {
        self.xi.get(n, ch)
    }

    pub fn zeta(&self, n: usize, ch: usize) -> S {
        self.zeta.get(n, ch)
    }

    pub fn kappa(&self, n: usize, ch: usize) -> S {
        self.kappa.get(n, ch)
    }

    pub fn delta(&self, n: usize, ch: usize) -> S {
        self.delta.get(n, ch)
    }

    /// Spin-polarized hoppings; fall back to the unpolarized table when the
    /// input carried none.
    pub fn xi_up(&self, n: usize, ch: usize) -> S {
        if self.xi_up.is_empty() {
            self.xi(n, ch)
        } else {
            self.xi_up.get(n, ch)
        }
    }

    pub fn xi_down(&self, n: usize, ch: usize) -> S {
        if self.xi_down.is_empty() {
            self.xi(n, ch)
        } else {
            self.xi_down.get(n, ch)
        }
    }

    pub fn zeta_up(&self, n: usize, ch: usize) -> S {
        if self.zeta_up.is_empty() {
            self.zeta(n, ch)
        } else {
            self.zeta_up.get(n, ch)
        }
    }

    pub fn zeta_down(&self, n: usize, ch: usize) -> S {
        if self.zeta_down.is_empty() {
            self.zeta(n, ch)
        } else {
            self.zeta_down.get(n, ch)
        }
    }
}

impl<S: Scalar> Default for Coef<S> {
    fn default() -> Self {
        Self::new()
    }
}
