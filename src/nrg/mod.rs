//! The iteration driver: per-step pipeline, operator bookkeeping, spectra
//! wiring, and the two-pass calculation.
//!
//! Control flow per step: assemble and diagonalize the subspace
//! Hamiltonians, subtract the ground state, prepare the truncation,
//! recalculate operators into the new basis, accumulate spectra and
//! thermodynamics, store the density-matrix snapshot, and only then perform
//! the physical truncation. Between the passes the density matrices are
//! constructed backward from the stored transformations.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use num_traits::Zero;

use crate::diag::{make_backend, DiagContext, DiagParams, DiagonalizerBackend};
use crate::dm::{
    calc_densitymatrix, calc_fulldensitymatrix, calc_zn_d, check_trace_rho, fdm_thermodynamics,
    grand_canonical_z, init_rho, init_rho_fdm,
};
use crate::eigen::DiagInfo;
use crate::error::NrgError;
use crate::invar::Invar;
use crate::io::output::{
    dump_absolute_energies, dump_all_energies, dump_subspaces, touch_done, Annotated, ExpvWriter,
    TableWriter,
};
use crate::io::{
    complex_data, load_rho, load_transformations, read_data, save_rho, save_transformations,
    InputData,
};
use crate::operators::{CustomOp, DensMatElements, IterInfo, MatrixElements};
use crate::params::{ParamFile, Params, Strategy, Workdir, FN_RHO, FN_RHOFDM};
use crate::recalc::{
    recalc_doublet, recalc_irreducible, recalc_orb_triplet, recalc_quadruplet, recalc_singlet,
    recalc_triplet, split_in_blocks,
};
use crate::scalar::{frobenius_norm, num_equal, Scalar};
use crate::spectral::algo::cfs::{AlgoCFS, AlgoCFSgt, AlgoCFSls};
use crate::spectral::algo::dmnrg::AlgoDMNRG;
use crate::spectral::algo::fdm::{AlgoFDM, AlgoFDMgt, AlgoFDMls, AlgoFDMmats};
use crate::spectral::algo::ft::{AlgoFT, AlgoFTmats};
use crate::spectral::algo::{Algo, RhoType};
use crate::spectral::GfType;
use crate::stats::Stats;
use crate::step::{RunType, Step};
use crate::subspaces::{AllSteps, SubspaceStructure};
use crate::symmetry::Symmetry;
use crate::truncation::truncate_prepare;


// ---------------------------------------------------------------------------
// Spectra wiring.
// ---------------------------------------------------------------------------

/// Which named operator family a spectrum endpoint lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum OpKind {
    S,
    P,
    G,
    D,
    T,
    Q,
    Ot,
}

impl OpKind {
    fn tag(self) -> &'static str {
        match self {
            OpKind::S => "s",
            OpKind::P => "p",
            OpKind::G => "g",
            OpKind::D => "d",
            OpKind::T => "t",
            OpKind::Q => "q",
            OpKind::Ot => "ot",
        }
    }

    fn set<'a, S: Scalar>(self, ii: &'a IterInfo<S>) -> &'a CustomOp<S> {
        match self {
            OpKind::S => &ii.ops,
            OpKind::P => &ii.opsp,
            OpKind::G => &ii.opsg,
            OpKind::D => &ii.opd,
            OpKind::T => &ii.opt,
            OpKind::Q => &ii.opq,
            OpKind::Ot => &ii.opot,
        }
    }
}

/// Weight function applied to each subspace pair of a spectrum.
#[derive(Clone, Copy, Debug)]
enum FactorKind {
    Correlator,
    Specdens,
    SpinSusc,
    Specdensquad,
}

impl FactorKind {
    fn eval<S: Scalar>(self, sym: &dyn Symmetry<S>, ip: &Invar, i1: &Invar) -> f64 {
        match self {
            FactorKind::Correlator => sym.correlator_factor(ip, i1),
            FactorKind::Specdens => sym.specdens_factor(ip, i1),
            FactorKind::SpinSusc => sym.dynamic_susceptibility_factor(ip, i1),
            FactorKind::Specdensquad => sym.specdensquad_factor(ip, i1),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum CheckKind {
    Trivial,
    Specdens,
}

impl CheckKind {
    fn eval<S: Scalar>(self, sym: &dyn Symmetry<S>, i1: &Invar, ip: &Invar, spin: i32) -> bool {
        match self {
            CheckKind::Trivial => true,
            CheckKind::Specdens => sym.check_spin(i1, ip, spin),
        }
    }
}

/// One spectral function under accumulation: the operator pair, the weight
/// and guard functions, and the algorithm instance.
struct BaseSpectrum<S: Scalar> {
    set1: OpKind,
    name1: String,
    set2: OpKind,
    name2: String,
    spin: i32,
    factor: FactorKind,
    check: CheckKind,
    algo: Box<dyn Algo<S>>,
}

impl<S: Scalar> BaseSpectrum<S> {
    /// Sweeps all subspace pairs in lexicographic order and feeds the pairs
    /// holding matrix elements to the algorithm.
    #[allow(clippy::too_many_arguments)]
    fn calc(
        &mut self,
        step: &Step,
        diag: &DiagInfo<S>,
        iterinfo: &IterInfo<S>,
        rho: &DensMatElements<S>,
        rho_fdm: &DensMatElements<S>,
        stats: &Stats<S>,
        sym: &dyn Symmetry<S>,
    ) {
        let (Some(op1), Some(op2)) = (
            self.set1.set(iterinfo).get(&self.name1),
            self.set2.set(iterinfo).get(&self.name2),
        ) else {
            return;
        };
        let rho_here = match self.algo.rho_type() {
            RhoType::RhoFdm => rho_fdm,
            _ => rho,
        };
        self.algo.begin(step);
        for (ii, diag_i) in diag.iter() {
            for (ij, diag_j) in diag.iter() {
                let key = (ij.clone(), ii.clone());
                if let (Some(m1), Some(m2)) = (op1.get(&key), op2.get(&key)) {
                    if self.check.eval(sym, ij, ii, self.spin) {
                        let factor = self.factor.eval(sym, ii, ij);
                        self.algo
                            .calc(step, diag_i, diag_j, m1, m2, factor, ii, ij, rho_here, stats);
                    }
                }
            }
        }
        self.algo.end(step);
    }
}

/// Suffix of a spectrum name: `a-b`, with `-u`/`-d` for resolved spins.
fn sdname(a: &str, b: &str, spin: i32) -> String {
    match spin {
        1 => format!("{a}-{b}-u"),
        -1 => format!("{a}-{b}-d"),
        _ => format!("{a}-{b}"),
    }
}

/// Operators to recompute and spectra to accumulate during one pass.
pub struct Oprecalc<S: Scalar> {
    runtype: RunType,
    /// `(character tag, operator name)` pairs required by some spectrum.
    ops: BTreeSet<(String, String)>,
    sl: Vec<BaseSpectrum<S>>,
}

impl<S: Scalar> Oprecalc<S> {
    pub fn new(
        runtype: RunType,
        iterinfo: &IterInfo<S>,
        sym: &dyn Symmetry<S>,
        p: &Params,
    ) -> Self {
        let mut this = Self {
            runtype,
            ops: BTreeSet::new(),
            sl: Vec::new(),
        };
        // Correlators: singlet operators of all kinds, bosonic.
        for (set1, set2) in [
            (OpKind::S, OpKind::S),
            (OpKind::P, OpKind::P),
            (OpKind::G, OpKind::G),
            (OpKind::S, OpKind::G),
            (OpKind::G, OpKind::S),
        ] {
            this.loopover(
                iterinfo, p, set1, set2, &p.specs, "corr",
                FactorKind::Correlator, CheckKind::Trivial, GfType::Bosonic, 0,
            );
            this.loopover(
                iterinfo, p, set1, set2, &p.specchit, "chit",
                FactorKind::Correlator, CheckKind::Trivial, GfType::Bosonic, 0,
            );
        }
        // Dynamical spin susceptibilities: triplet operators.
        this.loopover(
            iterinfo, p, OpKind::T, OpKind::T, &p.spect, "spin",
            FactorKind::SpinSusc, CheckKind::Trivial, GfType::Bosonic, 0,
        );
        // Spectral functions: doublet operators, spin-resolved in a field.
        let spins: &[i32] = if sym.is_field() { &[-1, 1] } else { &[0] };
        for &spin in spins {
            this.loopover(
                iterinfo, p, OpKind::D, OpKind::D, &p.specd, "spec",
                FactorKind::Specdens, CheckKind::Specdens, GfType::Fermionic, spin,
            );
        }
        // Spectral functions: quadruplet operators.
        this.loopover(
            iterinfo, p, OpKind::Q, OpKind::Q, &p.specq, "specq",
            FactorKind::Specdensquad, CheckKind::Trivial, GfType::Fermionic, 0,
        );
        if !this.ops.is_empty() {
            log::info!("Computing the following operators:");
            for (tag, name) in &this.ops {
                log::info!("{name} {tag}");
            }
        }
        this
    }

    /// Pairs every operator of `set1` with every operator of `set2` and
    /// wires up the requested spectra.
    #[allow(clippy::too_many_arguments)]
    fn loopover(
        &mut self,
        iterinfo: &IterInfo<S>,
        p: &Params,
        set1: OpKind,
        set2: OpKind,
        requested: &str,
        prefix: &str,
        factor: FactorKind,
        check: CheckKind,
        gt: GfType,
        spin: i32,
    ) {
        let wanted: BTreeSet<&str> = requested.split_whitespace().collect();
        if wanted.is_empty() {
            return;
        }
        for name1 in set1.set(iterinfo).names() {
            for name2 in set2.set(iterinfo).names() {
                let name = sdname(name1, name2, spin);
                if !wanted.contains(name.as_str()) {
                    continue;
                }
                for algo in self.algos_for(&name, prefix, gt, p) {
                    self.sl.push(BaseSpectrum {
                        set1,
                        name1: name1.clone(),
                        set2,
                        name2: name2.clone(),
                        spin,
                        factor,
                        check,
                        algo,
                    });
                }
                self.ops.insert((set1.tag().to_string(), name1.clone()));
                self.ops.insert((set2.tag().to_string(), name2.clone()));
            }
        }
    }

    /// Algorithm instances enabled for the current pass.
    fn algos_for(
        &self,
        name: &str,
        prefix: &str,
        gt: GfType,
        p: &Params,
    ) -> Vec<Box<dyn Algo<S>>> {
        let mut algos: Vec<Box<dyn Algo<S>>> = Vec::new();
        match self.runtype {
            RunType::Nrg => {
                if p.finite {
                    algos.push(Box::new(AlgoFT::new(name, prefix, gt, p)));
                }
                if p.finitemats {
                    algos.push(Box::new(AlgoFTmats::new(name, prefix, gt, p)));
                }
            }
            RunType::Dmnrg => {
                if p.dmnrg {
                    algos.push(Box::new(AlgoDMNRG::new(name, prefix, gt, p)));
                }
                if p.cfs {
                    algos.push(Box::new(AlgoCFS::new(name, prefix, gt, p)));
                }
                if p.cfsgt {
                    algos.push(Box::new(AlgoCFSgt::new(name, prefix, gt, p)));
                }
                if p.cfsls {
                    algos.push(Box::new(AlgoCFSls::new(name, prefix, gt, p)));
                }
                if p.fdm {
                    algos.push(Box::new(AlgoFDM::new(name, prefix, gt, p)));
                }
                if p.fdmgt {
                    algos.push(Box::new(AlgoFDMgt::new(name, prefix, gt, p)));
                }
                if p.fdmls {
                    algos.push(Box::new(AlgoFDMls::new(name, prefix, gt, p)));
                }
                if p.fdmmats {
                    algos.push(Box::new(AlgoFDMmats::new(name, prefix, gt, p)));
                }
            }
        }
        algos
    }

    /// Singlet operators are always recomputed in the first pass, so that
    /// the expectation values can be measured.
    fn do_s(&self, name: &str, p: &Params, step: &Step) -> bool {
        if step.nrg() {
            return true;
        }
        if step.dmnrg() && p.fdmexpv && step.ndx() <= p.fdmexpvn {
            return true;
        }
        self.ops.contains(&("s".to_string(), name.to_string()))
    }

    fn do_g(&self, name: &str, p: &Params, step: &Step) -> bool {
        if step.nrg() {
            return true;
        }
        if step.dmnrg() && p.fdmexpv && step.ndx() <= p.fdmexpvn {
            return true;
        }
        self.ops.contains(&("g".to_string(), name.to_string()))
    }

    fn wanted(&self, tag: &str, name: &str) -> bool {
        self.ops.contains(&(tag.to_string(), name.to_string()))
    }

    /// Recalculates (or clears) every operator set for the new basis.
    pub fn recalculate_operators(
        &self,
        iterinfo: &mut IterInfo<S>,
        step: &Step,
        diag: &DiagInfo<S>,
        sym: &dyn Symmetry<S>,
        p: &Params,
    ) {
        let recalc_or_clear = |selected: bool,
                               name: &str,
                               old: &MatrixElements<S>,
                               f: &dyn Fn(&MatrixElements<S>) -> MatrixElements<S>|
         -> MatrixElements<S> {
            if selected {
                log::debug!("recalculating {name}");
                f(old)
            } else {
                MatrixElements::new()
            }
        };
        let names = |set: &CustomOp<S>| -> Vec<String> { set.names().cloned().collect() };
        for name in names(&iterinfo.ops) {
            let old = iterinfo.ops.get(&name).expect("listed name").clone();
            let new = recalc_or_clear(self.do_s(&name, p, step), &name, &old, &|m| {
                recalc_singlet(diag, sym, m, 1)
            });
            iterinfo.ops.insert(name, new);
        }
        for name in names(&iterinfo.opsp) {
            let old = iterinfo.opsp.get(&name).expect("listed name").clone();
            let new = recalc_or_clear(self.wanted("p", &name), &name, &old, &|m| {
                recalc_singlet(diag, sym, m, -1)
            });
            iterinfo.opsp.insert(name, new);
        }
        for name in names(&iterinfo.opsg) {
            let old = iterinfo.opsg.get(&name).expect("listed name").clone();
            let new = recalc_or_clear(self.do_g(&name, p, step), &name, &old, &|m| {
                recalc_singlet(diag, sym, m, 1)
            });
            iterinfo.opsg.insert(name, new);
        }
        for name in names(&iterinfo.opd) {
            let old = iterinfo.opd.get(&name).expect("listed name").clone();
            let new = recalc_or_clear(self.wanted("d", &name), &name, &old, &|m| {
                recalc_doublet(diag, sym, m)
            });
            iterinfo.opd.insert(name, new);
        }
        for name in names(&iterinfo.opt) {
            let old = iterinfo.opt.get(&name).expect("listed name").clone();
            let new = recalc_or_clear(self.wanted("t", &name), &name, &old, &|m| {
                recalc_triplet(diag, sym, m)
            });
            iterinfo.opt.insert(name, new);
        }
        for name in names(&iterinfo.opq) {
            let old = iterinfo.opq.get(&name).expect("listed name").clone();
            let new = recalc_or_clear(self.wanted("q", &name), &name, &old, &|m| {
                recalc_quadruplet(diag, sym, m)
            });
            iterinfo.opq.insert(name, new);
        }
        for name in names(&iterinfo.opot) {
            let old = iterinfo.opot.get(&name).expect("listed name").clone();
            let new = recalc_or_clear(self.wanted("ot", &name), &name, &old, &|m| {
                recalc_orb_triplet(diag, sym, m)
            });
            iterinfo.opot.insert(name, new);
        }
    }

    /// Runs every wired spectrum over the current step.
    #[allow(clippy::too_many_arguments)]
    pub fn calc_spectra(
        &mut self,
        step: &Step,
        diag: &DiagInfo<S>,
        iterinfo: &IterInfo<S>,
        rho: &DensMatElements<S>,
        rho_fdm: &DensMatElements<S>,
        stats: &Stats<S>,
        sym: &dyn Symmetry<S>,
    ) {
        for spec in &mut self.sl {
            spec.calc(step, diag, iterinfo, rho, rho_fdm, stats, sym);
        }
    }

    /// Writes every accumulated spectrum to disk.
    pub fn save_spectra(&self) -> Result<(), NrgError> {
        for spec in &self.sl {
            spec.algo.save()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Output files of one pass.
// ---------------------------------------------------------------------------

pub struct Output<S: Scalar> {
    pub annotated: Annotated,
    pub td: Option<TableWriter>,
    pub custom: Option<ExpvWriter>,
    pub customfdm: Option<ExpvWriter>,
    energies: Option<(BufWriter<File>, PathBuf)>,
    _marker: std::marker::PhantomData<S>,
}

impl<S: Scalar> Output<S> {
    pub fn new(
        runtype: RunType,
        iterinfo: &IterInfo<S>,
        sym: &dyn Symmetry<S>,
        p: &Params,
    ) -> Result<Self, NrgError> {
        let mut td_fields = vec![
            "T".to_string(),
            "<E>".to_string(),
            "<E^2>".to_string(),
            "C".to_string(),
            "F".to_string(),
            "S".to_string(),
        ];
        td_fields.extend(sym.td_fields().into_iter().map(String::from));
        let td = match runtype {
            RunType::Nrg => Some(TableWriter::create("td", td_fields)?),
            RunType::Dmnrg => None,
        };
        let mut tracked: Vec<String> = iterinfo.ops.names().cloned().collect();
        tracked.extend(iterinfo.opsg.names().cloned());
        let custom = match runtype {
            RunType::Nrg => Some(ExpvWriter::create("custom", tracked.clone(), "T")?),
            RunType::Dmnrg => None,
        };
        let customfdm = if runtype == RunType::Dmnrg && p.fdmexpv {
            Some(ExpvWriter::create("customfdm", tracked, "T")?)
        } else {
            None
        };
        let energies = if runtype == RunType::Nrg && p.dumpenergies {
            let path = PathBuf::from("energies.nrg");
            let file = File::create(&path).map_err(|e| NrgError::io(path.clone(), e))?;
            Some((BufWriter::new(file), path))
        } else {
            None
        };
        Ok(Self {
            annotated: Annotated::new("annotated.dat"),
            td,
            custom,
            customfdm,
            energies,
            _marker: std::marker::PhantomData,
        })
    }

    fn dump_energies(&mut self, diag: &DiagInfo<S>, n: usize) -> Result<(), NrgError> {
        if let Some((writer, path)) = &mut self.energies {
            dump_all_energies(writer, path, diag, n)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Measurements.
// ---------------------------------------------------------------------------

/// Per-step thermodynamics in units of the effective temperature.
fn calculate_td<S: Scalar>(
    step: &Step,
    diag: &DiagInfo<S>,
    stats: &mut Stats<S>,
    output: &mut Output<S>,
    sym: &dyn Symmetry<S>,
) -> Result<(), NrgError> {
    let factor = step.td_factor();
    let mult = |i: &Invar| sym.mult(i);
    let z = diag.trace(|_| 1.0, factor, mult);
    let e = diag.trace(|x| x, factor, mult);
    let e2 = diag.trace(|x| x * x, factor, mult);
    stats.z = z;
    stats.td.set("T", step.teff());
    stats.td.set("<E>", e / z);
    stats.td.set("<E^2>", e2 / z);
    stats.td.set("C", e2 / z - (e / z) * (e / z));
    stats.td.set("F", -z.ln());
    stats.td.set("S", e / z + z.ln());
    sym.calculate_td(diag, stats, factor);
    if let Some(td) = &mut output.td {
        td.write_row(&stats.td)?;
    }
    Ok(())
}

/// `Tr[op exp(-βH)]` of a diagonal-character operator.
fn calc_trace_singlet<S: Scalar>(
    step: &Step,
    diag: &DiagInfo<S>,
    op: &MatrixElements<S>,
    sym: &dyn Symmetry<S>,
) -> S {
    let mut tr = S::zero();
    for (i, eig) in diag.iter() {
        let Some(block) = op.get(&(i.clone(), i.clone())) else {
            continue;
        };
        let mut sum = S::zero();
        for r in 0..eig.nr_stored().min(block.nrows()) {
            sum += block[(r, r)].mul_real((-step.td_factor() * eig.value_zero[r]).exp());
        }
        tr += sum.mul_real(sym.mult(i) as f64);
    }
    tr
}

/// Thermodynamic expectation values of the singlet operators.
fn measure_singlet<S: Scalar>(
    step: &Step,
    stats: &mut Stats<S>,
    diag: &DiagInfo<S>,
    iterinfo: &IterInfo<S>,
    output: &mut Output<S>,
    sym: &dyn Symmetry<S>,
) -> Result<(), NrgError> {
    let z = diag.trace(|_| 1.0, step.td_factor(), |i| sym.mult(i));
    for (name, op) in iterinfo.ops.iter().chain(iterinfo.opsg.iter()) {
        if op.is_empty() {
            continue;
        }
        let tr = calc_trace_singlet(step, diag, op, sym);
        stats.expv.insert(name.clone(), tr.mul_real(1.0 / z));
    }
    if let Some(custom) = &mut output.custom {
        custom.write_row(step.teff(), &stats.expv)?;
    }
    Ok(())
}

/// Expectation values in the full-density-matrix sense, evaluated over the
/// kept states of the current shell.
fn measure_singlet_fdm<S: Scalar>(
    step: &Step,
    stats: &mut Stats<S>,
    iterinfo: &IterInfo<S>,
    output: &mut Output<S>,
    rho_fdm: &DensMatElements<S>,
    dm: &AllSteps,
    sym: &dyn Symmetry<S>,
    p: &Params,
) -> Result<(), NrgError> {
    for (name, op) in iterinfo.ops.iter().chain(iterinfo.opsg.iter()) {
        if op.is_empty() {
            continue;
        }
        let mut tr = S::zero();
        for (i, rho_i) in rho_fdm.iter() {
            let Some(block) = op.get(&(i.clone(), i.clone())) else {
                continue;
            };
            let kept = dm
                .at(step.ndx())
                .get(i)
                .map_or(0, |ds| ds.kept)
                .min(rho_i.nrows())
                .min(block.nrows());
            let mut sum = S::zero();
            for a in 0..kept {
                for b in 0..kept {
                    sum += rho_i[(a, b)] * block[(b, a)];
                }
            }
            tr += sum.mul_real(sym.mult(i) as f64);
        }
        stats.fdmexpv.insert(name.clone(), tr);
    }
    if let Some(customfdm) = &mut output.customfdm {
        customfdm.write_row(p.t, &stats.fdmexpv)?;
    }
    Ok(())
}

/// Frobenius sum rule of an operator set; the factor 2 covers both
/// orderings of the anticommutator.
fn operator_sumrules<S: Scalar>(iterinfo: &IterInfo<S>, sym: &dyn Symmetry<S>) {
    let spin = if sym.is_field() { 1 } else { 0 };
    for (name, op) in iterinfo.opd.iter() {
        let sum: f64 = op
            .iter()
            .filter(|((i1, ip), _)| sym.check_spin(i1, ip, spin))
            .map(|((i1, ip), m)| sym.specdens_factor(ip, i1) * frobenius_norm(m))
            .sum();
        log::info!("norm[{name}]={}", 2.0 * sum);
    }
    for (name, op) in iterinfo.opq.iter() {
        let sum: f64 = op
            .iter()
            .map(|((i1, ip), m)| sym.specdensquad_factor(ip, i1) * frobenius_norm(m))
            .sum();
        log::info!("norm[{name}]={}", 2.0 * sum);
    }
}

// ---------------------------------------------------------------------------
// The per-step pipeline.
// ---------------------------------------------------------------------------

/// Recalculation strategies: with `kept`, operators are transformed after
/// the physical truncation; CFS-family runs force `all` in the second pass.
fn do_recalc_kept(step: &Step, p: &Params) -> bool {
    p.strategy == Strategy::Kept && !(p.cfs_flags() && step.dmnrg()) && !p.zbw()
}

fn do_recalc_all(step: &Step, p: &Params) -> bool {
    !do_recalc_kept(step, p) && !p.zbw()
}

struct Run<'a, S: Scalar> {
    p: &'a Params,
    workdir: &'a Workdir,
    sym: &'a dyn Symmetry<S>,
    backend: &'a dyn DiagonalizerBackend<S>,
    coef: &'a crate::coef::Coef<S>,
}

impl<'a, S: Scalar> Run<'a, S> {
    /// Diagonalizes one step, retrying with a larger `diagratio` when the
    /// truncation finds too few states.
    fn do_diag(
        &self,
        step: &Step,
        iterinfo: &IterInfo<S>,
        stats: &mut Stats<S>,
        diagprev: &DiagInfo<S>,
        tasks: &[Invar],
    ) -> Result<DiagInfo<S>, NrgError> {
        log::info!(
            "***** [{}] Iteration {}/{} (scale {:.8e}) *****",
            if step.nrg() { "NRG" } else { "DM" },
            step.ndx() + 1,
            self.p.nmax.max(1),
            step.energyscale()
        );
        let mut diagratio = self.p.diagratio;
        loop {
            let mut diag = if step.nrg() {
                let ctx = DiagContext {
                    step,
                    opch: &iterinfo.opch,
                    coef: self.coef,
                    diagprev,
                    sym: self.sym,
                    p: self.p,
                };
                self.backend
                    .diagonalize(&ctx, tasks, &DiagParams::new(diagratio))?
            } else {
                let mut d =
                    load_transformations(self.workdir, step.ndx(), self.p.removefiles)?;
                d.subtract_gs_energy(stats.gs_energy);
                d
            };
            stats.egs = diag.find_groundstate();
            if step.nrg() {
                diag.subtract_egs(stats.egs);
            }
            match truncate_prepare(step, &mut diag, self.sym, self.p) {
                Ok(()) => return Ok(diag),
                Err(NrgError::InsufficientStates) => {
                    if step.nrg() && self.p.restart && diagratio < 1.0 {
                        diagratio = (diagratio * self.p.restartfactor).min(1.0);
                        log::warn!(
                            "Insufficient number of states computed. \
                             Restarting this iteration step, diagratio={diagratio}"
                        );
                    } else if step.last() {
                        log::warn!(
                            "Insufficient number of states on the last step; \
                             keeping what we have"
                        );
                        return Ok(diag);
                    } else {
                        return Err(NrgError::InsufficientStates);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Absolute energies at the three reference points; must run after
    /// `total_energy` has been updated and before the transformations are
    /// stored.
    fn calc_abs_energies(&self, step: &Step, diag: &mut DiagInfo<S>, stats: &Stats<S>) {
        for eig in diag.eigs_mut() {
            eig.absenergy_n = eig.value_zero.iter().map(|&x| x * step.scale()).collect();
            eig.absenergy = eig
                .absenergy_n
                .iter()
                .map(|&x| x + stats.total_energy)
                .collect();
            eig.absenergy_g = eig.absenergy.clone();
        }
    }

    /// Everything that happens after a successful diagonalization.
    #[allow(clippy::too_many_arguments)]
    fn after_diag(
        &self,
        step: &Step,
        iterinfo: &mut IterInfo<S>,
        stats: &mut Stats<S>,
        diag: &mut DiagInfo<S>,
        output: &mut Output<S>,
        structure: &SubspaceStructure,
        dm: &mut AllSteps,
        oprecalc: &mut Oprecalc<S>,
    ) -> Result<(), NrgError> {
        if step.nrg() {
            stats.total_energy += stats.egs * step.scale();
            log::info!(
                "Total energy={:.18e}  Egs={:.18e}",
                stats.total_energy,
                stats.egs
            );
            stats.rel_egs[step.ndx()] = stats.egs;
            stats.abs_egs[step.ndx()] = stats.egs * step.scale();
            stats.energy_offsets[step.ndx()] = stats.total_energy;
            self.calc_abs_energies(step, diag, stats);
            if self.p.dm {
                save_transformations(self.workdir, step.ndx(), diag)?;
            }
            // Measurements are performed before the truncation.
            output.dump_energies(diag, step.ndx())?;
            calculate_td(step, diag, stats, output, self.sym)?;
            output.annotated.dump(diag, self.sym, self.p)?;
        }
        if !self.p.zbw() {
            split_in_blocks(diag, structure);
        }
        if do_recalc_all(step, self.p) {
            oprecalc.recalculate_operators(iterinfo, step, diag, self.sym, self.p);
            self.spectral_and_expv(step, stats, output, oprecalc, diag, iterinfo, dm)?;
        }
        if !self.p.zbw() {
            // The physical truncation happens here, after the snapshot for
            // the density-matrix algorithms has everything it needs.
            diag.truncate_perform();
        }
        dm.store(step.ndx(), diag, structure, step.last());
        if !step.last() {
            recalc_irreducible(step, diag, self.sym, &mut iterinfo.opch);
        }
        if do_recalc_kept(step, self.p) {
            oprecalc.recalculate_operators(iterinfo, step, diag, self.sym, self.p);
            self.spectral_and_expv(step, stats, output, oprecalc, diag, iterinfo, dm)?;
        }
        if self.p.zbw() {
            self.spectral_and_expv(step, stats, output, oprecalc, diag, iterinfo, dm)?;
        }
        if self.p.checksumrules {
            operator_sumrules(iterinfo, self.sym);
        }
        Ok(())
    }

    /// Spectral accumulation and expectation values of one step.
    #[allow(clippy::too_many_arguments)]
    fn spectral_and_expv(
        &self,
        step: &Step,
        stats: &mut Stats<S>,
        output: &mut Output<S>,
        oprecalc: &mut Oprecalc<S>,
        diag: &DiagInfo<S>,
        iterinfo: &IterInfo<S>,
        dm: &AllSteps,
    ) -> Result<(), NrgError> {
        stats.zft = grand_canonical_z(step, diag, self.sym, 1.0);
        let mut rho = DensMatElements::new();
        let mut rho_fdm = DensMatElements::new();
        if step.dmnrg() {
            if self.p.need_rho() {
                rho = load_rho(self.workdir, step.ndx(), FN_RHO, self.p.removefiles)?;
                check_trace_rho(&rho, self.sym, 1.0)?;
            }
            if self.p.need_rho_fdm() {
                rho_fdm = load_rho(self.workdir, step.ndx(), FN_RHOFDM, self.p.removefiles)?;
            }
        }
        oprecalc.calc_spectra(step, diag, iterinfo, &rho, &rho_fdm, stats, self.sym);
        if step.nrg() {
            measure_singlet(step, stats, diag, iterinfo, output, self.sym)?;
        }
        if step.dmnrg() && self.p.fdmexpv && step.ndx() == self.p.fdmexpvn {
            measure_singlet_fdm(step, stats, iterinfo, output, &rho_fdm, dm, self.sym, self.p)?;
        }
        Ok(())
    }

    /// One iteration step.
    #[allow(clippy::too_many_arguments)]
    fn iterate(
        &self,
        step: &Step,
        iterinfo: &mut IterInfo<S>,
        stats: &mut Stats<S>,
        diagprev: DiagInfo<S>,
        output: &mut Output<S>,
        dm: &mut AllSteps,
        oprecalc: &mut Oprecalc<S>,
    ) -> Result<DiagInfo<S>, NrgError> {
        let structure = SubspaceStructure::new(&diagprev, self.sym);
        let tasks = structure.task_list();
        let mut diag = self.do_diag(step, iterinfo, stats, &diagprev, &tasks)?;
        self.after_diag(
            step, iterinfo, stats, &mut diag, output, &structure, dm, oprecalc,
        )?;
        iterinfo.trim_matrices(&diag);
        diag.clear_eigenvectors();
        Ok(diag)
    }

    /// Measurements on the initial shell, before the first iteration.
    fn docalc0(
        &self,
        step: &mut Step,
        iterinfo: &IterInfo<S>,
        diag0: &DiagInfo<S>,
        stats: &mut Stats<S>,
        output: &mut Output<S>,
    ) -> Result<(), NrgError> {
        step.set(self.p.ninit as i64 - 1);
        log::info!("Before NRG iteration (N={})", step.ndx());
        output.dump_energies(diag0, step.ndx())?;
        calculate_td(step, diag0, stats, output, self.sym)?;
        output.annotated.dump(diag0, self.sym, self.p)?;
        // Expectation values only: the spectral content of the initial
        // shell is covered by the first iteration's energy window.
        stats.zft = grand_canonical_z(step, diag0, self.sym, 1.0);
        measure_singlet(step, stats, diag0, iterinfo, output, self.sym)?;
        Ok(())
    }

    /// Zero-bandwidth calculation: the initial shell is the only shell, and
    /// the truncation/store path runs exactly once.
    fn nrg_zbw(
        &self,
        step: &mut Step,
        iterinfo: &mut IterInfo<S>,
        stats: &mut Stats<S>,
        diag0: &DiagInfo<S>,
        output: &mut Output<S>,
        dm: &mut AllSteps,
        oprecalc: &mut Oprecalc<S>,
    ) -> Result<DiagInfo<S>, NrgError> {
        log::info!("Zero bandwidth calculation");
        step.set_zbw();
        let mut diag = if step.nrg() {
            diag0.clone()
        } else {
            let mut d = load_transformations(self.workdir, step.ndx(), self.p.removefiles)?;
            d.subtract_gs_energy(stats.gs_energy);
            d
        };
        stats.egs = diag.find_groundstate();
        if step.nrg() {
            diag.subtract_egs(stats.egs);
        }
        truncate_prepare(step, &mut diag, self.sym, self.p)?;
        let structure = SubspaceStructure::default();
        self.after_diag(
            step, iterinfo, stats, &mut diag, output, &structure, dm, oprecalc,
        )?;
        Ok(diag)
    }

    /// One full sweep over the chain.
    fn run_pass(
        &self,
        runtype: RunType,
        iterinfo: &mut IterInfo<S>,
        stats: &mut Stats<S>,
        diag0: &DiagInfo<S>,
        dm: &mut AllSteps,
    ) -> Result<DiagInfo<S>, NrgError> {
        diag0.states_report(|i| self.sym.mult(i));
        let mut oprecalc = Oprecalc::new(runtype, iterinfo, self.sym, self.p);
        let mut output = Output::new(runtype, iterinfo, self.sym, self.p)?;
        let mut step = Step::new(self.p, runtype);
        if step.nrg() && self.p.calc0 && !self.p.zbw() {
            self.docalc0(&mut step, iterinfo, diag0, stats, &mut output)?;
        }
        let diag = if self.p.zbw() {
            self.nrg_zbw(
                &mut step, iterinfo, stats, diag0, &mut output, dm, &mut oprecalc,
            )?
        } else {
            let mut diag = diag0.clone();
            step.init();
            while !step.end() {
                diag = self.iterate(
                    &step, iterinfo, stats, diag, &mut output, dm, &mut oprecalc,
                )?;
                step.next();
            }
            diag
        };
        oprecalc.save_spectra()?;
        if runtype == RunType::Nrg {
            log::info!("Total energy: {:.18}", stats.total_energy);
            stats.gs_energy = stats.total_energy;
        }
        log::info!("** Iteration completed.");
        Ok(diag)
    }
}

// ---------------------------------------------------------------------------
// The whole calculation.
// ---------------------------------------------------------------------------

/// Reads the parameter file (a YAML `param:` mapping).
pub fn read_params(path: &Path) -> Result<Params, NrgError> {
    let file = File::open(path).map_err(|e| NrgError::io(path.to_path_buf(), e))?;
    let pf: ParamFile = serde_yaml::from_reader(file)
        .map_err(|e| NrgError::CorruptInput(format!("parameter file: {e}")))?;
    pf.param.validate()?;
    Ok(pf.param)
}

/// Dispatches to the real or complex engine according to the data file.
pub fn run_calculation(param_path: &Path, data_path: &Path) -> Result<(), NrgError> {
    let p = read_params(param_path)?;
    if complex_data(data_path)? {
        NrgCalculation::<num_complex::Complex64>::run(p, data_path)
    } else {
        NrgCalculation::<f64>::run(p, data_path)
    }
}

/// The two-pass driver.
pub struct NrgCalculation<S: Scalar> {
    _marker: std::marker::PhantomData<S>,
}

impl<S: Scalar> NrgCalculation<S> {
    pub fn run(mut p: Params, data_path: &Path) -> Result<(), NrgError> {
        let workdir = Workdir::new()?;
        let InputData {
            diag0,
            mut iterinfo,
            coef,
            sym,
        } = read_data::<S>(data_path, &mut p)?;
        let p = p; // frozen from here on
        let mut stats: Stats<S> = Stats::new(&p);
        let backend = make_backend::<S>(&p);
        let mut dm = AllSteps::new(p.ninit, p.nlen());
        let run = Run {
            p: &p,
            workdir: &workdir,
            sym: sym.as_ref(),
            backend: backend.as_ref(),
            coef: &coef,
        };
        let diag = run.run_pass(RunType::Nrg, &mut iterinfo, &mut stats, &diag0, &mut dm)?;
        if p.dumpsubspaces {
            dump_subspaces(&dm, Path::new("subspaces.dat"))?;
        }
        if p.stopafter == "nrg" {
            log::info!("*** Stopped after the first sweep.");
            touch_done()?;
            return Ok(());
        }
        dm.shift_abs_energies(stats.gs_energy);
        if p.dumpabsenergies {
            dump_absolute_energies(&dm, Path::new("absolute_energies.dat"))?;
        }
        if p.dm {
            let mut last_step = Step::new(&p, RunType::Nrg);
            if p.zbw() {
                last_step.set_zbw();
            } else {
                last_step.set(last_step.last_ndx() as i64);
            }
            let loader = |n: usize| load_transformations::<S>(&workdir, n, false);
            if p.need_rho() {
                let rho = init_rho(&last_step, &diag, sym.as_ref())?;
                save_rho(&workdir, last_step.ndx(), FN_RHO, &rho)?;
                if !p.zbw() {
                    calc_densitymatrix(rho, &dm, sym.as_ref(), &workdir, loader)?;
                }
            }
            if p.need_rho_fdm() {
                calc_zn_d(&dm, &mut stats, sym.as_ref(), p.t)?;
                fdm_thermodynamics(&dm, &mut stats, sym.as_ref(), p.t);
                let mut tdfdm = TableWriter::create(
                    "tdfdm",
                    ["T", "Z_fdm", "F_fdm", "E_fdm", "C_fdm", "S_fdm"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                )?;
                tdfdm.write_row(&stats.td_fdm)?;
                let rho_fdm = init_rho_fdm(last_step.ndx(), &dm, &stats, sym.as_ref(), p.t)?;
                save_rho(&workdir, last_step.ndx(), FN_RHOFDM, &rho_fdm)?;
                if !p.zbw() {
                    calc_fulldensitymatrix(
                        rho_fdm,
                        &dm,
                        &stats,
                        sym.as_ref(),
                        &p,
                        &workdir,
                        loader,
                    )?;
                }
            }
            if p.stopafter == "rho" {
                log::info!("*** Stopped after the DM calculation.");
                touch_done()?;
                return Ok(());
            }
            // The second pass re-reads the operators in their original
            // basis and re-runs the chain from the stored transformations.
            let mut p2 = p.clone();
            let InputData {
                diag0: diag0_dm,
                iterinfo: mut iterinfo_dm,
                coef: coef_dm,
                sym: sym_dm,
            } = read_data::<S>(data_path, &mut p2)?;
            let run_dm = Run {
                p: &p,
                workdir: &workdir,
                sym: sym_dm.as_ref(),
                backend: backend.as_ref(),
                coef: &coef_dm,
            };
            run_dm.run_pass(
                RunType::Dmnrg,
                &mut iterinfo_dm,
                &mut stats,
                &diag0_dm,
                &mut dm,
            )?;
            if !num_equal(stats.gs_energy, stats.total_energy, 1e-12) {
                return Err(NrgError::ToleranceViolation(
                    "ground-state energy drifted between the passes".to_string(),
                ));
            }
        }
        touch_done()?;
        Ok(())
    }
}
