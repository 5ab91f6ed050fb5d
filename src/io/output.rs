//! Column-oriented output files: thermodynamics, expectation values, the
//! flow diagram and the eigenvalue dumps.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::eigen::DiagInfo;
use crate::error::NrgError;
use crate::invar::Invar;
use crate::params::Params;
use crate::scalar::Scalar;
use crate::stats::TdRecord;
use crate::subspaces::AllSteps;
use crate::symmetry::Symmetry;

/// Writes one table with a fixed column list, one row per step.
pub struct TableWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    fields: Vec<String>,
}

impl TableWriter {
    pub fn create(path: impl Into<PathBuf>, fields: Vec<String>) -> Result<Self, NrgError> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| NrgError::io(path.clone(), e))?;
        let mut writer = BufWriter::new(file);
        let header = fields.join(" ");
        writeln!(writer, "# {header}").map_err(|e| NrgError::io(path.clone(), e))?;
        Ok(Self {
            writer,
            path,
            fields,
        })
    }

    pub fn write_row(&mut self, record: &TdRecord) -> Result<(), NrgError> {
        let row = self
            .fields
            .iter()
            .map(|f| format!("{:.16e}", record.get(f)))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(self.writer, "{row}").map_err(|e| NrgError::io(self.path.clone(), e))?;
        self.writer
            .flush()
            .map_err(|e| NrgError::io(self.path.clone(), e))
    }
}

/// Writes the expectation values of the tracked operators, the label
/// (typically the temperature) in the first column.
pub struct ExpvWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    names: Vec<String>,
}

impl ExpvWriter {
    pub fn create(
        path: impl Into<PathBuf>,
        names: Vec<String>,
        label: &str,
    ) -> Result<Self, NrgError> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| NrgError::io(path.clone(), e))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# {label} {}", names.join(" "))
            .map_err(|e| NrgError::io(path.clone(), e))?;
        Ok(Self {
            writer,
            path,
            names,
        })
    }

    pub fn write_row<S: Scalar>(
        &mut self,
        label: f64,
        values: &BTreeMap<String, S>,
    ) -> Result<(), NrgError> {
        let mut row = format!("{label:.16e}");
        for name in &self.names {
            match values.get(name) {
                Some(v) => {
                    let c = v.as_c();
                    if c.im.abs() > 1e-13 * (1.0 + c.re.abs()) {
                        row.push_str(&format!(" {:.16e}+I{:.16e}", c.re, c.im));
                    } else {
                        row.push_str(&format!(" {:.16e}", c.re));
                    }
                }
                None => row.push_str(" nan"),
            }
        }
        writeln!(self.writer, "{row}").map_err(|e| NrgError::io(self.path.clone(), e))?;
        self.writer
            .flush()
            .map_err(|e| NrgError::io(self.path.clone(), e))
    }
}

/// Flow-diagram dump: the lowest excitations of each step with their
/// quantum numbers, optionally grouped by degeneracy.
pub struct Annotated {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
}

impl Annotated {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            writer: None,
            path: path.into(),
        }
    }

    pub fn dump<S: Scalar>(
        &mut self,
        diag: &DiagInfo<S>,
        sym: &dyn Symmetry<S>,
        p: &Params,
    ) -> Result<(), NrgError> {
        if p.dumpannotated == 0 {
            return Ok(());
        }
        if self.writer.is_none() {
            let file =
                File::create(&self.path).map_err(|e| NrgError::io(self.path.clone(), e))?;
            self.writer = Some(BufWriter::new(file));
        }
        let writer = self.writer.as_mut().expect("opened above");
        let mut levels: Vec<(f64, Invar)> = diag
            .iter()
            .flat_map(|(i, eig)| eig.value_zero.iter().map(|&e| (e, i.clone())))
            .collect();
        levels.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let mut len = levels.len().min(p.dumpannotated);
        // If the cut falls inside a degenerate cluster, dump the whole
        // cluster.
        while len > 0 && len < levels.len() && (levels[len].0 - levels[len - 1].0) < p.grouptol {
            len += 1;
        }
        let prec = p.dumpprecision;
        if p.dumpgroups {
            let mut k = 0;
            while k < len {
                let (e0, _) = levels[k];
                let mut labels = Vec::new();
                let mut degeneracy = 0usize;
                while k < len && (levels[k].0 - e0).abs() < p.grouptol {
                    labels.push(levels[k].1.to_string());
                    degeneracy += sym.mult(&levels[k].1);
                    k += 1;
                }
                labels.sort();
                let annot = labels
                    .iter()
                    .map(|l| format!("({l})"))
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(writer, "{e0:.prec$e} {annot} [{degeneracy}]")
                    .map_err(|e| NrgError::io(self.path.clone(), e))?;
            }
        } else {
            for (e, i) in levels.into_iter().take(len) {
                writeln!(writer, "{e:.prec$e} {i}")
                    .map_err(|e| NrgError::io(self.path.clone(), e))?;
            }
        }
        // Consecutive iterations are separated by an empty line.
        writeln!(writer).map_err(|e| NrgError::io(self.path.clone(), e))?;
        writer
            .flush()
            .map_err(|e| NrgError::io(self.path.clone(), e))
    }
}

/// Appends all shifted eigenvalues of the step to the energies dump.
pub fn dump_all_energies<S: Scalar>(
    writer: &mut BufWriter<File>,
    path: &Path,
    diag: &DiagInfo<S>,
    n: usize,
) -> Result<(), NrgError> {
    let io_err = |e| NrgError::io(path.to_path_buf(), e);
    writeln!(writer, "\n===== Iteration number: {n}").map_err(io_err)?;
    for (i, eig) in diag.iter() {
        writeln!(writer, "Subspace: {i}").map_err(io_err)?;
        for e in eig.value_zero.iter() {
            writeln!(writer, "{e:.16e}").map_err(io_err)?;
        }
    }
    writer.flush().map_err(io_err)
}

/// Dump of all subspaces with their dimension bookkeeping.
pub fn dump_subspaces(all_steps: &AllSteps, path: &Path) -> Result<(), NrgError> {
    let mut out = String::new();
    for n in all_steps.nall() {
        out.push_str(&format!("Iteration {n}\n"));
        out.push_str(&format!("len_dm={}\n", all_steps.at(n).len()));
        for (i, ds) in all_steps.at(n) {
            out.push_str(&format!("I={i} kept={} total={}\n", ds.kept, ds.total));
        }
        out.push('\n');
    }
    std::fs::write(path, out).map_err(|e| NrgError::io(path.to_path_buf(), e))
}

/// Dump of the absolute, ground-state-referenced energies of every step.
pub fn dump_absolute_energies(all_steps: &AllSteps, path: &Path) -> Result<(), NrgError> {
    let mut out = String::new();
    for n in all_steps.nall() {
        out.push_str(&format!("\n===== Iteration number: {n}\n"));
        for (i, ds) in all_steps.at(n) {
            out.push_str(&format!("Subspace: {i}\n"));
            for e in &ds.absenergy_g {
                out.push_str(&format!("{e:.16e}\n"));
            }
        }
    }
    std::fs::write(path, out).map_err(|e| NrgError::io(path.to_path_buf(), e))
}

/// Creates the completion flag file.
pub fn touch_done() -> Result<(), NrgError> {
    std::fs::write("DONE", "").map_err(|e| NrgError::io(PathBuf::from("DONE"), e))
}
