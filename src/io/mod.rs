//! Input parsing, binary persistence, and the output files.
//!
//! The `data` file is the hand-over point from the model preparation
//! front-end: a short ASCII header (channel count, per-channel operator
//! count, scalar kind on the third line, rescaling and absolute-mode flags,
//! symmetry type), then the initial subspaces with their eigenvalues, the
//! hopping-operator blocks, the named operator sets, and the chain
//! coefficient tables.
//!
//! The per-step blobs exchanged between the two passes are bincode
//! serializations behind buffered readers/writers; every failure carries
//! the offending path.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use ndarray::{Array1, Array2};
use serde::{de::DeserializeOwned, Serialize};

use crate::coef::Coef;
use crate::eigen::{DiagInfo, Eigen};
use crate::error::NrgError;
use crate::invar::Invar;
use crate::operators::{CustomOp, DensMatElements, IterInfo, MatrixElements, Opch};
use crate::params::{Params, Workdir};
use crate::scalar::{Matrix, Scalar};
use crate::symmetry::{make_symmetry, Symmetry};

pub mod output;

#[cfg(test)]
#[path = "io_tests.rs"]
mod io_tests;

// ---------------------------------------------------------------------------
// Binary blobs.
// ---------------------------------------------------------------------------

fn write_binary<T: Serialize>(path: &Path, value: &T) -> Result<(), NrgError> {
    let file = File::create(path).map_err(|e| NrgError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value).map_err(|e| {
        NrgError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        )
    })
}

fn read_binary<T: DeserializeOwned>(path: &Path) -> Result<T, NrgError> {
    let file = File::open(path).map_err(|e| NrgError::io(path, e))?;
    let mut reader = BufReader::new(file);
    bincode::deserialize_from(&mut reader).map_err(|e| {
        NrgError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        )
    })
}

/// Persists the transformation matrices of step `n`.
pub fn save_transformations<S: Scalar>(
    workdir: &Workdir,
    n: usize,
    diag: &DiagInfo<S>,
) -> Result<(), NrgError> {
    write_binary(&workdir.unitary_path(n), diag)
}

/// Loads the transformation matrices of step `n`, optionally deleting the
/// blob to bound disk usage.
pub fn load_transformations<S: Scalar>(
    workdir: &Workdir,
    n: usize,
    remove: bool,
) -> Result<DiagInfo<S>, NrgError> {
    let path = workdir.unitary_path(n);
    let diag = read_binary(&path)?;
    if remove {
        fs::remove_file(&path).map_err(|e| NrgError::io(path, e))?;
    }
    Ok(diag)
}

pub fn save_rho<S: Scalar>(
    workdir: &Workdir,
    n: usize,
    prefix: &str,
    rho: &DensMatElements<S>,
) -> Result<(), NrgError> {
    write_binary(&workdir.rho_path(n, prefix), rho)
}

pub fn load_rho<S: Scalar>(
    workdir: &Workdir,
    n: usize,
    prefix: &str,
    remove: bool,
) -> Result<DensMatElements<S>, NrgError> {
    let path = workdir.rho_path(n, prefix);
    let rho = read_binary(&path)?;
    if remove {
        fs::remove_file(&path).map_err(|e| NrgError::io(path, e))?;
    }
    Ok(rho)
}

// ---------------------------------------------------------------------------
// The `data` file.
// ---------------------------------------------------------------------------

/// Returns whether the data file requests the complex-valued engine: the
/// third header line carries the literal `COMPLEX`.
pub fn complex_data(path: &Path) -> Result<bool, NrgError> {
    let file = File::open(path).map_err(|e| NrgError::io(path, e))?;
    let third = BufReader::new(file)
        .lines()
        .filter_map(Result::ok)
        .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
        .nth(2)
        .ok_or_else(|| NrgError::CorruptInput("data file header is truncated".to_string()))?;
    Ok(third.contains("COMPLEX"))
}

/// Everything the data file supplies for one run.
pub struct InputData<S: Scalar> {
    pub diag0: DiagInfo<S>,
    pub iterinfo: IterInfo<S>,
    pub coef: Coef<S>,
    pub sym: Arc<dyn Symmetry<S>>,
}

struct Tokens {
    items: Vec<String>,
    cursor: usize,
}

impl Tokens {
    fn next(&mut self) -> Result<&str, NrgError> {
        let t = self
            .items
            .get(self.cursor)
            .ok_or_else(|| NrgError::CorruptInput("unexpected end of data file".to_string()))?;
        self.cursor += 1;
        Ok(t)
    }

    fn next_usize(&mut self) -> Result<usize, NrgError> {
        let t = self.next()?;
        t.parse()
            .map_err(|_| NrgError::CorruptInput(format!("expected a count, got `{t}`")))
    }

    fn next_i32(&mut self) -> Result<i32, NrgError> {
        let t = self.next()?;
        t.parse()
            .map_err(|_| NrgError::CorruptInput(format!("expected an integer, got `{t}`")))
    }

    fn next_f64(&mut self) -> Result<f64, NrgError> {
        let t = self.next()?;
        t.parse()
            .map_err(|_| NrgError::CorruptInput(format!("expected a number, got `{t}`")))
    }

    fn next_scalar<S: Scalar>(&mut self) -> Result<S, NrgError> {
        let t = self.next()?;
        let (re, im) = match t.split_once(',') {
            Some((re, im)) => (re, im),
            None => (t, "0"),
        };
        let re: f64 = re
            .parse()
            .map_err(|_| NrgError::CorruptInput(format!("expected a scalar, got `{t}`")))?;
        let im: f64 = im
            .parse()
            .map_err(|_| NrgError::CorruptInput(format!("expected a scalar, got `{t}`")))?;
        S::from_parts(re, im).ok_or_else(|| {
            NrgError::CorruptInput(format!("complex entry `{t}` in a real-mode data file"))
        })
    }

    fn next_invar(&mut self, arity: usize) -> Result<Invar, NrgError> {
        let mut qn = Vec::with_capacity(arity);
        for _ in 0..arity {
            qn.push(self.next_i32()?);
        }
        Ok(Invar::new(qn))
    }

    fn at_end(&self) -> bool {
        self.cursor >= self.items.len()
    }
}

fn header_value<'a>(line: &'a str, key: &str) -> Result<&'a str, NrgError> {
    line.strip_prefix(key)
        .map(str::trim)
        .ok_or_else(|| NrgError::CorruptInput(format!("expected header line `{key} ...`")))
}

fn read_matrix_block<S: Scalar>(tokens: &mut Tokens) -> Result<Matrix<S>, NrgError> {
    let rows = tokens.next_usize()?;
    let cols = tokens.next_usize()?;
    let mut m = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            m[(r, c)] = tokens.next_scalar()?;
        }
    }
    Ok(m)
}

fn read_matrix_elements<S: Scalar>(
    tokens: &mut Tokens,
    arity: usize,
) -> Result<MatrixElements<S>, NrgError> {
    let nf = tokens.next_usize()?;
    let mut me = MatrixElements::new();
    for _ in 0..nf {
        let i1 = tokens.next_invar(arity)?;
        let i2 = tokens.next_invar(arity)?;
        me.insert((i1, i2), read_matrix_block(tokens)?);
    }
    Ok(me)
}

fn read_coef_table<S: Scalar>(
    tokens: &mut Tokens,
    channels: usize,
) -> Result<Vec<Vec<S>>, NrgError> {
    let mut table = Vec::with_capacity(channels);
    for _ in 0..channels {
        let len = tokens.next_usize()?;
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(tokens.next_scalar()?);
        }
        table.push(values);
    }
    Ok(table)
}

/// Parses the data file and instantiates the symmetry it names. The
/// channel count, operator count, scalar mode and rescaling flags are
/// recorded into `p`.
pub fn read_data<S: Scalar>(path: &Path, p: &mut Params) -> Result<InputData<S>, NrgError> {
    let content = fs::read_to_string(path).map_err(|e| NrgError::io(path, e))?;
    let mut lines = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));
    let mut hdr = Vec::with_capacity(6);
    for _ in 0..6 {
        hdr.push(lines.next().ok_or_else(|| {
            NrgError::CorruptInput("data file header is truncated".to_string())
        })?);
    }
    p.channels = header_value(hdr[0], "channels")?
        .parse()
        .map_err(|_| NrgError::CorruptInput("malformed channel count".to_string()))?;
    p.perchannel = header_value(hdr[1], "perchannel")?
        .parse()
        .map_err(|_| NrgError::CorruptInput("malformed operator count".to_string()))?;
    let mode = hdr[2];
    match (mode, S::IS_COMPLEX) {
        ("REAL", false) | ("COMPLEX", true) => {}
        _ => {
            return Err(NrgError::CorruptInput(format!(
                "data file declares `{mode}` but the engine was instantiated otherwise"
            )))
        }
    }
    p.data_has_rescaled_energies = header_value(hdr[3], "rescaled")? == "1";
    p.absolute = header_value(hdr[4], "absolute")? == "1";
    p.symtype = header_value(hdr[5], "symtype")?.to_string();

    let sym = make_symmetry::<S>(&p.symtype, p.channels, p.substeps)?;
    p.combs = sym.nr_combs();
    let arity = sym.structure().arity();

    let mut tokens = Tokens {
        items: lines.flat_map(str::split_whitespace).map(String::from).collect(),
        cursor: 0,
    };

    let mut diag0 = DiagInfo::new();
    let mut iterinfo = IterInfo::default();
    iterinfo.opch = Opch::new(p.channels, p.perchannel);
    let mut coef = Coef::new();
    let mut seen_subspaces = false;

    while !tokens.at_end() {
        let section = tokens.next()?.to_string();
        match section.as_str() {
            "subspaces" => {
                let nsubs = tokens.next_usize()?;
                for _ in 0..nsubs {
                    let i = tokens.next_invar(arity)?;
                    let len = tokens.next_usize()?;
                    let mut energies = Array1::zeros(len);
                    for k in 0..len {
                        energies[k] = tokens.next_f64()?;
                    }
                    if !p.data_has_rescaled_energies && !p.absolute {
                        energies /= p.scale(p.ninit as i64);
                    }
                    diag0.insert(i, Eigen::diagonal(energies));
                }
                seen_subspaces = true;
            }
            "f" => {
                let ch = tokens.next_usize()?;
                let flavor = tokens.next_usize()?;
                if ch >= p.channels || flavor >= p.perchannel {
                    return Err(NrgError::CorruptInput(format!(
                        "hopping operator f {ch} {flavor} out of range"
                    )));
                }
                let me = read_matrix_elements(&mut tokens, arity)?;
                iterinfo.opch.set(ch, flavor, me);
            }
            "op" => {
                let kind = tokens.next()?.to_string();
                let name = tokens.next()?.to_string();
                let me = read_matrix_elements(&mut tokens, arity)?;
                let set: &mut CustomOp<S> = match kind.as_str() {
                    "s" => &mut iterinfo.ops,
                    "p" => &mut iterinfo.opsp,
                    "g" => &mut iterinfo.opsg,
                    "d" => &mut iterinfo.opd,
                    "t" => &mut iterinfo.opt,
                    "q" => &mut iterinfo.opq,
                    "ot" => &mut iterinfo.opot,
                    other => {
                        return Err(NrgError::CorruptInput(format!(
                            "unknown operator character `{other}`"
                        )))
                    }
                };
                set.insert(name, me);
            }
            "coef" => {
                let name = tokens.next()?.to_string();
                let table = read_coef_table(&mut tokens, p.channels)?;
                match name.as_str() {
                    "xi" => coef.xi.set(table),
                    "zeta" => coef.zeta.set(table),
                    "kappa" => coef.kappa.set(table),
                    "delta" => coef.delta.set(table),
                    "xiUP" => coef.xi_up.set(table),
                    "xiDOWN" => coef.xi_down.set(table),
                    "zetaUP" => coef.zeta_up.set(table),
                    "zetaDOWN" => coef.zeta_down.set(table),
                    other => {
                        return Err(NrgError::CorruptInput(format!(
                            "unknown coefficient table `{other}`"
                        )))
                    }
                }
            }
            "end" => break,
            other => {
                return Err(NrgError::CorruptInput(format!(
                    "unknown data-file section `{other}`"
                )))
            }
        }
    }
    if !seen_subspaces || diag0.is_empty() {
        return Err(NrgError::CorruptInput(
            "data file declares no subspaces".to_string(),
        ));
    }
    p.polarized = !coef.xi_up.is_empty() || !coef.zeta_up.is_empty();
    Ok(InputData {
        diag0,
        iterinfo,
        coef,
        sym,
    })
}
