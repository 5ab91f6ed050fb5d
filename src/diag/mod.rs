//! Hamiltonian assembly and parallel block diagonalization.
//!
//! Each invariant subspace of the upcoming shell is an independent task:
//! assemble the dense symmetric (or Hermitian) matrix from the previous
//! step's spectra, the hopping operator blocks and the chain coefficients,
//! then diagonalize it. Two interchangeable dispatch backends exist, a
//! shared-memory fan-out and a message-passing scheduler; the choice is made
//! once at startup.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh, UPLO};
use rayon::prelude::*;

use crate::coef::Coef;
use crate::eigen::{DiagInfo, Eigen};
use crate::error::NrgError;
use crate::invar::Invar;
use crate::operators::Opch;
use crate::params::Params;
use crate::scalar::{Matrix, Scalar};
use crate::step::Step;
use crate::subspaces::SubspaceDimensions;
use crate::symmetry::Symmetry;

#[cfg(test)]
#[path = "diag_tests.rs"]
mod diag_tests;

/// Parameters handed to every diagonalization task.
#[derive(Clone, Copy, Debug)]
pub struct DiagParams {
    /// Fraction of eigenpairs to retain from each decomposition.
    pub diagratio: f64,
}

impl DiagParams {
    pub fn new(diagratio: f64) -> Self {
        Self { diagratio }
    }
}

/// Everything an assembly-plus-diagonalization task needs to read.
pub struct DiagContext<'a, S: Scalar> {
    pub step: &'a Step<'a>,
    pub opch: &'a Opch<S>,
    pub coef: &'a Coef<S>,
    pub diagprev: &'a DiagInfo<S>,
    pub sym: &'a dyn Symmetry<S>,
    pub p: &'a Params,
}

/// Builds the block Hamiltonian of subspace `i`: the rescaled previous
/// eigenvalues on the diagonal, then the symmetry-specific hopping and
/// on-site couplings.
pub fn build_hamiltonian<S: Scalar>(ctx: &DiagContext<'_, S>, i: &Invar) -> Matrix<S> {
    let anc = ctx.sym.ancestors(i);
    let rm = SubspaceDimensions::new(i, &anc, ctx.diagprev, ctx.sym);
    let dim = rm.total();
    let mut h: Matrix<S> = Array2::zeros((dim, dim));
    let scalefactor = ctx.p.nrg_step_scale_factor();
    for c in 0..rm.combs() {
        if !rm.exists(c) {
            continue;
        }
        let prev = ctx
            .diagprev
            .get(&anc[c])
            .expect("a nonzero combination implies a previous-step subspace");
        let offset = rm.offset(c);
        for r in 0..rm.rmax(c) {
            h[(offset + r, offset + r)] = S::from_real(scalefactor * prev.value_zero[r]);
        }
    }
    ctx.sym
        .make_matrix(&mut h, ctx.step, &rm, i, &anc, ctx.opch, ctx.coef);
    h
}

/// Decomposes one symmetric/Hermitian matrix into an ascending eigenspectrum
/// with eigenvectors stored as rows.
///
/// `diagratio < 1` keeps only the leading fraction of eigenpairs, emulating
/// a range-limited solver; the truncation loop retries with a larger ratio
/// when that turns out to be insufficient.
pub fn diagonalise<S: Scalar>(h: Matrix<S>, dp: &DiagParams) -> Result<Eigen<S>, NrgError> {
    let dim = h.nrows();
    debug_assert_eq!(dim, h.ncols());
    let (values, vectors) = h
        .eigh(UPLO::Lower)
        .map_err(|e| NrgError::ToleranceViolation(format!("eigendecomposition failed: {e}")))?;
    let nr = if dp.diagratio < 1.0 {
        ((dim as f64 * dp.diagratio).ceil() as usize).clamp(1, dim)
    } else {
        dim
    };
    // LAPACK returns eigenvectors in columns; re-pack the leading `nr` of
    // them as rows.
    let mut rows: Matrix<S> = Array2::zeros((nr, dim));
    for k in 0..nr {
        for a in 0..dim {
            rows[(k, a)] = vectors[(a, k)];
        }
    }
    let vals: Array1<f64> = values.iter().take(nr).copied().collect();
    debug_assert!(vals.windows(2).into_iter().all(|w| w[0] <= w[1]));
    Ok(Eigen::new(vals, rows))
}

/// Dispatch strategy turning a task list into the new step's spectra.
pub trait DiagonalizerBackend<S: Scalar>: Send + Sync {
    fn diagonalize(
        &self,
        ctx: &DiagContext<'_, S>,
        tasks: &[Invar],
        dp: &DiagParams,
    ) -> Result<DiagInfo<S>, NrgError>;

    fn name(&self) -> &'static str;
}

/// Selects the backend requested by the parameter file.
pub fn make_backend<S: Scalar>(p: &Params) -> Box<dyn DiagonalizerBackend<S>> {
    let workers = if p.diagth > 0 {
        p.diagth
    } else {
        num_cpus::get()
    };
    if p.diag_mode == "MPI" {
        Box::new(MessagePassingDiag { workers })
    } else {
        Box::new(SharedMemoryDiag { workers })
    }
}

/// Shared-memory fan-out: a worker pool consumes the size-ordered task list
/// and inserts results under a short critical section.
pub struct SharedMemoryDiag {
    pub workers: usize,
}

impl<S: Scalar> DiagonalizerBackend<S> for SharedMemoryDiag {
    fn diagonalize(
        &self,
        ctx: &DiagContext<'_, S>,
        tasks: &[Invar],
        dp: &DiagParams,
    ) -> Result<DiagInfo<S>, NrgError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .map_err(|e| NrgError::CommunicationFailure(format!("thread pool: {e}")))?;
        let results: Mutex<DiagInfo<S>> = Mutex::new(DiagInfo::new());
        pool.install(|| {
            tasks.par_iter().try_for_each(|i| -> Result<(), NrgError> {
                let h = build_hamiltonian(ctx, i);
                log::debug!("diagonalizing {} (dim={})", i, h.nrows());
                let eig = diagonalise(h, dp)?;
                results
                    .lock()
                    .map_err(|_| {
                        NrgError::CommunicationFailure("poisoned result lock".to_string())
                    })?
                    .insert(i.clone(), eig);
                Ok(())
            })
        })?;
        results
            .into_inner()
            .map_err(|_| NrgError::CommunicationFailure("poisoned result lock".to_string()))
    }

    fn name(&self) -> &'static str {
        "shared-memory"
    }
}

/// Tag alphabet of the message-passing backend. Matrices travel row by row
/// so that no single message ever approaches transport limits.
enum Message<S> {
    Exit,
    SyncParams(DiagParams),
    DiagReal,
    DiagCmpl,
    MatrixSize { rows: usize, cols: usize },
    MatrixRow(Vec<S>),
    TaskInvar(Invar),
}

/// Worker replies: the eigenvalues, then the eigenvector rows, then the
/// subspace label that identifies the completed task.
enum Reply<S> {
    EigenVal { worker: usize, values: Vec<f64> },
    EigenRow(Vec<S>),
    TaskInvar(Invar),
}

/// Message-passing fan-out: a root scheduler ships matrices to worker
/// threads over typed channels, largest task to the least-loaded worker,
/// and runs a single residual task locally to save a round trip.
pub struct MessagePassingDiag {
    pub workers: usize,
}

impl MessagePassingDiag {
    fn send_matrix<S: Scalar>(
        tx: &Sender<Message<S>>,
        h: &Matrix<S>,
    ) -> Result<(), NrgError> {
        let send = |m| {
            tx.send(m)
                .map_err(|_| NrgError::CommunicationFailure("worker hung up".to_string()))
        };
        send(Message::MatrixSize {
            rows: h.nrows(),
            cols: h.ncols(),
        })?;
        for row in h.rows() {
            send(Message::MatrixRow(row.to_vec()))?;
        }
        Ok(())
    }

    fn receive_matrix<S: Scalar>(
        rx: &Receiver<Message<S>>,
        rows: usize,
        cols: usize,
    ) -> Result<Matrix<S>, NrgError> {
        let mut h: Matrix<S> = Array2::zeros((rows, cols));
        for r in 0..rows {
            match rx.recv() {
                Ok(Message::MatrixRow(row)) if row.len() == cols => {
                    for (c, v) in row.into_iter().enumerate() {
                        h[(r, c)] = v;
                    }
                }
                _ => {
                    return Err(NrgError::CommunicationFailure(
                        "matrix row stream interrupted".to_string(),
                    ))
                }
            }
        }
        Ok(h)
    }

    /// Worker loop: serve diagonalization requests until told to exit.
    fn worker_loop<S: Scalar>(
        id: usize,
        rx: Receiver<Message<S>>,
        tx: Sender<Reply<S>>,
    ) {
        let mut dp = DiagParams { diagratio: 1.0 };
        loop {
            match rx.recv() {
                Ok(Message::Exit) | Err(_) => break,
                Ok(Message::SyncParams(p)) => dp = p,
                Ok(Message::DiagReal) | Ok(Message::DiagCmpl) => {
                    let result = (|| -> Result<(), NrgError> {
                        let (rows, cols) = match rx.recv() {
                            Ok(Message::MatrixSize { rows, cols }) => (rows, cols),
                            _ => {
                                return Err(NrgError::CommunicationFailure(
                                    "expected a matrix size".to_string(),
                                ))
                            }
                        };
                        let h = Self::receive_matrix(&rx, rows, cols)?;
                        let i = match rx.recv() {
                            Ok(Message::TaskInvar(i)) => i,
                            _ => {
                                return Err(NrgError::CommunicationFailure(
                                    "expected a task label".to_string(),
                                ))
                            }
                        };
                        let eig = diagonalise(h, &dp)?;
                        let send = |m| {
                            tx.send(m).map_err(|_| {
                                NrgError::CommunicationFailure("root hung up".to_string())
                            })
                        };
                        send(Reply::EigenVal {
                            worker: id,
                            values: eig.value_orig.to_vec(),
                        })?;
                        for row in eig.vectors.rows() {
                            send(Reply::EigenRow(row.to_vec()))?;
                        }
                        send(Reply::TaskInvar(i))?;
                        Ok(())
                    })();
                    if let Err(e) = result {
                        log::error!("worker {id}: {e}");
                        break;
                    }
                }
                Ok(_) => {
                    log::error!("worker {id}: unexpected message");
                    break;
                }
            }
        }
    }

    /// Reassembles one completed task from the reply stream.
    fn read_result<S: Scalar>(
        rx: &Receiver<Reply<S>>,
    ) -> Result<(usize, Invar, Eigen<S>), NrgError> {
        let comm = |msg: &str| NrgError::CommunicationFailure(msg.to_string());
        let (worker, values) = match rx.recv() {
            Ok(Reply::EigenVal { worker, values }) => (worker, values),
            _ => return Err(comm("expected eigenvalues")),
        };
        let nr = values.len();
        let mut rows: Vec<Vec<S>> = Vec::with_capacity(nr);
        for _ in 0..nr {
            match rx.recv() {
                Ok(Reply::EigenRow(row)) => rows.push(row),
                _ => return Err(comm("eigenvector stream interrupted")),
            }
        }
        let i = match rx.recv() {
            Ok(Reply::TaskInvar(i)) => i,
            _ => return Err(comm("expected a task label")),
        };
        let dim = rows.first().map_or(0, Vec::len);
        let mut vectors: Matrix<S> = Array2::zeros((nr, dim));
        for (r, row) in rows.into_iter().enumerate() {
            if row.len() != dim {
                return Err(comm("ragged eigenvector rows"));
            }
            for (c, v) in row.into_iter().enumerate() {
                vectors[(r, c)] = v;
            }
        }
        Ok((worker, i, Eigen::new(Array1::from_vec(values), vectors)))
    }
}

impl<S: Scalar> DiagonalizerBackend<S> for MessagePassingDiag {
    fn diagonalize(
        &self,
        ctx: &DiagContext<'_, S>,
        tasks: &[Invar],
        dp: &DiagParams,
    ) -> Result<DiagInfo<S>, NrgError> {
        let mut diagnew = DiagInfo::new();
        let nr_workers = self.workers.max(1);
        let (reply_tx, reply_rx) = channel::unbounded::<Reply<S>>();
        thread::scope(|scope| -> Result<(), NrgError> {
            // The senders live inside the scope: dropping them on an error
            // path disconnects the workers, which then exit and join.
            let mut work_tx: Vec<Sender<Message<S>>> = Vec::with_capacity(nr_workers);
            for id in 0..nr_workers {
                let (tx, rx) = channel::unbounded::<Message<S>>();
                let reply = reply_tx.clone();
                scope.spawn(move || Self::worker_loop(id, rx, reply));
                work_tx.push(tx);
            }
            // Advertise the run parameters to every worker.
            for tx in &work_tx {
                tx.send(Message::SyncParams(*dp))
                    .map_err(|_| NrgError::CommunicationFailure("worker hung up".to_string()))?;
            }
            // Tasks arrive sorted largest first; keep a queue of idle
            // workers and hand the longest remaining job to the next one.
            let mut todo: VecDeque<&Invar> = tasks.iter().collect();
            let mut idle: VecDeque<usize> = (0..nr_workers).collect();
            let mut outstanding = 0usize;
            while let Some(&i) = todo.front() {
                if todo.len() == 1 && outstanding == 0 {
                    // A single residual task is cheaper on the root than on
                    // the network.
                    todo.pop_front();
                    let h = build_hamiltonian(ctx, i);
                    diagnew.insert(i.clone(), diagonalise(h, dp)?);
                    break;
                }
                let worker = match idle.pop_front() {
                    Some(w) => w,
                    None => {
                        let (w, inv, eig) = Self::read_result(&reply_rx)?;
                        outstanding -= 1;
                        diagnew.insert(inv, eig);
                        w
                    }
                };
                todo.pop_front();
                let h = build_hamiltonian(ctx, i);
                log::debug!("scheduling {} (dim={}) on worker {}", i, h.nrows(), worker);
                let tx = &work_tx[worker];
                let announce = if S::IS_COMPLEX {
                    Message::DiagCmpl
                } else {
                    Message::DiagReal
                };
                tx.send(announce)
                    .map_err(|_| NrgError::CommunicationFailure("worker hung up".to_string()))?;
                Self::send_matrix(tx, &h)?;
                tx.send(Message::TaskInvar(i.clone()))
                    .map_err(|_| NrgError::CommunicationFailure("worker hung up".to_string()))?;
                outstanding += 1;
            }
            // Drain the remaining completions, then dismiss the workers.
            while outstanding > 0 {
                let (_, inv, eig) = Self::read_result(&reply_rx)?;
                outstanding -= 1;
                diagnew.insert(inv, eig);
            }
            for tx in &work_tx {
                let _ = tx.send(Message::Exit);
            }
            Ok(())
        })?;
        Ok(diagnew)
    }

    fn name(&self) -> &'static str {
        "message-passing"
    }
}
