//! End-to-end runs of the single-impurity Anderson model in the QS basis.
//!
//! Each test executes the full two-pass calculation inside its own scratch
//! directory and inspects the output files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use renorm::nrg::run_calculation;

/// The process-wide working directory is shared by all tests in this file.
static CWD_LOCK: Mutex<()> = Mutex::new(());

/// Symmetric Anderson impurity (U = 1, eps = -U/2) coupled to a flat band,
/// expressed in the engine's own matrix-element convention. Chain
/// coefficients are in rescaled units.
fn data_file(nmax: usize) -> String {
    let mut data = String::from(
        "# single-impurity Anderson model, QS basis\n\
         channels 1\n\
         perchannel 1\n\
         REAL\n\
         rescaled 1\n\
         absolute 0\n\
         symtype QS\n\
         subspaces 3\n\
         -1 1\n\
         1 0.0\n\
         0 2\n\
         1 -0.5\n\
         1 1\n\
         1 0.0\n\
         f 0 0\n\
         2\n\
         0 2 -1 1\n\
         1 1\n\
         1.0\n\
         1 1 0 2\n\
         1 1\n\
         -1.4142135623730951\n\
         op d A_d\n\
         2\n\
         0 2 -1 1\n\
         1 1\n\
         1.0\n\
         1 1 0 2\n\
         1 1\n\
         -1.4142135623730951\n\
         op s n_d\n\
         3\n\
         -1 1 -1 1\n\
         1 1\n\
         0.0\n\
         0 2 0 2\n\
         1 1\n\
         1.0\n\
         1 1 1 1\n\
         1 1\n\
         2.0\n",
    );
    data.push_str("coef xi\n");
    let nxi = nmax.max(1);
    data.push_str(&format!("{nxi} 0.5"));
    for _ in 1..nxi {
        data.push_str(" 1.0");
    }
    data.push('\n');
    data.push_str("coef zeta\n");
    data.push_str(&format!("{}", nmax + 1));
    for _ in 0..=nmax {
        data.push_str(" 0.0");
    }
    data.push('\n');
    data.push_str("end\n");
    data
}

fn param_file(extra: &str) -> String {
    format!(
        "param:\n\
         \x20 lambda: 3.0\n\
         \x20 nmax: 6\n\
         \x20 keep: 100\n\
         \x20 T: 1.0e-3\n\
         \x20 betabar: 1.0\n\
         \x20 bins: 100\n\
         \x20 emin: 1.0e-10\n\
         \x20 emax: 10.0\n\
         {extra}"
    )
}

/// Sets up a scratch directory, writes the inputs, runs the calculation.
fn run_in_tempdir(param: &str, data: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::with_prefix("renorm-test.").expect("scratch directory");
    let root = dir.path().to_path_buf();
    fs::write(root.join("param"), param).expect("writable");
    fs::write(root.join("data"), data).expect("writable");
    std::env::set_var("NRG_WORKDIR", &root);
    std::env::set_current_dir(&root).expect("chdir");
    run_calculation(&root.join("param"), &root.join("data")).expect("calculation succeeds");
    (dir, root)
}

fn parse_table(path: &Path) -> Vec<Vec<f64>> {
    fs::read_to_string(path)
        .unwrap_or_else(|_| panic!("missing output file {}", path.display()))
        .lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .map(|l| {
            l.split_whitespace()
                .map(|t| t.parse::<f64>().expect("numeric table entry"))
                .collect()
        })
        .collect()
}

fn spectral_weight(path: &Path) -> f64 {
    parse_table(path).iter().map(|row| row[1]).sum()
}

#[test]
fn test_full_two_pass_run_with_fdm_and_cfs() {
    let _guard = CWD_LOCK.lock().expect("cwd lock");
    let param = param_file(
        "\x20 dm: true\n\
         \x20 fdm: true\n\
         \x20 cfs: true\n\
         \x20 dmnrg: true\n\
         \x20 finite: true\n\
         \x20 fdmexpv: true\n\
         \x20 fdmexpvn: 0\n\
         \x20 specd: \"A_d-A_d\"\n\
         \x20 specs: \"n_d-n_d\"\n",
    );
    let (_dir, root) = run_in_tempdir(&param, &data_file(6));

    // Completion flag and the thermodynamic tables.
    assert!(root.join("DONE").exists());
    let td = parse_table(&root.join("td"));
    // One row before the iteration plus one per step.
    assert_eq!(td.len(), 7);
    // Z > 0 at every step translates into finite F = -ln Z.
    assert!(td.iter().all(|row| row[4].is_finite()));
    // The entropy of the decoupled spectrum starts near ln 4 + ln 2 and
    // stays positive.
    assert!(td.iter().all(|row| row[5] > 0.0));

    let tdfdm = parse_table(&root.join("tdfdm"));
    assert_eq!(tdfdm.len(), 1);
    // Z_fdm ≥ exp(-GS/T) > 0 and S_fdm ≥ 0.
    assert!(tdfdm[0][1] > 0.0);
    assert!(tdfdm[0][5] >= -1e-12);

    // Expectation values: ⟨n_d⟩ of the symmetric model stays at one.
    let custom = parse_table(&root.join("custom"));
    assert_eq!(custom.len(), 7);
    for row in &custom {
        assert!((row[1] - 1.0).abs() < 1e-6, "⟨n_d⟩ = {}", row[1]);
    }
    assert!(root.join("customfdm").exists());

    // Spectral functions: the CFS and FDM sum rules hold within 1%, and
    // the positive-frequency branch is non-negative.
    for algo in ["CFS", "FDM"] {
        let path = root.join(format!("spec_{algo}_dens_A_d-A_d.dat"));
        let weight = spectral_weight(&path);
        assert!(
            (weight - 1.0).abs() < 0.01,
            "{algo} integrated weight {weight}"
        );
        assert!(parse_table(&path).iter().all(|row| row[1] > -1e-10));
    }
    assert!(root.join("spec_FT_dens_A_d-A_d.dat").exists());
    assert!(root.join("spec_DMNRG_dens_A_d-A_d.dat").exists());
    assert!(root.join("corr_FT_dens_n_d-n_d.dat").exists());
    assert!(root.join("energies.nrg").exists());
}

#[test]
fn test_backend_equivalence() {
    let _guard = CWD_LOCK.lock().expect("cwd lock");
    let base = param_file("\x20 finite: true\n\x20 specd: \"A_d-A_d\"\n");
    let (_dir1, root1) = run_in_tempdir(&base, &data_file(6));
    let td1 = parse_table(&root1.join("td"));
    let energies1 = fs::read_to_string(root1.join("energies.nrg")).expect("energies dump");

    let mp = param_file(
        "\x20 finite: true\n\
         \x20 specd: \"A_d-A_d\"\n\
         \x20 diag_mode: \"MPI\"\n\
         \x20 diagth: 3\n",
    );
    let (_dir2, root2) = run_in_tempdir(&mp, &data_file(6));
    let td2 = parse_table(&root2.join("td"));
    let energies2 = fs::read_to_string(root2.join("energies.nrg")).expect("energies dump");

    assert_eq!(td1.len(), td2.len());
    for (r1, r2) in td1.iter().zip(td2.iter()) {
        for (a, b) in r1.iter().zip(r2.iter()) {
            assert!((a - b).abs() <= 1e-10 * (1.0 + a.abs()), "{a} vs {b}");
        }
    }
    assert_eq!(energies1, energies2);
}

#[test]
fn test_zero_bandwidth_run() {
    let _guard = CWD_LOCK.lock().expect("cwd lock");
    let param = "param:\n\
         \x20 lambda: 3.0\n\
         \x20 nmax: 0\n\
         \x20 keep: 100\n\
         \x20 T: 1.0e-3\n"
        .to_string();
    let (_dir, root) = run_in_tempdir(&param, &data_file(0));
    assert!(root.join("DONE").exists());
    let td = parse_table(&root.join("td"));
    assert_eq!(td.len(), 1);
    // Four impurity levels with the doublet 0.5 below the others at
    // betabar = 1: S = β⟨E⟩ + ln Z with Z = 2 + 2e^(-1/2).
    let z = 2.0 + 2.0 * (-0.5_f64).exp();
    let expected_s = 0.5 * 2.0 * (-0.5_f64).exp() / z + z.ln();
    assert!((td[0][5] - expected_s).abs() < 1e-8, "S = {}", td[0][5]);
}

#[test]
fn test_restart_reproduces_full_diagonalization() {
    let _guard = CWD_LOCK.lock().expect("cwd lock");
    let full = param_file("\x20 keepenergy: 8.0\n");
    let (_dir1, root1) = run_in_tempdir(&full, &data_file(6));
    let td_full = parse_table(&root1.join("td"));

    let partial = param_file(
        "\x20 keepenergy: 8.0\n\
         \x20 diagratio: 0.1\n\
         \x20 restartfactor: 2.0\n",
    );
    let (_dir2, root2) = run_in_tempdir(&partial, &data_file(6));
    let td_partial = parse_table(&root2.join("td"));

    assert_eq!(td_full.len(), td_partial.len());
    for (r1, r2) in td_full.iter().zip(td_partial.iter()) {
        for (a, b) in r1.iter().zip(r2.iter()) {
            assert!((a - b).abs() <= 1e-9 * (1.0 + a.abs()), "{a} vs {b}");
        }
    }
}
