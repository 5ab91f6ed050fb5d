//! End-to-end run in the Sz-resolved (QSZ) basis with FDM thermodynamics
//! and spin-resolved spectral functions.

use std::fs;
use std::path::Path;

use renorm::nrg::run_calculation;

/// Symmetric Anderson impurity in the QSZ basis. The doublet operator
/// carries both spin directions in one block set; the `check_spin` guard
/// separates them into the `-u`/`-d` spectra.
fn data_file(nmax: usize) -> String {
    let mut data = String::from(
        "# single-impurity Anderson model, QSZ basis\n\
         channels 1\n\
         perchannel 2\n\
         REAL\n\
         rescaled 1\n\
         absolute 0\n\
         symtype QSZ\n\
         subspaces 4\n\
         -1 0\n\
         1 0.0\n\
         0 1\n\
         1 -0.5\n\
         0 -1\n\
         1 -0.5\n\
         1 0\n\
         1 0.0\n\
         f 0 0\n\
         2\n\
         0 1 -1 0\n\
         1 1\n\
         1.0\n\
         1 0 0 -1\n\
         1 1\n\
         1.0\n\
         f 0 1\n\
         2\n\
         0 -1 -1 0\n\
         1 1\n\
         1.0\n\
         1 0 0 1\n\
         1 1\n\
         -1.0\n\
         op d A_d\n\
         4\n\
         0 1 -1 0\n\
         1 1\n\
         1.0\n\
         1 0 0 -1\n\
         1 1\n\
         1.0\n\
         0 -1 -1 0\n\
         1 1\n\
         1.0\n\
         1 0 0 1\n\
         1 1\n\
         -1.0\n\
         op s n_d\n\
         4\n\
         -1 0 -1 0\n\
         1 1\n\
         0.0\n\
         0 1 0 1\n\
         1 1\n\
         1.0\n\
         0 -1 0 -1\n\
         1 1\n\
         1.0\n\
         1 0 1 0\n\
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

#[test]
fn test_qsz_fdm_thermodynamics_and_spin_resolved_spectra() {
    let dir = tempfile::TempDir::with_prefix("renorm-test.").expect("scratch directory");
    let root = dir.path().to_path_buf();
    let param = "param:\n\
         \x20 lambda: 3.0\n\
         \x20 nmax: 5\n\
         \x20 keep: 80\n\
         \x20 T: 1.0e-3\n\
         \x20 bins: 100\n\
         \x20 emin: 1.0e-10\n\
         \x20 dm: true\n\
         \x20 fdm: true\n\
         \x20 specd: \"A_d-A_d-u A_d-A_d-d\"\n";
    fs::write(root.join("param"), param).expect("writable");
    fs::write(root.join("data"), data_file(5)).expect("writable");
    std::env::set_var("NRG_WORKDIR", &root);
    std::env::set_current_dir(&root).expect("chdir");
    run_calculation(&root.join("param"), &root.join("data")).expect("calculation succeeds");

    assert!(root.join("DONE").exists());

    // FDM thermodynamics referenced to the absolute ground state.
    let tdfdm = parse_table(&root.join("tdfdm"));
    assert_eq!(tdfdm.len(), 1);
    let (z_fdm, c_fdm, s_fdm) = (tdfdm[0][1], tdfdm[0][4], tdfdm[0][5]);
    assert!(z_fdm > 0.0, "Z_fdm = {z_fdm}");
    assert!(c_fdm >= -1e-10, "C_fdm = {c_fdm}");
    assert!(s_fdm >= -1e-10, "S_fdm = {s_fdm}");

    // Per-step thermodynamics: ⟨Sz⟩ of the unpolarized model vanishes.
    let td = parse_table(&root.join("td"));
    for row in &td {
        assert!(row[6].abs() < 1e-10, "⟨Sz⟩ = {}", row[6]);
    }

    // Both spin-resolved FDM spectra exist, carry unit weight, and agree
    // with each other in the absence of a field.
    let up = parse_table(&root.join("spec_FDM_dens_A_d-A_d-u.dat"));
    let down = parse_table(&root.join("spec_FDM_dens_A_d-A_d-d.dat"));
    let wu: f64 = up.iter().map(|r| r[1]).sum();
    let wd: f64 = down.iter().map(|r| r[1]).sum();
    assert!((wu - 1.0).abs() < 0.01, "up-spin weight {wu}");
    assert!((wd - 1.0).abs() < 0.01, "down-spin weight {wd}");
    assert_eq!(up.len(), down.len());
    for (ru, rd) in up.iter().zip(down.iter()) {
        assert!((ru[1] - rd[1]).abs() < 1e-8);
    }
}
