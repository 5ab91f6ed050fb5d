use std::io::Write;

use approx::assert_relative_eq;
use ndarray::array;

use crate::eigen::{DiagInfo, Eigen};
use crate::invar::Invar;
use crate::io::{complex_data, load_rho, load_transformations, read_data, save_rho,
    save_transformations};
use crate::operators::DensMatElements;
use crate::params::{Params, Workdir, FN_RHO};

const DATA: &str = "\
# sample input for a single Anderson impurity, QS basis
channels 1
perchannel 1
REAL
rescaled 1
absolute 0
symtype QS
subspaces 3
-1 1
1 0.0
0 2
1 -0.5
1 1
1 0.25
f 0 0
2
0 2 -1 1
1 1
1.0
1 1 0 2
1 1
-1.4142135623730951
op d A_d
2
0 2 -1 1
1 1
1.0
1 1 0 2
1 1
-1.4142135623730951
op s n_d
3
-1 1 -1 1
1 1
0.0
0 2 0 2
1 1
1.0
1 1 1 1
1 1
2.0
coef xi
3 1.0 0.5 0.25
coef zeta
4 0.0 0.0 0.0 0.0
end
";

fn write_data(content: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("temp file");
    f.write_all(content.as_bytes()).expect("writable");
    f
}

#[test]
fn test_io_complex_detection() {
    let real = write_data(DATA);
    assert!(!complex_data(real.path()).expect("readable"));
    let complex = write_data(&DATA.replace("REAL", "COMPLEX"));
    assert!(complex_data(complex.path()).expect("readable"));
}

#[test]
fn test_io_read_data() {
    let f = write_data(DATA);
    let mut p = Params::default();
    let input = read_data::<f64>(f.path(), &mut p).expect("well-formed data");
    assert_eq!(p.channels, 1);
    assert_eq!(p.perchannel, 1);
    assert_eq!(p.symtype, "QS");
    assert!(p.data_has_rescaled_energies);
    assert_eq!(input.diag0.len(), 3);
    let eig = input
        .diag0
        .get(&Invar::new(vec![0, 2]))
        .expect("declared subspace");
    assert_relative_eq!(eig.value_orig[0], -0.5);
    assert_eq!(input.iterinfo.opch.nr_channels(), 1);
    assert!(input
        .iterinfo
        .opch
        .get(0, 0)
        .contains(&(Invar::new(vec![0, 2]), Invar::new(vec![-1, 1]))));
    assert!(input.iterinfo.opd.get("A_d").is_some());
    assert!(input.iterinfo.ops.get("n_d").is_some());
    assert_relative_eq!(input.coef.xi(1, 0), 0.5);
    assert_eq!(input.sym.nr_combs(), 4);
}

#[test]
fn test_io_rejects_wrong_scalar_mode() {
    let f = write_data(&DATA.replace("REAL", "COMPLEX"));
    let mut p = Params::default();
    assert!(read_data::<f64>(f.path(), &mut p).is_err());
}

#[test]
fn test_io_rejects_unknown_symmetry() {
    let f = write_data(&DATA.replace("symtype QS", "symtype SU17"));
    let mut p = Params::default();
    assert!(read_data::<f64>(f.path(), &mut p).is_err());
}

#[test]
fn test_io_blob_roundtrip() {
    std::env::set_var("NRG_WORKDIR", std::env::temp_dir());
    let workdir = Workdir::new().expect("scratch directory");

    let mut diag: DiagInfo<f64> = DiagInfo::new();
    let mut eig = Eigen::diagonal(array![0.0, 0.75]);
    eig.subtract_egs(0.0);
    eig.absenergy = vec![1.0, 1.75];
    eig.absenergy_g = vec![0.0, 0.75];
    eig.absenergy_n = vec![0.0, 0.75];
    eig.truncate_prepare(1);
    diag.insert(Invar::new(vec![0, 2]), eig);
    save_transformations(&workdir, 3, &diag).expect("writable");
    let loaded: DiagInfo<f64> = load_transformations(&workdir, 3, true).expect("readable");
    let orig = diag.get(&Invar::new(vec![0, 2])).expect("subspace");
    let back = loaded.get(&Invar::new(vec![0, 2])).expect("subspace");
    assert_eq!(orig.value_orig, back.value_orig);
    assert_eq!(orig.absenergy, back.absenergy);
    assert_eq!(orig.nr_kept(), back.nr_kept());
    // The blob was consumed.
    assert!(load_transformations::<f64>(&workdir, 3, false).is_err());

    let mut rho: DensMatElements<f64> = DensMatElements::new();
    rho.insert(Invar::new(vec![0, 2]), array![[0.5, 0.0], [0.0, 0.5]]);
    save_rho(&workdir, 0, FN_RHO, &rho).expect("writable");
    let rho2: DensMatElements<f64> = load_rho(&workdir, 0, FN_RHO, false).expect("readable");
    assert_eq!(
        rho.get(&Invar::new(vec![0, 2])),
        rho2.get(&Invar::new(vec![0, 2]))
    );
}
