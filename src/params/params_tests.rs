use approx::assert_relative_eq;

use crate::params::{ParamFile, Params, Strategy};

#[test]
fn test_params_defaults_from_empty_section() {
    let pf: ParamFile = serde_yaml::from_str("param: {}\n").expect("parseable");
    let p = pf.param;
    assert_eq!(p.keep, 100);
    assert_eq!(p.strategy, Strategy::Kept);
    assert!(!p.dm);
    assert!(p.restart);
    assert_relative_eq!(p.restartfactor, 2.0);
}

#[test]
fn test_params_parse_and_validate() {
    let text = r#"
param:
  lambda: 3.0
  nmax: 10
  keep: 500
  T: 1.0e-8
  dm: true
  fdm: true
  specd: "A_d-A_d"
  strategy: all
"#;
    let pf: ParamFile = serde_yaml::from_str(text).expect("parseable");
    let p = pf.param;
    assert_relative_eq!(p.lambda, 3.0);
    assert_eq!(p.nmax, 10);
    assert_eq!(p.strategy, Strategy::All);
    assert!(p.need_rho_fdm());
    assert!(!p.need_rho());
    p.validate().expect("valid parameter set");
}

#[test]
fn test_params_rejects_bad_values() {
    let mut p = Params::default();
    p.lambda = 0.5;
    assert!(p.validate().is_err());

    let mut p = Params::default();
    p.diagratio = 0.0;
    assert!(p.validate().is_err());
}

#[test]
fn test_params_scale_decay() {
    let mut p = Params::default();
    p.lambda = 4.0;
    // One step down the chain divides the scale by √Λ.
    assert_relative_eq!(p.scale(3) / p.scale(4), 2.0);
    assert_relative_eq!(p.scale(1), 1.0);
    assert_relative_eq!(p.nrg_step_scale_factor(), 2.0);
}

#[test]
fn test_params_zbw_detection() {
    let mut p = Params::default();
    p.nmax = 0;
    p.ninit = 0;
    assert!(p.zbw());
    assert_eq!(p.nlen(), 1);
    p.nmax = 5;
    assert!(!p.zbw());
    assert_eq!(p.nlen(), 5);
}
