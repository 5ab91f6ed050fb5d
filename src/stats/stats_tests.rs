use rug::ops::Pow;
use rug::Float;

use crate::params::Params;
use crate::stats::{Stats, TdRecord, MP_PREC};

#[test]
fn test_stats_td_record_preserves_insertion_order() {
    let mut td = TdRecord::default();
    td.set("T", 1.0);
    td.set("<E>", 2.0);
    td.set("C", 3.0);
    assert_eq!(td.get("<E>"), 2.0);
    assert!(td.get("absent").is_nan());
    assert_eq!(td.value_for("C"), Some(3.0));
}

#[test]
fn test_stats_accumulator_sizing() {
    let mut p = Params::default();
    p.nmax = 7;
    let stats: Stats<f64> = Stats::new(&p);
    assert_eq!(stats.wn.len(), 7);
    assert_eq!(stats.zn_dg.len(), 7);
    assert!(stats.zn_dg.iter().all(|z| z.prec() == MP_PREC));
}

#[test]
fn test_stats_extended_precision_holds_significance() {
    // 2^-200 survives next to 1 at 400 bits but vanishes at double
    // precision.
    let mut acc = Float::with_val(MP_PREC, 1.0);
    let tiny = Float::with_val(MP_PREC, Float::with_val(MP_PREC, 2.0).pow(-200));
    acc += &tiny;
    acc -= 1.0;
    assert!(acc.to_f64() > 0.0);
    assert_eq!(1.0_f64 + 2.0_f64.powi(-200) - 1.0, 0.0);
}
