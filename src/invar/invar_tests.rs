use crate::invar::{Invar, InvarStructure, QuantumKind};

fn qp_structure() -> InvarStructure {
    InvarStructure::new(&[
        ("Q", QuantumKind::Additive),
        ("P", QuantumKind::Multiplicative),
    ])
}

#[test]
fn test_invar_ordering_is_lexicographic() {
    let a = Invar::new(vec![0, 1]);
    let b = Invar::new(vec![0, 2]);
    let c = Invar::new(vec![1, -5]);
    assert!(a < b);
    assert!(b < c);
    assert_eq!(a, Invar::new(vec![0, 1]));
}

#[test]
fn test_invar_combine_and_invert() {
    let s = qp_structure();
    let a = Invar::new(vec![2, -1]);
    let b = Invar::new(vec![-1, -1]);
    assert_eq!(s.combine(&a, &b), Invar::new(vec![1, 1]));
    assert_eq!(s.invert(&a), Invar::new(vec![-2, -1]));
    // Inversion composes to the identity of the composition law.
    assert_eq!(s.combine(&a, &s.invert(&a)), Invar::new(vec![0, 1]));
}

#[test]
fn test_invar_named_access() {
    let s = qp_structure();
    let a = Invar::new(vec![3, -1]);
    assert_eq!(a.get("Q", &s), 3);
    assert_eq!(a.get("P", &s), -1);
}

#[test]
fn test_invar_parse_roundtrip() {
    let a: Invar = "1 -2".parse().expect("parseable label");
    assert_eq!(a, Invar::new(vec![1, -2]));
    assert_eq!(a.to_string(), "1 -2");
    assert!("1 x".parse::<Invar>().is_err());
    assert!("".parse::<Invar>().is_err());
}
