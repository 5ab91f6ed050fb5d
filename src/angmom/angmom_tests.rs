use approx::assert_relative_eq;

use crate::angmom::{clebsch_gordan, su2_triangle};

const SQ2: f64 = std::f64::consts::SQRT_2;

#[test]
fn test_angmom_singlet_coefficients() {
    // (|↑↓⟩ - |↓↑⟩)/√2
    assert_relative_eq!(clebsch_gordan(1, 1, 1, -1, 0, 0), 1.0 / SQ2, epsilon = 1e-14);
    assert_relative_eq!(clebsch_gordan(1, -1, 1, 1, 0, 0), -1.0 / SQ2, epsilon = 1e-14);
}

#[test]
fn test_angmom_triplet_coefficients() {
    assert_relative_eq!(clebsch_gordan(1, 1, 1, 1, 2, 2), 1.0, epsilon = 1e-14);
    assert_relative_eq!(clebsch_gordan(1, 1, 1, -1, 2, 0), 1.0 / SQ2, epsilon = 1e-14);
    assert_relative_eq!(clebsch_gordan(1, -1, 1, 1, 2, 0), 1.0 / SQ2, epsilon = 1e-14);
}

#[test]
fn test_angmom_spin_half_ladder() {
    // |j1+1/2, M⟩ expansion coefficients for j1 = 1, M = 1/2.
    assert_relative_eq!(
        clebsch_gordan(2, 0, 1, 1, 3, 1),
        (2.0_f64 / 3.0).sqrt(),
        epsilon = 1e-14
    );
    assert_relative_eq!(
        clebsch_gordan(2, 2, 1, -1, 3, 1),
        (1.0_f64 / 3.0).sqrt(),
        epsilon = 1e-14
    );
    // |j1-1/2, M⟩ carries the Condon–Shortley sign on the m2 = +1/2 member.
    assert_relative_eq!(
        clebsch_gordan(2, 0, 1, 1, 1, 1),
        -(1.0_f64 / 3.0).sqrt(),
        epsilon = 1e-14
    );
    assert_relative_eq!(
        clebsch_gordan(2, 2, 1, -1, 1, 1),
        (2.0_f64 / 3.0).sqrt(),
        epsilon = 1e-14
    );
}

#[test]
fn test_angmom_selection_rules() {
    assert_eq!(clebsch_gordan(1, 1, 1, 1, 0, 0), 0.0);
    assert_eq!(clebsch_gordan(1, 1, 1, -1, 4, 0), 0.0);
    assert_eq!(clebsch_gordan(3, 5, 1, -1, 2, 2), 0.0);
}

#[test]
fn test_angmom_orthogonality() {
    // Σ_{m1,m2} ⟨j1 m1; j2 m2|j m⟩⟨j1 m1; j2 m2|j' m⟩ = δ_{jj'}
    for (dj, djp, expected) in [(2, 2, 1.0), (2, 4, 0.0), (4, 4, 1.0)] {
        let mut sum = 0.0;
        for dm1 in [-3, -1, 1, 3] {
            for dm2 in [-1, 1] {
                sum += clebsch_gordan(3, dm1, 1, dm2, dj, 0)
                    * clebsch_gordan(3, dm1, 1, dm2, djp, 0);
            }
        }
        assert_relative_eq!(sum, expected, epsilon = 1e-13);
    }
}

#[test]
fn test_angmom_triangle() {
    assert!(su2_triangle(1, 1, 2));
    assert!(su2_triangle(1, 1, 0));
    assert!(!su2_triangle(1, 1, 1));
    assert!(!su2_triangle(1, 3, 6));
}
