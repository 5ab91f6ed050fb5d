use approx::assert_relative_eq;

use crate::symmetry::{
    hopping_factor, recoupling_factor, site_creation_factor, SiteOcc, SiteState,
};

#[test]
fn test_factors_hopping_empty_single_is_unity() {
    // The CG sums telescope for an empty-site block coupled to a
    // singly-occupied one, for either ancestor spin.
    for dj in [0, 1, 2, 5] {
        let f_plus = hopping_factor(dj, dj, SiteOcc::Empty, dj + 1, SiteOcc::Single);
        assert_relative_eq!(f_plus.abs(), 1.0, epsilon = 1e-12);
        if dj >= 1 {
            let f_minus = hopping_factor(dj, dj, SiteOcc::Empty, dj - 1, SiteOcc::Single);
            assert_relative_eq!(f_minus.abs(), 1.0, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_factors_hopping_single_double_closed_form() {
    // ⟨single(S±1/2)|H_hop|double⟩ carries √((SS±1)/SS) with SS = 2S+1.
    for dj in [0, 1, 2, 7] {
        let ss = f64::from(dj + 1);
        let f_up = hopping_factor(dj, dj + 1, SiteOcc::Single, dj, SiteOcc::Double);
        assert_relative_eq!(f_up.abs(), ((ss + 1.0) / ss).sqrt(), epsilon = 1e-12);
        if dj >= 1 {
            let f_down = hopping_factor(dj, dj - 1, SiteOcc::Single, dj, SiteOcc::Double);
            assert_relative_eq!(f_down.abs(), ((ss - 1.0) / ss).sqrt(), epsilon = 1e-12);
        }
    }
}

#[test]
fn test_factors_recoupling_spectatorless_is_unity() {
    // An empty or doubly-occupied site is a spin-0 spectator: the reduced
    // matrix element passes through unchanged.
    for occ in [SiteOcc::Empty, SiteOcc::Double] {
        for (dj1, djp) in [(2, 1), (1, 2), (3, 2)] {
            let f = recoupling_factor(dj1, djp, dj1, djp, occ, 1);
            assert_relative_eq!(f, 1.0, epsilon = 1e-12);
        }
    }
}

#[test]
fn test_factors_recoupling_single_spectator_sum_rule() {
    // With a spin-1/2 spectator the doublet operator distributes its weight
    // over the ancestor channels: Σ_anc |F|²·(2ja1+1)(2jp+1)/((2j1+1)(2jap+1))
    // telescopes when summed against the CG completeness. Spot-check one
    // hand-evaluated case instead: j1 = 1, jp = 1/2, ja1 = 1/2, jap = 0.
    let f = recoupling_factor(2, 1, 1, 0, SiteOcc::Single, 1);
    // Direct sum: single term ms = +1/2 at M1 = 1, Mp = 1/2, μ = 1/2:
    //   ⟨1/2 1/2; 1/2 1/2|1 1⟩ ⟨0 0; 1/2 1/2|1/2 1/2⟩ ⟨0 0; 1/2 1/2|1/2 1/2⟩
    //   / ⟨1/2 1/2; 1/2 1/2|1 1⟩ = 1.
    assert_relative_eq!(f, 1.0, epsilon = 1e-12);
}

#[test]
fn test_factors_site_creation_free_site() {
    // A free site on a spin-0 ancestor reproduces the site reduced matrix
    // elements: ⟨1/2‖f†‖0⟩ = 1 and ⟨0(double)‖f†‖1/2⟩ = -√2.
    let r1 = site_creation_factor(1, 0, 0, SiteOcc::Single, SiteOcc::Empty);
    assert_relative_eq!(r1, 1.0, epsilon = 1e-12);
    let r2 = site_creation_factor(0, 1, 0, SiteOcc::Double, SiteOcc::Single);
    assert_relative_eq!(r2, -std::f64::consts::SQRT_2, epsilon = 1e-12);
}

#[test]
fn test_factors_site_state_algebra() {
    // f†_↓ f†_↑ = -f†_↑ f†_↓ shows up as the sign of ⟨↑↓|f†_↓|↑⟩.
    use crate::symmetry::{f_annihilate, f_create};
    let (st, amp) = f_create(-1, SiteState::Up).expect("admissible");
    assert_eq!(st, SiteState::Doubly);
    assert_relative_eq!(amp, -1.0);
    let (st, amp) = f_annihilate(-1, SiteState::Doubly).expect("admissible");
    assert_eq!(st, SiteState::Up);
    assert_relative_eq!(amp, -1.0);
    assert!(f_annihilate(1, SiteState::Down).is_none());
    assert!(f_create(1, SiteState::Up).is_none());
}
