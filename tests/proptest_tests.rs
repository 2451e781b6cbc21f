use ndarray::Array2;
use portfolio_lab::allocators::Constraints;
use portfolio_lab::allocators::generator_b;
use portfolio_lab::allocators::hrp_weights;
use portfolio_lab::estimates::min_eigenvalue;
use portfolio_lab::estimates::project_to_psd;
use portfolio_lab::factors::fdr_bh;
use portfolio_lab::numeric::quantile_linear;
use portfolio_lab::regime::HysteresisConfig;
use portfolio_lab::regime::RegimeState;
use portfolio_lab::regime::apply_hysteresis;
use portfolio_lab::Thresholds;
use proptest::prelude::*;

fn symmetric(n: usize, raw: &[f64]) -> Array2<f64> {
  let a = Array2::from_shape_fn((n, n), |(i, j)| raw[i * n + j]);
  (&a + &a.t()) * 0.5
}

fn spd(n: usize, raw: &[f64]) -> Array2<f64> {
  let a = Array2::from_shape_fn((n, n), |(i, j)| raw[i * n + j]);
  a.dot(&a.t()) * 0.01 + Array2::<f64>::eye(n) * 1e-3
}

fn matrix_input() -> impl Strategy<Value = (usize, Vec<f64>)> {
  (3usize..8).prop_flat_map(|n| (Just(n), prop::collection::vec(-1.0f64..1.0, n * n)))
}

proptest! {
  #[test]
  fn projection_is_symmetric_psd((n, raw) in matrix_input()) {
    let p = project_to_psd(&symmetric(n, &raw), None).unwrap();
    prop_assert!(min_eigenvalue(&p) >= -1e-10);
    for i in 0..n {
      for j in 0..n {
        prop_assert!((p[[i, j]] - p[[j, i]]).abs() < 1e-12);
      }
    }
  }

  #[test]
  fn hrp_weights_lie_on_the_simplex((n, raw) in matrix_input()) {
    let w = hrp_weights(&spd(n, &raw)).unwrap();
    prop_assert!(w.iter().all(|x| *x >= 0.0));
    prop_assert!((w.sum() - 1.0).abs() < 1e-9);
  }

  #[test]
  fn generator_b_is_long_only_and_fully_invested((n, raw) in matrix_input()) {
    let constraints = Constraints::from_thresholds(&Thresholds::default().allocation, n);
    let alloc = generator_b(&spd(n, &raw), &constraints).unwrap();
    prop_assert!(alloc.weights.iter().all(|x| *x >= -1e-12));
    prop_assert!((alloc.weights.sum() - 1.0).abs() < 1e-6);
  }

  #[test]
  fn quantiles_are_monotone(xs in prop::collection::vec(-10.0f64..10.0, 1..50), a in 0.0f64..1.0, b in 0.0f64..1.0) {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    prop_assert!(quantile_linear(&xs, lo) <= quantile_linear(&xs, hi));
  }

  #[test]
  fn bh_rejections_are_closed_downward(p in prop::collection::vec(0.0f64..1.0, 1..30)) {
    let mask = fdr_bh(&p, 0.1);
    for i in 0..p.len() {
      for j in 0..p.len() {
        if mask[i] && p[j] <= p[i] {
          prop_assert!(mask[j]);
        }
      }
    }
  }

  #[test]
  fn completed_crisis_spells_last_the_dwell(p in prop::collection::vec(0.0f64..1.0, 1..200), dwell in 1usize..15) {
    let cfg = HysteresisConfig {
      on: 0.6,
      off: 0.4,
      dwell_days: dwell,
      cooldown_days: 3,
      activate_streak: 2,
      deactivate_streak: 2,
    };
    let states = apply_hysteresis(&p, &cfg).unwrap();
    let mut run = 0usize;
    for s in &states {
      match s {
        RegimeState::Active => run += 1,
        RegimeState::Inactive => {
          if run > 0 {
            prop_assert!(run >= dwell, "spell of {} shorter than dwell {}", run, dwell);
          }
          run = 0;
        }
      }
    }
  }
}
