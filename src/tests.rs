use crate::abc::{run_abc, AbcOutput, AbcSettings, Prior, PriorFamily, Tolerance};
use crate::cli::{parse_fixed, Options};
use crate::composition::{dirichlet_proportions, hypergeometric, multinomial, VariantComposition};
use crate::dataset::{FrequencyDataset, RawDataset};
use crate::error::{AbcError, ConfigurationError, DomainError, InputError, ValidationError};
use crate::parameters::{ModelChoice, Parameters, RunConfig};
use crate::population::{interpolate, PopulationTrajectory};
use crate::predictive::{posterior_predictive, PredictiveSettings};
use crate::rates::RateDistribution;
use crate::simulation::Recording;
use crate::simulator::{gen_sim, FrequencySimulator, Simulate};
use crate::transmission::{self, custom, FrequencyBias, Neutral, TransmissionModel};
use crate::turnover::schedule;
use crate::*;
use approx::assert_abs_diff_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn three_phases() -> FrequencyDataset {
    FrequencyDataset::new(
        None,
        vec![
            vec![2, 4, 7, 16, 27, 44, 96, 104, 0, 0, 0, 0],
            vec![3, 2, 2, 19, 10, 27, 73, 62, 1, 1, 0, 0],
            vec![0, 4, 0, 17, 7, 47, 80, 82, 0, 0, 2, 1],
        ],
        vec![1, 30, 60],
        vec![10, 10],
    )
    .unwrap()
}

fn frequency_bias_simulator(p: &Parameters) -> FrequencySimulator {
    gen_sim(
        Arc::new(three_phases()),
        Arc::new(FrequencyBias),
        &["mu", "b"],
        &[],
        p,
    )
    .unwrap()
}

fn failure(value: f64) -> DomainError {
    DomainError::InvalidParameter {
        name: "x".to_string(),
        value,
        reason: "rejected by the test simulator",
    }
}

#[test]
pub fn test_target_frequencies() {
    let data = three_phases();
    assert_eq!(data.phases(), 3);
    assert_eq!(data.variants_in_first_phase(), 8);
    assert_eq!(data.first_phase_variants(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(data.sample_sizes(), &[300, 200, 240]);
    assert_eq!(data.statistic_len(), 16);
    assert!(data
        .target_frequencies()
        .iter()
        .all(|&f| (0. ..=1.).contains(&f)));
    // Variant-major: v1 in phase 2, v1 in phase 3, v2 in phase 2, …
    let target = data.target_frequencies();
    assert_abs_diff_eq!(target[0], 3. / 200.);
    assert_abs_diff_eq!(target[1], 0.);
    assert_abs_diff_eq!(target[2], 2. / 200.);
    assert_abs_diff_eq!(target[3], 4. / 240.);
}

#[test]
pub fn test_first_phase_skips_absent_variants() {
    let data = FrequencyDataset::new(
        Some(vec!["a".to_string(), "b".to_string(), "c".to_string()]),
        vec![vec![5, 0, 5], vec![2, 6, 2], vec![1, 1, 8]],
        vec![1, 5, 9],
        vec![4, 4],
    )
    .unwrap();
    assert_eq!(data.first_phase_labels(), vec!["a", "c"]);
    assert_eq!(data.first_phase_counts(), vec![5, 5]);
    assert_eq!(data.target_frequencies().len(), 4);
    assert_abs_diff_eq!(data.target_frequencies()[3], 0.8);
}

#[test]
pub fn test_dataset_validation() {
    let counts = || vec![vec![1, 2], vec![3, 4]];
    assert_eq!(
        FrequencyDataset::new(None, vec![vec![1, 2]], vec![1], vec![]).err(),
        Some(ValidationError::TooFewPhases(1))
    );
    assert_eq!(
        FrequencyDataset::new(None, vec![vec![1, 2], vec![3]], vec![1, 5], vec![2]).err(),
        Some(ValidationError::RaggedCounts {
            phase: 1,
            expected: 2,
            found: 1
        })
    );
    assert_eq!(
        FrequencyDataset::new(None, vec![vec![1, -2], vec![3, 4]], vec![1, 5], vec![2]).err(),
        Some(ValidationError::NegativeCount {
            phase: 0,
            variant: 1,
            count: -2
        })
    );
    assert_eq!(
        FrequencyDataset::new(None, vec![vec![1, 2], vec![0, 0]], vec![1, 5], vec![2]).err(),
        Some(ValidationError::EmptyPhase { phase: 1 })
    );
    assert_eq!(
        FrequencyDataset::new(None, counts(), vec![5, 5], vec![1]).err(),
        Some(ValidationError::NonIncreasingTimestamps {
            phase: 1,
            previous: 5,
            timestamp: 5
        })
    );
    assert_eq!(
        FrequencyDataset::new(None, counts(), vec![0, 5], vec![1]).err(),
        Some(ValidationError::TimestampBeforeStart(0))
    );
    assert_eq!(
        FrequencyDataset::new(None, counts(), vec![1, 5, 9], vec![1]).err(),
        Some(ValidationError::TimestampCount {
            expected: 2,
            found: 3
        })
    );
    assert_eq!(
        FrequencyDataset::new(None, counts(), vec![1, 5], vec![]).err(),
        Some(ValidationError::DurationCount {
            expected: 1,
            found: 0
        })
    );
    assert_eq!(
        FrequencyDataset::new(None, counts(), vec![1, 5], vec![5]).err(),
        Some(ValidationError::DurationOutOfRange {
            phase: 1,
            duration: 5,
            gap: 4
        })
    );
    assert_eq!(
        FrequencyDataset::new(None, counts(), vec![1, 5], vec![0]).err(),
        Some(ValidationError::DurationOutOfRange {
            phase: 1,
            duration: 0,
            gap: 4
        })
    );
    assert_eq!(
        FrequencyDataset::new(Some(vec!["x".to_string()]), counts(), vec![1, 5], vec![4]).err(),
        Some(ValidationError::LabelCount {
            expected: 2,
            found: 1
        })
    );
}

#[test]
pub fn test_dataset_from_json() {
    let raw: RawDataset = serde_json::from_str(
        r#"{"counts": [[4, 1], [2, 3]], "timestamps": [2, 12], "durations": [3]}"#,
    )
    .unwrap();
    let data = FrequencyDataset::from_raw(raw).unwrap();
    assert_eq!(data.labels(), &["v1".to_string(), "v2".to_string()]);
    assert_eq!(data.max_timestamp(), 12);
    assert_eq!(data.duration(1), 3);
}

#[test]
pub fn test_trajectory_anchors() {
    let data = three_phases();
    let trajectory = interpolate(&data, 0.2).unwrap();
    assert_eq!(trajectory.len(), 60);
    assert_eq!(trajectory.at(1), 1500);
    assert_eq!(trajectory.at(30), 1000);
    assert_eq!(trajectory.at(45), 1100);
    assert_eq!(trajectory.at(60), 1200);
}

#[test]
pub fn test_trajectory_is_flat_before_first_phase() {
    let data = FrequencyDataset::new(None, vec![vec![10], vec![20]], vec![5, 10], vec![2]).unwrap();
    let trajectory = interpolate(&data, 0.5).unwrap();
    assert_eq!(&trajectory.sizes()[..5], &[20, 20, 20, 20, 20]);
    assert_eq!(trajectory.at(10), 40);
}

#[test]
pub fn test_degenerate_sampling_fraction() {
    let data = three_phases();
    assert!(matches!(
        interpolate(&data, 0.),
        Err(DomainError::InvalidParameter { .. })
    ));
    let rate = RateDistribution::fixed(0.);
    let mut rng = task_rng(1, 0);
    assert!(matches!(
        population::estimate(&data, &rate, &mut rng),
        Err(DomainError::DegenerateDraw { .. })
    ));
}

#[test]
pub fn test_rate_draws_stay_in_unit_interval() {
    let rate = RateDistribution {
        mean: 0.2,
        variance: 0.05,
    };
    let mut rng = task_rng(3, 0);
    for _ in 0..1000 {
        let x = rate.draw("test rate", false, false, &mut rng).unwrap();
        assert!(0. < x && x < 1.);
    }
    assert_eq!(
        RateDistribution::fixed(1.).draw("replacement rate", true, true, &mut rng),
        Ok(1.)
    );
}

proptest! {
    #[test]
    fn hypergeometric_stays_in_support(
        total in 1u64..20_000,
        marked_fraction in 0.0f64..1.0,
        n_fraction in 0.0f64..1.0,
        seed in 0u64..1000,
    ) {
        let marked = (total as f64 * marked_fraction) as u64;
        let n = (total as f64 * n_fraction) as u64;
        let mut rng = task_rng(seed, 0);
        let k = hypergeometric(total, marked, n, &mut rng);
        prop_assert!(k <= marked.min(n));
        prop_assert!(k + (total - marked) >= n);
    }

    #[test]
    fn removal_takes_exactly_n(
        counts in prop::collection::vec(0u64..2000, 1..12),
        fraction in 0.0f64..0.99,
        seed in 0u64..1000,
    ) {
        let tracked = counts.len();
        let mut composition = VariantComposition::new(counts.clone(), tracked);
        let live = composition.total();
        let n = (live as f64 * fraction).floor() as u64;
        let mut rng = task_rng(seed, 0);
        prop_assert!(composition.remove(n, 2, &mut rng).is_ok());
        prop_assert_eq!(composition.total(), live - n);
        for (after, before) in composition.counts().iter().zip(counts.iter()) {
            prop_assert!(after <= before);
        }
    }
}

proptest! {
    #[test]
    fn anchors_reproduce_phase_estimates(s in 0.01f64..1.0) {
        let data = three_phases();
        let trajectory = interpolate(&data, s).unwrap();
        for (&t, &n) in data.timestamps().iter().zip(data.sample_sizes().iter()) {
            prop_assert_eq!(trajectory.at(t), (n as f64 / s).round() as u64);
        }
    }

    #[test]
    fn turnover_accounts_for_every_step(
        sizes in prop::collection::vec(1u64..5000, 2..60),
        r in 0.0f64..=1.0,
    ) {
        let trajectory = PopulationTrajectory::from(sizes.clone());
        let turnover = schedule(&trajectory, r).unwrap();
        prop_assert_eq!(turnover.steps().len(), sizes.len() - 1);
        for t in 2..=sizes.len() as Steps {
            let step = turnover.at(t);
            let before = trajectory.at(t - 1);
            prop_assert!(step.remove <= before);
            prop_assert_eq!(before - step.remove + step.add, trajectory.at(t));
        }
    }

    #[test]
    fn dirichlet_is_a_probability_vector(
        counts in prop::collection::vec(0u64..200, 1..12),
        alpha in 0.1f64..10.0,
        seed in any::<u64>(),
    ) {
        let mut rng = task_rng(seed, 0);
        let p = dirichlet_proportions(&counts, alpha, &mut rng).unwrap();
        prop_assert_eq!(p.len(), counts.len() + 1);
        prop_assert!(p.iter().all(|&x| x >= 0.));
        prop_assert!((p.iter().sum::<f64>() - 1.).abs() < 1e-9);
    }

    #[test]
    fn multinomial_draws_exactly_n(
        weights in prop::collection::vec(0.0f64..1.0, 1..20),
        n in 0u64..10_000,
        seed in any::<u64>(),
    ) {
        let z: f64 = weights.iter().sum();
        prop_assume!(z > 0.);
        let p: Vec<f64> = weights.iter().map(|w| w / z).collect();
        let mut rng = task_rng(seed, 0);
        let drawn = multinomial(n, &p, &mut rng).unwrap();
        prop_assert_eq!(drawn.iter().sum::<u64>(), n);
        for (d, q) in drawn.iter().zip(p.iter()) {
            if *q == 0. {
                prop_assert_eq!(*d, 0);
            }
        }
    }
}

#[test]
pub fn test_turnover_rejects_bad_rate() {
    let trajectory = PopulationTrajectory::from(vec![10, 12]);
    assert!(schedule(&trajectory, 1.5).is_err());
    assert!(schedule(&trajectory, -0.1).is_err());
}

#[test]
pub fn test_invalid_alpha() {
    let mut rng = task_rng(1, 0);
    assert!(matches!(
        dirichlet_proportions(&[1, 2], 0., &mut rng),
        Err(DomainError::InvalidParameter { .. })
    ));
}

#[test]
pub fn test_unbiased_copying_is_proportional() {
    let counts = [5, 3, 2, 0];
    let p = FrequencyBias.probabilities(&counts, 0.1, &[0.]);
    assert_eq!(p.len(), 5);
    for (pi, &c) in p.iter().zip(counts.iter()) {
        assert_abs_diff_eq!(*pi, 0.9 * c as f64 / 10., epsilon = 1e-12);
    }
    assert_abs_diff_eq!(p[4], 0.1, epsilon = 1e-12);

    let neutral = Neutral.probabilities(&counts, 0.1, &[]);
    for (a, b) in p.iter().zip(neutral.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
    }
}

#[test]
pub fn test_no_innovation_without_mu() {
    let p = FrequencyBias.probabilities(&[5, 3, 2], 0., &[0.3]);
    assert_eq!(p[3], 0.);
    assert_abs_diff_eq!(p.iter().sum::<f64>(), 1., epsilon = 1e-12);
}

#[test]
pub fn test_bias_direction() {
    let conformist = FrequencyBias.probabilities(&[6, 2], 0., &[0.5]);
    assert!(conformist[0] / conformist[1] > 3.);
    let anticonformist = FrequencyBias.probabilities(&[6, 2], 0., &[-0.5]);
    assert!(anticonformist[0] / anticonformist[1] < 3.);
    // Extreme biases stay finite.
    let extreme = FrequencyBias.probabilities(&[1000, 1], 0.01, &[50.]);
    assert!(transmission::is_probability_vector(&extreme, 3));
}

#[test]
pub fn test_empty_population_innovates() {
    let p = FrequencyBias.probabilities(&[0, 0], 0.1, &[0.]);
    assert_eq!(p, vec![0., 0., 1.]);
}

#[test]
pub fn test_model_registration() {
    assert_eq!(transmission::validate(&FrequencyBias), Ok(()));
    assert_eq!(transmission::validate(&Neutral), Ok(()));

    let unnormalized = custom("unnormalized", &[], |counts: &[u64], _mu: f64, _p: &[f64]| {
        vec![0.5; counts.len() + 1]
    });
    assert!(matches!(
        transmission::validate(&unnormalized),
        Err(ConfigurationError::ProbabilitySum { .. })
    ));

    let short = custom("short", &[], |counts: &[u64], _mu: f64, _p: &[f64]| {
        vec![1. / counts.len() as f64; counts.len()]
    });
    assert!(matches!(
        transmission::validate(&short),
        Err(ConfigurationError::ProbabilityLength { .. })
    ));

    let negative = custom("negative", &["c"], |counts: &[u64], _mu: f64, _p: &[f64]| {
        let mut p = vec![0.; counts.len() + 1];
        p[0] = 1.5;
        p[1] = -0.5;
        p
    });
    assert!(matches!(
        transmission::validate(&negative),
        Err(ConfigurationError::NegativeProbability { .. })
    ));

    assert!(matches!(
        transmission::validate_with(&FrequencyBias, &[]),
        Err(ConfigurationError::Arity {
            expected: 1,
            found: 0,
            ..
        })
    ));
}

#[test]
pub fn test_custom_model_check_parameters() {
    // Only valid for positive c, so checking with the default of 0 would fail.
    let model = custom("top-heavy", &["c"], |counts: &[u64], mu: f64, p: &[f64]| {
        let mut out = vec![0.; counts.len() + 1];
        if p[0] <= 0. {
            return out;
        }
        out[0] = 1. - mu;
        out[counts.len()] = mu;
        out
    });
    assert!(transmission::validate(&model).is_err());
    let model = model.with_check_parameters(vec![1.]);
    assert_eq!(transmission::validate(&model), Ok(()));
}

#[test]
pub fn test_removal_and_innovation() {
    let mut rng = task_rng(5, 0);
    let mut composition = VariantComposition::new(vec![10, 5, 0], 3);
    assert_eq!(
        composition.remove(16, 2, &mut rng),
        Err(DomainError::TurnoverExceedsPopulation {
            t: 2,
            remove: 16,
            live: 15
        })
    );
    composition.remove(12, 2, &mut rng).unwrap();
    assert_eq!(composition.total(), 3);
    assert_eq!(composition.counts()[2], 0);

    composition.add(4, &[0., 0., 0., 1.], &mut rng).unwrap();
    assert_eq!(composition.total(), 7);
    assert_eq!(composition.len(), 7);
    assert_eq!(composition.ids(), &[0, 1, 2, 3, 4, 5, 6]);

    composition.remove(7, 3, &mut rng).unwrap();
    composition.prune();
    assert_eq!(composition.counts(), &[0, 0, 0]);
    assert_eq!(composition.minted(), 7);
}

#[test]
pub fn test_heavy_removal_from_a_large_population() {
    // Shaped like the first phase at s = 0.2 after a step of growth, with 90%
    // of the population leaving.
    let start = vec![7, 15, 26, 60, 100, 164, 358, 386, 0];
    for seed in 0..50 {
        let mut rng = task_rng(seed, 0);
        let mut composition = VariantComposition::new(start.clone(), 9);
        assert_eq!(composition.total(), 1116);
        composition.remove(1011, 2, &mut rng).unwrap();
        assert_eq!(composition.total(), 105);
        for (after, before) in composition.counts().iter().zip(start.iter()) {
            assert!(after <= before);
        }
    }
}

#[test]
pub fn test_hypergeometric_mean() {
    let mut rng = task_rng(8, 0);
    for &(total, marked, n) in &[(1116u64, 104u64, 1011u64), (1166, 108, 103), (20, 5, 10)] {
        let draws = 400;
        let sum: u64 = (0..draws)
            .map(|_| hypergeometric(total, marked, n, &mut rng))
            .sum();
        let mean = sum as f64 / draws as f64;
        let expected = n as f64 * marked as f64 / total as f64;
        assert_abs_diff_eq!(mean, expected, epsilon = 0.05 * expected + 0.5);
    }
}

#[test]
pub fn test_high_replacement_rate_simulates() {
    for &s in &[0.2, 0.05] {
        let p = Parameters {
            sampling_fraction: RateDistribution::fixed(s),
            ..Parameters::default()
        };
        let simulator = gen_sim(
            Arc::new(three_phases()),
            Arc::new(FrequencyBias),
            &["mu", "b"],
            &[("r", 0.9)],
            &p,
        )
        .unwrap();
        for seed in 0..20 {
            let mut rng = task_rng(seed, 0);
            let statistic = simulator.simulate(&[0.05, 0.], &mut rng).unwrap();
            assert_eq!(statistic.len(), 16);
        }
    }
}

#[test]
pub fn test_live_population_follows_trajectory() {
    let simulator = frequency_bias_simulator(&Parameters::default());
    let mut rng = task_rng(11, 0);
    let mut simulation = simulator.prepare(&[0.05, -0.01], &mut rng).unwrap();
    let offset =
        simulation.composition().total() as i64 - simulation.trajectory().at(1) as i64;
    // Rounding each of the nine categories is off by at most one half.
    assert!(offset.abs() <= 4);
    while !simulation.is_finished() {
        simulation.step(&mut rng).unwrap();
        let t = simulation.t();
        assert_eq!(
            simulation.composition().total() as i64 - simulation.trajectory().at(t) as i64,
            offset
        );
        assert!(simulation.composition().len() >= 9);
    }
    assert_eq!(simulation.t(), 60);
    assert_eq!(simulation.records().len(), 2);
    assert_eq!(simulation.statistic().len(), 16);
}

#[test]
pub fn test_end_to_end_simulation() {
    let simulator = frequency_bias_simulator(&Parameters::default());
    assert_eq!(simulator.schema().names(), &["mu".to_string(), "b".to_string()]);

    let run = |seed| {
        let mut rng = task_rng(seed, 0);
        simulator.simulate(&[0.05, -0.01], &mut rng).unwrap()
    };
    let statistic = run(42);
    assert_eq!(statistic.len(), 16);
    assert!(statistic.iter().all(|&f| (0. ..=1.).contains(&f)));
    // Per phase, the first-phase variants share at most the whole population.
    for phase in 0..2 {
        let share: f64 = (0..8).map(|v| statistic[v * 2 + phase]).sum();
        assert!(share <= 1. + 1e-12);
    }
    assert_eq!(statistic, run(42));
    assert_ne!(statistic, run(43));
}

#[test]
pub fn test_time_averaged_recording() {
    let p = Parameters {
        recording: Recording::TimeAveraged,
        sampling_fraction: RateDistribution {
            mean: 0.2,
            variance: 0.001,
        },
        ..Parameters::default()
    };
    let simulator = frequency_bias_simulator(&p);
    let mut rng = task_rng(8, 0);
    let statistic = simulator.simulate(&[0.02, 0.1], &mut rng).unwrap();
    assert_eq!(statistic.len(), 16);
    assert!(statistic.iter().all(|&f| (0. ..=1.).contains(&f)));
}

#[test]
pub fn test_simulation_failures() {
    let simulator = frequency_bias_simulator(&Parameters::default());
    let mut rng = task_rng(1, 0);
    assert_eq!(
        simulator.simulate(&[0.05], &mut rng),
        Err(DomainError::ThetaLength {
            expected: 2,
            found: 1
        })
    );
    assert!(matches!(
        simulator.simulate(&[1.5, 0.], &mut rng),
        Err(DomainError::InvalidParameter { .. })
    ));

    let p = Parameters {
        max_variants: Some(12),
        ..Parameters::default()
    };
    let simulator = frequency_bias_simulator(&p);
    assert!(matches!(
        simulator.simulate(&[0.5, 0.], &mut rng),
        Err(DomainError::TooManyVariants { limit: 12, .. })
    ));
}

#[test]
pub fn test_theta_schema_errors() {
    let data = Arc::new(three_phases());
    let model: Arc<dyn TransmissionModel> = Arc::new(FrequencyBias);
    let p = Parameters::default();
    let build = |free: &[&str], fixed: &[(&str, f64)]| {
        gen_sim(data.clone(), model.clone(), free, fixed, &p).err()
    };
    assert_eq!(build(&["mu", "b"], &[]), None);
    assert_eq!(build(&["mu"], &[("b", 0.)]), None);
    assert_eq!(build(&["mu", "b", "s", "r", "alpha"], &[]), None);
    assert_eq!(
        build(&["mu", "b", "c"], &[]),
        Some(ConfigurationError::UnknownParameter("c".to_string()))
    );
    assert_eq!(
        build(&["mu", "mu", "b"], &[]),
        Some(ConfigurationError::DuplicateParameter("mu".to_string()))
    );
    assert_eq!(
        build(&["mu", "b"], &[("b", 0.)]),
        Some(ConfigurationError::DuplicateParameter("b".to_string()))
    );
    assert_eq!(
        build(&["mu"], &[]),
        Some(ConfigurationError::UnboundParameter("b".to_string()))
    );
    assert_eq!(
        build(&["b"], &[]),
        Some(ConfigurationError::UnboundParameter("mu".to_string()))
    );
    assert!(matches!(
        build(&["mu", "b"], &[("alpha", 0.)]),
        Some(ConfigurationError::InvalidSetting { name: "alpha", .. })
    ));

    let neutral = gen_sim(data.clone(), Arc::new(Neutral), &["mu"], &[], &p).unwrap();
    assert_eq!(neutral.parameter_names(), Some(vec!["mu".to_string()]));
}

#[test]
pub fn test_invalid_custom_model_fails_before_simulating() {
    let broken = custom("broken", &["c"], |counts: &[u64], _mu: f64, _p: &[f64]| {
        vec![1.; counts.len() + 1]
    });
    let result = gen_sim(
        Arc::new(three_phases()),
        Arc::new(broken),
        &["mu", "c"],
        &[],
        &Parameters::default(),
    );
    assert!(matches!(
        result.err(),
        Some(ConfigurationError::ProbabilitySum { .. })
    ));
}

#[test]
pub fn test_free_sampling_fraction() {
    let simulator = gen_sim(
        Arc::new(three_phases()),
        Arc::new(Neutral),
        &["mu", "s"],
        &[("r", 0.1)],
        &Parameters::default(),
    )
    .unwrap();
    let mut rng = task_rng(2, 0);
    let simulation = simulator.prepare(&[0.01, 0.5], &mut rng).unwrap();
    assert_eq!(simulation.trajectory().at(1), 600);
    assert_eq!(simulation.trajectory().at(60), 480);
}

fn identity_simulator(theta: &[f64], _rng: &mut SimulationRng) -> Result<Vec<f64>, DomainError> {
    Ok(vec![theta[0]])
}

#[test]
pub fn test_abc_accepts_the_closest_fraction() {
    let priors = vec![Prior::uniform("x", 0., 1.)];
    let settings = AbcSettings {
        nsim: 1000,
        tolerance: Tolerance::Proportion(0.01),
        workers: 2,
        seed: 17,
        max_failure_fraction: 0.5,
    };
    let output = run_abc(&identity_simulator, &priors, &[0.5], &settings).unwrap();
    assert_eq!(output.accepted(), 10);
    assert_eq!(output.simulated, 1000);
    assert_eq!(output.failures, 0);
    assert_eq!(output.names, vec!["x".to_string()]);

    // Every task draws its parameters first from its own stream, so all
    // distances can be recomputed here.
    let mut all: Vec<f64> = (0..1000)
        .map(|i| {
            let mut rng = task_rng(17, i);
            (priors[0].draw(&mut rng).unwrap() - 0.5).abs()
        })
        .collect();
    all.sort_by(|a, b| a.total_cmp(b));
    for (accepted, expected) in output.distances.iter().zip(all.iter()) {
        assert_abs_diff_eq!(*accepted, *expected, epsilon = 1e-12);
        assert!(*accepted <= all[9]);
    }
    for (theta, d) in output.parameters.iter().zip(output.distances.iter()) {
        assert_abs_diff_eq!((theta[0] - 0.5).abs(), *d, epsilon = 1e-12);
    }
}

#[test]
pub fn test_abc_does_not_depend_on_workers() {
    let priors = vec![Prior::uniform("x", 0., 1.)];
    let settings = |workers| AbcSettings {
        nsim: 200,
        tolerance: Tolerance::Proportion(0.05),
        workers,
        seed: 3,
        max_failure_fraction: 0.5,
    };
    let one = run_abc(&identity_simulator, &priors, &[0.2], &settings(1)).unwrap();
    let four = run_abc(&identity_simulator, &priors, &[0.2], &settings(4)).unwrap();
    assert_eq!(one.parameters, four.parameters);
    assert_eq!(one.distances, four.distances);
}

#[test]
pub fn test_abc_distance_tolerance() {
    let priors = vec![Prior::uniform("x", 0., 1.)];
    let settings = AbcSettings {
        nsim: 500,
        tolerance: Tolerance::Distance(0.05),
        seed: 9,
        ..AbcSettings::default()
    };
    let output = run_abc(&identity_simulator, &priors, &[0.5], &settings).unwrap();
    assert!(output.accepted() > 0);
    assert!(output.distances.iter().all(|&d| d <= 0.05));
    assert!(output.distances.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
pub fn test_abc_failure_handling() {
    let priors = vec![Prior::uniform("x", 0., 1.)];
    let settings = AbcSettings {
        nsim: 400,
        seed: 4,
        tolerance: Tolerance::Proportion(0.1),
        ..AbcSettings::default()
    };

    let sometimes = |theta: &[f64], _rng: &mut SimulationRng| {
        if theta[0] < 0.2 {
            Err(failure(theta[0]))
        } else {
            Ok(vec![theta[0]])
        }
    };
    let output = run_abc(&sometimes, &priors, &[0.5], &settings).unwrap();
    assert!(output.failures > 0);
    assert!(output.failures < 200);
    assert_eq!(output.accepted(), 40);
    assert!(output.parameters.iter().all(|theta| theta[0] >= 0.2));

    let mostly = |theta: &[f64], _rng: &mut SimulationRng| {
        if theta[0] < 0.9 {
            Err(failure(theta[0]))
        } else {
            Ok(vec![theta[0]])
        }
    };
    assert!(matches!(
        run_abc(&mostly, &priors, &[0.5], &settings),
        Err(AbcError::SystemicFailure { .. })
    ));

    let always = |theta: &[f64], _rng: &mut SimulationRng| -> Result<Vec<f64>, DomainError> {
        Err(failure(theta[0]))
    };
    assert!(matches!(
        run_abc(&always, &priors, &[0.5], &settings),
        Err(AbcError::NoSuccessfulSimulation(400))
    ));
}

#[test]
pub fn test_abc_input_checks() {
    let simulator = frequency_bias_simulator(&Parameters::default());
    let target = simulator.dataset().target_frequencies().to_vec();
    let settings = AbcSettings {
        nsim: 10,
        ..AbcSettings::default()
    };
    assert!(matches!(
        run_abc(&simulator, &[Prior::uniform("mu", 0., 0.1)], &target, &settings),
        Err(AbcError::PriorCount {
            expected: 2,
            found: 1
        })
    ));
    let swapped = vec![Prior::uniform("b", -0.1, 0.1), Prior::uniform("mu", 0., 0.1)];
    assert!(matches!(
        run_abc(&simulator, &swapped, &target, &settings),
        Err(AbcError::InvalidPrior { .. })
    ));
    let reversed = vec![Prior::uniform("mu", 0.1, 0.), Prior::uniform("b", -0.1, 0.1)];
    assert!(matches!(
        run_abc(&simulator, &reversed, &target, &settings),
        Err(AbcError::InvalidPrior { .. })
    ));
    let priors = vec![Prior::uniform("mu", 0., 0.1), Prior::uniform("b", -0.1, 0.1)];
    assert!(matches!(
        run_abc(&simulator, &priors, &target[..3], &settings),
        Err(AbcError::TargetLength { .. })
    ));
    let bad = AbcSettings {
        tolerance: Tolerance::Proportion(0.),
        ..settings
    };
    assert!(matches!(
        run_abc(&simulator, &priors, &target, &bad),
        Err(AbcError::InvalidSettings(_))
    ));
}

#[test]
pub fn test_prior_families() {
    let mut rng = task_rng(6, 0);
    let log_uniform = Prior {
        name: "mu".to_string(),
        family: PriorFamily::LogUniform,
        lower: 1e-4,
        upper: 1e-1,
    };
    let normal = Prior {
        name: "b".to_string(),
        family: PriorFamily::Normal { mean: 0., sd: 1. },
        lower: -0.1,
        upper: 0.2,
    };
    assert!(log_uniform.validate().is_ok());
    assert!(normal.validate().is_ok());
    for _ in 0..500 {
        let x = log_uniform.draw(&mut rng).unwrap();
        assert!((1e-4..=1e-1).contains(&x));
        let y = normal.draw(&mut rng).unwrap();
        assert!((-0.1..=0.2).contains(&y));
    }
    let invalid = Prior {
        lower: 0.,
        ..log_uniform
    };
    assert!(invalid.validate().is_err());
}

#[test]
pub fn test_model_abc_and_predictive_check() {
    let simulator = frequency_bias_simulator(&Parameters::default());
    let priors = vec![Prior::uniform("mu", 0., 0.1), Prior::uniform("b", -0.1, 0.1)];
    let settings = AbcSettings {
        nsim: 100,
        tolerance: Tolerance::Proportion(0.1),
        seed: 12,
        ..AbcSettings::default()
    };
    let target = simulator.dataset().target_frequencies().to_vec();
    let output = run_abc(&simulator, &priors, &target, &settings).unwrap();
    assert_eq!(output.accepted(), 10);
    assert!(output.statistics.iter().all(|s| s.len() == 16));
    let summary = output.summary();
    assert_eq!(summary.len(), 2);
    assert!(summary[0].lower <= summary[0].median && summary[0].median <= summary[0].upper);
    assert!((0. ..=0.1).contains(&summary[0].mean));

    let check = posterior_predictive(
        simulator.dataset(),
        &simulator,
        &output.parameters,
        &PredictiveSettings {
            draws: Some(25),
            seed: 5,
            ..PredictiveSettings::default()
        },
    )
    .unwrap();
    assert_eq!(check.simulations.len(), 25);
    assert_eq!(check.timestamps, vec![30, 60]);
    assert_eq!(check.labels.len(), 8);
    assert_eq!(check.cell(7, 1).len(), 25);
    let cells = check.summary();
    assert_eq!(cells.len(), 16);
    assert_eq!(cells[1].label, "v1");
    assert_eq!(cells[1].timestamp, 60);
    assert_abs_diff_eq!(cells[1].observed, 0.);
    assert!(cells.iter().all(|c| c.lower <= c.median && c.median <= c.upper));

    let every_row = posterior_predictive(
        simulator.dataset(),
        &simulator,
        &output.parameters,
        &PredictiveSettings::default(),
    )
    .unwrap();
    assert_eq!(every_row.simulations.len(), 10);

    assert!(matches!(
        posterior_predictive(
            simulator.dataset(),
            &simulator,
            &[],
            &PredictiveSettings::default()
        ),
        Err(AbcError::InvalidSettings(_))
    ));
}

#[test]
pub fn test_store_and_load_results() {
    let priors = vec![Prior::uniform("x", 0., 1.)];
    let settings = AbcSettings {
        nsim: 50,
        tolerance: Tolerance::Proportion(0.2),
        ..AbcSettings::default()
    };
    let output = run_abc(&identity_simulator, &priors, &[0.3], &settings).unwrap();
    let dir = std::env::temp_dir();
    for name in &["cultural_change_abc_test.json", "cultural_change_abc_test.bin"] {
        let path = dir.join(name);
        output.store(&path).unwrap();
        let loaded = AbcOutput::load(&path).unwrap();
        assert_eq!(loaded.names, output.names);
        assert_eq!(loaded.parameters, output.parameters);
        assert_eq!(loaded.distances, output.distances);
        assert_eq!(loaded.simulated, 50);
        let _ = std::fs::remove_file(path);
    }
}

#[test]
pub fn test_run_config() {
    let config: RunConfig = serde_json::from_str(
        r#"{
            "model": "neutral",
            "priors": [{"name": "mu", "family": "log-uniform", "lower": 0.001, "upper": 0.1}],
            "abc": {"nsim": 20, "tolerance": {"distance": 0.5}},
            "parameters": {"recording": "time-averaged", "replacement_rate": {"mean": 0.1, "variance": 0.0}}
        }"#,
    )
    .unwrap();
    assert_eq!(config.model, ModelChoice::Neutral);
    assert_eq!(config.free_parameters(), vec!["mu"]);
    assert_eq!(config.abc.nsim, 20);
    assert_eq!(config.abc.tolerance, Tolerance::Distance(0.5));
    assert_eq!(config.abc.seed, 1);
    assert_eq!(config.parameters.recording, Recording::TimeAveraged);
    assert_abs_diff_eq!(config.parameters.sampling_fraction.mean, 0.2);
    assert_abs_diff_eq!(config.parameters.replacement_rate.mean, 0.1);

    let data = Arc::new(three_phases());
    let output = infer(data, &config).unwrap();
    assert!(output.accepted() > 0);
    assert!(output.distances.iter().all(|&d| d <= 0.5));
}

#[test]
pub fn test_command_line_overrides() {
    assert_eq!(parse_fixed("mu=0.05"), Some(("mu".to_string(), 0.05)));
    assert_eq!(parse_fixed(" b = -1 "), Some(("b".to_string(), -1.)));
    assert_eq!(parse_fixed("mu"), None);
    assert_eq!(parse_fixed("=1"), None);
    assert_eq!(parse_fixed("mu=x"), None);

    let mut config = RunConfig::default();
    let options = Options {
        nsim: Some(50),
        tolerance: Some(0.1),
        replacement_rate_variance: Some(0.01),
        recording: Some(Recording::TimeAveraged),
        fixed: vec![("b".to_string(), 0.)],
        ..Options::default()
    };
    options.apply(&mut config);
    assert_eq!(config.free_parameters(), vec!["mu"]);
    assert_eq!(config.fixed, vec![("b".to_string(), 0.)]);
    assert_eq!(config.abc.nsim, 50);
    assert_eq!(config.abc.tolerance, Tolerance::Proportion(0.1));
    assert_abs_diff_eq!(config.parameters.replacement_rate.variance, 0.01);
    assert_eq!(config.parameters.recording, Recording::TimeAveraged);
    assert!(build_simulator(Arc::new(three_phases()), &config).is_ok());

    let mut config = RunConfig::default();
    let options = Options {
        model: Some(ModelChoice::Neutral),
        ..Options::default()
    };
    options.apply(&mut config);
    assert_eq!(config.model, ModelChoice::Neutral);
    assert_eq!(config.free_parameters(), vec!["mu"]);
}

#[test]
pub fn test_unreachable_normal_prior_is_an_error() {
    let far = Prior {
        name: "b".to_string(),
        family: PriorFamily::Normal { mean: 0., sd: 1. },
        lower: 50.,
        upper: 51.,
    };
    assert!(far.validate().is_ok());
    let mut rng = task_rng(4, 0);
    assert!(matches!(far.draw(&mut rng), Err(AbcError::InvalidPrior { .. })));

    let settings = AbcSettings {
        nsim: 4,
        tolerance: Tolerance::Proportion(0.5),
        workers: 1,
        ..AbcSettings::default()
    };
    assert!(matches!(
        run_abc(&identity_simulator, &[far], &[50.5], &settings),
        Err(AbcError::InvalidPrior { .. })
    ));
}

#[test]
pub fn test_input_errors_are_typed() {
    let dir = std::env::temp_dir();
    let missing = dir.join("cultural_change_abc_missing.json");
    let _ = std::fs::remove_file(&missing);
    assert!(matches!(
        FrequencyDataset::load(&missing),
        Err(InputError::Io(_))
    ));
    assert!(matches!(RunConfig::load(&missing), Err(InputError::Io(_))));

    let single = dir.join("cultural_change_abc_single_phase.json");
    std::fs::write(
        &single,
        r#"{"counts": [[4, 1]], "timestamps": [2], "durations": []}"#,
    )
    .unwrap();
    assert!(matches!(
        FrequencyDataset::load(&single),
        Err(InputError::Validation(ValidationError::TooFewPhases(1)))
    ));
    let _ = std::fs::remove_file(&single);

    let broken = dir.join("cultural_change_abc_broken.json");
    std::fs::write(&broken, r#"{"model": "#).unwrap();
    assert!(matches!(RunConfig::load(&broken), Err(InputError::Json(_))));
    let _ = std::fs::remove_file(&broken);

    let options = Options {
        data: missing.to_string_lossy().into_owned(),
        ..Options::default()
    };
    assert!(matches!(options.configure(), Err(InputError::Io(_))));

    let mut config = RunConfig::default();
    config.fixed.push(("q".to_string(), 1.));
    let data = Arc::new(three_phases());
    assert!(matches!(
        build_simulator(data.clone(), &config),
        Err(ConfigurationError::UnknownParameter(_))
    ));
    assert!(matches!(
        infer(data, &config),
        Err(AbcError::Configuration(ConfigurationError::UnknownParameter(_)))
    ));
}
