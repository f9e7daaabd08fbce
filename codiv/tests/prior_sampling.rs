//! Long runs that ignore the data and must recover the prior.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use codiv::config::{Config, RunSettings};
use codiv::io::{StateLogWriter, read_last_state};
use codiv::mcmc::chain::{Chain, McmcSettings};
use codiv::mcmc::schedule::OperatorSchedule;
use codiv::mcmc::{Link, PriorAgreementOptions, PriorAgreementTest, Sampler};
use codiv::models::state::State;
use codiv::models::{Collection, IgnoreData};
use codiv::utils::MeanAndVariance;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde_json::json;

const BURN_IN: usize = 5_000;

fn fixed_pair(label: &str) -> serde_json::Value {
    json!({
        "label": label,
        "populations": [format!("{label}1"), format!("{label}2")],
        "population_sizes": { "leaf": { "value": 1.0 } }
    })
}

fn settings(comparisons: &[serde_json::Value], event_model: &serde_json::Value) -> RunSettings {
    settings_with(comparisons, event_model, &adaptive())
}

fn settings_with(
    comparisons: &[serde_json::Value],
    event_model: &serde_json::Value,
    operator_settings: &serde_json::Value,
) -> RunSettings {
    let config: Config = serde_json::from_value(json!({
        "comparisons": comparisons,
        "event_time_prior": { "gamma_distribution": { "shape": 5.0, "scale": 0.1 } },
        "event_model_prior": event_model,
        "operator_settings": operator_settings
    }))
    .expect("well formed");
    config.into_settings().expect("valid")
}

fn adaptive() -> serde_json::Value {
    json!({ "auto_optimize_delay": 1000 })
}

/// Tunings held at hand picked values for the whole run.
fn fixed_tunings() -> serde_json::Value {
    json!({
        "auto_optimize": false,
        "operators": {
            "EventTimeScaler": { "scale": 0.5 },
            "FreqMover": { "window": 0.5 },
            "RelativePopulationSizeMixer": { "scale": 0.1 }
        }
    })
}

/// `n` statistics of a thinned chain started from the initial state.
fn sample<T, F>(run: &RunSettings, seed: u64, n: usize, thinning: usize, stat: F) -> Vec<T>
where
    F: Fn(&Link<State>) -> T,
{
    let collection = Collection::new(run.model.clone(), IgnoreData);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut chain = Chain::new(OperatorSchedule::new(&run.schedule, &run.model).expect("valid"));
    let start = Link::new(State::initial(&run.model, &mut rng), &collection);
    chain
        .iter_sample(start, &collection, &mut rng, stat)
        .skip(BURN_IN)
        .step_by(thinning)
        .take(n)
        .collect()
}

fn mean_and_variance(xs: &[f64]) -> (f64, f64) {
    let moments: MeanAndVariance = xs.iter().copied().collect();
    (moments.mean(), moments.sample_variance())
}

#[allow(clippy::cast_precision_loss)]
fn frequencies(labels: &[String]) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for label in labels {
        *counts.entry(label.clone()).or_insert(0.0) += 1.0;
    }
    counts
        .into_iter()
        .map(|(label, count)| (label, count / labels.len() as f64))
        .collect()
}

fn check_event_times(operator_settings: &serde_json::Value, seed: u64) {
    let run = settings_with(
        &[fixed_pair("a"), fixed_pair("b")],
        &json!({ "fixed": [0, 1] }),
        operator_settings,
    );
    let times = sample(&run, seed, 20_000, 10, |link| {
        link.model.partition.time_of(0)
    });
    let (mean, variance) = mean_and_variance(&times);
    assert::close(mean, 0.5, 0.02);
    assert::close(variance, 0.05, 0.008);
}

#[test]
fn fixed_tunings_switch_adaptation_off() {
    let run = settings_with(&[fixed_pair("a"), fixed_pair("b")], &json!({ "fixed": [0, 1] }), &fixed_tunings());
    assert!(!run.schedule.auto_optimize);
    assert!(settings(&[fixed_pair("a"), fixed_pair("b")], &json!({ "fixed": [0, 1] })).schedule.auto_optimize);
}

#[test]
fn event_times_follow_their_prior() {
    check_event_times(&adaptive(), 11);
}

#[test]
fn event_times_follow_their_prior_with_fixed_tunings() {
    check_event_times(&fixed_tunings(), 21);
}

#[test]
fn dirichlet_process_shares_two_events_half_the_time() {
    let run = settings(
        &[fixed_pair("a"), fixed_pair("b")],
        &json!({ "dirichlet_process": { "concentration": { "value": 1.0 } } }),
    );
    let shared = sample(&run, 12, 20_000, 5, |link| {
        f64::from(u8::from(link.model.n_events() == 1))
    });
    let (p_shared, _) = mean_and_variance(&shared);
    assert::close(p_shared, 0.5, 0.03);
}

#[test]
fn uniform_prior_visits_every_partition_equally() {
    let pairs: Vec<_> = ["a", "b", "c", "d"].into_iter().map(fixed_pair).collect();
    let run = settings(&pairs, &json!({ "uniform": {} }));
    let labels = sample(&run, 13, 30_000, 10, |link| {
        link.model.partition.restricted_growth_string()
    });
    let freqs = frequencies(&labels);

    assert_eq!(freqs.len(), 15);
    for (label, freq) in &freqs {
        assert!((freq - 1.0 / 15.0).abs() < 0.015, "{label}: {freq}");
    }

    let mut by_events = [0.0; 4];
    for (label, freq) in &freqs {
        let k = label.chars().collect::<std::collections::HashSet<_>>().len();
        by_events[k - 1] += freq;
    }
    let expected = [1.0 / 15.0, 7.0 / 15.0, 6.0 / 15.0, 1.0 / 15.0];
    for (found, expected) in by_events.iter().zip(expected) {
        assert::close(*found, expected, 0.02);
    }
}

#[test]
fn pitman_yor_partition_probabilities() {
    let pairs: Vec<_> = ["a", "b", "c"].into_iter().map(fixed_pair).collect();
    let run = settings(
        &pairs,
        &json!({
            "pitman_yor_process": {
                "concentration": { "value": 1.0 },
                "discount": { "value": 0.5 }
            }
        }),
    );
    let labels = sample(&run, 14, 20_000, 5, |link| {
        link.model.partition.restricted_growth_string()
    });
    let freqs = frequencies(&labels);

    // (θ + d)(θ + 2d) / (θ + 1)(θ + 2) for three singletons, the rest split
    // evenly between the single event and the three pairings
    let expected = [
        ("000", 0.125),
        ("001", 0.125),
        ("010", 0.125),
        ("011", 0.125),
        ("012", 0.5),
    ];
    for (label, p) in expected {
        let found = freqs.get(label).copied().unwrap_or(0.0);
        assert!((found - p).abs() < 0.02, "{label}: {found} vs {p}");
    }
}

#[test]
fn fixed_partitions_never_change_and_shared_events_share_times() {
    let pairs: Vec<_> = ["a", "b", "c"].into_iter().map(fixed_pair).collect();
    let run = settings(&pairs, &json!({ "fixed": [0, 0, 1] }));
    let draws = sample(&run, 15, 2_000, 5, |link| {
        let partition = &link.model.partition;
        (
            partition.restricted_growth_string(),
            link.model.view(0).time,
            link.model.view(1).time,
            link.model.view(2).time,
        )
    });
    assert!(draws.iter().all(|(label, a, b, c)| label == "001" && a == b && a != c));

    let run = settings(&pairs, &json!({ "fixed": [0, 1, 2] }));
    let draws = sample(&run, 19, 1_000, 5, |link| {
        (link.model.n_events(), link.model.partition.restricted_growth_string())
    });
    assert!(draws.iter().all(|(k, label)| *k == 3 && label == "012"));
}

fn check_comparison_parameters(operator_settings: &serde_json::Value, seed: u64) {
    let comparisons = [
        json!({
            "label": "a",
            "populations": ["a1", "a2"],
            "population_sizes": {
                "mean": { "prior": { "gamma_distribution": { "shape": 4.0, "scale": 0.25 } } },
                "multipliers": { "prior": { "dirichlet_distribution": { "alpha": [2.0, 2.0, 2.0] } } }
            },
            "freq_1": { "prior": { "beta_distribution": { "alpha": 2.0, "beta": 2.0 } } }
        }),
        fixed_pair("b"),
    ];
    let run = settings_with(&comparisons, &json!({ "fixed": [0, 1] }), operator_settings);
    let draws = sample(&run, seed, 20_000, 20, |link| {
        let comparison = &link.model.comparisons[0];
        let multipliers = comparison.multipliers().expect("multipliers").to_vec();
        (comparison.freq_1, multipliers)
    });

    let freqs: Vec<f64> = draws.iter().map(|(f, _)| *f).collect();
    let (mean, variance) = mean_and_variance(&freqs);
    assert::close(mean, 0.5, 0.02);
    assert::close(variance, 0.05, 0.008);

    for branch in 0..3 {
        let shares: Vec<f64> = draws.iter().map(|(_, m)| m[branch]).collect();
        let (mean, variance) = mean_and_variance(&shares);
        assert::close(mean, 1.0 / 3.0, 0.02);
        assert::close(variance, 8.0 / 252.0, 0.006);
    }
    assert!(draws
        .iter()
        .all(|(_, m)| (m.iter().sum::<f64>() - 1.0).abs() < 1e-9));
}

#[test]
fn comparison_parameters_follow_their_priors() {
    check_comparison_parameters(&adaptive(), 16);
}

#[test]
fn comparison_parameters_follow_their_priors_with_fixed_tunings() {
    check_comparison_parameters(&fixed_tunings(), 26);
}

#[test]
fn chain_agrees_with_direct_prior_draws() {
    let comparisons = [
        json!({
            "label": "a",
            "populations": ["a1", "a2"],
            "population_sizes": {
                "leaf": { "prior": { "gamma_distribution": { "shape": 4.0, "scale": 0.25 } } },
                "relative_root": { "prior": { "gamma_distribution": { "shape": 10.0, "scale": 0.1 } } }
            }
        }),
        json!({
            "label": "b",
            "populations": ["b1"],
            "population_sizes": {
                "leaf": { "prior": { "gamma_distribution": { "shape": 4.0, "scale": 0.25 } } }
            },
            "mutation_rate": { "prior": { "gamma_distribution": { "shape": 10.0, "scale": 0.1 } } }
        }),
        fixed_pair("c"),
    ];
    let run = settings(
        &comparisons,
        &json!({
            "dirichlet_process": {
                "concentration": { "prior": { "gamma_distribution": { "shape": 2.0, "scale": 1.0 } } }
            }
        }),
    );
    let collection = Collection::new(run.model.clone(), IgnoreData);
    let chain = Chain::new(OperatorSchedule::new(&run.schedule, &run.model).expect("valid"));
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(17);

    chain.assert_prior_agreement(
        &collection,
        PriorAgreementOptions {
            thinning: 50,
            n_samples: 1_000,
            burn_in: BURN_IN,
            min_p_value: 0.001,
            stat_map: |link: &Link<State>| {
                let state = &link.model;
                vec![
                    state.partition.time_of(0),
                    state.partition.time_of(2),
                    state.comparisons[0].root_size(),
                    state.comparisons[1].mutation_rate,
                    state.process.concentration().unwrap_or(f64::NAN),
                ]
            },
        },
        &mut rng,
    );
}

#[test]
fn logged_states_resume_exactly() {
    let comparisons = [
        json!({
            "label": "a",
            "populations": ["a1", "a2"],
            "population_sizes": {
                "leaf": { "prior": { "gamma_distribution": { "shape": 4.0, "scale": 0.25 } } }
            },
            "freq_1": { "prior": { "beta_distribution": { "alpha": 2.0, "beta": 2.0 } } }
        }),
        fixed_pair("b"),
        fixed_pair("c"),
    ];
    let run = settings(
        &comparisons,
        &json!({ "uniform": { "split_weight": { "prior": { "gamma_distribution": { "shape": 2.0, "scale": 1.0 } } } } }),
    );
    let collection = Collection::new(run.model.clone(), IgnoreData);
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(18);
    let start = Link::new(State::initial(&run.model, &mut rng), &collection);
    let mut writer = StateLogWriter::new(Vec::new(), &run.model).expect("header");
    let summary = Chain::new(OperatorSchedule::new(&run.schedule, &run.model).expect("valid"))
        .run(
            start,
            &collection,
            &McmcSettings::new(3_000, 100).expect("valid"),
            &mut writer,
            &AtomicBool::new(false),
            &mut rng,
        )
        .expect("runs");

    let log = writer.into_inner();
    let (generation, state) = read_last_state(log.as_slice(), &run.model).expect("readable");
    let last = summary.last.model;
    assert_eq!(generation, 3_000);
    assert_eq!(
        state.partition.restricted_growth_string(),
        last.partition.restricted_growth_string()
    );
    for i in 0..3 {
        assert_eq!(state.partition.time_of(i), last.partition.time_of(i));
    }
    assert_eq!(state.comparisons, last.comparisons);
    assert_eq!(state.process.split_weight(), last.process.split_weight());
}
