//! End-to-end network behavior: the training scenario, persistence
//! round-trips, and solver compatibility.

use rand::rngs::StdRng;
use rand::SeedableRng;
use starling::{CellType, Model, Network, Solver};

fn corpus(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn scenario_network(seed: u64) -> Network {
    Network::with_rng(
        &corpus(&["ab", "ba"]),
        5,
        vec![4],
        CellType::Gru,
        StdRng::seed_from_u64(seed),
    )
    .unwrap()
}

#[test]
fn scenario_sizes_match_corpus() {
    let net = scenario_network(1);
    assert_eq!(net.codec().charset(), &['a', 'b']);
    assert_eq!(net.params().input_size, 3);
    assert_eq!(net.params().output_size, 3);
    assert_eq!(net.params().max_gen, 2);
}

#[test]
fn training_cost_trends_down_over_500_iterations() {
    let mut net = scenario_network(2);

    let costs: Vec<f32> = (0..500).map(|_| net.train(0.01).unwrap().1).collect();
    assert_eq!(net.iterations(), 500);
    assert!(costs.iter().all(|c| c.is_finite() && *c >= 0.0));

    let window = |range: std::ops::Range<usize>| -> f32 {
        let slice = &costs[range];
        slice.iter().sum::<f32>() / slice.len() as f32
    };

    let early = window(0..100);
    let late = window(400..500);
    assert!(
        late < early,
        "average cost did not decrease: early {early}, late {late}"
    );
}

#[test]
fn trained_predictions_stay_within_corpus_alphabet() {
    let mut net = scenario_network(3);
    for _ in 0..500 {
        net.train(0.01).unwrap();
    }

    for _ in 0..100 {
        let s = net.predict(1.0).unwrap();
        assert!(
            matches!(s.as_str(), "" | "a" | "b" | "ab" | "ba"),
            "unexpected sample {s:?}"
        );
    }
}

#[test]
fn persist_restore_preserves_iterations_and_outputs() {
    let mut net = scenario_network(4);
    for _ in 0..50 {
        net.train(0.01).unwrap();
    }

    let record = net.persist();
    let mut first = Network::restore_with_rng(record.clone(), StdRng::seed_from_u64(77)).unwrap();
    let mut second = Network::restore_with_rng(record, StdRng::seed_from_u64(77)).unwrap();

    assert_eq!(first.iterations(), 50);
    assert_eq!(second.iterations(), 50);

    for _ in 0..20 {
        assert_eq!(first.predict(0.9).unwrap(), second.predict(0.9).unwrap());
    }
}

#[test]
fn restore_without_solver_matches_zero_state_solver() {
    let mut net = scenario_network(5);
    for _ in 0..20 {
        net.train(0.01).unwrap();
    }
    let record = net.persist();

    let mut without_solver = record.clone();
    without_solver.solver = None;

    let mut with_zero_solver = record.clone();
    let model = Model::import(record.model.clone()).unwrap();
    with_zero_solver.solver = Some(Solver::new().export(&model));

    let mut a = Network::restore_with_rng(without_solver, StdRng::seed_from_u64(33)).unwrap();
    let mut b = Network::restore_with_rng(with_zero_solver, StdRng::seed_from_u64(33)).unwrap();

    for _ in 0..10 {
        assert_eq!(a.train(0.01).unwrap(), b.train(0.01).unwrap());
    }
    assert_eq!(
        serde_json::to_string(&a.persist()).unwrap(),
        serde_json::to_string(&b.persist()).unwrap()
    );
}

#[test]
fn checkpoint_file_roundtrip() {
    let path = std::env::temp_dir().join("starling_checkpoint_test.json");
    let mut net = scenario_network(6);
    for _ in 0..10 {
        net.train(0.01).unwrap();
    }
    net.save(&path).unwrap();

    let restored = Network::load(&path).unwrap();
    assert_eq!(restored.iterations(), 10);
    assert_eq!(restored.params(), net.params());
    assert_eq!(restored.codec().charset(), net.codec().charset());

    std::fs::remove_file(&path).ok();
}

#[test]
fn restore_rejects_model_inconsistent_with_params() {
    let net = scenario_network(7);
    let mut record = net.persist();
    record.params.hidden_sizes = vec![6];
    assert!(Network::restore(record).is_err());
}

#[test]
fn restore_rejects_charset_size_mismatch() {
    let net = scenario_network(8);
    let mut record = net.persist();
    record.data.charset.push('c');
    assert!(Network::restore(record).is_err());
}

#[test]
fn lstm_scenario_trains_and_roundtrips() {
    let mut net = Network::with_rng(
        &corpus(&["ab", "ba"]),
        5,
        vec![4],
        CellType::Lstm,
        StdRng::seed_from_u64(9),
    )
    .unwrap();
    for _ in 0..100 {
        let (ppl, cost) = net.train(0.01).unwrap();
        assert!(ppl.is_finite() && cost.is_finite());
    }

    let restored = Network::restore(net.persist()).unwrap();
    assert_eq!(restored.iterations(), 100);
    assert_eq!(restored.params().cell, CellType::Lstm);
}
