//! Network orchestration: construct, train, predict, persist, restore.
//!
//! [`Network`] ties the collaborators together (one [`Model`], one
//! [`Solver`], one [`CharsetCodec`], immutable [`Params`], and one
//! rebuildable [`Graph`]) and drives them through the two walks that
//! make up the whole training lifecycle:
//!
//! - [`Network::train`] draws a random corpus example, runs the
//!   teacher-forced cost walk while writing softmax-cross-entropy
//!   gradients into the output nodes, replays the tape backward into
//!   every model matrix, and applies exactly one solver update. It is
//!   the only operation that mutates model, solver, or the iteration
//!   counter.
//! - [`Network::predict`] runs the cell autoregressively from the
//!   sentinel, sampling each next character from a temperature-scaled
//!   softmax until it samples the sentinel or reaches the generation
//!   cap, then discards the tape without a backward pass.
//!
//! ## Teacher-forced cost walk
//!
//! For an example of length L the walk performs L+1 steps over virtual
//! positions i = −1 … L−1. The input at i = −1 is the sentinel, else the
//! index of character i; the target is the index of character i+1 while
//! i < L−1, else the sentinel: every step predicts the next character,
//! and the final step predicts end-of-sequence. Two running sums are
//! kept: natural-log loss for optimization and base-2 log loss for the
//! reported perplexity `2^(log2ppl / max(L−1, 1))` (the clamp keeps the
//! degenerate L ≤ 1 examples finite).
//!
//! ## Persistence
//!
//! [`Network::persist`] captures codec, model, solver, params, and the
//! iteration count into a [`NetworkRecord`]; [`Network::restore`]
//! rebuilds a network from one, accepting records without solver state
//! for compatibility with checkpoints written before the solver was
//! persisted. [`Network::save`] and [`Network::load`] wrap the record
//! in a JSON file.
//!
//! ## Example
//!
//! ```rust,no_run
//! use starling::{CellType, Network};
//!
//! let corpus: Vec<String> = vec!["ab".into(), "ba".into()];
//! let mut net = Network::new(&corpus, 5, vec![20, 20], CellType::Gru).unwrap();
//!
//! for _ in 0..500 {
//!     let (perplexity, cost) = net.train(0.002).unwrap();
//!     println!("ppl {perplexity:.2} cost {cost:.4}");
//! }
//!
//! let sample = net.predict(1.0).unwrap();
//! net.save("net-state.json").unwrap();
//! ```

use crate::cell::{CellType, StepState};
use crate::codec::{CharsetCodec, CodecRecord};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::model::{Model, ModelRecord};
use crate::solver::{Solver, SolverRecord};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Architecture parameters, immutable once a network is constructed and
/// replaced wholesale on restore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    #[serde(rename = "type")]
    pub cell: CellType,
    /// Generation length cap; the longest corpus example at construction.
    pub max_gen: usize,
    /// Charset size + 1 (index 0 is the sentinel).
    pub input_size: usize,
    /// Width of the character embedding.
    pub letter_size: usize,
    /// Hidden layer widths, input-to-output order.
    pub hidden_sizes: Vec<usize>,
    /// Equal to `input_size`.
    pub output_size: usize,
}

impl Params {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_gen == 0 {
            return Err(Error::Configuration(
                "max_gen must be at least 1 (corpus has no non-empty example)".to_string(),
            ));
        }
        if self.letter_size == 0 {
            return Err(Error::Configuration("letter_size must be positive".to_string()));
        }
        if self.hidden_sizes.is_empty() {
            return Err(Error::Configuration(
                "hidden_sizes must name at least one layer".to_string(),
            ));
        }
        if self.hidden_sizes.iter().any(|&h| h == 0) {
            return Err(Error::Configuration(
                "hidden layer widths must be positive".to_string(),
            ));
        }
        if self.input_size < 2 || self.input_size != self.output_size {
            return Err(Error::Configuration(format!(
                "input_size {} / output_size {} must be equal and at least 2",
                self.input_size, self.output_size
            )));
        }
        Ok(())
    }
}

/// Persisted form of a [`Network`]. The graph is derived state and is
/// not part of the record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub data: CodecRecord,
    pub model: ModelRecord,
    /// Absent in records written before solver state was persisted; a
    /// fresh zero-state solver is used instead.
    #[serde(default)]
    pub solver: Option<SolverRecord>,
    pub params: Params,
    pub iterations: u64,
}

/// A trainable character-level recurrent text generator.
pub struct Network {
    codec: CharsetCodec,
    model: Model,
    solver: Solver,
    params: Params,
    graph: Graph,
    iterations: u64,
    rng: StdRng,
}

impl Network {
    /// Construct a fresh network over a corpus.
    ///
    /// Derives the codec from the corpus, sizes the input and output
    /// layers as charset + sentinel, initializes model parameters with
    /// the cell-specific initializer, and caps generation at the length
    /// of the longest example.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` if the corpus is empty, contains only
    /// empty strings, or any size argument is zero.
    pub fn new(
        corpus: &[String],
        letter_size: usize,
        hidden_sizes: Vec<usize>,
        cell: CellType,
    ) -> Result<Self> {
        Self::with_rng(corpus, letter_size, hidden_sizes, cell, StdRng::from_os_rng())
    }

    /// [`Network::new`] with a caller-provided random source, so
    /// initialization, example selection, and sampling are reproducible.
    pub fn with_rng(
        corpus: &[String],
        letter_size: usize,
        hidden_sizes: Vec<usize>,
        cell: CellType,
        mut rng: StdRng,
    ) -> Result<Self> {
        let codec = CharsetCodec::from_corpus(corpus)?;
        let io_size = codec.charset_len() + 1;
        let params = Params {
            cell,
            max_gen: codec.max_length(),
            input_size: io_size,
            letter_size,
            hidden_sizes,
            output_size: io_size,
        };
        params.validate()?;

        let model = cell.cell().init(&params, &mut rng);
        let graph = Graph::build(cell, &model, &params)?;

        Ok(Self {
            codec,
            model,
            solver: Solver::new(),
            params,
            graph,
            iterations: 0,
            rng,
        })
    }

    /// Architecture parameters.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Character codec derived from the corpus.
    pub fn codec(&self) -> &CharsetCodec {
        &self.codec
    }

    /// Number of successful training iterations.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Total number of trainable parameters.
    pub fn num_parameters(&self) -> usize {
        self.model.num_parameters()
    }

    /// Run one training step and return `(perplexity, cost)`.
    ///
    /// Draws one corpus example uniformly at random, runs the
    /// teacher-forced cost walk, backpropagates through the tape,
    /// applies one solver update at `step_size`, and increments the
    /// iteration counter.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for a non-positive or non-finite
    /// `step_size`. A failed call leaves model, solver, and the
    /// iteration counter unchanged.
    pub fn train(&mut self, step_size: f32) -> Result<(f32, f32)> {
        if !step_size.is_finite() || step_size <= 0.0 {
            return Err(Error::Configuration(format!(
                "step_size must be a positive finite number, got {step_size}"
            )));
        }

        let text = self.codec.random_example(&mut self.rng).to_string();
        let result = match self.cost_walk(&text) {
            Ok(result) => result,
            Err(err) => {
                self.graph.clear();
                return Err(err);
            }
        };

        while self.graph.backward_step(&mut self.model) {}
        self.graph.clear();

        self.solver.step(&mut self.model, step_size);
        self.iterations += 1;
        Ok(result)
    }

    /// Teacher-forced walk over one example; returns `(perplexity,
    /// cost)` and leaves the per-step cross-entropy gradients in the
    /// graph's output nodes.
    fn cost_walk(&mut self, text: &str) -> Result<(f32, f32)> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();

        let mut cost = 0.0f32;
        let mut log2ppl = 0.0f32;
        let mut prev: Option<StepState> = None;

        for step in 0..=len {
            let ix_source = if step == 0 {
                0
            } else {
                self.codec.char_to_index(chars[step - 1])?
            };
            let ix_target = if step < len {
                self.codec.char_to_index(chars[step])?
            } else {
                0
            };

            let state = self.graph.cell_step(&self.model, ix_source, prev.as_ref());
            let probs = self.graph.softmax(state.output);

            let p = probs[ix_target];
            log2ppl -= p.log2();
            cost -= p.ln();

            let grad = self.graph.grad_mut(state.output);
            grad.copy_from_slice(&probs);
            grad[ix_target] -= 1.0;

            prev = Some(state);
        }

        let norm = len.saturating_sub(1).max(1) as f32;
        Ok((2.0f32.powf(log2ppl / norm), cost))
    }

    /// Generate one string by autoregressive sampling.
    ///
    /// Logits are divided by `temperature` before the softmax; values
    /// below 1 sharpen the distribution, values above 1 flatten it.
    /// Generation stops when the sentinel is sampled or the output
    /// reaches `params.max_gen` characters, whichever comes first; the
    /// sentinel is never appended, so the result may be empty.
    ///
    /// Does not mutate model, solver, or the iteration counter.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for a non-positive or non-finite
    /// temperature.
    pub fn predict(&mut self, temperature: f32) -> Result<String> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::Configuration(format!(
                "temperature must be a positive finite number, got {temperature}"
            )));
        }

        let mut out = String::new();
        let mut generated = 0usize;
        let mut ix = 0usize;
        let mut prev: Option<StepState> = None;

        loop {
            let state = self.graph.cell_step(&self.model, ix, prev.as_ref());

            if temperature != 1.0 {
                for logit in self.graph.value_mut(state.output) {
                    *logit /= temperature;
                }
            }

            let probs = self.graph.softmax(state.output);
            let picked = weighted_sample(&probs, &mut self.rng);

            if picked == 0 || generated >= self.params.max_gen {
                break;
            }
            let Some(c) = self.codec.index_to_char(picked) else {
                break;
            };

            out.push(c);
            generated += 1;
            ix = picked;
            prev = Some(state);
        }

        self.graph.clear();
        Ok(out)
    }

    /// Capture the full persistent state of the network.
    pub fn persist(&self) -> NetworkRecord {
        NetworkRecord {
            data: self.codec.export(),
            model: self.model.export(),
            solver: Some(self.solver.export(&self.model)),
            params: self.params.clone(),
            iterations: self.iterations,
        }
    }

    /// Rebuild a network from a persisted record.
    ///
    /// The graph is reconstructed from the record's cell type, model,
    /// and hidden sizes; no gradient history is replayed. Restoration
    /// either fully succeeds or fails without side effects.
    ///
    /// # Errors
    ///
    /// `Error::Configuration` for invalid params,
    /// `Error::Serialization` for a codec/model/solver record that is
    /// malformed or inconsistent with the params.
    pub fn restore(record: NetworkRecord) -> Result<Self> {
        Self::restore_with_rng(record, StdRng::from_os_rng())
    }

    /// [`Network::restore`] with a caller-provided random source.
    pub fn restore_with_rng(record: NetworkRecord, rng: StdRng) -> Result<Self> {
        record.params.validate()?;

        let codec = CharsetCodec::import(record.data)?;
        if record.params.input_size != codec.charset_len() + 1 {
            return Err(Error::Serialization(format!(
                "params declare input_size {} but the charset has {} characters",
                record.params.input_size,
                codec.charset_len()
            )));
        }

        let model = Model::import(record.model)?;
        let graph = Graph::build(record.params.cell, &model, &record.params)?;
        let solver = match record.solver {
            Some(solver_record) => Solver::import(solver_record, &model)?,
            None => Solver::new(),
        };

        Ok(Self {
            codec,
            model,
            solver,
            params: record.params,
            graph,
            iterations: record.iterations,
            rng,
        })
    }

    /// Persist to a JSON checkpoint file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.persist())?;
        writer.flush()?;
        Ok(())
    }

    /// Load a network from a JSON checkpoint file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let record: NetworkRecord = serde_json::from_reader(BufReader::new(file))?;
        Self::restore(record)
    }
}

/// Draw an index with probability proportional to `probs`.
///
/// Falls back to the last index if accumulated rounding leaves the draw
/// above the final cumulative sum.
pub fn weighted_sample(probs: &[f32], rng: &mut impl Rng) -> usize {
    let draw: f32 = rng.random();
    let mut acc = 0.0;
    for (ix, &p) in probs.iter().enumerate() {
        acc += p;
        if draw < acc {
            return ix;
        }
    }
    probs.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn seeded(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn construction_derives_sizes_from_corpus() {
        let net = Network::with_rng(
            &corpus(&["ab", "ba"]),
            5,
            vec![4],
            CellType::Gru,
            seeded(1),
        )
        .unwrap();

        assert_eq!(net.params().input_size, 3);
        assert_eq!(net.params().output_size, 3);
        assert_eq!(net.params().max_gen, 2);
        assert_eq!(net.iterations(), 0);
        assert_eq!(net.codec().charset(), &['a', 'b']);
    }

    #[test]
    fn construction_rejects_bad_configuration() {
        assert!(matches!(
            Network::new(&[], 5, vec![4], CellType::Gru),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Network::new(&corpus(&["ab"]), 0, vec![4], CellType::Gru),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Network::new(&corpus(&["ab"]), 5, vec![], CellType::Gru),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Network::new(&corpus(&["ab"]), 5, vec![4, 0], CellType::Gru),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            Network::new(&corpus(&[""]), 5, vec![4], CellType::Gru),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn train_increments_iterations_and_stays_finite() {
        let mut net = Network::with_rng(
            &corpus(&["ab", "ba"]),
            5,
            vec![4],
            CellType::Gru,
            seeded(2),
        )
        .unwrap();

        for expected in 1..=10 {
            let (ppl, cost) = net.train(0.01).unwrap();
            assert!(ppl.is_finite() && ppl >= 0.0);
            assert!(cost.is_finite() && cost >= 0.0);
            assert_eq!(net.iterations(), expected);
        }
    }

    #[test]
    fn invalid_step_size_leaves_network_untouched() {
        let mut net = Network::with_rng(
            &corpus(&["ab", "ba"]),
            5,
            vec![4],
            CellType::Gru,
            seeded(3),
        )
        .unwrap();
        net.train(0.01).unwrap();
        let snapshot = serde_json::to_string(&net.persist()).unwrap();

        for bad in [0.0, -1.0, f32::NAN, f32::INFINITY] {
            assert!(matches!(net.train(bad), Err(Error::Configuration(_))));
        }

        assert_eq!(serde_json::to_string(&net.persist()).unwrap(), snapshot);
        assert_eq!(net.iterations(), 1);
    }

    #[test]
    fn single_character_examples_have_finite_perplexity() {
        let mut net =
            Network::with_rng(&corpus(&["a"]), 5, vec![4], CellType::Gru, seeded(4)).unwrap();
        for _ in 0..5 {
            let (ppl, cost) = net.train(0.01).unwrap();
            assert!(ppl.is_finite());
            assert!(cost.is_finite());
        }
    }

    #[test]
    fn cost_walk_performs_length_plus_one_steps() {
        let mut net = Network::with_rng(
            &corpus(&["ab", "ba"]),
            5,
            vec![4],
            CellType::Gru,
            seeded(10),
        )
        .unwrap();

        // The per-step tape footprint is constant, so tape length
        // scales with the L+1 steps of the walk.
        net.cost_walk("a").unwrap();
        let two_steps = net.graph.tape_len();
        net.graph.clear();

        net.cost_walk("ab").unwrap();
        let three_steps = net.graph.tape_len();
        net.graph.clear();

        assert_eq!(two_steps % 2, 0);
        assert_eq!(three_steps, two_steps / 2 * 3);
    }

    #[test]
    fn predict_respects_length_cap_and_charset() {
        let mut net = Network::with_rng(
            &corpus(&["ab", "ba"]),
            5,
            vec![4],
            CellType::Gru,
            seeded(5),
        )
        .unwrap();

        for _ in 0..50 {
            let s = net.predict(1.0).unwrap();
            assert!(s.chars().count() <= 2);
            assert!(s.chars().all(|c| c == 'a' || c == 'b'));
        }
        assert_eq!(net.iterations(), 0);
    }

    #[test]
    fn predict_rejects_bad_temperature() {
        let mut net =
            Network::with_rng(&corpus(&["ab"]), 5, vec![4], CellType::Gru, seeded(6)).unwrap();
        for bad in [0.0, -0.5, f32::NAN, f32::INFINITY] {
            assert!(matches!(net.predict(bad), Err(Error::Configuration(_))));
        }
    }

    #[test]
    fn predict_is_reproducible_with_identical_rng() {
        let build = || {
            Network::with_rng(
                &corpus(&["ab", "ba"]),
                5,
                vec![4],
                CellType::Gru,
                seeded(7),
            )
            .unwrap()
        };
        let mut a = build();
        let mut b = build();
        for _ in 0..10 {
            assert_eq!(a.predict(0.7).unwrap(), b.predict(0.7).unwrap());
        }
    }

    #[test]
    fn lstm_network_trains_and_predicts() {
        let mut net = Network::with_rng(
            &corpus(&["ab", "ba"]),
            5,
            vec![4, 3],
            CellType::Lstm,
            seeded(8),
        )
        .unwrap();
        for _ in 0..10 {
            let (ppl, cost) = net.train(0.01).unwrap();
            assert!(ppl.is_finite() && cost.is_finite());
        }
        let s = net.predict(1.0).unwrap();
        assert!(s.chars().count() <= 2);
    }

    #[test]
    fn weighted_sample_is_proportional() {
        let mut rng = seeded(9);
        let probs = [0.0, 1.0, 0.0];
        for _ in 0..20 {
            assert_eq!(weighted_sample(&probs, &mut rng), 1);
        }

        let probs = [0.5, 0.5];
        let mut counts = [0usize; 2];
        for _ in 0..2000 {
            counts[weighted_sample(&probs, &mut rng)] += 1;
        }
        assert!(counts[0] > 800 && counts[1] > 800);
    }
}
