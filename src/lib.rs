//! Starling: Character-Level Recurrent Text Generation
//!
//! A character-level recurrent sequence model (GRU or LSTM) trained
//! from scratch on a corpus of short texts, generating new text by
//! temperature-controlled sampling. Everything is explicit: the
//! operation tape, the backward gradient rules, the optimizer update.
//!
//! # Modules
//!
//! - [`network`] - Orchestration: construct, train, predict, persist, restore
//! - [`cell`] - GRU and LSTM cell variants
//! - [`graph`] - Tape-based forward/backward computation
//! - [`model`] - Named parameter matrices
//! - [`solver`] - Adaptive per-parameter optimizer
//! - [`codec`] - Charset codec and corpus sampling
//! - [`logger`] - CSV training metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use starling::{CellType, Network};
//!
//! let corpus: Vec<String> = std::fs::read_to_string("corpus.txt")
//!     .unwrap()
//!     .lines()
//!     .map(str::to_string)
//!     .collect();
//!
//! let mut net = Network::new(&corpus, 5, vec![20, 20], CellType::Gru).unwrap();
//! for _ in 0..10_000 {
//!     net.train(0.002).unwrap();
//! }
//! println!("{}", net.predict(1.0).unwrap());
//! ```

pub mod cell;
pub mod codec;
pub mod error;
pub mod graph;
pub mod logger;
pub mod matrix;
pub mod model;
pub mod network;
pub mod solver;

// Re-export main types for convenience
pub use cell::CellType;
pub use codec::CharsetCodec;
pub use error::{Error, Result};
pub use logger::TrainingLogger;
pub use matrix::Matrix;
pub use model::Model;
pub use network::{weighted_sample, Network, NetworkRecord, Params};
pub use solver::Solver;
