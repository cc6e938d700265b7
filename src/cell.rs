//! Recurrent cell variants (GRU and LSTM).
//!
//! A cell type bundles three things, fixed once when a network is
//! constructed: a parameter initializer, a wiring resolver that maps
//! parameter names to model indices while validating every shape, and a
//! single forward step that records its operations on the graph tape.
//!
//! Both cells share the same outer structure: the input symbol is
//! embedded by plucking a row of `wil`, the embedding flows through one
//! or more gated recurrent layers, and the top layer's hidden state is
//! decoded to logits through `whd`/`bd`. They differ only in their gate
//! equations:
//!
//! ```text
//! GRU layer d:
//!   z = sigmoid(wzx·x + wzh·h + bz)        update gate
//!   r = sigmoid(wrx·x + wrh·h + br)        reset gate
//!   c = tanh(wcx·x + wch·(r⊙h) + bc)       candidate
//!   h' = (1−z)⊙h + z⊙c
//!
//! LSTM layer d:
//!   i = sigmoid(wix·x + wih·h + bi)        input gate
//!   f = sigmoid(wfx·x + wfh·h + bf)        forget gate
//!   o = sigmoid(wox·x + woh·h + bo)        output gate
//!   g = tanh(wcx·x + wch·h + bc)           cell write
//!   c' = f⊙c + i⊙g
//!   h' = o⊙tanh(c')
//! ```

use crate::error::{Error, Result};
use crate::graph::{Graph, Slot};
use crate::matrix::Matrix;
use crate::model::Model;
use crate::network::Params;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Standard deviation for gaussian parameter initialization.
const INIT_STD: f32 = 0.08;

/// Which recurrent cell a network uses. Fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Gru,
    Lstm,
}

impl CellType {
    pub(crate) fn cell(&self) -> &'static dyn RecurrentCell {
        match self {
            CellType::Gru => &GruCell,
            CellType::Lstm => &LstmCell,
        }
    }
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellType::Gru => write!(f, "gru"),
            CellType::Lstm => write!(f, "lstm"),
        }
    }
}

impl std::str::FromStr for CellType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gru" => Ok(CellType::Gru),
            "lstm" => Ok(CellType::Lstm),
            other => Err(Error::Configuration(format!(
                "unknown cell type {other:?} (expected \"gru\" or \"lstm\")"
            ))),
        }
    }
}

/// Hidden state handed from one forward step to the next within a
/// single walk. Holds graph node handles, so it is invalidated by
/// `Graph::clear` and must never outlive the walk that produced it.
pub struct StepState {
    pub(crate) hidden: Vec<usize>,
    pub(crate) cell: Vec<usize>,
    /// Output node holding the unnormalized logits.
    pub output: usize,
}

/// Parameter indices for one gate: input projection, recurrent
/// projection, bias.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GateWiring {
    wx: usize,
    wh: usize,
    b: usize,
}

#[derive(Clone, Debug)]
pub(crate) enum LayerWiring {
    Gru {
        update: GateWiring,
        reset: GateWiring,
        candidate: GateWiring,
    },
    Lstm {
        input: GateWiring,
        forget: GateWiring,
        output: GateWiring,
        write: GateWiring,
    },
}

/// Resolved parameter indices for a full forward step.
#[derive(Clone, Debug)]
pub(crate) struct Wiring {
    letter: usize,
    layers: Vec<LayerWiring>,
    decoder_w: usize,
    decoder_b: usize,
    hidden_sizes: Vec<usize>,
}

pub(crate) trait RecurrentCell {
    /// Create and initialize all parameter matrices for this cell.
    fn init(&self, params: &Params, rng: &mut StdRng) -> Model;

    /// Resolve parameter names to model indices, validating shapes.
    fn wire(&self, model: &Model, params: &Params) -> Result<Wiring>;

    /// Record one forward application on the graph tape.
    fn forward_step(
        &self,
        g: &mut Graph,
        model: &Model,
        ix: usize,
        prev: Option<&StepState>,
    ) -> StepState;
}

/// Width of the input to layer `d`.
fn layer_input_size(params: &Params, d: usize) -> usize {
    if d == 0 {
        params.letter_size
    } else {
        params.hidden_sizes[d - 1]
    }
}

fn init_shared(model: &mut Model, params: &Params, rng: &mut StdRng) {
    model.push(
        "wil",
        Matrix::randn(params.input_size, params.letter_size, INIT_STD, rng),
    );
}

fn init_decoder(model: &mut Model, params: &Params, rng: &mut StdRng) {
    let top = *params.hidden_sizes.last().expect("validated non-empty");
    model.push("whd", Matrix::randn(params.output_size, top, INIT_STD, rng));
    model.push("bd", Matrix::zeros(params.output_size, 1));
}

fn init_gate(
    model: &mut Model,
    prefix: char,
    d: usize,
    h: usize,
    input: usize,
    rng: &mut StdRng,
) {
    model.push(format!("w{prefix}x{d}"), Matrix::randn(h, input, INIT_STD, rng));
    model.push(format!("w{prefix}h{d}"), Matrix::randn(h, h, INIT_STD, rng));
    model.push(format!("b{prefix}{d}"), Matrix::zeros(h, 1));
}

fn resolve(model: &Model, name: &str, rows: usize, cols: usize) -> Result<usize> {
    let ix = model.index_of(name).ok_or_else(|| {
        Error::Serialization(format!("model is missing parameter matrix {name:?}"))
    })?;
    let m = model.mat(ix);
    if m.rows != rows || m.cols != cols {
        return Err(Error::Serialization(format!(
            "parameter {name:?} has shape [{}, {}], expected [{rows}, {cols}]",
            m.rows, m.cols
        )));
    }
    Ok(ix)
}

fn resolve_gate(model: &Model, prefix: char, d: usize, h: usize, input: usize) -> Result<GateWiring> {
    Ok(GateWiring {
        wx: resolve(model, &format!("w{prefix}x{d}"), h, input)?,
        wh: resolve(model, &format!("w{prefix}h{d}"), h, h)?,
        b: resolve(model, &format!("b{prefix}{d}"), h, 1)?,
    })
}

fn resolve_shared(model: &Model, params: &Params, layers: Vec<LayerWiring>) -> Result<Wiring> {
    let top = *params.hidden_sizes.last().expect("validated non-empty");
    Ok(Wiring {
        letter: resolve(model, "wil", params.input_size, params.letter_size)?,
        layers,
        decoder_w: resolve(model, "whd", params.output_size, top)?,
        decoder_b: resolve(model, "bd", params.output_size, 1)?,
        hidden_sizes: params.hidden_sizes.clone(),
    })
}

/// `wx·x + wh·h + b`, the shared pre-activation of every gate.
fn gate_preact(g: &mut Graph, model: &Model, gate: &GateWiring, x: Slot, h: Slot) -> usize {
    let xh = g.mat_vec(model, Slot::Param(gate.wx), x);
    let hh = g.mat_vec(model, Slot::Param(gate.wh), h);
    let sum = g.add(model, Slot::Node(xh), Slot::Node(hh));
    g.add(model, Slot::Node(sum), Slot::Param(gate.b))
}

fn decode(g: &mut Graph, model: &Model, wiring: &Wiring, top_hidden: usize) -> usize {
    let proj = g.mat_vec(model, Slot::Param(wiring.decoder_w), Slot::Node(top_hidden));
    g.add(model, Slot::Node(proj), Slot::Param(wiring.decoder_b))
}

pub(crate) struct GruCell;

impl RecurrentCell for GruCell {
    fn init(&self, params: &Params, rng: &mut StdRng) -> Model {
        let mut model = Model::new();
        init_shared(&mut model, params, rng);
        for (d, &h) in params.hidden_sizes.iter().enumerate() {
            let input = layer_input_size(params, d);
            init_gate(&mut model, 'z', d, h, input, rng);
            init_gate(&mut model, 'r', d, h, input, rng);
            init_gate(&mut model, 'c', d, h, input, rng);
        }
        init_decoder(&mut model, params, rng);
        model
    }

    fn wire(&self, model: &Model, params: &Params) -> Result<Wiring> {
        let mut layers = Vec::with_capacity(params.hidden_sizes.len());
        for (d, &h) in params.hidden_sizes.iter().enumerate() {
            let input = layer_input_size(params, d);
            layers.push(LayerWiring::Gru {
                update: resolve_gate(model, 'z', d, h, input)?,
                reset: resolve_gate(model, 'r', d, h, input)?,
                candidate: resolve_gate(model, 'c', d, h, input)?,
            });
        }
        resolve_shared(model, params, layers)
    }

    fn forward_step(
        &self,
        g: &mut Graph,
        model: &Model,
        ix: usize,
        prev: Option<&StepState>,
    ) -> StepState {
        let wiring = g.wiring().clone();
        let mut x = g.row_pluck(model, Slot::Param(wiring.letter), ix);
        let mut hidden = Vec::with_capacity(wiring.layers.len());

        for (d, layer) in wiring.layers.iter().enumerate() {
            let LayerWiring::Gru {
                update,
                reset,
                candidate,
            } = layer
            else {
                unreachable!("GRU wiring holds GRU layers");
            };

            let h_prev = match prev {
                Some(p) => Slot::Node(p.hidden[d]),
                None => Slot::Node(g.leaf(vec![0.0; wiring.hidden_sizes[d]])),
            };
            let x_slot = Slot::Node(x);

            let z_pre = gate_preact(g, model, update, x_slot, h_prev);
            let z = g.sigmoid(model, Slot::Node(z_pre));
            let r_pre = gate_preact(g, model, reset, x_slot, h_prev);
            let r = g.sigmoid(model, Slot::Node(r_pre));

            let gated_prev = g.elt_mul(model, Slot::Node(r), h_prev);
            let cand_x = g.mat_vec(model, Slot::Param(candidate.wx), x_slot);
            let cand_h = g.mat_vec(model, Slot::Param(candidate.wh), Slot::Node(gated_prev));
            let cand_sum = g.add(model, Slot::Node(cand_x), Slot::Node(cand_h));
            let cand_pre = g.add(model, Slot::Node(cand_sum), Slot::Param(candidate.b));
            let cand = g.tanh(model, Slot::Node(cand_pre));

            let take_new = g.elt_mul(model, Slot::Node(z), Slot::Node(cand));
            let z_inv = g.one_minus(model, Slot::Node(z));
            let keep_old = g.elt_mul(model, Slot::Node(z_inv), h_prev);
            let h = g.add(model, Slot::Node(keep_old), Slot::Node(take_new));

            hidden.push(h);
            x = h;
        }

        let output = decode(g, model, &wiring, x);
        StepState {
            hidden,
            cell: Vec::new(),
            output,
        }
    }
}

pub(crate) struct LstmCell;

impl RecurrentCell for LstmCell {
    fn init(&self, params: &Params, rng: &mut StdRng) -> Model {
        let mut model = Model::new();
        init_shared(&mut model, params, rng);
        for (d, &h) in params.hidden_sizes.iter().enumerate() {
            let input = layer_input_size(params, d);
            init_gate(&mut model, 'i', d, h, input, rng);
            init_gate(&mut model, 'f', d, h, input, rng);
            init_gate(&mut model, 'o', d, h, input, rng);
            init_gate(&mut model, 'c', d, h, input, rng);
        }
        init_decoder(&mut model, params, rng);
        model
    }

    fn wire(&self, model: &Model, params: &Params) -> Result<Wiring> {
        let mut layers = Vec::with_capacity(params.hidden_sizes.len());
        for (d, &h) in params.hidden_sizes.iter().enumerate() {
            let input = layer_input_size(params, d);
            layers.push(LayerWiring::Lstm {
                input: resolve_gate(model, 'i', d, h, input)?,
                forget: resolve_gate(model, 'f', d, h, input)?,
                output: resolve_gate(model, 'o', d, h, input)?,
                write: resolve_gate(model, 'c', d, h, input)?,
            });
        }
        resolve_shared(model, params, layers)
    }

    fn forward_step(
        &self,
        g: &mut Graph,
        model: &Model,
        ix: usize,
        prev: Option<&StepState>,
    ) -> StepState {
        let wiring = g.wiring().clone();
        let mut x = g.row_pluck(model, Slot::Param(wiring.letter), ix);
        let mut hidden = Vec::with_capacity(wiring.layers.len());
        let mut cell = Vec::with_capacity(wiring.layers.len());

        for (d, layer) in wiring.layers.iter().enumerate() {
            let LayerWiring::Lstm {
                input,
                forget,
                output,
                write,
            } = layer
            else {
                unreachable!("LSTM wiring holds LSTM layers");
            };

            let (h_prev, c_prev) = match prev {
                Some(p) => (Slot::Node(p.hidden[d]), Slot::Node(p.cell[d])),
                None => {
                    let width = wiring.hidden_sizes[d];
                    (
                        Slot::Node(g.leaf(vec![0.0; width])),
                        Slot::Node(g.leaf(vec![0.0; width])),
                    )
                }
            };
            let x_slot = Slot::Node(x);

            let i_pre = gate_preact(g, model, input, x_slot, h_prev);
            let i = g.sigmoid(model, Slot::Node(i_pre));
            let f_pre = gate_preact(g, model, forget, x_slot, h_prev);
            let f = g.sigmoid(model, Slot::Node(f_pre));
            let o_pre = gate_preact(g, model, output, x_slot, h_prev);
            let o = g.sigmoid(model, Slot::Node(o_pre));
            let w_pre = gate_preact(g, model, write, x_slot, h_prev);
            let w = g.tanh(model, Slot::Node(w_pre));

            let retained = g.elt_mul(model, Slot::Node(f), c_prev);
            let written = g.elt_mul(model, Slot::Node(i), Slot::Node(w));
            let c = g.add(model, Slot::Node(retained), Slot::Node(written));
            let c_act = g.tanh(model, Slot::Node(c));
            let h = g.elt_mul(model, Slot::Node(o), Slot::Node(c_act));

            hidden.push(h);
            cell.push(c);
            x = h;
        }

        let output = decode(g, model, &wiring, x);
        StepState {
            hidden,
            cell,
            output,
        }
    }
}
