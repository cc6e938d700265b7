//! Tape-based computation graph.
//!
//! The [`Graph`] records every differentiable operation of one forward
//! walk as an entry in an append-only tape, together with the
//! intermediate matrices those operations produced. Reverse-mode
//! gradients are obtained by replaying the tape backward one entry at a
//! time: [`Graph::backward_step`] pops the most recent entry, applies
//! its gradient rule, and reports whether any tape remains. Callers loop
//! until exhaustion:
//!
//! ```text
//! while graph.backward_step(&mut model) {}
//! ```
//!
//! Operands are addressed through [`Slot`]: either a parameter matrix
//! owned by the [`Model`] or an intermediate node owned by the graph.
//! Backward replay accumulates gradients into both, so after a full
//! replay every model matrix referenced by the walk carries its `dw`.
//!
//! The graph is rebuilt from the model and its parameters whenever a
//! network is constructed or restored; [`Graph::build`] resolves and
//! shape-checks the cell wiring at that point, so a persisted model
//! whose matrices do not match the declared architecture is rejected
//! before any walk runs. One graph serves one network: a walk appends
//! to the tape, and [`Graph::clear`] discards the tape and nodes without
//! touching the model.

use crate::cell::{CellType, StepState, Wiring};
use crate::error::Result;
use crate::matrix::Matrix;
use crate::model::Model;
use crate::network::Params;

/// Operand address: a model parameter or a graph-owned node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// Index into the model's parameter list.
    Param(usize),
    /// Index into the graph's node list, valid for the current walk.
    Node(usize),
}

/// One recorded operation. `out` is always a graph node.
#[derive(Clone, Copy, Debug)]
enum TapeOp {
    RowPluck { src: Slot, row: usize, out: usize },
    MatVec { w: Slot, x: Slot, out: usize },
    Add { a: Slot, b: Slot, out: usize },
    EltMul { a: Slot, b: Slot, out: usize },
    OneMinus { a: Slot, out: usize },
    Sigmoid { a: Slot, out: usize },
    Tanh { a: Slot, out: usize },
}

/// Append-only operation tape plus the intermediate nodes of one walk.
pub struct Graph {
    cell: CellType,
    wiring: Wiring,
    nodes: Vec<Matrix>,
    tape: Vec<TapeOp>,
}

impl Graph {
    /// Build a graph for the given cell type, resolving parameter
    /// wiring against the model.
    ///
    /// # Errors
    ///
    /// `Error::Serialization` if the model is missing a parameter the
    /// cell requires or holds one with the wrong shape.
    pub fn build(cell: CellType, model: &Model, params: &Params) -> Result<Self> {
        let wiring = cell.cell().wire(model, params)?;
        Ok(Self {
            cell,
            wiring,
            nodes: Vec::new(),
            tape: Vec::new(),
        })
    }

    /// Run one forward application of the recurrent cell.
    ///
    /// `ix` is the input symbol index (0 is the sentinel); `prev` is the
    /// state returned by the previous step of the same walk, or `None`
    /// at the start of a walk. The returned state exposes the output
    /// node holding unnormalized logits of length `output_size`.
    pub fn cell_step(&mut self, model: &Model, ix: usize, prev: Option<&StepState>) -> StepState {
        let cell = self.cell;
        cell.cell().forward_step(self, model, ix, prev)
    }

    pub(crate) fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    /// Discard the tape and all intermediate nodes. Model matrices are
    /// untouched.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.tape.clear();
    }

    /// Number of recorded tape entries awaiting backward replay.
    pub fn tape_len(&self) -> usize {
        self.tape.len()
    }

    /// Value vector of a node.
    pub fn value(&self, node: usize) -> &[f32] {
        &self.nodes[node].w
    }

    /// Mutable value vector of a node (used for temperature scaling of
    /// logits before softmax).
    pub fn value_mut(&mut self, node: usize) -> &mut [f32] {
        &mut self.nodes[node].w
    }

    /// Mutable gradient vector of a node (used to inject the
    /// softmax-cross-entropy gradient at the output).
    pub fn grad_mut(&mut self, node: usize) -> &mut [f32] {
        &mut self.nodes[node].dw
    }

    /// Softmax probabilities of a node's values. Not recorded on the
    /// tape; the cross-entropy gradient is injected directly instead.
    pub fn softmax(&self, node: usize) -> Vec<f32> {
        let w = &self.nodes[node].w;
        let max = w.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let mut out: Vec<f32> = w.iter().map(|&v| (v - max).exp()).collect();
        let sum: f32 = out.iter().sum();
        for p in out.iter_mut() {
            *p /= sum;
        }
        out
    }

    fn mat<'a>(&'a self, model: &'a Model, slot: Slot) -> &'a Matrix {
        match slot {
            Slot::Param(ix) => model.mat(ix),
            Slot::Node(ix) => &self.nodes[ix],
        }
    }

    fn grad_slot<'a>(&'a mut self, model: &'a mut Model, slot: Slot) -> &'a mut [f32] {
        match slot {
            Slot::Param(ix) => &mut model.mat_mut(ix).dw,
            Slot::Node(ix) => &mut self.nodes[ix].dw,
        }
    }

    fn record(&mut self, rows: usize, cols: usize, data: Vec<f32>, op: impl FnOnce(usize) -> TapeOp) -> usize {
        let out = self.nodes.len();
        self.nodes.push(Matrix::with_data(rows, cols, data));
        self.tape.push(op(out));
        out
    }

    /// Create a leaf node with no tape entry (e.g. the zero state at the
    /// start of a walk).
    pub fn leaf(&mut self, data: Vec<f32>) -> usize {
        let out = self.nodes.len();
        self.nodes.push(Matrix::column(data));
        out
    }

    /// Pluck row `row` of a matrix as a column vector (embedding lookup).
    pub fn row_pluck(&mut self, model: &Model, src: Slot, row: usize) -> usize {
        let (cols, data) = {
            let m = self.mat(model, src);
            debug_assert!(row < m.rows, "row {} out of range for [{}, {}]", row, m.rows, m.cols);
            let off = row * m.cols;
            (m.cols, m.w[off..off + m.cols].to_vec())
        };
        self.record(cols, 1, data, |out| TapeOp::RowPluck { src, row, out })
    }

    /// Matrix-vector product `w @ x` where `x` is a column vector.
    pub fn mat_vec(&mut self, model: &Model, w: Slot, x: Slot) -> usize {
        let (rows, data) = {
            let wm = self.mat(model, w);
            let xm = self.mat(model, x);
            debug_assert_eq!(
                wm.cols, xm.rows,
                "mat_vec shape [{}, {}] @ [{}, 1]",
                wm.rows, wm.cols, xm.rows
            );
            let mut out = vec![0.0; wm.rows];
            for (i, o) in out.iter_mut().enumerate() {
                let off = i * wm.cols;
                let mut sum = 0.0;
                for j in 0..wm.cols {
                    sum += wm.w[off + j] * xm.w[j];
                }
                *o = sum;
            }
            (wm.rows, out)
        };
        self.record(rows, 1, data, |out| TapeOp::MatVec { w, x, out })
    }

    /// Element-wise sum.
    pub fn add(&mut self, model: &Model, a: Slot, b: Slot) -> usize {
        let (rows, data) = {
            let am = self.mat(model, a);
            let bm = self.mat(model, b);
            debug_assert_eq!(am.len(), bm.len());
            let data = am.w.iter().zip(bm.w.iter()).map(|(x, y)| x + y).collect();
            (am.rows, data)
        };
        self.record(rows, 1, data, |out| TapeOp::Add { a, b, out })
    }

    /// Element-wise product.
    pub fn elt_mul(&mut self, model: &Model, a: Slot, b: Slot) -> usize {
        let (rows, data) = {
            let am = self.mat(model, a);
            let bm = self.mat(model, b);
            debug_assert_eq!(am.len(), bm.len());
            let data = am.w.iter().zip(bm.w.iter()).map(|(x, y)| x * y).collect();
            (am.rows, data)
        };
        self.record(rows, 1, data, |out| TapeOp::EltMul { a, b, out })
    }

    /// Element-wise `1 - a` (gate complement).
    pub fn one_minus(&mut self, model: &Model, a: Slot) -> usize {
        let (rows, data) = {
            let am = self.mat(model, a);
            (am.rows, am.w.iter().map(|&v| 1.0 - v).collect())
        };
        self.record(rows, 1, data, |out| TapeOp::OneMinus { a, out })
    }

    /// Element-wise logistic sigmoid.
    pub fn sigmoid(&mut self, model: &Model, a: Slot) -> usize {
        let (rows, data) = {
            let am = self.mat(model, a);
            (
                am.rows,
                am.w.iter().map(|&v| 1.0 / (1.0 + (-v).exp())).collect(),
            )
        };
        self.record(rows, 1, data, |out| TapeOp::Sigmoid { a, out })
    }

    /// Element-wise hyperbolic tangent.
    pub fn tanh(&mut self, model: &Model, a: Slot) -> usize {
        let (rows, data) = {
            let am = self.mat(model, a);
            (am.rows, am.w.iter().map(|&v| v.tanh()).collect())
        };
        self.record(rows, 1, data, |out| TapeOp::Tanh { a, out })
    }

    /// Replay one tape entry in reverse, accumulating gradients into its
    /// operands. Returns `false` once the tape is exhausted.
    pub fn backward_step(&mut self, model: &mut Model) -> bool {
        let Some(op) = self.tape.pop() else {
            return false;
        };

        match op {
            TapeOp::RowPluck { src, row, out } => {
                let dout = self.nodes[out].dw.clone();
                let cols = dout.len();
                let g = self.grad_slot(model, src);
                for (j, &d) in dout.iter().enumerate() {
                    g[row * cols + j] += d;
                }
            }
            TapeOp::MatVec { w, x, out } => {
                let dout = self.nodes[out].dw.clone();
                let (x_w, w_w, rows, cols) = {
                    let xm = self.mat(model, x);
                    let wm = self.mat(model, w);
                    (xm.w.clone(), wm.w.clone(), wm.rows, wm.cols)
                };
                {
                    let gw = self.grad_slot(model, w);
                    for i in 0..rows {
                        let d = dout[i];
                        if d != 0.0 {
                            let off = i * cols;
                            for j in 0..cols {
                                gw[off + j] += d * x_w[j];
                            }
                        }
                    }
                }
                {
                    let gx = self.grad_slot(model, x);
                    for i in 0..rows {
                        let d = dout[i];
                        if d != 0.0 {
                            let off = i * cols;
                            for j in 0..cols {
                                gx[j] += w_w[off + j] * d;
                            }
                        }
                    }
                }
            }
            TapeOp::Add { a, b, out } => {
                let dout = self.nodes[out].dw.clone();
                let ga = self.grad_slot(model, a);
                for (g, &d) in ga.iter_mut().zip(dout.iter()) {
                    *g += d;
                }
                let gb = self.grad_slot(model, b);
                for (g, &d) in gb.iter_mut().zip(dout.iter()) {
                    *g += d;
                }
            }
            TapeOp::EltMul { a, b, out } => {
                let dout = self.nodes[out].dw.clone();
                let (a_w, b_w) = {
                    let am = self.mat(model, a);
                    let bm = self.mat(model, b);
                    (am.w.clone(), bm.w.clone())
                };
                {
                    let ga = self.grad_slot(model, a);
                    for (j, g) in ga.iter_mut().enumerate() {
                        *g += dout[j] * b_w[j];
                    }
                }
                {
                    let gb = self.grad_slot(model, b);
                    for (j, g) in gb.iter_mut().enumerate() {
                        *g += dout[j] * a_w[j];
                    }
                }
            }
            TapeOp::OneMinus { a, out } => {
                let dout = self.nodes[out].dw.clone();
                let ga = self.grad_slot(model, a);
                for (g, &d) in ga.iter_mut().zip(dout.iter()) {
                    *g -= d;
                }
            }
            TapeOp::Sigmoid { a, out } => {
                let dout = self.nodes[out].dw.clone();
                let y = self.nodes[out].w.clone();
                let ga = self.grad_slot(model, a);
                for (j, g) in ga.iter_mut().enumerate() {
                    *g += dout[j] * y[j] * (1.0 - y[j]);
                }
            }
            TapeOp::Tanh { a, out } => {
                let dout = self.nodes[out].dw.clone();
                let y = self.nodes[out].w.clone();
                let ga = self.grad_slot(model, a);
                for (j, g) in ga.iter_mut().enumerate() {
                    *g += dout[j] * (1.0 - y[j] * y[j]);
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellType;
    use crate::network::Params;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_setup(cell: CellType) -> (Model, Graph, Params) {
        let params = Params {
            cell,
            max_gen: 4,
            input_size: 3,
            letter_size: 4,
            hidden_sizes: vec![3, 2],
            output_size: 3,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let model = cell.cell().init(&params, &mut rng);
        let graph = Graph::build(cell, &model, &params).unwrap();
        (model, graph, params)
    }

    /// Sum of the output logits after one cell step, for finite
    /// differencing.
    fn forward_sum(cell: CellType, model: &Model, params: &Params) -> f32 {
        let mut graph = Graph::build(cell, model, params).unwrap();
        let state = graph.cell_step(model, 1, None);
        graph.value(state.output).iter().sum()
    }

    fn check_gradients(cell: CellType) {
        let (mut model, mut graph, params) = tiny_setup(cell);

        // Analytic: one step, d(sum of logits)/d(params)
        let state = graph.cell_step(&model, 1, None);
        let ones = vec![1.0; graph.value(state.output).len()];
        graph.grad_mut(state.output).copy_from_slice(&ones);
        while graph.backward_step(&mut model) {}

        // Numeric: central differences on a sample of entries
        let eps = 1e-2f32;
        for p in 0..model.len() {
            for j in [0usize, model.mat(p).len() / 2] {
                let analytic = model.mat(p).dw[j];

                let orig = model.mat(p).w[j];
                model.mat_mut(p).w[j] = orig + eps;
                let up = forward_sum(cell, &model, &params);
                model.mat_mut(p).w[j] = orig - eps;
                let down = forward_sum(cell, &model, &params);
                model.mat_mut(p).w[j] = orig;

                let numeric = (up - down) / (2.0 * eps);
                assert!(
                    (analytic - numeric).abs() < 5e-3,
                    "param {} entry {}: analytic {} vs numeric {}",
                    p,
                    j,
                    analytic,
                    numeric
                );
            }
        }
    }

    #[test]
    fn gru_gradients_match_finite_differences() {
        check_gradients(CellType::Gru);
    }

    #[test]
    fn lstm_gradients_match_finite_differences() {
        check_gradients(CellType::Lstm);
    }

    #[test]
    fn backward_exhausts_then_reports_false() {
        let (mut model, mut graph, _) = tiny_setup(CellType::Gru);
        let state = graph.cell_step(&model, 0, None);
        assert!(graph.tape_len() > 0);
        let n = vec![1.0; graph.value(state.output).len()];
        graph.grad_mut(state.output).copy_from_slice(&n);

        let mut steps = 0;
        while graph.backward_step(&mut model) {
            steps += 1;
        }
        assert!(steps > 0);
        assert_eq!(graph.tape_len(), 0);
        assert!(!graph.backward_step(&mut model));
    }

    #[test]
    fn clear_discards_tape_without_touching_model() {
        let (model, mut graph, _) = tiny_setup(CellType::Gru);
        let before: Vec<f32> = model.mat(0).w.clone();
        graph.cell_step(&model, 1, None);
        graph.clear();
        assert_eq!(graph.tape_len(), 0);
        assert_eq!(model.mat(0).w, before);
    }

    #[test]
    fn softmax_normalizes() {
        let (model, mut graph, _) = tiny_setup(CellType::Gru);
        let state = graph.cell_step(&model, 1, None);
        let probs = graph.softmax(state.output);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs.iter().all(|&p| p > 0.0));
    }

    #[test]
    fn gradients_accumulate_across_walk_steps() {
        let (mut model, mut graph, _) = tiny_setup(CellType::Gru);
        let s1 = graph.cell_step(&model, 1, None);
        let s2 = graph.cell_step(&model, 2, Some(&s1));
        let n = vec![1.0; graph.value(s2.output).len()];
        graph.grad_mut(s2.output).copy_from_slice(&n);
        while graph.backward_step(&mut model) {}

        // Backprop through time reaches the input embedding rows of
        // both steps.
        let wil = model.index_of("wil").unwrap();
        let dw = &model.mat(wil).dw;
        let cols = model.mat(wil).cols;
        assert!(dw[cols..2 * cols].iter().any(|&g| g != 0.0));
        assert!(dw[2 * cols..3 * cols].iter().any(|&g| g != 0.0));
    }
}
