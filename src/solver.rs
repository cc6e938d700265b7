//! Adaptive per-parameter optimizer.
//!
//! The [`Solver`] applies an RMSProp-style update: each parameter keeps
//! a decaying average of its squared gradients, and the raw gradient is
//! scaled by the inverse square root of that average before being
//! applied, so frequently-updated parameters take smaller steps.
//! Gradients are clipped element-wise before the update to keep a
//! single bad example from destabilizing training.
//!
//! ## Algorithm
//!
//! For each parameter θ with gradient g and accumulator s:
//!
//! ```text
//! s = decay * s + (1 - decay) * g²
//! g = clamp(g, -clip, clip)
//! θ = θ - step_size * g / √(s + ε)
//! g = 0
//! ```
//!
//! The accumulators persist across training steps and are exported
//! alongside the model; a record without solver state restores to the
//! same zero accumulators a fresh solver starts with.
//!
//! The update is data-parallel across parameter matrices via Rayon;
//! every matrix is independent, so this introduces no shared mutable
//! state.

use crate::error::{Error, Result};
use crate::model::Model;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const DECAY_RATE: f32 = 0.999;
const SMOOTH_EPS: f32 = 1e-8;
const CLIP: f32 = 5.0;

/// RMSProp-style adaptive gradient descent state.
#[derive(Clone, Debug, Default)]
pub struct Solver {
    /// Squared-gradient accumulators, aligned with the model's
    /// parameter order. Empty until the first step.
    cache: Vec<Vec<f32>>,
}

/// Serializable form of a [`Solver`], keyed by parameter name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverRecord {
    pub decay_rate: f32,
    pub smooth_eps: f32,
    pub clip: f32,
    pub cache: Vec<SolverCacheEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverCacheEntry {
    pub name: String,
    pub values: Vec<f32>,
}

impl Solver {
    /// Create a solver with zero accumulator state.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_cache(&mut self, model: &Model) {
        let aligned = self.cache.len() == model.len()
            && self
                .cache
                .iter()
                .zip(model.iter())
                .all(|(c, (_, m))| c.len() == m.len());
        if !aligned {
            self.cache = model.iter().map(|(_, m)| vec![0.0; m.len()]).collect();
        }
    }

    /// Apply one adaptive update to every model matrix from its current
    /// gradients, then reset the gradients to zero.
    pub fn step(&mut self, model: &mut Model, step_size: f32) {
        self.ensure_cache(model);

        model
            .mats_mut()
            .par_iter_mut()
            .zip(self.cache.par_iter_mut())
            .for_each(|(mat, cache)| {
                for j in 0..mat.w.len() {
                    let raw = mat.dw[j];
                    cache[j] = DECAY_RATE * cache[j] + (1.0 - DECAY_RATE) * raw * raw;
                    let clipped = raw.clamp(-CLIP, CLIP);
                    mat.w[j] -= step_size * clipped / (cache[j] + SMOOTH_EPS).sqrt();
                    mat.dw[j] = 0.0;
                }
            });
    }

    /// Export accumulator state keyed by parameter name. A solver that
    /// has never stepped exports zero accumulators for every parameter.
    pub fn export(&self, model: &Model) -> SolverRecord {
        let cache = model
            .iter()
            .enumerate()
            .map(|(i, (name, mat))| SolverCacheEntry {
                name: name.to_string(),
                values: self
                    .cache
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; mat.len()]),
            })
            .collect();
        SolverRecord {
            decay_rate: DECAY_RATE,
            smooth_eps: SMOOTH_EPS,
            clip: CLIP,
            cache,
        }
    }

    /// Rebuild a solver from a persisted record, reordering entries to
    /// match the model's parameter order.
    ///
    /// # Errors
    ///
    /// `Error::Serialization` if an entry names a parameter the model
    /// does not have, or its accumulator length does not match the
    /// parameter's size.
    pub fn import(record: SolverRecord, model: &Model) -> Result<Self> {
        let mut cache = vec![Vec::new(); model.len()];
        let mut seen = vec![false; model.len()];

        for entry in record.cache {
            let ix = model.index_of(&entry.name).ok_or_else(|| {
                Error::Serialization(format!(
                    "solver record references unknown parameter {:?}",
                    entry.name
                ))
            })?;
            if entry.values.len() != model.mat(ix).len() {
                return Err(Error::Serialization(format!(
                    "solver accumulator for {:?} has length {}, expected {}",
                    entry.name,
                    entry.values.len(),
                    model.mat(ix).len()
                )));
            }
            if seen[ix] {
                return Err(Error::Serialization(format!(
                    "duplicate solver entry for {:?}",
                    entry.name
                )));
            }
            seen[ix] = true;
            cache[ix] = entry.values;
        }

        // Parameters absent from the record start from zero state.
        for (i, done) in seen.iter().enumerate() {
            if !done {
                cache[i] = vec![0.0; model.mat(i).len()];
            }
        }

        Ok(Self { cache })
    }
}
