//! Model parameter container.
//!
//! A [`Model`] is an ordered collection of named parameter matrices. The
//! cell initializers in [`cell`](crate::cell) populate it, the graph
//! references its entries by index during forward/backward walks, and
//! the [`Solver`](crate::solver::Solver) enumerates it to apply updates.
//! Names are stable identifiers ("wil", "wzx0", ...) used for wiring
//! resolution and for keying persisted solver state.

use crate::error::{Error, Result};
use crate::matrix::Matrix;
use serde::{Deserialize, Serialize};

/// Ordered, named collection of trainable matrices.
#[derive(Clone, Debug, Default)]
pub struct Model {
    names: Vec<String>,
    mats: Vec<Matrix>,
}

/// Serializable form of a [`Model`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelRecord {
    pub params: Vec<NamedMatrix>,
}

/// One persisted parameter matrix.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NamedMatrix {
    pub name: String,
    pub matrix: Matrix,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter matrix, returning its index.
    ///
    /// # Panics
    ///
    /// Panics if the name is already taken; initializers assign each
    /// parameter exactly once.
    pub fn push(&mut self, name: impl Into<String>, mat: Matrix) -> usize {
        let name = name.into();
        assert!(
            self.index_of(&name).is_none(),
            "duplicate parameter name {name:?}"
        );
        self.names.push(name);
        self.mats.push(mat);
        self.mats.len() - 1
    }

    /// Look up a parameter index by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn mat(&self, ix: usize) -> &Matrix {
        &self.mats[ix]
    }

    pub fn mat_mut(&mut self, ix: usize) -> &mut Matrix {
        &mut self.mats[ix]
    }

    /// Number of parameter matrices.
    pub fn len(&self) -> usize {
        self.mats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mats.is_empty()
    }

    /// Iterate over `(name, matrix)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Matrix)> {
        self.names.iter().map(String::as_str).zip(self.mats.iter())
    }

    /// Total number of trainable scalars.
    pub fn num_parameters(&self) -> usize {
        self.mats.iter().map(Matrix::len).sum()
    }

    /// Reset every gradient buffer to zero.
    pub fn zero_grads(&mut self) {
        for m in self.mats.iter_mut() {
            m.zero_grad();
        }
    }

    /// Mutable view of all matrices for the solver's parallel update.
    pub(crate) fn mats_mut(&mut self) -> &mut [Matrix] {
        &mut self.mats
    }

    /// Export all parameters for persistence.
    pub fn export(&self) -> ModelRecord {
        ModelRecord {
            params: self
                .iter()
                .map(|(name, matrix)| NamedMatrix {
                    name: name.to_string(),
                    matrix: matrix.clone(),
                })
                .collect(),
        }
    }

    /// Rebuild a model from a persisted record.
    ///
    /// # Errors
    ///
    /// `Error::Serialization` if the record is empty, contains duplicate
    /// names, or contains an internally inconsistent matrix.
    pub fn import(record: ModelRecord) -> Result<Self> {
        if record.params.is_empty() {
            return Err(Error::Serialization(
                "model record has no parameters".to_string(),
            ));
        }

        let mut model = Model::new();
        for entry in record.params {
            if model.index_of(&entry.name).is_some() {
                return Err(Error::Serialization(format!(
                    "duplicate parameter {:?} in model record",
                    entry.name
                )));
            }
            if !entry.matrix.is_consistent() {
                return Err(Error::Serialization(format!(
                    "parameter {:?} has inconsistent shape or non-finite values",
                    entry.name
                )));
            }
            model.names.push(entry.name);
            model.mats.push(entry.matrix);
        }
        Ok(model)
    }
}
