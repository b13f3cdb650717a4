//! Bidirectional dense<->sparse index maps.
//!
//! Each logical space (A, I, I2, E) keeps one [`SparseDim`] per run.
//! Grid-wide sparse cell ids are stable across chunks; dense indices are
//! assigned contiguously from 0 in first-seen order and, once assigned,
//! never move. The map is append-only during overlap accumulation and
//! read-only afterwards, so the persisted form is just the ordered list
//! of sparse ids.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mapping from stable grid-wide sparse ids to locally compacted dense
/// indices.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SparseDim {
    /// Sparse id of each dense index, in assignment order.
    to_sparse: Vec<usize>,
    /// Inverse of `to_sparse`. Not persisted; rebuilt on load.
    #[serde(skip)]
    to_dense: HashMap<usize, usize>,
    /// Extent of the underlying grid (number of possible sparse ids).
    sparse_extent: usize,
}

impl SparseDim {
    pub fn new(sparse_extent: usize) -> Self {
        Self {
            to_sparse: Vec::new(),
            to_dense: HashMap::new(),
            sparse_extent,
        }
    }

    /// Dense index for `sparse_id`, allocating the next unused index on
    /// first sight. Idempotent; there is no removal.
    pub fn add_dense(&mut self, sparse_id: usize) -> usize {
        debug_assert!(sparse_id < self.sparse_extent);
        match self.to_dense.get(&sparse_id) {
            Some(&dense) => dense,
            None => {
                let dense = self.to_sparse.len();
                self.to_sparse.push(sparse_id);
                self.to_dense.insert(sparse_id, dense);
                dense
            }
        }
    }

    /// Dense index for a sparse id already registered, if any.
    pub fn to_dense(&self, sparse_id: usize) -> Option<usize> {
        self.to_dense.get(&sparse_id).copied()
    }

    /// Sparse id of a dense index.
    ///
    /// # Panics
    /// Panics if `dense` has not been assigned.
    pub fn to_sparse(&self, dense: usize) -> usize {
        self.to_sparse[dense]
    }

    /// Number of distinct sparse ids seen so far.
    pub fn dense_extent(&self) -> usize {
        self.to_sparse.len()
    }

    pub fn sparse_extent(&self) -> usize {
        self.sparse_extent
    }

    /// Ordered sparse ids, dense index order.
    pub fn sparse_ids(&self) -> &[usize] {
        &self.to_sparse
    }

    /// Rebuild the inverse map after deserialization.
    pub fn rebuild_index(&mut self) {
        self.to_dense = self
            .to_sparse
            .iter()
            .enumerate()
            .map(|(dense, &sparse)| (sparse, dense))
            .collect();
    }
}
