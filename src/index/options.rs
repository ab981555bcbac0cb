use crate::common::{ArborError, Result, DEFAULT_KEY_SIZE, PAGE_SIZE};

use super::btree_page::NODE_HEADER_SIZE;
use super::{InternalPage, LeafPage};

/// Key width and node capacities of a tree.
///
/// `leaf_max_size` counts entries; `internal_max_size` counts separator keys.
/// A page must also fit the one-entry overflow a split works from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOptions {
    pub key_size: usize,
    pub leaf_max_size: usize,
    pub internal_max_size: usize,
}

impl IndexOptions {
    /// Options with the largest capacities a page can hold for `key_size`.
    pub fn with_key_size(key_size: usize) -> Self {
        Self {
            key_size,
            leaf_max_size: LeafPage::<()>::slot_capacity(key_size).saturating_sub(1),
            internal_max_size: InternalPage::<()>::slot_capacity(key_size).saturating_sub(2),
        }
    }

    /// Overrides both capacities; handy for forcing deep trees in tests.
    pub fn with_capacities(mut self, leaf_max_size: usize, internal_max_size: usize) -> Self {
        self.leaf_max_size = leaf_max_size;
        self.internal_max_size = internal_max_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 {
            return Err(ArborError::InvalidIndexOptions("key size must be positive".into()));
        }
        if self.leaf_max_size < 2 || self.internal_max_size < 2 {
            return Err(ArborError::InvalidIndexOptions(format!(
                "capacities must be at least 2 (leaf {}, internal {})",
                self.leaf_max_size, self.internal_max_size
            )));
        }

        let leaf_bytes = NODE_HEADER_SIZE + 4 + (self.leaf_max_size + 1) * LeafPage::<()>::slot_size(self.key_size);
        if leaf_bytes > PAGE_SIZE {
            return Err(ArborError::InvalidIndexOptions(format!(
                "leaf capacity {} does not fit a page with {}-byte keys",
                self.leaf_max_size, self.key_size
            )));
        }

        let internal_bytes =
            NODE_HEADER_SIZE + (self.internal_max_size + 2) * InternalPage::<()>::slot_size(self.key_size);
        if internal_bytes > PAGE_SIZE {
            return Err(ArborError::InvalidIndexOptions(format!(
                "internal capacity {} does not fit a page with {}-byte keys",
                self.internal_max_size, self.key_size
            )));
        }

        Ok(())
    }
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self::with_key_size(DEFAULT_KEY_SIZE)
    }
}
