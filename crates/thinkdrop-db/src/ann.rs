use hora::core::ann_index::ANNIndex;
use hora::core::metrics::Metric;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use thinkdrop_common::{Error, Result};
use tracing::{debug, info};

/// Approximate-nearest-neighbor index over record embeddings.
///
/// The index is a candidate generator, never authoritative: callers recompute
/// exact cosine similarity from the stored vectors before filtering and
/// sorting, and fall back to a full scan when the index is empty. Because the
/// HNSW graph cannot delete in place, mutations mark it dirty and the next
/// search rebuilds it from the store.
///
/// Stored vectors are unit-norm, so Euclidean neighbor order matches cosine
/// order.
pub struct AnnIndex {
    index: Option<HNSWIndex<f32, usize>>,
    /// Slot → record id, parallel to the ids handed to the HNSW graph.
    ids: Vec<String>,
    dimension: usize,
    dirty: bool,
}

impl AnnIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            index: None,
            ids: Vec::new(),
            dimension,
            dirty: true,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Rebuild the graph from all embedded rows. A rebuild with no rows
    /// drops the index entirely (nothing to search).
    pub fn rebuild(&mut self, rows: Vec<(String, Vec<f32>)>) -> Result<()> {
        if rows.is_empty() {
            debug!("no embedded rows, skipping ANN rebuild");
            self.index = None;
            self.ids.clear();
            self.dirty = false;
            return Ok(());
        }

        let mut index = HNSWIndex::new(self.dimension, &HNSWParams::default());
        let mut ids = Vec::with_capacity(rows.len());

        for (record_id, embedding) in rows {
            if embedding.len() != self.dimension {
                return Err(Error::Database(format!(
                    "embedding for {record_id} has dimension {}, expected {}",
                    embedding.len(),
                    self.dimension
                )));
            }
            let slot = ids.len();
            index
                .add(&embedding, slot)
                .map_err(|e| Error::Database(format!("ANN insert failed: {e}")))?;
            ids.push(record_id);
        }

        index
            .build(Metric::Euclidean)
            .map_err(|e| Error::Database(format!("ANN build failed: {e}")))?;

        info!("rebuilt ANN index over {} vectors", ids.len());
        self.index = Some(index);
        self.ids = ids;
        self.dirty = false;
        Ok(())
    }

    /// Return up to `k` candidate record ids, best first, or `None` when the
    /// index is unavailable and the caller must scan.
    pub fn search(&self, query: &[f32], k: usize) -> Option<Vec<String>> {
        if query.len() != self.dimension {
            return None;
        }
        let index = self.index.as_ref()?;
        let slots = index.search(query, k);
        Some(
            slots
                .into_iter()
                .filter_map(|slot| self.ids.get(slot).cloned())
                .collect(),
        )
    }
}
