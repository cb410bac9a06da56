//! Job partitioning: split resolved targets into fixed-size batches.

use std::collections::HashMap;

use uuid::Uuid;

use motif_core::{defaults, Batch, BatchTarget, ContentElement};

/// Split resolved targets into batches of at most `batch_size`, preserving
/// document order. The final batch may be short; an empty target list
/// yields no batches.
pub fn partition_targets(
    job_id: Uuid,
    order: &[String],
    payloads: &HashMap<String, ContentElement>,
    batch_size: usize,
    max_retries: u32,
) -> Vec<Batch> {
    let size = batch_size.clamp(1, defaults::BATCH_SIZE_MAX);
    order
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| {
            let targets = chunk
                .iter()
                .filter_map(|id| {
                    payloads.get(id).map(|payload| BatchTarget {
                        target_id: id.clone(),
                        payload: payload.clone(),
                    })
                })
                .collect();
            Batch::new(job_id, index, targets, max_retries)
        })
        .collect()
}
