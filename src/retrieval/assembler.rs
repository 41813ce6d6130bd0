//! Assembly of per-block tables into a collection

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::collection::{Collection, IndexTable, Measurement};
use crate::fetcher::MeasurementTable;
use crate::{DatasetCategory, Observation};

/// Concatenate block tables into a collection
///
/// Tables must be given in block order; rows keep their in-block order. Rows
/// whose camera maps to no known filter are dropped, as are rows naming a
/// target the index does not list.
pub fn assemble<O, I>(tables: I, index: IndexTable, category: DatasetCategory) -> Collection<O>
where
    O: Observation,
    I: IntoIterator<Item = MeasurementTable<O>>,
{
    let known: HashSet<_> = index.ids().cloned().collect();
    let mut rows = Vec::new();
    let mut unclassified = 0usize;
    let mut foreign = 0usize;

    for table in tables {
        rows.reserve(table.rows.len());
        for observation in table.rows {
            if !known.contains(&observation.target_id()) {
                foreign += 1;
                continue;
            }
            match Measurement::classify(observation) {
                Some(m) => rows.push(m),
                None => unclassified += 1,
            }
        }
    }

    if foreign > 0 {
        warn!(rows = foreign, "Dropped rows for targets missing from the index");
    }
    debug!(rows = rows.len(), unclassified = unclassified, "Assembled collection");

    Collection::new(category, index, rows)
}
