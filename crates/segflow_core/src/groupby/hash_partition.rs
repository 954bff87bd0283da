//! Hash-partitioned group-by with bounded resident memory.

use crate::engine::Engine;
use crate::error::{CoreError, CoreResult};
use crate::groupby::aggregate::{aggregate_schema, Aggregate, GroupFolder};
use crate::groupby::merge::{KWayMerge, RowStream};
use crate::segment::{Schema, SegmentedStore};
use crate::sort::RowComparator;
use parking_lot::Mutex;
use segflow_codec::{Row, Value};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info};

/// Rows staged per bucket by a shuffle worker before taking the bucket lock.
const STAGE_ROWS: usize = 64;

/// A sorted run spilled to a bucket's backing segment.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    start: u64,
    len: u64,
}

struct Bucket {
    buffer: Mutex<Vec<Row>>,
    chunks: Mutex<Vec<Chunk>>,
}

/// Shared state of one group-by run.
struct Buckets {
    buckets: Vec<Bucket>,
    spill: SegmentedStore,
}

/// Groups rows by a key column.
///
/// Rows are routed to bucket `hash(key) % buckets`, where the bucket count
/// is the number of output segments. Each bucket buffers rows in memory;
/// when a buffer reaches the threshold it is sorted, optionally
/// deduplicated, and spilled as a chunk to a scratch store. Finally each
/// bucket merges its chunks with whatever is still buffered and writes one
/// sorted output segment.
///
/// Rows with equal keys always end up in the same output segment. No
/// order holds across segments.
///
/// With [`aggregate`](Self::aggregate) set, each group of rows tying under
/// the comparator is folded into a single output row instead; see
/// [`output_schema`](Self::output_schema) for its layout.
pub struct HashPartitionGroupBy<'e> {
    engine: &'e Engine,
    key_column: usize,
    comparator: RowComparator,
    dedup: bool,
    aggregates: Vec<Aggregate>,
    buffer_rows: usize,
}

impl<'e> HashPartitionGroupBy<'e> {
    /// Groups by `key_column`, sorting buckets ascending on it.
    #[must_use]
    pub fn new(engine: &'e Engine, key_column: usize) -> Self {
        Self {
            engine,
            key_column,
            comparator: RowComparator::ascending(&[key_column]),
            dedup: false,
            aggregates: Vec::new(),
            buffer_rows: engine.config().groupby_buffer_rows,
        }
    }

    /// Orders rows within a bucket by `comparator`.
    ///
    /// With deduplication enabled, rows that `comparator` considers equal
    /// collapse to the first one seen.
    #[must_use]
    pub fn comparator(mut self, comparator: RowComparator) -> Self {
        self.comparator = comparator;
        self
    }

    /// Collapses rows with equal keys.
    #[must_use]
    pub fn dedup(mut self, dedup: bool) -> Self {
        self.dedup = dedup;
        self
    }

    /// Emits one row per group: the comparator's key columns followed by
    /// one value per aggregate.
    ///
    /// Cannot be combined with [`dedup`](Self::dedup).
    #[must_use]
    pub fn aggregate(mut self, aggregates: Vec<Aggregate>) -> Self {
        self.aggregates = aggregates;
        self
    }

    /// Schema of the rows this group-by writes for `input`.
    #[must_use]
    pub fn output_schema(&self, input: &Schema) -> Schema {
        if self.aggregates.is_empty() {
            input.clone()
        } else {
            aggregate_schema(input, &self.comparator.key_columns(), &self.aggregates)
        }
    }

    /// Overrides the bucket overflow threshold.
    #[must_use]
    pub fn buffer_rows(mut self, rows: usize) -> Self {
        self.buffer_rows = rows.max(1);
        self
    }

    /// Suggested number of output segments for `input`.
    #[must_use]
    pub fn recommended_buckets(&self, input: &SegmentedStore) -> usize {
        self.engine.num_buckets_for(input.num_segments())
    }

    /// Groups `input` into the segments of `output`, one bucket per
    /// segment.
    ///
    /// On error the contents of the output segments are unspecified.
    ///
    /// # Errors
    ///
    /// Returns an error if `output` has no segments, the key column is out
    /// of range, the schemas differ in width, or any read or write fails.
    pub fn run(&self, input: &SegmentedStore, output: &SegmentedStore) -> CoreResult<()> {
        self.validate(input, output)?;
        let num_buckets = output.num_segments();
        info!(
            rows = input.total_rows(),
            input_segments = input.num_segments(),
            buckets = num_buckets,
            dedup = self.dedup,
            aggregates = self.aggregates.len(),
            "group-by started"
        );

        let state = Buckets {
            buckets: (0..num_buckets)
                .map(|_| Bucket {
                    buffer: Mutex::new(Vec::new()),
                    chunks: Mutex::new(Vec::new()),
                })
                .collect(),
            spill: self.engine.temp_store(input.schema().clone(), num_buckets)?,
        };

        self.engine
            .pool()
            .run_indexed(input.num_segments(), |segment| {
                self.shuffle_segment(&state, input, segment)
            })?;
        debug!(spilled_rows = state.spill.total_rows(), "shuffle finished");

        self.engine
            .pool()
            .run_indexed(num_buckets, |bucket| self.finalize_bucket(&state, bucket, output))?;

        info!(rows = output.total_rows(), "group-by finished");
        Ok(())
    }

    fn validate(&self, input: &SegmentedStore, output: &SegmentedStore) -> CoreResult<()> {
        if output.num_segments() == 0 {
            return Err(CoreError::invalid_operation("group-by output has no segments"));
        }
        if self.dedup && !self.aggregates.is_empty() {
            return Err(CoreError::invalid_operation(
                "deduplication and aggregation are exclusive",
            ));
        }
        let arity = input.schema().len();
        let width = self.output_schema(input.schema()).len();
        if output.schema().len() != width {
            return Err(CoreError::schema_mismatch(width, output.schema().len()));
        }
        let mut columns = self.comparator.key_columns();
        columns.push(self.key_column);
        columns.extend(self.aggregates.iter().filter_map(Aggregate::column));
        if let Some(column) = columns.into_iter().find(|&c| c >= arity) {
            return Err(CoreError::invalid_operation(format!(
                "key column {column} out of range ({arity} columns)"
            )));
        }
        Ok(())
    }

    fn bucket_of(&self, row: &Row, num_buckets: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        row.get(self.key_column).unwrap_or(&Value::Null).hash(&mut hasher);
        (hasher.finish() % num_buckets as u64) as usize
    }

    fn shuffle_segment(
        &self,
        state: &Buckets,
        input: &SegmentedStore,
        segment: usize,
    ) -> CoreResult<()> {
        let num_buckets = state.buckets.len();
        let mut staged: Vec<Vec<Row>> = vec![Vec::new(); num_buckets];
        let mut count = 0u64;
        for row in input.segment_rows(segment)? {
            let row = row?;
            let bucket = self.bucket_of(&row, num_buckets);
            staged[bucket].push(row);
            count += 1;
            if staged[bucket].len() >= STAGE_ROWS {
                self.push_rows(state, bucket, &mut staged[bucket])?;
            }
        }
        for (bucket, rows) in staged.iter_mut().enumerate() {
            if !rows.is_empty() {
                self.push_rows(state, bucket, rows)?;
            }
        }
        self.engine.stats().record_partitioned(count);
        debug!(segment, rows = count, "shuffled segment");
        Ok(())
    }

    fn push_rows(&self, state: &Buckets, bucket: usize, rows: &mut Vec<Row>) -> CoreResult<()> {
        let full = {
            let mut buffer = state.buckets[bucket].buffer.lock();
            buffer.append(rows);
            if buffer.len() >= self.buffer_rows {
                Some(std::mem::take(&mut *buffer))
            } else {
                None
            }
        };
        match full {
            Some(rows) => self.spill(state, bucket, rows),
            None => Ok(()),
        }
    }

    fn sort_run(&self, rows: &mut Vec<Row>) {
        self.comparator.sort(rows);
        if self.dedup {
            let before = rows.len();
            rows.dedup_by(|later, earlier| self.comparator.keys_equal(earlier, later));
            self.engine
                .stats()
                .record_deduplicated((before - rows.len()) as u64);
        }
    }

    fn spill(&self, state: &Buckets, bucket: usize, mut rows: Vec<Row>) -> CoreResult<()> {
        self.sort_run(&mut rows);
        let len = rows.len() as u64;

        let mut chunks = state.buckets[bucket].chunks.lock();
        let start = state.spill.segment_length(bucket)?;
        state.spill.append_rows(bucket, rows)?;
        state.spill.flush_write_to_segment(bucket)?;
        chunks.push(Chunk { start, len });
        drop(chunks);

        self.engine.stats().record_chunk(len);
        debug!(bucket, rows = len, start, "spilled bucket chunk");
        Ok(())
    }

    fn finalize_bucket(
        &self,
        state: &Buckets,
        bucket: usize,
        output: &SegmentedStore,
    ) -> CoreResult<()> {
        let mut rest = std::mem::take(&mut *state.buckets[bucket].buffer.lock());
        let chunks = std::mem::take(&mut *state.buckets[bucket].chunks.lock());
        if rest.is_empty() && chunks.is_empty() {
            return Ok(());
        }
        self.sort_run(&mut rest);

        let mut sources: Vec<RowStream<'_>> = Vec::with_capacity(chunks.len() + 1);
        for chunk in &chunks {
            sources.push(Box::new(state.spill.row_range(
                bucket,
                chunk.start,
                chunk.start + chunk.len,
            )?));
        }
        sources.push(Box::new(rest.into_iter().map(Ok::<Row, CoreError>)));

        let merged = KWayMerge::new(&self.comparator, sources)?;
        let block = output.block_rows();
        let mut writer = output.output_iterator(bucket)?;
        let mut batch = Vec::with_capacity(block);

        if !self.aggregates.is_empty() {
            let mut groups = GroupFolder::new(&self.comparator, &self.aggregates);
            let mut rows = 0u64;
            for row in merged {
                rows += 1;
                if let Some(group) = groups.push(row?)? {
                    batch.push(group);
                    if batch.len() >= block {
                        writer.write_batch(std::mem::take(&mut batch))?;
                    }
                }
            }
            batch.extend(groups.finish());
            writer.write_batch(batch)?;
            writer.flush()?;
            self.engine.stats().record_merged(rows);
            debug!(
                bucket,
                chunks = chunks.len(),
                rows,
                groups = writer.rows_written(),
                "aggregated bucket"
            );
            return Ok(());
        }

        let mut last: Option<Row> = None;
        let mut dropped = 0u64;
        for row in merged {
            let row = row?;
            match last.take() {
                Some(prev) if self.dedup && self.comparator.keys_equal(&prev, &row) => {
                    dropped += 1;
                    last = Some(prev);
                    continue;
                }
                Some(prev) => batch.push(prev),
                None => {}
            }
            last = Some(row);
            if batch.len() >= block {
                writer.write_batch(std::mem::take(&mut batch))?;
            }
        }
        batch.extend(last);
        writer.write_batch(batch)?;
        writer.flush()?;

        let stats = self.engine.stats();
        stats.record_merged(writer.rows_written());
        stats.record_deduplicated(dropped);
        debug!(
            bucket,
            chunks = chunks.len(),
            rows = writer.rows_written(),
            "merged bucket"
        );
        Ok(())
    }
}
