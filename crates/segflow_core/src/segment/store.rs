//! Segmented row stores.

use crate::error::{CoreError, CoreResult};
use crate::segment::record::{decode_block, encode_block, BlockHeader, BLOCK_HEADER_SIZE};
use parking_lot::{Mutex, RwLock};
use segflow_codec::Row;
use segflow_storage::{FileBackend, InMemoryBackend, StorageBackend};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Name of the manifest file of an on-disk store.
pub const MANIFEST_FILE: &str = "schema.json";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Default number of rows per stored block.
pub const DEFAULT_BLOCK_ROWS: usize = 256;

/// Ordered column names of a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    /// Creates a schema from column names.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns whether the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the position of the named column.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Returns a schema with columns rearranged so column `i` is
    /// `self[order[i]]`.
    #[must_use]
    pub fn permuted(&self, order: &[usize]) -> Schema {
        Schema {
            columns: order
                .iter()
                .map(|&i| self.columns.get(i).cloned().unwrap_or_default())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreManifest {
    format_version: u32,
    columns: Vec<String>,
    num_segments: usize,
}

#[derive(Debug, Clone, Copy)]
struct BlockMeta {
    offset: u64,
    len: u32,
    rows: u32,
    first_row: u64,
}

struct Segment {
    backend: RwLock<Box<dyn StorageBackend>>,
    blocks: RwLock<Vec<BlockMeta>>,
    pending: Mutex<Vec<Row>>,
}

impl Segment {
    fn new(backend: Box<dyn StorageBackend>, blocks: Vec<BlockMeta>) -> Self {
        Self {
            backend: RwLock::new(backend),
            blocks: RwLock::new(blocks),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn committed_rows(&self) -> u64 {
        self.blocks
            .read()
            .last()
            .map_or(0, |b| b.first_row + u64::from(b.rows))
    }

    /// Writes `rows` as one framed block. Caller holds the pending lock.
    fn cut_block(&self, rows: &[Row]) -> CoreResult<()> {
        let encoded = encode_block(rows)?;
        let len = u32::try_from(encoded.len())
            .map_err(|_| CoreError::invalid_operation("block exceeds 4 GiB"))?;
        let offset = self.backend.write().append(&encoded)?;

        let mut blocks = self.blocks.write();
        let first_row = blocks
            .last()
            .map_or(0, |b| b.first_row + u64::from(b.rows));
        blocks.push(BlockMeta {
            offset,
            len,
            // Block row counts fit: encode_block rejected anything larger.
            rows: rows.len() as u32,
            first_row,
        });
        Ok(())
    }
}

/// A schema plus N independently written row segments.
///
/// Each segment is backed by its own [`StorageBackend`] and holds a
/// sequence of framed blocks (see [`crate::segment::record`]). Rows written
/// through a writer become visible to readers once their block is cut,
/// either because `block_rows` rows accumulated or because the segment was
/// flushed.
///
/// Segments can be written concurrently from different threads; rows
/// appended to the same segment are serialized by a per-segment lock.
pub struct SegmentedStore {
    schema: Schema,
    segments: Vec<Segment>,
    dir: Option<PathBuf>,
    block_rows: usize,
    closed: AtomicBool,
    remove_on_drop: bool,
}

impl SegmentedStore {
    /// Creates an ephemeral store held in memory.
    #[must_use]
    pub fn in_memory(schema: Schema, num_segments: usize) -> Self {
        let segments = (0..num_segments)
            .map(|_| Segment::new(Box::new(InMemoryBackend::new()), Vec::new()))
            .collect();
        Self {
            schema,
            segments,
            dir: None,
            block_rows: DEFAULT_BLOCK_ROWS,
            closed: AtomicBool::new(false),
            remove_on_drop: false,
        }
    }

    /// Creates an empty on-disk store in `dir`, replacing any segment files
    /// already there.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or files cannot be created.
    pub fn open_for_write(dir: &Path, schema: Schema, num_segments: usize) -> CoreResult<Self> {
        fs::create_dir_all(dir)?;
        let manifest = StoreManifest {
            format_version: FORMAT_VERSION,
            columns: schema.columns.clone(),
            num_segments,
        };
        let json = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| CoreError::invalid_format(e.to_string()))?;
        fs::write(dir.join(MANIFEST_FILE), json)?;

        let mut segments = Vec::with_capacity(num_segments);
        for i in 0..num_segments {
            let backend = FileBackend::create(&segment_path(dir, i))?;
            segments.push(Segment::new(Box::new(backend), Vec::new()));
        }
        debug!(dir = %dir.display(), num_segments, "created store");

        Ok(Self {
            schema,
            segments,
            dir: Some(dir.to_path_buf()),
            block_rows: DEFAULT_BLOCK_ROWS,
            closed: AtomicBool::new(false),
            remove_on_drop: false,
        })
    }

    /// Opens an existing on-disk store for reading.
    ///
    /// The block index of every segment is rebuilt by scanning block
    /// headers. The returned store is closed for writing.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is missing or invalid, or if a
    /// segment file is truncated.
    pub fn open(dir: &Path) -> CoreResult<Self> {
        let raw = fs::read(dir.join(MANIFEST_FILE))?;
        let manifest: StoreManifest =
            serde_json::from_slice(&raw).map_err(|e| CoreError::invalid_format(e.to_string()))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(CoreError::invalid_format(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }

        let mut segments = Vec::with_capacity(manifest.num_segments);
        for i in 0..manifest.num_segments {
            let path = segment_path(dir, i);
            if !path.exists() {
                return Err(CoreError::invalid_format(format!(
                    "missing segment file {}",
                    path.display()
                )));
            }
            let backend = FileBackend::open_sealed(&path)?;
            let blocks = scan_blocks(&backend)?;
            segments.push(Segment::new(Box::new(backend), blocks));
        }
        debug!(dir = %dir.display(), num_segments = manifest.num_segments, "opened store");

        Ok(Self {
            schema: Schema::new(manifest.columns),
            segments,
            dir: Some(dir.to_path_buf()),
            block_rows: DEFAULT_BLOCK_ROWS,
            closed: AtomicBool::new(true),
            remove_on_drop: false,
        })
    }

    /// Sets the number of rows per stored block.
    #[must_use]
    pub fn with_block_rows(mut self, rows: usize) -> Self {
        self.block_rows = rows.max(1);
        self
    }

    /// Marks the store's directory for removal when the store is dropped.
    #[must_use]
    pub(crate) fn into_temporary(mut self) -> Self {
        self.remove_on_drop = true;
        self
    }

    /// Returns the schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Returns the directory of an on-disk store.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Returns the number of rows per stored block.
    #[must_use]
    pub fn block_rows(&self) -> usize {
        self.block_rows
    }

    /// Returns whether the store is closed for writing.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn segment(&self, id: usize) -> CoreResult<&Segment> {
        self.segments.get(id).ok_or_else(|| {
            CoreError::invalid_operation(format!(
                "segment {id} out of range (store has {})",
                self.segments.len()
            ))
        })
    }

    /// Returns the number of readable rows in segment `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range.
    pub fn segment_length(&self, id: usize) -> CoreResult<u64> {
        Ok(self.segment(id)?.committed_rows())
    }

    /// Returns the readable row count of every segment.
    #[must_use]
    pub fn segment_row_counts(&self) -> Vec<u64> {
        self.segments.iter().map(Segment::committed_rows).collect()
    }

    /// Returns the readable row count of the whole store.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.segments.iter().map(Segment::committed_rows).sum()
    }

    /// Returns the encoded size in bytes of segment `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range.
    pub fn segment_byte_size(&self, id: usize) -> CoreResult<u64> {
        Ok(self.segment(id)?.backend.read().size())
    }

    /// Returns the number of blocks in segment `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range.
    pub fn num_blocks(&self, id: usize) -> CoreResult<usize> {
        Ok(self.segment(id)?.blocks.read().len())
    }

    /// Returns the row count of block `block` in segment `id` without
    /// decoding it.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range.
    pub fn block_row_count(&self, id: usize, block: usize) -> CoreResult<Option<u64>> {
        Ok(self
            .segment(id)?
            .blocks
            .read()
            .get(block)
            .map(|b| u64::from(b.rows)))
    }

    /// Returns the block holding row `row` of segment `id` and the row's
    /// position inside it.
    ///
    /// A row at or past the end maps to the block count and offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range.
    pub fn locate_row(&self, id: usize, row: u64) -> CoreResult<(usize, u64)> {
        let blocks = self.segment(id)?.blocks.read();
        // First block that ends after `row`.
        let idx = blocks.partition_point(|b| b.first_row + u64::from(b.rows) <= row);
        Ok((idx, blocks.get(idx).map_or(0, |b| row - b.first_row)))
    }

    /// Reads and decodes one block.
    ///
    /// # Errors
    ///
    /// Returns an error if the block does not exist, cannot be read, or
    /// fails verification.
    pub fn read_block(&self, id: usize, block: usize) -> CoreResult<Vec<Row>> {
        let segment = self.segment(id)?;
        let meta = segment.blocks.read().get(block).copied().ok_or_else(|| {
            CoreError::invalid_operation(format!("block {block} of segment {id} does not exist"))
        })?;
        let data = segment
            .backend
            .read()
            .read_at(meta.offset, meta.len as usize)?;
        decode_block(&data)
    }

    /// Returns a writer appending to segment `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range or the store is closed.
    pub fn output_iterator(&self, id: usize) -> CoreResult<SegmentWriter<'_>> {
        self.segment(id)?;
        if self.is_closed() {
            return Err(CoreError::StoreClosed);
        }
        Ok(SegmentWriter {
            store: self,
            segment: id,
            rows_written: 0,
        })
    }

    /// Appends rows to segment `id`, cutting blocks as they fill.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is closed, a row does not match the
    /// schema, or the backend fails.
    pub fn append_rows(&self, id: usize, rows: impl IntoIterator<Item = Row>) -> CoreResult<()> {
        let segment = self.segment(id)?;
        if self.is_closed() {
            return Err(CoreError::StoreClosed);
        }
        let arity = self.schema.len();
        let mut pending = segment.pending.lock();
        for row in rows {
            if row.len() != arity {
                return Err(CoreError::schema_mismatch(arity, row.len()));
            }
            pending.push(row);
            if pending.len() >= self.block_rows {
                segment.cut_block(&pending)?;
                pending.clear();
            }
        }
        Ok(())
    }

    /// Cuts any buffered rows of segment `id` into a block, making them
    /// readable.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range or the backend fails.
    pub fn flush_write_to_segment(&self, id: usize) -> CoreResult<()> {
        let segment = self.segment(id)?;
        let mut pending = segment.pending.lock();
        if !pending.is_empty() {
            segment.cut_block(&pending)?;
            pending.clear();
        }
        Ok(())
    }

    /// Flushes every segment, seals its storage and closes the store.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if a block cannot be written or a segment cannot
    /// be synced.
    pub fn close(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Ok(());
        }
        for id in 0..self.segments.len() {
            self.flush_write_to_segment(id)?;
            self.segments[id].backend.write().seal()?;
        }
        self.closed.store(true, Ordering::Release);
        debug!(rows = self.total_rows(), "store closed");
        Ok(())
    }

    /// Streams the rows of segment `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range.
    pub fn segment_rows(&self, id: usize) -> CoreResult<SegmentRows<'_>> {
        let total = self.segment_length(id)?;
        self.row_range(id, 0, total)
    }

    /// Streams rows `[begin, end)` of segment `id`.
    ///
    /// Blocks entirely before `begin` are skipped without being read.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range.
    pub fn row_range(&self, id: usize, begin: u64, end: u64) -> CoreResult<SegmentRows<'_>> {
        let total = self.segment_length(id)?;
        let end = end.min(total);
        let begin = begin.min(end);
        let mut rows = SegmentRows {
            store: self,
            segment: id,
            next_block: 0,
            current: Vec::new().into_iter(),
            remaining: end - begin,
        };
        rows.seek(begin)?;
        Ok(rows)
    }

    /// Reads all rows of segment `id` into memory.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is out of range or a block fails to decode.
    pub fn read_segment(&self, id: usize) -> CoreResult<Vec<Row>> {
        let num_blocks = self.num_blocks(id)?;
        let mut rows = Vec::with_capacity(usize::try_from(self.segment_length(id)?).unwrap_or(0));
        for block in 0..num_blocks {
            rows.extend(self.read_block(id, block)?);
        }
        Ok(rows)
    }
}

impl Drop for SegmentedStore {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        if let Some(dir) = &self.dir {
            if let Err(e) = fs::remove_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove temporary store");
            }
        }
    }
}

impl std::fmt::Debug for SegmentedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedStore")
            .field("columns", &self.schema.columns)
            .field("num_segments", &self.segments.len())
            .field("dir", &self.dir)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Appends rows to one segment of a [`SegmentedStore`].
#[derive(Debug)]
pub struct SegmentWriter<'a> {
    store: &'a SegmentedStore,
    segment: usize,
    rows_written: u64,
}

impl SegmentWriter<'_> {
    /// Appends one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not match the schema or the store
    /// is closed.
    pub fn write(&mut self, row: Row) -> CoreResult<()> {
        self.store.append_rows(self.segment, std::iter::once(row))?;
        self.rows_written += 1;
        Ok(())
    }

    /// Appends a batch of rows.
    ///
    /// # Errors
    ///
    /// Returns an error if a row does not match the schema or the store is
    /// closed.
    pub fn write_batch(&mut self, rows: Vec<Row>) -> CoreResult<()> {
        let n = rows.len() as u64;
        self.store.append_rows(self.segment, rows)?;
        self.rows_written += n;
        Ok(())
    }

    /// Makes every row written so far readable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.store.flush_write_to_segment(self.segment)
    }

    /// Returns the target segment.
    #[must_use]
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Returns the number of rows written through this writer.
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// Lazy iterator over a row range of one segment.
///
/// Blocks are decoded one at a time as the iterator advances.
pub struct SegmentRows<'a> {
    store: &'a SegmentedStore,
    segment: usize,
    next_block: usize,
    current: std::vec::IntoIter<Row>,
    remaining: u64,
}

impl SegmentRows<'_> {
    /// Number of rows left in the range.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Advances past up to `n` rows, returning how many were skipped.
    ///
    /// Whole blocks are skipped using their recorded row counts, without
    /// reading them.
    pub fn skip_rows(&mut self, n: u64) -> CoreResult<u64> {
        let n = n.min(self.remaining);
        let mut left = n;

        let buffered = (self.current.len() as u64).min(left);
        if buffered > 0 {
            // `buffered` is bounded by the decoded block length.
            self.current.nth(buffered as usize - 1);
            left -= buffered;
        }

        while left > 0 {
            let Some(rows) = self.store.block_row_count(self.segment, self.next_block)? else {
                break;
            };
            if rows <= left {
                self.next_block += 1;
                left -= rows;
                continue;
            }
            let mut block = self.store.read_block(self.segment, self.next_block)?;
            self.next_block += 1;
            // `left < rows`, which is a block row count.
            block.drain(..left as usize);
            self.current = block.into_iter();
            left = 0;
        }

        let skipped = n - left;
        self.remaining -= skipped;
        Ok(skipped)
    }

    fn seek(&mut self, row: u64) -> CoreResult<()> {
        let (block, intra) = self.store.locate_row(self.segment, row)?;
        self.next_block = block;
        if intra > 0 && self.remaining > 0 {
            let mut rows = self.store.read_block(self.segment, block)?;
            self.next_block = block + 1;
            // `intra` is below this block's row count.
            rows.drain(..intra as usize);
            self.current = rows.into_iter();
        }
        Ok(())
    }
}

impl Iterator for SegmentRows<'_> {
    type Item = CoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == 0 {
                return None;
            }
            if let Some(row) = self.current.next() {
                self.remaining -= 1;
                return Some(Ok(row));
            }
            match self.store.read_block(self.segment, self.next_block) {
                Ok(block) => {
                    self.next_block += 1;
                    self.current = block.into_iter();
                }
                Err(e) => {
                    self.remaining = 0;
                    return Some(Err(e));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (0, Some(n))
    }
}

fn segment_path(dir: &Path, id: usize) -> PathBuf {
    dir.join(format!("segment-{id:05}.dat"))
}

fn scan_blocks(backend: &dyn StorageBackend) -> CoreResult<Vec<BlockMeta>> {
    let size = backend.size();
    let mut blocks = Vec::new();
    let mut offset = 0u64;
    let mut first_row = 0u64;

    while offset < size {
        if offset + BLOCK_HEADER_SIZE as u64 > size {
            return Err(CoreError::segment_corruption(format!(
                "truncated block header at offset {offset}"
            )));
        }
        let header = BlockHeader::parse(&backend.read_at(offset, BLOCK_HEADER_SIZE)?)?;
        if offset + u64::from(header.block_len) > size {
            return Err(CoreError::segment_corruption(format!(
                "block at offset {offset} extends beyond segment"
            )));
        }
        blocks.push(BlockMeta {
            offset,
            len: header.block_len,
            rows: header.row_count,
            first_row,
        });
        offset += u64::from(header.block_len);
        first_row += u64::from(header.row_count);
    }

    Ok(blocks)
}
