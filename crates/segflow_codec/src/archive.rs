//! Row archive: CBOR encoding of row batches.
//!
//! Segment blocks and group-by bucket chunks are persisted as archives.
//! An archive is a CBOR array of rows; each row is a CBOR array of values.

use crate::error::{CodecError, CodecResult};
use crate::row::Row;

/// Encodes a batch of rows into an archive.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_rows(rows: &[Row]) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(rows.len() * 16);
    ciborium::ser::into_writer(rows, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes an archive produced by [`encode_rows`].
///
/// # Errors
///
/// Returns an error if the bytes are not a valid archive.
pub fn decode_rows(bytes: &[u8]) -> CodecResult<Vec<Row>> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// Decodes an archive and checks it holds exactly `expected` rows.
///
/// # Errors
///
/// Returns an error if decoding fails or the row count differs.
pub fn decode_rows_exact(bytes: &[u8], expected: usize) -> CodecResult<Vec<Row>> {
    let rows = decode_rows(bytes)?;
    if rows.len() != expected {
        return Err(CodecError::RowCountMismatch {
            expected,
            actual: rows.len(),
        });
    }
    Ok(rows)
}

/// Encodes a single row.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_row(row: &Row) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(row, &mut buf)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a single row produced by [`encode_row`].
///
/// # Errors
///
/// Returns an error if the bytes are not a valid row.
pub fn decode_row(bytes: &[u8]) -> CodecResult<Row> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
