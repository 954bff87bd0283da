//! Block framing for segment files.
//!
//! A segment file is a sequence of blocks:
//!
//! ```text
//! | block_len u32 | row_count u32 | payload (row archive) | crc32 u32 |
//! ```
//!
//! `block_len` covers the whole frame including itself and the CRC. The
//! CRC is computed over everything before it.

use crate::error::{CoreError, CoreResult};
use segflow_codec::{decode_rows_exact, encode_rows, Row};

/// Header size: block_len (4) + row_count (4).
pub const BLOCK_HEADER_SIZE: usize = 8;
/// CRC size.
pub const CRC_SIZE: usize = 4;

/// The fixed-size prefix of a framed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Total frame length in bytes.
    pub block_len: u32,
    /// Number of rows in the block.
    pub row_count: u32,
}

impl BlockHeader {
    /// Parses a header from the first [`BLOCK_HEADER_SIZE`] bytes of `data`.
    pub fn parse(data: &[u8]) -> CoreResult<Self> {
        if data.len() < BLOCK_HEADER_SIZE {
            return Err(CoreError::segment_corruption("block header too short"));
        }
        let block_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let row_count = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if (block_len as usize) < BLOCK_HEADER_SIZE + CRC_SIZE {
            return Err(CoreError::segment_corruption(format!(
                "block length {block_len} smaller than frame overhead"
            )));
        }
        Ok(Self {
            block_len,
            row_count,
        })
    }
}

/// Encodes rows into a framed block.
pub fn encode_block(rows: &[Row]) -> CoreResult<Vec<u8>> {
    let payload = encode_rows(rows)?;
    let block_len = BLOCK_HEADER_SIZE + payload.len() + CRC_SIZE;
    let block_len_u32 = u32::try_from(block_len)
        .map_err(|_| CoreError::invalid_operation("block exceeds 4 GiB"))?;
    let row_count = u32::try_from(rows.len())
        .map_err(|_| CoreError::invalid_operation("block exceeds u32::MAX rows"))?;

    let mut buf = Vec::with_capacity(block_len);
    buf.extend_from_slice(&block_len_u32.to_le_bytes());
    buf.extend_from_slice(&row_count.to_le_bytes());
    buf.extend_from_slice(&payload);

    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// Decodes a framed block, verifying its checksum and row count.
pub fn decode_block(data: &[u8]) -> CoreResult<Vec<Row>> {
    let header = BlockHeader::parse(data)?;
    let block_len = header.block_len as usize;
    if data.len() < block_len {
        return Err(CoreError::segment_corruption("incomplete block"));
    }

    let stored_crc = u32::from_le_bytes([
        data[block_len - 4],
        data[block_len - 3],
        data[block_len - 2],
        data[block_len - 1],
    ]);
    let computed_crc = compute_crc32(&data[..block_len - CRC_SIZE]);
    if stored_crc != computed_crc {
        return Err(CoreError::ChecksumMismatch {
            expected: stored_crc,
            actual: computed_crc,
        });
    }

    let payload = &data[BLOCK_HEADER_SIZE..block_len - CRC_SIZE];
    Ok(decode_rows_exact(payload, header.row_count as usize)?)
}

/// Computes the CRC32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
