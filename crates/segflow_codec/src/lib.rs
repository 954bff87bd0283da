//! # Segflow Codec
//!
//! Row value model and row archive encoding for Segflow.
//!
//! Row internals are opaque to the execution engine beyond three things,
//! all provided here:
//! - equality and a total order over [`Value`]s
//! - a [`Row`] tuple type
//! - serialization of row batches into archives (CBOR via `ciborium`)
//!
//! ## Usage
//!
//! ```
//! use segflow_codec::{decode_rows, encode_rows, row};
//!
//! let rows = vec![row![1i64, "one"], row![2i64, "two"]];
//! let bytes = encode_rows(&rows).unwrap();
//! assert_eq!(decode_rows(&bytes).unwrap(), rows);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod archive;
mod error;
mod row;
mod value;

pub use archive::{decode_row, decode_rows, decode_rows_exact, encode_row, encode_rows};
pub use error::{CodecError, CodecResult};
pub use row::Row;
pub use value::Value;

/// Types that can be written into an archive.
pub trait Encode {
    /// Encode this value to archive bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Types that can be restored from an archive.
pub trait Decode: Sized {
    /// Decode this value from archive bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Row {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        encode_row(self)
    }
}

impl Decode for Row {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_row(bytes)
    }
}

impl Encode for [Row] {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        encode_rows(self)
    }
}

impl Decode for Vec<Row> {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        decode_rows(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn traits_dispatch_to_archive() {
        let rows = vec![row![1i64], row![Value::Null]];
        let bytes = rows.as_slice().encode().unwrap();
        assert_eq!(Vec::<Row>::decode(&bytes).unwrap(), rows);

        let single = row!["x"];
        assert_eq!(Row::decode(&single.encode().unwrap()).unwrap(), single);
    }
}
