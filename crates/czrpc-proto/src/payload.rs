//! Payload item encoding.
//!
//! A payload is a sequence of CBOR items written back to back: a procedure
//! name followed by a parameter list, a parameter tuple, a return value or an
//! error string. Reading consumes exactly one item from the front of the
//! slice, so consecutive reads walk the sequence.

use bytes::{BufMut, BytesMut};
use serde::{Serialize, de::DeserializeOwned};

use crate::errors::{ProtocolError, Result};

/// Append one CBOR item to `out`.
pub fn write<T: Serialize + ?Sized>(value: &T, out: &mut BytesMut) -> Result<()> {
    ciborium::ser::into_writer(value, out.writer())
        .map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Read one CBOR item from the front of `input`, advancing it.
pub fn read<T: DeserializeOwned>(input: &mut &[u8]) -> Result<T> {
    ciborium::de::from_reader(input).map_err(|e| ProtocolError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Any;

    #[test]
    fn items_are_read_in_sequence() {
        let mut out = BytesMut::new();
        write("add", &mut out).unwrap();
        write(&vec![Any::Integer(2), Any::Integer(3)], &mut out).unwrap();

        let mut input: &[u8] = &out;
        let name: String = read(&mut input).unwrap();
        let params: Vec<Any> = read(&mut input).unwrap();

        assert_eq!(name, "add");
        assert_eq!(params, vec![Any::Integer(2), Any::Integer(3)]);
        assert!(input.is_empty());
    }

    #[test]
    fn truncated_item_fails_to_decode() {
        let mut out = BytesMut::new();
        write("a longer procedure name", &mut out).unwrap();

        let mut input: &[u8] = &out[..5];
        assert!(matches!(read::<String>(&mut input), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn mismatched_type_fails_to_decode() {
        let mut out = BytesMut::new();
        write(&(1i32, 2i32), &mut out).unwrap();

        let mut input: &[u8] = &out;
        assert!(read::<String>(&mut input).is_err());
    }
}
