//! Fixed 8-byte frame header.
//!
//! The header is a single 64-bit word, packed LSB-first and stored
//! little-endian:
//!
//! ```text
//!  63   62   61  60      54 53               32 31                  0
//! ┌───┬────┬────┬──────────┬───────────────────┬─────────────────────┐
//! │ok │rep │dbg │ rpc_id(7)│    counter (22)   │      size (32)      │
//! └───┴────┴────┴──────────┴───────────────────┴─────────────────────┘
//! ```
//!
//! `size` is the length of the whole frame, header included. `counter`
//! correlates a reply with its request; together with `rpc_id` it forms the
//! correlation [`Header::key`].

use crate::{
    errors::{ProtocolError, Result},
    flags::HeaderFlags,
};

const SIZE_BITS: u32 = 32;
const COUNTER_BITS: u32 = 22;
const RPC_ID_BITS: u32 = 7;

const COUNTER_SHIFT: u32 = SIZE_BITS;
const RPC_ID_SHIFT: u32 = COUNTER_SHIFT + COUNTER_BITS;
const FLAGS_SHIFT: u32 = RPC_ID_SHIFT + RPC_ID_BITS;

/// Fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Header {
    size: u32,
    counter: u32,
    rpc_id: u8,
    flags: HeaderFlags,
}

impl Header {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 8;

    /// Largest representable counter value.
    pub const MAX_COUNTER: u32 = (1 << COUNTER_BITS) - 1;

    /// Largest representable procedure id.
    pub const MAX_RPC_ID: u8 = (1 << RPC_ID_BITS) - 1;

    /// Procedure id reserved for calls addressed by name.
    pub const GENERIC_RPC_ID: u8 = 0;

    /// Create a request header.
    ///
    /// `counter` is truncated to 22 bits and `rpc_id` to 7 bits; use
    /// [`Header::try_request`] for values that come from a caller. The size is
    /// left at zero until the frame is finished.
    pub fn request(counter: u32, rpc_id: u8) -> Self {
        Self {
            size: 0,
            counter: counter & Self::MAX_COUNTER,
            rpc_id: rpc_id & Self::MAX_RPC_ID,
            flags: HeaderFlags::empty(),
        }
    }

    /// Create a request header, rejecting values that do not fit.
    ///
    /// # Errors
    ///
    /// `FieldOverflow` if `counter` exceeds 22 bits or `rpc_id` exceeds 7
    /// bits.
    pub fn try_request(counter: u32, rpc_id: u8) -> Result<Self> {
        if counter > Self::MAX_COUNTER {
            return Err(ProtocolError::FieldOverflow {
                field: "counter",
                value: u64::from(counter),
                bits: COUNTER_BITS,
            });
        }
        if rpc_id > Self::MAX_RPC_ID {
            return Err(ProtocolError::FieldOverflow {
                field: "rpc_id",
                value: u64::from(rpc_id),
                bits: RPC_ID_BITS,
            });
        }
        Ok(Self::request(counter, rpc_id))
    }

    /// Build the reply header for this request.
    ///
    /// Copies `counter` and `rpc_id`, sets `IS_REPLY` and `SUCCESS` as
    /// requested, and clears `HAS_DEBUG_INFO`.
    pub fn reply(&self, success: bool) -> Self {
        let mut flags = HeaderFlags::IS_REPLY;
        flags.set(HeaderFlags::SUCCESS, success);
        Self { size: 0, counter: self.counter, rpc_id: self.rpc_id, flags }
    }

    /// Total frame length in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Correlation counter.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Procedure id.
    pub fn rpc_id(&self) -> u8 {
        self.rpc_id
    }

    /// Status flags.
    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    /// Check if a debug block follows the header.
    pub fn has_debug_info(&self) -> bool {
        self.flags.has_debug_info()
    }

    /// Check if this header belongs to a reply.
    pub fn is_reply(&self) -> bool {
        self.flags.is_reply()
    }

    /// Check if the reply reports success.
    pub fn is_success(&self) -> bool {
        self.flags.is_success()
    }

    /// Check if the call is addressed by name.
    pub fn is_generic_rpc(&self) -> bool {
        self.rpc_id == Self::GENERIC_RPC_ID
    }

    /// Correlation key: `(counter << 7) | rpc_id`.
    pub fn key(&self) -> u32 {
        (self.counter << RPC_ID_BITS) | u32::from(self.rpc_id)
    }

    /// Set the total frame size.
    pub fn set_size(&mut self, size: u32) {
        self.size = size;
    }

    /// Set the correlation counter (truncated to 22 bits).
    pub fn set_counter(&mut self, counter: u32) {
        self.counter = counter & Self::MAX_COUNTER;
    }

    /// Set the procedure id (truncated to 7 bits).
    pub fn set_rpc_id(&mut self, rpc_id: u8) {
        self.rpc_id = rpc_id & Self::MAX_RPC_ID;
    }

    /// Replace the status flags.
    pub fn set_flags(&mut self, flags: HeaderFlags) {
        self.flags = flags;
    }

    /// Set or clear the debug-block flag.
    pub fn set_debug_info(&mut self, present: bool) {
        self.flags.set(HeaderFlags::HAS_DEBUG_INFO, present);
    }

    /// Length of the debug block this header announces.
    pub fn debug_block_len(&self) -> usize {
        if self.has_debug_info() { crate::DebugInfo::SIZE } else { 0 }
    }

    /// Pack into the 64-bit header word.
    pub fn to_u64(&self) -> u64 {
        u64::from(self.size)
            | (u64::from(self.counter) << COUNTER_SHIFT)
            | (u64::from(self.rpc_id) << RPC_ID_SHIFT)
            | (u64::from(self.flags.bits()) << FLAGS_SHIFT)
    }

    /// Unpack from the 64-bit header word.
    pub fn from_u64(word: u64) -> Self {
        Self {
            size: (word & u64::from(u32::MAX)) as u32,
            counter: ((word >> COUNTER_SHIFT) & u64::from(Self::MAX_COUNTER)) as u32,
            rpc_id: ((word >> RPC_ID_SHIFT) & u64::from(Self::MAX_RPC_ID)) as u8,
            flags: HeaderFlags::from_bits_truncate((word >> FLAGS_SHIFT) as u8),
        }
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        self.to_u64().to_le_bytes()
    }

    /// Decode from the first [`Header::SIZE`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// `MalformedHeader` if fewer than 8 bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(word) = bytes.get(..Self::SIZE) else {
            return Err(ProtocolError::MalformedHeader {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        };

        let mut raw = [0u8; Self::SIZE];
        raw.copy_from_slice(word);
        Ok(Self::from_u64(u64::from_le_bytes(raw)))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_header() -> impl Strategy<Value = Header> {
        (any::<u32>(), 0..=Header::MAX_COUNTER, 0..=Header::MAX_RPC_ID, 0u8..8).prop_map(
            |(size, counter, rpc_id, flags)| {
                let mut header = Header::request(counter, rpc_id);
                header.set_size(size);
                header.set_flags(HeaderFlags::from_bits_truncate(flags));
                header
            },
        )
    }

    proptest! {
        #[test]
        fn header_round_trip(header in arb_header()) {
            let decoded = Header::from_bytes(&header.to_bytes()).unwrap();
            prop_assert_eq!(decoded, header);
        }

        #[test]
        fn key_is_unique_per_counter_and_id(a in arb_header(), b in arb_header()) {
            if a.counter() != b.counter() || a.rpc_id() != b.rpc_id() {
                prop_assert_ne!(a.key(), b.key());
            }
        }
    }

    #[test]
    fn packed_layout_is_stable() {
        let mut header = Header::request(5, 3);
        header.set_size(0x1234);
        header.set_flags(HeaderFlags::IS_REPLY | HeaderFlags::SUCCESS);

        insta::assert_snapshot!(hex::encode(header.to_bytes()), @"341200000500c0c0");
    }

    #[test]
    fn layout_matches_bit_positions() {
        let mut header = Header::request(Header::MAX_COUNTER, 0);
        assert_eq!(header.to_bytes(), hex_literal::hex!("00000000ffff3f00"));

        header = Header::request(0, Header::MAX_RPC_ID);
        assert_eq!(header.to_u64(), 0x7F << 54);

        header = Header::default();
        header.set_debug_info(true);
        assert_eq!(header.to_u64(), 1 << 61);
    }

    #[test]
    fn short_input_is_malformed() {
        let err = Header::from_bytes(&[0u8; 7]).unwrap_err();
        assert_eq!(err, ProtocolError::MalformedHeader { expected: 8, actual: 7 });
    }

    #[test]
    fn reply_copies_correlation_fields() {
        let mut request = Header::request(42, 9);
        request.set_debug_info(true);
        request.set_size(100);

        let reply = request.reply(false);
        assert_eq!(reply.counter(), 42);
        assert_eq!(reply.rpc_id(), 9);
        assert_eq!(reply.key(), request.key());
        assert!(reply.is_reply());
        assert!(!reply.is_success());
        assert!(!reply.has_debug_info());
        assert_eq!(reply.size(), 0);
    }

    #[test]
    fn generic_rpc_is_id_zero() {
        assert!(Header::request(1, 0).is_generic_rpc());
        assert!(!Header::request(1, 1).is_generic_rpc());
    }

    #[test]
    fn checked_request_rejects_oversized_fields() {
        assert_eq!(
            Header::try_request(1, 129),
            Err(ProtocolError::FieldOverflow { field: "rpc_id", value: 129, bits: 7 })
        );
        assert_eq!(
            Header::try_request(Header::MAX_COUNTER + 1, 1),
            Err(ProtocolError::FieldOverflow {
                field: "counter",
                value: u64::from(Header::MAX_COUNTER) + 1,
                bits: 22,
            })
        );
        assert_eq!(
            Header::try_request(Header::MAX_COUNTER, Header::MAX_RPC_ID),
            Ok(Header::request(Header::MAX_COUNTER, Header::MAX_RPC_ID))
        );
    }

    #[test]
    fn counter_is_truncated_to_22_bits() {
        let header = Header::request(Header::MAX_COUNTER + 2, 0);
        assert_eq!(header.counter(), 1);
    }
}
