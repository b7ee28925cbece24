//! Header status flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// The three single-bit flags at the top of the header word.
    ///
    /// Bit positions here are relative to the flag group; [`crate::Header`]
    /// shifts them into bits 61..=63 of the packed word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct HeaderFlags: u8 {
        /// A [`crate::DebugInfo`] block follows the header.
        const HAS_DEBUG_INFO = 0b0000_0001;

        /// The frame answers an earlier request.
        const IS_REPLY = 0b0000_0010;

        /// The call succeeded (replies only).
        const SUCCESS = 0b0000_0100;
    }
}

impl HeaderFlags {
    /// Check if a debug block follows the header.
    pub fn has_debug_info(self) -> bool {
        self.contains(Self::HAS_DEBUG_INFO)
    }

    /// Check if this is a reply.
    pub fn is_reply(self) -> bool {
        self.contains(Self::IS_REPLY)
    }

    /// Check if the call succeeded.
    pub fn is_success(self) -> bool {
        self.contains(Self::SUCCESS)
    }
}
