//! Optional diagnostic block attached to traced calls.
//!
//! When a caller has call tracing enabled, each request carries a 264-byte
//! block right after the header: a process-wide sequence number plus the
//! source location that issued the call. The receiving side only uses it for
//! logging. Frames without the block are byte-for-byte identical to untraced
//! frames, so tracing never affects wire compatibility.

use std::{
    panic::Location,
    sync::atomic::{AtomicU32, Ordering},
};

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout,
    byteorder::little_endian::{I32, U32},
};

use crate::errors::{ProtocolError, Result};

const FILE_CAPACITY: usize = 256;

static NEXT_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// On-wire layout. No padding: 4 + 4 + 256 bytes.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct RawDebugInfo {
    num: U32,
    line: I32,
    file: [u8; FILE_CAPACITY],
}

const _: () = assert!(std::mem::size_of::<RawDebugInfo>() == DebugInfo::SIZE);

/// Diagnostic record for a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    num: u32,
    line: i32,
    file: String,
}

impl DebugInfo {
    /// Encoded block size in bytes.
    pub const SIZE: usize = 264;

    /// Create a record for `file:line`, assigning the next sequence number.
    ///
    /// File names longer than 255 bytes are truncated at a character
    /// boundary so the block always keeps a terminating NUL.
    pub fn new(file: &str, line: i32) -> Self {
        Self {
            num: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            line,
            file: truncate_file(file).to_string(),
        }
    }

    /// Create a record for the caller's source location.
    #[track_caller]
    pub fn here() -> Self {
        let location = Location::caller();
        Self::new(location.file(), i32::try_from(location.line()).unwrap_or(i32::MAX))
    }

    /// Sequence number.
    pub fn num(&self) -> u32 {
        self.num
    }

    /// Source line.
    pub fn line(&self) -> i32 {
        self.line
    }

    /// Source file name.
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut raw = RawDebugInfo {
            num: U32::new(self.num),
            line: I32::new(self.line),
            file: [0u8; FILE_CAPACITY],
        };
        raw.file[..self.file.len()].copy_from_slice(self.file.as_bytes());

        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Decode from the first [`DebugInfo::SIZE`] bytes of `bytes`.
    ///
    /// The file name ends at the first NUL; invalid UTF-8 is replaced.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let malformed =
            || ProtocolError::MalformedHeader { expected: Self::SIZE, actual: bytes.len() };

        let block = bytes.get(..Self::SIZE).ok_or_else(malformed)?;
        let raw = RawDebugInfo::read_from_bytes(block).map_err(|_| malformed())?;

        let end = raw.file.iter().position(|&b| b == 0).unwrap_or(FILE_CAPACITY);
        let file = String::from_utf8_lossy(&raw.file[..end]);
        Ok(Self {
            num: raw.num.get(),
            line: raw.line.get(),
            file: truncate_file(&file).to_string(),
        })
    }
}

/// Longest prefix of `file` that fits the block with its terminating NUL.
///
/// Lossy decoding can grow a name, so decoded names are truncated too.
fn truncate_file(file: &str) -> &str {
    let mut end = file.len().min(FILE_CAPACITY - 1);
    while !file.is_char_boundary(end) {
        end -= 1;
    }
    &file[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = DebugInfo::new("a.rs", 1);
        let b = DebugInfo::new("b.rs", 2);
        assert!(b.num() > a.num());
    }

    #[test]
    fn block_round_trip() {
        let info = DebugInfo::new("src/server.rs", 117);
        let bytes = info.to_bytes();
        assert_eq!(bytes.len(), DebugInfo::SIZE);
        assert_eq!(DebugInfo::from_bytes(&bytes).unwrap(), info);
    }

    #[test]
    fn layout_is_little_endian() {
        let info = DebugInfo::new("x", -1);
        let bytes = info.to_bytes();
        assert_eq!(&bytes[..4], &info.num().to_le_bytes());
        assert_eq!(&bytes[4..8], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(bytes[8], b'x');
        assert_eq!(bytes[9], 0);
    }

    #[test]
    fn long_file_names_are_truncated() {
        let name = "é".repeat(200);
        let info = DebugInfo::new(&name, 3);
        assert!(info.file().len() < FILE_CAPACITY);
        assert!(name.starts_with(info.file()));
        assert_eq!(DebugInfo::from_bytes(&info.to_bytes()).unwrap().file(), info.file());
    }

    #[test]
    fn here_records_this_file() {
        let info = DebugInfo::here();
        assert!(info.file().ends_with("debug_info.rs"));
        assert!(info.line() > 0);
    }

    #[test]
    fn short_block_is_rejected() {
        assert!(matches!(
            DebugInfo::from_bytes(&[0u8; 10]),
            Err(ProtocolError::MalformedHeader { expected: 264, actual: 10 })
        ));
    }
}
