//! Wire format for the czrpc procedure call protocol.
//!
//! Every message is a frame: a fixed 8-byte header, an optional 264-byte
//! debug block, then a payload of back-to-back CBOR items. The header carries
//! the total frame size, the correlation counter, the procedure id and three
//! status flags, which is everything the dispatch layer needs to route a call
//! or match a reply without touching the payload.
//!
//! ```text
//! ┌──────────────┬───────────────────────┬──────────────────────────┐
//! │ Header (8 B) │ DebugInfo (264 B, opt)│ payload (CBOR items)     │
//! └──────────────┴───────────────────────┴──────────────────────────┘
//! ```
//!
//! Procedure id 0 is reserved for generic calls: the payload starts with the
//! procedure name and the parameters travel as dynamically-typed [`Any`]
//! values. Any other id addresses a procedure directly and the payload holds
//! its parameter tuple in the typed encoding.
//!
//! # Security
//!
//! Header packing is explicit shift/mask over a little-endian `u64`, so the
//! format never depends on in-memory struct layout. Frame sizes are bounded
//! by the caller-supplied limit before any buffer is allocated.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod any;
pub mod codec;
pub mod debug_info;
pub mod errors;
pub mod flags;
pub mod frame;
pub mod header;
pub mod payload;

pub use any::{Any, FromAny, FromAnyParams, IntoAny, IntoAnyParams};
pub use codec::FrameAccumulator;
pub use debug_info::DebugInfo;
pub use errors::{ProtocolError, Result};
pub use flags::HeaderFlags;
pub use frame::{Frame, FrameBuilder};
pub use header::Header;
