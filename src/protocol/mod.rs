//! Wire Protocol
//!
//! Shared message shapes for both ends of the real-time layer.
//!
//! ## Architecture
//!
//! - **Channel**: the fixed set of logical topics multiplexed over one socket
//! - **Envelope**: the unit exchanged over the wire
//! - **Codec**: JSON text framing for envelopes
//!
//! ## Example
//!
//! ```rust
//! use switchboard::protocol::{codec, Channel, Envelope};
//!
//! let frame = codec::encode(&Envelope::subscribe(Channel::Alerts)).unwrap();
//! assert_eq!(frame, r#"{"type":"subscribe","channel":"alerts"}"#);
//! ```

mod channel;
pub mod codec;
mod envelope;

pub use channel::{Channel, UnknownChannel};
pub use codec::CodecError;
pub use envelope::{Envelope, MessageType};
