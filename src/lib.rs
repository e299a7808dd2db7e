//! Multiplex many independent, ordered, reliable byte-stream channels over
//! a single full-duplex transport.
//!
//! Either side of a [`Session`] may both [`dial`](Session::dial) new
//! channels and [`accept`](Session::accept) channels opened by the peer;
//! each [`Channel`] implements `AsyncRead` and `AsyncWrite`. Writes are
//! fragmented at 1024 bytes so concurrent channels interleave fairly on the
//! shared transport.

pub mod channel;
pub mod channel_id;
pub mod codec;
pub mod config;
pub mod error;
pub mod flags;
pub mod frame;
pub mod session;

pub use channel::Channel;
pub use channel_id::{ChannelIdAllocator, Role};
pub use codec::Codec;
pub use config::{Config, ConfigBuilder};
pub use error::{MuxError, Result};
pub use flags::Flags;
pub use frame::{Frame, HEADER_SIZE, MAX_PAYLOAD};
pub use session::Session;
