//! Mediatun signaling protocol definitions.
//!
//! Protobuf messages and the gRPC client for the `rtc.Sfu/Signal`
//! bidirectional stream. Session descriptions and ICE candidates travel
//! inside these messages as JSON-encoded payloads; this crate treats them
//! as opaque bytes.
//!
//! The generated code is checked in under `src/` so builds do not require
//! protoc; `proto/sfu.proto` is the definition it was generated from.

// Signaling API
pub mod rtc {
    #[allow(clippy::all)]
    #[allow(warnings)]
    include!("rtc.rs");
}

pub use rtc::sfu_client::SfuClient;
pub use rtc::{signal_reply, signal_request, trickle};
pub use rtc::{JoinReply, JoinRequest, SignalReply, SignalRequest, Trickle};
