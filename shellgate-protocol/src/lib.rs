//! shellgate-protocol: Control protocol and observer data types
//!
//! Defines the client-to-server control messages exchanged by a terminal
//! bridge (`init`, `read`, `resize`), the framing codec used by stream
//! transports, and the registry/event types exposed to observers.

pub mod codec;
pub mod control;
pub mod types;

pub use codec::{ControlLineCodec, MAX_LINE_LENGTH};
pub use control::{decode, ControlMessage, InitRequest, ProtocolError};
pub use types::{
    Geometry, SessionEvent, SessionEventType, SessionId, SessionSnapshot, TransportDescriptor,
    UNLIMITED,
};
