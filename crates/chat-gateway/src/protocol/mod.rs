//! Gateway protocol definitions
//!
//! Op codes, close codes, the frame envelope and the payloads the session
//! reads or writes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{CloseCode, Disposition};
pub use messages::{GatewayMessage, READY, RESUMED};
pub use opcodes::OpCode;
pub use payloads::{
    GatewayInfo, HelloPayload, IdentifyPayload, IdentifyProperties, ReadyPayload, ResumePayload,
};
