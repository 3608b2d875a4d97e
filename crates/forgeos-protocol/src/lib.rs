pub mod constants;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod message;
pub mod units;
pub mod wire;

pub use constants::*;
pub use envelope::{RequestEnvelope, RequestPayload, ResponseEnvelope, ResponsePayload};
pub use error::ProtocolError;
pub use message::RequestKind;
