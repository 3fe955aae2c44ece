#![forbid(unsafe_code)]

pub mod card;
pub mod common;
pub mod notify;
pub mod strike;

pub use common::{ContractViolation, ReasonCodeId, SchemaVersion, UnixTimeNs, Validate};
