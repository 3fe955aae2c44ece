#![forbid(unsafe_code)]

pub mod gate_session;
pub mod notify;
