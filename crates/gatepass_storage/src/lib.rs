#![forbid(unsafe_code)]

pub mod gate_store;
pub mod repo;
pub mod sqlite;
