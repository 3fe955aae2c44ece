#![forbid(unsafe_code)]

pub mod mail;
pub mod strike;
