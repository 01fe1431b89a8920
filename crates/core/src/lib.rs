//! Shared configuration, errors and small domain types used by every
//! NESUPixel crate.

pub mod config;
pub mod error;
pub mod lora;
pub mod translate;
pub mod workflow;
