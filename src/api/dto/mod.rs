//! Data Transfer Objects for REST request/response serialization.
//!
//! Field names are camelCase on the wire.

pub mod intent_dto;
pub mod ops_dto;

pub use intent_dto::*;
pub use ops_dto::*;
