//! Variant documents in MongoDB: query translation and the two-phase loading protocol.

pub mod cli;
pub mod collection;
pub mod document;
#[cfg(test)]
pub(crate) mod memory;
pub mod query;
pub mod range;
pub mod upsert;
