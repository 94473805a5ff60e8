//! Sample genotype index: per sample and genotype, the sorted variants of each row
//! together with per-variant index bytes for cheap filtering.

pub mod annotation_index;
pub mod builder;
pub mod cli;
pub mod codec;
pub mod entry;
pub mod file_index;
pub mod filter;
pub mod genotype_code;
pub mod mendelian;
pub mod query;
pub mod schema;
pub mod table;
