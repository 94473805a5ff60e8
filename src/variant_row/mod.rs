//! Sparse per-study variant rows and their reconstruction into variants.
//!
//! A row lists sample ids only for the "interesting" genotypes; all other samples carry
//! the default genotype and PASS, which is checked against the recorded counts.

pub mod cli;
pub mod converter;

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::variant::{FileEntry, VariantType};

/// Genotype key whose samples are described by `StudyRow::complex_genotypes`.
pub const OTHER_GENOTYPE: &str = "OTHER";

/// Secondary alternate allele; missing or empty fields default to the primary variant.
#[serde_with::skip_serializing_none]
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SecondaryAlternateRow {
    pub chromosome: Option<String>,
    pub start: Option<i32>,
    pub end: Option<i32>,
    pub reference: Option<String>,
    pub alternate: Option<String>,
    #[serde(rename = "type")]
    pub variant_type: Option<VariantType>,
}

/// Data of one study in a row.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct StudyRow {
    pub study_id: u32,
    /// Sample ids per genotype.
    #[serde(default)]
    pub genotypes: BTreeMap<String, Vec<u32>>,
    /// Number of samples carrying the default genotype.
    #[serde(default)]
    pub hom_ref_count: u32,
    /// Number of samples with `FILTER=PASS`.
    #[serde(default)]
    pub pass_count: u32,
    /// Non-PASS FILTER values per sample id.
    #[serde(default)]
    pub filter_exceptions: BTreeMap<u32, String>,
    /// Multi-allelic or otherwise ambiguous genotypes per sample id.
    #[serde(default)]
    pub complex_genotypes: BTreeMap<u32, String>,
    #[serde(default)]
    pub secondary_alternates: Vec<SecondaryAlternateRow>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// One stored variant row.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct VariantRow {
    pub chromosome: String,
    pub start: i32,
    pub reference: String,
    pub alternate: String,
    #[serde(default)]
    pub studies: Vec<StudyRow>,
}

/// Configuration of one study as needed for reconstruction.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StudyConfig {
    pub study_id: u32,
    pub name: String,
    /// Sample name to sample id, in indexed order.
    pub indexed_samples: IndexMap<String, u32>,
}
