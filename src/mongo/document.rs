//! Conversion of variants into MongoDB documents.
//!
//! ```text
//! {_id: "1:100:A:T", chromosome, start, end, reference, alternate, type, ids: [...],
//!  _at: {chunkIds: ["1_0_1k", "1_0_10k"]},
//!  studies: [{sid, files: [{fid, attrs}], gt: {"0/1": [5, 7]}}],
//!  stats: [{sid, fid, cid, maf, mgf, ...}], annotation: {...}}
//! ```

use std::collections::BTreeMap;

use indexmap::IndexMap;
use mongodb::bson::{self, doc, Bson, Document};

use crate::common::UNKNOWN_GENOTYPE;
use crate::conf::MongoConfig;
use crate::variant::{StudyEntry, Variant};
use crate::variant_row::StudyConfig;

pub const ID: &str = "_id";
pub const CHROMOSOME: &str = "chromosome";
pub const START: &str = "start";
pub const END: &str = "end";
pub const REFERENCE: &str = "reference";
pub const ALTERNATE: &str = "alternate";
pub const TYPE: &str = "type";
pub const IDS: &str = "ids";
pub const AT: &str = "_at";
pub const CHUNK_IDS: &str = "chunkIds";
pub const STUDIES: &str = "studies";
pub const STUDY_ID: &str = "sid";
pub const FILES: &str = "files";
pub const FILE_ID: &str = "fid";
pub const ATTRIBUTES: &str = "attrs";
pub const GENOTYPES: &str = "gt";
pub const STATS: &str = "stats";
pub const COHORT_ID: &str = "cid";
pub const MAF: &str = "maf";
pub const MGF: &str = "mgf";
pub const MISSING_ALLELES: &str = "missAl";
pub const MISSING_GENOTYPES: &str = "missGt";
pub const NUM_GT: &str = "numGt";
pub const ANNOTATION: &str = "annotation";

/// Cohort used by stats filters without explicit cohort.
pub const DEFAULT_COHORT: &str = "ALL";

/// Error type for document conversion.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("sample {sample:?} is not indexed in study {study:?}")]
    UnknownSample { study: String, sample: String },
    #[error("variant {variant} has no data for study {study:?}")]
    MissingStudy { variant: String, study: String },
    #[error("could not serialize to BSON: {0}")]
    Bson(#[from] bson::ser::Error),
}

/// Sizes of the region chunks recorded in `_at.chunkIds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSizes {
    pub small: u32,
    pub big: u32,
}

impl From<&MongoConfig> for ChunkSizes {
    fn from(config: &MongoConfig) -> Self {
        ChunkSizes {
            small: config.chunk_size_small,
            big: config.chunk_size_big,
        }
    }
}

impl Default for ChunkSizes {
    fn default() -> Self {
        Self::from(&MongoConfig::default())
    }
}

fn chunk_label(chunk_size: u32) -> String {
    if chunk_size % 1_000 == 0 {
        format!("{}k", chunk_size / 1_000)
    } else {
        format!("{}", chunk_size)
    }
}

/// Chunk ids of size `chunk_size` overlapping `start..=end`, e.g., `1_0_1k`.
pub fn chunk_ids(chromosome: &str, start: i32, end: i32, chunk_size: u32) -> Vec<String> {
    let chunk_size = chunk_size.max(1) as i64;
    let label = chunk_label(chunk_size as u32);
    let first = (start.max(0) as i64) / chunk_size;
    let last = (end.max(start).max(0) as i64) / chunk_size;
    (first..=last)
        .map(|i| format!("{}_{}_{}", chromosome, i, label))
        .collect()
}

/// Canonical document id of a variant.
pub fn variant_id(variant: &Variant) -> String {
    variant.to_string()
}

/// Variant-level fields as inserted with a new document, without `_id` and studies.
pub fn variant_body(variant: &Variant, chunk_sizes: ChunkSizes) -> Document {
    let mut chunks = chunk_ids(
        &variant.chromosome,
        variant.start,
        variant.end,
        chunk_sizes.small,
    );
    chunks.extend(chunk_ids(
        &variant.chromosome,
        variant.start,
        variant.end,
        chunk_sizes.big,
    ));
    doc! {
        CHROMOSOME: variant.chromosome.as_str(),
        START: variant.start,
        END: variant.end,
        REFERENCE: variant.reference.as_str(),
        ALTERNATE: variant.alternate.as_str(),
        TYPE: variant.variant_type.to_string(),
        IDS: variant.ids.clone(),
        AT: { CHUNK_IDS: chunks },
    }
}

/// Serialized annotation sub-document.
pub fn annotation_document(variant: &Variant) -> Result<Option<Bson>, Error> {
    variant
        .annotation
        .as_ref()
        .map(bson::to_bson)
        .transpose()
        .map_err(Error::from)
}

/// Study data of one variant as stored below `studies`.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyUpdate {
    pub study_id: u32,
    pub files: Vec<Document>,
    /// Sample ids per non-default genotype, each sorted.
    pub genotypes: BTreeMap<String, Vec<i64>>,
    /// Sorted ids of the samples present with a known genotype, default included.
    pub known: Vec<i64>,
}

impl StudyUpdate {
    /// Build from the incoming study entry.
    ///
    /// Samples with `default_genotype` are left out.  Indexed samples not present in the
    /// entry are recorded as unknown unless the default genotype is unknown itself.
    pub fn new(
        entry: &StudyEntry,
        config: &StudyConfig,
        default_genotype: &str,
    ) -> Result<Self, Error> {
        let gt_pos = entry.format_position("GT");
        let mut genotypes: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        let mut seen = Vec::with_capacity(entry.samples.len());
        let mut known = Vec::with_capacity(entry.samples.len());
        for sample in &entry.samples {
            let sample_id =
                config
                    .indexed_samples
                    .get(&sample.sample_id)
                    .ok_or_else(|| Error::UnknownSample {
                        study: config.name.clone(),
                        sample: sample.sample_id.clone(),
                    })?;
            seen.push(*sample_id);
            let gt = gt_pos
                .and_then(|pos| sample.data.get(pos))
                .map(String::as_str)
                .unwrap_or(UNKNOWN_GENOTYPE);
            if gt != UNKNOWN_GENOTYPE {
                known.push(*sample_id as i64);
            }
            if gt != default_genotype {
                genotypes.entry(gt.to_owned()).or_default().push(*sample_id as i64);
            }
        }
        known.sort_unstable();
        known.dedup();
        if default_genotype != UNKNOWN_GENOTYPE {
            let missing = config
                .indexed_samples
                .values()
                .filter(|id| !seen.contains(id))
                .map(|id| *id as i64)
                .collect::<Vec<_>>();
            if !missing.is_empty() {
                genotypes
                    .entry(UNKNOWN_GENOTYPE.to_owned())
                    .or_default()
                    .extend(missing);
            }
        }
        genotypes.values_mut().for_each(|ids| {
            ids.sort_unstable();
            ids.dedup();
        });

        let files = entry
            .files
            .iter()
            .map(|file| {
                doc! {
                    FILE_ID: file.file_id.as_str(),
                    ATTRIBUTES: file_attributes(&file.attributes),
                }
            })
            .collect();

        Ok(StudyUpdate {
            study_id: config.study_id,
            files,
            genotypes,
            known,
        })
    }

    pub fn genotypes_document(&self) -> Document {
        let mut result = Document::new();
        for (gt, ids) in &self.genotypes {
            result.insert(gt.clone(), ids.clone());
        }
        result
    }

    /// The full study sub-document.
    pub fn to_document(&self) -> Document {
        doc! {
            STUDY_ID: self.study_id as i64,
            FILES: self.files.clone(),
            GENOTYPES: self.genotypes_document(),
        }
    }
}

fn file_attributes(attributes: &IndexMap<String, String>) -> Document {
    let mut result = Document::new();
    for (key, value) in attributes {
        // Dots are not allowed in field names.
        result.insert(key.replace('.', "_"), value.as_str());
    }
    result
}

/// Statistics of one variant in one cohort of one study.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Default)]
pub struct VariantStatsRecord {
    /// Variant in `chr:pos:ref:alt` form.
    pub variant: String,
    pub study_id: u32,
    #[serde(default)]
    pub file_id: String,
    pub cohort_id: String,
    #[serde(default)]
    pub maf: f64,
    #[serde(default)]
    pub mgf: f64,
    #[serde(default)]
    pub missing_alleles: u32,
    #[serde(default)]
    pub missing_genotypes: u32,
    #[serde(default)]
    pub genotype_counts: BTreeMap<String, u32>,
}

impl VariantStatsRecord {
    /// Fields identifying the record among the variant's stats.
    pub fn key_document(&self) -> Document {
        doc! {
            STUDY_ID: self.study_id as i64,
            FILE_ID: self.file_id.as_str(),
            COHORT_ID: self.cohort_id.as_str(),
        }
    }

    pub fn to_document(&self) -> Document {
        let mut num_gt = Document::new();
        for (gt, count) in &self.genotype_counts {
            num_gt.insert(gt.clone(), *count as i64);
        }
        let mut result = self.key_document();
        result.insert(MAF, self.maf);
        result.insert(MGF, self.mgf);
        result.insert(MISSING_ALLELES, self.missing_alleles as i64);
        result.insert(MISSING_GENOTYPES, self.missing_genotypes as i64);
        result.insert(NUM_GT, num_gt);
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::variant::{FileEntry, SampleEntry};
    use pretty_assertions::assert_eq;

    fn study_config() -> StudyConfig {
        StudyConfig {
            study_id: 3,
            name: "s3".into(),
            indexed_samples: [("A", 5), ("B", 6), ("C", 7), ("D", 8)]
                .into_iter()
                .map(|(name, id)| (name.to_string(), id))
                .collect(),
        }
    }

    fn study_entry() -> StudyEntry {
        let sample = |name: &str, gt: &str| SampleEntry {
            sample_id: name.into(),
            data: vec![gt.into()],
        };
        StudyEntry {
            study_id: "s3".into(),
            format: vec!["GT".into()],
            samples: vec![sample("A", "0/1"), sample("B", "0/0"), sample("C", "1/1")],
            files: vec![FileEntry {
                file_id: "f1".into(),
                call: None,
                attributes: [("QUAL".to_string(), "50".to_string())].into_iter().collect(),
            }],
            secondary_alternates: vec![],
        }
    }

    #[rstest::rstest]
    #[case(100, 100, 1_000, vec!["1_0_1k"])]
    #[case(999, 1_000, 1_000, vec!["1_0_1k", "1_1_1k"])]
    #[case(25_000, 25_010, 10_000, vec!["1_2_10k"])]
    #[case(10, 10, 500, vec!["1_0_500"])]
    fn chunk_ids_smoke(
        #[case] start: i32,
        #[case] end: i32,
        #[case] chunk_size: u32,
        #[case] expected: Vec<&str>,
    ) {
        assert_eq!(chunk_ids("1", start, end, chunk_size), expected);
    }

    #[test]
    fn body_has_chunks_and_no_id() {
        let variant = Variant::new("1", 100, "A", "T");
        let body = variant_body(&variant, ChunkSizes::default());
        assert!(!body.contains_key(ID));
        assert!(!body.contains_key(STUDIES));
        assert_eq!(body.get_str(TYPE).ok(), Some("SNV"));
        assert_eq!(
            body.get_document(AT)
                .ok()
                .and_then(|at| at.get_array(CHUNK_IDS).ok())
                .cloned(),
            Some(vec![Bson::from("1_0_1k"), Bson::from("1_0_10k")])
        );
    }

    #[test]
    fn study_update_with_missing_overlay() -> Result<(), anyhow::Error> {
        let update = StudyUpdate::new(&study_entry(), &study_config(), "0/0")?;
        assert_eq!(
            update.to_document(),
            doc! {
                "sid": 3_i64,
                "files": [{"fid": "f1", "attrs": {"QUAL": "50"}}],
                "gt": {"0/1": [5_i64], "1/1": [7_i64], "?/?": [8_i64]},
            }
        );
        assert_eq!(update.known, vec![5, 6, 7]);
        Ok(())
    }

    #[test]
    fn study_update_without_overlay_for_unknown_default() -> Result<(), anyhow::Error> {
        let update = StudyUpdate::new(&study_entry(), &study_config(), UNKNOWN_GENOTYPE)?;
        assert_eq!(
            update.genotypes_document(),
            doc! {"0/0": [6_i64], "0/1": [5_i64], "1/1": [7_i64]}
        );
        Ok(())
    }

    #[test]
    fn study_update_unknown_sample() {
        let mut entry = study_entry();
        entry.samples[0].sample_id = "X".into();
        assert!(matches!(
            StudyUpdate::new(&entry, &study_config(), "0/0"),
            Err(Error::UnknownSample { .. })
        ));
    }

    #[test]
    fn stats_document() {
        let record = VariantStatsRecord {
            variant: "1:100:A:T".into(),
            study_id: 3,
            file_id: "f1".into(),
            cohort_id: "ALL".into(),
            maf: 0.25,
            mgf: 0.0,
            missing_alleles: 0,
            missing_genotypes: 1,
            genotype_counts: [("0/1".to_string(), 2)].into_iter().collect(),
        };
        assert_eq!(
            record.to_document(),
            doc! {
                "sid": 3_i64, "fid": "f1", "cid": "ALL", "maf": 0.25, "mgf": 0.0,
                "missAl": 0_i64, "missGt": 1_i64, "numGt": {"0/1": 2_i64},
            }
        );
    }
}
