//! Code for representing variants internally.
//!
//! A `Variant` is identified by `(chromosome, start, reference, alternate)`.  It carries
//! per-study entries with the sample data and file attributes it was loaded from.

pub mod annotation;

use std::cmp::Ordering;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::common::cmp_chrom;

pub use annotation::VariantAnnotation;

/// Encode the type of a variant.
#[derive(
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
    PartialEq,
    Eq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Clone,
    Copy,
    Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantType {
    /// Single nucleotide variant.
    #[default]
    Snv,
    /// Single nucleotide polymorphism.
    Snp,
    /// Multi-nucleotide variant.
    Mnv,
    /// Multi-nucleotide polymorphism.
    Mnp,
    /// Insertion or deletion.
    Indel,
    /// Insertion.
    Insertion,
    /// Deletion.
    Deletion,
    /// Structural variant.
    Sv,
    /// Copy number variant.
    Cnv,
    /// Symbolic allele, e.g., `<DEL>`.
    Symbolic,
    /// Reference block.
    NoVariation,
    /// Mix of types.
    Mixed,
}

impl VariantType {
    /// Parse a type name case-insensitively, listing the known names on failure.
    pub fn from_name(name: &str) -> Result<Self, String> {
        name.to_uppercase().parse::<VariantType>().map_err(|_| {
            format!(
                "unknown variant type {:?}, expected one of {}",
                name,
                VariantType::iter().join(", ")
            )
        })
    }

    /// Infer the variant type from reference and alternate alleles.
    pub fn infer(reference: &str, alternate: &str) -> Self {
        if alternate.starts_with('<') || alternate.contains('[') || alternate.contains(']') {
            VariantType::Symbolic
        } else if alternate == "." || alternate == reference {
            VariantType::NoVariation
        } else if reference.len() == 1 && alternate.len() == 1 {
            VariantType::Snv
        } else if reference.len() == alternate.len() {
            VariantType::Mnv
        } else {
            VariantType::Indel
        }
    }

    /// Whether the type describes a single nucleotide change.
    pub fn is_snv(&self) -> bool {
        matches!(self, VariantType::Snv | VariantType::Snp)
    }
}

/// 1-based, inclusive genomic region.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Region {
    /// Chromosome name.
    pub chromosome: String,
    /// 1-based start position.
    pub start: i32,
    /// 1-based end position, inclusive.
    pub end: i32,
}

impl Region {
    pub fn new(chromosome: &str, start: i32, end: i32) -> Self {
        Region {
            chromosome: chromosome.to_owned(),
            start,
            end,
        }
    }

    pub fn whole_chrom(chromosome: &str) -> Self {
        Region::new(chromosome, 1, i32::MAX)
    }

    /// Whether the 1-based `position` on `chromosome` falls into the region.
    pub fn contains(&self, chromosome: &str, position: i32) -> bool {
        same_chrom(&self.chromosome, chromosome) && self.start <= position && position <= self.end
    }
}

fn same_chrom(lhs: &str, rhs: &str) -> bool {
    lhs.strip_prefix("chr").unwrap_or(lhs) == rhs.strip_prefix("chr").unwrap_or(rhs)
}

/// Supporting code for `Region`.
pub(crate) mod region {
    /// Error type for `Region::from_str()`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("invalid region: {0:?}")]
        InvalidFormat(String),
    }
}

impl std::str::FromStr for Region {
    type Err = region::Error;

    /// Parse `chr`, `chr:pos`, or `chr:start-end`, positions may contain commas.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || region::Error::InvalidFormat(s.to_owned());
        let parse_pos = |p: &str| p.replace(',', "").parse::<i32>().map_err(|_| err());
        match s.split_once(':') {
            None if !s.is_empty() => Ok(Region::whole_chrom(s)),
            None => Err(err()),
            Some((chrom, range)) => {
                if chrom.is_empty() {
                    return Err(err());
                }
                let (start, end) = match range.split_once('-') {
                    Some((start, end)) => (parse_pos(start)?, parse_pos(end)?),
                    None => {
                        let pos = parse_pos(range)?;
                        (pos, pos)
                    }
                };
                if start > end {
                    return Err(err());
                }
                Ok(Region::new(chrom, start, end))
            }
        }
    }
}

/// Coordinates of a secondary alternate allele.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct AlternateCoordinate {
    pub chromosome: String,
    pub start: i32,
    pub end: i32,
    pub reference: String,
    pub alternate: String,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
}

/// Per-file data of a study entry, corresponds to `FILTER`, `QUAL`, and `INFO/*`.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct FileEntry {
    /// The file identifier.
    pub file_id: String,
    /// Original call, if the variant was normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<String>,
    /// File attributes, e.g., `FILTER`, `QUAL`, `DP`.
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
}

/// Data of one sample, aligned with `StudyEntry::format`.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct SampleEntry {
    /// The sample name.
    pub sample_id: String,
    /// FORMAT values, e.g., `["0/1", "23"]` for `GT:DP`.
    pub data: Vec<String>,
}

/// Data of one variant in one study.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct StudyEntry {
    /// The study identifier.
    pub study_id: String,
    /// FORMAT keys, e.g., `["GT", "DP"]`.
    #[serde(default)]
    pub format: Vec<String>,
    /// Per-sample data.
    #[serde(default)]
    pub samples: Vec<SampleEntry>,
    /// The files this variant was read from.
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// Secondary alternate alleles.
    #[serde(default)]
    pub secondary_alternates: Vec<AlternateCoordinate>,
}

impl StudyEntry {
    /// Index of `key` in the `format` list.
    pub fn format_position(&self, key: &str) -> Option<usize> {
        self.format.iter().position(|k| k == key)
    }

    /// Value of the FORMAT `key` for the given sample.
    pub fn sample_data(&self, sample_id: &str, key: &str) -> Option<&str> {
        let pos = self.format_position(key)?;
        self.samples
            .iter()
            .find(|s| s.sample_id == sample_id)
            .and_then(|s| s.data.get(pos))
            .map(|v| v.as_str())
    }

    /// Genotype of the given sample.
    pub fn sample_genotype(&self, sample_id: &str) -> Option<&str> {
        self.sample_data(sample_id, "GT")
    }
}

/// A sequence variant.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Variant {
    pub chromosome: String,
    /// 1-based start position.
    pub start: i32,
    /// 1-based end position, inclusive; `start - 1` for insertions.
    pub end: i32,
    pub reference: String,
    pub alternate: String,
    #[serde(rename = "type")]
    pub variant_type: VariantType,
    /// External identifiers, e.g., dbSNP IDs.
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub studies: Vec<StudyEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<VariantAnnotation>,
}

impl Variant {
    /// Construct a variant and infer its end position and type.
    pub fn new(chromosome: &str, start: i32, reference: &str, alternate: &str) -> Self {
        let variant_type = VariantType::infer(reference, alternate);
        Variant {
            chromosome: chromosome.to_owned(),
            start,
            end: start + reference.len() as i32 - 1,
            reference: reference.to_owned(),
            alternate: alternate.to_owned(),
            variant_type,
            ..Default::default()
        }
    }

    /// Return the study entry with the given identifier.
    pub fn study(&self, study_id: &str) -> Option<&StudyEntry> {
        self.studies.iter().find(|s| s.study_id == study_id)
    }

    /// Whether both variants have the same identity.
    pub fn same_key(&self, other: &Variant) -> bool {
        cmp_intra_chromosome(self, other) == Ordering::Equal
    }
}

fn allele_str(allele: &str) -> &str {
    if allele.is_empty() {
        "-"
    } else {
        allele
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chromosome,
            self.start,
            allele_str(&self.reference),
            allele_str(&self.alternate)
        )
    }
}

/// Supporting code for `Variant`.
pub(crate) mod variant_str {
    /// Error type for `Variant::from_str()`.
    #[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("invalid variant string: {0:?}")]
        InvalidFormat(String),
    }
}

impl std::str::FromStr for Variant {
    type Err = variant_str::Error;

    /// Parse `chr:pos:ref:alt` with `-` denoting an empty allele.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = s.split(':').collect::<Vec<_>>();
        let (chrom, pos, reference, alternate) = match tokens.as_slice() {
            [chrom, pos, reference, alternate] => (*chrom, *pos, *reference, *alternate),
            _ => return Err(variant_str::Error::InvalidFormat(s.to_owned())),
        };
        let pos: i32 = pos
            .parse()
            .map_err(|_| variant_str::Error::InvalidFormat(s.to_owned()))?;
        if chrom.is_empty() {
            return Err(variant_str::Error::InvalidFormat(s.to_owned()));
        }
        let reference = if reference == "-" { "" } else { reference };
        let alternate = if alternate == "-" { "" } else { alternate };
        Ok(Variant::new(chrom, pos, reference, alternate))
    }
}

/// Canonical intra-chromosome ordering: chromosome, start, end, reference, alternate.
///
/// The sample index encoder relies on this order for its monotonic position deltas.
pub fn cmp_intra_chromosome(lhs: &Variant, rhs: &Variant) -> Ordering {
    cmp_chrom(&lhs.chromosome, &rhs.chromosome)
        .then_with(|| lhs.start.cmp(&rhs.start))
        .then_with(|| lhs.end.cmp(&rhs.end))
        .then_with(|| lhs.reference.cmp(&rhs.reference))
        .then_with(|| lhs.alternate.cmp(&rhs.alternate))
}

/// Wrapper that orders variants by `cmp_intra_chromosome()`, e.g., for `BTreeSet`.
#[derive(Debug, Clone)]
pub struct ByPosition(pub Variant);

impl PartialEq for ByPosition {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ByPosition {}

impl PartialOrd for ByPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ByPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_intra_chromosome(&self.0, &other.0)
    }
}
