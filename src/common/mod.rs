//! Common functionality.

pub mod io;

use std::cmp::Ordering;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use indexmap::IndexMap;

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Definition of canonical chromosome names.
pub const CHROMS: &[&str] = &[
    "1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12", "13", "14", "15", "16", "17",
    "18", "19", "20", "21", "22", "X", "Y", "M",
];

/// Build mapping of chromosome names to chromosome counts.
pub fn build_chrom_map() -> IndexMap<String, usize> {
    let mut result = IndexMap::new();
    for (i, &chrom_name) in CHROMS.iter().enumerate() {
        result.insert(chrom_name.to_owned(), i);
        result.insert(format!("chr{chrom_name}").to_owned(), i);
    }
    result.insert("x".to_owned(), 22);
    result.insert("y".to_owned(), 23);
    result.insert("chrx".to_owned(), 22);
    result.insert("chry".to_owned(), 23);
    result.insert("mt".to_owned(), 24);
    result.insert("m".to_owned(), 24);
    result.insert("chrmt".to_owned(), 24);
    result.insert("chrm".to_owned(), 24);
    result.insert("MT".to_owned(), 24);
    result.insert("chrMT".to_owned(), 24);
    result
}

/// Return the rank of a canonical chromosome, `None` for other contigs.
pub fn chrom_rank(chrom: &str) -> Option<usize> {
    let name = chrom.strip_prefix("chr").unwrap_or(chrom);
    match name {
        "X" | "x" => Some(22),
        "Y" | "y" => Some(23),
        "M" | "MT" | "m" | "mt" | "Mt" => Some(24),
        _ => name
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=22).contains(n))
            .map(|n| n - 1),
    }
}

/// Order chromosomes canonically; unknown contigs come last, sorted by name.
pub fn cmp_chrom(lhs: &str, rhs: &str) -> Ordering {
    match (chrom_rank(lhs), chrom_rank(rhs)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => lhs.cmp(rhs),
    }
}

/// Genotype string of a homozygous reference call.
pub const HOM_REF: &str = "0/0";

/// Placeholder genotype for samples whose call is not known.
pub const UNKNOWN_GENOTYPE: &str = "?/?";

/// Helper type for classifying genotype strings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Genotype {
    /// hom. ref.
    HomRef,
    /// het.
    Het,
    /// hom. alt.
    HomAlt,
    /// other, includes no-call
    WithNoCall,
}

impl std::str::FromStr for Genotype {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "0/0" | "0|0" | "0" => Genotype::HomRef,
            "0/1" | "1/0" | "0|1" | "1|0" => Genotype::Het,
            "1/1" | "1|1" | "1" => Genotype::HomAlt,
            "./." | "./0" | "./1" | "0/." | "1/." | "." => Genotype::WithNoCall,
            _ => anyhow::bail!("invalid genotype value: {:?}", s),
        })
    }
}

/// Split a genotype string into its allele tokens, e.g., `"0|1"` into `["0", "1"]`.
pub fn genotype_alleles(gt: &str) -> Vec<&str> {
    gt.split(['/', '|']).collect()
}

/// Whether the genotype string is phased.
pub fn is_phased(gt: &str) -> bool {
    gt.contains('|')
}

/// Return the version of the `opencga-storage-worker` crate and `x.y.z` in tests.
pub fn worker_version() -> &'static str {
    if cfg!(test) {
        "x.y.z"
    } else {
        env!("CARGO_PKG_VERSION")
    }
}
