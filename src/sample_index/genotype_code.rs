//! Four-bit genotype codes, used for the parents-index byte.
//!
//! The father's code is stored in the high nibble, the mother's in the low nibble.

use crate::common::{genotype_alleles, is_phased};

pub const HOM_REF_UNPHASED: u8 = 0;
pub const HET_REF_UNPHASED: u8 = 1;
pub const HOM_ALT_UNPHASED: u8 = 2;
pub const HOM_REF_PHASED: u8 = 3;
pub const HET_REF_01_PHASED: u8 = 4;
pub const HET_REF_10_PHASED: u8 = 5;
pub const HOM_ALT_PHASED: u8 = 6;
pub const HAPLOID_REF: u8 = 7;
pub const HAPLOID_ALT: u8 = 8;
/// Any call involving a secondary alternate, e.g., `1/2`.
pub const MULTI_ALLELIC: u8 = 9;
pub const MISSING_DIPLOID: u8 = 10;
pub const MISSING_HAPLOID: u8 = 11;
/// One allele called, e.g., `./1`.
pub const PARTIAL_MISSING: u8 = 12;
/// Unparsable or placeholder genotype.
pub const UNKNOWN: u8 = 13;
/// The parent is not part of the pedigree.
pub const NO_PARENT: u8 = 14;

/// Number of distinct codes.
pub const NUM_CODES: usize = 16;

/// Encode a genotype string.
pub fn encode(gt: &str) -> u8 {
    let phased = is_phased(gt);
    let alleles = genotype_alleles(gt);
    let missing = alleles.iter().filter(|a| **a == ".").count();
    if alleles.iter().any(|a| *a != "." && a.parse::<u32>().is_err()) {
        return UNKNOWN;
    }
    if missing > 0 {
        return match (alleles.len(), missing) {
            (1, _) => MISSING_HAPLOID,
            (2, 2) => MISSING_DIPLOID,
            (2, 1) => PARTIAL_MISSING,
            _ => UNKNOWN,
        };
    }
    match alleles.as_slice() {
        ["0"] => HAPLOID_REF,
        ["1"] => HAPLOID_ALT,
        [_] => MULTI_ALLELIC,
        ["0", "0"] => {
            if phased {
                HOM_REF_PHASED
            } else {
                HOM_REF_UNPHASED
            }
        }
        ["0", "1"] => {
            if phased {
                HET_REF_01_PHASED
            } else {
                HET_REF_UNPHASED
            }
        }
        ["1", "0"] => {
            if phased {
                HET_REF_10_PHASED
            } else {
                HET_REF_UNPHASED
            }
        }
        ["1", "1"] => {
            if phased {
                HOM_ALT_PHASED
            } else {
                HOM_ALT_UNPHASED
            }
        }
        [_, _] => MULTI_ALLELIC,
        _ => UNKNOWN,
    }
}

/// Codes that denote the same call irrespective of phasing.
fn equivalents(code: u8) -> &'static [u8] {
    match code {
        HOM_REF_UNPHASED | HOM_REF_PHASED => &[HOM_REF_UNPHASED, HOM_REF_PHASED],
        HET_REF_UNPHASED | HET_REF_01_PHASED | HET_REF_10_PHASED => {
            &[HET_REF_UNPHASED, HET_REF_01_PHASED, HET_REF_10_PHASED]
        }
        HOM_ALT_UNPHASED | HOM_ALT_PHASED => &[HOM_ALT_UNPHASED, HOM_ALT_PHASED],
        HAPLOID_REF => &[HAPLOID_REF],
        HAPLOID_ALT => &[HAPLOID_ALT],
        MULTI_ALLELIC => &[MULTI_ALLELIC],
        MISSING_DIPLOID => &[MISSING_DIPLOID],
        MISSING_HAPLOID => &[MISSING_HAPLOID],
        PARTIAL_MISSING => &[PARTIAL_MISSING],
        UNKNOWN => &[UNKNOWN],
        NO_PARENT => &[NO_PARENT],
        _ => &[],
    }
}

/// Combine father and mother codes into the parents-index byte.
pub fn parents_value(father: u8, mother: u8) -> u8 {
    ((father & 0x0f) << 4) | (mother & 0x0f)
}

pub fn father_code(parents: u8) -> u8 {
    parents >> 4
}

pub fn mother_code(parents: u8) -> u8 {
    parents & 0x0f
}

/// Accept table over the 16 genotype codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenotypeCodeFilter {
    accept: [bool; NUM_CODES],
}

impl GenotypeCodeFilter {
    /// Accept the given genotypes, ignoring phase.
    pub fn from_genotypes<S: AsRef<str>>(genotypes: &[S]) -> Self {
        let mut accept = [false; NUM_CODES];
        for gt in genotypes {
            for code in equivalents(encode(gt.as_ref())) {
                accept[*code as usize] = true;
            }
        }
        Self { accept }
    }

    pub fn test(&self, code: u8) -> bool {
        self.accept.get(code as usize).copied().unwrap_or(false)
    }
}
