//! Per-variant annotation-index byte with precomputed annotation predicates.

use crate::variant::annotation::{
    VariantAnnotation, SO_INTERGENIC, SO_LOSS_OF_FUNCTION, SO_MISSENSE,
};

/// Only intergenic consequences.
pub const INTERGENIC_MASK: u8 = 1 << 0;
/// Any loss-of-function consequence.
pub const LOF_MASK: u8 = 1 << 1;
/// Any missense consequence.
pub const MISSENSE_MASK: u8 = 1 << 2;
/// Any transcript with biotype `protein_coding`.
pub const PROTEIN_CODING_MASK: u8 = 1 << 3;
/// All population alternate allele frequencies below 0.001.
pub const POP_FREQ_LT_001_MASK: u8 = 1 << 4;
/// All population alternate allele frequencies below 0.005.
pub const POP_FREQ_LT_005_MASK: u8 = 1 << 5;
/// Clinical significance known.
pub const CLINICAL_MASK: u8 = 1 << 6;

/// Number of bits, also the length of the per-bit count arrays.
pub const NUM_BITS: usize = 8;

/// Compute the annotation-index byte; variants without annotation yield `0`.
pub fn create_annotation_index_value(annotation: Option<&VariantAnnotation>) -> u8 {
    let annotation = if let Some(annotation) = annotation {
        annotation
    } else {
        return 0;
    };

    let mut value = 0u8;
    let mut any_so = false;
    let mut only_intergenic = true;
    for so in annotation.so_accessions() {
        any_so = true;
        if so != SO_INTERGENIC {
            only_intergenic = false;
        }
        if so == SO_MISSENSE {
            value |= MISSENSE_MASK;
        }
        if SO_LOSS_OF_FUNCTION.contains(&so) {
            value |= LOF_MASK;
        }
    }
    if any_so && only_intergenic {
        value |= INTERGENIC_MASK;
    }

    if annotation
        .consequence_types
        .iter()
        .any(|ct| ct.biotype.as_deref() == Some("protein_coding"))
    {
        value |= PROTEIN_CODING_MASK;
    }

    // Variants never seen in a population count as rare.
    let max_alt_freq = annotation
        .population_frequencies
        .iter()
        .map(|pf| pf.alt_allele_freq)
        .fold(0.0f64, f64::max);
    if max_alt_freq < 0.001 {
        value |= POP_FREQ_LT_001_MASK;
    }
    if max_alt_freq < 0.005 {
        value |= POP_FREQ_LT_005_MASK;
    }

    if annotation.clinical {
        value |= CLINICAL_MASK;
    }

    value
}

/// Count, for each bit, the number of bytes that have it set.
pub fn count_bits(values: &[u8]) -> [u32; NUM_BITS] {
    let mut counts = [0u32; NUM_BITS];
    for value in values {
        for (bit, count) in counts.iter_mut().enumerate() {
            if value & (1 << bit) != 0 {
                *count += 1;
            }
        }
    }
    counts
}

/// Whether `byte` has all bits of `mask` set.
pub fn passes(byte: u8, mask: u8) -> bool {
    byte & mask == mask
}
