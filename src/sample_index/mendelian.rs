//! Mendelian error codes of trios.
//!
//! Codes follow the PLINK Mendel error scheme with allele `A` being the alternate and
//! `B` being the reference allele:
//!
//! ```text
//! code  father, mother -> child
//!    1  AA, AA -> AB
//!    2  BB, BB -> AB
//!    3  BB, ** -> AA
//!    4  **, BB -> AA
//!    5  BB, BB -> AA
//!    6  AA, ** -> BB
//!    7  **, AA -> BB
//!    8  AA, AA -> BB
//!    9  **, AA -> B   (chrX, haploid child)
//!   10  **, BB -> A   (chrX, haploid child)
//!   11  AA, ** -> B   (chrY, haploid child)
//!   12  BB, ** -> A   (chrY, haploid child)
//! ```
//!
//! Code `0` means no Mendelian error.

use crate::common::{chrom_rank, genotype_alleles};

/// Number of distinct codes.
pub const NUM_CODES: usize = 13;

/// Codes where the child carries an alternate allele both parents lack.
pub const DE_NOVO: [bool; NUM_CODES] = [
    false, false, true, true, true, true, false, false, false, false, true, false, true,
];

/// Whether `code` denotes a de novo event; out-of-range codes never do.
pub fn is_de_novo(code: u8) -> bool {
    DE_NOVO.get(code as usize).copied().unwrap_or(false)
}

/// Allelic state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Call {
    /// `BB`, also haploid `B` for parents.
    HomRef,
    /// `AB`
    Het,
    /// `AA`, also haploid `A` for parents; secondary alternates count as `A`.
    HomAlt,
    HaploidRef,
    HaploidAlt,
    Missing,
}

fn classify(gt: Option<&str>) -> Call {
    let gt = if let Some(gt) = gt { gt } else { return Call::Missing };
    let alleles = genotype_alleles(gt)
        .iter()
        .map(|a| a.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>();
    match alleles.as_deref() {
        Some([0]) => Call::HaploidRef,
        Some([_]) => Call::HaploidAlt,
        Some([0, 0]) => Call::HomRef,
        Some([0, _]) | Some([_, 0]) => Call::Het,
        Some([_, _]) => Call::HomAlt,
        _ => Call::Missing,
    }
}

fn is_ref(call: Call) -> bool {
    matches!(call, Call::HomRef | Call::HaploidRef)
}

fn is_alt(call: Call) -> bool {
    matches!(call, Call::HomAlt | Call::HaploidAlt)
}

/// Compute the Mendelian error code of a trio on `chromosome`.
///
/// Missing parents are passed as `None` and match `**` only.
pub fn compute(father: Option<&str>, mother: Option<&str>, child: &str, chromosome: &str) -> u8 {
    let (f, m, c) = (classify(father), classify(mother), classify(Some(child)));
    let rank = chrom_rank(chromosome);
    let is_x = rank == Some(22);
    let is_y = rank == Some(23);

    match c {
        Call::Het if !is_y => {
            if is_alt(f) && is_alt(m) {
                1
            } else if is_ref(f) && is_ref(m) {
                2
            } else {
                0
            }
        }
        Call::HomAlt if !is_y => {
            if is_ref(f) && is_ref(m) {
                5
            } else if is_ref(f) {
                3
            } else if is_ref(m) {
                4
            } else {
                0
            }
        }
        Call::HomRef if !is_y => {
            if is_alt(f) && is_alt(m) {
                8
            } else if is_alt(f) {
                6
            } else if is_alt(m) {
                7
            } else {
                0
            }
        }
        Call::HaploidRef if is_x && is_alt(m) => 9,
        Call::HaploidAlt if is_x && is_ref(m) => 10,
        Call::HaploidRef if is_y && is_alt(f) => 11,
        Call::HaploidAlt if is_y && is_ref(f) => 12,
        _ => 0,
    }
}
