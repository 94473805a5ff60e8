//! Row key and column layout of the sample index.
//!
//! One row holds all variants of one sample in one batch of a chromosome.  Row keys are
//! `sample_id (u32 BE) ++ chromosome ++ 0x00 ++ batch_start (u32 BE)`; they sort by sample,
//! chromosome name and batch start.  Column qualifiers per genotype `<gt>` are:
//!
//! * `<gt>_GT` - packed variants, see `codec`
//! * `<gt>_CT` - number of variants, u32 BE
//! * `<gt>_FI` - file-index bytes, one per variant
//! * `<gt>_AN` - annotation-index bytes, one per variant
//! * `<gt>_AC` - per-bit counts of the annotation-index bytes, 8 x u32 BE
//! * `<gt>_PA` - parents-index bytes, one per variant
//!
//! The Mendelian error stream is stored in the `_ME` column of the row.

use byteorder::{BigEndian, ByteOrder};

pub const GT_SUFFIX: &str = "_GT";
pub const COUNT_SUFFIX: &str = "_CT";
pub const FILE_INDEX_SUFFIX: &str = "_FI";
pub const ANNOTATION_INDEX_SUFFIX: &str = "_AN";
pub const ANNOTATION_COUNTS_SUFFIX: &str = "_AC";
pub const PARENTS_INDEX_SUFFIX: &str = "_PA";
pub const MENDELIAN_COLUMN: &str = "_ME";

/// Default number of base pairs covered by one row.
pub const DEFAULT_BATCH_SIZE: u32 = 1_000_000;

/// Error type for row keys and columns.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("row key is too short ({0} bytes)")]
    RowKeyTooShort(usize),
    #[error("row key lacks the chromosome terminator")]
    RowKeyUnterminated,
    #[error("chromosome in row key is not valid UTF-8")]
    RowKeyInvalidUtf8,
    #[error("chromosome must not contain NUL bytes: {0:?}")]
    InvalidChromosome(String),
    #[error("unknown column qualifier {0:?}")]
    UnknownColumn(String),
}

/// Decoded row key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub sample_id: u32,
    pub chromosome: String,
    pub batch_start: u32,
}

impl RowKey {
    pub fn new(sample_id: u32, chromosome: &str, batch_start: u32) -> Self {
        Self {
            sample_id,
            chromosome: chromosome.to_owned(),
            batch_start,
        }
    }

    /// Row key for the batch containing `position`.
    pub fn for_position(sample_id: u32, chromosome: &str, position: u32, batch_size: u32) -> Self {
        Self::new(sample_id, chromosome, batch_start(position, batch_size))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        if self.chromosome.as_bytes().contains(&0) {
            return Err(Error::InvalidChromosome(self.chromosome.clone()));
        }
        let mut buf = Vec::with_capacity(9 + self.chromosome.len());
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, self.sample_id);
        buf.extend_from_slice(&tmp);
        buf.extend_from_slice(self.chromosome.as_bytes());
        buf.push(0);
        BigEndian::write_u32(&mut tmp, self.batch_start);
        buf.extend_from_slice(&tmp);
        Ok(buf)
    }

    /// Parse a row key from the beginning of `buf`; returns the key and its length.
    pub fn from_prefix(buf: &[u8]) -> Result<(Self, usize), Error> {
        if buf.len() < 9 {
            return Err(Error::RowKeyTooShort(buf.len()));
        }
        let sample_id = BigEndian::read_u32(&buf[0..4]);
        let nul = buf[4..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(Error::RowKeyUnterminated)?
            + 4;
        let chromosome =
            std::str::from_utf8(&buf[4..nul]).map_err(|_| Error::RowKeyInvalidUtf8)?;
        let end = nul + 5;
        if buf.len() < end {
            return Err(Error::RowKeyTooShort(buf.len()));
        }
        let batch_start = BigEndian::read_u32(&buf[nul + 1..end]);
        Ok((Self::new(sample_id, chromosome, batch_start), end))
    }

    /// Prefix shared by all rows of the sample on the chromosome.
    pub fn chromosome_prefix(sample_id: u32, chromosome: &str) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + chromosome.len());
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, sample_id);
        buf.extend_from_slice(&tmp);
        buf.extend_from_slice(chromosome.as_bytes());
        buf.push(0);
        buf
    }
}

/// Start of the batch containing the 1-based `position`.
pub fn batch_start(position: u32, batch_size: u32) -> u32 {
    position - position % batch_size.max(1)
}

/// Kind of a per-genotype column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtColumn {
    Variants,
    Count,
    FileIndex,
    AnnotationIndex,
    AnnotationCounts,
    ParentsIndex,
}

impl GtColumn {
    fn suffix(&self) -> &'static str {
        match self {
            GtColumn::Variants => GT_SUFFIX,
            GtColumn::Count => COUNT_SUFFIX,
            GtColumn::FileIndex => FILE_INDEX_SUFFIX,
            GtColumn::AnnotationIndex => ANNOTATION_INDEX_SUFFIX,
            GtColumn::AnnotationCounts => ANNOTATION_COUNTS_SUFFIX,
            GtColumn::ParentsIndex => PARENTS_INDEX_SUFFIX,
        }
    }

    const ALL: [GtColumn; 6] = [
        GtColumn::Variants,
        GtColumn::Count,
        GtColumn::FileIndex,
        GtColumn::AnnotationIndex,
        GtColumn::AnnotationCounts,
        GtColumn::ParentsIndex,
    ];
}

/// Qualifier of the column for `gt`.
pub fn gt_column(gt: &str, column: GtColumn) -> String {
    format!("{}{}", gt, column.suffix())
}

/// Decoded column qualifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Qualifier {
    Gt(String, GtColumn),
    Mendelian,
}

/// Parse a column qualifier.
pub fn parse_qualifier(qualifier: &str) -> Result<Qualifier, Error> {
    if qualifier == MENDELIAN_COLUMN {
        return Ok(Qualifier::Mendelian);
    }
    for column in GtColumn::ALL {
        if let Some(gt) = qualifier.strip_suffix(column.suffix()) {
            if !gt.is_empty() {
                return Ok(Qualifier::Gt(gt.to_owned(), column));
            }
        }
    }
    Err(Error::UnknownColumn(qualifier.to_owned()))
}

/// Encode a 4-byte big-endian count.
pub fn count_to_bytes(count: u32) -> Vec<u8> {
    count.to_be_bytes().to_vec()
}

/// Decode a 4-byte big-endian count.
pub fn count_from_bytes(buf: &[u8]) -> Option<u32> {
    (buf.len() == 4).then(|| BigEndian::read_u32(buf))
}
