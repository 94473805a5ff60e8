//! In-memory form of one sample-index row.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};

use super::annotation_index::NUM_BITS;
use super::codec::{self, read_varint, write_varint, DecodeError, PackedVariantCursor};
use super::schema::{self, gt_column, parse_qualifier, GtColumn, Qualifier, RowKey};

/// Error type for converting between rows and entries.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] schema::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("genotype {0:?} has index columns but no variants column")]
    MissingVariants(String),
}

/// Variants and parallel index arrays of one genotype in one row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleIndexGtEntry {
    /// The genotype, e.g., `0/1`.
    pub gt: String,
    /// Number of encoded variants.
    pub count: u32,
    /// Packed variants, see `codec`.
    pub variants: Vec<u8>,
    pub file_index: Option<Vec<u8>>,
    pub annotation_index: Option<Vec<u8>>,
    /// Number of variants with each annotation-index bit set.
    pub annotation_counts: Option<[u32; NUM_BITS]>,
    pub parents_index: Option<Vec<u8>>,
}

impl SampleIndexGtEntry {
    /// Open a cursor over the variants after checking the lengths of the index arrays.
    pub fn cursor(&self) -> Result<PackedVariantCursor<'_>, DecodeError> {
        let count = self.count as usize;
        for (array, values) in [
            ("file index", &self.file_index),
            ("annotation index", &self.annotation_index),
            ("parents index", &self.parents_index),
        ] {
            if let Some(values) = values {
                if values.len() != count {
                    return Err(DecodeError::LengthMismatch {
                        array,
                        len: values.len(),
                        count,
                    });
                }
            }
        }
        PackedVariantCursor::new(&self.variants)
    }

    fn byte_at(values: &Option<Vec<u8>>, index: usize) -> Option<u8> {
        values.as_ref().and_then(|v| v.get(index).copied())
    }

    pub fn file_index_at(&self, index: usize) -> Option<u8> {
        Self::byte_at(&self.file_index, index)
    }

    pub fn annotation_index_at(&self, index: usize) -> Option<u8> {
        Self::byte_at(&self.annotation_index, index)
    }

    pub fn parents_index_at(&self, index: usize) -> Option<u8> {
        Self::byte_at(&self.parents_index, index)
    }
}

/// One element of the Mendelian error stream.
#[derive(Debug, Clone, PartialEq, Eq, derive_new::new)]
pub struct MendelianRecord {
    /// Mendelian error code, see `mendelian`.
    pub code: u8,
    /// Genotype group of the variant.
    pub gt: String,
    /// Ordinal of the variant within its genotype group.
    pub index: u32,
}

/// One sample-index row: all genotype groups of one sample in one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleIndexEntry {
    pub key: RowKey,
    /// Genotype groups, keyed by genotype.
    pub gts: BTreeMap<String, SampleIndexGtEntry>,
    /// Encoded Mendelian error stream.
    pub mendelian: Option<Vec<u8>>,
}

impl SampleIndexEntry {
    pub fn new(key: RowKey) -> Self {
        Self {
            key,
            gts: BTreeMap::new(),
            mendelian: None,
        }
    }

    /// Build the entry from the row's `(qualifier, value)` cells.
    pub fn from_columns<I>(key: RowKey, columns: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let mut entry = Self::new(key);
        let mut has_variants = BTreeMap::new();
        let mut has_count = BTreeMap::new();
        for (qualifier, value) in columns {
            let (gt, column) = match parse_qualifier(&qualifier)? {
                Qualifier::Mendelian => {
                    entry.mendelian = Some(value);
                    continue;
                }
                Qualifier::Gt(gt, column) => (gt, column),
            };
            let gt_entry = entry
                .gts
                .entry(gt.clone())
                .or_insert_with(|| SampleIndexGtEntry {
                    gt: gt.clone(),
                    ..Default::default()
                });
            match column {
                GtColumn::Variants => {
                    gt_entry.variants = value;
                    has_variants.insert(gt, true);
                }
                GtColumn::Count => {
                    gt_entry.count = schema::count_from_bytes(&value)
                        .ok_or_else(|| DecodeError::MalformedColumn(qualifier.clone()))?;
                    has_count.insert(gt, true);
                }
                GtColumn::FileIndex => gt_entry.file_index = Some(value),
                GtColumn::AnnotationIndex => gt_entry.annotation_index = Some(value),
                GtColumn::AnnotationCounts => {
                    gt_entry.annotation_counts = Some(
                        counts_from_bytes(&value)
                            .ok_or_else(|| DecodeError::MalformedColumn(qualifier.clone()))?,
                    )
                }
                GtColumn::ParentsIndex => gt_entry.parents_index = Some(value),
            }
        }

        for (gt, gt_entry) in entry.gts.iter_mut() {
            if !has_variants.contains_key(gt) {
                return Err(Error::MissingVariants(gt.clone()));
            }
            if !has_count.contains_key(gt) {
                gt_entry.count = codec::count(&gt_entry.variants)? as u32;
            }
        }

        Ok(entry)
    }

    /// Convert into `(qualifier, value)` cells.
    pub fn to_columns(&self) -> Vec<(String, Vec<u8>)> {
        let mut result = Vec::new();
        for (gt, gt_entry) in &self.gts {
            result.push((
                gt_column(gt, GtColumn::Variants),
                gt_entry.variants.clone(),
            ));
            result.push((
                gt_column(gt, GtColumn::Count),
                schema::count_to_bytes(gt_entry.count),
            ));
            if let Some(file_index) = &gt_entry.file_index {
                result.push((gt_column(gt, GtColumn::FileIndex), file_index.clone()));
            }
            if let Some(annotation_index) = &gt_entry.annotation_index {
                result.push((
                    gt_column(gt, GtColumn::AnnotationIndex),
                    annotation_index.clone(),
                ));
            }
            if let Some(counts) = &gt_entry.annotation_counts {
                result.push((
                    gt_column(gt, GtColumn::AnnotationCounts),
                    counts_to_bytes(counts),
                ));
            }
            if let Some(parents_index) = &gt_entry.parents_index {
                result.push((
                    gt_column(gt, GtColumn::ParentsIndex),
                    parents_index.clone(),
                ));
            }
        }
        if let Some(mendelian) = &self.mendelian {
            result.push((schema::MENDELIAN_COLUMN.to_owned(), mendelian.clone()));
        }
        result
    }

    /// Encode and attach the Mendelian error stream; records must be in genomic order.
    pub fn set_mendelian_records(&mut self, records: &[MendelianRecord]) -> Result<(), Error> {
        let ordinals = self
            .gts
            .keys()
            .enumerate()
            .map(|(i, gt)| (gt.as_str(), i as u64))
            .collect::<BTreeMap<_, _>>();
        let mut buf = Vec::with_capacity(records.len() * 3);
        for record in records {
            let ordinal = ordinals
                .get(record.gt.as_str())
                .ok_or_else(|| Error::MissingVariants(record.gt.clone()))?;
            buf.push(record.code);
            write_varint(&mut buf, *ordinal);
            write_varint(&mut buf, record.index as u64);
        }
        self.mendelian = Some(buf);
        Ok(())
    }

    /// Decode the Mendelian error stream; empty if the row has none.
    pub fn mendelian_records(&self) -> Result<Vec<MendelianRecord>, DecodeError> {
        let buf = if let Some(buf) = &self.mendelian {
            buf
        } else {
            return Ok(Vec::new());
        };
        let gts = self.gts.keys().collect::<Vec<_>>();
        let mut result = Vec::new();
        let mut offset = 0;
        while offset < buf.len() {
            let code = buf[offset];
            offset += 1;
            let ordinal = read_varint(buf, &mut offset)? as usize;
            let index = read_varint(buf, &mut offset)?;
            let gt = gts
                .get(ordinal)
                .ok_or_else(|| DecodeError::MalformedColumn(schema::MENDELIAN_COLUMN.to_owned()))?;
            let index = u32::try_from(index)
                .map_err(|_| DecodeError::MalformedColumn(schema::MENDELIAN_COLUMN.to_owned()))?;
            result.push(MendelianRecord::new(code, (*gt).clone(), index));
        }
        Ok(result)
    }
}

fn counts_to_bytes(counts: &[u32; NUM_BITS]) -> Vec<u8> {
    let mut buf = vec![0u8; 4 * NUM_BITS];
    BigEndian::write_u32_into(counts, &mut buf);
    buf
}

fn counts_from_bytes(buf: &[u8]) -> Option<[u32; NUM_BITS]> {
    if buf.len() != 4 * NUM_BITS {
        return None;
    }
    let mut counts = [0u32; NUM_BITS];
    BigEndian::read_u32_into(buf, &mut counts);
    Some(counts)
}
