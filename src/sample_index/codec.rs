//! Packed encoding of the sorted variants of one sample, genotype, and row.
//!
//! Layout (all integers are LEB128 varints unless noted):
//!
//! ```text
//! version: u8 (= 1)
//! chromosome: len + bytes
//! repeated:
//!   start delta to previous variant (unsigned, first relative to 0)
//!   end - start (zig-zag)
//!   variant type: u8
//!   reference: len + bytes
//!   alternate: len + bytes
//! ```
//!
//! Since the start positions are stored as non-negative deltas, a cursor can advance over
//! a record by reading its lengths only, without building the `Variant`.

use std::cmp::Ordering;

use crate::variant::{cmp_intra_chromosome, Variant, VariantType};

/// Current version of the encoding.
pub const VERSION: u8 = 1;

/// Error type for decoding packed variants.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty buffer")]
    Empty,
    #[error("unsupported encoding version {0}")]
    UnsupportedVersion(u8),
    #[error("truncated varint at offset {0}")]
    TruncatedVarint(usize),
    #[error("varint overflow at offset {0}")]
    VarintOverflow(usize),
    #[error("truncated data at offset {offset}, need {need} bytes")]
    Truncated { offset: usize, need: usize },
    #[error("invalid UTF-8 in allele or chromosome at offset {0}")]
    InvalidUtf8(usize),
    #[error("unknown variant type code {0}")]
    UnknownVariantType(u8),
    #[error("position overflow at offset {0}")]
    PositionOverflow(usize),
    #[error("no more variants to read")]
    Exhausted,
    #[error("{array} has {len} entries but {count} variants are encoded")]
    LengthMismatch {
        array: &'static str,
        len: usize,
        count: usize,
    },
    #[error("column {0} is malformed")]
    MalformedColumn(String),
}

/// Error type for encoding variants.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("variant {index} is on chromosome {found}, expected {expected}")]
    MixedChromosomes {
        index: usize,
        expected: String,
        found: String,
    },
    #[error("variant {0} is not sorted after its predecessor")]
    Unsorted(usize),
    #[error("variant {0} has a negative start position")]
    NegativeStart(usize),
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub(crate) fn read_varint(buf: &[u8], offset: &mut usize) -> Result<u64, DecodeError> {
    let begin = *offset;
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*offset).ok_or(DecodeError::TruncatedVarint(begin))?;
        *offset += 1;
        if shift >= 64 || (shift == 63 && byte > 1) {
            return Err(DecodeError::VarintOverflow(begin));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
}

fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn read_slice<'a>(buf: &'a [u8], offset: &mut usize) -> Result<&'a [u8], DecodeError> {
    let len = read_varint(buf, offset)? as usize;
    let begin = *offset;
    let end = begin
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or(DecodeError::Truncated {
            offset: begin,
            need: len,
        })?;
    *offset = end;
    Ok(&buf[begin..end])
}

fn read_string(buf: &[u8], offset: &mut usize) -> Result<String, DecodeError> {
    let begin = *offset;
    let slice = read_slice(buf, offset)?;
    String::from_utf8(slice.to_vec()).map_err(|_| DecodeError::InvalidUtf8(begin))
}

fn type_code(variant_type: VariantType) -> u8 {
    match variant_type {
        VariantType::Snv => 0,
        VariantType::Snp => 1,
        VariantType::Mnv => 2,
        VariantType::Mnp => 3,
        VariantType::Indel => 4,
        VariantType::Insertion => 5,
        VariantType::Deletion => 6,
        VariantType::Sv => 7,
        VariantType::Cnv => 8,
        VariantType::Symbolic => 9,
        VariantType::NoVariation => 10,
        VariantType::Mixed => 11,
    }
}

fn type_from_code(code: u8) -> Result<VariantType, DecodeError> {
    Ok(match code {
        0 => VariantType::Snv,
        1 => VariantType::Snp,
        2 => VariantType::Mnv,
        3 => VariantType::Mnp,
        4 => VariantType::Indel,
        5 => VariantType::Insertion,
        6 => VariantType::Deletion,
        7 => VariantType::Sv,
        8 => VariantType::Cnv,
        9 => VariantType::Symbolic,
        10 => VariantType::NoVariation,
        11 => VariantType::Mixed,
        _ => return Err(DecodeError::UnknownVariantType(code)),
    })
}

/// Encode the sorted `variants` of one chromosome.
pub fn to_bytes(variants: &[Variant]) -> Result<Vec<u8>, EncodeError> {
    let chromosome = variants.first().map(|v| v.chromosome.as_str()).unwrap_or("");
    let mut buf = Vec::with_capacity(2 + chromosome.len() + variants.len() * 8);
    buf.push(VERSION);
    write_bytes(&mut buf, chromosome.as_bytes());

    let mut prev_start = 0i64;
    for (index, variant) in variants.iter().enumerate() {
        if variant.chromosome != chromosome {
            return Err(EncodeError::MixedChromosomes {
                index,
                expected: chromosome.to_owned(),
                found: variant.chromosome.clone(),
            });
        }
        if variant.start < 0 {
            return Err(EncodeError::NegativeStart(index));
        }
        if index > 0 && cmp_intra_chromosome(&variants[index - 1], variant) == Ordering::Greater {
            return Err(EncodeError::Unsorted(index));
        }

        let start = variant.start as i64;
        write_varint(&mut buf, (start - prev_start) as u64);
        write_varint(&mut buf, zigzag(variant.end as i64 - start));
        buf.push(type_code(variant.variant_type));
        write_bytes(&mut buf, variant.reference.as_bytes());
        write_bytes(&mut buf, variant.alternate.as_bytes());
        prev_start = start;
    }

    Ok(buf)
}

/// Decode all variants.
pub fn from_bytes(buf: &[u8]) -> Result<Vec<Variant>, DecodeError> {
    let mut cursor = PackedVariantCursor::new(buf)?;
    let mut result = Vec::new();
    while cursor.has_next() {
        result.push(cursor.next()?);
    }
    Ok(result)
}

/// Count the encoded variants without materializing them.
pub fn count(buf: &[u8]) -> Result<usize, DecodeError> {
    let mut cursor = PackedVariantCursor::new(buf)?;
    while cursor.has_next() {
        cursor.skip()?;
    }
    Ok(cursor.next_index())
}

/// Forward-only, non-restartable cursor over a sorted sequence of variants.
///
/// Unlike `Iterator`, a cursor can advance past an element without materializing it.
/// Callers test the parallel per-variant index bytes at `next_index()` first and only
/// call `next()` for candidates that pass.
pub trait VariantCursor {
    /// Whether there are more variants.
    fn has_next(&self) -> bool;
    /// Ordinal of the variant that `next()` or `skip()` would consume.
    fn next_index(&self) -> usize;
    /// Advance over the next variant without building it.
    fn skip(&mut self) -> Result<(), DecodeError>;
    /// Build the next variant and advance.
    fn next(&mut self) -> Result<Variant, DecodeError>;
}

/// Cursor over the bytes written by `to_bytes()`.
#[derive(Debug, Clone)]
pub struct PackedVariantCursor<'a> {
    buf: &'a [u8],
    chromosome: String,
    offset: usize,
    index: usize,
    prev_start: i64,
}

impl<'a> PackedVariantCursor<'a> {
    /// Read the header; fails on empty buffers and unknown versions.
    pub fn new(buf: &'a [u8]) -> Result<Self, DecodeError> {
        let version = *buf.first().ok_or(DecodeError::Empty)?;
        if version != VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let mut offset = 1;
        let chromosome = read_string(buf, &mut offset)?;
        Ok(Self {
            buf,
            chromosome,
            offset,
            index: 0,
            prev_start: 0,
        })
    }

    /// The chromosome shared by all variants.
    pub fn chromosome(&self) -> &str {
        &self.chromosome
    }

    /// Read the fixed part of the record; returns `(start, end, type code)`.
    fn read_head(&mut self) -> Result<(i64, i64, u8), DecodeError> {
        if !self.has_next() {
            return Err(DecodeError::Exhausted);
        }
        let begin = self.offset;
        let delta = read_varint(self.buf, &mut self.offset)?;
        let start = i64::try_from(delta)
            .ok()
            .and_then(|d| self.prev_start.checked_add(d))
            .filter(|s| *s <= i32::MAX as i64)
            .ok_or(DecodeError::PositionOverflow(begin))?;
        let end = start
            .checked_add(unzigzag(read_varint(self.buf, &mut self.offset)?))
            .filter(|e| *e >= i32::MIN as i64 && *e <= i32::MAX as i64)
            .ok_or(DecodeError::PositionOverflow(begin))?;
        let code = *self.buf.get(self.offset).ok_or(DecodeError::Truncated {
            offset: self.offset,
            need: 1,
        })?;
        self.offset += 1;
        self.prev_start = start;
        Ok((start, end, code))
    }
}

impl<'a> VariantCursor for PackedVariantCursor<'a> {
    fn has_next(&self) -> bool {
        self.offset < self.buf.len()
    }

    fn next_index(&self) -> usize {
        self.index
    }

    fn skip(&mut self) -> Result<(), DecodeError> {
        let (_, _, code) = self.read_head()?;
        type_from_code(code)?;
        read_slice(self.buf, &mut self.offset)?;
        read_slice(self.buf, &mut self.offset)?;
        self.index += 1;
        Ok(())
    }

    fn next(&mut self) -> Result<Variant, DecodeError> {
        let (start, end, code) = self.read_head()?;
        let variant_type = type_from_code(code)?;
        let reference = read_string(self.buf, &mut self.offset)?;
        let alternate = read_string(self.buf, &mut self.offset)?;
        self.index += 1;
        Ok(Variant {
            chromosome: self.chromosome.clone(),
            start: start as i32,
            end: end as i32,
            reference,
            alternate,
            variant_type,
            ..Default::default()
        })
    }
}
