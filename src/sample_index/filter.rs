//! Filtering of sample-index entries with minimal decoding.
//!
//! Each candidate is first tested against the parallel index bytes (annotation, file,
//! parents) and only materialized when all of them pass.  Region and type are tested on
//! the materialized variant.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::variant::{cmp_intra_chromosome, ByPosition, Variant};

use super::annotation_index;
use super::codec::{DecodeError, PackedVariantCursor, VariantCursor};
use super::entry::{SampleIndexEntry, SampleIndexGtEntry};
use super::genotype_code::{parents_value, NO_PARENT};
use super::mendelian;
use super::query::SingleSampleIndexQuery;
use super::schema::MENDELIAN_COLUMN;

/// Applies one `SingleSampleIndexQuery` to sample-index entries.
#[derive(Debug, Clone, Copy)]
pub struct SampleIndexEntryFilter<'a> {
    query: &'a SingleSampleIndexQuery,
}

/// Result of testing the index bytes of one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    /// Annotation byte failed; does not count against the expected results.
    RejectedByAnnotation,
    /// Annotation byte passed but file or parents byte failed.
    Rejected,
    Accepted,
}

impl<'a> SampleIndexEntryFilter<'a> {
    pub fn new(query: &'a SingleSampleIndexQuery) -> Self {
        Self { query }
    }

    /// Upper bound of annotation matches in `gt_entry` derived from the per-bit counts.
    ///
    /// `None` if unbounded, i.e., no mask or no counts.
    fn expected_results_from_annotation(&self, gt_entry: &SampleIndexGtEntry) -> Option<u32> {
        let mask = self.query.annotation_mask();
        let counts = gt_entry.annotation_counts.as_ref()?;
        (0..annotation_index::NUM_BITS)
            .filter(|bit| mask & (1 << bit) != 0)
            .map(|bit| counts[bit])
            .min()
    }

    fn test_bytes(&self, gt_entry: &SampleIndexGtEntry, index: usize) -> Candidate {
        let mask = self.query.annotation_mask();
        if mask != 0 {
            let byte = gt_entry.annotation_index_at(index).unwrap_or(0);
            if !annotation_index::passes(byte, mask) {
                return Candidate::RejectedByAnnotation;
            }
        }
        let file_filter = self.query.file_filter();
        if !file_filter.is_empty() && !file_filter.passes(gt_entry.file_index_at(index).unwrap_or(0))
        {
            return Candidate::Rejected;
        }
        if self.query.has_parents_filter() {
            let parents = gt_entry
                .parents_index_at(index)
                .unwrap_or_else(|| parents_value(NO_PARENT, NO_PARENT));
            if !self.query.parents_pass(parents) {
                return Candidate::Rejected;
            }
        }
        Candidate::Accepted
    }

    /// Scan one genotype group and hand each match to `sink`; the variant is only passed
    /// when `materialize` is set.
    fn scan_gt<F>(
        &self,
        gt_entry: &SampleIndexGtEntry,
        materialize: bool,
        mut sink: F,
    ) -> Result<(), DecodeError>
    where
        F: FnMut(Option<Variant>),
    {
        let mut cursor = gt_entry.cursor()?;
        let mut remaining = self.expected_results_from_annotation(gt_entry);
        while cursor.has_next() {
            if remaining == Some(0) {
                return Ok(());
            }
            let index = cursor.next_index();
            match self.test_bytes(gt_entry, index) {
                Candidate::RejectedByAnnotation => {
                    cursor.skip()?;
                    continue;
                }
                Candidate::Rejected => {
                    remaining = remaining.map(|r| r - 1);
                    cursor.skip()?;
                    continue;
                }
                Candidate::Accepted => {
                    remaining = remaining.map(|r| r - 1);
                }
            }
            if materialize {
                let variant = cursor.next()?;
                if self.query.variant_pass(&variant) {
                    sink(Some(variant));
                }
            } else {
                cursor.skip()?;
                sink(None);
            }
        }
        check_exhausted(&cursor, gt_entry)
    }

    /// Return the matching variants of `entry` in canonical order.
    pub fn filter(&self, entry: &SampleIndexEntry) -> Result<Vec<Variant>, DecodeError> {
        if self.query.mendelian_mode() {
            return Ok(self
                .filter_mendelian(entry)?
                .into_iter()
                .map(|v| v.0)
                .collect());
        }

        // Each genotype group is sorted already.
        let mut groups = Vec::new();
        for (gt, gt_entry) in &entry.gts {
            if !self.query.selects_genotype(gt) {
                continue;
            }
            let mut group = Vec::new();
            self.scan_gt(gt_entry, true, |variant| group.extend(variant))?;
            groups.push(group);
        }
        let result = groups
            .into_iter()
            .kmerge_by(|lhs, rhs| cmp_intra_chromosome(lhs, rhs) == Ordering::Less)
            .collect::<Vec<_>>();
        tracing::trace!(
            "sample {} row {}:{} yields {} variants",
            entry.key.sample_id,
            entry.key.chromosome,
            entry.key.batch_start,
            result.len()
        );
        Ok(result)
    }

    /// Count the matching variants; materializes only if region or type filters are set.
    pub fn filter_count(&self, entry: &SampleIndexEntry) -> Result<usize, DecodeError> {
        if self.query.mendelian_mode() {
            return Ok(self.filter_mendelian(entry)?.len());
        }

        let materialize = self.query.needs_variant();
        let mut count = 0;
        for (gt, gt_entry) in &entry.gts {
            if self.query.selects_genotype(gt) {
                self.scan_gt(gt_entry, materialize, |variant| {
                    if !materialize || variant.is_some() {
                        count += 1;
                    }
                })?;
            }
        }
        Ok(count)
    }

    /// Drive the scan by the Mendelian error stream of the entry.
    fn filter_mendelian(&self, entry: &SampleIndexEntry) -> Result<BTreeSet<ByPosition>, DecodeError> {
        let mut cursors: BTreeMap<&str, PackedVariantCursor<'_>> = BTreeMap::new();
        let mut result = BTreeSet::new();
        for record in entry.mendelian_records()? {
            if record.code == 0 || !self.query.selects_genotype(&record.gt) {
                continue;
            }
            if self.query.only_de_novo() && !mendelian::is_de_novo(record.code) {
                continue;
            }
            let (gt, gt_entry) = entry
                .gts
                .get_key_value(&record.gt)
                .ok_or_else(|| DecodeError::MalformedColumn(record.gt.clone()))?;
            let index = record.index as usize;
            if self.test_bytes(gt_entry, index) != Candidate::Accepted {
                continue;
            }
            let cursor = match cursors.entry(gt.as_str()) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(gt_entry.cursor()?),
            };
            if cursor.next_index() > index {
                return Err(DecodeError::MalformedColumn(MENDELIAN_COLUMN.to_owned()));
            }
            while cursor.next_index() < index {
                cursor.skip()?;
            }
            let variant = cursor.next()?;
            if self.query.variant_pass(&variant) {
                result.insert(ByPosition(variant));
            }
        }
        Ok(result)
    }
}

/// A cursor that ran to the end must have visited exactly `count` variants.
fn check_exhausted(
    cursor: &PackedVariantCursor<'_>,
    gt_entry: &SampleIndexGtEntry,
) -> Result<(), DecodeError> {
    if cursor.next_index() != gt_entry.count as usize {
        return Err(DecodeError::LengthMismatch {
            array: "variants",
            len: cursor.next_index(),
            count: gt_entry.count as usize,
        });
    }
    Ok(())
}
