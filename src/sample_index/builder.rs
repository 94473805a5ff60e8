//! Build sample-index entries from study variants.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::common::genotype_alleles;
use crate::variant::{cmp_intra_chromosome, Variant};

use super::annotation_index::{count_bits, create_annotation_index_value};
use super::codec::{self, EncodeError};
use super::entry::{self, MendelianRecord, SampleIndexEntry, SampleIndexGtEntry};
use super::file_index::{create_file_index_value, DP};
use super::genotype_code::{self, parents_value, NO_PARENT};
use super::mendelian;
use super::schema::{batch_start, RowKey};

/// Error type for building entries.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Entry(#[from] entry::Error),
    #[error("variant {0} has a negative start")]
    NegativeStart(String),
    #[error("duplicate sample id {0}")]
    DuplicateSampleId(u32),
}

/// One indexed sample with its parents in the same study.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IndexedSample {
    /// Sample name as used in `SampleEntry::sample_id`.
    pub name: String,
    /// Numeric id used in the row key.
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub father: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mother: Option<String>,
}

/// Samples of the study to index.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SampleIndexStudy {
    pub study_id: String,
    pub samples: Vec<IndexedSample>,
}

impl SampleIndexStudy {
    pub fn sample(&self, name: &str) -> Option<&IndexedSample> {
        self.samples.iter().find(|s| s.name == name)
    }
}

/// Whether `gt` carries at least one alternate allele; only those calls are indexed.
pub fn is_indexed_genotype(gt: &str) -> bool {
    genotype_alleles(gt)
        .iter()
        .any(|a| a.parse::<u32>().map(|a| a > 0).unwrap_or(false))
}

/// One indexed call before encoding.
struct Call<'a> {
    variant: &'a Variant,
    file_index: u8,
    annotation_index: u8,
    parents_index: u8,
    mendelian: u8,
}

/// Converts variants of one study into sample-index entries.
#[derive(Debug, Clone)]
pub struct SampleIndexBuilder {
    study: SampleIndexStudy,
    batch_size: u32,
}

impl SampleIndexBuilder {
    pub fn new(study: SampleIndexStudy, batch_size: u32) -> Result<Self, Error> {
        let mut ids = study.samples.iter().map(|s| s.id).collect::<Vec<_>>();
        ids.sort_unstable();
        if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(Error::DuplicateSampleId(w[0]));
        }
        Ok(Self {
            study,
            batch_size: batch_size.max(1),
        })
    }

    /// Build all entries; `variants` need not be sorted.
    pub fn build(&self, variants: &[Variant]) -> Result<Vec<SampleIndexEntry>, Error> {
        let mut sorted = variants.iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| cmp_intra_chromosome(a, b));

        let per_sample = self
            .study
            .samples
            .par_iter()
            .map(|sample| self.build_sample(sample, &sorted))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(per_sample.into_iter().flatten().collect())
    }

    fn parent_genotype<'v>(&self, variant: &'v Variant, parent: &Option<String>) -> Option<&'v str> {
        let parent = parent.as_deref()?;
        variant.study(&self.study.study_id)?.sample_genotype(parent)
    }

    fn parents_index(&self, variant: &Variant, sample: &IndexedSample) -> u8 {
        let code = |parent: &Option<String>| match parent {
            None => NO_PARENT,
            Some(_) => self
                .parent_genotype(variant, parent)
                .map(genotype_code::encode)
                .unwrap_or(genotype_code::UNKNOWN),
        };
        parents_value(code(&sample.father), code(&sample.mother))
    }

    fn build_sample(
        &self,
        sample: &IndexedSample,
        variants: &[&Variant],
    ) -> Result<Vec<SampleIndexEntry>, Error> {
        let has_parents = sample.father.is_some() || sample.mother.is_some();
        let no_attributes = IndexMap::new();
        let mut rows: BTreeMap<RowKey, BTreeMap<String, Vec<Call<'_>>>> = BTreeMap::new();
        for &variant in variants {
            let study = if let Some(study) = variant.study(&self.study.study_id) {
                study
            } else {
                continue;
            };
            let gt = match study.sample_genotype(&sample.name) {
                Some(gt) if is_indexed_genotype(gt) => gt,
                _ => continue,
            };
            let position = u32::try_from(variant.start)
                .map_err(|_| Error::NegativeStart(variant.to_string()))?;

            let attributes = study.files.first().map(|f| &f.attributes).unwrap_or(&no_attributes);
            let call = Call {
                variant,
                file_index: create_file_index_value(
                    variant.variant_type,
                    attributes,
                    study.sample_data(&sample.name, DP),
                ),
                annotation_index: create_annotation_index_value(variant.annotation.as_ref()),
                parents_index: self.parents_index(variant, sample),
                mendelian: if has_parents {
                    mendelian::compute(
                        self.parent_genotype(variant, &sample.father),
                        self.parent_genotype(variant, &sample.mother),
                        gt,
                        &variant.chromosome,
                    )
                } else {
                    0
                },
            };

            let key = RowKey::new(
                sample.id,
                &variant.chromosome,
                batch_start(position, self.batch_size),
            );
            rows.entry(key)
                .or_default()
                .entry(gt.to_owned())
                .or_default()
                .push(call);
        }

        let mut result = Vec::with_capacity(rows.len());
        for (key, gts) in rows {
            result.push(Self::build_entry(key, gts, has_parents)?);
        }
        tracing::debug!(
            "built {} rows for sample {} ({})",
            result.len(),
            sample.name,
            sample.id
        );
        Ok(result)
    }

    fn build_entry(
        key: RowKey,
        gts: BTreeMap<String, Vec<Call<'_>>>,
        has_parents: bool,
    ) -> Result<SampleIndexEntry, Error> {
        let mut entry = SampleIndexEntry::new(key);
        let mut records = Vec::new();
        for (gt, calls) in gts {
            let variants = calls
                .iter()
                .map(|c| Variant {
                    chromosome: c.variant.chromosome.clone(),
                    start: c.variant.start,
                    end: c.variant.end,
                    reference: c.variant.reference.clone(),
                    alternate: c.variant.alternate.clone(),
                    variant_type: c.variant.variant_type,
                    ..Default::default()
                })
                .collect::<Vec<_>>();
            let annotation_index = calls.iter().map(|c| c.annotation_index).collect::<Vec<_>>();
            for (index, call) in calls.iter().enumerate() {
                if call.mendelian != 0 {
                    records.push((
                        call.variant,
                        MendelianRecord::new(call.mendelian, gt.clone(), index as u32),
                    ));
                }
            }
            let gt_entry = SampleIndexGtEntry {
                gt: gt.clone(),
                count: calls.len() as u32,
                variants: codec::to_bytes(&variants)?,
                file_index: Some(calls.iter().map(|c| c.file_index).collect()),
                annotation_counts: Some(count_bits(&annotation_index)),
                annotation_index: Some(annotation_index),
                parents_index: has_parents.then(|| calls.iter().map(|c| c.parents_index).collect()),
            };
            entry.gts.insert(gt, gt_entry);
        }

        if !records.is_empty() {
            records.sort_by(|(a, _), (b, _)| cmp_intra_chromosome(a, b));
            let records = records.into_iter().map(|(_, r)| r).collect::<Vec<_>>();
            entry.set_mendelian_records(&records)?;
        }
        Ok(entry)
    }
}
