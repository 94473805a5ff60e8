//! Loading of variants into the document store.
//!
//! Loading runs in two phases so that concurrent loaders merge instead of overwriting
//! each other.  Phase 1 upserts with `{_id, studies.sid: {$ne: sid}}`, inserting the
//! variant or pushing the new study.  When the study is present already, the upsert
//! collides on `_id` and phase 2 merges genotypes and files into the existing study
//! element with the positional operator.

use std::time::Duration;

use mongodb::bson::{doc, Document};

use super::collection::{StoreError, UpsertOutcome, VariantCollection};
use super::document::{
    self, annotation_document, variant_body, variant_id, ChunkSizes, StudyUpdate,
    VariantStatsRecord, ANNOTATION, FILES, GENOTYPES, ID, STATS, STUDIES, STUDY_ID,
};
use crate::common::UNKNOWN_GENOTYPE;
use crate::conf::StorageConfig;
use crate::variant::Variant;
use crate::variant_row::StudyConfig;

/// Error type for loading.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("document error: {0}")]
    Document(#[from] document::Error),
    #[error("could not merge {variant} after {attempts} attempts")]
    RetriesExhausted { variant: String, attempts: u32 },
    #[error("bulk upsert returned {actual} outcomes for {expected} operations")]
    OutcomeCount { expected: usize, actual: usize },
}

/// What happened to one variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadAction {
    /// New document.
    Inserted,
    /// Study pushed into an existing document.
    StudyAdded,
    /// Merged into an existing study.
    Merged,
}

/// Counts of one load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadSummary {
    pub inserted: usize,
    pub study_added: usize,
    pub merged: usize,
    /// Variants without data for the study.
    pub skipped: usize,
}

impl LoadSummary {
    fn record(&mut self, action: LoadAction) {
        match action {
            LoadAction::Inserted => self.inserted += 1,
            LoadAction::StudyAdded => self.study_added += 1,
            LoadAction::Merged => self.merged += 1,
        }
    }
}

/// Loads the variants of one study.
pub struct VariantLoader<'a, C: VariantCollection + ?Sized> {
    collection: &'a C,
    study: &'a StudyConfig,
    default_genotype: String,
    chunk_sizes: ChunkSizes,
    max_retries: u32,
    backoff: Duration,
}

impl<'a, C: VariantCollection + ?Sized> VariantLoader<'a, C> {
    pub fn new(collection: &'a C, study: &'a StudyConfig, config: &StorageConfig) -> Self {
        Self {
            collection,
            study,
            default_genotype: config.default_genotype.clone(),
            chunk_sizes: ChunkSizes::from(&config.mongo),
            max_retries: config.mongo.phase2_max_retries,
            backoff: Duration::from_millis(config.mongo.phase2_retry_backoff_ms),
        }
    }

    fn study_path(field: &str) -> String {
        format!("{}.{}", STUDIES, field)
    }

    fn phase1_operation(
        &self,
        id: &str,
        variant: &Variant,
        update: &StudyUpdate,
    ) -> (Document, Document) {
        let study_id_path = Self::study_path(STUDY_ID);
        let filter = doc! {
            ID: id,
            study_id_path: { "$ne": self.study.study_id as i64 },
        };
        let update = doc! {
            "$setOnInsert": variant_body(variant, self.chunk_sizes),
            "$push": { STUDIES: update.to_document() },
        };
        (filter, update)
    }

    /// Merge into the matched study, `None` if there is nothing to change.
    ///
    /// Unknown genotypes never override stored calls, so the missing-sample overlay is only
    /// written by phase 1.  Samples with a known call leave the unknown list.
    fn phase2_update(update: &StudyUpdate) -> Option<Document> {
        let mut add = Document::new();
        for (gt, ids) in &update.genotypes {
            if gt != UNKNOWN_GENOTYPE {
                add.insert(
                    format!("{}.$.{}.{}", STUDIES, GENOTYPES, gt),
                    doc! { "$each": ids.clone() },
                );
            }
        }
        if !update.files.is_empty() {
            add.insert(
                format!("{}.$.{}", STUDIES, FILES),
                doc! { "$each": update.files.clone() },
            );
        }
        let mut result = Document::new();
        if !add.is_empty() {
            result.insert("$addToSet", add);
        }
        if !update.known.is_empty() {
            let unknown_path = format!("{}.$.{}.{}", STUDIES, GENOTYPES, UNKNOWN_GENOTYPE);
            result.insert(
                "$pull",
                doc! { unknown_path: { "$in": update.known.clone() } },
            );
        }
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    /// Load `variants`, returning what happened to them.
    pub fn load(&self, variants: &[Variant]) -> Result<LoadSummary, Error> {
        let mut summary = LoadSummary::default();
        let mut operations = Vec::with_capacity(variants.len());
        let mut pending = Vec::with_capacity(variants.len());
        for variant in variants {
            let Some(entry) = variant.study(&self.study.name) else {
                tracing::trace!("{} has no data for study {}", variant, &self.study.name);
                summary.skipped += 1;
                continue;
            };
            let update = StudyUpdate::new(entry, self.study, &self.default_genotype)?;
            let id = variant_id(variant);
            operations.push(self.phase1_operation(&id, variant, &update));
            pending.push((id, variant, update));
        }

        let outcomes = self.collection.bulk_upsert(operations)?;
        if outcomes.len() != pending.len() {
            return Err(Error::OutcomeCount {
                expected: pending.len(),
                actual: outcomes.len(),
            });
        }

        let mut duplicates = Vec::new();
        for (item, outcome) in pending.into_iter().zip(outcomes) {
            match outcome {
                UpsertOutcome::Inserted => summary.record(LoadAction::Inserted),
                UpsertOutcome::Matched => summary.record(LoadAction::StudyAdded),
                UpsertOutcome::DuplicateKey => duplicates.push(item),
            }
        }
        tracing::debug!(
            "phase 1: {} inserted, {} study pushed, {} to merge",
            summary.inserted,
            summary.study_added,
            duplicates.len()
        );

        for (id, variant, update) in &duplicates {
            summary.record(self.merge(id, variant, update)?);
        }
        Ok(summary)
    }

    /// Phase 2 for one variant with bounded retries.
    ///
    /// If the study element is not found, the document changed since phase 1 and phase 1
    /// is repeated for this variant.
    fn merge(&self, id: &str, variant: &Variant, update: &StudyUpdate) -> Result<LoadAction, Error> {
        let Some(phase2) = Self::phase2_update(update) else {
            return Ok(LoadAction::Merged);
        };
        let study_id_path = Self::study_path(STUDY_ID);
        let filter = doc! { ID: id, study_id_path: self.study.study_id as i64 };
        let mut backoff = self.backoff;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            match self.collection.update_one(filter.clone(), phase2.clone()) {
                Ok(0) => {
                    let (phase1_filter, phase1_update) =
                        self.phase1_operation(id, variant, update);
                    match self.collection.upsert(phase1_filter, phase1_update) {
                        Ok(UpsertOutcome::Inserted) => return Ok(LoadAction::Inserted),
                        Ok(UpsertOutcome::Matched) => return Ok(LoadAction::StudyAdded),
                        Ok(UpsertOutcome::DuplicateKey) => {
                            tracing::debug!("{} changed concurrently, retrying merge", id)
                        }
                        Err(e) => tracing::warn!(
                            "repeating phase 1 for {} failed (attempt {}): {}",
                            id,
                            attempt + 1,
                            e
                        ),
                    }
                }
                Ok(_) => return Ok(LoadAction::Merged),
                Err(e) => tracing::warn!(
                    "merge of {} failed (attempt {}): {}",
                    id,
                    attempt + 1,
                    e
                ),
            }
        }
        Err(Error::RetriesExhausted {
            variant: id.to_owned(),
            attempts: self.max_retries + 1,
        })
    }
}

/// Replace the stats of the same study, file, and cohort.
///
/// The bulk of pulls runs before the bulk of pushes; each document is updated atomically
/// but the whole batch is not.  Returns the number of stats records stored.
pub fn update_stats<C: VariantCollection + ?Sized>(
    collection: &C,
    stats: &[VariantStatsRecord],
) -> Result<u64, Error> {
    let pulls = stats
        .iter()
        .map(|record| {
            (
                doc! { ID: record.variant.as_str() },
                doc! { "$pull": { STATS: record.key_document() } },
            )
        })
        .collect();
    collection.bulk_update(pulls)?;
    let pushes = stats
        .iter()
        .map(|record| {
            (
                doc! { ID: record.variant.as_str() },
                doc! { "$push": { STATS: record.to_document() } },
            )
        })
        .collect();
    Ok(collection.bulk_update(pushes)?)
}

/// Set the annotation of all annotated `variants`, returning the number of updated documents.
pub fn update_annotations<C: VariantCollection + ?Sized>(
    collection: &C,
    variants: &[Variant],
) -> Result<u64, Error> {
    let mut operations = Vec::new();
    for variant in variants {
        if let Some(annotation) = annotation_document(variant)? {
            operations.push((
                doc! { ID: variant_id(variant) },
                doc! { "$set": { ANNOTATION: annotation } },
            ));
        }
    }
    if operations.is_empty() {
        return Ok(0);
    }
    Ok(collection.bulk_update(operations)?)
}

/// Counts of a study removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveSummary {
    pub updated: u64,
    pub purged: u64,
}

/// Pull a study and its stats from all documents, optionally deleting emptied documents.
pub fn remove_study<C: VariantCollection + ?Sized>(
    collection: &C,
    study_id: u32,
    purge: bool,
) -> Result<RemoveSummary, Error> {
    let sid = study_id as i64;
    let updated = collection.update_many(
        doc! { format!("{}.{}", STUDIES, STUDY_ID): sid },
        doc! { "$pull": { STUDIES: { STUDY_ID: sid }, STATS: { STUDY_ID: sid } } },
    )?;
    let purged = if purge {
        collection.delete_many(doc! { STUDIES: { "$size": 0 } })?
    } else {
        0
    };
    Ok(RemoveSummary { updated, purged })
}
