//! Reconstruction of dense per-sample data from sparse rows.

use std::collections::HashMap;

use crate::common::HOM_REF;
use crate::conf::ConsistencyPolicy;
use crate::variant::{AlternateCoordinate, SampleEntry, StudyEntry, Variant, VariantType};

use super::{SecondaryAlternateRow, StudyConfig, StudyRow, VariantRow, OTHER_GENOTYPE};

/// FILTER value of samples without exception.
pub const PASS: &str = "PASS";

/// Error type for row conversion.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no configuration for study {0}")]
    MissingStudyConfig(u32),
    #[error("variant {0} has no studies")]
    EmptyStudies(String),
    #[error("variant {variant} in study {study}: expected {expected} {what} samples, found {found}")]
    Inconsistent {
        variant: String,
        study: String,
        what: &'static str,
        expected: u32,
        found: u32,
    },
}

/// Positions of the returned samples of one study.
#[derive(Debug, Clone)]
struct SamplePositions {
    names: Vec<String>,
    by_id: HashMap<u32, usize>,
    /// Whether all indexed samples are returned, so the recorded counts apply.
    complete: bool,
}

impl SamplePositions {
    fn new(config: &StudyConfig, returned: Option<&[String]>) -> Self {
        let names = match returned {
            Some(returned) => returned
                .iter()
                .filter(|name| {
                    let known = config.indexed_samples.contains_key(name.as_str());
                    if !known {
                        tracing::debug!("sample {} is not indexed in {}", name, &config.name);
                    }
                    known
                })
                .cloned()
                .collect::<Vec<_>>(),
            None => config.indexed_samples.keys().cloned().collect(),
        };
        let by_id = names
            .iter()
            .enumerate()
            .filter_map(|(pos, name)| config.indexed_samples.get(name).map(|id| (*id, pos)))
            .collect::<HashMap<_, _>>();
        let complete = by_id.len() == config.indexed_samples.len();
        Self {
            names,
            by_id,
            complete,
        }
    }
}

/// Converts `VariantRow`s into `Variant`s with one entry per returned sample.
///
/// The sample positions are cached per study; `set_study_config()` and
/// `set_returned_samples()` invalidate the affected cache entries.
#[derive(Debug, Clone)]
pub struct RowToVariantConverter {
    studies: HashMap<u32, StudyConfig>,
    policy: ConsistencyPolicy,
    default_genotype: String,
    returned_samples: Option<Vec<String>>,
    positions: HashMap<u32, SamplePositions>,
}

impl RowToVariantConverter {
    pub fn new(studies: Vec<StudyConfig>, policy: ConsistencyPolicy) -> Self {
        Self {
            studies: studies.into_iter().map(|s| (s.study_id, s)).collect(),
            policy,
            default_genotype: HOM_REF.to_owned(),
            returned_samples: None,
            positions: HashMap::new(),
        }
    }

    /// Override the genotype used for gap filling.
    pub fn with_default_genotype(mut self, default_genotype: &str) -> Self {
        self.default_genotype = default_genotype.to_owned();
        self
    }

    /// Restrict the output to the given samples, in the given order.
    pub fn set_returned_samples(&mut self, returned_samples: Option<Vec<String>>) {
        self.returned_samples = returned_samples;
        self.positions.clear();
    }

    /// Add or replace a study configuration.
    pub fn set_study_config(&mut self, config: StudyConfig) {
        self.invalidate(config.study_id);
        self.studies.insert(config.study_id, config);
    }

    /// Drop the cached sample positions of the study.
    pub fn invalidate(&mut self, study_id: u32) {
        self.positions.remove(&study_id);
    }

    fn check_count(
        &self,
        variant: &Variant,
        config: &StudyConfig,
        what: &'static str,
        expected: u32,
        found: u32,
    ) -> Result<(), Error> {
        if expected == found {
            return Ok(());
        }
        let err = Error::Inconsistent {
            variant: variant.to_string(),
            study: config.name.clone(),
            what,
            expected,
            found,
        };
        match self.policy {
            ConsistencyPolicy::Warn => {
                tracing::warn!("{}", err);
                Ok(())
            }
            ConsistencyPolicy::Fail => Err(err),
        }
    }

    /// Convert one row.
    pub fn convert(&mut self, row: &VariantRow) -> Result<Variant, Error> {
        let mut variant = Variant::new(&row.chromosome, row.start, &row.reference, &row.alternate);
        for study_row in &row.studies {
            let study = self.convert_study(&variant, study_row)?;
            variant.studies.push(study);
        }
        if variant.studies.is_empty() {
            return Err(Error::EmptyStudies(variant.to_string()));
        }
        Ok(variant)
    }

    fn convert_study(&mut self, variant: &Variant, row: &StudyRow) -> Result<StudyEntry, Error> {
        let config = self
            .studies
            .get(&row.study_id)
            .ok_or(Error::MissingStudyConfig(row.study_id))?;
        if !self.positions.contains_key(&row.study_id) {
            let positions = SamplePositions::new(config, self.returned_samples.as_deref());
            self.positions.insert(row.study_id, positions);
        }
        let positions = &self.positions[&row.study_id];

        let mut genotypes: Vec<Option<&str>> = vec![None; positions.names.len()];
        for (gt, sample_ids) in &row.genotypes {
            if gt == OTHER_GENOTYPE {
                continue;
            }
            for sample_id in sample_ids {
                if let Some(pos) = positions.by_id.get(sample_id) {
                    genotypes[*pos] = Some(gt.as_str());
                }
            }
        }
        for (sample_id, gt) in &row.complex_genotypes {
            if let Some(pos) = positions.by_id.get(sample_id) {
                genotypes[*pos] = Some(gt.as_str());
            }
        }
        let gap_filled = genotypes.iter().filter(|gt| gt.is_none()).count() as u32;

        let mut filters: Vec<Option<&str>> = vec![None; positions.names.len()];
        for (sample_id, filter) in &row.filter_exceptions {
            if let Some(pos) = positions.by_id.get(sample_id) {
                filters[*pos] = Some(filter.as_str());
            }
        }
        let pass_filled = filters.iter().filter(|f| f.is_none()).count() as u32;

        if positions.complete {
            self.check_count(variant, config, "hom-ref", row.hom_ref_count, gap_filled)?;
            self.check_count(variant, config, "PASS", row.pass_count, pass_filled)?;
        }

        let samples = positions
            .names
            .iter()
            .zip(genotypes.iter().zip(filters.iter()))
            .map(|(name, (gt, filter))| SampleEntry {
                sample_id: name.clone(),
                data: vec![
                    gt.unwrap_or(self.default_genotype.as_str()).to_owned(),
                    filter.unwrap_or(PASS).to_owned(),
                ],
            })
            .collect();

        Ok(StudyEntry {
            study_id: config.name.clone(),
            format: vec!["GT".into(), "FT".into()],
            samples,
            files: row.files.clone(),
            secondary_alternates: row
                .secondary_alternates
                .iter()
                .map(|alt| secondary_alternate(variant, alt))
                .collect(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Build the coordinate, defaulting absent fields to the primary variant.
fn secondary_alternate(variant: &Variant, alt: &SecondaryAlternateRow) -> AlternateCoordinate {
    let reference = non_empty(&alt.reference).unwrap_or(&variant.reference);
    let alternate = non_empty(&alt.alternate).unwrap_or(&variant.alternate);
    AlternateCoordinate {
        chromosome: non_empty(&alt.chromosome)
            .unwrap_or(&variant.chromosome)
            .to_owned(),
        start: alt.start.unwrap_or(variant.start),
        end: alt.end.unwrap_or(variant.end),
        reference: reference.to_owned(),
        alternate: alternate.to_owned(),
        variant_type: alt
            .variant_type
            .unwrap_or_else(|| VariantType::infer(reference, alternate)),
    }
}
