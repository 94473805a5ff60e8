//! Typed variant queries and their translation into MongoDB filter documents.
//!
//! Queries arrive as a flat key/value map, e.g., from the command line.  Values use `,`
//! for OR and `;` for AND, e.g., `genotype=5:0/1,1/1;7:0/1`.  Unknown keys are
//! rejected so that no filter is silently dropped.

use indexmap::IndexMap;
use itertools::Itertools;
use mongodb::bson::{doc, Bson, Document};

use super::document::{
    chunk_ids, ChunkSizes, ALTERNATE, ANNOTATION, AT, CHROMOSOME, CHUNK_IDS, COHORT_ID,
    DEFAULT_COHORT, FILES, FILE_ID, GENOTYPES, IDS, MAF, MGF, MISSING_ALLELES,
    MISSING_GENOTYPES, NUM_GT, REFERENCE, START, STATS, STUDIES, STUDY_ID, TYPE,
};
use super::range::{parse_unkeyed, KeyedRange, RangeFilter};
use crate::conf::StorageConfig;
use crate::variant::annotation::parse_so_accession;
use crate::variant::{Region, VariantType};

pub const PARAM_REGION: &str = "region";
pub const PARAM_GENE: &str = "gene";
pub const PARAM_CHROMOSOME: &str = "chromosome";
pub const PARAM_TYPE: &str = "type";
pub const PARAM_REFERENCE: &str = "reference";
pub const PARAM_ALTERNATE: &str = "alternate";
pub const PARAM_ID: &str = "id";
pub const PARAM_ANNOT_EXISTS: &str = "annot-exists";
pub const PARAM_ANNOT_XREF: &str = "annot-xref";
pub const PARAM_ANNOT_CT: &str = "annot-ct";
pub const PARAM_ANNOT_BIOTYPE: &str = "annot-biotype";
pub const PARAM_POLYPHEN: &str = "polyphen";
pub const PARAM_SIFT: &str = "sift";
pub const PARAM_PROTEIN_SUBSTITUTION: &str = "protein_substitution";
pub const PARAM_CONSERVED_REGION: &str = "conserved_region";
pub const PARAM_ALTERNATE_FREQUENCY: &str = "alternate_frequency";
pub const PARAM_REFERENCE_FREQUENCY: &str = "reference_frequency";
pub const PARAM_MAF: &str = "maf";
pub const PARAM_MGF: &str = "mgf";
pub const PARAM_MISSING_ALLELES: &str = "missingAlleles";
pub const PARAM_MISSING_GENOTYPES: &str = "missingGenotypes";
pub const PARAM_NUM_GT: &str = "numgt";
pub const PARAM_STUDIES: &str = "studies";
pub const PARAM_FILES: &str = "files";
pub const PARAM_GENOTYPE: &str = "genotype";
pub const PARAM_LIMIT: &str = "limit";
pub const PARAM_SKIP: &str = "skip";
pub const PARAM_SORT: &str = "sort";
pub const PARAM_INCLUDE: &str = "include";
pub const PARAM_EXCLUDE: &str = "exclude";

/// All accepted parameter keys.
pub const QUERY_PARAMS: &[&str] = &[
    PARAM_REGION,
    PARAM_GENE,
    PARAM_CHROMOSOME,
    PARAM_TYPE,
    PARAM_REFERENCE,
    PARAM_ALTERNATE,
    PARAM_ID,
    PARAM_ANNOT_EXISTS,
    PARAM_ANNOT_XREF,
    PARAM_ANNOT_CT,
    PARAM_ANNOT_BIOTYPE,
    PARAM_POLYPHEN,
    PARAM_SIFT,
    PARAM_PROTEIN_SUBSTITUTION,
    PARAM_CONSERVED_REGION,
    PARAM_ALTERNATE_FREQUENCY,
    PARAM_REFERENCE_FREQUENCY,
    PARAM_MAF,
    PARAM_MGF,
    PARAM_MISSING_ALLELES,
    PARAM_MISSING_GENOTYPES,
    PARAM_NUM_GT,
    PARAM_STUDIES,
    PARAM_FILES,
    PARAM_GENOTYPE,
    PARAM_LIMIT,
    PARAM_SKIP,
    PARAM_SORT,
    PARAM_INCLUDE,
    PARAM_EXCLUDE,
];

/// Regions spanning more chunks than this are filtered by coordinates only.
pub const MAX_CHUNK_IDS: usize = 1_000;

/// Error type for query parsing and translation.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown query parameter {0:?}")]
    UnknownParam(String),
    #[error("invalid value {value:?} for query parameter {key:?}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

fn invalid(key: &str, value: &str, reason: impl ToString) -> Error {
    Error::InvalidValue {
        key: key.to_owned(),
        value: value.to_owned(),
        reason: reason.to_string(),
    }
}

/// Conjunction of disjunctions.
pub type Cnf<T> = Vec<Vec<T>>;

fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_cnf(value: &str) -> Vec<Vec<&str>> {
    value
        .split(';')
        .map(split_list)
        .filter(|group| !group.is_empty())
        .collect()
}

fn parse_cnf<T, F>(key: &str, value: &str, parse: F) -> Result<Cnf<T>, Error>
where
    F: Fn(&str) -> Result<T, Error>,
{
    split_cnf(value)
        .into_iter()
        .map(|group| group.into_iter().map(&parse).collect::<Result<Vec<T>, Error>>())
        .collect::<Result<Cnf<T>, Error>>()
        .and_then(|cnf| {
            if cnf.is_empty() {
                Err(invalid(key, value, "empty filter"))
            } else {
                Ok(cnf)
            }
        })
}

/// Population frequency filter, e.g., `1kG_phase3:ALL<0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct PopulationRange {
    pub study: String,
    pub population: String,
    pub filter: RangeFilter,
}

/// Per-cohort stats filter, e.g., `ALL<0.01` or, for genotype counts, `ALL:0/1>5`.
#[derive(Debug, Clone, PartialEq)]
pub struct CohortRange {
    pub cohort: String,
    /// Genotype, only for genotype count filters.
    pub genotype: Option<String>,
    pub filter: RangeFilter,
}

/// Genotypes one sample must have one of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeFilter {
    pub sample_id: u32,
    pub genotypes: Vec<String>,
}

/// Paging, sorting and projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    /// Field paths, descending with a `-` prefix.
    pub sort: Vec<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl QueryOptions {
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }
        let mut result = Document::new();
        for field in &self.sort {
            match field.strip_prefix('-') {
                Some(field) => result.insert(field, -1),
                None => result.insert(field.as_str(), 1),
            };
        }
        Some(result)
    }

    pub fn projection(&self) -> Option<Document> {
        let mut result = Document::new();
        for field in &self.include {
            result.insert(field.as_str(), 1);
        }
        for field in &self.exclude {
            result.insert(field.as_str(), 0);
        }
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }
}

/// A parsed variant query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantQuery {
    pub regions: Vec<Region>,
    pub genes: Vec<String>,
    pub chromosomes: Vec<String>,
    pub types: Vec<VariantType>,
    pub reference: Option<String>,
    pub alternate: Option<String>,
    pub ids: Vec<String>,
    pub annotation_exists: Option<bool>,
    pub xrefs: Vec<String>,
    /// SO accessions or terms.
    pub consequence_types: Vec<String>,
    pub biotypes: Vec<String>,
    pub polyphen: Cnf<RangeFilter>,
    pub sift: Cnf<RangeFilter>,
    pub protein_substitution: Cnf<KeyedRange>,
    pub conserved_region: Cnf<KeyedRange>,
    pub alternate_frequency: Cnf<PopulationRange>,
    pub reference_frequency: Cnf<PopulationRange>,
    pub maf: Cnf<CohortRange>,
    pub mgf: Cnf<CohortRange>,
    pub missing_alleles: Cnf<CohortRange>,
    pub missing_genotypes: Cnf<CohortRange>,
    pub num_gt: Cnf<CohortRange>,
    pub studies: Vec<u32>,
    pub files: Vec<String>,
    pub genotypes: Vec<GenotypeFilter>,
    pub options: QueryOptions,
}

fn keyed(key: &str, s: &str) -> Result<KeyedRange, Error> {
    s.parse::<KeyedRange>().map_err(|e| invalid(key, s, e))
}

fn keyed_required(key: &str, s: &str) -> Result<KeyedRange, Error> {
    let range = keyed(key, s)?;
    range.require_key().map_err(|e| invalid(key, s, e))?;
    Ok(range)
}

fn population_range(key: &str, s: &str) -> Result<PopulationRange, Error> {
    let range = keyed_required(key, s)?;
    let (study, population) = range
        .require_key()
        .map_err(|e| invalid(key, s, e))?
        .split_once(':')
        .ok_or_else(|| invalid(key, s, "expected <study>:<population><op><value>"))?;
    Ok(PopulationRange {
        study: study.to_owned(),
        population: population.to_owned(),
        filter: range.filter,
    })
}

fn cohort_range(key: &str, s: &str) -> Result<CohortRange, Error> {
    let range = keyed(key, s)?;
    Ok(CohortRange {
        cohort: range.key.unwrap_or_else(|| DEFAULT_COHORT.to_owned()),
        genotype: None,
        filter: range.filter,
    })
}

fn genotype_count_range(key: &str, s: &str) -> Result<CohortRange, Error> {
    let range = keyed_required(key, s)?;
    let range_key = range.require_key().map_err(|e| invalid(key, s, e))?;
    let (cohort, genotype) = match range_key.split_once(':') {
        Some((cohort, genotype)) => (cohort.to_owned(), genotype.to_owned()),
        None => (DEFAULT_COHORT.to_owned(), range_key.to_owned()),
    };
    Ok(CohortRange {
        cohort,
        genotype: Some(genotype),
        filter: range.filter,
    })
}

fn genotype_filters(key: &str, value: &str) -> Result<Vec<GenotypeFilter>, Error> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|sample| {
            let (sample_id, gts) = sample
                .split_once(':')
                .ok_or_else(|| invalid(key, value, "expected <sample>:<gt>[,<gt>...]"))?;
            let sample_id = sample_id
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid(key, value, e))?;
            let genotypes = split_list(gts)
                .into_iter()
                .map(str::to_owned)
                .collect::<Vec<_>>();
            if genotypes.is_empty() {
                return Err(invalid(key, value, "no genotype given"));
            }
            Ok(GenotypeFilter {
                sample_id,
                genotypes,
            })
        })
        .collect()
}

fn owned_list(value: &str) -> Vec<String> {
    split_list(value).into_iter().map(str::to_owned).collect()
}

impl VariantQuery {
    /// Parse from key/value parameters; empty values are ignored.
    pub fn from_params<K, V>(params: impl IntoIterator<Item = (K, V)>) -> Result<Self, Error>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = VariantQuery::default();
        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            if !QUERY_PARAMS.contains(&key) {
                return Err(Error::UnknownParam(key.to_owned()));
            }
            if value.is_empty() {
                continue;
            }
            query.set(key, value)?;
        }
        if !query.options.include.is_empty() && !query.options.exclude.is_empty() {
            return Err(invalid(
                PARAM_INCLUDE,
                &query.options.include.join(","),
                "cannot be combined with exclude",
            ));
        }
        Ok(query)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        match key {
            PARAM_REGION => {
                self.regions = split_list(value)
                    .into_iter()
                    .map(|r| r.parse::<Region>().map_err(|e| invalid(key, value, e)))
                    .collect::<Result<_, _>>()?
            }
            PARAM_GENE => self.genes = owned_list(value),
            PARAM_CHROMOSOME => self.chromosomes = owned_list(value),
            PARAM_TYPE => {
                self.types = split_list(value)
                    .into_iter()
                    .map(|t| VariantType::from_name(t).map_err(|e| invalid(key, value, e)))
                    .collect::<Result<_, _>>()?
            }
            PARAM_REFERENCE => self.reference = Some(value.to_owned()),
            PARAM_ALTERNATE => self.alternate = Some(value.to_owned()),
            PARAM_ID => self.ids = owned_list(value),
            PARAM_ANNOT_EXISTS => {
                self.annotation_exists =
                    Some(value.parse::<bool>().map_err(|e| invalid(key, value, e))?)
            }
            PARAM_ANNOT_XREF => self.xrefs = owned_list(value),
            PARAM_ANNOT_CT => self.consequence_types = owned_list(value),
            PARAM_ANNOT_BIOTYPE => self.biotypes = owned_list(value),
            PARAM_POLYPHEN => {
                self.polyphen =
                    parse_cnf(key, value, |s| parse_unkeyed(s).map_err(|e| invalid(key, s, e)))?
            }
            PARAM_SIFT => {
                self.sift =
                    parse_cnf(key, value, |s| parse_unkeyed(s).map_err(|e| invalid(key, s, e)))?
            }
            PARAM_PROTEIN_SUBSTITUTION => {
                self.protein_substitution = parse_cnf(key, value, |s| keyed_required(key, s))?
            }
            PARAM_CONSERVED_REGION => {
                self.conserved_region = parse_cnf(key, value, |s| keyed_required(key, s))?
            }
            PARAM_ALTERNATE_FREQUENCY => {
                self.alternate_frequency = parse_cnf(key, value, |s| population_range(key, s))?
            }
            PARAM_REFERENCE_FREQUENCY => {
                self.reference_frequency = parse_cnf(key, value, |s| population_range(key, s))?
            }
            PARAM_MAF => self.maf = parse_cnf(key, value, |s| cohort_range(key, s))?,
            PARAM_MGF => self.mgf = parse_cnf(key, value, |s| cohort_range(key, s))?,
            PARAM_MISSING_ALLELES => {
                self.missing_alleles = parse_cnf(key, value, |s| cohort_range(key, s))?
            }
            PARAM_MISSING_GENOTYPES => {
                self.missing_genotypes = parse_cnf(key, value, |s| cohort_range(key, s))?
            }
            PARAM_NUM_GT => {
                self.num_gt = parse_cnf(key, value, |s| genotype_count_range(key, s))?
            }
            PARAM_STUDIES => {
                self.studies = split_list(value)
                    .into_iter()
                    .map(|s| s.parse::<u32>().map_err(|e| invalid(key, value, e)))
                    .collect::<Result<_, _>>()?
            }
            PARAM_FILES => self.files = owned_list(value),
            PARAM_GENOTYPE => self.genotypes = genotype_filters(key, value)?,
            PARAM_LIMIT => {
                self.options.limit = Some(value.parse().map_err(|e| invalid(key, value, e))?)
            }
            PARAM_SKIP => {
                self.options.skip = Some(value.parse().map_err(|e| invalid(key, value, e))?)
            }
            PARAM_SORT => self.options.sort = owned_list(value),
            PARAM_INCLUDE => self.options.include = owned_list(value),
            PARAM_EXCLUDE => self.options.exclude = owned_list(value),
            _ => return Err(Error::UnknownParam(key.to_owned())),
        }
        Ok(())
    }

    /// Translate into a filter document; an empty query yields an empty document.
    pub fn to_filter(&self, config: &StorageConfig) -> Result<Document, Error> {
        let chunk_sizes = ChunkSizes::from(&config.mongo);
        let mut conditions = Vec::new();

        if !self.regions.is_empty() {
            conditions.push(any_of(
                self.regions
                    .iter()
                    .map(|region| region_condition(region, chunk_sizes))
                    .collect(),
            ));
        }
        if !self.genes.is_empty() {
            conditions.push(any_of(vec![
                doc! { ct_path("gene_name"): { "$in": self.genes.clone() } },
                doc! { ct_path("ensembl_gene_id"): { "$in": self.genes.clone() } },
            ]));
        }
        if !self.chromosomes.is_empty() {
            conditions.push(doc! { CHROMOSOME: { "$in": self.chromosomes.clone() } });
        }
        if !self.types.is_empty() {
            let types = self.types.iter().map(|t| t.to_string()).collect::<Vec<_>>();
            conditions.push(doc! { TYPE: { "$in": types } });
        }
        if let Some(reference) = &self.reference {
            conditions.push(doc! { REFERENCE: reference.as_str() });
        }
        if let Some(alternate) = &self.alternate {
            conditions.push(doc! { ALTERNATE: alternate.as_str() });
        }
        if !self.ids.is_empty() {
            conditions.push(doc! { IDS: { "$in": self.ids.clone() } });
        }
        if let Some(exists) = self.annotation_exists {
            conditions.push(doc! { ANNOTATION: { "$exists": exists } });
        }
        if !self.xrefs.is_empty() {
            conditions.push(doc! { annotation_path(&["xrefs", "id"]): { "$in": self.xrefs.clone() } });
        }
        if !self.consequence_types.is_empty() {
            conditions.push(consequence_type_condition(&self.consequence_types));
        }
        if !self.biotypes.is_empty() {
            conditions.push(doc! { ct_path("biotype"): { "$in": self.biotypes.clone() } });
        }
        conditions.extend(cnf_conditions(&self.polyphen, |f| {
            protein_score_condition("polyphen", f)
        }));
        conditions.extend(cnf_conditions(&self.sift, |f| protein_score_condition("sift", f)));
        conditions.extend(cnf_conditions(&self.protein_substitution, |r| {
            protein_score_condition(r.key.as_deref().unwrap_or_default(), &r.filter)
        }));
        conditions.extend(cnf_conditions(&self.conserved_region, |r| {
            doc! {
                annotation_path(&["conservation"]): { "$elemMatch": {
                    "source": r.key.as_deref().unwrap_or_default(),
                    "score": r.filter.to_condition(),
                }}
            }
        }));
        conditions.extend(cnf_conditions(&self.alternate_frequency, |r| {
            population_condition(r, "alt_allele_freq")
        }));
        conditions.extend(cnf_conditions(&self.reference_frequency, |r| {
            population_condition(r, "ref_allele_freq")
        }));
        conditions.extend(cnf_conditions(&self.maf, |r| stats_condition(r, MAF)));
        conditions.extend(cnf_conditions(&self.mgf, |r| stats_condition(r, MGF)));
        conditions.extend(cnf_conditions(&self.missing_alleles, |r| {
            stats_condition(r, MISSING_ALLELES)
        }));
        conditions.extend(cnf_conditions(&self.missing_genotypes, |r| {
            stats_condition(r, MISSING_GENOTYPES)
        }));
        conditions.extend(cnf_conditions(&self.num_gt, |r| {
            let field = format!("{}.{}", NUM_GT, r.genotype.as_deref().unwrap_or_default());
            stats_condition(r, &field)
        }));

        let mut study_conditions = Vec::new();
        if !self.studies.is_empty() {
            let ids = self.studies.iter().map(|s| *s as i64).collect::<Vec<_>>();
            study_conditions.push(doc! { STUDY_ID: { "$in": ids } });
        }
        if !self.files.is_empty() {
            study_conditions.push(doc! { format!("{}.{}", FILES, FILE_ID): { "$in": self.files.clone() } });
        }
        for filter in &self.genotypes {
            let mut alternatives = Vec::new();
            for gt in &filter.genotypes {
                if gt == &config.default_genotype {
                    return Err(invalid(
                        PARAM_GENOTYPE,
                        gt,
                        "the default genotype is not stored and cannot be queried",
                    ));
                }
                alternatives.push(doc! { format!("{}.{}", GENOTYPES, gt): filter.sample_id as i64 });
            }
            study_conditions.push(any_of(alternatives));
        }
        if !study_conditions.is_empty() {
            conditions.push(doc! { STUDIES: { "$elemMatch": all_of(study_conditions) } });
        }

        Ok(all_of(conditions))
    }
}

fn annotation_path(parts: &[&str]) -> String {
    std::iter::once(ANNOTATION)
        .chain(parts.iter().copied())
        .join(".")
}

fn ct_path(field: &str) -> String {
    annotation_path(&["consequence_types", field])
}

fn all_of(mut conditions: Vec<Document>) -> Document {
    match conditions.len() {
        0 => Document::new(),
        1 => conditions.remove(0),
        _ => doc! { "$and": conditions },
    }
}

fn any_of(mut conditions: Vec<Document>) -> Document {
    match conditions.len() {
        1 => conditions.remove(0),
        _ => doc! { "$or": conditions },
    }
}

fn cnf_conditions<T, F>(cnf: &Cnf<T>, condition: F) -> Vec<Document>
where
    F: Fn(&T) -> Document,
{
    cnf.iter()
        .map(|group| any_of(group.iter().map(&condition).collect()))
        .collect()
}

fn region_condition(region: &Region, chunk_sizes: ChunkSizes) -> Document {
    let mut conditions = vec![doc! { CHROMOSOME: region.chromosome.as_str() }];
    if region.end != i32::MAX {
        let span = region.end as i64 - region.start as i64 + 1;
        let chunk_size = if span <= chunk_sizes.big as i64 {
            chunk_sizes.small
        } else {
            chunk_sizes.big
        };
        let ids = chunk_ids(&region.chromosome, region.start, region.end, chunk_size);
        if ids.len() <= MAX_CHUNK_IDS {
            conditions.push(doc! { format!("{}.{}", AT, CHUNK_IDS): { "$in": ids } });
        }
        conditions.push(doc! { START: { "$gte": region.start, "$lte": region.end } });
    }
    all_of(conditions)
}

fn consequence_type_condition(consequence_types: &[String]) -> Document {
    let mut accessions = Vec::new();
    let mut terms = Vec::new();
    for ct in consequence_types {
        match parse_so_accession(ct) {
            Some(accession) => accessions.push(Bson::Int64(accession as i64)),
            None => terms.push(Bson::String(ct.clone())),
        }
    }
    let mut alternatives = Vec::new();
    if !accessions.is_empty() {
        alternatives.push(doc! { ct_path("so_accessions"): { "$in": accessions } });
    }
    if !terms.is_empty() {
        alternatives.push(doc! { ct_path("so_terms"): { "$in": terms } });
    }
    any_of(alternatives)
}

fn protein_score_condition(source: &str, filter: &RangeFilter) -> Document {
    // Text filters apply to the prediction, numeric ones to the score.
    let field = match filter {
        RangeFilter::Compare(..) => "score",
        RangeFilter::Like(_) => "description",
    };
    doc! {
        ct_path("protein_substitution_scores"): { "$elemMatch": {
            "source": source,
            field: filter.to_condition(),
        }}
    }
}

fn population_condition(range: &PopulationRange, field: &str) -> Document {
    doc! {
        annotation_path(&["population_frequencies"]): { "$elemMatch": {
            "study": range.study.as_str(),
            "population": range.population.as_str(),
            field: range.filter.to_condition(),
        }}
    }
}

fn stats_condition(range: &CohortRange, field: &str) -> Document {
    doc! {
        STATS: { "$elemMatch": {
            COHORT_ID: range.cohort.as_str(),
            field: range.filter.to_condition(),
        }}
    }
}

/// Parse `key=value` command line parameters, keeping their order.
pub fn parse_params(params: &[String]) -> Result<IndexMap<String, String>, Error> {
    params
        .iter()
        .map(|param| {
            param
                .split_once('=')
                .map(|(key, value)| (key.trim().to_owned(), value.to_owned()))
                .ok_or_else(|| Error::InvalidValue {
                    key: param.clone(),
                    value: String::new(),
                    reason: "expected <key>=<value>".into(),
                })
        })
        .collect()
}
