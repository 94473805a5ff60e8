//! Query descriptor for filtering the sample index of one sample.

use std::collections::BTreeSet;

use crate::variant::{Region, Variant, VariantType};

use super::file_index::FileIndexFilter;
use super::genotype_code::{self, GenotypeCodeFilter};

/// Immutable description of one single-sample index query.
///
/// Construct with `SingleSampleIndexQueryBuilder`; all fields default to "no filter".
#[derive(Debug, Clone, Default, PartialEq, derive_builder::Builder)]
#[builder(default)]
pub struct SingleSampleIndexQuery {
    /// Numeric id of the sample.
    sample_id: u32,
    /// Genotypes to return; empty for all indexed genotypes.
    #[builder(setter(into))]
    genotypes: Vec<String>,
    /// Bits that must all be set in the annotation-index byte.
    annotation_mask: u8,
    /// Mask and value for the file-index byte.
    file_filter: FileIndexFilter,
    #[builder(setter(strip_option))]
    father_filter: Option<GenotypeCodeFilter>,
    #[builder(setter(strip_option))]
    mother_filter: Option<GenotypeCodeFilter>,
    /// Regions of which the variant start must fall into at least one; empty for all.
    #[builder(setter(into))]
    regions: Vec<Region>,
    #[builder(setter(strip_option))]
    variant_types: Option<BTreeSet<VariantType>>,
    /// Return only variants carrying a Mendelian error code.
    mendelian_error: bool,
    /// Among the Mendelian errors, return only de novo events.
    only_de_novo: bool,
}

impl SingleSampleIndexQuery {
    pub fn sample_id(&self) -> u32 {
        self.sample_id
    }

    pub fn genotypes(&self) -> &[String] {
        &self.genotypes
    }

    pub fn annotation_mask(&self) -> u8 {
        self.annotation_mask
    }

    pub fn file_filter(&self) -> FileIndexFilter {
        self.file_filter
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn variant_types(&self) -> Option<&BTreeSet<VariantType>> {
        self.variant_types.as_ref()
    }

    /// Whether the Mendelian error stream drives the scan.
    pub fn mendelian_mode(&self) -> bool {
        self.mendelian_error || self.only_de_novo
    }

    pub fn only_de_novo(&self) -> bool {
        self.only_de_novo
    }

    /// Whether variants of genotype `gt` are requested.
    pub fn selects_genotype(&self, gt: &str) -> bool {
        self.genotypes.is_empty() || self.genotypes.iter().any(|g| g == gt)
    }

    pub fn has_parents_filter(&self) -> bool {
        self.father_filter.is_some() || self.mother_filter.is_some()
    }

    /// Test the parents-index byte against the father and mother filters.
    pub fn parents_pass(&self, parents: u8) -> bool {
        let father_ok = self
            .father_filter
            .map(|f| f.test(genotype_code::father_code(parents)))
            .unwrap_or(true);
        let mother_ok = self
            .mother_filter
            .map(|f| f.test(genotype_code::mother_code(parents)))
            .unwrap_or(true);
        father_ok && mother_ok
    }

    /// Whether some filter needs the materialized variant.
    pub fn needs_variant(&self) -> bool {
        !self.regions.is_empty() || self.variant_types.is_some()
    }

    /// Region containment and type membership of a materialized variant.
    pub fn variant_pass(&self, variant: &Variant) -> bool {
        let region_ok = self.regions.is_empty()
            || self
                .regions
                .iter()
                .any(|r| r.contains(&variant.chromosome, variant.start));
        let type_ok = self
            .variant_types
            .as_ref()
            .map(|types| types.contains(&variant.variant_type))
            .unwrap_or(true);
        region_ok && type_ok
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sample_index::genotype_code::{parents_value, HET_REF_UNPHASED, HOM_REF_UNPHASED};
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_accept_everything() -> Result<(), anyhow::Error> {
        let query = SingleSampleIndexQueryBuilder::default().sample_id(3).build()?;
        assert_eq!(query.sample_id(), 3);
        assert!(query.selects_genotype("0/1"));
        assert!(query.parents_pass(0xff));
        assert!(!query.needs_variant());
        assert!(!query.mendelian_mode());
        assert!(query.variant_pass(&"1:100:A:T".parse()?));
        Ok(())
    }

    #[test]
    fn filters_apply() -> Result<(), anyhow::Error> {
        let query = SingleSampleIndexQueryBuilder::default()
            .genotypes(vec!["1/1".to_string()])
            .father_filter(GenotypeCodeFilter::from_genotypes(&["0/0"]))
            .regions(vec!["1:50-150".parse::<Region>()?])
            .variant_types(BTreeSet::from([VariantType::Snv]))
            .only_de_novo(true)
            .build()?;
        assert!(!query.selects_genotype("0/1"));
        assert!(query.selects_genotype("1/1"));
        assert!(query.parents_pass(parents_value(HOM_REF_UNPHASED, HET_REF_UNPHASED)));
        assert!(!query.parents_pass(parents_value(HET_REF_UNPHASED, HOM_REF_UNPHASED)));
        assert!(query.needs_variant());
        assert!(query.mendelian_mode());
        assert!(query.variant_pass(&"1:100:A:T".parse()?));
        assert!(!query.variant_pass(&"1:200:A:T".parse()?));
        assert!(!query.variant_pass(&"1:100:A:TT".parse()?));
        Ok(())
    }
}
