//! Variant annotation as attached after loading.

use serde::{Deserialize, Serialize};

/// Score from a protein substitution predictor (PolyPhen, SIFT).
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct Score {
    /// Predictor name, e.g., `polyphen`.
    pub source: String,
    pub score: f64,
    /// Textual prediction, e.g., `probably damaging`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Effect of the variant on one transcript.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct ConsequenceType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensembl_gene_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensembl_transcript_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biotype: Option<String>,
    /// Sequence ontology terms, e.g., `missense_variant`.
    #[serde(default)]
    pub so_terms: Vec<String>,
    /// Sequence ontology accessions, e.g., `1583` for `SO:0001583`.
    #[serde(default)]
    pub so_accessions: Vec<u32>,
    #[serde(default)]
    pub protein_substitution_scores: Vec<Score>,
}

/// Cross reference to an external database.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Default)]
pub struct Xref {
    pub id: String,
    pub source: String,
}

/// Allele frequencies in one population of one study.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct PopulationFrequency {
    /// Project, e.g., `1kG_phase3` or `GNOMAD_GENOMES`.
    pub study: String,
    /// Population, e.g., `ALL`.
    pub population: String,
    pub ref_allele_freq: f64,
    pub alt_allele_freq: f64,
}

/// Annotation of one variant.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone, Default)]
pub struct VariantAnnotation {
    #[serde(default)]
    pub consequence_types: Vec<ConsequenceType>,
    #[serde(default)]
    pub xrefs: Vec<Xref>,
    #[serde(default)]
    pub population_frequencies: Vec<PopulationFrequency>,
    /// Conservation scores, e.g., `phylop`, `gerp`.
    #[serde(default)]
    pub conservation: Vec<Score>,
    /// Functional scores, e.g., `cadd_scaled`.
    #[serde(default)]
    pub functional_scores: Vec<Score>,
    /// Whether any clinical significance is known.
    #[serde(default)]
    pub clinical: bool,
}

/// SO accession of `intergenic_variant`.
pub const SO_INTERGENIC: u32 = 1628;
/// SO accession of `missense_variant`.
pub const SO_MISSENSE: u32 = 1583;
/// SO accessions treated as loss-of-function.
pub const SO_LOSS_OF_FUNCTION: &[u32] = &[
    1893, // transcript_ablation
    1574, // splice_acceptor_variant
    1575, // splice_donor_variant
    1587, // stop_gained
    1589, // frameshift_variant
    1578, // stop_lost
    2012, // start_lost
];

/// Parse `SO:0001583` or `1583` into the accession number.
pub fn parse_so_accession(s: &str) -> Option<u32> {
    s.strip_prefix("SO:").unwrap_or(s).parse().ok()
}

impl VariantAnnotation {
    /// All SO accessions over all consequence types.
    pub fn so_accessions(&self) -> impl Iterator<Item = u32> + '_ {
        self.consequence_types
            .iter()
            .flat_map(|ct| ct.so_accessions.iter().copied())
    }

    /// All scores of the given protein substitution predictor.
    pub fn protein_scores<'a>(&'a self, source: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.consequence_types
            .iter()
            .flat_map(|ct| ct.protein_substitution_scores.iter())
            .filter(move |s| s.source.eq_ignore_ascii_case(source))
            .map(|s| s.score)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_so_accession_smoke() {
        assert_eq!(parse_so_accession("SO:0001583"), Some(SO_MISSENSE));
        assert_eq!(parse_so_accession("1628"), Some(SO_INTERGENIC));
        assert_eq!(parse_so_accession("missense_variant"), None);
    }

    #[test]
    fn protein_scores_by_source() {
        let annotation = VariantAnnotation {
            consequence_types: vec![ConsequenceType {
                protein_substitution_scores: vec![
                    Score {
                        source: "polyphen".into(),
                        score: 0.9,
                        description: None,
                    },
                    Score {
                        source: "sift".into(),
                        score: 0.01,
                        description: None,
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            annotation.protein_scores("PolyPhen").collect::<Vec<_>>(),
            vec![0.9]
        );
    }
}
