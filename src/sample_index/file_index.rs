//! Per-variant file-index byte summarizing type and call quality.
//!
//! The byte is derived once when the sample index is built, from the first file of the
//! variant's study entry.  QUAL and DP values read from VCF files are never validated
//! upstream, so malformed values degrade to "not set" instead of failing.

use indexmap::IndexMap;

use crate::variant::VariantType;

/// Set for SNV/SNP variants.
pub const SNV_MASK: u8 = 1 << 0;
/// Set if `FILTER` is `PASS`.
pub const FILTER_PASS_MASK: u8 = 1 << 1;
/// Set if `QUAL > 20`.
pub const QUAL_GT_20_MASK: u8 = 1 << 2;
/// Set if `QUAL > 40`, always together with `QUAL_GT_20_MASK`.
pub const QUAL_GT_40_MASK: u8 = 1 << 3;
/// Set if `DP > 20`.
pub const DP_GT_20_MASK: u8 = 1 << 4;

/// Attribute keys.
pub const FILTER: &str = "FILTER";
pub const QUAL: &str = "QUAL";
pub const DP: &str = "DP";

/// Parse a QUAL value; missing, empty, `.` and unparsable values yield `0`.
pub fn parse_qual(qual: Option<&str>) -> f64 {
    match qual {
        None | Some("") | Some(".") => 0.0,
        Some(s) => s.trim().parse::<f64>().ok().filter(|q| q.is_finite()).unwrap_or(0.0),
    }
}

/// Compute the file-index byte.
///
/// # Arguments
///
/// * `variant_type` - Type of the variant.
/// * `file_attributes` - File attributes holding `FILTER`, `QUAL`, and `INFO/DP`.
/// * `sample_dp` - `FORMAT/DP` of the sample, takes precedence over `INFO/DP`.
pub fn create_file_index_value(
    variant_type: VariantType,
    file_attributes: &IndexMap<String, String>,
    sample_dp: Option<&str>,
) -> u8 {
    let mut value = 0u8;

    if variant_type.is_snv() {
        value |= SNV_MASK;
    }

    if file_attributes.get(FILTER).map(|f| f.as_str()) == Some("PASS") {
        value |= FILTER_PASS_MASK;
    }

    let qual = parse_qual(file_attributes.get(QUAL).map(|q| q.as_str()));
    if qual > 40.0 {
        value |= QUAL_GT_20_MASK | QUAL_GT_40_MASK;
    } else if qual > 20.0 {
        value |= QUAL_GT_20_MASK;
    }

    let dp = sample_dp.or_else(|| file_attributes.get(DP).map(|dp| dp.as_str()));
    if let Some(dp) = dp.and_then(|dp| dp.trim().parse::<i32>().ok()) {
        if dp > 20 {
            value |= DP_GT_20_MASK;
        }
    }

    value
}

/// Mask and expected value for testing file-index bytes.
///
/// A byte passes if `byte & mask == value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FileIndexFilter {
    pub mask: u8,
    pub value: u8,
}

impl FileIndexFilter {
    pub fn new(mask: u8, value: u8) -> Self {
        Self {
            mask,
            value: value & mask,
        }
    }

    /// Require `bits` to be set or clear.
    pub fn require(self, bits: u8, set: bool) -> Self {
        Self {
            mask: self.mask | bits,
            value: if set {
                self.value | bits
            } else {
                self.value & !bits
            },
        }
    }

    /// Whether the filter accepts all bytes.
    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    pub fn passes(&self, byte: u8) -> bool {
        byte & self.mask == self.value
    }

    /// Build a filter for a minimal QUAL; only thresholds 20 and 40 are indexed.
    pub fn with_min_qual(self, qual: f64) -> Self {
        if qual >= 40.0 {
            self.require(QUAL_GT_40_MASK, true)
        } else if qual >= 20.0 {
            self.require(QUAL_GT_20_MASK, true)
        } else {
            self
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn attrs(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[rstest]
    #[case(None, 0)]
    #[case(Some(""), 0)]
    #[case(Some("."), 0)]
    #[case(Some("abc"), 0)]
    #[case(Some("NaN"), 0)]
    #[case(Some("20"), 0)]
    #[case(Some("20.5"), QUAL_GT_20_MASK)]
    #[case(Some("40"), QUAL_GT_20_MASK)]
    #[case(Some("40.01"), QUAL_GT_20_MASK | QUAL_GT_40_MASK)]
    #[case(Some("1000"), QUAL_GT_20_MASK | QUAL_GT_40_MASK)]
    fn qual_thresholds(#[case] qual: Option<&str>, #[case] expected: u8) {
        let attributes = match qual {
            Some(qual) => attrs(&[("QUAL", qual)]),
            None => attrs(&[]),
        };
        let value = create_file_index_value(VariantType::Indel, &attributes, None);
        assert_eq!(value & (QUAL_GT_20_MASK | QUAL_GT_40_MASK), expected);
    }

    #[rstest]
    #[case(None, None, false)]
    #[case(None, Some("21"), true)]
    #[case(None, Some("20"), false)]
    #[case(Some("10"), Some("30"), false)]
    #[case(Some("30"), Some("10"), true)]
    #[case(Some("x"), Some("30"), false)]
    #[case(Some("25.5"), None, false)]
    fn dp_precedence(
        #[case] format_dp: Option<&str>,
        #[case] info_dp: Option<&str>,
        #[case] expected: bool,
    ) {
        let attributes = match info_dp {
            Some(dp) => attrs(&[("DP", dp)]),
            None => attrs(&[]),
        };
        let value = create_file_index_value(VariantType::Snv, &attributes, format_dp);
        assert_eq!(value & DP_GT_20_MASK != 0, expected);
    }

    #[test]
    fn type_and_filter_bits() {
        let pass = attrs(&[("FILTER", "PASS"), ("QUAL", "50"), ("DP", "30")]);
        assert_eq!(
            create_file_index_value(VariantType::Snp, &pass, None),
            SNV_MASK | FILTER_PASS_MASK | QUAL_GT_20_MASK | QUAL_GT_40_MASK | DP_GT_20_MASK
        );
        let low_gq = attrs(&[("FILTER", "LowGQ")]);
        assert_eq!(
            create_file_index_value(VariantType::Mnv, &low_gq, None),
            0
        );
    }

    #[test]
    fn filter_mask_value() {
        let filter = FileIndexFilter::default()
            .require(SNV_MASK, true)
            .require(FILTER_PASS_MASK, false);
        assert_eq!(filter, FileIndexFilter::new(0b11, 0b01));
        assert!(filter.passes(0b0000_0001));
        assert!(filter.passes(0b0001_0101));
        assert!(!filter.passes(0b0000_0011));
        assert!(!filter.passes(0));
        assert!(FileIndexFilter::default().passes(0xff));
        assert_eq!(
            FileIndexFilter::default().with_min_qual(45.0),
            FileIndexFilter::new(QUAL_GT_40_MASK, QUAL_GT_40_MASK)
        );
    }
}
