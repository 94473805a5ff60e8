//! Implementation of the `sample-index build` and `sample-index query` sub commands.

use std::collections::BTreeSet;
use std::io::Write;
use std::time::Instant;

use thousands::Separable;

use crate::common::io::{open_write_maybe_gz, read_jsonl, write_jsonl};
use crate::conf::StorageConfig;
use crate::err::ArgError;
use crate::variant::{Region, Variant, VariantType};

use super::builder::{SampleIndexBuilder, SampleIndexStudy};
use super::file_index::{FileIndexFilter, DP_GT_20_MASK, FILTER_PASS_MASK, SNV_MASK};
use super::genotype_code::GenotypeCodeFilter;
use super::query::{SingleSampleIndexQuery, SingleSampleIndexQueryBuilder};
use super::table::SampleIndexTable;

/// Number of entries written per RocksDB write batch.
const WRITE_CHUNK: usize = 10_000;

/// Command line arguments for `sample-index build` sub command.
#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Build the sample genotype index", long_about = None)]
pub struct BuildArgs {
    /// Optional path to the storage configuration JSON.
    #[arg(long)]
    pub path_config: Option<String>,
    /// Path to the JSON file with study id and indexed samples.
    #[arg(long)]
    pub path_samples: String,
    /// Path to the variants as JSON lines, optionally gzipped.
    #[arg(long, required = true)]
    pub path_input: Vec<String>,
    /// Path to the output RocksDB.
    #[arg(long)]
    pub path_out_rocksdb: String,
    /// Override the number of base pairs per row.
    #[arg(long)]
    pub batch_size: Option<u32>,
    /// Optional path to RocksDB WAL directory.
    #[arg(long)]
    pub path_wal_dir: Option<String>,
    /// Set the number of threads to use, defaults to number of cores.
    #[arg(long)]
    pub num_threads: Option<usize>,
}

/// Main entry point for `sample-index build` sub command.
pub fn run_build(args_common: &crate::common::Args, args: &BuildArgs) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    if let Some(num_threads) = args.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
            .map_err(|e| anyhow::anyhow!("building global Rayon thread pool failed: {}", e))?;
    }

    let config = StorageConfig::load(args.path_config.as_deref())?;
    let batch_size = args.batch_size.unwrap_or(config.sample_index_batch_size);

    let study: SampleIndexStudy = serde_json::from_str(
        &std::fs::read_to_string(&args.path_samples)
            .map_err(|e| anyhow::anyhow!("could not read {}: {}", &args.path_samples, e))?,
    )
    .map_err(|e| anyhow::anyhow!("could not parse {}: {}", &args.path_samples, e))?;
    tracing::info!(
        "indexing {} samples of study {}",
        study.samples.len(),
        &study.study_id
    );
    let builder = SampleIndexBuilder::new(study, batch_size)?;

    tracing::info!("Reading variants ...");
    let before_reading = Instant::now();
    let mut variants: Vec<Variant> = Vec::new();
    for path in &args.path_input {
        variants.extend(read_jsonl::<Variant, _>(path)?);
    }
    tracing::info!(
        "... read {} variants in {:?}",
        variants.len().separate_with_commas(),
        before_reading.elapsed()
    );

    tracing::info!("Building sample index ...");
    let before_building = Instant::now();
    let entries = builder.build(&variants)?;
    tracing::info!(
        "... built {} rows in {:?}",
        entries.len().separate_with_commas(),
        before_building.elapsed()
    );

    tracing::info!("Writing to RocksDB ...");
    let before_writing = Instant::now();
    let table = SampleIndexTable::create(
        &args.path_out_rocksdb,
        args.path_wal_dir.as_deref(),
        batch_size,
    )?;
    let mut cells = 0;
    for chunk in entries.chunks(WRITE_CHUNK) {
        cells += table.put_entries(chunk)?;
    }
    tracing::info!(
        "... wrote {} cells in {:?}",
        cells.separate_with_commas(),
        before_writing.elapsed()
    );

    tracing::info!("Running RocksDB compaction ...");
    let before_compaction = Instant::now();
    table.compact()?;
    tracing::info!(
        "... done compacting RocksDB in {:?}",
        before_compaction.elapsed()
    );

    tracing::info!(
        "All of `sample-index build` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

/// Command line arguments for `sample-index query` sub command.
#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Query the sample genotype index", long_about = None)]
pub struct QueryArgs {
    /// Path to the sample-index RocksDB.
    #[arg(long)]
    pub path_rocksdb: String,
    /// Numeric id of the sample.
    #[arg(long)]
    pub sample_id: u32,
    /// Genotypes to return, all if not given.
    #[arg(long)]
    pub genotype: Vec<String>,
    /// Regions as `chr`, `chr:pos`, or `chr:start-end`.
    #[arg(long)]
    pub region: Vec<String>,
    /// Variant types to return, e.g., `SNV`.
    #[arg(long)]
    pub variant_type: Vec<String>,
    /// Bits required in the annotation-index byte.
    #[arg(long, default_value_t = 0)]
    pub annotation_mask: u8,
    /// Only variants with `FILTER=PASS`.
    #[arg(long)]
    pub pass_only: bool,
    /// Only SNVs according to the file index.
    #[arg(long)]
    pub snv_only: bool,
    /// Minimal QUAL; only 20 and 40 are indexed.
    #[arg(long)]
    pub min_qual: Option<f64>,
    /// Only variants with depth above 20.
    #[arg(long)]
    pub dp_gt_20: bool,
    /// Accepted genotypes of the father.
    #[arg(long)]
    pub father_genotype: Vec<String>,
    /// Accepted genotypes of the mother.
    #[arg(long)]
    pub mother_genotype: Vec<String>,
    /// Only variants with Mendelian errors.
    #[arg(long)]
    pub mendelian_error: bool,
    /// Only de novo variants.
    #[arg(long)]
    pub only_de_novo: bool,
    /// Only print the number of matches.
    #[arg(long)]
    pub count_only: bool,
    /// Path to the output JSON lines, stdout if not given.
    #[arg(long)]
    pub path_output: Option<String>,
}

impl QueryArgs {
    /// Build the query descriptor from the flags.
    pub fn to_query(&self) -> Result<SingleSampleIndexQuery, anyhow::Error> {
        let mut file_filter = FileIndexFilter::default();
        if self.pass_only {
            file_filter = file_filter.require(FILTER_PASS_MASK, true);
        }
        if self.snv_only {
            file_filter = file_filter.require(SNV_MASK, true);
        }
        if self.dp_gt_20 {
            file_filter = file_filter.require(DP_GT_20_MASK, true);
        }
        if let Some(min_qual) = self.min_qual {
            file_filter = file_filter.with_min_qual(min_qual);
        }

        let regions = self
            .region
            .iter()
            .map(|r| {
                r.parse::<Region>()
                    .map_err(|e| ArgError::invalid_value("region", r, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = SingleSampleIndexQueryBuilder::default();
        builder
            .sample_id(self.sample_id)
            .genotypes(self.genotype.clone())
            .regions(regions)
            .annotation_mask(self.annotation_mask)
            .file_filter(file_filter)
            .mendelian_error(self.mendelian_error)
            .only_de_novo(self.only_de_novo);
        if !self.variant_type.is_empty() {
            let types = self
                .variant_type
                .iter()
                .map(|t| {
                    VariantType::from_name(t)
                        .map_err(|e| ArgError::invalid_value("variant-type", t, e))
                })
                .collect::<Result<BTreeSet<_>, _>>()?;
            builder.variant_types(types);
        }
        if !self.father_genotype.is_empty() {
            builder.father_filter(GenotypeCodeFilter::from_genotypes(&self.father_genotype));
        }
        if !self.mother_genotype.is_empty() {
            builder.mother_filter(GenotypeCodeFilter::from_genotypes(&self.mother_genotype));
        }
        builder
            .build()
            .map_err(|e| anyhow::anyhow!("invalid query: {}", e))
    }
}

/// Main entry point for `sample-index query` sub command.
pub fn run_query(args_common: &crate::common::Args, args: &QueryArgs) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let query = args.to_query()?;
    tracing::debug!("query = {:?}", &query);
    let table = SampleIndexTable::open_read_only(&args.path_rocksdb)
        .map_err(|e| anyhow::anyhow!("could not open {}: {}", &args.path_rocksdb, e))?;

    let mut writer: Box<dyn Write> = match &args.path_output {
        Some(path) => open_write_maybe_gz(path)?,
        None => Box::new(std::io::stdout()),
    };
    if args.count_only {
        let count = table.count(&query)?;
        writeln!(writer, "{}", count)?;
        tracing::info!("{} matching variants", count.separate_with_commas());
    } else {
        let variants = table.query(&query)?;
        let written = write_jsonl(&mut writer, &variants)?;
        tracing::info!("wrote {} variants", written.separate_with_commas());
    }
    writer.flush()?;

    tracing::info!(
        "All of `sample-index query` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sample_index::file_index::QUAL_GT_20_MASK;
    use clap::Parser;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_from_flags() -> Result<(), anyhow::Error> {
        let args = QueryArgs::try_parse_from([
            "query",
            "--path-rocksdb",
            "db",
            "--sample-id",
            "3",
            "--genotype",
            "0/1",
            "--region",
            "1:100-200",
            "--variant-type",
            "snv",
            "--pass-only",
            "--min-qual",
            "30",
            "--father-genotype",
            "0/0",
        ])?;
        let query = args.to_query()?;
        assert_eq!(query.sample_id(), 3);
        assert_eq!(query.genotypes(), &["0/1".to_string()]);
        assert_eq!(query.regions(), &[Region::new("1", 100, 200)]);
        assert_eq!(
            query.file_filter(),
            FileIndexFilter::new(
                FILTER_PASS_MASK | QUAL_GT_20_MASK,
                FILTER_PASS_MASK | QUAL_GT_20_MASK
            )
        );
        assert!(query.has_parents_filter());
        assert!(!query.mendelian_mode());
        Ok(())
    }

    #[test]
    fn bad_region_rejected() -> Result<(), anyhow::Error> {
        let args = QueryArgs::try_parse_from([
            "query",
            "--path-rocksdb",
            "db",
            "--sample-id",
            "3",
            "--region",
            "1:x-y",
        ])?;
        assert!(args.to_query().is_err());
        Ok(())
    }

    #[test]
    fn build_then_query() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let dir = tmpdir.to_path_buf();
        let path_samples = dir.join("samples.json");
        std::fs::write(
            &path_samples,
            r#"{"study_id": "s1", "samples": [{"name": "NA12878", "id": 1}]}"#,
        )?;
        let path_input = dir.join("variants.jsonl");
        let mut lines = String::new();
        for (pos, gt) in [(100, "0/1"), (200, "0/0"), (300, "1/1")] {
            lines.push_str(&format!(
                r#"{{"chromosome": "1", "start": {pos}, "end": {pos}, "reference": "A", "alternate": "T", "type": "SNV", "studies": [{{"study_id": "s1", "format": ["GT"], "samples": [{{"sample_id": "NA12878", "data": ["{gt}"]}}]}}]}}"#
            ));
            lines.push('\n');
        }
        std::fs::write(&path_input, lines)?;

        let path_db = dir.join("db");
        run_build(
            &crate::common::Args::default(),
            &BuildArgs {
                path_config: None,
                path_samples: path_samples.to_string_lossy().into(),
                path_input: vec![path_input.to_string_lossy().into()],
                path_out_rocksdb: path_db.to_string_lossy().into(),
                batch_size: Some(1000),
                path_wal_dir: None,
                num_threads: None,
            },
        )?;

        let path_output = dir.join("out.jsonl");
        let args = QueryArgs::try_parse_from([
            "query",
            "--path-rocksdb",
            path_db.to_str().unwrap(),
            "--sample-id",
            "1",
            "--path-output",
            path_output.to_str().unwrap(),
        ])?;
        run_query(&crate::common::Args::default(), &args)?;
        let variants: Vec<Variant> = read_jsonl(&path_output)?;
        assert_eq!(
            variants.iter().map(|v| v.start).collect::<Vec<_>>(),
            vec![100, 300]
        );
        Ok(())
    }
}
