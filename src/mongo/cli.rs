//! Implementation of the `mongo *` sub commands.

use std::io::Write;
use std::time::Instant;

use mongodb::bson::{Bson, Document};
use thousands::Separable;

use super::collection::{self, MongoCollection, VariantCollection};
use super::document::VariantStatsRecord;
use super::query::{parse_params, VariantQuery};
use super::upsert::{self, LoadSummary, VariantLoader};
use crate::common::io::{open_write_maybe_gz, read_jsonl};
use crate::conf::StorageConfig;
use crate::err::ArgError;
use crate::variant::Variant;
use crate::variant_row::StudyConfig;

/// Command line arguments for `mongo load` sub command.
#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Load variants into MongoDB", long_about = None)]
pub struct LoadArgs {
    /// Optional path to the storage configuration JSON.
    #[arg(long)]
    pub path_config: Option<String>,
    /// Path to the study configuration JSON.
    #[arg(long)]
    pub path_study: String,
    /// Path(s) to variants as JSON lines, optionally gzipped.
    #[arg(long, required = true)]
    pub path_input: Vec<String>,
    /// Optional path to variant statistics as JSON lines.
    #[arg(long)]
    pub path_stats: Option<String>,
    /// Override the MongoDB URI of the configuration.
    #[arg(long)]
    pub mongo_uri: Option<String>,
}

/// Command line arguments for `mongo query` sub command.
#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Translate and run variant queries", long_about = None)]
pub struct QueryArgs {
    /// Optional path to the storage configuration JSON.
    #[arg(long)]
    pub path_config: Option<String>,
    /// Query parameters as `key=value`.
    #[arg(long = "param")]
    pub params: Vec<String>,
    /// Run the query instead of only printing the filter.
    #[arg(long, default_value_t = false)]
    pub execute: bool,
    /// Only count matching documents.
    #[arg(long, default_value_t = false)]
    pub count_only: bool,
    /// Path to the output JSON lines; standard output if not given.
    #[arg(long)]
    pub path_output: Option<String>,
    /// Override the MongoDB URI of the configuration.
    #[arg(long)]
    pub mongo_uri: Option<String>,
}

/// Command line arguments for `mongo remove-study` sub command.
#[derive(clap::Parser, Debug)]
#[command(author, version, about = "Remove a study from all variants", long_about = None)]
pub struct RemoveStudyArgs {
    /// Optional path to the storage configuration JSON.
    #[arg(long)]
    pub path_config: Option<String>,
    /// Numeric identifier of the study.
    #[arg(long)]
    pub study_id: u32,
    /// Delete variants left without any study.
    #[arg(long, default_value_t = false)]
    pub purge: bool,
    /// Override the MongoDB URI of the configuration.
    #[arg(long)]
    pub mongo_uri: Option<String>,
}

fn load_config(
    path_config: Option<&str>,
    mongo_uri: Option<&str>,
) -> Result<StorageConfig, anyhow::Error> {
    let mut config = StorageConfig::load(path_config)?;
    if let Some(uri) = mongo_uri {
        config.mongo.uri = uri.to_owned();
    }
    Ok(config)
}

fn open_collection(config: &StorageConfig) -> Result<MongoCollection, anyhow::Error> {
    tracing::info!(
        "opening {}.{} at {}",
        &config.mongo.database,
        &config.mongo.collection,
        &config.mongo.uri
    );
    collection::open(&config.mongo).map_err(|e| anyhow::anyhow!("could not open collection: {}", e))
}

/// Load variant files, then statistics and annotations, into `collection`.
pub fn load_into<C: VariantCollection + ?Sized>(
    collection: &C,
    config: &StorageConfig,
    study: &StudyConfig,
    args: &LoadArgs,
) -> Result<LoadSummary, anyhow::Error> {
    let loader = VariantLoader::new(collection, study, config);
    let mut total = LoadSummary::default();
    for path_input in &args.path_input {
        let before_load = Instant::now();
        let variants: Vec<Variant> = read_jsonl(path_input)?;
        let summary = loader
            .load(&variants)
            .map_err(|e| anyhow::anyhow!("could not load {}: {}", path_input, e))?;
        let annotated = upsert::update_annotations(collection, &variants)
            .map_err(|e| anyhow::anyhow!("could not update annotations: {}", e))?;
        tracing::info!(
            "... loaded {} variants from {} ({} new, {} study added, {} merged, {} skipped, {} annotated) in {:?}",
            variants.len().separate_with_commas(),
            path_input,
            summary.inserted.separate_with_commas(),
            summary.study_added.separate_with_commas(),
            summary.merged.separate_with_commas(),
            summary.skipped.separate_with_commas(),
            annotated.separate_with_commas(),
            before_load.elapsed()
        );
        total.inserted += summary.inserted;
        total.study_added += summary.study_added;
        total.merged += summary.merged;
        total.skipped += summary.skipped;
    }

    if let Some(path_stats) = &args.path_stats {
        let stats: Vec<VariantStatsRecord> = read_jsonl(path_stats)?;
        let stored = upsert::update_stats(collection, &stats)
            .map_err(|e| anyhow::anyhow!("could not update stats: {}", e))?;
        tracing::info!(
            "... stored {} of {} stats records",
            stored.separate_with_commas(),
            stats.len().separate_with_commas()
        );
    }
    Ok(total)
}

/// Main entry point for `mongo load` sub command.
pub fn run_load(args_common: &crate::common::Args, args: &LoadArgs) -> Result<(), anyhow::Error> {
    let before_anything = Instant::now();
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let config = load_config(args.path_config.as_deref(), args.mongo_uri.as_deref())?;
    let study: StudyConfig = serde_json::from_str(
        &std::fs::read_to_string(&args.path_study)
            .map_err(|e| anyhow::anyhow!("could not read {}: {}", &args.path_study, e))?,
    )
    .map_err(|e| anyhow::anyhow!("could not parse {}: {}", &args.path_study, e))?;

    let collection = open_collection(&config)?;
    let total = load_into(&collection, &config, &study, args)?;
    tracing::info!("total: {:?}", &total);
    tracing::info!(
        "All of `mongo load` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

fn to_json(doc: Document) -> serde_json::Value {
    Bson::Document(doc).into_relaxed_extjson()
}

/// Main entry point for `mongo query` sub command.
pub fn run_query(args_common: &crate::common::Args, args: &QueryArgs) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    if args.count_only && !args.execute {
        return Err(ArgError::MissingFlag {
            flag: "count-only",
            requires: "execute",
        }
        .into());
    }
    let config = load_config(args.path_config.as_deref(), args.mongo_uri.as_deref())?;
    let query = VariantQuery::from_params(&parse_params(&args.params)?)?;
    let filter = query.to_filter(&config)?;
    tracing::debug!("filter = {}", to_json(filter.clone()));

    let mut writer: Box<dyn Write> = match &args.path_output {
        Some(path) => open_write_maybe_gz(path)?,
        None => Box::new(std::io::stdout()),
    };
    if !args.execute {
        writeln!(writer, "{}", to_json(filter))?;
    } else {
        let collection = open_collection(&config)?;
        let before_query = Instant::now();
        if args.count_only {
            writeln!(writer, "{}", VariantCollection::count(&collection, filter)?)?;
        } else {
            let docs = VariantCollection::find(&collection, filter, &query.options)?;
            tracing::info!(
                "... found {} documents in {:?}",
                docs.len().separate_with_commas(),
                before_query.elapsed()
            );
            for doc in docs {
                writeln!(writer, "{}", to_json(doc))?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/// Main entry point for `mongo remove-study` sub command.
pub fn run_remove_study(
    args_common: &crate::common::Args,
    args: &RemoveStudyArgs,
) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:?}", &args_common);
    tracing::info!("args = {:?}", &args);

    let config = load_config(args.path_config.as_deref(), args.mongo_uri.as_deref())?;
    let collection = open_collection(&config)?;
    let summary = upsert::remove_study(&collection, args.study_id, args.purge)?;
    tracing::info!(
        "removed study {} from {} variants, purged {}",
        args.study_id,
        summary.updated.separate_with_commas(),
        summary.purged.separate_with_commas()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mongo::memory::MemoryCollection;
    use crate::variant::{SampleEntry, StudyEntry};
    use pretty_assertions::assert_eq;

    #[test]
    fn load_files_and_stats() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let study = StudyConfig {
            study_id: 1,
            name: "s1".into(),
            indexed_samples: [("A".to_string(), 5)].into_iter().collect(),
        };
        let mut variant = Variant::new("1", 100, "A", "T");
        variant.studies.push(StudyEntry {
            study_id: "s1".into(),
            format: vec!["GT".into()],
            samples: vec![SampleEntry {
                sample_id: "A".into(),
                data: vec!["0/1".into()],
            }],
            ..Default::default()
        });
        let path_input = tmpdir.join("variants.jsonl");
        let mut writer = open_write_maybe_gz(&path_input)?;
        crate::common::io::write_jsonl(&mut writer, &[variant])?;
        writer.flush()?;
        drop(writer);
        let path_stats = tmpdir.join("stats.jsonl");
        std::fs::write(
            &path_stats,
            r#"{"variant": "1:100:A:T", "study_id": 1, "cohort_id": "ALL", "maf": 0.5}"#,
        )?;

        let args = LoadArgs {
            path_config: None,
            path_study: String::new(),
            path_input: vec![
                path_input.to_string_lossy().into(),
                path_input.to_string_lossy().into(),
            ],
            path_stats: Some(path_stats.to_string_lossy().into()),
            mongo_uri: None,
        };
        let collection = MemoryCollection::new();
        let total = load_into(&collection, &StorageConfig::default(), &study, &args)?;
        assert_eq!(
            total,
            LoadSummary {
                inserted: 1,
                merged: 1,
                ..Default::default()
            }
        );
        let docs = collection.all();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get_array("stats")?.len(), 1);
        Ok(())
    }

    #[test]
    fn count_only_requires_execute() {
        let args = QueryArgs {
            path_config: None,
            params: vec!["chromosome=1".into()],
            execute: false,
            count_only: true,
            path_output: None,
            mongo_uri: None,
        };
        let err = run_query(&crate::common::Args::default(), &args)
            .err()
            .and_then(|e| e.downcast::<ArgError>().ok());
        assert_eq!(
            err,
            Some(ArgError::MissingFlag {
                flag: "count-only",
                requires: "execute"
            })
        );
    }

    #[test]
    fn relaxed_json_output() {
        let json = to_json(mongodb::bson::doc! { "start": { "$gte": 10 } });
        assert_eq!(json, serde_json::json!({ "start": { "$gte": 10 } }));
    }
}
