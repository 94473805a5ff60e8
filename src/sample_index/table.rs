//! RocksDB-backed sample-index table.
//!
//! Each cell `(row key, qualifier)` is stored under the RocksDB key `row_key ++ qualifier`
//! in the `sample_index` column family, so that all cells of a row are contiguous and rows
//! sort by sample, chromosome, and batch start.

use std::collections::HashSet;
use std::sync::Arc;

use crate::common::worker_version;
use crate::variant::{cmp_intra_chromosome, Variant};

use super::codec::DecodeError;
use super::entry::{self, SampleIndexEntry};
use super::filter::SampleIndexEntryFilter;
use super::query::SingleSampleIndexQuery;
use super::schema::{self, batch_start, RowKey, DEFAULT_BATCH_SIZE};

/// Column family holding the cells.
pub const CF_SAMPLE_INDEX: &str = "sample_index";
/// Column family holding meta information.
pub const CF_META: &str = "meta";

const META_VERSION: &str = "opencga-worker-version";
const META_DB_NAME: &str = "db-name";
const META_BATCH_SIZE: &str = "batch-size";
const DB_NAME: &str = "sample-index";

/// Error type for table access.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("column family {0} not found")]
    MissingColumnFamily(&'static str),
    #[error(transparent)]
    Schema(#[from] schema::Error),
    #[error(transparent)]
    Entry(#[from] entry::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("qualifier of key {0:?} is not valid UTF-8")]
    InvalidQualifier(Vec<u8>),
    #[error("invalid meta value of {0}")]
    InvalidMeta(&'static str),
    #[error("compaction failed: {0}")]
    Compaction(String),
}

/// Handle to an opened sample-index database.
pub struct SampleIndexTable {
    db: Arc<rocksdb::DBWithThreadMode<rocksdb::MultiThreaded>>,
    batch_size: u32,
}

impl SampleIndexTable {
    /// Create or open the database for writing.
    pub fn create(path: &str, path_wal_dir: Option<&str>, batch_size: u32) -> Result<Self, Error> {
        let mut options =
            rocksdb_utils_lookup::tune_options(rocksdb::Options::default(), path_wal_dir);
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let cf_descriptors = [CF_META, CF_SAMPLE_INDEX]
            .iter()
            .map(|name| rocksdb::ColumnFamilyDescriptor::new(*name, options.clone()))
            .collect::<Vec<_>>();
        let db: Arc<rocksdb::DBWithThreadMode<rocksdb::MultiThreaded>> =
            Arc::new(rocksdb::DBWithThreadMode::open_cf_descriptors(
                &options,
                path,
                cf_descriptors,
            )?);

        let batch_size = batch_size.max(1);
        {
            let cf_meta = db
                .cf_handle(CF_META)
                .ok_or(Error::MissingColumnFamily(CF_META))?;
            db.put_cf(&cf_meta, META_VERSION, worker_version())?;
            db.put_cf(&cf_meta, META_DB_NAME, DB_NAME)?;
            db.put_cf(&cf_meta, META_BATCH_SIZE, batch_size.to_string())?;
        }

        Ok(Self { db, batch_size })
    }

    /// Open an existing database for reading; the batch size is taken from its meta data.
    pub fn open_read_only(path: &str) -> Result<Self, Error> {
        let db: Arc<rocksdb::DBWithThreadMode<rocksdb::MultiThreaded>> =
            Arc::new(rocksdb::DBWithThreadMode::open_cf_for_read_only(
                &rocksdb::Options::default(),
                path,
                [CF_META, CF_SAMPLE_INDEX],
                true,
            )?);
        let batch_size = {
            let cf_meta = db
                .cf_handle(CF_META)
                .ok_or(Error::MissingColumnFamily(CF_META))?;
            match db.get_cf(&cf_meta, META_BATCH_SIZE)? {
                Some(raw) => std::str::from_utf8(&raw)
                    .ok()
                    .and_then(|s| s.parse::<u32>().ok())
                    .filter(|s| *s > 0)
                    .ok_or(Error::InvalidMeta(META_BATCH_SIZE))?,
                None => DEFAULT_BATCH_SIZE,
            }
        };
        Ok(Self { db, batch_size })
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    fn cf(&self) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>, Error> {
        self.db
            .cf_handle(CF_SAMPLE_INDEX)
            .ok_or(Error::MissingColumnFamily(CF_SAMPLE_INDEX))
    }

    /// Write the entries; returns the number of cells written.
    ///
    /// Each written row replaces all cells stored for it before.
    pub fn put_entries(&self, entries: &[SampleIndexEntry]) -> Result<usize, Error> {
        let cf = self.cf()?;
        let mut batch = rocksdb::WriteBatch::default();
        let mut cells = 0;
        for entry in entries {
            let row_key = entry.key.to_bytes()?;
            // Qualifiers are UTF-8 and never start with 0xff.
            let mut row_end = row_key.clone();
            row_end.push(0xff);
            batch.delete_range_cf(&cf, &row_key, &row_end);
            for (qualifier, value) in entry.to_columns() {
                let mut key = row_key.clone();
                key.extend_from_slice(qualifier.as_bytes());
                batch.put_cf(&cf, key, value);
                cells += 1;
            }
        }
        self.db.write(batch)?;
        Ok(cells)
    }

    /// Read one row.
    pub fn get_entry(&self, key: &RowKey) -> Result<Option<SampleIndexEntry>, Error> {
        let row_key = key.to_bytes()?;
        Ok(self.scan(&row_key, &row_key, None)?.into_iter().next())
    }

    /// Read all rows of the sample, optionally restricted to one chromosome.
    pub fn sample_entries(
        &self,
        sample_id: u32,
        chromosome: Option<&str>,
    ) -> Result<Vec<SampleIndexEntry>, Error> {
        let prefix = match chromosome {
            Some(chromosome) => RowKey::chromosome_prefix(sample_id, chromosome),
            None => sample_id.to_be_bytes().to_vec(),
        };
        self.scan(&prefix, &prefix, None)
    }

    /// Read the rows starting at `seek` while keys share `prefix`, up to batch `last_batch`.
    fn scan(
        &self,
        seek: &[u8],
        prefix: &[u8],
        last_batch: Option<u32>,
    ) -> Result<Vec<SampleIndexEntry>, Error> {
        let cf = self.cf()?;
        let mut iter = self.db.raw_iterator_cf(&cf);
        iter.seek(seek);

        let mut result = Vec::new();
        let mut current: Option<(RowKey, Vec<(String, Vec<u8>)>)> = None;
        while iter.valid() {
            let (key, value) = match (iter.key(), iter.value()) {
                (Some(key), Some(value)) => (key, value),
                _ => break,
            };
            if !key.starts_with(prefix) {
                break;
            }
            let (row_key, len) = RowKey::from_prefix(key)?;
            if last_batch.map(|last| row_key.batch_start > last).unwrap_or(false) {
                break;
            }
            let qualifier = std::str::from_utf8(&key[len..])
                .map_err(|_| Error::InvalidQualifier(key.to_vec()))?
                .to_owned();
            let cell = (qualifier, value.to_vec());

            if let Some((current_key, cells)) = current.as_mut() {
                if *current_key == row_key {
                    cells.push(cell);
                    iter.next();
                    continue;
                }
            }
            if let Some((current_key, cells)) = current.take() {
                result.push(SampleIndexEntry::from_columns(current_key, cells)?);
            }
            current = Some((row_key, vec![cell]));
            iter.next();
        }
        iter.status()?;
        if let Some((current_key, cells)) = current.take() {
            result.push(SampleIndexEntry::from_columns(current_key, cells)?);
        }
        Ok(result)
    }

    /// Rows that may contain variants selected by the query's regions.
    fn query_entries(&self, query: &SingleSampleIndexQuery) -> Result<Vec<SampleIndexEntry>, Error> {
        let sample_id = query.sample_id();
        if query.regions().is_empty() {
            return self.sample_entries(sample_id, None);
        }

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        for region in query.regions() {
            let first = batch_start(region.start.max(0) as u32, self.batch_size);
            let last = batch_start(region.end.max(0) as u32, self.batch_size);
            for chromosome in chromosome_aliases(&region.chromosome) {
                let prefix = RowKey::chromosome_prefix(sample_id, &chromosome);
                let seek = RowKey::new(sample_id, &chromosome, first).to_bytes()?;
                for entry in self.scan(&seek, &prefix, Some(last))? {
                    if seen.insert(entry.key.clone()) {
                        result.push(entry);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Run the query and return the matching variants in canonical order.
    pub fn query(&self, query: &SingleSampleIndexQuery) -> Result<Vec<Variant>, Error> {
        let filter = SampleIndexEntryFilter::new(query);
        let entries = self.query_entries(query)?;
        let mut result = Vec::new();
        for entry in &entries {
            result.extend(filter.filter(entry)?);
        }
        result.sort_by(cmp_intra_chromosome);
        tracing::debug!(
            "sample {}: {} rows, {} variants",
            query.sample_id(),
            entries.len(),
            result.len()
        );
        Ok(result)
    }

    /// Count the variants matching the query.
    pub fn count(&self, query: &SingleSampleIndexQuery) -> Result<usize, Error> {
        let filter = SampleIndexEntryFilter::new(query);
        let mut count = 0;
        for entry in &self.query_entries(query)? {
            count += filter.filter_count(entry)?;
        }
        Ok(count)
    }

    /// Force compaction of all column families.
    pub fn compact(&self) -> Result<(), Error> {
        rocksdb_utils_lookup::force_compaction_cf(
            &self.db,
            &[CF_META, CF_SAMPLE_INDEX],
            Some("  "),
            true,
        )
        .map_err(|e| Error::Compaction(e.to_string()))
    }
}

/// The chromosome name with and without `chr` prefix.
fn chromosome_aliases(chromosome: &str) -> Vec<String> {
    match chromosome.strip_prefix("chr") {
        Some(stripped) => vec![chromosome.to_owned(), stripped.to_owned()],
        None => vec![chromosome.to_owned(), format!("chr{}", chromosome)],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sample_index::builder::{IndexedSample, SampleIndexBuilder, SampleIndexStudy};
    use crate::sample_index::codec;
    use crate::sample_index::entry::{MendelianRecord, SampleIndexGtEntry};
    use crate::sample_index::file_index::{FileIndexFilter, FILTER_PASS_MASK};
    use crate::sample_index::query::SingleSampleIndexQueryBuilder;
    use crate::variant::{FileEntry, Region, SampleEntry, StudyEntry};
    use pretty_assertions::assert_eq;

    fn variant(notation: &str, gt: &str, filter: &str) -> Variant {
        let mut variant: Variant = notation.parse().unwrap();
        variant.studies.push(StudyEntry {
            study_id: "s1".into(),
            format: vec!["GT".into()],
            samples: vec![SampleEntry {
                sample_id: "NA12878".into(),
                data: vec![gt.into()],
            }],
            files: vec![FileEntry {
                file_id: "f1".into(),
                call: None,
                attributes: [("FILTER".to_string(), filter.to_string())]
                    .into_iter()
                    .collect(),
            }],
            secondary_alternates: vec![],
        });
        variant
    }

    fn build_table(path: &str) -> Result<(), anyhow::Error> {
        let study = SampleIndexStudy {
            study_id: "s1".into(),
            samples: vec![IndexedSample {
                name: "NA12878".into(),
                id: 42,
                father: None,
                mother: None,
            }],
        };
        let variants = vec![
            variant("chr1:100:A:T", "0/1", "PASS"),
            variant("chr1:1500:A:T", "1/1", "LowQual"),
            variant("chr1:2500:A:T", "0/1", "PASS"),
            variant("chr2:100:A:T", "0/1", "PASS"),
            variant("chr10:100:A:T", "0/1", "PASS"),
        ];
        let entries = SampleIndexBuilder::new(study, 1000)?.build(&variants)?;
        let table = SampleIndexTable::create(path, None, 1000)?;
        assert_eq!(table.put_entries(&entries)?, 5 * 5);
        table.compact()?;
        Ok(())
    }

    #[test]
    fn write_and_query() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let path = format!("{}/sample-index", tmpdir.to_path_buf().to_str().unwrap());
        build_table(&path)?;

        let table = SampleIndexTable::open_read_only(&path)?;
        assert_eq!(table.batch_size(), 1000);
        assert_eq!(table.sample_entries(42, None)?.len(), 5);
        assert_eq!(table.sample_entries(42, Some("chr1"))?.len(), 3);
        assert!(table.sample_entries(7, None)?.is_empty());
        assert!(table.get_entry(&RowKey::new(42, "chr1", 1000))?.is_some());

        let all = SingleSampleIndexQueryBuilder::default().sample_id(42).build()?;
        let names = table
            .query(&all)?
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "chr1:100:A:T",
                "chr1:1500:A:T",
                "chr1:2500:A:T",
                "chr2:100:A:T",
                "chr10:100:A:T"
            ]
        );

        let region = SingleSampleIndexQueryBuilder::default()
            .sample_id(42)
            .regions(vec![Region::new("1", 1000, 3000)])
            .file_filter(FileIndexFilter::new(FILTER_PASS_MASK, FILTER_PASS_MASK))
            .build()?;
        let starts = table
            .query(&region)?
            .iter()
            .map(|v| v.start)
            .collect::<Vec<_>>();
        assert_eq!(starts, vec![2500]);
        assert_eq!(table.count(&region)?, 1);
        Ok(())
    }

    fn gt_entry(gt: &str, notations: &[&str]) -> Result<SampleIndexGtEntry, anyhow::Error> {
        let variants = notations
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<Variant>, _>>()?;
        Ok(SampleIndexGtEntry {
            gt: gt.into(),
            count: variants.len() as u32,
            variants: codec::to_bytes(&variants)?,
            ..Default::default()
        })
    }

    #[test]
    fn rewriting_a_row_drops_stale_cells() -> Result<(), anyhow::Error> {
        let tmpdir = temp_testdir::TempDir::default();
        let path = format!("{}/sample-index", tmpdir.to_path_buf().to_str().unwrap());
        let table = SampleIndexTable::create(&path, None, 1000)?;
        let key = RowKey::new(42, "1", 0);

        let mut first = SampleIndexEntry::new(key.clone());
        first.gts.insert("0/1".into(), gt_entry("0/1", &["1:100:A:T"])?);
        first.gts.insert("1/1".into(), gt_entry("1/1", &["1:200:G:C"])?);
        first.set_mendelian_records(&[MendelianRecord::new(2, "1/1".into(), 0)])?;
        table.put_entries(&[first])?;

        let mut second = SampleIndexEntry::new(key.clone());
        second.gts.insert("1/1".into(), gt_entry("1/1", &["1:200:G:C"])?);
        second.set_mendelian_records(&[MendelianRecord::new(2, "1/1".into(), 0)])?;
        table.put_entries(&[second.clone()])?;

        let stored = table
            .get_entry(&key)?
            .ok_or_else(|| anyhow::anyhow!("missing row"))?;
        assert_eq!(stored.gts.keys().collect::<Vec<_>>(), vec!["1/1"]);
        assert_eq!(
            stored.mendelian_records()?,
            vec![MendelianRecord::new(2, "1/1".into(), 0)]
        );
        assert_eq!(stored, second);
        Ok(())
    }
}
