//! Storage seam for variant documents.

use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{CountOptions, FindOptions, UpdateOptions};
use mongodb::sync::{Collection, Database};

use super::query::QueryOptions;
use crate::conf::MongoConfig;

/// Server error code of duplicate key violations.
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// Error type for store access.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("write {index} of bulk failed with code {code}: {message}")]
    Write {
        index: usize,
        code: i32,
        message: String,
    },
    #[error("malformed server reply: {0}")]
    MalformedReply(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Result of one conditional upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// An existing document matched the filter and was updated.
    Matched,
    /// No document matched and a new one was inserted.
    Inserted,
    /// No document matched but inserting collided with an existing `_id`.
    DuplicateKey,
}

/// Operations on a variant collection.
pub trait VariantCollection {
    /// Update the first document matching `filter` or insert a new one.
    fn upsert(&self, filter: Document, update: Document) -> Result<UpsertOutcome, StoreError>;

    /// Run independent upserts, one outcome per item in input order.
    fn bulk_upsert(
        &self,
        operations: Vec<(Document, Document)>,
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        operations
            .into_iter()
            .map(|(filter, update)| self.upsert(filter, update))
            .collect()
    }

    /// Update the first matching document, returning the number of matches.
    fn update_one(&self, filter: Document, update: Document) -> Result<u64, StoreError>;

    /// Run independent single-document updates, returning the total number of matches.
    fn bulk_update(&self, operations: Vec<(Document, Document)>) -> Result<u64, StoreError> {
        operations
            .into_iter()
            .map(|(filter, update)| self.update_one(filter, update))
            .sum()
    }

    /// Update all matching documents, returning the number of matches.
    fn update_many(&self, filter: Document, update: Document) -> Result<u64, StoreError>;

    fn delete_many(&self, filter: Document) -> Result<u64, StoreError>;

    fn find(&self, filter: Document, options: &QueryOptions) -> Result<Vec<Document>, StoreError>;

    fn count(&self, filter: Document) -> Result<u64, StoreError>;
}

/// The configured MongoDB collection.
///
/// Bulk writes go through the `update` command so that the per-item write errors of
/// unordered batches can be mapped back onto the operations.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    database: Database,
    collection: Collection<Document>,
    batch_size: usize,
}

/// Open the collection configured in `config`.
pub fn open(config: &MongoConfig) -> Result<MongoCollection, StoreError> {
    let client = mongodb::sync::Client::with_uri_str(&config.uri)?;
    let database = client.database(&config.database);
    let collection = database.collection::<Document>(&config.collection);
    Ok(MongoCollection {
        database,
        collection,
        batch_size: config.bulk_batch_size.max(1),
    })
}

/// Build an unordered `update` command with one single-document statement per operation.
pub fn update_command(
    collection: &str,
    operations: &[(Document, Document)],
    upsert: bool,
) -> Document {
    let updates = operations
        .iter()
        .map(|(filter, update)| {
            doc! { "q": filter.clone(), "u": update.clone(), "upsert": upsert, "multi": false }
        })
        .collect::<Vec<_>>();
    doc! {
        "update": collection,
        "updates": updates,
        "ordered": false,
    }
}

fn reply_int(value: Option<&Bson>) -> Option<i64> {
    match value {
        Some(Bson::Int32(v)) => Some(*v as i64),
        Some(Bson::Int64(v)) => Some(*v),
        Some(Bson::Double(v)) => Some(*v as i64),
        _ => None,
    }
}

fn reply_items<'a>(reply: &'a Document, key: &str) -> Result<Vec<&'a Document>, StoreError> {
    match reply.get(key) {
        None => Ok(Vec::new()),
        Some(Bson::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_document()
                    .ok_or_else(|| StoreError::MalformedReply(format!("{} item is no document", key)))
            })
            .collect(),
        Some(_) => Err(StoreError::MalformedReply(format!("{} is no array", key))),
    }
}

fn item_index(item: &Document, len: usize) -> Result<usize, StoreError> {
    reply_int(item.get("index"))
        .and_then(|index| usize::try_from(index).ok())
        .filter(|index| *index < len)
        .ok_or_else(|| StoreError::MalformedReply(format!("bad index in {}", item)))
}

/// Write errors of an `update` reply that are not duplicate keys are fatal.
fn write_errors(reply: &Document, len: usize) -> Result<Vec<usize>, StoreError> {
    if let Ok(error) = reply.get_document("writeConcernError") {
        return Err(StoreError::MalformedReply(format!("write concern error: {}", error)));
    }
    let mut duplicates = Vec::new();
    for item in reply_items(reply, "writeErrors")? {
        let index = item_index(item, len)?;
        let code = reply_int(item.get("code")).unwrap_or_default() as i32;
        if code == DUPLICATE_KEY_CODE {
            duplicates.push(index);
        } else {
            return Err(StoreError::Write {
                index,
                code,
                message: item.get_str("errmsg").unwrap_or_default().to_owned(),
            });
        }
    }
    Ok(duplicates)
}

/// Outcomes of `len` upserts from the reply of an `update` command.
pub fn upsert_outcomes(reply: &Document, len: usize) -> Result<Vec<UpsertOutcome>, StoreError> {
    let mut outcomes = vec![UpsertOutcome::Matched; len];
    for index in write_errors(reply, len)? {
        outcomes[index] = UpsertOutcome::DuplicateKey;
    }
    for item in reply_items(reply, "upserted")? {
        outcomes[item_index(item, len)?] = UpsertOutcome::Inserted;
    }
    Ok(outcomes)
}

/// Number of matched documents from the reply of a non-upserting `update` command.
pub fn matched_count(reply: &Document, len: usize) -> Result<u64, StoreError> {
    if let Some(index) = write_errors(reply, len)?.first() {
        return Err(StoreError::Write {
            index: *index,
            code: DUPLICATE_KEY_CODE,
            message: "duplicate key without upsert".into(),
        });
    }
    reply_int(reply.get("n"))
        .map(|n| n as u64)
        .ok_or_else(|| StoreError::MalformedReply("missing n".into()))
}

impl MongoCollection {
    fn run_update(
        &self,
        operations: &[(Document, Document)],
        upsert: bool,
    ) -> Result<Document, StoreError> {
        let command = update_command(self.collection.name(), operations, upsert);
        Ok(self.database.run_command(command, None)?)
    }
}

impl VariantCollection for MongoCollection {
    fn upsert(&self, filter: Document, update: Document) -> Result<UpsertOutcome, StoreError> {
        let mut options = UpdateOptions::default();
        options.upsert = Some(true);
        match self.collection.update_one(filter, update, options) {
            Ok(result) if result.upserted_id.is_some() => Ok(UpsertOutcome::Inserted),
            Ok(_) => Ok(UpsertOutcome::Matched),
            Err(e) if is_duplicate_key(&e) => Ok(UpsertOutcome::DuplicateKey),
            Err(e) => Err(e.into()),
        }
    }

    fn bulk_upsert(
        &self,
        operations: Vec<(Document, Document)>,
    ) -> Result<Vec<UpsertOutcome>, StoreError> {
        let mut outcomes = Vec::with_capacity(operations.len());
        for batch in operations.chunks(self.batch_size) {
            let reply = self.run_update(batch, true)?;
            outcomes.extend(upsert_outcomes(&reply, batch.len())?);
        }
        Ok(outcomes)
    }

    fn update_one(&self, filter: Document, update: Document) -> Result<u64, StoreError> {
        Ok(self.collection.update_one(filter, update, None)?.matched_count)
    }

    fn bulk_update(&self, operations: Vec<(Document, Document)>) -> Result<u64, StoreError> {
        let mut matched = 0;
        for batch in operations.chunks(self.batch_size) {
            let reply = self.run_update(batch, false)?;
            matched += matched_count(&reply, batch.len())?;
        }
        Ok(matched)
    }

    fn update_many(&self, filter: Document, update: Document) -> Result<u64, StoreError> {
        Ok(self.collection.update_many(filter, update, None)?.matched_count)
    }

    fn delete_many(&self, filter: Document) -> Result<u64, StoreError> {
        Ok(self.collection.delete_many(filter, None)?.deleted_count)
    }

    fn find(&self, filter: Document, options: &QueryOptions) -> Result<Vec<Document>, StoreError> {
        let mut find_options = FindOptions::default();
        find_options.limit = options.limit;
        find_options.skip = options.skip;
        find_options.sort = options.sort_document();
        find_options.projection = options.projection();
        self.collection
            .find(filter, find_options)?
            .map(|doc| doc.map_err(StoreError::from))
            .collect()
    }

    fn count(&self, filter: Document) -> Result<u64, StoreError> {
        Ok(self
            .collection
            .count_documents(filter, CountOptions::default())?)
    }
}

/// Whether `err` is a duplicate key violation of a single write.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY_CODE
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn operations(n: usize) -> Vec<(Document, Document)> {
        (0..n)
            .map(|i| {
                (
                    doc! { "_id": format!("1:{}:A:T", i) },
                    doc! { "$set": { "start": i as i64 } },
                )
            })
            .collect()
    }

    #[test]
    fn update_command_is_unordered() {
        let command = update_command("variants", &operations(2), true);
        assert_eq!(command.keys().next().map(String::as_str), Some("update"));
        assert_eq!(command.get_str("update").ok(), Some("variants"));
        assert_eq!(command.get_bool("ordered").ok(), Some(false));
        let updates = command.get_array("updates").cloned().unwrap_or_default();
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[1],
            Bson::Document(doc! {
                "q": { "_id": "1:1:A:T" },
                "u": { "$set": { "start": 1_i64 } },
                "upsert": true,
                "multi": false,
            })
        );
    }

    #[test]
    fn mixed_batch_maps_outcomes_by_index() -> Result<(), StoreError> {
        let reply = doc! {
            "n": 2,
            "nModified": 1,
            "upserted": [{ "index": 0, "_id": "1:0:A:T" }],
            "writeErrors": [{ "index": 2, "code": 11000, "errmsg": "E11000 duplicate key" }],
            "ok": 1.0,
        };
        assert_eq!(
            upsert_outcomes(&reply, 3)?,
            vec![
                UpsertOutcome::Inserted,
                UpsertOutcome::Matched,
                UpsertOutcome::DuplicateKey
            ]
        );
        Ok(())
    }

    #[test]
    fn other_write_errors_fail() {
        let reply = doc! {
            "n": 1,
            "writeErrors": [{ "index": 1, "code": 121, "errmsg": "validation" }],
            "ok": 1.0,
        };
        assert!(matches!(
            upsert_outcomes(&reply, 2),
            Err(StoreError::Write { index: 1, code: 121, .. })
        ));
        assert!(matches!(
            upsert_outcomes(&doc! { "writeErrors": [{ "index": 5, "code": 11000 }] }, 2),
            Err(StoreError::MalformedReply(_))
        ));
    }

    #[test]
    fn matched_count_of_plain_updates() -> Result<(), StoreError> {
        assert_eq!(matched_count(&doc! { "n": 3_i64, "ok": 1.0 }, 4)?, 3);
        assert!(matches!(
            matched_count(&doc! { "ok": 1.0 }, 4),
            Err(StoreError::MalformedReply(_))
        ));
        Ok(())
    }
}
