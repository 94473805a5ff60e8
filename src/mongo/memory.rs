//! In-memory `VariantCollection` covering the subset of MongoDB semantics used here.

use std::cell::RefCell;

use mongodb::bson::{Bson, Document};

use super::collection::{StoreError, UpsertOutcome, VariantCollection};
use super::query::QueryOptions;

/// Documents kept in insertion order with a unique `_id`.
#[derive(Debug, Default)]
pub struct MemoryCollection {
    docs: RefCell<Vec<Document>>,
}

fn unsupported(what: impl ToString) -> StoreError {
    StoreError::Unsupported(what.to_string())
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn bson_eq(lhs: &Bson, rhs: &Bson) -> bool {
    match (as_f64(lhs), as_f64(rhs)) {
        (Some(lhs), Some(rhs)) => lhs == rhs,
        _ => match (lhs, rhs) {
            (Bson::Document(lhs), Bson::Document(rhs)) => {
                lhs.len() == rhs.len()
                    && lhs
                        .iter()
                        .zip(rhs.iter())
                        .all(|((lk, lv), (rk, rv))| lk == rk && bson_eq(lv, rv))
            }
            (Bson::Array(lhs), Bson::Array(rhs)) => {
                lhs.len() == rhs.len() && lhs.iter().zip(rhs.iter()).all(|(l, r)| bson_eq(l, r))
            }
            _ => lhs == rhs,
        },
    }
}

fn collect_values<'a>(value: &'a Bson, parts: &[&str], out: &mut Vec<&'a Bson>) {
    match parts.split_first() {
        None => out.push(value),
        Some((head, rest)) => match value {
            Bson::Document(doc) => {
                if let Some(value) = doc.get(*head) {
                    collect_values(value, rest, out);
                }
            }
            Bson::Array(values) => match head.parse::<usize>() {
                Ok(i) => {
                    if let Some(value) = values.get(i) {
                        collect_values(value, rest, out);
                    }
                }
                Err(_) => values.iter().for_each(|v| collect_values(v, parts, out)),
            },
            _ => (),
        },
    }
}

fn values_at<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let parts = path.split('.').collect::<Vec<_>>();
    let mut result = Vec::new();
    if let Some(value) = doc.get(parts[0]) {
        collect_values(value, &parts[1..], &mut result);
    }
    result
}

/// Whether any value or any element of an array value equals `expected`.
fn any_eq(values: &[&Bson], expected: &Bson) -> bool {
    values.iter().any(|value| {
        bson_eq(value, expected)
            || matches!(value, Bson::Array(items) if items.iter().any(|i| bson_eq(i, expected)))
    })
}

fn scalars<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    values
        .iter()
        .flat_map(|value| match value {
            Bson::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![*other],
        })
        .collect()
}

fn is_operator(doc: &Document) -> bool {
    doc.keys().next().map_or(false, |k| k.starts_with('$'))
}

fn matches_condition(values: &[&Bson], condition: &Bson) -> Result<bool, StoreError> {
    let ops = match condition {
        Bson::Document(doc) if is_operator(doc) => doc,
        _ => return Ok(any_eq(values, condition)),
    };
    for (op, arg) in ops {
        let ok = match op.as_str() {
            "$eq" => any_eq(values, arg),
            "$ne" => !any_eq(values, arg),
            "$in" => match arg {
                Bson::Array(items) => items.iter().any(|item| any_eq(values, item)),
                _ => return Err(unsupported("$in needs an array")),
            },
            "$size" => {
                let size = as_f64(arg).ok_or_else(|| unsupported("$size needs a number"))?;
                values
                    .iter()
                    .any(|v| matches!(v, Bson::Array(items) if items.len() as f64 == size))
            }
            "$exists" => {
                let present = values.iter().any(|v| !matches!(v, Bson::Null));
                present == matches!(arg, Bson::Boolean(true))
            }
            "$gt" | "$gte" | "$lt" | "$lte" => {
                let rhs = as_f64(arg).ok_or_else(|| unsupported("comparison needs a number"))?;
                scalars(values).iter().filter_map(|v| as_f64(v)).any(|lhs| match op.as_str() {
                    "$gt" => lhs > rhs,
                    "$gte" => lhs >= rhs,
                    "$lt" => lhs < rhs,
                    _ => lhs <= rhs,
                })
            }
            "$regex" => {
                let pattern = arg.as_str().ok_or_else(|| unsupported("$regex needs a string"))?;
                let re = regex::Regex::new(pattern).map_err(unsupported)?;
                scalars(values)
                    .iter()
                    .filter_map(|v| v.as_str())
                    .any(|s| re.is_match(s))
            }
            "$elemMatch" => {
                let sub = arg
                    .as_document()
                    .ok_or_else(|| unsupported("$elemMatch needs a document"))?;
                let mut found = false;
                for value in values {
                    if let Bson::Array(items) = value {
                        for item in items {
                            if let Bson::Document(item) = item {
                                if matches(item, sub)? {
                                    found = true;
                                }
                            }
                        }
                    }
                }
                found
            }
            other => return Err(unsupported(other)),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_filters(arg: &Bson) -> Result<Vec<&Document>, StoreError> {
    arg.as_array()
        .ok_or_else(|| unsupported("logical operator needs an array"))?
        .iter()
        .map(|f| f.as_document().ok_or_else(|| unsupported("expected filter document")))
        .collect()
}

/// Whether `doc` matches `filter`.
pub fn matches(doc: &Document, filter: &Document) -> Result<bool, StoreError> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(condition)? {
                    all &= matches(doc, sub)?;
                }
                all
            }
            "$or" | "$nor" => {
                let mut any = false;
                for sub in sub_filters(condition)? {
                    any |= matches(doc, sub)?;
                }
                if key == "$or" {
                    any
                } else {
                    !any
                }
            }
            path => matches_condition(&values_at(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn slot<'a>(doc: &'a mut Document, path: &str) -> Result<&'a mut Bson, StoreError> {
    let mut parts = path.split('.');
    let first = parts.next().unwrap_or_default();
    let mut current: &mut Bson = doc.entry(first.to_owned()).or_insert(Bson::Null);
    for part in parts {
        if matches!(current, Bson::Null) {
            *current = Bson::Document(Document::new());
        }
        current = match current {
            Bson::Document(sub) => sub.entry(part.to_owned()).or_insert(Bson::Null),
            Bson::Array(items) => {
                let i = part
                    .parse::<usize>()
                    .map_err(|_| unsupported(format!("bad array index in {}", path)))?;
                items
                    .get_mut(i)
                    .ok_or_else(|| unsupported(format!("no element {} in {}", i, path)))?
            }
            _ => return Err(unsupported(format!("cannot descend into {}", path))),
        };
    }
    Ok(current)
}

/// Replace a positional `$` with the index of the first array element matching `filter`.
fn resolve_positional(doc: &Document, filter: &Document, path: &str) -> Result<String, StoreError> {
    let Some(pos) = path.find(".$") else {
        return Ok(path.to_owned());
    };
    let array_path = &path[..pos];
    let prefix = format!("{}.", array_path);
    let mut sub = Document::new();
    for (key, condition) in filter {
        if let Some(rest) = key.strip_prefix(&prefix) {
            sub.insert(rest, condition.clone());
        }
    }
    let items = values_at(doc, array_path)
        .into_iter()
        .find_map(|v| v.as_array())
        .ok_or_else(|| unsupported(format!("no array at {}", array_path)))?;
    for (i, item) in items.iter().enumerate() {
        if let Bson::Document(item) = item {
            if matches(item, &sub)? {
                return Ok(format!("{}.{}{}", array_path, i, &path[pos + 2..]));
            }
        }
    }
    Err(unsupported(format!("positional operator did not match in {}", path)))
}

fn array_slot<'a>(doc: &'a mut Document, path: &str) -> Result<&'a mut Vec<Bson>, StoreError> {
    let target = slot(doc, path)?;
    if matches!(target, Bson::Null) {
        *target = Bson::Array(Vec::new());
    }
    match target {
        Bson::Array(items) => Ok(items),
        _ => Err(unsupported(format!("{} is not an array", path))),
    }
}

fn each_items(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(doc) if doc.contains_key("$each") => doc
            .get_array("$each")
            .map(|items| items.clone())
            .unwrap_or_default(),
        other => vec![other.clone()],
    }
}

fn apply(
    doc: &mut Document,
    filter: &Document,
    update: &Document,
    inserting: bool,
) -> Result<(), StoreError> {
    for (op, fields) in update {
        let fields = fields
            .as_document()
            .ok_or_else(|| unsupported(format!("{} needs a document", op)))?;
        for (path, value) in fields {
            let path = resolve_positional(doc, filter, path)?;
            match op.as_str() {
                "$setOnInsert" => {
                    if inserting {
                        *slot(doc, &path)? = value.clone();
                    }
                }
                "$set" => *slot(doc, &path)? = value.clone(),
                "$push" => array_slot(doc, &path)?.extend(each_items(value)),
                "$addToSet" => {
                    let items = array_slot(doc, &path)?;
                    for item in each_items(value) {
                        if !items.iter().any(|existing| bson_eq(existing, &item)) {
                            items.push(item);
                        }
                    }
                }
                "$pull" => {
                    // Pulling from a missing field is a no-op.
                    if values_at(doc, &path).is_empty() {
                        continue;
                    }
                    let items = array_slot(doc, &path)?;
                    let mut kept = Vec::with_capacity(items.len());
                    for item in items.drain(..) {
                        let pulled = match (&item, value) {
                            (_, Bson::Document(condition)) if is_operator(condition) => {
                                matches_condition(&[&item], value)?
                            }
                            (Bson::Document(item), Bson::Document(condition)) => {
                                matches(item, condition)?
                            }
                            (item, value) => bson_eq(item, value),
                        };
                        if !pulled {
                            kept.push(item);
                        }
                    }
                    *items = kept;
                }
                other => return Err(unsupported(other)),
            }
        }
    }
    Ok(())
}

/// Equality fields of `filter` seeding an upserted document.
fn seed(filter: &Document) -> Document {
    let mut result = Document::new();
    for (key, value) in filter {
        let is_operator = matches!(value, Bson::Document(d) if d.keys().any(|k| k.starts_with('$')));
        if !key.starts_with('$') && !key.contains('.') && !is_operator {
            result.insert(key.clone(), value.clone());
        }
    }
    result
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: Document) {
        self.docs.borrow_mut().push(doc);
    }

    pub fn all(&self) -> Vec<Document> {
        self.docs.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.docs
            .borrow()
            .iter()
            .find(|doc| doc.get_str("_id").ok() == Some(id))
            .cloned()
    }

    fn update(&self, filter: &Document, update: &Document, many: bool) -> Result<u64, StoreError> {
        let mut docs = self.docs.borrow_mut();
        let mut count = 0;
        for doc in docs.iter_mut() {
            if matches(doc, filter)? {
                apply(doc, filter, update, false)?;
                count += 1;
                if !many {
                    break;
                }
            }
        }
        Ok(count)
    }
}

impl VariantCollection for MemoryCollection {
    fn upsert(&self, filter: Document, update: Document) -> Result<UpsertOutcome, StoreError> {
        if self.update(&filter, &update, false)? > 0 {
            return Ok(UpsertOutcome::Matched);
        }
        let mut doc = seed(&filter);
        apply(&mut doc, &filter, &update, true)?;
        let id = doc.get("_id").cloned();
        let mut docs = self.docs.borrow_mut();
        if docs
            .iter()
            .any(|existing| existing.get("_id").cloned() == id)
        {
            return Ok(UpsertOutcome::DuplicateKey);
        }
        docs.push(doc);
        Ok(UpsertOutcome::Inserted)
    }

    fn update_one(&self, filter: Document, update: Document) -> Result<u64, StoreError> {
        self.update(&filter, &update, false)
    }

    fn update_many(&self, filter: Document, update: Document) -> Result<u64, StoreError> {
        self.update(&filter, &update, true)
    }

    fn delete_many(&self, filter: Document) -> Result<u64, StoreError> {
        let mut docs = self.docs.borrow_mut();
        let before = docs.len();
        let mut kept = Vec::with_capacity(before);
        for doc in docs.drain(..) {
            if !matches(&doc, &filter)? {
                kept.push(doc);
            }
        }
        *docs = kept;
        Ok((before - docs.len()) as u64)
    }

    fn find(&self, filter: Document, options: &QueryOptions) -> Result<Vec<Document>, StoreError> {
        let mut result = Vec::new();
        for doc in self.docs.borrow().iter() {
            if matches(doc, &filter)? {
                result.push(doc.clone());
            }
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options
            .limit
            .filter(|l| *l > 0)
            .map_or(usize::MAX, |l| l as usize);
        Ok(result.into_iter().skip(skip).take(limit).collect())
    }

    fn count(&self, filter: Document) -> Result<u64, StoreError> {
        Ok(self.find(filter, &QueryOptions::default())?.len() as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mongodb::bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn filters_on_nested_arrays() -> Result<(), anyhow::Error> {
        let doc = doc! {
            "_id": "1:100:A:T",
            "studies": [{"sid": 1_i64, "gt": {"0/1": [5_i64, 7_i64]}}],
        };
        assert!(matches(&doc, &doc! {"studies.sid": 1})?);
        assert!(matches(&doc, &doc! {"studies.gt.0/1": 7_i64})?);
        assert!(!matches(&doc, &doc! {"studies.sid": {"$ne": 1_i64}})?);
        assert!(matches(&doc, &doc! {"studies": {"$size": 1}})?);
        assert!(matches(
            &doc,
            &doc! {"studies": {"$elemMatch": {"sid": {"$in": [1_i64, 2_i64]}}}}
        )?);
        Ok(())
    }

    #[test]
    fn positional_add_to_set() -> Result<(), anyhow::Error> {
        let collection = MemoryCollection::new();
        collection.insert(doc! {
            "_id": "x",
            "studies": [{"sid": 1_i64, "gt": {}}, {"sid": 2_i64, "gt": {"0/1": [5_i64]}}],
        });
        let matched = collection.update_one(
            doc! {"_id": "x", "studies.sid": 2_i64},
            doc! {"$addToSet": {"studies.$.gt.0/1": {"$each": [5_i64, 6_i64]}}},
        )?;
        assert_eq!(matched, 1);
        let doc = collection.get("x").ok_or_else(|| anyhow::anyhow!("missing"))?;
        assert_eq!(
            doc.get_array("studies")?[1],
            Bson::Document(doc! {"sid": 2_i64, "gt": {"0/1": [5_i64, 6_i64]}})
        );
        Ok(())
    }

    #[test]
    fn positional_pull_in() -> Result<(), anyhow::Error> {
        let collection = MemoryCollection::new();
        collection.insert(doc! {
            "_id": "x",
            "studies": [{"sid": 1_i64, "gt": {"?/?": [5_i64, 6_i64, 7_i64]}}],
        });
        collection.update_one(
            doc! {"_id": "x", "studies.sid": 1_i64},
            doc! {
                "$pull": {
                    "studies.$.gt.?/?": {"$in": [5_i64, 7_i64]},
                    "studies.$.gt.1/1": {"$in": [5_i64]},
                },
            },
        )?;
        let doc = collection.get("x").ok_or_else(|| anyhow::anyhow!("missing"))?;
        assert_eq!(
            doc.get_array("studies")?[0],
            Bson::Document(doc! {"sid": 1_i64, "gt": {"?/?": [6_i64]}})
        );
        Ok(())
    }

    #[test]
    fn upsert_duplicate_key() -> Result<(), anyhow::Error> {
        let collection = MemoryCollection::new();
        let filter = doc! {"_id": "x", "studies.sid": {"$ne": 1_i64}};
        let update = doc! {"$push": {"studies": {"sid": 1_i64}}};
        assert_eq!(
            collection.upsert(filter.clone(), update.clone())?,
            UpsertOutcome::Inserted
        );
        assert_eq!(
            collection.upsert(filter, update)?,
            UpsertOutcome::DuplicateKey
        );
        assert_eq!(collection.all().len(), 1);
        Ok(())
    }
}
