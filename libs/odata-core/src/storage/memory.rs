use std::cmp::Ordering;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{Store, StoreError};
use crate::Record;
use crate::filter::{Predicate, compare_values};
use crate::query::{QueryParams, SortDir};
use crate::select::project_record;
use crate::wire::WireType;

/// Reference store keeping records in insertion order behind a lock.
pub struct InMemoryStore {
    key: String,
    key_type: WireType,
    records: RwLock<Vec<Record>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(key: impl Into<String>, key_type: WireType) -> Self {
        Self {
            key: key.into(),
            key_type,
            records: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_records(self, records: impl IntoIterator<Item = Record>) -> Self {
        self.records.write().extend(records);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn key_of<'r>(&self, record: &'r Record) -> &'r Value {
        record.get(&self.key).unwrap_or(&Value::Null)
    }

    fn position(&self, records: &[Record], key: &Value) -> Option<usize> {
        records
            .iter()
            .position(|r| compare_values(self.key_of(r), key) == Some(Ordering::Equal))
    }

    fn next_key(&self, records: &[Record]) -> Result<Value, StoreError> {
        if self.key_type.is_integer() {
            let max = records
                .iter()
                .filter_map(|r| self.key_of(r).as_i64())
                .max()
                .unwrap_or(0);
            let (_, ceiling) = self.key_type.integer_range();
            return max
                .checked_add(1)
                .filter(|next| *next <= ceiling)
                .map(Value::from)
                .ok_or_else(|| {
                    StoreError::Invalid(format!(
                        "no {} key left after {max} for '{}'",
                        self.key_type, self.key
                    ))
                });
        }
        if self.key_type == WireType::Guid {
            return Ok(Value::String(uuid::Uuid::new_v4().to_string()));
        }
        Err(StoreError::Invalid(format!(
            "missing key '{}' and {} keys are not generated",
            self.key, self.key_type
        )))
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order for sorting: values of different kinds order by kind.
fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare_values(a, b).unwrap_or(Ordering::Equal))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find(&self, query: &QueryParams) -> Result<Vec<Record>, StoreError> {
        let mut rows: Vec<Record> = self
            .records
            .read()
            .iter()
            .filter(|r| query.filter.evaluate(r))
            .cloned()
            .collect();

        if !query.order.is_empty() {
            // sort_by is stable: ties keep insertion order
            rows.sort_by(|a, b| {
                query.order.keys().fold(Ordering::Equal, |acc, key| {
                    acc.then_with(|| {
                        let left = a.get(&key.field).unwrap_or(&Value::Null);
                        let right = b.get(&key.field).unwrap_or(&Value::Null);
                        let ord = sort_cmp(left, right);
                        match key.dir {
                            SortDir::Asc => ord,
                            SortDir::Desc => ord.reverse(),
                        }
                    })
                })
            });
        }

        Ok(query
            .page(rows)
            .iter()
            .map(|r| project_record(r, &query.select))
            .collect())
    }

    async fn count(&self, filter: &Predicate) -> Result<u64, StoreError> {
        let n = self.records.read().iter().filter(|r| filter.evaluate(r)).count();
        Ok(u64::try_from(n).unwrap_or(u64::MAX))
    }

    async fn get(&self, key: &Value, select: &[String]) -> Result<Option<Record>, StoreError> {
        let records = self.records.read();
        Ok(self
            .position(&records, key)
            .map(|i| project_record(&records[i], select)))
    }

    async fn add(&self, mut record: Record) -> Result<Record, StoreError> {
        let mut records = self.records.write();
        let key = match record.get(&self.key) {
            None | Some(Value::Null) => self.next_key(&records)?,
            Some(existing) => existing.clone(),
        };
        if self.position(&records, &key).is_some() {
            return Err(StoreError::conflict(&key));
        }
        record.insert(self.key.clone(), key);
        records.push(record.clone());
        Ok(record)
    }

    async fn update(&self, key: &Value, patch: Record) -> Result<Record, StoreError> {
        let mut records = self.records.write();
        let idx = self
            .position(&records, key)
            .ok_or_else(|| StoreError::not_found(key))?;
        if let Some(new_key) = patch.get(&self.key)
            && compare_values(new_key, key) != Some(Ordering::Equal)
        {
            return Err(StoreError::Invalid(format!(
                "key '{}' cannot be changed",
                self.key
            )));
        }
        let record = &mut records[idx];
        for (field, value) in patch {
            record.insert(field, value);
        }
        Ok(record.clone())
    }

    async fn remove(&self, key: &Value) -> Result<(), StoreError> {
        let mut records = self.records.write();
        let idx = self
            .position(&records, key)
            .ok_or_else(|| StoreError::not_found(key))?;
        records.remove(idx);
        Ok(())
    }
}
