//! Field projection for `$select`.

use crate::Record;

/// Project a stored record onto a select list; an empty list keeps every field.
///
/// Names match case-insensitively and keep the record's own spelling.
#[must_use]
pub fn project_record(record: &Record, fields: &[String]) -> Record {
    if fields.is_empty() {
        return record.clone();
    }
    record
        .iter()
        .filter(|(key, _)| fields.iter().any(|f| f.eq_ignore_ascii_case(key)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
