use crate::{error::OpError, parallel};
use model::{core::value::Value, execution::output::GroupEntry, records::row::Row};
use std::collections::HashMap;

/// Groups rows by the tuple of key-column values, in declared key order.
/// Rows missing a key column or holding a null in any key are excluded
/// from every group. Groups come back in first-seen order.
pub fn group_rows(rows: &[Row], keys: &[String], workers: usize) -> Result<Vec<GroupEntry>, OpError> {
    if keys.is_empty() {
        return Err(OpError::NoKeys);
    }
    let slices = parallel::map_slices(rows, workers, |slice| group_slice(slice, keys))?;

    // Slices arrive in row order; folding them in sequence keeps both
    // first-seen group order and ascending member ids.
    let mut entries: Vec<GroupEntry> = Vec::new();
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    for slice in slices {
        for entry in slice {
            match index.get(&entry.key) {
                Some(&i) => entries[i].members.extend(entry.members),
                None => {
                    index.insert(entry.key.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }
    }
    Ok(entries)
}

fn group_slice(rows: &[Row], keys: &[String]) -> Vec<GroupEntry> {
    let mut entries: Vec<GroupEntry> = Vec::new();
    let mut index: HashMap<Vec<Value>, usize> = HashMap::new();
    for row in rows {
        let Some(key) = group_key(row, keys) else {
            continue;
        };
        match index.get(&key) {
            Some(&i) => entries[i].members.push(row.id),
            None => {
                index.insert(key.clone(), entries.len());
                entries.push(GroupEntry::new(key, vec![row.id]));
            }
        }
    }
    entries
}

fn group_key(row: &Row, keys: &[String]) -> Option<Vec<Value>> {
    let mut key = Vec::with_capacity(keys.len());
    for k in keys {
        let value = row.get(k)?;
        if value.is_null() {
            return None;
        }
        key.push(value.clone());
    }
    Some(key)
}
