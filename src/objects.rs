use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use log::debug;
use polars::prelude::*;

use crate::error::{MergeError, Result};
use crate::ids::merge_ids;
use crate::schema::{TableKind, MAIN_ID};
use crate::table::{Table, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Star,
    System,
    Planet,
    Disk,
    Unknown,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Star => "star",
            ObjectType::System => "system",
            ObjectType::Planet => "planet",
            ObjectType::Disk => "disk",
            ObjectType::Unknown => "unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self != ObjectType::Unknown
    }
}

impl FromStr for ObjectType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "star" | "st" => Ok(ObjectType::Star),
            "system" | "sy" => Ok(ObjectType::System),
            "planet" | "pl" => Ok(ObjectType::Planet),
            "disk" | "di" => Ok(ObjectType::Disk),
            "" | "unknown" | "None" | "?" => Ok(ObjectType::Unknown),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRecord {
    pub main_id: String,
    pub ids: String,
    pub kind: ObjectType,
}

impl ObjectRecord {
    pub fn new(main_id: &str, ids: &str, kind: ObjectType) -> Self {
        Self { main_id: main_id.to_string(), ids: ids.to_string(), kind }
    }

    /// Reads an object extract. Rows without a `main_id` are skipped.
    pub fn from_table(table: &Table, provider: &str) -> Result<Vec<ObjectRecord>> {
        let main_ids = table.column_values(MAIN_ID);
        let ids = table.column_values("ids");
        let types = table.column_values("type");
        let mut records = Vec::with_capacity(table.len());
        for (row, main_id) in main_ids.iter().enumerate() {
            let Some(main_id) = main_id.as_str() else { continue };
            let ids = ids.get(row).and_then(Value::as_str).unwrap_or("");
            let raw_type = types.get(row).and_then(Value::as_str).unwrap_or("");
            let kind = raw_type.parse::<ObjectType>().map_err(|_| MergeError::InvalidCell {
                provider: provider.to_string(),
                table: TableKind::Objects.name().to_string(),
                column: "type".to_string(),
                row: row + 1,
                value: raw_type.to_string(),
                expected: "object type",
            })?;
            records.push(ObjectRecord::new(main_id, ids, kind));
        }
        Ok(records)
    }
}

/// Combines two records of the same `main_id`. The second record's type wins
/// unless it is unknown.
pub fn merge_pair(first: &ObjectRecord, second: &ObjectRecord) -> ObjectRecord {
    ObjectRecord {
        main_id: first.main_id.clone(),
        ids: merge_ids(&first.ids, &second.ids),
        kind: if second.kind.is_known() { second.kind } else { first.kind },
    }
}

pub fn merge_objects(first: Vec<ObjectRecord>, second: Vec<ObjectRecord>) -> Vec<ObjectRecord> {
    let mut merged: Vec<ObjectRecord> = Vec::with_capacity(first.len() + second.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in first.into_iter().chain(second) {
        match positions.get(&record.main_id) {
            Some(&pos) => merged[pos] = merge_pair(&merged[pos], &record),
            None => {
                positions.insert(record.main_id.clone(), merged.len());
                merged.push(record);
            }
        }
    }
    merged
}

#[derive(Debug, Default)]
pub struct ObjectMerger {
    records: Vec<ObjectRecord>,
    /// Fold position of the provider that first contributed each `main_id`.
    first_seen: HashMap<String, usize>,
    folds: usize,
}

impl ObjectMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, incoming: Vec<ObjectRecord>) {
        let rank = self.folds;
        self.folds += 1;
        let before = self.records.len();
        for record in &incoming {
            self.first_seen.entry(record.main_id.clone()).or_insert(rank);
        }
        let contributed = incoming.len();
        self.records = merge_objects(std::mem::take(&mut self.records), incoming);
        debug!(
            "Object fold {}: {} rows contributed, {} new objects, {} total",
            rank + 1,
            contributed,
            self.records.len() - before,
            self.records.len()
        );
    }

    /// Assigns dense ids 1..N: by the fold position that introduced the
    /// object, then alphabetically by `main_id`.
    pub fn finish(self) -> ObjectIndex {
        let first_seen = self.first_seen;
        let mut ordered = self.records;
        ordered.sort_by(|a, b| {
            let rank = |r: &ObjectRecord| first_seen.get(&r.main_id).copied().unwrap_or(usize::MAX);
            rank(a).cmp(&rank(b)).then_with(|| a.main_id.cmp(&b.main_id))
        });
        ObjectIndex::from_records(ordered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub fn get(self) -> u32 {
        self.0
    }

    pub fn to_value(self) -> Value {
        Value::Int(i64::from(self.0))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub id: ObjectId,
    pub main_id: String,
    pub ids: String,
    pub kind: ObjectType,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectIndex {
    objects: Vec<Object>,
    by_main_id: HashMap<String, ObjectId>,
}

impl ObjectIndex {
    fn from_records<I: IntoIterator<Item = ObjectRecord>>(records: I) -> Self {
        let mut index = ObjectIndex::default();
        for record in records {
            let id = ObjectId(index.objects.len() as u32 + 1);
            index.by_main_id.insert(record.main_id.clone(), id);
            index.objects.push(Object { id, main_id: record.main_id, ids: record.ids, kind: record.kind });
        }
        index
    }

    pub fn lookup(&self, main_id: &str) -> Option<ObjectId> {
        self.by_main_id.get(main_id).copied()
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        (id.0 as usize).checked_sub(1).and_then(|i| self.objects.get(i))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.objects.iter()
    }

    pub fn ids_of(&self, kinds: &[ObjectType], name: &str) -> Series {
        let ids: Vec<i64> =
            self.objects.iter().filter(|o| kinds.contains(&o.kind)).map(|o| i64::from(o.id.get())).collect();
        Series::new(name, ids)
    }

    pub fn key_frame(&self, key_column: &str, id_column: &str) -> Result<DataFrame> {
        let main_ids: Vec<&str> = self.objects.iter().map(|o| o.main_id.as_str()).collect();
        let ids: Vec<i64> = self.objects.iter().map(|o| i64::from(o.id.get())).collect();
        Ok(DataFrame::new(vec![Series::new(key_column, main_ids), Series::new(id_column, ids)])?)
    }

    pub fn to_table(&self) -> Result<Table> {
        let rows: Vec<Vec<Value>> = self
            .objects
            .iter()
            .map(|object| {
                vec![
                    object.id.to_value(),
                    Value::text(object.kind.as_str()),
                    Value::text(&object.ids),
                    Value::text(&object.main_id),
                ]
            })
            .collect();
        TableKind::Objects.with_rows(&rows)
    }
}
