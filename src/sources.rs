use std::collections::{BTreeSet, HashMap};
use std::fmt;

use log::{debug, warn};
use polars::prelude::*;

use crate::error::Result;
use crate::schema::{ParameterSpec, TableKind};
use crate::table::{exprs, Table, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u32);

impl SourceId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceKey {
    pub reference: String,
    pub provider: String,
}

/// Deduplicated (reference, provider) pairs gathered before ids are assigned.
#[derive(Debug, Default, Clone)]
pub struct SourceCollector {
    keys: BTreeSet<SourceKey>,
}

impl SourceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: &str, provider: &str) -> bool {
        if reference.is_empty() {
            return false;
        }
        self.keys.insert(SourceKey { reference: reference.to_string(), provider: provider.to_string() })
    }

    /// Adds every non-null reference in `ref_columns` of `table`, attributed
    /// to `provider`, and returns how many were new. Known sources are never
    /// removed.
    pub fn collect(&mut self, table: &Table, ref_columns: &[&str], provider: &str) -> usize {
        let mut added = 0;
        for column in ref_columns {
            for cell in table.column_values(column) {
                if cell.as_str().is_some_and(|reference| self.insert(reference, provider)) {
                    added += 1;
                }
            }
        }
        added
    }

    pub fn collect_all_refs(&mut self, table: &Table, provider: &str) -> usize {
        let names = table.column_names();
        let ref_columns: Vec<&str> = names.iter().map(String::as_str).filter(|c| c.ends_with("_ref")).collect();
        self.collect(table, &ref_columns, provider)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn finish(self) -> SourceTable {
        let entries: Vec<SourceKey> = self.keys.into_iter().collect();
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), SourceId(i as u32 + 1)))
            .collect();
        SourceTable { entries, index }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    entries: Vec<SourceKey>,
    index: HashMap<SourceKey, SourceId>,
}

impl SourceTable {
    pub fn lookup(&self, reference: &str, provider: &str) -> Option<SourceId> {
        let key = SourceKey { reference: reference.to_string(), provider: provider.to_string() };
        self.index.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &SourceKey)> {
        self.entries.iter().enumerate().map(|(i, key)| (SourceId(i as u32 + 1), key))
    }

    fn lookup_frame(&self, provider: &str, ref_column: &str, source_column: &str) -> Result<DataFrame> {
        let (refs, ids): (Vec<&str>, Vec<i64>) = self
            .iter()
            .filter(|(_, key)| key.provider == provider)
            .map(|(id, key)| (key.reference.as_str(), i64::from(id.get())))
            .unzip();
        Ok(DataFrame::new(vec![Series::new(ref_column, refs), Series::new(source_column, ids)])?)
    }

    pub fn to_table(&self) -> Result<Table> {
        let rows: Vec<Vec<Value>> = self
            .iter()
            .map(|(id, key)| {
                vec![Value::text(&key.reference), Value::text(&key.provider), Value::Int(i64::from(id.get()))]
            })
            .collect();
        TableKind::Sources.with_rows(&rows)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatchReport {
    pub resolved: usize,
    /// Rows whose parameter value is absent; their source is cleared.
    pub withheld: usize,
    pub unreferenced: usize,
    /// Reference strings with no source row for this provider.
    pub unresolved: usize,
}

impl MatchReport {
    fn absorb(&mut self, other: MatchReport) {
        self.resolved += other.resolved;
        self.withheld += other.withheld;
        self.unreferenced += other.unreferenced;
        self.unresolved += other.unresolved;
    }

    fn tally(frame: &DataFrame, ref_column: &str, value_column: Option<&str>, source_column: &str) -> Result<Self> {
        let refs = frame.column(ref_column)?.str()?;
        let ids = frame.column(source_column)?.i64()?;
        let present: Vec<bool> = match value_column {
            Some(column) => frame.column(column)?.is_not_null().into_iter().map(|p| p == Some(true)).collect(),
            None => vec![true; frame.height()],
        };
        let mut report = MatchReport::default();
        for ((reference, id), present) in refs.into_iter().zip(ids.into_iter()).zip(present) {
            match (present, reference, id) {
                (false, _, _) => report.withheld += 1,
                (true, None, _) => report.unreferenced += 1,
                (true, Some(_), Some(_)) => report.resolved += 1,
                (true, Some(_), None) => report.unresolved += 1,
            }
        }
        Ok(report)
    }
}

/// Resolves the `<param>_ref` column of every listed parameter present in the
/// extract into `<param>_source_idref`, using only sources of `provider`. When
/// the extract carries `<param>_value`, rows with an absent value get no
/// source even if they cite one.
pub fn match_references(
    table: &Table,
    sources: &SourceTable,
    parameters: &[&ParameterSpec],
    provider: &str,
) -> Result<(Table, MatchReport)> {
    let mut matched = table.clone();
    let mut total = MatchReport::default();
    for parameter in parameters {
        let ref_column = parameter.ref_column();
        if !table.has_column(&ref_column) {
            continue;
        }
        let source_column = parameter.source_column();
        let value_column = parameter.value_column();
        let withholds = table.has_column(&value_column);

        let kept: Vec<String> = matched.column_names().into_iter().filter(|c| *c != source_column).collect();
        let lookup = sources.lookup_frame(provider, &ref_column, &source_column)?;
        let mut joined = matched.lazy().select(exprs(&kept)).join(
            lookup.lazy(),
            [col(&ref_column)],
            [col(&ref_column)],
            JoinArgs::new(JoinType::Left),
        );
        if withholds {
            joined = joined.with_column(
                when(col(&value_column).is_null())
                    .then(lit(NULL).cast(DataType::Int64))
                    .otherwise(col(&source_column))
                    .alias(&source_column),
            );
        }
        let frame = joined.collect()?;
        let report =
            MatchReport::tally(&frame, &ref_column, withholds.then_some(value_column.as_str()), &source_column)?;
        matched = Table::from_frame(table.name(), frame);

        if report.unresolved > 0 {
            warn!(
                "{}: {} '{}' reference(s) in {} have no matching source; left without source id",
                provider,
                report.unresolved,
                parameter.name,
                table.name()
            );
        }
        debug!(
            "{}: {} '{}' resolved={} withheld={} unreferenced={}",
            provider,
            table.name(),
            parameter.name,
            report.resolved,
            report.withheld,
            report.unreferenced
        );
        total.absorb(report);
    }
    Ok((matched, total))
}
