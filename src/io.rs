use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use csv::{ReaderBuilder, Writer};
use flate2::read::GzDecoder;
use glob::glob;
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{PriorityList, ProviderConfig};
use crate::error::MergeError;
use crate::pipeline::{MergedTables, ProviderExtract};
use crate::schema::{TableKind, CHILD_MAIN_ID, MAIN_ID};
use crate::table::{Table, Value};

pub const MANIFEST_FILE: &str = "merge_manifest.json";

fn find_extract(dir: &Path, kind: TableKind) -> Option<PathBuf> {
    ["csv", "csv.gz"]
        .iter()
        .map(|ext| dir.join(format!("{}.{}", kind.name(), ext)))
        .find(|path| path.is_file())
}

fn open_extract(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).with_context(|| format!("Failed to open extract: {}", path.display()))?;
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(reader)
}

/// Parses one extract into a typed working table. Header names must be
/// declared for `kind`; every cell must parse as its column's type.
pub fn read_extract<R: Read>(reader: R, kind: TableKind, provider: &str) -> Result<Table> {
    let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let mut headers: Vec<String> = csv_reader
        .headers()
        .with_context(|| format!("{}: failed to read header of {} extract", provider, kind.name()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if kind == TableKind::HLink && !headers.iter().any(|h| h == CHILD_MAIN_ID) {
        if let Some(alias) = headers.iter_mut().find(|h| *h == MAIN_ID) {
            *alias = CHILD_MAIN_ID.to_string();
        }
    }

    let declared = kind.working_columns();
    let mut columns = Vec::with_capacity(headers.len());
    for header in &headers {
        let Some((_, column_type)) = declared.iter().find(|(c, _)| c == header) else {
            return Err(MergeError::UndeclaredColumn {
                provider: provider.to_string(),
                table: kind.name().to_string(),
                column: header.clone(),
            }
            .into());
        };
        columns.push((header.clone(), *column_type));
    }

    let mut rows = Vec::new();
    for (row_idx, record) in csv_reader.records().enumerate() {
        let record = record
            .with_context(|| format!("{}: malformed row {} in {} extract", provider, row_idx + 1, kind.name()))?;
        let mut row = Vec::with_capacity(record.len());
        for (raw, (column, column_type)) in record.iter().zip(&columns) {
            let value = Value::parse(raw, *column_type).ok_or_else(|| MergeError::InvalidCell {
                provider: provider.to_string(),
                table: kind.name().to_string(),
                column: column.clone(),
                row: row_idx + 1,
                value: raw.to_string(),
                expected: column_type.label(),
            })?;
            row.push(value);
        }
        rows.push(row);
    }
    let table = Table::from_rows(kind.name(), &columns, &rows)?;
    kind.validate(&table, provider)?;
    Ok(table)
}

fn warn_unrecognised_files(dir: &Path, provider: &str) -> Result<()> {
    let pattern = dir.join("*");
    let pattern_str = pattern.to_string_lossy();
    for path in glob(&pattern_str)?.filter_map(std::result::Result::ok) {
        if !path.is_file() {
            continue;
        }
        let file_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let stem = file_name.strip_suffix(".csv.gz").or_else(|| file_name.strip_suffix(".csv"));
        if stem.and_then(TableKind::from_name).is_none() {
            warn!("{}: ignoring unrecognised file {}", provider, path.display());
        }
    }
    Ok(())
}

pub fn provider_row(provider: &ProviderConfig, run_date: &str) -> std::result::Result<Table, MergeError> {
    TableKind::Provider.with_rows(&[vec![
        Value::text(&provider.name),
        Value::text(provider.url.as_deref().unwrap_or("")),
        Value::text(provider.bibcode.as_deref().unwrap_or("")),
        Value::text(provider.access.as_deref().unwrap_or(run_date)),
    ]])
}

/// Loads every extract found in a provider's input directory. Categories
/// without a file contribute nothing; a missing provider table is built from
/// the configuration.
pub fn load_provider(provider: &ProviderConfig, run_date: &str) -> Result<ProviderExtract> {
    let dir = &provider.input_dir;
    if !dir.is_dir() {
        anyhow::bail!("Input directory for provider '{}' not found: {}", provider.name, dir.display());
    }
    warn_unrecognised_files(dir, &provider.name)?;

    let mut extract = ProviderExtract::new(&provider.name);
    for kind in TableKind::ALL {
        let Some(path) = find_extract(dir, kind) else { continue };
        let reader = open_extract(&path)?;
        let table = read_extract(reader, kind, &provider.name)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        debug!("{}: loaded {} rows from {}", provider.name, table.len(), path.display());
        extract.insert(kind, table);
    }
    if extract.get(TableKind::Provider).is_none() {
        debug!("{}: no provider extract, using configured metadata", provider.name);
        extract.insert(TableKind::Provider, provider_row(provider, run_date)?);
    }
    Ok(extract)
}

pub fn write_tables(output_dir: &Path, merged: &MergedTables) -> Result<BTreeMap<String, usize>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;
    let mut counts = BTreeMap::new();
    for (kind, table) in merged.iter() {
        let file_path = output_dir.join(format!("{}.csv", kind.name()));
        let file = File::create(&file_path)
            .with_context(|| format!("Failed to create output file: {}", file_path.display()))?;
        let mut writer = Writer::from_writer(file);
        writer.write_record(table.column_names())?;
        for row in table.rows() {
            writer.write_record(row.iter().map(Value::render))?;
        }
        writer.flush().with_context(|| format!("Failed to flush {}", file_path.display()))?;
        counts.insert(kind.name().to_string(), table.len());
    }
    info!("Wrote {} tables to {}", counts.len(), output_dir.display());
    Ok(counts)
}

#[derive(Serialize, Debug)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub timestamp: String,
    pub priority_name: String,
    pub priority_version: String,
    pub priority_digest: String,
    pub providers: Vec<String>,
    pub rows: BTreeMap<String, usize>,
}

impl RunManifest {
    pub fn new(priority: &PriorityList, rows: BTreeMap<String, usize>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            priority_name: priority.name.clone(),
            priority_version: priority.version.clone(),
            priority_digest: priority.digest(),
            providers: priority.provider_names().map(str::to_string).collect(),
            rows,
        }
    }

    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(MANIFEST_FILE);
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
