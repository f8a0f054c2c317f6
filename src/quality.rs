//! Best-measurement selection under the quality grade order.

use polars::prelude::*;

use crate::error::Result;
use crate::schema::ParameterSpec;
use crate::table::{exprs, Table};

const RANK: &str = "__quality_rank";
const BEST_RANK: &str = "__best_rank";
const SELECTED: &str = "__selected";
const SELECTED_PREFIX: &str = "__selected_";

/// Measurement quality grade, best first. Absent or unrecognised grades are
/// `Unknown`, which sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quality {
    A,
    B,
    C,
    D,
    E,
    Unknown,
}

impl Quality {
    pub fn parse(raw: Option<&str>) -> Quality {
        match raw.map(str::trim) {
            Some("A") => Quality::A,
            Some("B") => Quality::B,
            Some("C") => Quality::C,
            Some("D") => Quality::D,
            Some("E") => Quality::E,
            _ => Quality::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::A => "A",
            Quality::B => "B",
            Quality::C => "C",
            Quality::D => "D",
            Quality::E => "E",
            Quality::Unknown => "?",
        }
    }
}

fn ranked(measurements: &Table, parameter: &ParameterSpec) -> Result<DataFrame> {
    let ranks: Vec<u32> = match parameter.quality_column().filter(|q| measurements.has_column(q)) {
        Some(column) => measurements
            .frame()
            .column(&column)?
            .str()?
            .into_iter()
            .map(|grade| Quality::parse(grade) as u32)
            .collect(),
        None => vec![Quality::Unknown as u32; measurements.len()],
    };
    let mut frame = measurements.frame().clone();
    frame.with_column(Series::new(RANK, ranks))?;
    Ok(frame)
}

/// Selects one measurement of `parameter` per object (`key_column`): the first
/// row, in input order, at the best grade present for that object.
pub fn best(parameter: &ParameterSpec, measurements: &Table, key_column: &str) -> Result<Table> {
    let rows = ranked(measurements, parameter)?.lazy().filter(col(key_column).is_not_null());
    let best_ranks = rows.clone().group_by([col(key_column)]).agg([col(RANK).min().alias(BEST_RANK)]);
    let frame = rows
        .join(best_ranks, [col(key_column)], [col(key_column)], JoinArgs::new(JoinType::Left))
        .filter(col(RANK).eq(col(BEST_RANK)))
        .unique_stable(Some(vec![key_column.to_string()]), UniqueKeepStrategy::First)
        .select(exprs(&measurements.column_names()))
        .collect()?;
    Ok(Table::from_frame(measurements.name(), frame))
}

/// Collapses several basic rows of one object into one. Each parameter family
/// is taken from the best-graded row that actually carries it; families with
/// no carrier stay absent.
pub fn collapse_basic(table: &Table, parameters: &[&ParameterSpec], key_column: &str) -> Result<Table> {
    let mut collapsed = table
        .lazy()
        .select([col(key_column)])
        .filter(col(key_column).is_not_null())
        .unique_stable(None, UniqueKeepStrategy::First);
    for parameter in parameters {
        if !table.has_column(parameter.primary) {
            continue;
        }
        let carriers = table.lazy().filter(col(parameter.primary).is_not_null()).collect()?;
        let chosen = best(parameter, &Table::from_frame(table.name(), carriers), key_column)?;
        let mut family = vec![key_column.to_string()];
        family.extend(parameter.column_names().filter(|c| table.has_column(c)).map(str::to_string));
        collapsed = collapsed.join(
            chosen.lazy().select(exprs(&family)),
            [col(key_column)],
            [col(key_column)],
            JoinArgs::new(JoinType::Left),
        );
    }
    let frame = collapsed.collect()?;
    Table::from_frame(table.name(), frame).conform(&table.columns())
}

/// Writes the selected measurements into `basic`, replacing the parameter's
/// columns of the matching object row. Basic rows without a selection keep
/// their values. Selected objects without a basic row get a new row only when
/// `append_missing` is set. Returns the spliced table and the number of rows
/// updated or added.
pub fn splice(
    basic: &Table,
    selected: &Table,
    parameter: &ParameterSpec,
    key_column: &str,
    append_missing: bool,
) -> Result<(Table, usize)> {
    let shape = basic.columns();
    let family: Vec<&str> =
        parameter.column_names().filter(|c| basic.has_column(c) && selected.has_column(c)).collect();
    let staged = |c: &str| format!("{SELECTED_PREFIX}{c}");

    let mut incoming = vec![col(key_column)];
    incoming.extend(family.iter().map(|&c| col(c).alias(&staged(c))));
    incoming.push(lit(true).alias(SELECTED));
    let incoming = selected.lazy().filter(col(key_column).is_not_null()).select(incoming);

    let updates: Vec<Expr> = family
        .iter()
        .map(|&c| when(col(SELECTED).is_not_null()).then(col(&staged(c))).otherwise(col(c)).alias(c))
        .collect();
    let frame = basic
        .lazy()
        .join(incoming, [col(key_column)], [col(key_column)], JoinArgs::new(JoinType::Left))
        .with_columns(updates)
        .collect()?;
    let marks = frame.column(SELECTED)?;
    let mut touched = marks.len() - marks.null_count();
    let mut spliced = Table::from_frame(basic.name(), frame).conform(&shape)?;

    if append_missing {
        let mut carried = vec![key_column.to_string()];
        carried.extend(family.iter().map(|c| c.to_string()));
        let candidates = Table::from_frame(basic.name(), selected.lazy().select(exprs(&carried)).collect()?);
        let present = basic.frame().column(key_column)?;
        let fresh = candidates.filter_by_keys(key_column, present, false)?;
        touched += fresh.len();
        spliced = Table::union(basic.name(), &shape, &[spliced, fresh])?;
    }
    Ok((spliced, touched))
}
