//! Named polars frames plus the typed cell view the merge stages share.

use polars::prelude::*;

use crate::error::Result;

const MATCHED: &str = "__matched";

static NULL_CELL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    Float,
    Text,
}

impl ColumnType {
    pub fn label(self) -> &'static str {
        match self {
            ColumnType::Int => "integer",
            ColumnType::Float => "float",
            ColumnType::Text => "text",
        }
    }

    pub fn dtype(self) -> DataType {
        match self {
            ColumnType::Int => DataType::Int64,
            ColumnType::Float => DataType::Float64,
            ColumnType::Text => DataType::String,
        }
    }

    fn of(dtype: &DataType) -> ColumnType {
        if dtype.is_integer() {
            ColumnType::Int
        } else if dtype.is_float() {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Parses a raw cell. Empty cells and NaN become `Null`; `None` means the
    /// text is not a valid value of `kind`.
    pub fn parse(raw: &str, kind: ColumnType) -> Option<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Some(Value::Null);
        }
        match kind {
            ColumnType::Int => trimmed.parse::<i64>().ok().map(Value::Int),
            ColumnType::Float => trimmed.parse::<f64>().ok().map(|f| {
                if f.is_nan() { Value::Null } else { Value::Float(f) }
            }),
            ColumnType::Text => Some(Value::Text(trimmed.to_string())),
        }
    }

    pub fn text(s: &str) -> Value {
        if s.is_empty() { Value::Null } else { Value::Text(s.to_string()) }
    }

    fn from_any(cell: AnyValue<'_>) -> Value {
        match cell {
            AnyValue::Null => Value::Null,
            AnyValue::Int64(i) => Value::Int(i),
            AnyValue::Int32(i) => Value::Int(i64::from(i)),
            AnyValue::UInt32(u) => Value::Int(i64::from(u)),
            AnyValue::Float64(f) => Value::Float(f),
            AnyValue::String(s) => Value::text(s),
            other => Value::text(&other.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Cell text as written to CSV. Null renders as an empty cell.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
        }
    }
}

fn build_series<'a, I: Iterator<Item = &'a Value>>(name: &str, kind: ColumnType, cells: I) -> Series {
    match kind {
        ColumnType::Int => Series::new(name, cells.map(Value::as_int).collect::<Vec<_>>()),
        ColumnType::Float => Series::new(name, cells.map(Value::as_float).collect::<Vec<_>>()),
        ColumnType::Text => Series::new(name, cells.map(Value::as_str).collect::<Vec<_>>()),
    }
}

pub fn exprs(names: &[String]) -> Vec<Expr> {
    names.iter().map(|name| col(name.as_str())).collect()
}

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    frame: DataFrame,
}

impl Table {
    pub fn from_frame(name: &str, frame: DataFrame) -> Self {
        Self { name: name.to_string(), frame }
    }

    pub fn empty<S: AsRef<str>>(name: &str, columns: &[(S, ColumnType)]) -> Result<Self> {
        let series = columns.iter().map(|(c, kind)| Series::new_empty(c.as_ref(), &kind.dtype())).collect();
        Ok(Self::from_frame(name, DataFrame::new(series)?))
    }

    /// Builds a table from row-major cells. Short rows are padded with nulls.
    pub fn from_rows<S: AsRef<str>>(name: &str, columns: &[(S, ColumnType)], rows: &[Vec<Value>]) -> Result<Self> {
        let series = columns
            .iter()
            .enumerate()
            .map(|(i, (c, kind))| {
                build_series(c.as_ref(), *kind, rows.iter().map(|row| row.get(i).unwrap_or(&NULL_CELL)))
            })
            .collect();
        Ok(Self::from_frame(name, DataFrame::new(series)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn lazy(&self) -> LazyFrame {
        self.frame.clone().lazy()
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame.get_column_names().iter().map(|c| c.to_string()).collect()
    }

    pub fn columns(&self) -> Vec<(String, ColumnType)> {
        self.frame.get_columns().iter().map(|s| (s.name().to_string(), ColumnType::of(s.dtype()))).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<Value> {
        let series = self.frame.column(column).ok()?;
        series.get(row).ok().map(Value::from_any)
    }

    pub fn text(&self, row: usize, column: &str) -> Option<String> {
        match self.value(row, column)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn column_values(&self, column: &str) -> Vec<Value> {
        self.frame
            .column(column)
            .map(|s| (0..s.len()).map(|i| s.get(i).map_or(Value::Null, Value::from_any)).collect())
            .unwrap_or_default()
    }

    pub fn rows(&self) -> Vec<Vec<Value>> {
        let columns = self.frame.get_columns();
        (0..self.len())
            .map(|row| columns.iter().map(|s| s.get(row).map_or(Value::Null, Value::from_any)).collect())
            .collect()
    }

    /// Projects onto `shape`. Missing columns become typed nulls, columns
    /// unknown to `shape` are dropped.
    pub fn conform<S: AsRef<str>>(&self, shape: &[(S, ColumnType)]) -> Result<Table> {
        let height = self.frame.height();
        let mut columns = Vec::with_capacity(shape.len());
        for (name, kind) in shape {
            let name = name.as_ref();
            let dtype = kind.dtype();
            columns.push(match self.frame.column(name) {
                Ok(existing) => existing.cast(&dtype)?,
                Err(_) => Series::full_null(name, height, &dtype),
            });
        }
        Ok(Self::from_frame(&self.name, DataFrame::new(columns)?))
    }

    pub fn union<S: AsRef<str>>(name: &str, shape: &[(S, ColumnType)], parts: &[Table]) -> Result<Table> {
        let mut frames = vec![Table::empty(name, shape)?.frame.lazy()];
        for part in parts {
            frames.push(part.conform(shape)?.frame.lazy());
        }
        let frame = concat(&frames, UnionArgs::default())?.collect()?;
        Ok(Self::from_frame(name, frame))
    }

    /// Drops exact duplicate rows, keeping the first occurrence. Also returns
    /// the number of rows removed.
    pub fn dedup(&self) -> Result<(Table, usize)> {
        let frame = self.lazy().unique_stable(None, UniqueKeepStrategy::First).collect()?;
        let removed = self.len() - frame.height();
        Ok((Self::from_frame(&self.name, frame), removed))
    }

    /// Rows whose `key` is among `keys` when `keep` is set, otherwise the rows
    /// whose `key` is not. Row order is preserved.
    pub fn filter_by_keys(&self, key: &str, keys: &Series, keep: bool) -> Result<Table> {
        let keys = keys.cast(self.frame.column(key)?.dtype())?.with_name(key);
        let lookup = DataFrame::new(vec![keys])?
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .with_column(lit(true).alias(MATCHED));
        let matched = if keep { col(MATCHED).is_not_null() } else { col(MATCHED).is_null() };
        let frame = self
            .lazy()
            .join(lookup, [col(key)], [col(key)], JoinArgs::new(JoinType::Left))
            .filter(matched)
            .select(exprs(&self.column_names()))
            .collect()?;
        Ok(Self::from_frame(&self.name, frame))
    }

    /// Rewrites null cells and cells spelled as one of `tokens` in `column` to
    /// `canonical`. Also returns the number of cells rewritten.
    pub fn replace_tokens(&self, column: &str, tokens: &[String], canonical: &str) -> Result<(Table, usize)> {
        let Ok(series) = self.frame.column(column) else { return Ok((self.clone(), 0)) };
        let replaced = series
            .str()?
            .into_iter()
            .filter(|cell| cell.map_or(true, |s| tokens.iter().any(|t| t == s)))
            .count();
        let placeholder = tokens
            .iter()
            .fold(col(column).is_null(), |hit, token| hit.or(col(column).eq(lit(token.as_str()))));
        let frame = self
            .lazy()
            .with_column(when(placeholder).then(lit(canonical)).otherwise(col(column)).alias(column))
            .collect()?;
        Ok((Self::from_frame(&self.name, frame), replaced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> Vec<(&'static str, ColumnType)> {
        vec![("main_id", ColumnType::Text), ("teff", ColumnType::Float)]
    }

    fn sample() -> Table {
        Table::from_rows(
            "sample",
            &shape(),
            &[vec![Value::text("Sun"), Value::Float(5772.0)], vec![Value::text("Vega")]],
        )
        .unwrap()
    }

    #[test]
    fn parse_respects_column_type() {
        assert_eq!(Value::parse("42", ColumnType::Int), Some(Value::Int(42)));
        assert_eq!(Value::parse("4.5", ColumnType::Int), None);
        assert_eq!(Value::parse(" ", ColumnType::Float), Some(Value::Null));
        assert_eq!(Value::parse("nan", ColumnType::Float), Some(Value::Null));
        assert_eq!(Value::parse(" A ", ColumnType::Text), Some(Value::text("A")));
    }

    #[test]
    fn rows_round_trip_through_the_frame() {
        let table = sample();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1], vec![Value::text("Vega"), Value::Null]);
        assert_eq!(table.columns()[1], ("teff".to_string(), ColumnType::Float));
    }

    #[test]
    fn conform_fills_missing_and_drops_unknown() {
        let out = sample().conform(&[("teff", ColumnType::Float), ("qual", ColumnType::Text)]).unwrap();
        assert_eq!(out.column_names(), vec!["teff", "qual"]);
        assert_eq!(out.rows()[0], vec![Value::Float(5772.0), Value::Null]);
        assert_eq!(out.columns()[1].1, ColumnType::Text);
    }

    #[test]
    fn union_stacks_parts_in_order_under_one_shape() {
        let extra = Table::from_rows("extra", &[("main_id", ColumnType::Text)], &[vec![Value::text("Altair")]]).unwrap();
        let stacked = Table::union("stars", &shape(), &[sample(), extra]).unwrap();
        assert_eq!(stacked.name(), "stars");
        assert_eq!(
            stacked.column_values("main_id"),
            vec![Value::text("Sun"), Value::text("Vega"), Value::text("Altair")]
        );
        assert_eq!(stacked.value(2, "teff"), Some(Value::Null));

        let empty = Table::union("stars", &shape(), &[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.column_names(), vec!["main_id", "teff"]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let doubled = Table::union("sample", &shape(), &[sample(), sample()]).unwrap();
        let (unique, removed) = doubled.dedup().unwrap();
        assert_eq!(removed, 2);
        assert_eq!(unique.column_values("main_id"), vec![Value::text("Sun"), Value::text("Vega")]);
    }

    #[test]
    fn filter_by_keys_keeps_or_drops_members_in_row_order() {
        let keys = Series::new("main_id", &["Vega", "Deneb"]);
        let kept = sample().filter_by_keys("main_id", &keys, true).unwrap();
        assert_eq!(kept.column_values("main_id"), vec![Value::text("Vega")]);
        let dropped = sample().filter_by_keys("main_id", &keys, false).unwrap();
        assert_eq!(dropped.column_values("main_id"), vec![Value::text("Sun")]);
        assert_eq!(dropped.column_names(), vec!["main_id", "teff"]);
    }

    #[test]
    fn replace_tokens_rewrites_nulls_and_spellings() {
        let rows: Vec<Vec<Value>> = ["A", "N", "N/A", ""].iter().map(|q| vec![Value::text(q)]).collect();
        let table = Table::from_rows("q", &[("qual", ColumnType::Text)], &rows).unwrap();
        let tokens = vec!["N".to_string(), "N/A".to_string()];
        let (rewritten, replaced) = table.replace_tokens("qual", &tokens, "?").unwrap();
        assert_eq!(replaced, 3);
        let quals: Vec<_> = (0..rewritten.len()).filter_map(|r| rewritten.text(r, "qual")).collect();
        assert_eq!(quals, vec!["A", "?", "?", "?"]);
    }
}
