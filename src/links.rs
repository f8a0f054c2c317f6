use polars::prelude::*;

use crate::error::Result;
use crate::objects::ObjectIndex;
use crate::schema::{
    TableKind, CHILD_MAIN_ID, CHILD_OBJECT_IDREF, MAIN_ID, OBJECT_IDREF, PARENT_MAIN_ID,
    PARENT_OBJECT_IDREF,
};
use crate::table::Table;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RekeyReport {
    pub kept: usize,
    pub dropped: usize,
}

fn join_ids(frame: LazyFrame, objects: &ObjectIndex, key: &str, id: &str) -> Result<LazyFrame> {
    let index = objects.key_frame(key, id)?.lazy();
    Ok(frame.join(index, [col(key)], [col(key)], JoinArgs::new(JoinType::Left)))
}

fn rekey(table: &Table, kind: TableKind, joined: LazyFrame, resolved: Expr) -> Result<(Table, RekeyReport)> {
    let frame = joined.filter(resolved).collect()?;
    let keyed = Table::from_frame(kind.name(), frame).conform(&kind.columns())?;
    let report = RekeyReport { kept: keyed.len(), dropped: table.len() - keyed.len() };
    Ok((keyed, report))
}

/// Rewrites link rows keyed by `child_main_id`/`parent_main_id` to object
/// ids. Rows with either endpoint missing from `objects` are dropped.
pub fn resolve_links(links: &Table, objects: &ObjectIndex) -> Result<(Table, RekeyReport)> {
    let joined = join_ids(links.lazy(), objects, CHILD_MAIN_ID, CHILD_OBJECT_IDREF)?;
    let joined = join_ids(joined, objects, PARENT_MAIN_ID, PARENT_OBJECT_IDREF)?;
    let resolved = col(CHILD_OBJECT_IDREF).is_not_null().and(col(PARENT_OBJECT_IDREF).is_not_null());
    rekey(links, TableKind::HLink, joined, resolved)
}

pub fn attach_object_ids(table: &Table, objects: &ObjectIndex, kind: TableKind) -> Result<(Table, RekeyReport)> {
    let joined = join_ids(table.lazy(), objects, MAIN_ID, OBJECT_IDREF)?;
    rekey(table, kind, joined, col(OBJECT_IDREF).is_not_null())
}
