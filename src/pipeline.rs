//! Category-by-category merge of provider extracts into the final table set.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};
use polars::prelude::*;

use crate::config::NullValues;
use crate::error::Result;
use crate::links::{attach_object_ids, resolve_links};
use crate::objects::{ObjectIndex, ObjectMerger, ObjectRecord, ObjectType};
use crate::quality::{best, collapse_basic, splice};
use crate::schema::{TableKind, OBJECT_IDREF};
use crate::sources::{match_references, SourceCollector, SourceTable};
use crate::table::Table;

#[derive(Debug, Clone, Default)]
pub struct ProviderExtract {
    name: String,
    tables: HashMap<TableKind, Table>,
}

impl ProviderExtract {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), tables: HashMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn insert(&mut self, kind: TableKind, table: Table) {
        self.tables.insert(kind, table);
    }

    pub fn get(&self, kind: TableKind) -> Option<&Table> {
        self.tables.get(&kind)
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Table::len).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergedTables {
    tables: BTreeMap<TableKind, Table>,
}

impl MergedTables {
    pub fn insert(&mut self, kind: TableKind, table: Table) {
        self.tables.insert(kind, table);
    }

    pub fn get(&self, kind: TableKind) -> Option<&Table> {
        self.tables.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableKind, &Table)> {
        self.tables.iter().map(|(kind, table)| (*kind, table))
    }

    pub fn row_counts(&self) -> BTreeMap<String, usize> {
        self.iter().map(|(kind, table)| (kind.name().to_string(), table.len())).collect()
    }
}

fn build_sources(providers: &[ProviderExtract]) -> SourceTable {
    let mut collector = SourceCollector::new();
    for provider in providers {
        let added = match provider.get(TableKind::Sources) {
            Some(extract) => collector.collect(extract, &["ref"], provider.name()),
            None => {
                let mut added = 0;
                for kind in TableKind::ALL {
                    if let Some(table) = provider.get(kind) {
                        added += collector.collect_all_refs(table, provider.name());
                    }
                }
                if let Some(meta) = provider.get(TableKind::Provider) {
                    added += collector.collect(meta, &["provider_bibcode"], provider.name());
                }
                added
            }
        };
        debug!("{}: {} sources added, {} total", provider.name(), added, collector.len());
    }
    collector.finish()
}

fn build_objects(providers: &[ProviderExtract]) -> Result<ObjectIndex> {
    let mut merger = ObjectMerger::new();
    for provider in providers {
        let records = match provider.get(TableKind::Objects) {
            Some(table) => ObjectRecord::from_table(table, provider.name())?,
            None => Vec::new(),
        };
        merger.fold(records);
    }
    Ok(merger.finish())
}

fn build_provider_table(providers: &[ProviderExtract]) -> Result<Table> {
    let mut parts = Vec::new();
    for provider in providers {
        let Some(meta) = provider.get(TableKind::Provider) else { continue };
        for cell in meta.column_values("provider_name") {
            match cell.as_str() {
                Some(name) if name != provider.name() => warn!(
                    "Provider extract of '{}' names itself '{}'; using the configured name for source matching",
                    provider.name(),
                    name
                ),
                _ => {}
            }
        }
        parts.push(meta.clone());
    }
    let kind = TableKind::Provider;
    let (merged, _) = Table::union(kind.name(), &kind.columns(), &parts)?.dedup()?;
    Ok(merged)
}

/// Unions every provider's contribution to `kind` in its natural-key shape,
/// resolving references to source ids along the way.
fn fold_contributions(kind: TableKind, providers: &[ProviderExtract], sources: &SourceTable) -> Result<Table> {
    let mut parts = Vec::new();
    for provider in providers {
        let Some(extract) = provider.get(kind) else { continue };
        if extract.is_empty() {
            continue;
        }
        let (contribution, report) = match_references(extract, sources, kind.parameters(), provider.name())?;
        debug!(
            "{}: {} rows into {} ({} references resolved)",
            provider.name(),
            contribution.len(),
            kind.name(),
            report.resolved
        );
        parts.push(contribution);
    }
    let (folded, duplicates) = Table::union(kind.name(), &kind.working_columns(), &parts)?.dedup()?;
    if duplicates > 0 {
        debug!("{}: removed {} duplicate rows", kind.name(), duplicates);
    }
    Ok(folded)
}

fn keyed_by_object(kind: TableKind, folded: &Table, objects: &ObjectIndex) -> Result<Table> {
    let (keyed, report) = attach_object_ids(folded, objects, kind)?;
    if report.dropped > 0 {
        warn!("{}: dropped {} rows whose main_id is not a known object", kind.name(), report.dropped);
    }
    Ok(keyed)
}

fn ensure_rows(basic: &Table, ids: Series) -> Result<(Table, usize)> {
    let listed = Table::from_frame(basic.name(), DataFrame::new(vec![ids])?);
    let missing = listed.filter_by_keys(OBJECT_IDREF, basic.frame().column(OBJECT_IDREF)?, false)?;
    let added = missing.len();
    Ok((Table::union(basic.name(), &basic.columns(), &[basic.clone(), missing])?, added))
}

fn normalize_nulls(table: &Table, kind: TableKind, null_values: &NullValues) -> Result<(Table, usize)> {
    let mut normalized = table.clone();
    let mut replaced = 0;
    for column in kind.normalized_columns() {
        let (next, count) = normalized.replace_tokens(column, &null_values.tokens, &null_values.canonical)?;
        normalized = next;
        replaced += count;
    }
    Ok((normalized, replaced))
}

/// Merges provider extracts, given in priority order, into the final table
/// set. Fails on the first extract that breaks its category's contract.
pub fn merge(providers: &[ProviderExtract], null_values: &NullValues) -> Result<MergedTables> {
    for provider in providers {
        for kind in TableKind::ALL {
            if let Some(table) = provider.get(kind) {
                kind.validate(table, provider.name())?;
            }
        }
    }

    let mut merged = MergedTables::default();

    let sources = build_sources(providers);
    info!("sources: {} (reference, provider) pairs", sources.len());
    let objects = build_objects(providers)?;
    info!("objects: {} unique objects from {} providers", objects.len(), providers.len());
    merged.insert(TableKind::Sources, sources.to_table()?);
    merged.insert(TableKind::Objects, objects.to_table()?);
    merged.insert(TableKind::Provider, build_provider_table(providers)?);

    let ident = fold_contributions(TableKind::Ident, providers, &sources)?;
    merged.insert(TableKind::Ident, keyed_by_object(TableKind::Ident, &ident, &objects)?);

    let links = fold_contributions(TableKind::HLink, providers, &sources)?;
    let (links, report) = resolve_links(&links, &objects)?;
    if report.dropped > 0 {
        warn!("h_link: dropped {} links with an endpoint outside the object table", report.dropped);
    }
    merged.insert(TableKind::HLink, links);

    for kind in TableKind::ALL.into_iter().filter(|k| k.is_parameter_table()) {
        let folded = fold_contributions(kind, providers, &sources)?;
        let keyed = keyed_by_object(kind, &folded, &objects)?;
        match kind.basic_target() {
            None => {
                merged.insert(kind, collapse_basic(&keyed, kind.parameters(), OBJECT_IDREF)?);
            }
            Some(target) => {
                let mut basic = match merged.tables.remove(&target) {
                    Some(table) => table,
                    None => target.empty()?,
                };
                // star_basic rows come from star and system objects only.
                let append_missing = target != TableKind::StarBasic;
                for parameter in kind.parameters() {
                    let selected = best(parameter, &keyed, OBJECT_IDREF)?;
                    let (spliced, touched) = splice(&basic, &selected, parameter, OBJECT_IDREF, append_missing)?;
                    debug!("{}: best {} spliced into {} rows of {}", kind.name(), parameter.name, touched, target.name());
                    basic = spliced;
                }
                merged.insert(target, basic);
                merged.insert(kind, keyed);
            }
        }
    }

    if let Some(star_basic) = merged.tables.remove(&TableKind::StarBasic) {
        let stars = objects.ids_of(&[ObjectType::Star, ObjectType::System], OBJECT_IDREF);
        let (star_basic, added) = ensure_rows(&star_basic, stars)?;
        debug!("star_basic: added {} rows for stars and systems without measurements", added);
        merged.insert(TableKind::StarBasic, star_basic);
    }
    if let Some(planet_basic) = merged.tables.remove(&TableKind::PlanetBasic) {
        let planets = objects.ids_of(&[ObjectType::Planet], OBJECT_IDREF);
        let restricted = planet_basic.filter_by_keys(OBJECT_IDREF, &planets, true)?;
        let removed = planet_basic.len() - restricted.len();
        if removed > 0 {
            warn!("planet_basic: dropped {} rows for objects that are not planets", removed);
        }
        merged.insert(TableKind::PlanetBasic, restricted);
    }

    let parameter_kinds: Vec<TableKind> = merged.tables.keys().copied().filter(|k| k.is_parameter_table()).collect();
    for kind in parameter_kinds {
        let Some(table) = merged.tables.remove(&kind) else { continue };
        let (normalized, replaced) = normalize_nulls(&table, kind, null_values)?;
        debug!("{}: normalized {} placeholder cells to '{}'", kind.name(), replaced, null_values.canonical);
        merged.insert(kind, normalized);
    }

    for (kind, table) in merged.iter() {
        if table.is_empty() {
            warn!("{}: no rows after merge", kind.name());
        } else {
            info!("{}: {} rows", kind.name(), table.len());
        }
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MergeError;
    use crate::ids::id_set;
    use crate::io::read_extract;
    use crate::table::Value;
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn provider(name: &str, extracts: &[(TableKind, &str)]) -> ProviderExtract {
        let mut extract = ProviderExtract::new(name);
        for (kind, csv) in extracts {
            extract.insert(*kind, read_extract(csv.as_bytes(), *kind, name).unwrap());
        }
        extract
    }

    fn simbad() -> ProviderExtract {
        provider(
            "SIMBAD",
            &[
                (TableKind::Sources, "ref,provider_name\n2000A&AS..143....9W,SIMBAD\n2003AJ....125..984M,SIMBAD\n"),
                (
                    TableKind::Objects,
                    "main_id,ids,type\nalf Cen,* alf Cen|GJ 559,sy\nalf Cen A,* alf Cen A|HD 128620,st\nProxima b,,pl\n",
                ),
                (TableKind::Ident, "main_id,id,id_ref\nalf Cen A,HD 128620,2000A&AS..143....9W\nHD 000,HD 000,2000A&AS..143....9W\n"),
                (
                    TableKind::HLink,
                    "child_main_id,parent_main_id,h_link_ref,membership\n\
                     alf Cen A,alf Cen,2000A&AS..143....9W,100\n\
                     alf Cen,Cluster NGC 1,2000A&AS..143....9W,\n",
                ),
                (
                    TableKind::StarBasic,
                    "main_id,coo_ra,coo_dec,coo_qual,coo_ref,binary_flag,binary_qual\n\
                     alf Cen A,219.9,-60.8,C,2000A&AS..143....9W,True,N/A\n",
                ),
                (
                    TableKind::PlanetBasic,
                    "main_id,mass_pl_value,mass_pl_qual,mass_pl_ref\nProxima b,1.07,C,2003AJ....125..984M\nalf Cen A,1.0,C,\n",
                ),
                (TableKind::MesTeffSt, "main_id,teff_st_value,teff_st_qual,teff_st_ref\nalf Cen A,5790,C,2003AJ....125..984M\n"),
                (TableKind::MesBinary, "main_id,binary_flag,binary_qual,binary_ref\nalf Cen,True,N,2000A&AS..143....9W\n"),
            ],
        )
    }

    fn gaia() -> ProviderExtract {
        provider(
            "Gaia",
            &[
                (TableKind::Provider, "provider_name,provider_url,provider_bibcode,provider_access\nGaia,https://gea.esac.esa.int,2022arXiv220800211G,2023-05-01\n"),
                (TableKind::Objects, "main_id,ids,type\nalf Cen A,HD 128620|Gaia DR3 5853498713190525696,\n"),
                (
                    TableKind::MesTeffSt,
                    "main_id,teff_st_value,teff_st_qual,teff_st_ref\n\
                     alf Cen A,5800,A,2022arXiv220800211G\n\
                     Nobody,4000,A,2022arXiv220800211G\n",
                ),
                (
                    TableKind::MesMassPl,
                    "main_id,mass_pl_value,mass_pl_rel,mass_pl_qual,mass_pl_ref\nProxima b,1.17,<,B,2022arXiv220800211G\n",
                ),
            ],
        )
    }

    fn object_id(merged: &MergedTables, main_id: &str) -> Value {
        let objects = merged.get(TableKind::Objects).unwrap();
        let row = objects.column_values("main_id").iter().position(|m| m.as_str() == Some(main_id)).unwrap();
        objects.value(row, "object_id").unwrap()
    }

    fn row_of(table: &Table, id: &Value) -> Vec<usize> {
        table.column_values(OBJECT_IDREF).iter().enumerate().filter(|(_, v)| *v == id).map(|(r, _)| r).collect()
    }

    #[test]
    fn two_providers_merge_into_one_consistent_catalog() {
        let merged = merge(&[simbad(), gaia()], &NullValues::default()).unwrap();

        let objects = merged.get(TableKind::Objects).unwrap();
        assert_eq!(objects.len(), 3);
        let alf_cen_a = object_id(&merged, "alf Cen A");
        let row = objects.column_values("object_id").iter().position(|v| *v == alf_cen_a).unwrap();
        assert_eq!(objects.text(row, "type").as_deref(), Some("star"));
        assert_eq!(
            id_set(&objects.text(row, "ids").unwrap()),
            HashSet::from(["* alf Cen A", "HD 128620", "Gaia DR3 5853498713190525696"])
        );

        let star_basic = merged.get(TableKind::StarBasic).unwrap();
        let rows = row_of(star_basic, &alf_cen_a);
        assert_eq!(rows.len(), 1);
        assert_eq!(star_basic.value(rows[0], "teff_st_value"), Some(Value::Float(5800.0)));
        assert_eq!(star_basic.text(rows[0], "teff_st_qual").as_deref(), Some("A"));
        assert_eq!(star_basic.value(rows[0], "coo_ra"), Some(Value::Float(219.9)));

        let source_id = star_basic.value(rows[0], "teff_st_source_idref").unwrap();
        let sources = merged.get(TableKind::Sources).unwrap();
        let source_row = sources.column_values("source_id").iter().position(|v| *v == source_id).unwrap();
        assert_eq!(sources.text(source_row, "ref").as_deref(), Some("2022arXiv220800211G"));
        assert_eq!(sources.text(source_row, "provider_name").as_deref(), Some("Gaia"));
    }

    #[test]
    fn links_and_measurements_never_reference_missing_objects() {
        let merged = merge(&[simbad(), gaia()], &NullValues::default()).unwrap();
        let known: HashSet<i64> = merged
            .get(TableKind::Objects)
            .unwrap()
            .column_values("object_id")
            .iter()
            .filter_map(Value::as_int)
            .collect();

        assert_eq!(merged.get(TableKind::HLink).unwrap().len(), 1);
        for (kind, table) in merged.iter() {
            let keys: &[&str] = match kind {
                TableKind::HLink => &["child_object_idref", "parent_object_idref"],
                k if k.is_parameter_table() || k == TableKind::Ident => &[OBJECT_IDREF],
                _ => &[],
            };
            for key in keys {
                for (row, cell) in table.column_values(key).iter().enumerate() {
                    let id = cell.as_int().unwrap();
                    assert!(known.contains(&id), "{} row {} references unknown object {}", kind.name(), row, id);
                }
            }
        }
        assert_eq!(merged.get(TableKind::MesTeffSt).unwrap().len(), 2);
        assert_eq!(merged.get(TableKind::Ident).unwrap().len(), 1);
    }

    #[test]
    fn basic_tables_follow_object_types() {
        let merged = merge(&[simbad(), gaia()], &NullValues::default()).unwrap();

        let star_basic = merged.get(TableKind::StarBasic).unwrap();
        assert_eq!(star_basic.len(), 2);
        for main_id in ["alf Cen", "alf Cen A"] {
            assert_eq!(row_of(star_basic, &object_id(&merged, main_id)).len(), 1, "{}", main_id);
        }
        let alf_cen = row_of(star_basic, &object_id(&merged, "alf Cen"))[0];
        assert_eq!(star_basic.text(alf_cen, "binary_flag").as_deref(), Some("True"));

        let planet_basic = merged.get(TableKind::PlanetBasic).unwrap();
        assert_eq!(planet_basic.len(), 1);
        assert_eq!(planet_basic.value(0, OBJECT_IDREF), Some(object_id(&merged, "Proxima b")));
        assert_eq!(planet_basic.value(0, "mass_pl_value"), Some(Value::Float(1.17)));
        assert_eq!(planet_basic.text(0, "mass_pl_rel").as_deref(), Some("<"));
    }

    #[test]
    fn star_measurements_never_add_rows_for_other_objects() {
        let survey = provider(
            "Survey",
            &[
                (TableKind::Objects, "main_id,ids,type\nSun,Sol,st\nKepler-1 b,,pl\nHD 1,,\n"),
                (
                    TableKind::MesTeffSt,
                    "main_id,teff_st_value,teff_st_qual\nKepler-1 b,1500,A\nHD 1,6000,B\n",
                ),
            ],
        );
        let merged = merge(&[survey], &NullValues::default()).unwrap();

        let star_basic = merged.get(TableKind::StarBasic).unwrap();
        assert_eq!(star_basic.column_values(OBJECT_IDREF), vec![object_id(&merged, "Sun")]);
        assert_eq!(star_basic.value(0, "teff_st_value"), Some(Value::Null));
        assert_eq!(merged.get(TableKind::MesTeffSt).unwrap().len(), 2);
    }

    #[test]
    fn provider_table_is_a_deduplicated_union() {
        let simbad_meta = "SIMBAD,http://simbad.u-strasbg.fr,2000A&AS..143....9W,2024-01-31";
        let header = "provider_name,provider_url,provider_bibcode,provider_access";
        let simbad_provider = format!("{header}\n{simbad_meta}\n");
        let gaia_provider = format!("{header}\n{simbad_meta}\nGaia DR3,https://gea.esac.esa.int,2022arXiv220800211G,2024-01-31\n");
        let first = provider("SIMBAD", &[(TableKind::Provider, simbad_provider.as_str())]);
        let second = provider(
            "Gaia",
            &[
                (TableKind::Provider, gaia_provider.as_str()),
                (TableKind::Objects, "main_id,ids,type\nSun,,st\n"),
                (TableKind::MesTeffSt, "main_id,teff_st_value,teff_st_qual,teff_st_ref\nSun,5772,A,2022arXiv220800211G\n"),
            ],
        );
        let merged = merge(&[first, second], &NullValues::default()).unwrap();

        let providers = merged.get(TableKind::Provider).unwrap();
        assert_eq!(providers.column_values("provider_name"), vec![Value::text("SIMBAD"), Value::text("Gaia DR3")]);

        let sources = merged.get(TableKind::Sources).unwrap();
        let gaia_row = sources
            .column_values("ref")
            .iter()
            .position(|r| r.as_str() == Some("2022arXiv220800211G"))
            .unwrap();
        assert_eq!(sources.text(gaia_row, "provider_name").as_deref(), Some("Gaia"));
        let source_id = sources.value(gaia_row, "source_id").unwrap();
        let mes_teff = merged.get(TableKind::MesTeffSt).unwrap();
        assert_eq!(mes_teff.value(0, "teff_st_source_idref"), Some(source_id));
    }

    #[test]
    fn references_resolve_even_without_a_value_column() {
        let catalog = provider(
            "SIMBAD",
            &[
                (TableKind::Sources, "ref,provider_name\n2003AJ....125..984M,SIMBAD\n"),
                (TableKind::Objects, "main_id,ids,type\nSun,,st\n"),
                (TableKind::MesTeffSt, "main_id,teff_st_qual,teff_st_ref\nSun,B,2003AJ....125..984M\n"),
            ],
        );
        let merged = merge(&[catalog], &NullValues::default()).unwrap();
        let mes_teff = merged.get(TableKind::MesTeffSt).unwrap();
        assert_eq!(mes_teff.value(0, "teff_st_source_idref"), Some(Value::Int(1)));
        assert_eq!(mes_teff.value(0, "teff_st_value"), Some(Value::Null));
    }

    #[test]
    fn placeholder_tokens_are_normalized() {
        let merged = merge(&[simbad(), gaia()], &NullValues::default()).unwrap();
        for (kind, table) in merged.iter().filter(|(k, _)| k.is_parameter_table()) {
            for column in kind.normalized_columns() {
                for (row, cell) in table.column_values(column).iter().enumerate() {
                    assert!(
                        !matches!(cell.as_str(), Some("N") | Some("N/A") | None),
                        "{}.{} row {}: {:?}",
                        kind.name(),
                        column,
                        row,
                        cell
                    );
                }
            }
        }
        let mes_binary = merged.get(TableKind::MesBinary).unwrap();
        assert_eq!(mes_binary.text(0, "binary_qual").as_deref(), Some("?"));
    }

    #[test]
    fn quality_ties_go_to_the_higher_priority_provider() {
        let objects = (TableKind::Objects, "main_id,ids,type\nSun,Sol,st\n");
        let first = provider("P1", &[objects, (TableKind::MesMassSt, "main_id,mass_st_value,mass_st_qual\nSun,10,A\n")]);
        let second = provider("P2", &[objects, (TableKind::MesMassSt, "main_id,mass_st_value,mass_st_qual\nSun,12,A\n")]);

        let merged = merge(&[first.clone(), second.clone()], &NullValues::default()).unwrap();
        let star_basic = merged.get(TableKind::StarBasic).unwrap();
        assert_eq!(star_basic.value(0, "mass_st_value"), Some(Value::Float(10.0)));

        let merged = merge(&[second, first], &NullValues::default()).unwrap();
        let star_basic = merged.get(TableKind::StarBasic).unwrap();
        assert_eq!(star_basic.value(0, "mass_st_value"), Some(Value::Float(12.0)));
    }

    #[test]
    fn sources_are_collected_from_refs_when_no_source_extract() {
        let merged = merge(&[gaia()], &NullValues::default()).unwrap();
        let sources = merged.get(TableKind::Sources).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources.text(0, "ref").as_deref(), Some("2022arXiv220800211G"));
        assert_eq!(sources.value(0, "source_id"), Some(Value::Int(1)));
    }

    #[test]
    fn no_contributions_yield_every_table_empty() {
        let merged = merge(&[ProviderExtract::new("SIMBAD")], &NullValues::default()).unwrap();
        assert_eq!(merged.iter().count(), TableKind::ALL.len());
        assert!(merged.iter().all(|(_, table)| table.is_empty()));
        for (kind, table) in merged.iter() {
            assert_eq!(table.column_names().len(), kind.columns().len(), "{}", kind.name());
        }
        assert_eq!(merged.row_counts().get("star_basic"), Some(&0));
    }

    #[test]
    fn contract_violations_stop_the_merge() {
        let keyless: Vec<_> = TableKind::MesTeffSt.columns().into_iter().skip(1).collect();
        let mut broken = ProviderExtract::new("Gaia");
        broken.insert(TableKind::MesTeffSt, Table::empty("mes_teff_st", &keyless).unwrap());
        let err = merge(&[simbad(), broken], &NullValues::default()).unwrap_err();
        assert_eq!(
            err,
            MergeError::SchemaMismatch { provider: "Gaia".into(), table: "mes_teff_st".into(), column: "main_id".into() }
        );
    }
}
