//! Canonical table shapes. Provider extracts are validated against the same
//! declarations, with natural keys in place of surrogate ids.

use crate::error::{MergeError, Result};
use crate::table::{ColumnType, Table, Value};

use ColumnType::{Float, Int, Text};

/// One physical parameter family and the columns that describe a single
/// measurement of it.
#[derive(Debug, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub columns: &'static [(&'static str, ColumnType)],
    /// Column whose presence means the row actually carries this parameter.
    pub primary: &'static str,
}

impl ParameterSpec {
    pub fn ref_column(&self) -> String {
        format!("{}_ref", self.name)
    }

    pub fn source_column(&self) -> String {
        format!("{}_source_idref", self.name)
    }

    pub fn value_column(&self) -> String {
        format!("{}_value", self.name)
    }

    pub fn quality_column(&self) -> Option<String> {
        let qual = format!("{}_qual", self.name);
        self.columns.iter().any(|(c, _)| *c == qual).then_some(qual)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> {
        self.columns.iter().map(|(c, _)| *c)
    }
}

macro_rules! measurement {
    ($ident:ident, $name:literal, [$($col:literal : $kind:ident),* $(,)?], $primary:literal) => {
        pub static $ident: ParameterSpec = ParameterSpec {
            name: $name,
            columns: &[$(($col, $kind)),*],
            primary: $primary,
        };
    };
}

measurement!(ID, "id", ["id": Text, "id_source_idref": Int, "id_ref": Text], "id");
measurement!(H_LINK, "h_link", ["h_link_source_idref": Int, "h_link_ref": Text], "h_link_ref");
measurement!(COO, "coo", [
    "coo_ra": Float, "coo_dec": Float, "coo_err_angle": Float, "coo_err_maj": Float,
    "coo_err_min": Float, "coo_qual": Text, "coo_source_idref": Int, "coo_ref": Text,
], "coo_ra");
measurement!(COO_GAL, "coo_gal", [
    "coo_gal_l": Float, "coo_gal_b": Float, "coo_gal_err_angle": Float, "coo_gal_err_maj": Float,
    "coo_gal_err_min": Float, "coo_gal_qual": Text, "coo_gal_source_idref": Int, "coo_gal_ref": Text,
], "coo_gal_l");
measurement!(MAG_I, "mag_i", [
    "mag_i_value": Float, "mag_i_err": Float, "mag_i_qual": Text, "mag_i_source_idref": Int, "mag_i_ref": Text,
], "mag_i_value");
measurement!(MAG_J, "mag_j", [
    "mag_j_value": Float, "mag_j_err": Float, "mag_j_qual": Text, "mag_j_source_idref": Int, "mag_j_ref": Text,
], "mag_j_value");
measurement!(MAG_K, "mag_k", [
    "mag_k_value": Float, "mag_k_err": Float, "mag_k_qual": Text, "mag_k_source_idref": Int, "mag_k_ref": Text,
], "mag_k_value");
measurement!(PLX, "plx", [
    "plx_value": Float, "plx_err": Float, "plx_qual": Text, "plx_source_idref": Int, "plx_ref": Text,
], "plx_value");
measurement!(DIST_ST, "dist_st", [
    "dist_st_value": Float, "dist_st_err": Float, "dist_st_qual": Text, "dist_st_source_idref": Int,
    "dist_st_ref": Text,
], "dist_st_value");
measurement!(SPTYPE, "sptype", [
    "sptype_string": Text, "sptype_err": Float, "sptype_qual": Text, "sptype_source_idref": Int,
    "sptype_ref": Text,
], "sptype_string");
measurement!(CLASS, "class", [
    "class_temp": Text, "class_temp_nr": Text, "class_lum": Text, "class_source_idref": Int, "class_ref": Text,
], "class_temp");
measurement!(TEFF_ST, "teff_st", [
    "teff_st_value": Float, "teff_st_err": Float, "teff_st_qual": Text, "teff_st_source_idref": Int,
    "teff_st_ref": Text,
], "teff_st_value");
measurement!(RADIUS_ST, "radius_st", [
    "radius_st_value": Float, "radius_st_err": Float, "radius_st_qual": Text, "radius_st_source_idref": Int,
    "radius_st_ref": Text,
], "radius_st_value");
measurement!(MASS_ST, "mass_st", [
    "mass_st_value": Float, "mass_st_err": Float, "mass_st_qual": Text, "mass_st_source_idref": Int,
    "mass_st_ref": Text,
], "mass_st_value");
measurement!(BINARY, "binary", [
    "binary_flag": Text, "binary_qual": Text, "binary_source_idref": Int, "binary_ref": Text,
], "binary_flag");
measurement!(SEP_PHYS, "sep_phys", [
    "sep_phys_value": Float, "sep_phys_err": Float, "sep_phys_obs_date": Int, "sep_phys_qual": Text,
    "sep_phys_source_idref": Int, "sep_phys_ref": Text,
], "sep_phys_value");
measurement!(MASS_PL, "mass_pl", [
    "mass_pl_value": Float, "mass_pl_err": Float, "mass_pl_rel": Text, "mass_pl_qual": Text,
    "mass_pl_source_idref": Int, "mass_pl_ref": Text,
], "mass_pl_value");
measurement!(RAD, "rad", [
    "rad_value": Float, "rad_err": Float, "rad_rel": Text, "rad_qual": Text, "rad_source_idref": Int,
    "rad_ref": Text,
], "rad_value");

static IDENT_PARAMETERS: [&ParameterSpec; 1] = [&ID];
static H_LINK_PARAMETERS: [&ParameterSpec; 1] = [&H_LINK];
static PLANET_PARAMETERS: [&ParameterSpec; 1] = [&MASS_PL];
static DISK_PARAMETERS: [&ParameterSpec; 1] = [&RAD];
static TEFF_PARAMETERS: [&ParameterSpec; 1] = [&TEFF_ST];
static RADIUS_PARAMETERS: [&ParameterSpec; 1] = [&RADIUS_ST];
static MASS_ST_PARAMETERS: [&ParameterSpec; 1] = [&MASS_ST];
static BINARY_PARAMETERS: [&ParameterSpec; 1] = [&BINARY];
static SEP_PHYS_PARAMETERS: [&ParameterSpec; 1] = [&SEP_PHYS];
static STAR_PARAMETERS: [&ParameterSpec; 14] = [
    &COO, &COO_GAL, &MAG_I, &MAG_J, &MAG_K, &PLX, &DIST_ST, &SPTYPE, &CLASS, &TEFF_ST, &RADIUS_ST,
    &MASS_ST, &BINARY, &SEP_PHYS,
];

/// Text columns whose absent/placeholder spellings are unified on output.
const NORMALIZED_EXTRA: [&str; 3] = ["binary_flag", "class_temp", "class_temp_nr"];

pub const OBJECT_ID: &str = "object_id";
pub const OBJECT_IDREF: &str = "object_idref";
pub const MAIN_ID: &str = "main_id";
pub const CHILD_MAIN_ID: &str = "child_main_id";
pub const PARENT_MAIN_ID: &str = "parent_main_id";
pub const CHILD_OBJECT_IDREF: &str = "child_object_idref";
pub const PARENT_OBJECT_IDREF: &str = "parent_object_idref";

/// Output table categories, in merge dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKind {
    Sources,
    Objects,
    Provider,
    Ident,
    HLink,
    StarBasic,
    PlanetBasic,
    DiskBasic,
    MesMassPl,
    MesTeffSt,
    MesRadiusSt,
    MesMassSt,
    MesBinary,
    MesSepPhys,
}

impl TableKind {
    pub const ALL: [TableKind; 14] = [
        TableKind::Sources,
        TableKind::Objects,
        TableKind::Provider,
        TableKind::Ident,
        TableKind::HLink,
        TableKind::StarBasic,
        TableKind::PlanetBasic,
        TableKind::DiskBasic,
        TableKind::MesMassPl,
        TableKind::MesTeffSt,
        TableKind::MesRadiusSt,
        TableKind::MesMassSt,
        TableKind::MesBinary,
        TableKind::MesSepPhys,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TableKind::Sources => "sources",
            TableKind::Objects => "objects",
            TableKind::Provider => "provider",
            TableKind::Ident => "ident",
            TableKind::HLink => "h_link",
            TableKind::StarBasic => "star_basic",
            TableKind::PlanetBasic => "planet_basic",
            TableKind::DiskBasic => "disk_basic",
            TableKind::MesMassPl => "mes_mass_pl",
            TableKind::MesTeffSt => "mes_teff_st",
            TableKind::MesRadiusSt => "mes_radius_st",
            TableKind::MesMassSt => "mes_mass_st",
            TableKind::MesBinary => "mes_binary",
            TableKind::MesSepPhys => "mes_sep_phys",
        }
    }

    pub fn from_name(name: &str) -> Option<TableKind> {
        TableKind::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn parameters(self) -> &'static [&'static ParameterSpec] {
        match self {
            TableKind::Sources | TableKind::Objects | TableKind::Provider => &[],
            TableKind::Ident => &IDENT_PARAMETERS,
            TableKind::HLink => &H_LINK_PARAMETERS,
            TableKind::StarBasic => &STAR_PARAMETERS,
            TableKind::PlanetBasic | TableKind::MesMassPl => &PLANET_PARAMETERS,
            TableKind::DiskBasic => &DISK_PARAMETERS,
            TableKind::MesTeffSt => &TEFF_PARAMETERS,
            TableKind::MesRadiusSt => &RADIUS_PARAMETERS,
            TableKind::MesMassSt => &MASS_ST_PARAMETERS,
            TableKind::MesBinary => &BINARY_PARAMETERS,
            TableKind::MesSepPhys => &SEP_PHYS_PARAMETERS,
        }
    }

    pub fn is_parameter_table(self) -> bool {
        self >= TableKind::StarBasic
    }

    /// The basic table a measurement table's best values are spliced into.
    pub fn basic_target(self) -> Option<TableKind> {
        match self {
            TableKind::MesMassPl => Some(TableKind::PlanetBasic),
            TableKind::MesTeffSt
            | TableKind::MesRadiusSt
            | TableKind::MesMassSt
            | TableKind::MesBinary
            | TableKind::MesSepPhys => Some(TableKind::StarBasic),
            _ => None,
        }
    }

    pub fn columns(self) -> Vec<(&'static str, ColumnType)> {
        let (leading, trailing): (&[(&str, ColumnType)], &[(&str, ColumnType)]) = match self {
            TableKind::Sources => (&[("ref", Text), ("provider_name", Text), ("source_id", Int)], &[]),
            TableKind::Objects => {
                (&[(OBJECT_ID, Int), ("type", Text), ("ids", Text), (MAIN_ID, Text)], &[])
            }
            TableKind::Provider => (
                &[
                    ("provider_name", Text),
                    ("provider_url", Text),
                    ("provider_bibcode", Text),
                    ("provider_access", Text),
                ],
                &[],
            ),
            TableKind::HLink => (
                &[(CHILD_OBJECT_IDREF, Int), (PARENT_OBJECT_IDREF, Int)],
                &[("membership", Int)],
            ),
            _ => (&[(OBJECT_IDREF, Int)], &[]),
        };
        let mut columns: Vec<(&'static str, ColumnType)> = leading.to_vec();
        for parameter in self.parameters() {
            columns.extend_from_slice(parameter.columns);
        }
        columns.extend_from_slice(trailing);
        columns
    }

    /// Columns accepted while folding provider contributions: surrogate ids
    /// are replaced by the natural keys they are later resolved from.
    pub fn working_columns(self) -> Vec<(&'static str, ColumnType)> {
        match self {
            TableKind::Sources => vec![("ref", Text), ("provider_name", Text)],
            TableKind::Objects => vec![(MAIN_ID, Text), ("ids", Text), ("type", Text)],
            TableKind::Provider => self.columns(),
            TableKind::HLink => {
                let mut columns = vec![(CHILD_MAIN_ID, Text), (PARENT_MAIN_ID, Text)];
                columns.extend(self.columns().into_iter().skip(2));
                columns
            }
            _ => {
                let mut columns = vec![(MAIN_ID, Text)];
                columns.extend(self.columns().into_iter().skip(1));
                columns
            }
        }
    }

    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            TableKind::Sources => &["ref"],
            TableKind::Objects => &[MAIN_ID],
            TableKind::Provider => &["provider_name"],
            TableKind::Ident => &[MAIN_ID, "id"],
            TableKind::HLink => &[CHILD_MAIN_ID, PARENT_MAIN_ID],
            _ => &[MAIN_ID],
        }
    }

    /// Columns whose null spellings are unified to the canonical token.
    pub fn normalized_columns(self) -> Vec<&'static str> {
        self.parameters()
            .iter()
            .flat_map(|p| p.column_names())
            .filter(|c| c.ends_with("_qual") || c.ends_with("_rel") || NORMALIZED_EXTRA.contains(c))
            .collect()
    }

    pub fn empty(self) -> Result<Table> {
        Table::empty(self.name(), &self.columns())
    }

    pub fn empty_working(self) -> Result<Table> {
        Table::empty(self.name(), &self.working_columns())
    }

    pub fn with_rows(self, rows: &[Vec<Value>]) -> Result<Table> {
        Table::from_rows(self.name(), &self.columns(), rows)
    }

    pub fn validate(self, table: &Table, provider: &str) -> Result<()> {
        let declared = self.working_columns();
        for column in table.column_names() {
            if !declared.iter().any(|(c, _)| *c == column.as_str()) {
                return Err(MergeError::UndeclaredColumn {
                    provider: provider.to_string(),
                    table: self.name().to_string(),
                    column,
                });
            }
        }
        for required in self.required_columns() {
            if !table.has_column(required) {
                return Err(MergeError::SchemaMismatch {
                    provider: provider.to_string(),
                    table: self.name().to_string(),
                    column: required.to_string(),
                });
            }
        }
        Ok(())
    }
}
