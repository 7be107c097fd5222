//! Validated query objects, bound to the schema items they reference.
//!
//! Queries own clones of the cube, hierarchy, level and measure descriptors
//! they use, so a compiled statement depends on nothing but the query. They
//! serialize to JSON, which is also what cache keys are computed from.

pub mod filter;

pub use filter::{
    parse_filter_condition, Comparison, FilterCondition, LogicOperator, NumericConstraint,
};

use crate::semantic_model::{
    AnyMeasure, Cube, Hierarchy, Level, TableSource, DEFAULT_LOCALE,
};
use serde::{Deserialize, Serialize};

/// Turns a display name into a safe column alias: `Trade Value` becomes
/// `trade_value`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// A limit of 0 means no limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u64,
    pub offset: u64,
}

impl Pagination {
    pub fn new(limit: u64, offset: u64) -> Self {
        Pagination { limit, offset }
    }

    pub fn is_empty(&self) -> bool {
        self.limit == 0 && self.offset == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    /// Name of a level or a measure in the query
    pub field: String,
    #[serde(default)]
    pub order: Order,
}

/// Keep only the first `amount` rows of each combination of `levels`,
/// ranked by `measure`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopK {
    pub levels: Vec<String>,
    pub measure: String,
    #[serde(default)]
    pub order: Order,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthMethod {
    /// Against the previous member of the time level
    Period,
    /// Against a fixed member key of the time level
    Fixed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Growth {
    pub time_level: String,
    pub measure: String,
    pub method: GrowthMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRestriction {
    Oldest(u64),
    Newest(u64),
    Expr(FilterCondition),
}

/// The part of a [`Cube`] a compiled statement needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeRef {
    pub name: String,
    pub table: TableSource,
    #[serde(default)]
    pub subset_table: bool,
    /// Measure catalog formulas resolve their references against
    #[serde(default)]
    pub measures: Vec<AnyMeasure>,
}

impl From<&Cube> for CubeRef {
    fn from(cube: &Cube) -> Self {
        CubeRef {
            name: cube.name.clone(),
            table: cube.table.clone(),
            subset_table: cube.subset_table,
            measures: cube.measures.clone(),
        }
    }
}

/// A column of a level as it travels through the compiled statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelColumn {
    /// Column in the table holding the level
    pub column: String,
    /// Output name in the result
    pub name: String,
    /// Identifier used inside the statement
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelField {
    pub level: Level,
    #[serde(default)]
    pub is_drilldown: bool,
    #[serde(default)]
    pub members_include: Vec<String>,
    #[serde(default)]
    pub members_exclude: Vec<String>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub time_restriction: Option<TimeRestriction>,
}

impl LevelField {
    pub fn new(level: &Level, is_drilldown: bool) -> Self {
        LevelField {
            level: level.clone(),
            is_drilldown,
            members_include: Vec::new(),
            members_exclude: Vec::new(),
            properties: Vec::new(),
            time_restriction: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.level.name
    }

    pub fn alias(&self) -> String {
        sanitize(&self.level.name)
    }

    pub fn is_cut(&self) -> bool {
        !self.members_include.is_empty() || !self.members_exclude.is_empty()
    }

    /// Output name of the key column
    pub fn key_name(&self) -> String {
        if self.level.name_column.is_some() {
            format!("{} ID", self.level.name)
        } else {
            self.level.name.clone()
        }
    }

    /// Key, caption and requested property columns of the level
    pub fn iter_columns(&self, locale: &str) -> Vec<LevelColumn> {
        let alias = self.alias();
        let mut columns = vec![LevelColumn {
            column: self.level.key_column.clone(),
            name: self.key_name(),
            alias: alias.clone(),
        }];

        if let Some(caption) = self.level.get_name_column(locale) {
            columns.push(LevelColumn {
                column: caption.to_string(),
                name: self.level.name.clone(),
                alias: format!("{}_caption", alias),
            });
        }

        for name in &self.properties {
            if let Some(property) = self.level.get_property(name) {
                columns.push(LevelColumn {
                    column: property.key_column.resolve(locale).to_string(),
                    name: property.name.clone(),
                    alias: format!("{}_{}", alias, sanitize(&property.name)),
                });
            }
        }

        columns
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyField {
    pub hierarchy: Hierarchy,
    /// Levels used by the query, in hierarchy order
    pub levels: Vec<LevelField>,
}

impl HierarchyField {
    pub fn new(hierarchy: &Hierarchy, levels: Vec<LevelField>) -> Self {
        let mut field = HierarchyField {
            hierarchy: hierarchy.clone(),
            levels,
        };
        field.sort_levels();
        field
    }

    fn sort_levels(&mut self) {
        let hierarchy = &self.hierarchy;
        self.levels.sort_by_key(|field| {
            hierarchy
                .levels
                .iter()
                .position(|level| level.name == field.level.name)
                .unwrap_or(usize::MAX)
        });
    }

    pub fn name(&self) -> &str {
        &self.hierarchy.name
    }

    pub fn alias(&self) -> String {
        sanitize(&self.hierarchy.name)
    }

    /// Table holding the levels, `None` when they live in the fact table
    pub fn table(&self) -> Option<&TableSource> {
        self.hierarchy.table.as_ref()
    }

    pub fn foreign_key(&self) -> &str {
        self.hierarchy.foreign_key()
    }

    pub fn primary_key(&self) -> &str {
        self.hierarchy.primary_key()
    }

    pub fn drilldown_levels(&self) -> impl Iterator<Item = &LevelField> {
        self.levels.iter().filter(|field| field.is_drilldown)
    }

    pub fn has_drilldowns(&self) -> bool {
        self.levels.iter().any(|field| field.is_drilldown)
    }

    /// Deepest drilldown level, the one the hierarchy is grouped by
    pub fn deepest_level(&self) -> Option<&LevelField> {
        self.drilldown_levels().last()
    }

    pub fn get_level(&self, name: &str) -> Option<&LevelField> {
        self.levels.iter().find(|field| field.level.name == name)
    }

    /// Returns the field for `level`, adding it first if needed
    pub fn level_mut(&mut self, level: &Level) -> &mut LevelField {
        let idx = match self
            .levels
            .iter()
            .position(|field| field.level.name == level.name)
        {
            Some(idx) => idx,
            None => {
                self.levels.push(LevelField::new(level, false));
                self.sort_levels();
                self.levels
                    .iter()
                    .position(|field| field.level.name == level.name)
                    .unwrap_or(self.levels.len() - 1)
            }
        };
        &mut self.levels[idx]
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureField {
    pub measure: AnyMeasure,
    /// `false` for umbrella measures whose submeasures are returned instead
    #[serde(default = "default_true")]
    pub is_measure: bool,
    #[serde(default)]
    pub constraint: Option<FilterCondition>,
    #[serde(default)]
    pub with_ranking: Option<Order>,
}

impl MeasureField {
    pub fn new(measure: &AnyMeasure) -> Self {
        MeasureField {
            measure: measure.clone(),
            is_measure: true,
            constraint: None,
            with_ranking: None,
        }
    }

    pub fn name(&self) -> &str {
        self.measure.name()
    }

    /// Alias of the fact column the measure aggregates; measures over the
    /// same column share it
    pub fn alias_key(&self) -> String {
        match &self.measure {
            AnyMeasure::Measure(measure) => sanitize(&measure.key_column),
            AnyMeasure::Calculated(calculated) => sanitize(&calculated.name),
        }
    }

    pub fn ranking_name(&self) -> String {
        format!("{} Ranking", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuery {
    pub cube: CubeRef,
    #[serde(default)]
    pub fields_qualitative: Vec<HierarchyField>,
    #[serde(default)]
    pub fields_quantitative: Vec<MeasureField>,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub sorting: Option<Sorting>,
    #[serde(default)]
    pub topk: Option<TopK>,
    #[serde(default)]
    pub growth: Option<Growth>,
}

fn default_locale() -> String {
    DEFAULT_LOCALE.to_string()
}

impl DataQuery {
    pub fn new(cube: &Cube) -> Self {
        DataQuery {
            cube: cube.into(),
            fields_qualitative: Vec::new(),
            fields_quantitative: Vec::new(),
            locale: default_locale(),
            pagination: Pagination::default(),
            sorting: None,
            topk: None,
            growth: None,
        }
    }

    /// Returns the field for `hierarchy`, adding it first if needed
    pub fn hierarchy_mut(&mut self, hierarchy: &Hierarchy) -> &mut HierarchyField {
        let idx = match self
            .fields_qualitative
            .iter()
            .position(|field| field.hierarchy.name == hierarchy.name)
        {
            Some(idx) => idx,
            None => {
                self.fields_qualitative
                    .push(HierarchyField::new(hierarchy, Vec::new()));
                self.fields_qualitative.len() - 1
            }
        };
        &mut self.fields_qualitative[idx]
    }

    pub fn add_drilldown(&mut self, hierarchy: &Hierarchy, level: &Level) -> &mut LevelField {
        let field = self.hierarchy_mut(hierarchy).level_mut(level);
        field.is_drilldown = true;
        field
    }

    pub fn add_cut(
        &mut self,
        hierarchy: &Hierarchy,
        level: &Level,
        include: &[&str],
        exclude: &[&str],
    ) -> &mut LevelField {
        let field = self.hierarchy_mut(hierarchy).level_mut(level);
        field.members_include = include.iter().map(|item| item.to_string()).collect();
        field.members_exclude = exclude.iter().map(|item| item.to_string()).collect();
        field
    }

    pub fn add_measure(&mut self, measure: &AnyMeasure) -> &mut MeasureField {
        self.fields_quantitative.push(MeasureField::new(measure));
        let idx = self.fields_quantitative.len() - 1;
        &mut self.fields_quantitative[idx]
    }

    /// Drilldown level fields across all hierarchies, in query order
    pub fn drilldowns(&self) -> impl Iterator<Item = &LevelField> {
        self.fields_qualitative
            .iter()
            .flat_map(|field| field.drilldown_levels())
    }

    /// Copy of the query without pagination; what gets compiled and cached
    /// by a dataframe fetch
    pub fn unpaged(&self) -> DataQuery {
        DataQuery {
            pagination: Pagination::default(),
            ..self.clone()
        }
    }

    /// Stable identifier of the query contents, pagination included
    pub fn key(&self) -> String {
        let payload =
            serde_json::to_vec(self).unwrap_or_else(|_| format!("{:?}", self).into_bytes());
        blake3::hash(&payload).to_hex().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembersQuery {
    pub cube: CubeRef,
    /// Field holding exactly one level, the one whose members are listed
    pub hiefield: HierarchyField,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default)]
    pub pagination: Pagination,
    #[serde(default)]
    pub search: Option<String>,
}

impl MembersQuery {
    pub fn new(cube: &Cube, hierarchy: &Hierarchy, level: &Level) -> Self {
        MembersQuery {
            cube: cube.into(),
            hiefield: HierarchyField::new(hierarchy, vec![LevelField::new(level, true)]),
            locale: default_locale(),
            pagination: Pagination::default(),
            search: None,
        }
    }

    pub fn key(&self) -> String {
        let payload =
            serde_json::to_vec(self).unwrap_or_else(|_| format!("{:?}", self).into_bytes());
        blake3::hash(&payload).to_hex().to_string()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum AnyQuery<'a> {
    Data(&'a DataQuery),
    Members(&'a MembersQuery),
}

impl<'a> AnyQuery<'a> {
    pub fn pagination(&self) -> Pagination {
        match self {
            AnyQuery::Data(query) => query.pagination,
            AnyQuery::Members(query) => query.pagination,
        }
    }

    pub fn key(&self) -> String {
        match self {
            AnyQuery::Data(query) => query.key(),
            AnyQuery::Members(query) => query.key(),
        }
    }
}

impl<'a> From<&'a DataQuery> for AnyQuery<'a> {
    fn from(query: &'a DataQuery) -> Self {
        AnyQuery::Data(query)
    }
}

impl<'a> From<&'a MembersQuery> for AnyQuery<'a> {
    fn from(query: &'a MembersQuery) -> Self {
        AnyQuery::Members(query)
    }
}
