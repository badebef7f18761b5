// src/core/changeset.rs
use std::collections::BTreeMap;

use serde::Serialize;

/// Category of a recorded change.
///
/// Declaration order is report order: changelogs are rendered by walking
/// kinds in this order, never in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    WorksheetsAdded,
    WorksheetsRemoved,
    WorksheetsModified,
    DashboardsAdded,
    DashboardsRemoved,
    DashboardsModified,
    DatasourcesAdded,
    DatasourcesRemoved,
    DatasourcesModified,
    DatasourceConnectionsModified,
    DatasourceCustomSqlAdded,
    DatasourceCustomSqlRemoved,
    DatasourceCustomSqlModified,
    DatasourceInitialSqlAdded,
    DatasourceInitialSqlRemoved,
    DatasourceInitialSqlModified,
    DatasourceTablesAdded,
    DatasourceTablesRemoved,
    DatasourceColumnsAdded,
    DatasourceColumnsRemoved,
    CalculatedFieldsAdded,
    CalculatedFieldsRemoved,
    CalculatedFieldsModified,
    ParametersAdded,
    ParametersRemoved,
    ParametersModified,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 26] = [
        ChangeKind::WorksheetsAdded,
        ChangeKind::WorksheetsRemoved,
        ChangeKind::WorksheetsModified,
        ChangeKind::DashboardsAdded,
        ChangeKind::DashboardsRemoved,
        ChangeKind::DashboardsModified,
        ChangeKind::DatasourcesAdded,
        ChangeKind::DatasourcesRemoved,
        ChangeKind::DatasourcesModified,
        ChangeKind::DatasourceConnectionsModified,
        ChangeKind::DatasourceCustomSqlAdded,
        ChangeKind::DatasourceCustomSqlRemoved,
        ChangeKind::DatasourceCustomSqlModified,
        ChangeKind::DatasourceInitialSqlAdded,
        ChangeKind::DatasourceInitialSqlRemoved,
        ChangeKind::DatasourceInitialSqlModified,
        ChangeKind::DatasourceTablesAdded,
        ChangeKind::DatasourceTablesRemoved,
        ChangeKind::DatasourceColumnsAdded,
        ChangeKind::DatasourceColumnsRemoved,
        ChangeKind::CalculatedFieldsAdded,
        ChangeKind::CalculatedFieldsRemoved,
        ChangeKind::CalculatedFieldsModified,
        ChangeKind::ParametersAdded,
        ChangeKind::ParametersRemoved,
        ChangeKind::ParametersModified,
    ];

    /// Machine-readable key, e.g. `worksheets_added`
    pub fn key(self) -> &'static str {
        match self {
            ChangeKind::WorksheetsAdded => "worksheets_added",
            ChangeKind::WorksheetsRemoved => "worksheets_removed",
            ChangeKind::WorksheetsModified => "worksheets_modified",
            ChangeKind::DashboardsAdded => "dashboards_added",
            ChangeKind::DashboardsRemoved => "dashboards_removed",
            ChangeKind::DashboardsModified => "dashboards_modified",
            ChangeKind::DatasourcesAdded => "datasources_added",
            ChangeKind::DatasourcesRemoved => "datasources_removed",
            ChangeKind::DatasourcesModified => "datasources_modified",
            ChangeKind::DatasourceConnectionsModified => "datasource_connections_modified",
            ChangeKind::DatasourceCustomSqlAdded => "datasource_custom_sql_added",
            ChangeKind::DatasourceCustomSqlRemoved => "datasource_custom_sql_removed",
            ChangeKind::DatasourceCustomSqlModified => "datasource_custom_sql_modified",
            ChangeKind::DatasourceInitialSqlAdded => "datasource_initial_sql_added",
            ChangeKind::DatasourceInitialSqlRemoved => "datasource_initial_sql_removed",
            ChangeKind::DatasourceInitialSqlModified => "datasource_initial_sql_modified",
            ChangeKind::DatasourceTablesAdded => "datasource_tables_added",
            ChangeKind::DatasourceTablesRemoved => "datasource_tables_removed",
            ChangeKind::DatasourceColumnsAdded => "datasource_columns_added",
            ChangeKind::DatasourceColumnsRemoved => "datasource_columns_removed",
            ChangeKind::CalculatedFieldsAdded => "calculated_fields_added",
            ChangeKind::CalculatedFieldsRemoved => "calculated_fields_removed",
            ChangeKind::CalculatedFieldsModified => "calculated_fields_modified",
            ChangeKind::ParametersAdded => "parameters_added",
            ChangeKind::ParametersRemoved => "parameters_removed",
            ChangeKind::ParametersModified => "parameters_modified",
        }
    }

    /// Heading used in rendered reports
    pub fn title(self) -> &'static str {
        match self {
            ChangeKind::WorksheetsAdded => "Worksheets Added",
            ChangeKind::WorksheetsRemoved => "Worksheets Removed",
            ChangeKind::WorksheetsModified => "Worksheets Modified",
            ChangeKind::DashboardsAdded => "Dashboards Added",
            ChangeKind::DashboardsRemoved => "Dashboards Removed",
            ChangeKind::DashboardsModified => "Dashboards Modified",
            ChangeKind::DatasourcesAdded => "Data Sources Added",
            ChangeKind::DatasourcesRemoved => "Data Sources Removed",
            ChangeKind::DatasourcesModified => "Data Sources Modified",
            ChangeKind::DatasourceConnectionsModified => "Data Source Connections Modified",
            ChangeKind::DatasourceCustomSqlAdded => "Custom SQL Added",
            ChangeKind::DatasourceCustomSqlRemoved => "Custom SQL Removed",
            ChangeKind::DatasourceCustomSqlModified => "Custom SQL Modified",
            ChangeKind::DatasourceInitialSqlAdded => "Initial SQL Added",
            ChangeKind::DatasourceInitialSqlRemoved => "Initial SQL Removed",
            ChangeKind::DatasourceInitialSqlModified => "Initial SQL Modified",
            ChangeKind::DatasourceTablesAdded => "Data Source Tables Added",
            ChangeKind::DatasourceTablesRemoved => "Data Source Tables Removed",
            ChangeKind::DatasourceColumnsAdded => "Data Source Columns Added",
            ChangeKind::DatasourceColumnsRemoved => "Data Source Columns Removed",
            ChangeKind::CalculatedFieldsAdded => "Calculated Fields Added",
            ChangeKind::CalculatedFieldsRemoved => "Calculated Fields Removed",
            ChangeKind::CalculatedFieldsModified => "Calculated Fields Modified",
            ChangeKind::ParametersAdded => "Parameters Added",
            ChangeKind::ParametersRemoved => "Parameters Removed",
            ChangeKind::ParametersModified => "Parameters Modified",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Categorised result of comparing two workbook snapshots.
///
/// Only non-empty kinds are stored, so the empty changeset is the
/// "no differences" value. A changeset is frozen once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Changeset {
    entries: BTreeMap<ChangeKind, Vec<String>>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes recorded for one kind; empty when none
    pub fn get(&self, kind: ChangeKind) -> &[String] {
        self.entries.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Non-empty kinds in report order
    pub fn iter(&self) -> impl Iterator<Item = (ChangeKind, &[String])> + '_ {
        self.entries.iter().map(|(kind, items)| (*kind, items.as_slice()))
    }

    pub fn total_changes(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Accumulates changes during one comparison, then freezes into a [`Changeset`]
#[derive(Debug, Default)]
pub(crate) struct ChangesetBuilder {
    entries: BTreeMap<ChangeKind, Vec<String>>,
}

impl ChangesetBuilder {
    pub fn push(&mut self, kind: ChangeKind, description: impl Into<String>) {
        self.entries.entry(kind).or_default().push(description.into());
    }

    pub fn extend<I>(&mut self, kind: ChangeKind, descriptions: I)
    where
        I: IntoIterator<Item = String>,
    {
        for description in descriptions {
            self.push(kind, description);
        }
    }

    pub fn build(self) -> Changeset {
        Changeset {
            entries: self.entries,
        }
    }
}
