// src/core/comparator.rs
use std::collections::{BTreeMap, BTreeSet};

use super::changeset::{ChangeKind, Changeset, ChangesetBuilder};
use super::workbook::{Datasource, DatasourceDetail, Section, WorkbookTree};

/// Added / removed / modified kinds for one section type
struct SectionKinds {
    added: ChangeKind,
    removed: ChangeKind,
    modified: ChangeKind,
}

const WORKSHEETS: SectionKinds = SectionKinds {
    added: ChangeKind::WorksheetsAdded,
    removed: ChangeKind::WorksheetsRemoved,
    modified: ChangeKind::WorksheetsModified,
};

const DASHBOARDS: SectionKinds = SectionKinds {
    added: ChangeKind::DashboardsAdded,
    removed: ChangeKind::DashboardsRemoved,
    modified: ChangeKind::DashboardsModified,
};

const DATASOURCES: SectionKinds = SectionKinds {
    added: ChangeKind::DatasourcesAdded,
    removed: ChangeKind::DatasourcesRemoved,
    modified: ChangeKind::DatasourcesModified,
};

const PARAMETERS: SectionKinds = SectionKinds {
    added: ChangeKind::ParametersAdded,
    removed: ChangeKind::ParametersRemoved,
    modified: ChangeKind::ParametersModified,
};

/// Compare two workbook snapshots.
///
/// Sections are matched by display key only. A section whose key changed is
/// reported as one removal plus one addition, since the workbook format
/// carries no identity that survives a rename.
pub fn compare(old: &WorkbookTree, new: &WorkbookTree) -> Changeset {
    let mut changes = ChangesetBuilder::default();

    compare_sections(&mut changes, &old.worksheets, &new.worksheets, &WORKSHEETS);
    compare_sections(&mut changes, &old.dashboards, &new.dashboards, &DASHBOARDS);
    compare_datasources(&mut changes, &old.datasources, &new.datasources);
    compare_sections(&mut changes, &old.parameters, &new.parameters, &PARAMETERS);

    changes.build()
}

fn compare_sections(
    changes: &mut ChangesetBuilder,
    old: &BTreeMap<String, Section>,
    new: &BTreeMap<String, Section>,
    kinds: &SectionKinds,
) {
    compare_keys(changes, old, new, kinds);

    for (name, old_section) in old {
        if let Some(new_section) = new.get(name) {
            compare_attributes(changes, old_section, new_section, kinds.modified);
        }
    }
}

fn compare_keys<V>(
    changes: &mut ChangesetBuilder,
    old: &BTreeMap<String, V>,
    new: &BTreeMap<String, V>,
    kinds: &SectionKinds,
) {
    let old_keys: BTreeSet<&String> = old.keys().collect();
    let new_keys: BTreeSet<&String> = new.keys().collect();

    changes.extend(kinds.added, new_keys.difference(&old_keys).map(|k| k.to_string()));
    changes.extend(kinds.removed, old_keys.difference(&new_keys).map(|k| k.to_string()));
}

fn compare_attributes(
    changes: &mut ChangesetBuilder,
    old: &Section,
    new: &Section,
    kind: ChangeKind,
) {
    let names: BTreeSet<&String> = old.attributes.keys().chain(new.attributes.keys()).collect();

    for attr in names {
        let before = old.attributes.get(attr);
        let after = new.attributes.get(attr);
        if before != after {
            changes.push(
                kind,
                format!(
                    "{}: {} changed from {} to {}",
                    new.name,
                    attr,
                    quoted(before.map(String::as_str)),
                    quoted(after.map(String::as_str))
                ),
            );
        }
    }
}

fn compare_datasources(
    changes: &mut ChangesetBuilder,
    old: &BTreeMap<String, Datasource>,
    new: &BTreeMap<String, Datasource>,
) {
    compare_keys(changes, old, new, &DATASOURCES);

    for (name, old_ds) in old {
        if let Some(new_ds) = new.get(name) {
            compare_attributes(changes, &old_ds.section, &new_ds.section, DATASOURCES.modified);
            compare_detail(changes, name, &old_ds.detail, &new_ds.detail);
            compare_calculated_fields(
                changes,
                name,
                &old_ds.detail.calculated_fields,
                &new_ds.detail.calculated_fields,
            );
        }
    }
}

fn compare_detail(
    changes: &mut ChangesetBuilder,
    datasource: &str,
    old: &DatasourceDetail,
    new: &DatasourceDetail,
) {
    let connection_fields = [
        ("connection_type", &old.connection_type, &new.connection_type),
        ("server", &old.server, &new.server),
        ("database", &old.database, &new.database),
    ];
    for (field, before, after) in connection_fields {
        if before != after {
            changes.push(
                ChangeKind::DatasourceConnectionsModified,
                format!(
                    "{}: {} changed from {} to {}",
                    datasource,
                    field,
                    quoted(before.as_deref()),
                    quoted(after.as_deref())
                ),
            );
        }
    }

    compare_sql(
        changes,
        datasource,
        "Custom SQL",
        old.custom_sql.as_deref(),
        new.custom_sql.as_deref(),
        [
            ChangeKind::DatasourceCustomSqlAdded,
            ChangeKind::DatasourceCustomSqlRemoved,
            ChangeKind::DatasourceCustomSqlModified,
        ],
    );
    compare_sql(
        changes,
        datasource,
        "Initial SQL",
        old.initial_sql.as_deref(),
        new.initial_sql.as_deref(),
        [
            ChangeKind::DatasourceInitialSqlAdded,
            ChangeKind::DatasourceInitialSqlRemoved,
            ChangeKind::DatasourceInitialSqlModified,
        ],
    );

    changes.extend(
        ChangeKind::DatasourceTablesAdded,
        new.tables.difference(&old.tables).map(|t| format!("{}: {}", datasource, t)),
    );
    changes.extend(
        ChangeKind::DatasourceTablesRemoved,
        old.tables.difference(&new.tables).map(|t| format!("{}: {}", datasource, t)),
    );

    // A datatype change shows up as one removal and one addition
    changes.extend(
        ChangeKind::DatasourceColumnsAdded,
        new.columns
            .difference(&old.columns)
            .map(|(name, datatype)| format!("{}: {} ({})", datasource, name, datatype)),
    );
    changes.extend(
        ChangeKind::DatasourceColumnsRemoved,
        old.columns
            .difference(&new.columns)
            .map(|(name, datatype)| format!("{}: {} ({})", datasource, name, datatype)),
    );
}

/// `kinds` is `[added, removed, modified]`; empty text counts as absent
fn compare_sql(
    changes: &mut ChangesetBuilder,
    datasource: &str,
    label: &str,
    old: Option<&str>,
    new: Option<&str>,
    kinds: [ChangeKind; 3],
) {
    let [added, removed, modified] = kinds;
    let old = old.filter(|sql| !sql.is_empty());
    let new = new.filter(|sql| !sql.is_empty());

    match (old, new) {
        (Some(before), Some(after)) if before != after => {
            changes.push(modified, format!("{}: {} modified", datasource, label));
        }
        (None, Some(_)) => changes.push(added, format!("{}: {} added", datasource, label)),
        (Some(_), None) => changes.push(removed, format!("{}: {} removed", datasource, label)),
        _ => {}
    }
}

fn compare_calculated_fields(
    changes: &mut ChangesetBuilder,
    datasource: &str,
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) {
    for field in new.keys().filter(|k| !old.contains_key(*k)) {
        changes.push(ChangeKind::CalculatedFieldsAdded, format!("{}: {}", datasource, field));
    }
    for field in old.keys().filter(|k| !new.contains_key(*k)) {
        changes.push(ChangeKind::CalculatedFieldsRemoved, format!("{}: {}", datasource, field));
    }
    for (field, formula) in old {
        if new.get(field).is_some_and(|f| f != formula) {
            changes.push(
                ChangeKind::CalculatedFieldsModified,
                format!("{}: {} formula changed", datasource, field),
            );
        }
    }
}

fn quoted(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("'{}'", v),
        None => "absent".to_string(),
    }
}
