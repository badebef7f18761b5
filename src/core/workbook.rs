// src/core/workbook.rs
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use roxmltree::{Document, Node, ParsingOptions};

use crate::error::{TabsentryError, Result};

const UNNAMED: &str = "Unnamed";
const PARAMETERS_DATASOURCE: &str = "Parameters";

/// A named section of a workbook (worksheet, dashboard, datasource or parameter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
}

/// Connection and schema details of a datasource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasourceDetail {
    pub connection_type: Option<String>,
    pub server: Option<String>,
    pub database: Option<String>,
    pub custom_sql: Option<String>,
    pub initial_sql: Option<String>,
    pub tables: BTreeSet<String>,
    /// (name, datatype) pairs; columns missing either are not recorded
    pub columns: BTreeSet<(String, String)>,
    /// Calculated field caption -> formula
    pub calculated_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datasource {
    pub section: Section,
    pub detail: DatasourceDetail,
}

/// Parsed view of one workbook snapshot.
///
/// Section keys are unique per section type; when a workbook carries two
/// sections with the same key the last one seen wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkbookTree {
    pub revision: Option<String>,
    pub worksheets: BTreeMap<String, Section>,
    pub dashboards: BTreeMap<String, Section>,
    pub datasources: BTreeMap<String, Datasource>,
    pub parameters: BTreeMap<String, Section>,
}

impl WorkbookTree {
    /// Read and parse a workbook file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    /// Parse workbook XML; `origin` is only used for error reporting
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let document = parse_document(text, origin)?;
        let root = document.root_element();

        Ok(Self {
            revision: find_revision(root),
            worksheets: extract_named(root, "worksheet"),
            dashboards: extract_named(root, "dashboard"),
            datasources: extract_datasources(root),
            parameters: extract_parameters(root),
        })
    }
}

/// Read the server revision recorded in a workbook file
pub fn read_revision<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let document = parse_document(&text, path)?;

    find_revision(document.root_element()).ok_or_else(|| TabsentryError::MetadataMissing {
        path: path.to_path_buf(),
        marker: "repository-location revision",
    })
}

fn parse_document<'a>(text: &'a str, origin: &Path) -> Result<Document<'a>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let options = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };

    Document::parse_with_options(text, options).map_err(|e| TabsentryError::Parse {
        path: origin.to_path_buf(),
        message: e.to_string(),
    })
}

fn find_revision(root: Node<'_, '_>) -> Option<String> {
    elements(root, "repository-location")
        .next()
        .and_then(|node| node.attribute("revision"))
        .map(str::to_string)
}

/// All descendant elements (including `node` itself) with the given tag
fn elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    tag: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.descendants()
        .filter(move |n| n.is_element() && n.tag_name().name() == tag)
}

fn section_from(node: Node<'_, '_>, name: String) -> Section {
    let attributes = node
        .attributes()
        .map(|attr| (attr.name().to_string(), attr.value().to_string()))
        .collect();

    Section { name, attributes }
}

fn extract_named(root: Node<'_, '_>, tag: &str) -> BTreeMap<String, Section> {
    let mut sections = BTreeMap::new();
    for node in elements(root, tag) {
        let name = node.attribute("name").unwrap_or(UNNAMED).to_string();
        sections.insert(name.clone(), section_from(node, name));
    }
    sections
}

fn datasource_key(node: Node<'_, '_>) -> String {
    let name = node.attribute("name").unwrap_or(UNNAMED);
    match node.attribute("caption") {
        Some(caption) if !caption.is_empty() && caption != name => caption.to_string(),
        _ => name.to_string(),
    }
}

fn extract_datasources(root: Node<'_, '_>) -> BTreeMap<String, Datasource> {
    let mut datasources = BTreeMap::new();

    // Top-level definitions take precedence over the copies embedded in worksheets
    let top_level = root
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "datasources");
    if let Some(container) = top_level {
        for node in container
            .children()
            .filter(|n| n.is_element() && n.tag_name().name() == "datasource")
        {
            let key = datasource_key(node);
            if !key.is_empty() && key != PARAMETERS_DATASOURCE {
                datasources.insert(key.clone(), datasource_from(node, key));
            }
        }
    }

    for node in elements(root, "datasource") {
        let key = datasource_key(node);
        if !key.is_empty() && key != PARAMETERS_DATASOURCE && !datasources.contains_key(&key) {
            datasources.insert(key.clone(), datasource_from(node, key));
        }
    }

    datasources
}

fn datasource_from(node: Node<'_, '_>, key: String) -> Datasource {
    Datasource {
        section: section_from(node, key),
        detail: extract_detail(node),
    }
}

fn extract_detail(datasource: Node<'_, '_>) -> DatasourceDetail {
    let mut detail = DatasourceDetail::default();

    if let Some(connection) = elements(datasource, "connection").next() {
        detail.connection_type = connection.attribute("class").map(str::to_string);
        detail.server = connection.attribute("server").map(str::to_string);
        detail.database = connection
            .attribute("dbname")
            .filter(|v| !v.is_empty())
            .or_else(|| connection.attribute("database"))
            .map(str::to_string);
        detail.initial_sql = connection.attribute("initial-sql").map(str::to_string);

        if let Some(relation) = elements(connection, "relation").next() {
            if relation.attribute("type") == Some("text") {
                detail.custom_sql = relation.text().map(str::to_string);
            }
        }
    }

    detail.tables = elements(datasource, "relation")
        .filter_map(|relation| relation.attribute("table"))
        .map(str::to_string)
        .collect();

    detail.columns = elements(datasource, "column")
        .filter_map(|column| {
            let name = column.attribute("name").filter(|v| !v.is_empty())?;
            let datatype = column.attribute("datatype").filter(|v| !v.is_empty())?;
            Some((name.to_string(), datatype.to_string()))
        })
        .collect();

    detail.calculated_fields = extract_calculated_fields(datasource);
    detail
}

fn extract_calculated_fields(datasource: Node<'_, '_>) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for column in elements(datasource, "column").filter(|c| c.has_attribute("datatype")) {
        let calculation = column
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "calculation");
        if let Some(calculation) = calculation {
            if calculation.attribute("class") == Some("tableau") {
                let caption = column.attribute("caption").unwrap_or_default();
                let formula = calculation.attribute("formula").unwrap_or_default();
                fields.insert(caption.to_string(), formula.to_string());
            }
        }
    }
    fields
}

fn extract_parameters(root: Node<'_, '_>) -> BTreeMap<String, Section> {
    let mut parameters = BTreeMap::new();
    let container = elements(root, "datasource")
        .find(|n| n.attribute("name") == Some(PARAMETERS_DATASOURCE));

    if let Some(container) = container {
        // Current Tableau versions drop param='true' and mark parameter
        // columns only with param-domain-type
        let params = elements(container, "column").filter(|c| {
            c.attribute("param") == Some("true") || c.has_attribute("param-domain-type")
        });
        for param in params {
            let name = param.attribute("name").unwrap_or(UNNAMED).to_string();
            parameters.insert(name.clone(), section_from(param, name));
        }
    }
    parameters
}
