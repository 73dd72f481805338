//! Inspection form state as it is drafted locally and exchanged with the API.
//!
//! A draft mirrors the four sections of the inspection form. Field values are
//! kept as raw JSON (strings, numbers, `0`/`1` flags) because the field
//! schema is owned by the UI layer, not by this crate.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DomainError, DomainResult};

/// Flat mapping from field name to value.
pub type Section = BTreeMap<String, Value>;

/// Server bookkeeping columns that never belong in an editable section.
pub const BOOKKEEPING_FIELDS: [&str; 4] = ["id", "created_at", "updated_at", "inspection_id"];

/// Project-information fields the edit form always shows, even when the
/// server omitted them.
const REQUIRED_PROJECT_FIELDS: [&str; 4] =
    ["project_name", "client", "inspection_date", "inspector_name"];

/// One form in progress: either a new inspection or pending edits to an
/// existing one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionDraft {
    #[serde(default)]
    pub pre_inspection: Section,
    #[serde(default)]
    pub project_information: Section,
    /// Category name → sub-field map.
    #[serde(default)]
    pub site_inspections: BTreeMap<String, Section>,
    #[serde(default)]
    pub post_inspection: Section,
    /// Anything else the form stored alongside the sections.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InspectionDraft {
    /// A draft only counts once project information holds more than one
    /// field; a single key is what a freshly mounted form writes on its own.
    pub fn is_valid(&self) -> bool {
        self.project_information.len() > 1
    }

    /// Set a project-information field, returning `self` for chaining.
    pub fn with_project_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.project_information.insert(field.into(), value.into());
        self
    }

    /// Build an edit draft from a full inspection detail returned by the API.
    pub fn from_detail(detail: &Value) -> DomainResult<Self> {
        let object = detail
            .as_object()
            .ok_or_else(|| DomainError::malformed("inspection detail is not an object"))?;

        let mut project_information = clean_section(object.get("project_information"));
        for field in REQUIRED_PROJECT_FIELDS {
            let value = project_information
                .remove(field)
                .filter(|v| !v.is_null())
                .unwrap_or_else(|| Value::String(String::new()));
            project_information.insert(field.to_string(), value);
        }

        let site_inspections = match object.get("site_inspections") {
            Some(Value::Object(categories)) => categories
                .iter()
                .filter_map(|(category, fields)| match fields {
                    Value::Object(fields) => Some((
                        category.clone(),
                        fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                    )),
                    _ => None,
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        Ok(Self {
            pre_inspection: clean_section(object.get("pre_inspection")),
            project_information,
            site_inspections,
            post_inspection: clean_section(object.get("post_inspection")),
            extra: BTreeMap::new(),
        })
    }

    /// Render the draft as the body the API expects for create/update.
    pub fn to_payload(&self, inspector_name: Option<&str>) -> Value {
        let mut body = Map::new();
        for field in ["project_name", "client", "inspection_date"] {
            body.insert(
                field.to_string(),
                self.project_information.get(field).cloned().unwrap_or(Value::Null),
            );
        }
        if let Some(name) = inspector_name {
            body.insert("inspector_name".to_string(), Value::String(name.to_string()));
        }
        body.insert("pre_inspection".to_string(), section_to_value(&strip(&self.pre_inspection)));
        body.insert(
            "project_information".to_string(),
            section_to_value(&strip(&self.project_information)),
        );
        body.insert(
            "site_inspections".to_string(),
            Value::Object(
                self.site_inspections
                    .iter()
                    .map(|(category, fields)| (category.clone(), section_to_value(fields)))
                    .collect(),
            ),
        );
        body.insert(
            "post_inspection".to_string(),
            section_to_value(&strip(&self.post_inspection)),
        );
        Value::Object(body)
    }
}

/// Single source of truth for "should the UI offer to restore this draft".
pub fn is_valid_draft(draft: Option<&InspectionDraft>) -> bool {
    draft.is_some_and(InspectionDraft::is_valid)
}

fn clean_section(raw: Option<&Value>) -> Section {
    match raw {
        Some(Value::Object(fields)) => fields
            .iter()
            .filter(|(k, _)| !BOOKKEEPING_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Section::new(),
    }
}

fn strip(section: &Section) -> Section {
    section
        .iter()
        .filter(|(k, _)| !BOOKKEEPING_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn section_to_value(section: &Section) -> Value {
    Value::Object(section.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}
