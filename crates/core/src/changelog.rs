//! Field-level change log between two versions of an inspection form.
//!
//! The API stores the log next to each inspection update so that reviewers
//! can see what moved between versions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inspection::{InspectionDraft, Section};

pub const PROJECT_INFORMATION: &str = "Project Information";
pub const PRE_INSPECTION: &str = "Pre-Inspection";
pub const POST_INSPECTION: &str = "Post-Inspection";
pub const SITE_INSPECTIONS: &str = "Site Inspections";

/// One changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub field: String,
    pub from: Value,
    pub to: Value,
}

/// Diff `new` against `old`.
///
/// Only fields present in `new` are considered. Values compare by their
/// textual form, with `null` and a missing value both reading as the empty
/// string, so `1` and `"1"` are the same answer.
pub fn change_log(old: &InspectionDraft, new: &InspectionDraft) -> Vec<ChangeEntry> {
    let mut changes = Vec::new();

    diff_section(&mut changes, PROJECT_INFORMATION, None, &old.project_information, &new.project_information);
    diff_section(&mut changes, PRE_INSPECTION, None, &old.pre_inspection, &new.pre_inspection);
    diff_section(&mut changes, POST_INSPECTION, None, &old.post_inspection, &new.post_inspection);

    let empty = Section::new();
    for (category, fields) in &new.site_inspections {
        let previous = old.site_inspections.get(category).unwrap_or(&empty);
        diff_section(&mut changes, SITE_INSPECTIONS, Some(category), previous, fields);
    }

    changes
}

fn diff_section(
    changes: &mut Vec<ChangeEntry>,
    category: &str,
    subcategory: Option<&String>,
    old: &Section,
    new: &Section,
) {
    for (field, to) in new {
        let from = old.get(field).cloned().unwrap_or(Value::Null);
        if as_text(&from) != as_text(to) {
            changes.push(ChangeEntry {
                category: category.to_string(),
                subcategory: subcategory.cloned(),
                field: field.clone(),
                from,
                to: to.clone(),
            });
        }
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.is_finite() && f.fract() == 0.0 => format!("{f:.0}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
