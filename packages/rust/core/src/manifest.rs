//! Per-template field manifests.
//!
//! A manifest names the canonical-document fields a template needs, split
//! into required (critical), optional and conditional categories, plus
//! default values for optional fields. Field references are dotted paths
//! (`program_manager.name`) or bare names (`recipient_name`) resolved
//! against the top level and then the `project`, `reviewer`,
//! `program_manager` and `summary` sections.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use auditdoc_shared::{AuditDocError, CanonicalDocument, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

/// Sections searched, in order, when a field reference is a bare name.
const BARE_NAME_SECTIONS: [&str; 4] = ["project", "reviewer", "program_manager", "summary"];

/// Manifests compiled into the binary.
const BUILTIN_MANIFESTS: [&str; 2] = [
    include_str!("../../../../templates/draft-audit-report.manifest.json"),
    include_str!("../../../../templates/recipient-information-request.manifest.json"),
];

/// A field that is critical only while the boolean at `when` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalField {
    pub field: String,
    pub when: String,
}

/// Field requirements of one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateManifest {
    pub template_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "criticalFields")]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub optional_fields: Vec<String>,
    #[serde(default)]
    pub conditional_fields: Vec<ConditionalField>,
    /// Values substituted for missing optional fields.
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
}

impl TemplateManifest {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| AuditDocError::config(format!("invalid template manifest: {e}")))
    }

    /// Conditional fields whose condition holds for `doc`.
    pub fn active_conditionals(&self, doc: &Value) -> Vec<&str> {
        self.conditional_fields
            .iter()
            .filter(|c| resolve_field(doc, &c.when).and_then(Value::as_bool) == Some(true))
            .map(|c| c.field.as_str())
            .collect()
    }

    /// Fill missing optional fields from `defaults`.
    ///
    /// Returns the defaulted document and one warning per substituted field.
    /// A default whose type does not fit the field is a manifest defect.
    pub fn apply_defaults(&self, doc: &CanonicalDocument) -> Result<(CanonicalDocument, Vec<String>)> {
        let mut value = doc.to_value()?;
        let mut warnings = Vec::new();

        for field in &self.optional_fields {
            let Some(default) = self.defaults.get(field) else {
                continue;
            };
            if is_present(resolve_field(&value, field)) {
                continue;
            }
            let Some(slot) = resolve_field_mut(&mut value, field) else {
                continue;
            };
            *slot = default.clone();
            warnings.push(format!("{field} missing; defaulted to {default}"));
        }

        if warnings.is_empty() {
            return Ok((doc.clone(), warnings));
        }

        let defaulted = serde_json::from_value(value).map_err(|e| {
            AuditDocError::config(format!(
                "manifest '{}' has a default of the wrong type: {e}",
                self.template_id
            ))
        })?;
        debug!(template_id = %self.template_id, defaulted = warnings.len(), "optional defaults applied");
        Ok((defaulted, warnings))
    }
}

// ---------------------------------------------------------------------------
// Field resolution
// ---------------------------------------------------------------------------

/// Look up a manifest field reference in a canonical document value.
pub fn resolve_field<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    if field.contains('.') {
        return field.split('.').try_fold(doc, |current, key| current.get(key));
    }
    doc.get(field).or_else(|| {
        BARE_NAME_SECTIONS
            .iter()
            .find_map(|section| doc.get(*section).and_then(|s| s.get(field)))
    })
}

fn resolve_field_mut<'a>(doc: &'a mut Value, field: &str) -> Option<&'a mut Value> {
    if field.contains('.') {
        return field
            .split('.')
            .try_fold(doc, |current, key| current.get_mut(key));
    }
    if doc.get(field).is_some() {
        return doc.get_mut(field);
    }
    let section = BARE_NAME_SECTIONS
        .iter()
        .find(|section| doc.get(**section).and_then(|s| s.get(field)).is_some())?;
    doc.get_mut(*section).and_then(|s| s.get_mut(field))
}

/// Present means: exists, is not null, and is not an empty string or list.
pub fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Manifests by template id.
#[derive(Debug, Clone, Default)]
pub struct ManifestRegistry {
    manifests: HashMap<String, TemplateManifest>,
}

impl ManifestRegistry {
    /// Registry holding the manifests shipped with the binary.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::default();
        for text in BUILTIN_MANIFESTS {
            registry.insert(TemplateManifest::from_json(text)?);
        }
        Ok(registry)
    }

    /// Built-ins overlaid with every `*.manifest.json` found in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut registry = Self::builtin()?;
        if !dir.is_dir() {
            return Ok(registry);
        }

        let entries = std::fs::read_dir(dir).map_err(|e| AuditDocError::io(dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| AuditDocError::io(dir, e))?.path();
            let is_manifest = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".manifest.json"));
            if !is_manifest {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|e| AuditDocError::io(&path, e))?;
            let manifest: TemplateManifest = serde_json::from_str(&text).map_err(|e| {
                AuditDocError::config(format!("invalid template manifest {}: {e}", path.display()))
            })?;
            info!(template_id = %manifest.template_id, path = %path.display(), "manifest loaded");
            registry.insert(manifest);
        }
        Ok(registry)
    }

    pub fn insert(&mut self, manifest: TemplateManifest) {
        self.manifests.insert(manifest.template_id.clone(), manifest);
    }

    pub fn get(&self, template_id: &str) -> Result<&TemplateManifest> {
        let id = template_id.strip_suffix(".docx").unwrap_or(template_id);
        self.manifests
            .get(id)
            .ok_or_else(|| AuditDocError::config(format!("no field manifest for template '{id}'")))
    }

    pub fn template_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.manifests.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture_doc() -> CanonicalDocument {
        let content = std::fs::read_to_string("../../../fixtures/json/canonical-document.json")
            .expect("read canonical fixture");
        serde_json::from_str(&content).expect("parse fixture")
    }

    #[test]
    fn builtins_parse() {
        let registry = ManifestRegistry::builtin().unwrap();
        assert_eq!(
            registry.template_ids(),
            vec!["draft-audit-report", "recipient-information-request"]
        );
        let draft = registry.get("draft-audit-report.docx").unwrap();
        assert!(draft.required_fields.contains(&"recipient_name".to_string()));
        assert!(registry.get("unknown").is_err());
    }

    #[test]
    fn critical_fields_alias() {
        let m = TemplateManifest::from_json(
            r#"{"templateId": "x", "criticalFields": ["recipient_name"]}"#,
        )
        .unwrap();
        assert_eq!(m.required_fields, vec!["recipient_name"]);
    }

    #[test]
    fn resolves_bare_and_dotted_names() {
        let doc = json!({
            "project_id": "33",
            "project": {"recipient_name": "GVTA", "empty": ""},
            "program_manager": {"name": "Sam"},
            "summary": {"deficiencyCount": 0}
        });
        assert_eq!(resolve_field(&doc, "project_id"), Some(&json!("33")));
        assert_eq!(resolve_field(&doc, "recipient_name"), Some(&json!("GVTA")));
        assert_eq!(resolve_field(&doc, "program_manager.name"), Some(&json!("Sam")));
        assert_eq!(resolve_field(&doc, "deficiencyCount"), Some(&json!(0)));
        assert_eq!(resolve_field(&doc, "project.missing"), None);

        assert!(is_present(resolve_field(&doc, "deficiencyCount")));
        assert!(!is_present(resolve_field(&doc, "empty")));
        assert!(!is_present(resolve_field(&doc, "nowhere")));
    }

    #[test]
    fn conditional_fields_follow_their_flag() {
        let m = TemplateManifest::from_json(
            r#"{"templateId": "x", "conditionalFields": [{"field": "subrecipientName", "when": "summary.reviewedSubrecipients"}]}"#,
        )
        .unwrap();
        let on = json!({"summary": {"reviewedSubrecipients": true}});
        let off = json!({"summary": {"reviewedSubrecipients": false}});
        assert_eq!(m.active_conditionals(&on), vec!["subrecipientName"]);
        assert!(m.active_conditionals(&off).is_empty());
    }

    #[test]
    fn defaults_fill_missing_optionals_with_warnings() {
        let mut doc = fixture_doc();
        doc.project.recipient_website = None;
        doc.program_manager.title = None;

        let registry = ManifestRegistry::builtin().unwrap();
        let manifest = registry.get("draft-audit-report").unwrap();
        let (defaulted, warnings) = manifest.apply_defaults(&doc).unwrap();

        assert_eq!(defaulted.project.recipient_website.as_deref(), Some("N/A"));
        assert_eq!(defaulted.program_manager.title.as_deref(), Some("Program Manager"));
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("recipient_website"));
        // The input document is never mutated.
        assert!(doc.project.recipient_website.is_none());
    }

    #[test]
    fn ill_typed_default_is_a_config_error() {
        let mut doc = fixture_doc();
        doc.project.site_visit_start_date = None;
        let manifest = TemplateManifest::from_json(
            r#"{"templateId": "x", "optionalFields": ["site_visit_start_date"], "defaults": {"site_visit_start_date": "TBD"}}"#,
        )
        .unwrap();
        assert!(matches!(
            manifest.apply_defaults(&doc),
            Err(AuditDocError::Config { .. })
        ));
    }
}
