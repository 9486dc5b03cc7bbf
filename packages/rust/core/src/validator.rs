//! Schema and completeness validation of canonical documents.
//!
//! [`validate_schema`] checks structure, enums, cardinality and the
//! derived-summary invariants of a canonical document in JSON form.
//! [`check_completeness`] checks one template's field manifest against a
//! document. Both are pure.

use std::collections::HashSet;

use auditdoc_shared::{
    AuditDocError, CanonicalDocument, ExitConferenceFormat, N_FIXED_AREAS, Result, ReviewArea,
    ReviewType, SCHEMA_VERSION,
};
use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::manifest::{TemplateManifest, is_present, resolve_field};

/// Deficiency counts above this draw a data-quality warning.
const HIGH_DEFICIENCY_COUNT: u64 = 10;

const TOP_LEVEL_KEYS: [&str; 9] = [
    "project_id",
    "generated_at",
    "schema_version",
    "project",
    "reviewer",
    "program_manager",
    "assessments",
    "enhancedReviewItems",
    "summary",
];

/// Detail fields that must be set on deficient rows and null elsewhere.
const REQUIRED_DETAIL_FIELDS: [&str; 4] =
    ["deficiencyCode", "description", "correctiveAction", "dueDate"];

/// Result of [`validate_schema`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// The warnings when valid, else a `SchemaInvalid` error with every problem.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(AuditDocError::SchemaInvalid {
                errors: self.errors,
            })
        }
    }
}

/// Result of [`check_completeness`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessReport {
    pub template_id: String,
    pub missing_critical: Vec<String>,
    pub missing_optional: Vec<String>,
    pub can_generate: bool,
    pub quality_score: u8,
}

impl CompletenessReport {
    /// `IncompleteData` when a critical field is missing.
    pub fn ensure_can_generate(&self) -> Result<()> {
        if self.can_generate {
            Ok(())
        } else {
            Err(AuditDocError::IncompleteData {
                missing_fields: self.missing_critical.clone(),
                quality_score: self.quality_score,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Schema validation
// ---------------------------------------------------------------------------

/// Validate a canonical document in JSON form.
pub fn validate_schema(doc: &Value) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let Some(root) = doc.as_object() else {
        return ValidationReport {
            valid: false,
            errors: vec!["root: expected an object".into()],
            warnings,
        };
    };

    for key in TOP_LEVEL_KEYS {
        if !root.contains_key(key) {
            errors.push(format!("{key}: required key missing"));
        }
    }

    check_header(root, &mut errors);
    if let Some(project) = root.get("project") {
        check_project(project, &mut errors);
    }
    for section in ["reviewer", "program_manager"] {
        if let Some(value) = root.get(section) {
            check_string_section(section, value, &mut errors);
        }
    }
    let deficient_areas = root
        .get("assessments")
        .map(|a| check_assessments(a, &mut errors))
        .unwrap_or_default();
    let erf_areas = root
        .get("enhancedReviewItems")
        .map(|e| check_erf_items(e, &mut errors))
        .unwrap_or_default();
    if let Some(summary) = root.get("summary") {
        check_summary(summary, &deficient_areas, &erf_areas, &mut errors, &mut warnings);
    }

    // Anything the targeted checks missed still has to load as a document.
    if errors.is_empty() {
        if let Err(e) = serde_json::from_value::<CanonicalDocument>(doc.clone()) {
            errors.push(format!("root: {e}"));
        }
    }

    for e in &errors {
        debug!(error = %e, "schema violation");
    }
    let valid = errors.is_empty();
    info!(
        valid,
        error_count = errors.len(),
        warning_count = warnings.len(),
        "schema validation complete"
    );
    ValidationReport {
        valid,
        errors,
        warnings,
    }
}

/// Validate a typed document through its JSON form.
pub fn validate_document(doc: &CanonicalDocument) -> Result<ValidationReport> {
    Ok(validate_schema(&doc.to_value()?))
}

fn check_header(root: &Map<String, Value>, errors: &mut Vec<String>) {
    match root.get("project_id") {
        Some(Value::String(id)) if !id.trim().is_empty() => {}
        Some(_) => errors.push("project_id: expected a non-empty string".into()),
        None => {}
    }

    match root.get("generated_at") {
        Some(Value::String(ts)) if DateTime::parse_from_rfc3339(ts).is_ok() => {}
        Some(_) => errors.push("generated_at: expected an RFC 3339 timestamp".into()),
        None => {}
    }

    match root.get("schema_version") {
        Some(Value::String(v)) if v == SCHEMA_VERSION => {}
        Some(Value::String(v)) => errors.push(format!(
            "schema_version: '{v}' does not match supported version '{SCHEMA_VERSION}'"
        )),
        Some(_) => errors.push("schema_version: expected a string".into()),
        None => {}
    }
}

fn check_project(project: &Value, errors: &mut Vec<String>) {
    let Some(obj) = project.as_object() else {
        errors.push("project: expected an object".into());
        return;
    };

    match obj.get("review_type") {
        Some(Value::String(label))
            if ReviewType::parse(label).is_some_and(|t| t.label() == label) => {}
        Some(other) => errors.push(format!(
            "project.review_type: {other} is not one of '{}', '{}', '{}'",
            ReviewType::Triennial.label(),
            ReviewType::StateManagement.label(),
            ReviewType::Combined.label()
        )),
        None => errors.push("project.review_type: required key missing".into()),
    }

    match obj.get("exit_conference_format") {
        Some(Value::String(f))
            if ExitConferenceFormat::parse(f).is_some_and(|x| x.as_str() == f) => {}
        Some(other) => errors.push(format!(
            "project.exit_conference_format: {other} is not 'virtual' or 'in-person'"
        )),
        None => errors.push("project.exit_conference_format: required key missing".into()),
    }

    match obj.get("region_number") {
        None | Some(Value::Null) => {}
        Some(Value::Number(n)) if n.as_u64().is_some_and(|r| (1..=10).contains(&r)) => {}
        Some(other) => errors.push(format!("project.region_number: {other} is not a region 1-10")),
    }

    for key in ["site_visit_start_date", "site_visit_end_date", "report_date"] {
        check_optional_date(&format!("project.{key}"), obj.get(key), errors);
    }

    for key in [
        "recipient_name",
        "recipient_acronym",
        "recipient_city_state",
        "recipient_id",
        "recipient_website",
    ] {
        if let Some(value) = obj.get(key) {
            if !value.is_null() && !value.is_string() {
                errors.push(format!("project.{key}: expected a string or null"));
            }
        }
    }
}

fn check_string_section(section: &str, value: &Value, errors: &mut Vec<String>) {
    let Some(obj) = value.as_object() else {
        errors.push(format!("{section}: expected an object"));
        return;
    };
    for (key, v) in obj {
        if !v.is_null() && !v.is_string() {
            errors.push(format!("{section}.{key}: expected a string or null"));
        }
    }
}

/// Check the assessment rows; returns the deficient areas in row order.
fn check_assessments(assessments: &Value, errors: &mut Vec<String>) -> Vec<String> {
    let Some(rows) = assessments.as_array() else {
        errors.push("assessments: expected an array".into());
        return Vec::new();
    };

    if rows.len() != N_FIXED_AREAS {
        errors.push(format!(
            "assessments: expected exactly {N_FIXED_AREAS} review areas, found {}",
            rows.len()
        ));
    }

    let mut seen = HashSet::new();
    let mut deficient = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let at = format!("assessments[{i}]");
        let Some(obj) = row.as_object() else {
            errors.push(format!("{at}: expected an object"));
            continue;
        };

        let area = obj.get("reviewArea").and_then(Value::as_str);
        match area {
            Some(name) if ReviewArea::from_name(name).is_some() => {
                if !seen.insert(name) {
                    errors.push(format!("{at}.reviewArea: '{name}' appears more than once"));
                }
            }
            Some(name) => errors.push(format!("{at}.reviewArea: '{name}' is not a review area")),
            None => errors.push(format!("{at}.reviewArea: required string missing")),
        }

        let finding = obj.get("finding").and_then(Value::as_str);
        match finding {
            Some("D") => {
                if let Some(name) = area {
                    deficient.push(name.to_string());
                }
                for field in REQUIRED_DETAIL_FIELDS {
                    if !is_present(obj.get(field)) {
                        errors.push(format!("{at}.{field}: required on a deficient finding"));
                    }
                }
            }
            Some("ND") | Some("NA") => {
                for field in REQUIRED_DETAIL_FIELDS.iter().chain(&["dateClosed"]) {
                    if obj.get(*field).is_some_and(|v| !v.is_null()) {
                        errors.push(format!("{at}.{field}: must be null unless the finding is D"));
                    }
                }
            }
            Some(other) => errors.push(format!("{at}.finding: '{other}' is not D, ND or NA")),
            None => errors.push(format!("{at}.finding: required string missing")),
        }

        check_optional_date(&format!("{at}.dueDate"), obj.get("dueDate"), errors);
        check_optional_date(&format!("{at}.dateClosed"), obj.get("dateClosed"), errors);
    }

    deficient
}

fn check_erf_items(items: &Value, errors: &mut Vec<String>) -> Vec<String> {
    let Some(list) = items.as_array() else {
        errors.push("enhancedReviewItems: expected an array".into());
        return Vec::new();
    };
    list.iter()
        .enumerate()
        .filter_map(|(i, item)| match item.get("area").and_then(Value::as_str) {
            Some(area) => Some(area.to_string()),
            None => {
                errors.push(format!("enhancedReviewItems[{i}].area: required string missing"));
                None
            }
        })
        .collect()
}

fn check_summary(
    summary: &Value,
    deficient_areas: &[String],
    erf_areas: &[String],
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let Some(obj) = summary.as_object() else {
        errors.push("summary: expected an object".into());
        return;
    };

    match obj.get("hasDeficiencies").and_then(Value::as_bool) {
        Some(has) if has != !deficient_areas.is_empty() => errors.push(format!(
            "summary.hasDeficiencies: {has} disagrees with {} deficient assessment(s)",
            deficient_areas.len()
        )),
        Some(_) => {}
        None => errors.push("summary.hasDeficiencies: required boolean missing".into()),
    }

    match obj.get("deficiencyCount").and_then(Value::as_u64) {
        Some(count) => {
            if count != deficient_areas.len() as u64 {
                errors.push(format!(
                    "summary.deficiencyCount: {count} but {} assessment(s) are deficient",
                    deficient_areas.len()
                ));
            }
            if count > HIGH_DEFICIENCY_COUNT {
                warnings.push(format!(
                    "summary.deficiencyCount: high deficiency count ({count}), verify accuracy"
                ));
                warn!(count, "unusually high deficiency count");
            }
        }
        None => errors.push("summary.deficiencyCount: required non-negative integer missing".into()),
    }

    match string_list(obj.get("deficiencyAreas")) {
        Some(areas) if areas == deficient_areas => {}
        Some(_) => errors.push(
            "summary.deficiencyAreas: must list the deficient areas in assessment order".into(),
        ),
        None => errors.push("summary.deficiencyAreas: required list of strings missing".into()),
    }

    match obj.get("erfCount").and_then(Value::as_u64) {
        Some(count) if count == erf_areas.len() as u64 => {}
        Some(count) => errors.push(format!(
            "summary.erfCount: {count} but {} enhanced review item(s) present",
            erf_areas.len()
        )),
        None => errors.push("summary.erfCount: required non-negative integer missing".into()),
    }

    if let Some(list) = obj.get("erfAreas") {
        if string_list(Some(list)).as_deref() != Some(erf_areas) {
            errors.push("summary.erfAreas: must list the enhanced review item areas".into());
        }
    }

    if !obj.get("reviewedSubrecipients").is_some_and(Value::is_boolean) {
        errors.push("summary.reviewedSubrecipients: required boolean missing".into());
    }
    match obj.get("subrecipientName") {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => errors.push("summary.subrecipientName: expected a string or null".into()),
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value?
        .as_array()?
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn check_optional_date(at: &str, value: Option<&Value>, errors: &mut Vec<String>) {
    match value {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => {}
        Some(other) => errors.push(format!("{at}: {other} is not a YYYY-MM-DD date")),
    }
}

// ---------------------------------------------------------------------------
// Completeness
// ---------------------------------------------------------------------------

/// Check `doc` against a template's field manifest.
///
/// Missing critical or active conditional fields block generation; missing
/// optional fields only lower the quality score.
pub fn check_completeness(doc: &Value, manifest: &TemplateManifest) -> CompletenessReport {
    let conditional = manifest.active_conditionals(doc);

    let mut missing_critical = missing_fields(doc, manifest.required_fields.iter().map(String::as_str));
    missing_critical.extend(missing_fields(doc, conditional.iter().copied()));
    let missing_optional = missing_fields(doc, manifest.optional_fields.iter().map(String::as_str));

    let total = manifest.required_fields.len() + conditional.len() + manifest.optional_fields.len();
    let present = total - missing_critical.len() - missing_optional.len();
    let quality_score = if total == 0 {
        100
    } else {
        (present * 100 / total) as u8
    };
    let can_generate = missing_critical.is_empty();

    info!(
        template_id = %manifest.template_id,
        quality_score,
        missing_critical = missing_critical.len(),
        missing_optional = missing_optional.len(),
        can_generate,
        "completeness check complete"
    );

    CompletenessReport {
        template_id: manifest.template_id.clone(),
        missing_critical,
        missing_optional,
        can_generate,
        quality_score,
    }
}

fn missing_fields<'a>(doc: &Value, fields: impl Iterator<Item = &'a str>) -> Vec<String> {
    fields
        .filter(|field| !is_present(resolve_field(doc, field)))
        .map(str::to_string)
        .collect()
}
