//! Conditional context builder.
//!
//! Turns a validated [`CanonicalDocument`] into the flat, typed
//! [`RenderContext`] a template merges against. Each content-selection
//! rule is a small pure function writing its own disjoint set of keys:
//!
//! - review-type routing (`isTriennial`, `isStateManagement`)
//! - deficiency alternation (`hasDeficiencies`)
//! - section and paragraph inclusion (`showErfSection`, `showSubrecipientSection`)
//! - exit-format selection (`exitFormat`)
//! - deficiency table shaping (`deficiencyTable`)
//! - list formatting (`deficiencyAreasText`, `erfAreasText`)
//! - count substitution (`deficiencyCountText`, `erfCountText`)
//!
//! Grammar agreement is not precomputed here; it is exposed to templates as
//! helpers by [`RenderContext::to_merge_context`].

use auditdoc_render::MergeContext;
use auditdoc_shared::{
    Assessment, AuditDocError, CanonicalDocument, ErfItem, ExitConferenceFormat, Result,
};
use serde::Serialize;
use tracing::debug;

use crate::grammar::{count_or_no, format_date, format_date_range, format_list, register_helpers};

/// One row of the deficiency table. Detail columns are empty strings on
/// rows that are not deficient.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeficiencyRow {
    pub review_area: String,
    pub finding: String,
    pub deficiency_code: String,
    pub description: String,
    pub corrective_action: String,
    pub due_date: String,
    /// Empty while the deficiency is still open.
    pub date_closed: String,
}

/// Every key a template may reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    // Identity
    pub project_id: String,
    pub region_number: Option<u8>,
    pub review_type: String,
    pub recipient_name: Option<String>,
    pub recipient_acronym: Option<String>,
    pub recipient_city_state: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_website: Option<String>,
    pub report_date: Option<String>,
    pub site_visit_dates: String,
    pub contractor_name: Option<String>,
    pub lead_reviewer_name: Option<String>,
    pub lead_reviewer_phone: Option<String>,
    pub lead_reviewer_email: Option<String>,
    pub program_manager_name: Option<String>,
    pub program_manager_title: Option<String>,
    pub program_manager_phone: Option<String>,
    pub program_manager_email: Option<String>,

    // Review-type routing
    pub is_triennial: bool,
    pub is_state_management: bool,

    // Alternation and inclusion
    pub has_deficiencies: bool,
    pub show_erf_section: bool,
    pub show_subrecipient_section: bool,
    pub subrecipient_name: Option<String>,
    pub exit_format: ExitConferenceFormat,

    // Deficiencies
    pub deficiency_table: Option<Vec<DeficiencyRow>>,
    pub deficiency_count: u32,
    pub deficiency_count_text: String,
    pub deficiency_areas: Vec<String>,
    pub deficiency_areas_text: String,

    // Enhanced Review Focus
    pub erf_items: Vec<ErfItem>,
    pub erf_count: u32,
    pub erf_count_text: String,
    pub erf_areas: Vec<String>,
    pub erf_areas_text: String,
}

impl RenderContext {
    /// Merge values plus the grammar helpers.
    pub fn to_merge_context(&self) -> Result<MergeContext> {
        Ok(register_helpers(MergeContext::from_serializable(self)?))
    }
}

/// Build the render context for a document that already passed schema
/// validation. A deficient row without its detail fields is a validator
/// defect and fails with `SchemaInvalid`.
pub fn build_context(doc: &CanonicalDocument) -> Result<RenderContext> {
    let (is_triennial, is_state_management) = review_type_flags(doc);
    let (show_erf_section, show_subrecipient_section) = section_flags(doc);
    let deficiency_areas: Vec<String> = doc
        .summary
        .deficiency_areas
        .iter()
        .map(|a| a.name().to_string())
        .collect();

    let ctx = RenderContext {
        project_id: doc.project_id.clone(),
        region_number: doc.project.region_number,
        review_type: doc.project.review_type.label().to_string(),
        recipient_name: doc.project.recipient_name.clone(),
        recipient_acronym: doc.project.recipient_acronym.clone(),
        recipient_city_state: doc.project.recipient_city_state.clone(),
        recipient_id: doc.project.recipient_id.clone(),
        recipient_website: doc.project.recipient_website.clone(),
        report_date: doc.project.report_date.map(format_date),
        site_visit_dates: format_date_range(
            doc.project.site_visit_start_date,
            doc.project.site_visit_end_date,
        ),
        contractor_name: doc.reviewer.contractor_name.clone(),
        lead_reviewer_name: doc.reviewer.lead_reviewer_name.clone(),
        lead_reviewer_phone: doc.reviewer.lead_reviewer_phone.clone(),
        lead_reviewer_email: doc.reviewer.lead_reviewer_email.clone(),
        program_manager_name: doc.program_manager.name.clone(),
        program_manager_title: doc.program_manager.title.clone(),
        program_manager_phone: doc.program_manager.phone.clone(),
        program_manager_email: doc.program_manager.email.clone(),

        is_triennial,
        is_state_management,

        has_deficiencies: doc.summary.has_deficiencies,
        show_erf_section,
        show_subrecipient_section,
        subrecipient_name: doc.summary.subrecipient_name.clone(),
        exit_format: doc.project.exit_conference_format,

        deficiency_table: deficiency_table(doc)?,
        deficiency_count: doc.summary.deficiency_count,
        deficiency_count_text: count_or_no(u64::from(doc.summary.deficiency_count)),
        deficiency_areas_text: format_list(&deficiency_areas),
        deficiency_areas,

        erf_items: doc.enhanced_review_items.clone(),
        erf_count: doc.summary.erf_count,
        erf_count_text: count_or_no(u64::from(doc.summary.erf_count)),
        erf_areas_text: format_list(&doc.summary.erf_areas),
        erf_areas: doc.summary.erf_areas.clone(),
    };

    debug!(
        project_id = %ctx.project_id,
        is_triennial,
        is_state_management,
        has_deficiencies = ctx.has_deficiencies,
        show_erf_section,
        "render context built"
    );
    Ok(ctx)
}

/// Combined reviews set both flags.
fn review_type_flags(doc: &CanonicalDocument) -> (bool, bool) {
    let review_type = doc.project.review_type;
    (
        review_type.includes_triennial(),
        review_type.includes_state_management(),
    )
}

fn section_flags(doc: &CanonicalDocument) -> (bool, bool) {
    (doc.summary.erf_count > 0, doc.summary.reviewed_subrecipients)
}

/// `None` without deficiencies; otherwise every assessment row in order.
fn deficiency_table(doc: &CanonicalDocument) -> Result<Option<Vec<DeficiencyRow>>> {
    if !doc.summary.has_deficiencies {
        return Ok(None);
    }
    doc.assessments
        .iter()
        .map(deficiency_row)
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn deficiency_row(a: &Assessment) -> Result<DeficiencyRow> {
    let area = a.review_area.name().to_string();
    let finding = a.finding.code().to_string();

    if !a.is_deficient() {
        return Ok(DeficiencyRow {
            review_area: area,
            finding,
            deficiency_code: String::new(),
            description: String::new(),
            corrective_action: String::new(),
            due_date: String::new(),
            date_closed: String::new(),
        });
    }

    let required = |field: &str, value: Option<&String>| -> Result<String> {
        value.cloned().ok_or_else(|| AuditDocError::SchemaInvalid {
            errors: vec![format!("{area}: deficient finding has no {field}")],
        })
    };
    let deficiency_code = required("deficiencyCode", a.deficiency_code.as_ref())?;
    let description = required("description", a.description.as_ref())?;
    let corrective_action = required("correctiveAction", a.corrective_action.as_ref())?;
    let due_date = a.due_date.map(format_date).ok_or_else(|| AuditDocError::SchemaInvalid {
        errors: vec![format!("{area}: deficient finding has no dueDate")],
    })?;

    Ok(DeficiencyRow {
        review_area: area,
        finding,
        deficiency_code,
        description,
        corrective_action,
        due_date,
        date_closed: a.date_closed.map(format_date).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditdoc_shared::{Finding, N_FIXED_AREAS, ReviewArea, ReviewType, Summary};
    use chrono::NaiveDate;
    use serde_json::{Value, json};

    fn fixture() -> CanonicalDocument {
        let content = std::fs::read_to_string("../../../fixtures/json/canonical-document.json")
            .expect("read canonical fixture");
        serde_json::from_str(&content).expect("parse fixture")
    }

    fn resummarize(doc: &mut CanonicalDocument) {
        doc.summary = Summary::derive(
            &doc.assessments,
            &doc.enhanced_review_items,
            doc.summary.reviewed_subrecipients,
            doc.summary.subrecipient_name.clone(),
        );
    }

    /// Every area non-deficient, no ERF items, no subrecipients.
    fn clean() -> CanonicalDocument {
        let mut doc = fixture();
        doc.assessments = ReviewArea::ALL
            .iter()
            .map(|area| Assessment::bare(*area, Finding::NonDeficient))
            .collect();
        doc.enhanced_review_items.clear();
        resummarize(&mut doc);
        doc
    }

    fn deficient(doc: &mut CanonicalDocument, area: ReviewArea, code: &str) {
        let row = doc
            .assessments
            .iter_mut()
            .find(|a| a.review_area == area)
            .unwrap();
        row.finding = Finding::Deficient;
        row.deficiency_code = Some(code.into());
        row.description = Some(format!("{code}: documentation missing"));
        row.corrective_action = Some("Provide documentation.".into());
        row.due_date = NaiveDate::from_ymd_opt(2025, 6, 30);
    }

    #[test]
    fn clean_review() {
        let ctx = build_context(&clean()).unwrap();
        assert!(!ctx.has_deficiencies);
        assert!(ctx.deficiency_table.is_none());
        assert!(!ctx.show_erf_section);
        assert!(!ctx.show_subrecipient_section);
        assert_eq!(ctx.deficiency_count_text, "no");
        assert_eq!(ctx.deficiency_areas_text, "");
        assert_eq!(ctx.erf_count_text, "no");
    }

    #[test]
    fn single_deficiency() {
        let mut doc = clean();
        deficient(&mut doc, ReviewArea::Procurement, "P5");
        resummarize(&mut doc);

        let ctx = build_context(&doc).unwrap();
        assert!(ctx.has_deficiencies);
        assert_eq!(ctx.deficiency_count, 1);
        assert_eq!(ctx.deficiency_count_text, "1");
        assert_eq!(ctx.deficiency_areas, vec!["Procurement"]);
        assert_eq!(ctx.deficiency_areas_text, "Procurement");

        let table = ctx.deficiency_table.unwrap();
        assert_eq!(table.len(), N_FIXED_AREAS);
        let row = table.iter().find(|r| r.review_area == "Procurement").unwrap();
        assert_eq!(row.finding, "D");
        assert_eq!(row.deficiency_code, "P5");
        assert_eq!(row.due_date, "June 30, 2025");
        assert_eq!(row.date_closed, "");
        for other in table.iter().filter(|r| r.review_area != "Procurement") {
            assert_eq!(other.description, "");
            assert_eq!(other.corrective_action, "");
        }
    }

    #[test]
    fn multiple_deficiencies_and_erf() {
        let mut doc = clean();
        deficient(&mut doc, ReviewArea::Legal, "L2");
        deficient(&mut doc, ReviewArea::FinancialManagement, "F1");
        doc.enhanced_review_items.push(ErfItem {
            area: "Cybersecurity".into(),
            description: "Review incident response plan testing.".into(),
        });
        resummarize(&mut doc);

        let ctx = build_context(&doc).unwrap();
        assert_eq!(
            ctx.deficiency_areas_text,
            "Legal and Financial Management and Capacity"
        );
        assert!(ctx.show_erf_section);
        assert_eq!(ctx.erf_count_text, "1");
        assert_eq!(ctx.erf_areas_text, "Cybersecurity");
    }

    #[test]
    fn review_type_routing() {
        let mut doc = fixture();
        for (review_type, expected) in [
            (ReviewType::Triennial, (true, false)),
            (ReviewType::StateManagement, (false, true)),
            (ReviewType::Combined, (true, true)),
        ] {
            doc.project.review_type = review_type;
            let ctx = build_context(&doc).unwrap();
            assert_eq!((ctx.is_triennial, ctx.is_state_management), expected);
        }
    }

    #[test]
    fn subrecipient_section_follows_survey() {
        let mut doc = fixture();
        doc.summary.reviewed_subrecipients = true;
        doc.summary.subrecipient_name = Some("Rural Connector".into());
        let ctx = build_context(&doc).unwrap();
        assert!(ctx.show_subrecipient_section);
        assert_eq!(ctx.subrecipient_name.as_deref(), Some("Rural Connector"));
    }

    #[test]
    fn deficient_row_without_details_is_rejected() {
        let mut doc = fixture();
        doc.assessments[0].corrective_action = None;
        let err = build_context(&doc).unwrap_err();
        assert!(matches!(err, AuditDocError::SchemaInvalid { .. }));
        assert!(err.to_string().contains("correctiveAction"));
    }

    #[test]
    fn serializes_flat_camel_case_keys() {
        let value = serde_json::to_value(build_context(&clean()).unwrap()).unwrap();
        assert_eq!(value["deficiencyTable"], Value::Null);
        assert_eq!(value["exitFormat"], json!("virtual"));
        assert_eq!(value["siteVisitDates"], json!("March 10-14, 2025"));
        assert_eq!(value["reportDate"], json!("April 1, 2025"));
        assert_eq!(value["isTriennial"], json!(true));
    }

    #[test]
    fn merge_context_exposes_helpers() {
        let ctx = build_context(&fixture()).unwrap().to_merge_context().unwrap();
        assert_eq!(ctx.get("deficiencyCount"), Some(&json!(2)));
        assert_eq!(ctx.get("recipientAcronym"), Some(&json!("GVTA")));
    }
}
