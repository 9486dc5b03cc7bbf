//! Project, contact, survey and ERF mapping.

use auditdoc_shared::{
    AuditDocError, ErfItem, ExitConferenceFormat, ProgramManagerInfo, ProjectInfo, Result,
    ReviewType, ReviewerInfo,
};
use serde_json::Value;
use tracing::warn;

use crate::fields::{date_field, items, str_field, truthy};

pub(crate) fn map_project(meta: &Value) -> Result<ProjectInfo> {
    let review_type_raw = str_field(meta, "review_type")
        .ok_or_else(|| AuditDocError::transform("project metadata has no review_type"))?;
    let review_type = ReviewType::parse(&review_type_raw).ok_or_else(|| {
        AuditDocError::transform(format!("unrecognized review_type '{review_type_raw}'"))
    })?;

    let exit_conference_format = match str_field(meta, "exit_conference_format") {
        None => ExitConferenceFormat::default(),
        Some(raw) => ExitConferenceFormat::parse(&raw).ok_or_else(|| {
            AuditDocError::transform(format!("unrecognized exit_conference_format '{raw}'"))
        })?,
    };

    let region_number = match str_field(meta, "region_number") {
        None => None,
        Some(raw) => Some(raw.parse::<u8>().map_err(|_| {
            AuditDocError::transform(format!("region_number '{raw}' is not a region"))
        })?),
    };

    let site_visit_start_date = date_field(meta, "site_visit_start_date");
    let site_visit_end_date = date_field(meta, "site_visit_end_date");
    let report_date = date_field(meta, "report_date");
    for (key, parsed) in [
        ("site_visit_start_date", site_visit_start_date),
        ("site_visit_end_date", site_visit_end_date),
        ("report_date", report_date),
    ] {
        if parsed.is_none() && str_field(meta, key).is_some() {
            warn!(field = key, "unparseable date left empty");
        }
    }

    Ok(ProjectInfo {
        region_number,
        review_type,
        recipient_name: str_field(meta, "recipient_name"),
        recipient_acronym: str_field(meta, "recipient_acronym"),
        recipient_city_state: str_field(meta, "recipient_city_state"),
        recipient_id: str_field(meta, "recipient_id"),
        recipient_website: str_field(meta, "recipient_website"),
        site_visit_start_date,
        site_visit_end_date,
        report_date,
        exit_conference_format,
    })
}

pub(crate) fn map_reviewer(meta: &Value) -> ReviewerInfo {
    ReviewerInfo {
        contractor_name: str_field(meta, "contractor_name"),
        lead_reviewer_name: str_field(meta, "lead_reviewer_name"),
        lead_reviewer_phone: str_field(meta, "lead_reviewer_phone"),
        lead_reviewer_email: str_field(meta, "lead_reviewer_email"),
    }
}

pub(crate) fn map_program_manager(meta: &Value) -> ProgramManagerInfo {
    ProgramManagerInfo {
        name: str_field(meta, "fta_program_manager_name"),
        title: str_field(meta, "fta_program_manager_title"),
        phone: str_field(meta, "fta_program_manager_phone"),
        email: str_field(meta, "fta_program_manager_email"),
    }
}

/// Subrecipient answers from the survey: `(reviewed, name)`.
pub(crate) fn map_surveys(payload: &Value) -> (bool, Option<String>) {
    let mut reviewed = false;
    let mut name = None;

    for item in items(payload) {
        let Some(key) = str_field(item, "key").or_else(|| str_field(item, "question_key")) else {
            continue;
        };
        let answer = item.get("answer").unwrap_or(&Value::Null);
        match key.as_str() {
            "reviewed_subrecipients" => reviewed = truthy(answer),
            "subrecipient_name" => name = str_field(item, "answer"),
            _ => {}
        }
    }

    // A name without a review is noise from a stale survey answer.
    (reviewed, if reviewed { name } else { None })
}

pub(crate) fn map_erf_items(payload: &Value) -> Vec<ErfItem> {
    items(payload)
        .iter()
        .filter_map(|item| {
            let area = str_field(item, "area").or_else(|| str_field(item, "title"));
            match area {
                Some(area) => Some(ErfItem {
                    area,
                    description: str_field(item, "description").unwrap_or_default(),
                }),
                None => {
                    warn!("ERF item without an area, dropping");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn meta() -> Value {
        json!({
            "region_number": "3",
            "review_type": "State Management Review",
            "recipient_name": "Coastal Transit",
            "site_visit_start_date": "2025-03-28",
            "report_date": "soon",
            "contractor_name": "Audit Co",
            "fta_program_manager_name": "Pat Kim"
        })
    }

    #[test]
    fn maps_project_fields() {
        let project = map_project(&meta()).unwrap();
        assert_eq!(project.region_number, Some(3));
        assert_eq!(project.review_type, ReviewType::StateManagement);
        assert_eq!(project.recipient_name.as_deref(), Some("Coastal Transit"));
        assert_eq!(project.site_visit_start_date, NaiveDate::from_ymd_opt(2025, 3, 28));
        assert_eq!(project.report_date, None);
        assert_eq!(project.exit_conference_format, ExitConferenceFormat::Virtual);
    }

    #[test]
    fn missing_recipient_name_is_not_a_transform_error() {
        let mut m = meta();
        m.as_object_mut().unwrap().remove("recipient_name");
        let project = map_project(&m).unwrap();
        assert_eq!(project.recipient_name, None);
    }

    #[test]
    fn bad_enums_are_contract_breaks() {
        let mut m = meta();
        m["review_type"] = json!("Annual Review");
        assert!(matches!(map_project(&m), Err(AuditDocError::Transform { .. })));

        let mut m = meta();
        m["exit_conference_format"] = json!("carrier pigeon");
        assert!(matches!(map_project(&m), Err(AuditDocError::Transform { .. })));

        let mut m = meta();
        m["region_number"] = json!("Region Three");
        assert!(map_project(&m).is_err());
    }

    #[test]
    fn contacts() {
        assert_eq!(map_reviewer(&meta()).contractor_name.as_deref(), Some("Audit Co"));
        assert_eq!(map_program_manager(&meta()).name.as_deref(), Some("Pat Kim"));
    }

    #[test]
    fn surveys() {
        let payload = json!({"items": [
            {"key": "reviewed_subrecipients", "answer": "Yes"},
            {"key": "subrecipient_name", "answer": "Rural Connector"}
        ]});
        assert_eq!(map_surveys(&payload), (true, Some("Rural Connector".into())));

        let payload = json!([
            {"key": "reviewed_subrecipients", "answer": false},
            {"key": "subrecipient_name", "answer": "Rural Connector"}
        ]);
        assert_eq!(map_surveys(&payload), (false, None));
        assert_eq!(map_surveys(&json!({})), (false, None));
    }

    #[test]
    fn erf_items() {
        let payload = json!({"items": [
            {"area": "Procurement", "description": "Sole source review"},
            {"description": "orphan"},
            {"title": "Cybersecurity"}
        ]});
        let erf = map_erf_items(&payload);
        assert_eq!(erf.len(), 2);
        assert_eq!(erf[1].area, "Cybersecurity");
        assert_eq!(erf[1].description, "");
    }
}
