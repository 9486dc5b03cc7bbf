//! Control-to-area mapping and per-area consolidation.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use auditdoc_shared::{Assessment, Finding, ReviewArea};
use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::{ControlText, classify_finding};
use crate::fields::{date_field, str_field};

/// Split `"LEGAL : L2"` into its area prefix and control code.
pub fn split_control_name(name: &str) -> Option<(String, String)> {
    static CONTROL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*(.+?)\s*:\s*(.*?)\s*$").expect("valid regex"));

    let caps = CONTROL_RE.captures(name)?;
    let prefix = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
    Some((prefix, caps[2].to_string()))
}

/// One upstream control after classification.
#[derive(Debug, Clone)]
struct ControlRow {
    code: String,
    finding: Finding,
    comments: Option<String>,
    deficiency_code: Option<String>,
    corrective_action: Option<String>,
    due_date: Option<NaiveDate>,
    date_closed: Option<NaiveDate>,
}

/// Controls grouped by area plus the names that matched no area.
#[derive(Debug, Default)]
pub(crate) struct GroupedControls {
    by_area: BTreeMap<ReviewArea, Vec<ControlRow>>,
    pub unmapped: Vec<String>,
}

/// Classify every control and bucket it under its review area.
pub(crate) fn group_controls(items: &[Value]) -> GroupedControls {
    let mut grouped = GroupedControls::default();

    for item in items {
        let name = item
            .get("control")
            .and_then(|c| str_field(c, "name"))
            .or_else(|| str_field(item, "name"))
            .unwrap_or_default();

        let area = split_control_name(&name)
            .and_then(|(prefix, code)| ReviewArea::from_alias(&prefix).map(|a| (a, code)));

        let Some((area, code)) = area else {
            warn!(control = %name, "control does not map to a review area, dropping");
            grouped.unmapped.push(name);
            continue;
        };

        let assessment = item.get("assessment").unwrap_or(item);
        let status = str_field(assessment, "status");
        let review_status = str_field(assessment, "review_status");
        let comments = str_field(assessment, "comments");
        let not_applicable = assessment
            .get("not_applicable")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let finding = classify_finding(&ControlText {
            status: status.as_deref(),
            review_status: review_status.as_deref(),
            comments: comments.as_deref(),
            not_applicable,
        });
        debug!(control = %name, area = %area, finding = finding.code(), "control classified");

        grouped.by_area.entry(area).or_default().push(ControlRow {
            code: if code.is_empty() { name.clone() } else { code },
            finding,
            comments,
            deficiency_code: str_field(assessment, "deficiency_code"),
            corrective_action: str_field(assessment, "corrective_action"),
            due_date: date_field(assessment, "due_date"),
            date_closed: date_field(assessment, "date_closed"),
        });
    }

    grouped
}

/// Produce exactly one assessment per fixed area, in canonical order.
///
/// Areas upstream never mentioned are synthesized as not applicable.
pub(crate) fn consolidate(grouped: &GroupedControls) -> Vec<Assessment> {
    ReviewArea::ALL
        .into_iter()
        .map(|area| match grouped.by_area.get(&area) {
            Some(rows) if !rows.is_empty() => consolidate_area(area, rows),
            _ => Assessment::bare(area, Finding::NotApplicable),
        })
        .collect()
}

/// Any deficient control makes the area deficient; all not-applicable makes
/// it not applicable; anything else is non-deficient.
fn consolidate_area(area: ReviewArea, rows: &[ControlRow]) -> Assessment {
    let deficient: Vec<&ControlRow> = rows
        .iter()
        .filter(|r| r.finding == Finding::Deficient)
        .collect();

    if deficient.is_empty() {
        let finding = if rows.iter().all(|r| r.finding == Finding::NotApplicable) {
            Finding::NotApplicable
        } else {
            Finding::NonDeficient
        };
        return Assessment::bare(area, finding);
    }

    let deficiency_code = deficient
        .iter()
        .find_map(|r| r.deficiency_code.clone())
        .or_else(|| deficient.first().map(|r| r.code.clone()));

    let description = deficient
        .iter()
        .map(|r| format!("{}: {}", r.code, r.comments.as_deref().unwrap_or("deficiency noted")))
        .collect::<Vec<_>>()
        .join("\n");

    let mut actions: Vec<&str> = Vec::new();
    for action in deficient.iter().filter_map(|r| r.corrective_action.as_deref()) {
        if !actions.contains(&action) {
            actions.push(action);
        }
    }
    let corrective_action = (!actions.is_empty()).then(|| actions.join("\n"));

    let due_date = deficient.iter().filter_map(|r| r.due_date).min();

    // An area is closed only once every deficient control is closed.
    let date_closed = if deficient.iter().all(|r| r.date_closed.is_some()) {
        deficient.iter().filter_map(|r| r.date_closed).max()
    } else {
        None
    };

    Assessment {
        review_area: area,
        finding: Finding::Deficient,
        deficiency_code,
        description: Some(description),
        corrective_action,
        due_date,
        date_closed,
    }
}
