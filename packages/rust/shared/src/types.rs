//! Canonical project document and its component types.
//!
//! One [`CanonicalDocument`] per (project, generation timestamp). Section
//! keys stay snake_case; assessment and summary records use camelCase,
//! matching the persisted JSON contract.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::areas::ReviewArea;
use crate::error::{AuditDocError, Result};

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of compliance review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewType {
    #[serde(rename = "Triennial Review")]
    Triennial,
    #[serde(rename = "State Management Review")]
    StateManagement,
    #[serde(rename = "Combined Triennial and State Management Review")]
    Combined,
}

impl ReviewType {
    /// Canonical label, identical to the serialized form.
    pub fn label(self) -> &'static str {
        match self {
            Self::Triennial => "Triennial Review",
            Self::StateManagement => "State Management Review",
            Self::Combined => "Combined Triennial and State Management Review",
        }
    }

    /// Parse a label loosely: full labels and the short forms upstream uses.
    pub fn parse(raw: &str) -> Option<Self> {
        let key = raw.trim().to_ascii_lowercase();
        match key.as_str() {
            "triennial review" | "triennial" | "tr" => Some(Self::Triennial),
            "state management review" | "state management" | "smr" => {
                Some(Self::StateManagement)
            }
            "combined triennial and state management review" | "combined" => Some(Self::Combined),
            _ => None,
        }
    }

    pub fn includes_triennial(self) -> bool {
        matches!(self, Self::Triennial | Self::Combined)
    }

    pub fn includes_state_management(self) -> bool {
        matches!(self, Self::StateManagement | Self::Combined)
    }
}

/// How the exit conference is held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitConferenceFormat {
    #[default]
    #[serde(rename = "virtual")]
    Virtual,
    #[serde(rename = "in-person")]
    InPerson,
}

impl ExitConferenceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Virtual => "virtual",
            Self::InPerson => "in-person",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "virtual" | "remote" => Some(Self::Virtual),
            "in-person" | "in person" | "inperson" | "onsite" | "on-site" => Some(Self::InPerson),
            _ => None,
        }
    }
}

/// Compliance outcome for one review area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finding {
    #[serde(rename = "D")]
    Deficient,
    #[serde(rename = "ND")]
    NonDeficient,
    #[serde(rename = "NA")]
    NotApplicable,
}

impl Finding {
    pub fn code(self) -> &'static str {
        match self {
            Self::Deficient => "D",
            Self::NonDeficient => "ND",
            Self::NotApplicable => "NA",
        }
    }
}

// ---------------------------------------------------------------------------
// Document sections
// ---------------------------------------------------------------------------

/// Recipient identity and review logistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub region_number: Option<u8>,
    pub review_type: ReviewType,
    pub recipient_name: Option<String>,
    pub recipient_acronym: Option<String>,
    pub recipient_city_state: Option<String>,
    pub recipient_id: Option<String>,
    pub recipient_website: Option<String>,
    pub site_visit_start_date: Option<NaiveDate>,
    pub site_visit_end_date: Option<NaiveDate>,
    pub report_date: Option<NaiveDate>,
    pub exit_conference_format: ExitConferenceFormat,
}

/// Contractor and lead reviewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewerInfo {
    pub contractor_name: Option<String>,
    pub lead_reviewer_name: Option<String>,
    pub lead_reviewer_phone: Option<String>,
    pub lead_reviewer_email: Option<String>,
}

/// Oversight-agency program manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramManagerInfo {
    pub name: Option<String>,
    pub title: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// One review area's finding. Detail fields are populated only when
/// `finding` is [`Finding::Deficient`] and are explicit nulls otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub review_area: ReviewArea,
    pub finding: Finding,
    pub deficiency_code: Option<String>,
    pub description: Option<String>,
    pub corrective_action: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub date_closed: Option<NaiveDate>,
}

impl Assessment {
    /// An assessment with no detail fields.
    pub fn bare(review_area: ReviewArea, finding: Finding) -> Self {
        Self {
            review_area,
            finding,
            deficiency_code: None,
            description: None,
            corrective_action: None,
            due_date: None,
            date_closed: None,
        }
    }

    pub fn is_deficient(&self) -> bool {
        self.finding == Finding::Deficient
    }
}

/// Enhanced Review Focus item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErfItem {
    pub area: String,
    pub description: String,
}

/// Fields derived from the assessments and supplementary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub has_deficiencies: bool,
    pub deficiency_count: u32,
    pub deficiency_areas: Vec<ReviewArea>,
    pub erf_count: u32,
    pub erf_areas: Vec<String>,
    pub reviewed_subrecipients: bool,
    pub subrecipient_name: Option<String>,
}

impl Summary {
    /// Derive the summary from row-level data. Upstream never supplies it.
    pub fn derive(
        assessments: &[Assessment],
        erf_items: &[ErfItem],
        reviewed_subrecipients: bool,
        subrecipient_name: Option<String>,
    ) -> Self {
        let deficiency_areas: Vec<ReviewArea> = assessments
            .iter()
            .filter(|a| a.is_deficient())
            .map(|a| a.review_area)
            .collect();

        Self {
            has_deficiencies: !deficiency_areas.is_empty(),
            deficiency_count: deficiency_areas.len() as u32,
            deficiency_areas,
            erf_count: erf_items.len() as u32,
            erf_areas: erf_items.iter().map(|e| e.area.clone()).collect(),
            reviewed_subrecipients,
            subrecipient_name,
        }
    }
}

// ---------------------------------------------------------------------------
// CanonicalDocument
// ---------------------------------------------------------------------------

/// Normalized review data for one project, independent of any template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub project_id: String,
    pub generated_at: DateTime<Utc>,
    pub schema_version: String,
    pub project: ProjectInfo,
    pub reviewer: ReviewerInfo,
    pub program_manager: ProgramManagerInfo,
    pub assessments: Vec<Assessment>,
    #[serde(rename = "enhancedReviewItems")]
    pub enhanced_review_items: Vec<ErfItem>,
    pub summary: Summary,
}

impl CanonicalDocument {
    /// Serialize to a JSON value for validation and storage.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| AuditDocError::transform(format!("serialize document: {e}")))
    }
}

// ---------------------------------------------------------------------------
// RawProjectBundle
// ---------------------------------------------------------------------------

/// Unmodified upstream responses for one project, as fetched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawProjectBundle {
    pub project_id: String,
    /// Project metadata object.
    pub project: serde_json::Value,
    /// Every control item across all pages.
    pub controls: Vec<serde_json::Value>,
    /// Survey response payload.
    pub surveys: serde_json::Value,
    /// Enhanced Review Focus payload.
    pub risks: serde_json::Value,
}

// ---------------------------------------------------------------------------
// ReportId
// ---------------------------------------------------------------------------

/// Identifier for one generation request: `rpt-YYYYmmdd-HHMMSS-xxxxxxxx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub String);

impl ReportId {
    pub fn new() -> Self {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let suffix = Uuid::now_v7().simple().to_string();
        // v7 leads with the timestamp; the tail carries the randomness.
        Self(format!("rpt-{stamp}-{}", &suffix[suffix.len() - 8..]))
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
