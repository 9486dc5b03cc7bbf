//! Free-text finding classifier.
//!
//! Upstream has no structured pass/fail field, so a control is judged
//! deficient when its status or comment text contains a negative-outcome
//! marker. Changing [`DEFICIENCY_MARKERS`] changes report outcomes and must
//! be re-checked against historical data.

use auditdoc_shared::Finding;

/// Case-insensitive substrings that mark a control deficient.
pub const DEFICIENCY_MARKERS: &[&str] = &["fail", "deficient", "non-compliant", "violation"];

/// Status values that mean the control does not apply to this recipient.
const NOT_APPLICABLE_STATUSES: &[&str] = &["not applicable", "n/a", "na"];

/// Free-text fields of one control assessment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlText<'a> {
    pub status: Option<&'a str>,
    pub review_status: Option<&'a str>,
    pub comments: Option<&'a str>,
    /// Upstream's explicit not-applicable flag, when present.
    pub not_applicable: bool,
}

/// Classify one control. Markers win over an explicit not-applicable mark.
pub fn classify_finding(text: &ControlText<'_>) -> Finding {
    let fields = [text.status, text.review_status, text.comments];
    if fields.iter().flatten().any(|f| contains_marker(f)) {
        return Finding::Deficient;
    }

    let marked_na = text.not_applicable
        || [text.status, text.review_status]
            .iter()
            .flatten()
            .any(|s| is_not_applicable_status(s));

    if marked_na {
        Finding::NotApplicable
    } else {
        Finding::NonDeficient
    }
}

/// Whether `text` contains any deficiency marker.
pub fn contains_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    DEFICIENCY_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_not_applicable_status(status: &str) -> bool {
    let key = status.trim().to_lowercase();
    NOT_APPLICABLE_STATUSES.contains(&key.as_str())
}
