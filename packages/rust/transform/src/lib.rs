//! Raw upstream payload to canonical document.
//!
//! Controls are mapped onto the fixed review-area set through the alias
//! table in `auditdoc-shared`, classified by [`classify_finding`], and
//! consolidated to one assessment per area. Summary fields are always
//! recomputed here; upstream never supplies them.

mod classify;
mod controls;
mod fields;
mod project;

use auditdoc_shared::{
    AuditDocError, CanonicalDocument, RawProjectBundle, Result, SCHEMA_VERSION, Summary,
};
use chrono::{DateTime, SubsecRound, Utc};
use tracing::{info, instrument};

pub use classify::{ControlText, DEFICIENCY_MARKERS, classify_finding, contains_marker};
pub use controls::split_control_name;

/// Output of [`transform`].
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub document: CanonicalDocument,
    /// Control names that matched no review area.
    pub unmapped_controls: Vec<String>,
}

/// Transform a fetched bundle, stamping it with the current time.
pub fn transform(bundle: &RawProjectBundle) -> Result<TransformOutput> {
    transform_at(bundle, Utc::now())
}

/// Transform a fetched bundle with an explicit generation timestamp.
///
/// Identical input and timestamp always yield an identical document.
#[instrument(skip_all, fields(project_id = %bundle.project_id))]
pub fn transform_at(
    bundle: &RawProjectBundle,
    generated_at: DateTime<Utc>,
) -> Result<TransformOutput> {
    let has_metadata = bundle
        .project
        .as_object()
        .is_some_and(|obj| !obj.is_empty());
    if !has_metadata {
        return Err(AuditDocError::transform(format!(
            "empty project payload for project {}",
            bundle.project_id
        )));
    }
    if bundle.controls.is_empty() {
        return Err(AuditDocError::transform(format!(
            "project {} returned zero controls",
            bundle.project_id
        )));
    }

    let project = project::map_project(&bundle.project)?;
    let reviewer = project::map_reviewer(&bundle.project);
    let program_manager = project::map_program_manager(&bundle.project);

    let grouped = controls::group_controls(&bundle.controls);
    let assessments = controls::consolidate(&grouped);

    let enhanced_review_items = project::map_erf_items(&bundle.risks);
    let (reviewed_subrecipients, subrecipient_name) = project::map_surveys(&bundle.surveys);

    let summary = Summary::derive(
        &assessments,
        &enhanced_review_items,
        reviewed_subrecipients,
        subrecipient_name,
    );

    info!(
        controls = bundle.controls.len(),
        unmapped = grouped.unmapped.len(),
        deficiencies = summary.deficiency_count,
        erf = summary.erf_count,
        "project data transformed"
    );

    let document = CanonicalDocument {
        project_id: bundle.project_id.clone(),
        // Microseconds survive storage round trips and keep back-to-back
        // fetches distinct.
        generated_at: generated_at.trunc_subsecs(6),
        schema_version: SCHEMA_VERSION.to_string(),
        project,
        reviewer,
        program_manager,
        assessments,
        enhanced_review_items,
        summary,
    };

    Ok(TransformOutput {
        document,
        unmapped_controls: grouped.unmapped,
    })
}
