//! Grammar agreement, list, count and date formatting.
//!
//! The plain functions are used by the context builder. The `helper_*`
//! adapters expose the same functions to templates as merge helpers
//! (`{{ isAre(deficiencyCount) }}`), so agreement is decided at the point
//! of use rather than baked into field values.

use auditdoc_render::MergeContext;
use auditdoc_shared::{AuditDocError, Result};
use chrono::{Datelike, NaiveDate};
use serde_json::Value;

/// "is" for exactly one, "are" otherwise (zero included).
pub fn is_are(count: u64) -> &'static str {
    if count == 1 { "is" } else { "are" }
}

/// "was" for exactly one, "were" otherwise (zero included).
pub fn was_were(count: u64) -> &'static str {
    if count == 1 { "was" } else { "were" }
}

/// "an" when the first character is a vowel, ignoring case; "a" otherwise.
pub fn a_an(word: &str) -> &'static str {
    match word.chars().next().map(|c| c.to_ascii_lowercase()) {
        Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
        _ => "a",
    }
}

/// The literal word "no" for zero, else the decimal count.
pub fn count_or_no(count: u64) -> String {
    if count == 0 {
        "no".to_string()
    } else {
        count.to_string()
    }
}

/// Join items for prose: `""`, `"A"`, `"A and B"`, `"A, B, and C"`.
pub fn format_list<S: AsRef<str>>(items: &[S]) -> String {
    match items {
        [] => String::new(),
        [one] => one.as_ref().to_string(),
        [first, second] => format!("{} and {}", first.as_ref(), second.as_ref()),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(|s| s.as_ref()).collect();
            format!("{}, and {}", head.join(", "), last.as_ref())
        }
    }
}

/// `March 5, 2025`.
pub fn format_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// Human-readable site-visit range; `"TBD"` when either end is missing.
pub fn format_date_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> String {
    let (Some(start), Some(end)) = (start, end) else {
        return "TBD".to_string();
    };

    if start == end {
        format_date(start)
    } else if start.year() == end.year() && start.month() == end.month() {
        format!(
            "{} {}-{}, {}",
            start.format("%B"),
            start.day(),
            end.day(),
            start.year()
        )
    } else if start.year() == end.year() {
        format!(
            "{} {} - {} {}, {}",
            start.format("%B"),
            start.day(),
            end.format("%B"),
            end.day(),
            start.year()
        )
    } else {
        format!("{} - {}", format_date(start), format_date(end))
    }
}

// ---------------------------------------------------------------------------
// Template helpers
// ---------------------------------------------------------------------------

/// Register every grammar helper on a merge context.
pub fn register_helpers(ctx: MergeContext) -> MergeContext {
    ctx.with_helper("isAre", helper_is_are)
        .with_helper("wasWere", helper_was_were)
        .with_helper("aAn", helper_a_an)
        .with_helper("countOrNo", helper_count_or_no)
        .with_helper("formatList", helper_format_list)
}

fn count_arg(helper: &str, value: &Value) -> Result<u64> {
    value.as_u64().ok_or_else(|| {
        AuditDocError::rendering(format!("{helper}() expects a non-negative count, got {value}"))
    })
}

fn helper_is_are(value: &Value) -> Result<Value> {
    Ok(Value::from(is_are(count_arg("isAre", value)?)))
}

fn helper_was_were(value: &Value) -> Result<Value> {
    Ok(Value::from(was_were(count_arg("wasWere", value)?)))
}

fn helper_count_or_no(value: &Value) -> Result<Value> {
    Ok(Value::from(count_or_no(count_arg("countOrNo", value)?)))
}

fn helper_a_an(value: &Value) -> Result<Value> {
    let word = value
        .as_str()
        .ok_or_else(|| AuditDocError::rendering(format!("aAn() expects text, got {value}")))?;
    Ok(Value::from(a_an(word)))
}

fn helper_format_list(value: &Value) -> Result<Value> {
    let items: Option<Vec<&str>> = value
        .as_array()
        .and_then(|list| list.iter().map(Value::as_str).collect());
    let items = items.ok_or_else(|| {
        AuditDocError::rendering(format!("formatList() expects a list of text, got {value}"))
    })?;
    Ok(Value::from(format_list(&items)))
}
