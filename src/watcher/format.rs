//! Alert text rendering

use chrono::{DateTime, FixedOffset};

use crate::source::{DatasetRef, MailItem, RefreshOccurrence};

/// Returns at most `max` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Like [`truncate_chars`], with a trailing `...` when anything was cut.
pub fn preview(text: &str, max: usize) -> String {
    let cut = truncate_chars(text, max);
    if cut.len() < text.len() {
        format!("{}...", cut)
    } else {
        cut.to_string()
    }
}

/// Renders the alert for a matching mail.
pub fn mail_alert(item: &MailItem, max_body_chars: usize) -> String {
    format!(
        "🚨 POWER BI ERROR ALERT\n\nSubject: {}\nFrom: {}\n\nDetails:\n{}",
        item.subject,
        item.sender,
        preview(item.body.trim(), max_body_chars)
    )
}

/// Converts an API timestamp to `dd/mm/YYYY HH:MM:SS` at the given offset.
///
/// Unparseable input is returned unchanged.
pub fn display_time(raw: &str, offset_hours: i32) -> String {
    let Some(offset) = FixedOffset::east_opt(offset_hours * 3600) else {
        return raw.to_string();
    };

    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&offset)
            .format("%d/%m/%Y %H:%M:%S")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Renders the alert for a failed dataset refresh.
pub fn refresh_alert(
    dataset: &DatasetRef,
    refresh: &RefreshOccurrence,
    fail_time: &str,
    max_error_chars: usize,
) -> String {
    let error = match refresh.error_detail.as_deref() {
        Some(detail) if !detail.trim().is_empty() => truncate_chars(detail, max_error_chars),
        _ => "Unknown error",
    };

    format!(
        "🚨 REFRESH FAILED\n\n🕒 Time: {}\n📂 Workspace: {}\n📊 Dataset: {}\n\n❌ Error: {}\n\n[biwatch]",
        fail_time, dataset.workspace_name, dataset.dataset_name, error
    )
}

/// Renders the warning sent when a whole cycle fails.
pub fn cycle_failure_alert(engine: &str, error: &str) -> String {
    format!("⚠️ {} monitor cycle failed: {}", engine, error)
}

/// Renders the message sent when an engine starts.
pub fn startup_message(engine: &str) -> String {
    format!("🚀 biwatch {} monitor started.", engine)
}
