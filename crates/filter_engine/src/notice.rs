use std::time::Duration;

use chrono::{DateTime, Utc};
use filter_core::QuotaNotice;

/// How long the quota notice stays on the page.
pub const NOTICE_DISPLAY: Duration = Duration::from_secs(10);

/// Text of the page notice shown when the shared daily quota runs out.
pub fn render_quota_notice(notice: &QuotaNotice) -> String {
    let reset = notice
        .reset_time
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc).format("%H:%M UTC").to_string())
        .unwrap_or_else(|| "midnight UTC".to_owned());
    format!(
        "Great Filter\nGlobal Daily Quota Reached\nResets at {reset}.\n\
         Use your own OpenRouter API key for unlimited access."
    )
}
