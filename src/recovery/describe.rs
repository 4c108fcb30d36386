use chrono::{DateTime, Utc};

use crate::version::VersionSummary;

/// Coarse relative age, as shown in the version browser.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - then;
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "minute")
    } else if hours < 24 {
        plural(hours, "hour")
    } else if days < 7 {
        plural(days, "day")
    } else {
        then.format("%d.%m.%Y").to_string()
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}

/// One-line label: source, age, and whether it is the current version.
pub fn describe_version(summary: &VersionSummary, now: DateTime<Utc>) -> String {
    let mut label = format!(
        "{} - {}",
        summary.source.label(),
        time_ago(summary.created_at, now)
    );
    if let Some(from) = summary.restored_from {
        label.push_str(&format!(" (from v{from})"));
    }
    if summary.is_current {
        label.push_str(" (Current)");
    }
    label
}
