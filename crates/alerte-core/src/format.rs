/// Minutes in an hour
const HOUR: i64 = 60;

/// Minutes in a day
const DAY: i64 = 24 * HOUR;

/// Format an age in minutes for display, rounded to the nearest unit.
/// Negative ages (clock skew) read as "just now".
pub fn format_age(minutes: i64) -> String {
    match minutes {
        m if m < 1 => "just now".to_string(),
        m if m < HOUR => format!("{}m ago", m),
        m if m < DAY => format!("{}h ago", (m + HOUR / 2) / HOUR),
        m => format!("{}d ago", (m + DAY / 2) / DAY),
    }
}
