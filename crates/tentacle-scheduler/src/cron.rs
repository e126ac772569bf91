//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field forms: *, */N, N, and comma lists ("0,15,30,45").
//! DOW uses 0-6 with 0 = Sunday.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tentacle_core::{Result, TentacleError};

/// Field ranges: (min, max) for MIN HOUR DOM MON DOW.
const FIELD_RANGES: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 6)];

/// Check that an expression parses without computing anything.
pub fn validate(expression: &str) -> Result<()> {
    parse(expression).map(|_| ())
}

/// Compute the first time strictly after `after` that matches the
/// expression. `None` for expressions that never match within a year
/// (e.g. "0 0 30 2 *").
pub fn next_match(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let fields = parse(expression).ok()?;
    let [minutes, hours, doms, months, dows] = fields;

    let mut candidate = (after + Duration::minutes(1))
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(after + Duration::minutes(1));

    // A year of minutes bounds the scan for any satisfiable expression.
    for _ in 0..(366 * 24 * 60) {
        if minutes.contains(&candidate.minute())
            && hours.contains(&candidate.hour())
            && doms.contains(&candidate.day())
            && months.contains(&candidate.month())
            && dows.contains(&candidate.weekday().num_days_from_sunday())
        {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

fn parse(expression: &str) -> Result<[Vec<u32>; 5]> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(TentacleError::cadence(format!(
            "cron expression '{expression}' needs 5 fields: MIN HOUR DOM MON DOW"
        )));
    }
    let mut fields: [Vec<u32>; 5] = Default::default();
    for (i, (part, (min, max))) in parts.iter().zip(FIELD_RANGES).enumerate() {
        fields[i] = parse_field(part, min, max).ok_or_else(|| {
            TentacleError::cadence(format!("invalid cron field '{part}' in '{expression}'"))
        })?;
    }
    Ok(fields)
}

/// Parse one cron field into the matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: std::result::Result<Vec<u32>, _> =
            field.split(',').map(|s| s.trim().parse()).collect();
        let vals = vals.ok()?;
        if vals.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(vals);
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max { Some(vec![n]) } else { None }
}
