//! Schedule entries — the persistent data model for recurring work.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tentacle_core::{ActionRef, Outcome, Result, TentacleError};
use tentacle_store::Store;

use crate::cron;

/// Store key prefix for schedule entries.
pub const ENTRY_PREFIX: &str = "entry/";
/// Store key prefix for entries whose stored form no longer decodes.
pub const QUARANTINE_PREFIX: &str = "quarantine/";

/// A named recurring task definition.
///
/// Owned by the scheduler core: `next_due` is advanced only after a
/// successful publish, and always through CAS on the stored version.
/// Workers touch only the outcome fields, also through CAS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Unique name; doubles as the store key suffix.
    pub name: String,
    /// When the entry recurs.
    pub cadence: Cadence,
    /// What an invocation of this entry executes.
    pub action: ActionRef,
    /// Disabled entries are never dispatched, however overdue.
    pub enabled: bool,
    /// Next time this entry is due. Strictly increases on every dispatch.
    pub next_due: DateTime<Utc>,
    /// Last time the scheduler dispatched this entry.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent completed invocation.
    pub last_outcome: Option<Outcome>,
    /// Total dispatches since creation.
    pub total_run_count: u64,
    /// Queue override; falls back to the broker's default queue.
    pub queue: Option<String>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl ScheduleEntry {
    /// Create an entry whose first due time is the cadence's next
    /// occurrence after `now`.
    pub fn new(name: &str, cadence: Cadence, action: ActionRef, now: DateTime<Utc>) -> Result<Self> {
        cadence.validate()?;
        let next_due = cadence.next_after(now, now)?;
        Ok(Self {
            name: name.to_string(),
            cadence,
            action,
            enabled: true,
            next_due,
            last_run_at: None,
            last_outcome: None,
            total_run_count: 0,
            queue: None,
            description: String::new(),
            created_at: now,
        })
    }

    /// True if this entry should be dispatched at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_due <= now
    }

    /// Store key for this entry.
    pub fn key(&self) -> String {
        entry_key(&self.name)
    }
}

pub fn entry_key(name: &str) -> String {
    format!("{ENTRY_PREFIX}{name}")
}

pub fn quarantine_key(name: &str) -> String {
    format!("{QUARANTINE_PREFIX}{name}")
}

/// How an entry recurs: a fixed interval or a crontab expression.
/// Exactly one form, checked at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cadence {
    Interval { every: u64, period: Period },
    Crontab(Crontab),
}

impl Cadence {
    pub fn validate(&self) -> Result<()> {
        match self {
            Cadence::Interval { every, period } => {
                if *every == 0 {
                    return Err(TentacleError::cadence(
                        "interval 'every' must be at least 1",
                    ));
                }
                // Also rejects intervals too large to represent.
                period.duration(*every).map(|_| ())
            }
            Cadence::Crontab(spec) => cron::validate(&spec.expression()),
        }
    }

    /// Compute the due time that follows `prev_due`, guaranteed to land
    /// strictly after both `prev_due` and `now`.
    ///
    /// Intervals step from the scheduled time, not the dispatch time, so
    /// cadence never drifts; periods missed while the scheduler was down
    /// collapse into the single dispatch that just happened.
    pub fn next_after(&self, prev_due: DateTime<Utc>, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        match self {
            Cadence::Interval { every, period } => {
                let step = period.duration(*every)?;
                let overflow =
                    || TentacleError::cadence("interval overflows the representable time range");
                let mut next = prev_due.checked_add_signed(step).ok_or_else(overflow)?;
                while next <= now {
                    next = next.checked_add_signed(step).ok_or_else(overflow)?;
                }
                Ok(next)
            }
            Cadence::Crontab(spec) => {
                let after = now.max(prev_due);
                cron::next_match(&spec.expression(), after).ok_or_else(|| {
                    TentacleError::cadence(format!("no next match for '{}'", spec.expression()))
                })
            }
        }
    }
}

/// Interval units, matching the classic periodic-task vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Days,
    Hours,
    Minutes,
    Seconds,
    Microseconds,
}

impl Period {
    fn duration(&self, every: u64) -> Result<Duration> {
        let every = i64::try_from(every)
            .map_err(|_| TentacleError::cadence("interval 'every' out of range"))?;
        // The try_ constructors reject spans chrono cannot represent;
        // plain Duration::days and friends panic instead.
        match self {
            Period::Days => Duration::try_days(every),
            Period::Hours => Duration::try_hours(every),
            Period::Minutes => Duration::try_minutes(every),
            Period::Seconds => Duration::try_seconds(every),
            Period::Microseconds => Some(Duration::microseconds(every)),
        }
        .ok_or_else(|| TentacleError::cadence(format!("interval '{every} {self}' out of range")))
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cadence::Interval { every: 1, period } => write!(f, "every {}", period.singular()),
            Cadence::Interval { every, period } => write!(f, "every {every} {period}"),
            Cadence::Crontab(spec) => write!(f, "{}", spec.expression()),
        }
    }
}

impl Period {
    fn singular(&self) -> &'static str {
        match self {
            Period::Days => "day",
            Period::Hours => "hour",
            Period::Minutes => "minute",
            Period::Seconds => "second",
            Period::Microseconds => "microsecond",
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Period::Days => "days",
            Period::Hours => "hours",
            Period::Minutes => "minutes",
            Period::Seconds => "seconds",
            Period::Microseconds => "microseconds",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Period {
    type Err = TentacleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "days" => Ok(Period::Days),
            "hours" => Ok(Period::Hours),
            "minutes" => Ok(Period::Minutes),
            "seconds" => Ok(Period::Seconds),
            "microseconds" => Ok(Period::Microseconds),
            other => Err(TentacleError::cadence(format!(
                "period must be one of days/hours/minutes/seconds/microseconds, got '{other}'"
            ))),
        }
    }
}

/// Calendar cadence as five cron fields, all defaulting to `*`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Crontab {
    #[serde(default = "star")]
    pub minute: String,
    #[serde(default = "star")]
    pub hour: String,
    #[serde(default = "star")]
    pub day_of_month: String,
    #[serde(default = "star")]
    pub month_of_year: String,
    #[serde(default = "star")]
    pub day_of_week: String,
}

fn star() -> String {
    "*".into()
}

impl Default for Crontab {
    fn default() -> Self {
        Self {
            minute: star(),
            hour: star(),
            day_of_month: star(),
            month_of_year: star(),
            day_of_week: star(),
        }
    }
}

impl Crontab {
    /// Parse a 5-field "MIN HOUR DOM MON DOW" expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(TentacleError::cadence(format!(
                "cron expression '{expression}' needs 5 fields: MIN HOUR DOM MON DOW"
            )));
        }
        let spec = Self {
            minute: parts[0].to_string(),
            hour: parts[1].to_string(),
            day_of_month: parts[2].to_string(),
            month_of_year: parts[3].to_string(),
            day_of_week: parts[4].to_string(),
        };
        cron::validate(&spec.expression())?;
        Ok(spec)
    }

    /// Render back to the 5-field form the parser consumes.
    pub fn expression(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, self.day_of_week
        )
    }
}

// ─── Store access ──────────────────────────────────────────────

/// Persist a brand-new entry; fails if the name is taken.
pub async fn save_new(store: &Arc<dyn Store>, entry: &ScheduleEntry) -> Result<()> {
    let json = serde_json::to_string(entry)?;
    store.put(&entry.key(), &json, None).await?;
    Ok(())
}

/// Load every entry, splitting decodable entries (with their store
/// versions) from records whose stored form no longer parses.
pub async fn load_all(
    store: &Arc<dyn Store>,
) -> Result<(Vec<(ScheduleEntry, u64)>, Vec<(String, String)>)> {
    let mut entries = Vec::new();
    let mut broken = Vec::new();
    for (key, record) in store.list(ENTRY_PREFIX).await? {
        match serde_json::from_str::<ScheduleEntry>(&record.value) {
            Ok(entry) => entries.push((entry, record.version)),
            Err(e) => broken.push((key, e.to_string())),
        }
    }
    Ok((entries, broken))
}

/// List quarantined records as (name, stored value). These are entries
/// the scheduler moved aside because their stored form stopped
/// decoding; they stay visible to operators until removed by hand.
pub async fn load_quarantined(store: &Arc<dyn Store>) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for (key, record) in store.list(QUARANTINE_PREFIX).await? {
        let name = key
            .strip_prefix(QUARANTINE_PREFIX)
            .unwrap_or(&key)
            .to_string();
        out.push((name, record.value));
    }
    Ok(out)
}

/// Flip an entry's enabled flag through CAS. Returns false if the
/// entry does not exist.
pub async fn set_enabled(store: &Arc<dyn Store>, name: &str, enabled: bool) -> Result<bool> {
    let key = entry_key(name);
    let Some(record) = store.get(&key).await? else {
        return Ok(false);
    };
    let mut entry: ScheduleEntry =
        serde_json::from_str(&record.value).map_err(|e| TentacleError::Schema {
            key: key.clone(),
            reason: e.to_string(),
        })?;
    entry.enabled = enabled;
    store
        .put(&key, &serde_json::to_string(&entry)?, Some(record.version))
        .await?;
    Ok(true)
}

/// Remove an entry. Returns false if it does not exist.
pub async fn remove(store: &Arc<dyn Store>, name: &str) -> Result<bool> {
    let key = entry_key(name);
    let Some(record) = store.get(&key).await? else {
        return Ok(false);
    };
    store.delete(&key, record.version).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tentacle_store::MemStore;

    fn action() -> ActionRef {
        ActionRef::new("log", serde_json::json!({}))
    }

    #[test]
    fn test_interval_advances_from_scheduled_time() {
        let t = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let cadence = Cadence::Interval {
            every: 24,
            period: Period::Hours,
        };
        // Dispatch one second late: next due is T+24h, not T+24h+1s.
        let next = cadence.next_after(t, t + Duration::seconds(1)).unwrap();
        assert_eq!(next, t + Duration::hours(24));
    }

    #[test]
    fn test_interval_collapses_missed_periods() {
        let t = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let cadence = Cadence::Interval {
            every: 1,
            period: Period::Hours,
        };
        // Scheduler was down for 5 hours: one dispatch, next due in the future.
        let now = t + Duration::hours(5) + Duration::minutes(30);
        let next = cadence.next_after(t, now).unwrap();
        assert_eq!(next, t + Duration::hours(6));
        assert!(next > now);
    }

    #[test]
    fn test_next_due_strictly_increases() {
        let t = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        for cadence in [
            Cadence::Interval {
                every: 30,
                period: Period::Seconds,
            },
            Cadence::Crontab(Crontab::parse("*/5 * * * *").unwrap()),
        ] {
            let next = cadence.next_after(t, t).unwrap();
            assert!(next > t);
            let next2 = cadence.next_after(next, next).unwrap();
            assert!(next2 > next);
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let cadence = Cadence::Interval {
            every: 0,
            period: Period::Seconds,
        };
        assert!(cadence.validate().is_err());
    }

    #[test]
    fn test_oversized_interval_errors_instead_of_panicking() {
        // Large enough to overflow chrono's Duration range. Such a value
        // can arrive through a stored record, so both validation and
        // advancement must return an error rather than abort.
        let cadence = Cadence::Interval {
            every: 200_000_000_000_000,
            period: Period::Days,
        };
        assert!(cadence.validate().is_err());

        let t = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let err = cadence.next_after(t, t).unwrap_err();
        assert!(matches!(err, TentacleError::Cadence(_)));

        // u64 values past i64::MAX are caught too.
        let cadence = Cadence::Interval {
            every: u64::MAX,
            period: Period::Seconds,
        };
        assert!(cadence.validate().is_err());
    }

    #[test]
    fn test_interval_step_past_end_of_time_errors() {
        // The step itself is representable, but adding it to a date near
        // chrono's ceiling is not.
        let cadence = Cadence::Interval {
            every: 100_000_000,
            period: Period::Days,
        };
        assert!(cadence.validate().is_ok());
        let late = Utc.with_ymd_and_hms(262000, 1, 1, 0, 0, 0).unwrap();
        assert!(cadence.next_after(late, late).is_err());
    }

    #[test]
    fn test_crontab_parse() {
        let spec = Crontab::parse("0 8 * * *").unwrap();
        assert_eq!(spec.minute, "0");
        assert_eq!(spec.hour, "8");
        assert_eq!(spec.expression(), "0 8 * * *");

        assert!(Crontab::parse("0 8 * *").is_err());
        assert!(Crontab::parse("61 * * * *").is_err());
    }

    #[test]
    fn test_cadence_display() {
        let one = Cadence::Interval {
            every: 1,
            period: Period::Hours,
        };
        assert_eq!(one.to_string(), "every hour");

        let five = Cadence::Interval {
            every: 5,
            period: Period::Minutes,
        };
        assert_eq!(five.to_string(), "every 5 minutes");

        let cron = Cadence::Crontab(Crontab::parse("0 8 * * *").unwrap());
        assert_eq!(cron.to_string(), "0 8 * * *");
    }

    #[test]
    fn test_period_from_str() {
        assert_eq!("hours".parse::<Period>().unwrap(), Period::Hours);
        assert!("fortnights".parse::<Period>().is_err());
    }

    #[test]
    fn test_entry_roundtrip() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 8, 0, 0).unwrap();
        let entry = ScheduleEntry::new(
            "daily-report",
            Cadence::Interval {
                every: 24,
                period: Period::Hours,
            },
            action(),
            now,
        )
        .unwrap();
        let json = serde_json::to_string(&entry).unwrap();
        let back: ScheduleEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "daily-report");
        assert_eq!(back.next_due, now + Duration::hours(24));
        assert!(back.enabled);
    }

    #[tokio::test]
    async fn test_store_helpers() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let now = Utc::now();
        let entry = ScheduleEntry::new(
            "x",
            Cadence::Interval {
                every: 1,
                period: Period::Minutes,
            },
            action(),
            now,
        )
        .unwrap();

        save_new(&store, &entry).await.unwrap();
        // Duplicate names are rejected.
        assert!(save_new(&store, &entry).await.is_err());

        let (entries, broken) = load_all(&store).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(broken.is_empty());

        assert!(set_enabled(&store, "x", false).await.unwrap());
        let (entries, _) = load_all(&store).await.unwrap();
        assert!(!entries[0].0.enabled);

        assert!(remove(&store, "x").await.unwrap());
        assert!(!remove(&store, "x").await.unwrap());
    }

    #[tokio::test]
    async fn test_quarantined_records_stay_listable() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        store
            .put(&quarantine_key("relic"), "{not json", None)
            .await
            .unwrap();

        // Not an entry anymore, but still visible to operators.
        let (entries, broken) = load_all(&store).await.unwrap();
        assert!(entries.is_empty());
        assert!(broken.is_empty());

        let quarantined = load_quarantined(&store).await.unwrap();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].0, "relic");
        assert_eq!(quarantined[0].1, "{not json");
    }

    #[tokio::test]
    async fn test_load_all_reports_broken_records() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        store
            .put(&entry_key("bad"), "{not json", None)
            .await
            .unwrap();
        let (entries, broken) = load_all(&store).await.unwrap();
        assert!(entries.is_empty());
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].0, "entry/bad");
    }
}
