//! Gamification ledger: XP total, daily streak and conversational memory
//!
//! The ledger is the only reader and writer of the persisted progress keys.
//! Every mutation is written to storage before the call returns.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{
    KEY_AI_MEMORY, KEY_LAST_STREAK_DATE, KEY_STREAK_DAYS, KEY_XP_TOTAL, Storage,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Source of the current local calendar day
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Clock backed by the system's local time zone
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a settable day
#[derive(Debug)]
pub struct FixedClock {
    day: parking_lot::Mutex<NaiveDate>,
}

impl FixedClock {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day: parking_lot::Mutex::new(day),
        }
    }

    pub fn set(&self, day: NaiveDate) {
        *self.day.lock() = day;
    }

    pub fn advance_days(&self, days: i64) {
        let mut day = self.day.lock();
        *day += chrono::Duration::days(days);
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.day.lock()
    }
}

/// Result of a staleness check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreakStatus {
    /// No activity yet, or last activity was today or yesterday
    Fresh,
    /// Last activity is strictly before yesterday
    Broken {
        last_activity: NaiveDate,
        days_missed: i64,
    },
}

/// How a single `record_activity` call moved the streak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakChange {
    /// Already active today
    Unchanged,
    /// Continued from yesterday
    Extended,
    /// First activity, or the previous streak had lapsed
    Started,
}

/// Point-in-time copy of the ledger fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub xp_total: i64,
    pub streak_days: u32,
    pub last_activity_date: Option<NaiveDate>,
}

/// Persisted XP/streak progress store
pub struct GamificationLedger {
    storage: Arc<Storage>,
    clock: Arc<dyn Clock>,
    xp_total: i64,
    streak_days: u32,
    last_activity_date: Option<NaiveDate>,
    memory: String,
}

impl GamificationLedger {
    /// Load the ledger from storage with a custom clock
    pub fn load_with_clock(storage: Arc<Storage>, clock: Arc<dyn Clock>) -> Result<Self> {
        let xp_total = storage
            .get_setting(KEY_XP_TOTAL)?
            .and_then(|v| parse_or_warn(KEY_XP_TOTAL, &v))
            .unwrap_or(0);
        let streak_days = storage
            .get_setting(KEY_STREAK_DAYS)?
            .and_then(|v| parse_or_warn(KEY_STREAK_DAYS, &v))
            .unwrap_or(0);
        let last_activity_date = storage
            .get_setting(KEY_LAST_STREAK_DATE)?
            .and_then(|v| parse_date(&v));
        let memory = storage.get_setting(KEY_AI_MEMORY)?.unwrap_or_default();

        debug!(
            xp_total,
            streak_days,
            last_activity = ?last_activity_date,
            "Loaded gamification ledger"
        );

        Ok(Self {
            storage,
            clock,
            xp_total,
            streak_days,
            last_activity_date,
            memory,
        })
    }

    pub fn xp_total(&self) -> i64 {
        self.xp_total
    }

    pub fn streak_days(&self) -> u32 {
        self.streak_days
    }

    pub fn last_activity_date(&self) -> Option<NaiveDate> {
        self.last_activity_date
    }

    /// Conversational memory carried into the next coaching request
    pub fn memory(&self) -> &str {
        &self.memory
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            xp_total: self.xp_total,
            streak_days: self.streak_days,
            last_activity_date: self.last_activity_date,
        }
    }

    /// Add XP for a completed turn and advance the daily streak
    ///
    /// Non-positive deltas leave the XP total unchanged but still count as
    /// activity for the streak.
    pub fn record_activity(&mut self, xp_delta: i64) -> Result<StreakChange> {
        let today = self.clock.today();

        let xp_total = if xp_delta > 0 {
            self.xp_total.saturating_add(xp_delta)
        } else {
            if xp_delta < 0 {
                warn!("Ignoring negative XP delta {}", xp_delta);
            }
            self.xp_total
        };

        let (streak_days, change) = match self.last_activity_date {
            Some(last) if last == today => (self.streak_days, StreakChange::Unchanged),
            Some(last) if today.pred_opt() == Some(last) => (
                self.streak_days.saturating_add(1),
                StreakChange::Extended,
            ),
            _ => (1, StreakChange::Started),
        };

        let date = today.format(DATE_FORMAT).to_string();
        self.storage.set_settings(&[
            (KEY_XP_TOTAL, &xp_total.to_string()),
            (KEY_STREAK_DAYS, &streak_days.to_string()),
            (KEY_LAST_STREAK_DATE, &date),
        ])?;

        self.xp_total = xp_total;
        self.streak_days = streak_days;
        self.last_activity_date = Some(today);

        info!(
            xp_delta,
            xp_total, streak_days, "Recorded activity ({:?})", change
        );
        Ok(change)
    }

    /// Read-only check whether the streak lapsed since the last activity
    pub fn check_staleness(&self) -> StreakStatus {
        let today = self.clock.today();
        match self.last_activity_date {
            Some(last) => {
                let days_since = (today - last).num_days();
                if days_since > 1 {
                    StreakStatus::Broken {
                        last_activity: last,
                        days_missed: days_since - 1,
                    }
                } else {
                    StreakStatus::Fresh
                }
            }
            None => StreakStatus::Fresh,
        }
    }

    /// Zero the streak if it lapsed; returns the status that was found
    pub fn reset_if_stale(&mut self) -> Result<StreakStatus> {
        let status = self.check_staleness();
        if let StreakStatus::Broken { last_activity, .. } = status
            && self.streak_days != 0
        {
            self.storage.set_setting(KEY_STREAK_DAYS, "0")?;
            info!(
                "Streak of {} days broken (last activity {})",
                self.streak_days, last_activity
            );
            self.streak_days = 0;
        }
        Ok(status)
    }

    /// Replace the conversational memory; an empty string clears it
    pub fn remember(&mut self, memory: &str) -> Result<()> {
        if memory == self.memory {
            return Ok(());
        }
        if memory.is_empty() {
            self.storage.delete_setting(KEY_AI_MEMORY)?;
        } else {
            self.storage.set_setting(KEY_AI_MEMORY, memory)?;
        }
        self.memory = memory.to_string();
        debug!("Updated conversational memory ({} chars)", memory.len());
        Ok(())
    }
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring unparseable value for {}: {:?}", key, value);
            None
        }
    }
}

/// Accepts `YYYY-MM-DD` as well as full RFC 3339 timestamps
fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.with_timezone(&Local).date_naive())
        })
        .or_else(|| {
            warn!("Ignoring unparseable last streak date {:?}", value);
            None
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn ledger_on(today: NaiveDate) -> (GamificationLedger, Arc<FixedClock>, Arc<Storage>) {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(today));
        let ledger = GamificationLedger::load_with_clock(storage.clone(), clock.clone()).unwrap();
        (ledger, clock, storage)
    }

    #[test]
    fn test_first_activity_starts_streak() {
        let (mut ledger, _, _) = ledger_on(day(2026, 3, 10));
        assert_eq!(ledger.snapshot().last_activity_date, None);

        let change = ledger.record_activity(7).unwrap();
        assert_eq!(change, StreakChange::Started);
        assert_eq!(ledger.xp_total(), 7);
        assert_eq!(ledger.streak_days(), 1);
        assert_eq!(ledger.last_activity_date(), Some(day(2026, 3, 10)));
    }

    #[test]
    fn test_consecutive_days_extend_streak() {
        let (mut ledger, clock, _) = ledger_on(day(2026, 3, 10));
        ledger.record_activity(1).unwrap();
        clock.advance_days(1);
        assert_eq!(ledger.record_activity(1).unwrap(), StreakChange::Extended);
        clock.advance_days(1);
        ledger.record_activity(1).unwrap();
        assert_eq!(ledger.streak_days(), 3);
        assert_eq!(ledger.xp_total(), 3);
    }

    #[test]
    fn test_month_boundary_counts_as_yesterday() {
        let (mut ledger, clock, _) = ledger_on(day(2026, 2, 28));
        ledger.record_activity(1).unwrap();
        clock.set(day(2026, 3, 1));
        assert_eq!(ledger.record_activity(1).unwrap(), StreakChange::Extended);
        assert_eq!(ledger.streak_days(), 2);
    }

    #[test]
    fn test_non_positive_delta_keeps_xp() {
        let (mut ledger, _, _) = ledger_on(day(2026, 3, 10));
        ledger.record_activity(10).unwrap();
        ledger.record_activity(0).unwrap();
        ledger.record_activity(-4).unwrap();
        assert_eq!(ledger.xp_total(), 10);
        assert_eq!(ledger.streak_days(), 1);
    }

    #[test]
    fn test_staleness_is_read_only() {
        let (mut ledger, clock, _) = ledger_on(day(2026, 3, 10));
        ledger.record_activity(1).unwrap();

        clock.advance_days(1);
        assert_eq!(ledger.check_staleness(), StreakStatus::Fresh);

        clock.advance_days(2);
        assert_eq!(
            ledger.check_staleness(),
            StreakStatus::Broken {
                last_activity: day(2026, 3, 10),
                days_missed: 2,
            }
        );
        assert_eq!(ledger.streak_days(), 1);
    }

    #[test]
    fn test_reset_if_stale_persists_zero() {
        let (mut ledger, clock, storage) = ledger_on(day(2026, 3, 10));
        ledger.record_activity(3).unwrap();
        clock.advance_days(5);

        ledger.reset_if_stale().unwrap();
        assert_eq!(ledger.streak_days(), 0);
        assert_eq!(
            storage.get_setting(KEY_STREAK_DAYS).unwrap(),
            Some("0".to_string())
        );
        // xp is never touched by a streak reset
        assert_eq!(ledger.xp_total(), 3);
    }

    #[test]
    fn test_memory_persists() {
        let (mut ledger, clock, storage) = ledger_on(day(2026, 3, 10));
        ledger.remember("User is Tapi.").unwrap();

        let reloaded = GamificationLedger::load_with_clock(storage, clock).unwrap();
        assert_eq!(reloaded.memory(), "User is Tapi.");
    }

    #[test]
    fn test_empty_memory_clears_stored_value() {
        let (mut ledger, clock, storage) = ledger_on(day(2026, 3, 10));
        ledger.remember("User is Tapi.").unwrap();
        ledger.remember("").unwrap();

        assert_eq!(ledger.memory(), "");
        assert_eq!(storage.get_setting(KEY_AI_MEMORY).unwrap(), None);
        let reloaded = GamificationLedger::load_with_clock(storage, clock).unwrap();
        assert_eq!(reloaded.memory(), "");
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2026-03-10"), Some(day(2026, 3, 10)));
        assert!(parse_date("2026-03-10T12:00:00+00:00").is_some());
        assert_eq!(parse_date("yesterday"), None);
    }
}
