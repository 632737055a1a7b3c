//! Bidirectional push/pull synchronization of day records against an
//! account-scoped backend, last-write-wins with session-scoped tie-breaking.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::db::Database;
use crate::models::{DayRecord, now_ms, shift_date_key, today_key};

/// Rolling window of calendar days eligible for sync, ending today. Older
/// history is sync-exempt: it bounds cost and staleness risk.
pub const SYNC_DAYS: i64 = 60;

/// First date key of the sync window for the given anchor day. The window
/// contains exactly [`SYNC_DAYS`] keys including the anchor itself.
pub fn window_start(today: &str) -> anyhow::Result<String> {
    shift_date_key(today, -(SYNC_DAYS - 1))
}

/// Outcome of one sync invocation, surfaced to the caller as-is.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub success: bool,
    pub pushed: i64,
    pub pulled: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResult {
    #[must_use]
    pub fn ok(pushed: i64, pulled: i64) -> Self {
        Self {
            success: true,
            pushed,
            pulled,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(pushed: i64, pulled: i64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            pushed,
            pulled,
            error: Some(error.into()),
        }
    }
}

/// One backend row: account-scoped day payload plus the server-assigned
/// upsert timestamp.
#[derive(Debug, Clone)]
pub struct RemoteDayRow {
    pub date: String,
    pub record: DayRecord,
    pub updated_at_ms: i64,
}

/// A remote call failed: network, server error, expired auth.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TransportError {}

/// Account-scoped backend the engine syncs against. Row timestamps are
/// server-assigned and strictly increasing per upsert.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Timestamp of the row for (account, date), or `None` when no row
    /// exists yet. Existence check only; the payload is not fetched.
    async fn fetch_updated_at(
        &self,
        account: &str,
        date_key: &str,
    ) -> Result<Option<i64>, TransportError>;

    /// Upsert the full record, returning the fresh server `updated_at`.
    async fn upsert_day(
        &self,
        account: &str,
        date_key: &str,
        record: &DayRecord,
    ) -> Result<i64, TransportError>;

    /// All rows for the account in `[start_key, end_key]` inclusive.
    async fn list_range(
        &self,
        account: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Vec<RemoteDayRow>, TransportError>;
}

/// "Is a user signed in, and what is their stable identifier."
pub trait Identity: Send + Sync {
    fn current_account(&self) -> Option<String>;
}

/// Session-scoped sync state, owned by the caller for the lifetime of its
/// session: the set of date keys edited since the last completed sync, and
/// the in-flight guard that keeps two sync cycles from interleaving.
#[derive(Default)]
pub struct SyncContext {
    modified: Mutex<HashSet<String>>,
    in_flight: AtomicBool,
}

impl SyncContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that this session explicitly edited a date key. Used only to
    /// break timestamp ties in favor of the device that just typed the
    /// change; lost on restart, which is acceptable.
    pub fn mark_modified(&self, date_key: &str) {
        self.modified
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(date_key.to_string());
    }

    #[must_use]
    pub fn is_modified(&self, date_key: &str) -> bool {
        self.modified
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(date_key)
    }

    pub fn clear_modified(&self) {
        self.modified
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    /// Acquire the in-flight guard, or `None` when a cycle is already
    /// running. Two interleaved cycles on the same key can each read a
    /// stale pre-decision timestamp and both decide to write, losing one
    /// update; the guard makes the second invocation fail fast instead.
    pub(crate) fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard(&self.in_flight))
    }
}

pub(crate) struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// --- Tie-break rules ---

/// Pull-side decision: should the cloud row replace the local record?
///
/// A key edited this session with no local timestamp on record is a
/// just-created record that has not round-tripped yet; local wins. A key
/// never locally touched always takes the cloud copy. Otherwise strictly
/// newer cloud wins; exact equality prefers local.
#[must_use]
pub fn should_use_cloud(local_ts: Option<i64>, cloud_ts: i64, modified_this_session: bool) -> bool {
    match local_ts {
        None => !modified_this_session,
        Some(local) => cloud_ts > local,
    }
}

/// Push-side decision: should the local record overwrite the cloud row?
///
/// A missing cloud row always takes the local record (once non-empty).
/// Otherwise only a strictly newer local copy pushes; on a tie neither
/// side writes, which is what makes re-running sync with no new edits
/// perform zero writes.
#[must_use]
pub fn should_push_local(
    local_ts: Option<i64>,
    cloud_ts: Option<i64>,
    modified_this_session: bool,
) -> bool {
    match cloud_ts {
        None => true,
        Some(cloud) => match local_ts {
            None => modified_this_session,
            Some(local) => local > cloud,
        },
    }
}

// --- Sync cycle ---

/// Run one full push+pull cycle over the rolling window.
///
/// No signed-in account is a no-op success with zero counts. A cycle
/// already in flight is rejected (not queued). Per-key failures do not
/// abort the batch: the cycle continues, reports partial counts, and
/// surfaces the first error. Listing the remote window is the one systemic
/// call; its failure aborts the invocation.
pub async fn sync_now(
    db: &Database,
    remote: &dyn RemoteStore,
    identity: &dyn Identity,
    ctx: &SyncContext,
) -> SyncResult {
    let Some(account) = identity.current_account() else {
        return SyncResult::ok(0, 0);
    };
    let Some(_guard) = ctx.try_begin() else {
        return SyncResult::failed(0, 0, "sync already in progress");
    };

    let today = today_key();
    let start = match window_start(&today) {
        Ok(s) => s,
        Err(e) => return SyncResult::failed(0, 0, format!("{e:#}")),
    };

    let mut pushed = 0;
    let mut pulled = 0;
    let mut errors: Vec<String> = Vec::new();

    // Push phase: every non-empty local record in the window.
    let local_keys = match db.list_known_date_keys() {
        Ok(keys) => keys,
        Err(e) => return SyncResult::failed(0, 0, format!("{e:#}")),
    };
    for key in local_keys
        .iter()
        .filter(|k| k.as_str() >= start.as_str() && k.as_str() <= today.as_str())
    {
        match push_one(db, remote, &account, key, ctx).await {
            Ok(true) => pushed += 1,
            Ok(false) => {}
            Err(e) => errors.push(format!("{key}: {e:#}")),
        }
    }

    // Pull phase: every row the backend holds in the window.
    let rows = match remote.list_range(&account, &start, &today).await {
        Ok(rows) => rows,
        Err(e) => {
            return SyncResult::failed(pushed, pulled, format!("failed to list remote days: {e}"));
        }
    };
    for row in &rows {
        match pull_one(db, row, ctx) {
            Ok(true) => pulled += 1,
            Ok(false) => {}
            Err(e) => errors.push(format!("{}: {e:#}", row.date)),
        }
    }

    if errors.is_empty() {
        if let Err(e) = db.set_last_sync_ms(now_ms()) {
            return SyncResult::failed(pushed, pulled, format!("{e:#}"));
        }
        ctx.clear_modified();
        SyncResult::ok(pushed, pulled)
    } else {
        let first = errors[0].clone();
        let message = if errors.len() == 1 {
            first
        } else {
            format!("{first} ({} keys failed)", errors.len())
        };
        SyncResult::failed(pushed, pulled, message)
    }
}

async fn push_one(
    db: &Database,
    remote: &dyn RemoteStore,
    account: &str,
    date_key: &str,
    ctx: &SyncContext,
) -> anyhow::Result<bool> {
    let record = db.read_record(date_key)?;
    if record.is_empty() {
        return Ok(false);
    }
    let local_ts = db.local_updated_at(date_key)?;
    let cloud_ts = remote.fetch_updated_at(account, date_key).await?;
    if should_push_local(local_ts, cloud_ts, ctx.is_modified(date_key)) {
        remote.upsert_day(account, date_key, &record).await?;
        return Ok(true);
    }
    Ok(false)
}

fn pull_one(db: &Database, row: &RemoteDayRow, ctx: &SyncContext) -> anyhow::Result<bool> {
    let local_ts = db.local_updated_at(&row.date)?;
    if should_use_cloud(local_ts, row.updated_at_ms, ctx.is_modified(&row.date))
        && !row.record.is_empty()
    {
        db.write_record_from_sync(&row.date, &row.record, row.updated_at_ms)?;
        return Ok(true);
    }
    Ok(false)
}

// --- Test doubles ---


#[cfg(test)]
mod tests {
    use super::testing::{InMemoryRemote, TestIdentity, signed_in};
    use super::*;
    use crate::models::shift_date_key;

    fn marked_record(water_ml: i64) -> DayRecord {
        let mut rec = DayRecord::empty();
        rec.water_ml = water_ml;
        rec
    }

    // --- Tie-break rules ---

    #[test]
    fn test_should_use_cloud_no_local_timestamp() {
        assert!(should_use_cloud(None, 1000, false));
        // Just created this session, not yet round-tripped: local wins.
        assert!(!should_use_cloud(None, 1000, true));
    }

    #[test]
    fn test_should_use_cloud_strict_comparison() {
        assert!(should_use_cloud(Some(999), 1000, false));
        assert!(!should_use_cloud(Some(1000), 1000, false));
        assert!(!should_use_cloud(Some(1001), 1000, false));
        // The session flag does not override a real timestamp comparison.
        assert!(should_use_cloud(Some(999), 1000, true));
    }

    #[test]
    fn test_should_push_local_missing_cloud_row() {
        assert!(should_push_local(Some(1000), None, false));
        assert!(should_push_local(None, None, false));
    }

    #[test]
    fn test_should_push_local_strict_comparison() {
        assert!(should_push_local(Some(1001), Some(1000), false));
        assert!(!should_push_local(Some(1000), Some(1000), false));
        assert!(!should_push_local(Some(999), Some(1000), false));
        assert!(should_push_local(None, Some(1000), true));
        assert!(!should_push_local(None, Some(1000), false));
    }

    // --- Sync cycle ---

    #[tokio::test]
    async fn test_not_signed_in_is_noop_success() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        db.write_record(&today_key(), &marked_record(500)).unwrap();

        let res = sync_now(&db, &remote, &TestIdentity(None), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 0);
        assert_eq!(res.pulled, 0);
        assert_eq!(remote.row_count(), 0);
    }

    #[tokio::test]
    async fn test_push_new_local_record() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        db.write_record(&today, &marked_record(500)).unwrap();

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 1);
        let (record, _) = remote.row("acct-1", &today).unwrap();
        assert_eq!(record.water_ml, 500);
    }

    #[tokio::test]
    async fn test_empty_local_does_not_seed_remote() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        // Saved, but with nothing logged.
        db.write_record(&today_key(), &DayRecord::empty()).unwrap();

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 0);
        assert_eq!(remote.row_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_remote_row_is_not_pulled() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        remote.seed_row("acct-1", &today, DayRecord::empty(), now_ms() + 10_000);

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pulled, 0);
        assert!(db.read_record(&today).unwrap().is_empty());
        assert!(db.local_updated_at(&today).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        db.write_record(&today, &marked_record(500)).unwrap();

        let first = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(first.success);
        assert_eq!(first.pushed, 1);
        // The push stamps a fresh server timestamp; the same cycle's pull
        // converges local metadata onto it.
        assert_eq!(first.pulled, 1);

        let second = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(second.success);
        assert_eq!(second.pushed, 0);
        assert_eq!(second.pulled, 0);
    }

    #[tokio::test]
    async fn test_tie_leaves_both_sides_unchanged() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        let ts = now_ms();
        db.write_record_from_sync(&today, &marked_record(100), ts)
            .unwrap();
        remote.seed_row("acct-1", &today, marked_record(999), ts);

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 0);
        assert_eq!(res.pulled, 0);
        assert_eq!(db.read_record(&today).unwrap().water_ml, 100);
        assert_eq!(remote.row("acct-1", &today).unwrap().0.water_ml, 999);
    }

    #[tokio::test]
    async fn test_newer_cloud_wins_pull() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        db.write_record_from_sync(&today, &marked_record(100), 1000)
            .unwrap();
        let cloud_ts = now_ms() + 10_000;
        remote.seed_row("acct-1", &today, marked_record(999), cloud_ts);

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pulled, 1);
        assert_eq!(db.read_record(&today).unwrap().water_ml, 999);
        assert_eq!(db.local_updated_at(&today).unwrap(), Some(cloud_ts));
    }

    #[tokio::test]
    async fn test_newer_local_wins_push() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        remote.seed_row("acct-1", &today, marked_record(999), 1000);
        // Normal save path stamps wall-clock, far newer than ts 1000.
        db.write_record(&today, &marked_record(100)).unwrap();

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 1);
        assert_eq!(remote.row("acct-1", &today).unwrap().0.water_ml, 100);
    }

    #[tokio::test]
    async fn test_session_priority_pushes_untimestamped_record() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        // Record exists locally with no sync metadata (written before the
        // metadata table existed) while an empty remote row is present.
        db.insert_raw_day(&today, r#"{"water_ml": 500}"#).unwrap();
        remote.seed_row("acct-1", &today, DayRecord::empty(), now_ms() + 5_000);
        ctx.mark_modified(&today);

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 1);
        assert_eq!(remote.row("acct-1", &today).unwrap().0.water_ml, 500);
        // The empty remote row never replaced the local edit.
        assert_eq!(db.read_record(&today).unwrap().water_ml, 500);
    }

    #[tokio::test]
    async fn test_untimestamped_unmodified_record_defers_to_cloud() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        db.insert_raw_day(&today, r#"{"water_ml": 500}"#).unwrap();
        let cloud_ts = now_ms() + 5_000;
        remote.seed_row("acct-1", &today, marked_record(999), cloud_ts);

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 0);
        assert_eq!(res.pulled, 1);
        assert_eq!(db.read_record(&today).unwrap().water_ml, 999);
    }

    #[tokio::test]
    async fn test_round_trip_preserves_record_and_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        let mut rec = marked_record(750);
        rec.walk_done = true;
        rec.mood.evening = Some(4);
        db.write_record(&today, &rec).unwrap();

        sync_now(&db, &remote, &signed_in(), &ctx).await;
        let (_, remote_ts) = remote.row("acct-1", &today).unwrap();

        // Lose the local copy, then pull it back.
        db.delete_day(&today).unwrap();
        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pulled, 1);
        assert_eq!(db.read_record(&today).unwrap(), rec);
        assert_eq!(db.local_updated_at(&today).unwrap(), Some(remote_ts));
    }

    #[tokio::test]
    async fn test_window_boundary() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        let oldest_in_window = window_start(&today).unwrap();
        let just_outside = shift_date_key(&oldest_in_window, -1).unwrap();
        db.write_record(&oldest_in_window, &marked_record(100))
            .unwrap();
        db.write_record(&just_outside, &marked_record(200)).unwrap();

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert_eq!(res.pushed, 1);
        assert!(remote.row("acct-1", &oldest_in_window).is_some());
        assert!(remote.row("acct-1", &just_outside).is_none());
    }

    #[tokio::test]
    async fn test_per_key_error_does_not_abort_batch() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        let yesterday = shift_date_key(&today, -1).unwrap();
        db.write_record(&today, &marked_record(100)).unwrap();
        db.write_record(&yesterday, &marked_record(200)).unwrap();
        remote.fail_on(&yesterday);
        ctx.mark_modified(&today);

        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(!res.success);
        assert_eq!(res.pushed, 1);
        assert!(remote.row("acct-1", &today).is_some());
        assert!(res.error.unwrap().contains(&yesterday));
        // A failed cycle keeps the session marks for the next attempt.
        assert!(ctx.is_modified(&today));
    }

    #[tokio::test]
    async fn test_success_updates_last_sync_and_clears_marks() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        db.write_record(&today, &marked_record(100)).unwrap();
        ctx.mark_modified(&today);

        let before = now_ms();
        let res = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(res.success);
        assert!(db.last_sync_ms().unwrap().unwrap() >= before);
        assert!(!ctx.is_modified(&today));
    }

    #[tokio::test]
    async fn test_concurrent_invocation_rejected() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();
        let today = today_key();
        db.write_record(&today, &marked_record(100)).unwrap();
        ctx.mark_modified(&today);

        let creds = signed_in();
        let (a, b) = tokio::join!(
            sync_now(&db, &remote, &creds, &ctx),
            sync_now(&db, &remote, &creds, &ctx),
        );
        // Exactly one cycle may claim the write.
        let results = [&a, &b];
        assert_eq!(results.iter().filter(|r| r.success).count(), 1);
        assert_eq!(results.iter().map(|r| r.pushed).sum::<i64>(), 1);
        let rejected = results.iter().find(|r| !r.success).unwrap();
        assert_eq!(rejected.error.as_deref(), Some("sync already in progress"));
    }

    #[tokio::test]
    async fn test_guard_released_after_cycle() {
        let db = Database::open_in_memory().unwrap();
        let remote = InMemoryRemote::new();
        let ctx = SyncContext::new();

        let first = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(first.success);
        let second = sync_now(&db, &remote, &signed_in(), &ctx).await;
        assert!(second.success);
    }
}
