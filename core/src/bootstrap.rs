//! One-time first-sync decision: when a device first authenticates, decide
//! whether its local history should be uploaded, the account's cloud
//! history downloaded, the two merged, or nothing done at all.

use anyhow::{Result, bail, ensure};
use serde::Serialize;

use crate::db::Database;
use crate::models::today_key;
use crate::sync::{self, Identity, RemoteStore, SyncContext, SyncResult, window_start};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    Idle,
    Checking,
    Upload,
    Download,
    Merge,
    Done,
}

impl std::fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Checking => "checking",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Merge => "merge",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// The bootstrap state machine. `idle → checking → {upload | download |
/// merge | done}`; each decision state offers exactly one data-moving
/// action plus dismiss, and every terminal transition latches the
/// migration-offered flag so the decision is never posed twice.
#[derive(Debug)]
pub struct BootstrapFlow {
    state: BootstrapState,
}

impl Default for BootstrapFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapFlow {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: BootstrapState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Classify the device+account pairing. Runs the scan only when a user
    /// is authenticated and the offered-flag is unset; otherwise resolves
    /// without touching the network. A both-sides-empty pairing resolves
    /// straight to `Done` and latches the flag (there is nothing to offer).
    pub async fn check(
        &mut self,
        db: &Database,
        remote: &dyn RemoteStore,
        identity: &dyn Identity,
    ) -> Result<BootstrapState> {
        let Some(account) = identity.current_account() else {
            self.state = BootstrapState::Idle;
            return Ok(self.state);
        };
        if db.migration_offered()? {
            self.state = BootstrapState::Done;
            return Ok(self.state);
        }

        self.state = BootstrapState::Checking;
        let today = today_key();
        let start = window_start(&today)?;

        let mut has_local_data = false;
        for key in db
            .list_known_date_keys()?
            .iter()
            .filter(|k| k.as_str() >= start.as_str() && k.as_str() <= today.as_str())
        {
            if !db.read_record(key)?.is_empty() {
                has_local_data = true;
                break;
            }
        }

        let rows = match remote.list_range(&account, &start, &today).await {
            Ok(rows) => rows,
            Err(e) => {
                self.state = BootstrapState::Idle;
                bail!("failed to list remote days: {e}");
            }
        };
        let has_cloud_data = rows.iter().any(|r| !r.record.is_empty());

        self.state = match (has_local_data, has_cloud_data) {
            (true, false) => BootstrapState::Upload,
            (false, true) => BootstrapState::Download,
            (true, true) => BootstrapState::Merge,
            (false, false) => {
                db.set_migration_offered()?;
                BootstrapState::Done
            }
        };
        Ok(self.state)
    }

    /// Push every non-empty local record in the window, unconditionally: no
    /// timestamp comparison, this path exists for a device that predates
    /// any account. Returns the number of records uploaded.
    pub async fn upload(
        &mut self,
        db: &Database,
        remote: &dyn RemoteStore,
        identity: &dyn Identity,
        ctx: &SyncContext,
    ) -> Result<i64> {
        ensure!(
            self.state == BootstrapState::Upload,
            "no upload pending (state is {})",
            self.state
        );
        let account = require_account(identity)?;
        let _guard = begin(ctx)?;

        let today = today_key();
        let start = window_start(&today)?;
        let mut uploaded = 0;
        for key in db
            .list_known_date_keys()?
            .iter()
            .filter(|k| k.as_str() >= start.as_str() && k.as_str() <= today.as_str())
        {
            let record = db.read_record(key)?;
            if record.is_empty() {
                continue;
            }
            remote.upsert_day(&account, key, &record).await?;
            uploaded += 1;
        }

        db.set_migration_offered()?;
        self.state = BootstrapState::Done;
        Ok(uploaded)
    }

    /// Pull every non-empty remote row in the window into local storage,
    /// unconditionally overwriting local, stamping each row's server
    /// timestamp. Returns the number of records downloaded.
    pub async fn download(
        &mut self,
        db: &Database,
        remote: &dyn RemoteStore,
        identity: &dyn Identity,
        ctx: &SyncContext,
    ) -> Result<i64> {
        ensure!(
            self.state == BootstrapState::Download,
            "no download pending (state is {})",
            self.state
        );
        let account = require_account(identity)?;
        let _guard = begin(ctx)?;

        let today = today_key();
        let start = window_start(&today)?;
        let mut downloaded = 0;
        for row in remote.list_range(&account, &start, &today).await? {
            if row.record.is_empty() {
                continue;
            }
            db.write_record_from_sync(&row.date, &row.record, row.updated_at_ms)?;
            downloaded += 1;
        }

        db.set_migration_offered()?;
        self.state = BootstrapState::Done;
        Ok(downloaded)
    }

    /// Both sides hold data that might conflict: delegate to the full
    /// timestamp-aware sync protocol rather than a blind direction.
    pub async fn merge(
        &mut self,
        db: &Database,
        remote: &dyn RemoteStore,
        identity: &dyn Identity,
        ctx: &SyncContext,
    ) -> Result<SyncResult> {
        ensure!(
            self.state == BootstrapState::Merge,
            "no merge pending (state is {})",
            self.state
        );
        let result = sync::sync_now(db, remote, identity, ctx).await;
        db.set_migration_offered()?;
        self.state = BootstrapState::Done;
        Ok(result)
    }

    /// "Later": resolve without moving any data. The prompt never
    /// reappears after a dismiss.
    pub fn dismiss(&mut self, db: &Database) -> Result<()> {
        ensure!(
            !matches!(self.state, BootstrapState::Idle | BootstrapState::Done),
            "nothing to dismiss (state is {})",
            self.state
        );
        db.set_migration_offered()?;
        self.state = BootstrapState::Done;
        Ok(())
    }
}

fn require_account(identity: &dyn Identity) -> Result<String> {
    identity
        .current_account()
        .ok_or_else(|| anyhow::anyhow!("not signed in"))
}

fn begin(ctx: &SyncContext) -> Result<crate::sync::InFlightGuard<'_>> {
    ctx.try_begin()
        .ok_or_else(|| anyhow::anyhow!("sync already in progress"))
}
