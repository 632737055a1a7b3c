use anyhow::{Result, bail};
use clap::ValueEnum;

use tend_core::bootstrap::{BootstrapFlow, BootstrapState};
use tend_core::service::TrackerService;

use super::helpers::format_ms;
use crate::config::{Config, RemoteConfig};
use crate::remote::{CliIdentity, HttpRemote};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum BootstrapAction {
    Upload,
    Download,
    Merge,
    Later,
}

fn not_connected(json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "error": "not connected" }));
    } else {
        eprintln!("Not connected to a sync server. Run `tend connect <url> <token>` first.");
    }
    Ok(())
}

fn open_remote(remote_cfg: &RemoteConfig) -> (HttpRemote, CliIdentity) {
    (
        HttpRemote::new(&remote_cfg.base_url, &remote_cfg.token),
        CliIdentity(Some(remote_cfg.account.clone())),
    )
}

pub(crate) async fn cmd_connect(
    config: &Config,
    url: &str,
    token: &str,
    json: bool,
) -> Result<()> {
    let remote = HttpRemote::new(url, token);
    let account = remote
        .account()
        .await
        .map_err(|e| anyhow::anyhow!("Could not reach server at {url}: {e}"))?;

    let remote_cfg = RemoteConfig {
        base_url: url.trim_end_matches('/').to_string(),
        token: token.to_string(),
        account: account.clone(),
    };
    config.store_remote(&remote_cfg)?;

    if json {
        println!("{}", serde_json::json!({ "connected": true, "account": account }));
    } else {
        println!("Connected to {url} as account {account}");
        println!("Run `tend sync` to synchronize, or `tend bootstrap` for the first-sync decision.");
    }
    Ok(())
}

pub(crate) async fn cmd_sync(svc: &TrackerService, config: &Config, json: bool) -> Result<()> {
    let Some(remote_cfg) = config.load_remote()? else {
        return not_connected(json);
    };
    let (remote, identity) = open_remote(&remote_cfg);

    if !svc.db().migration_offered()? && !json {
        eprintln!(
            "Note: the first-sync decision is still pending. Run `tend bootstrap` to choose\n\
             how to combine the data on this device with your account."
        );
    }

    let result = svc.sync(&remote, &identity).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if result.success {
        println!("Synced: {} pushed, {} pulled", result.pushed, result.pulled);
        Ok(())
    } else {
        bail!(
            "Sync failed after {} pushed, {} pulled: {}",
            result.pushed,
            result.pulled,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

pub(crate) fn cmd_status(svc: &TrackerService, config: &Config, json: bool) -> Result<()> {
    let remote_cfg = config.load_remote()?;
    let last_sync = svc.last_sync_ms()?;
    let offered = svc.db().migration_offered()?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "connected": remote_cfg.is_some(),
                "server": remote_cfg.as_ref().map(|r| r.base_url.clone()),
                "account": remote_cfg.as_ref().map(|r| r.account.clone()),
                "last_sync_ms": last_sync,
                "bootstrap_pending": remote_cfg.is_some() && !offered,
            })
        );
        return Ok(());
    }

    match &remote_cfg {
        Some(r) => println!("Connected to {} as account {}", r.base_url, r.account),
        None => println!("Not connected to a sync server"),
    }
    match last_sync {
        Some(ts) => println!("Last successful sync: {}", format_ms(ts)?),
        None => println!("Never synced"),
    }
    if remote_cfg.is_some() && !offered {
        println!("First-sync decision pending: run `tend bootstrap`");
    }
    Ok(())
}

pub(crate) async fn cmd_bootstrap(
    svc: &TrackerService,
    config: &Config,
    action: Option<BootstrapAction>,
    json: bool,
) -> Result<()> {
    let Some(remote_cfg) = config.load_remote()? else {
        return not_connected(json);
    };
    let (remote, identity) = open_remote(&remote_cfg);

    let mut flow = BootstrapFlow::new();
    let state = flow.check(svc.db(), &remote, &identity).await?;

    match state {
        BootstrapState::Done => {
            if json {
                println!("{}", serde_json::json!({ "state": state }));
            } else {
                println!("Nothing to decide: the first-sync choice is already resolved.");
            }
            return Ok(());
        }
        BootstrapState::Idle | BootstrapState::Checking => {
            bail!("Bootstrap check did not reach a decision (state is {state})");
        }
        BootstrapState::Upload | BootstrapState::Download | BootstrapState::Merge => {}
    }

    let Some(action) = action else {
        if json {
            println!("{}", serde_json::json!({ "state": state }));
            return Ok(());
        }
        match state {
            BootstrapState::Upload => println!(
                "This device has data; your account has none.\n\
                 Run `tend bootstrap upload` to upload it, or `tend bootstrap later` to skip."
            ),
            BootstrapState::Download => println!(
                "Your account has data; this device has none.\n\
                 Run `tend bootstrap download` to download it, or `tend bootstrap later` to skip."
            ),
            _ => println!(
                "Both this device and your account have data.\n\
                 Run `tend bootstrap merge` to combine them, or `tend bootstrap later` to skip."
            ),
        }
        return Ok(());
    };

    match (state, action) {
        (BootstrapState::Upload, BootstrapAction::Upload) => {
            let uploaded = flow
                .upload(svc.db(), &remote, &identity, svc.sync_context())
                .await?;
            if json {
                println!("{}", serde_json::json!({ "uploaded": uploaded }));
            } else {
                println!("Uploaded {uploaded} days to your account");
            }
        }
        (BootstrapState::Download, BootstrapAction::Download) => {
            let downloaded = flow
                .download(svc.db(), &remote, &identity, svc.sync_context())
                .await?;
            if json {
                println!("{}", serde_json::json!({ "downloaded": downloaded }));
            } else {
                println!("Downloaded {downloaded} days to this device");
            }
        }
        (BootstrapState::Merge, BootstrapAction::Merge) => {
            let result = flow
                .merge(svc.db(), &remote, &identity, svc.sync_context())
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else if result.success {
                println!("Merged: {} pushed, {} pulled", result.pushed, result.pulled);
            } else {
                bail!(
                    "Merge sync failed: {}",
                    result.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
        }
        (_, BootstrapAction::Later) => {
            flow.dismiss(svc.db())?;
            if json {
                println!("{}", serde_json::json!({ "dismissed": true }));
            } else {
                println!("Dismissed. The first-sync prompt will not be shown again.");
            }
        }
        (state, action) => {
            bail!("The pending decision is '{state}'; `tend bootstrap {action:?}` does not apply")
        }
    }

    Ok(())
}
