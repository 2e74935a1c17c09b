//! Rebuilds state from a JSON-lines action log, one wire action per line.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use fleet_core::Action;
use fleet_models::RootState;
use fleet_store::{spawn_dispatch, StoreHandle};
use tracing::{debug, info, warn};

/// Parses an action log. Blank lines and `#` comments are skipped.
pub fn parse_actions<R: BufRead>(reader: R) -> Result<Vec<Action>> {
    let mut actions = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", n + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let action: Action =
            serde_json::from_str(line).with_context(|| format!("line {}: not a wire action", n + 1))?;
        actions.push(action);
    }
    Ok(actions)
}

/// Reads the log at `path`; `-` reads stdin.
pub fn read_actions(path: &Path) -> Result<Vec<Action>> {
    if path == Path::new("-") {
        return parse_actions(std::io::stdin().lock());
    }
    let file = File::open(path).with_context(|| format!("opening action log {}", path.display()))?;
    parse_actions(BufReader::new(file))
}

/// Feeds `actions` through the dispatch loop and returns the snapshot once
/// all of them were applied or `wait` elapsed.
pub async fn replay(actions: Vec<Action>, cap: usize, wait: Duration) -> Result<Arc<RootState>> {
    let total = actions.len() as u64;
    let (tx, handle) = spawn_dispatch::<RootState>(cap);
    for action in actions {
        tx.send(action).await.map_err(|_| anyhow!("dispatch loop stopped early"))?;
    }
    drop(tx);
    wait_applied(&handle, total, wait).await;
    info!(actions = total, "replayed action log");
    Ok(handle.current())
}

async fn wait_applied(handle: &StoreHandle<RootState>, total: u64, wait: Duration) {
    let mut rx = handle.subscribe_progress();
    let deadline = Instant::now() + wait;
    loop {
        let applied = *rx.borrow();
        if applied >= total {
            break;
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(applied, total, "timed out waiting for dispatch");
            break;
        }
        let rem = deadline.duration_since(now).min(Duration::from_secs(2));
        match tokio::time::timeout(rem, rx.changed()).await {
            Ok(Ok(())) | Err(_) => {}
            Ok(Err(_)) => {
                debug!(applied, total, "dispatch loop closed");
                break;
            }
        }
    }
}
