//! Update checker — notifies the owner when a new minor version exists.
//!
//! Driven by the scheduler's reserved payload. Checks the release tags
//! endpoint, compares against the running version, and notifies only on
//! minor or major bumps (patch releases stay quiet). State lives in config
//! so restarts never re-notify.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use aster_comm::OutboundMessage;

use crate::agent::AgentContext;

const LATEST_VERSION_KEY: &str = "update_check.latest_version";
const NOTIFIED_VERSION_KEY: &str = "update_check.notified_version";
const TAGS_URL_KEY: &str = "update_check.tags_url";
const DEFAULT_TAGS_URL: &str = "https://api.github.com/repos/aster-agent/aster/tags";

/// Run one check. `created_by` receives the notification in their DM.
pub async fn run_update_check(
    ctx: &Arc<AgentContext>,
    created_by: i64,
) -> Result<(), String> {
    let url = ctx
        .store
        .get_config(TAGS_URL_KEY, json!(DEFAULT_TAGS_URL))
        .await
        .map_err(|e| e.to_string())?
        .as_str()
        .unwrap_or(DEFAULT_TAGS_URL)
        .to_string();

    let Some(latest) = fetch_latest_tag(&ctx.http, &url).await else {
        debug!("update check: no tag fetched");
        return Ok(());
    };

    ctx.store
        .upsert_config(LATEST_VERSION_KEY, &json!(latest), "latest released version seen")
        .await
        .map_err(|e| e.to_string())?;

    let current = env!("CARGO_PKG_VERSION");
    if !is_minor_upgrade(current, &latest) {
        return Ok(());
    }

    let notified = ctx
        .store
        .get_config(NOTIFIED_VERSION_KEY, json!(null))
        .await
        .map_err(|e| e.to_string())?;
    if notified == json!(latest.clone()) {
        return Ok(());
    }

    let user = ctx
        .store
        .get_user_by_id(created_by)
        .await
        .map_err(|e| e.to_string())?;
    if let Some(user) = user {
        info!(current, latest = %latest, "new version available; notifying owner");
        ctx.outbound_send(
            &user.platform,
            &user.platform_id,
            OutboundMessage {
                text: format!(
                    "A new version is available: {latest} (you are on {current})."
                ),
                ..OutboundMessage::default()
            },
        );
    }

    ctx.store
        .upsert_config(NOTIFIED_VERSION_KEY, &json!(latest), "last version notified about")
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

async fn fetch_latest_tag(http: &reqwest::Client, url: &str) -> Option<String> {
    let resp = http
        .get(url)
        .query(&[("per_page", "1")])
        .header("accept", "application/vnd.github.v3+json")
        .header("user-agent", "aster-update-check")
        .send()
        .await
        .ok()?;
    if !resp.status().is_success() {
        return None;
    }
    let tags: serde_json::Value = resp.json().await.ok()?;
    tags.get(0)?
        .get("name")?
        .as_str()
        .map(|t| t.trim_start_matches('v').to_string())
}

fn parse_version(v: &str) -> Vec<u32> {
    v.trim_start_matches('v')
        .split('.')
        .map_while(|p| p.parse().ok())
        .collect()
}

/// True for minor or major bumps only; patch bumps and downgrades stay
/// quiet.
fn is_minor_upgrade(current: &str, latest: &str) -> bool {
    let cur = parse_version(current);
    let lat = parse_version(latest);
    if cur.len() < 2 || lat.len() < 2 {
        return false;
    }
    if lat[0] > cur[0] {
        return true;
    }
    lat[0] == cur[0] && lat[1] > cur[1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_and_major_bumps_notify() {
        assert!(is_minor_upgrade("0.3.4", "0.4.0"));
        assert!(is_minor_upgrade("0.4.0", "1.0.0"));
    }

    #[test]
    fn patch_bumps_and_downgrades_stay_quiet() {
        assert!(!is_minor_upgrade("0.4.0", "0.4.1"));
        assert!(!is_minor_upgrade("0.4.1", "0.4.1"));
        assert!(!is_minor_upgrade("0.4.0", "0.3.0"));
    }

    #[test]
    fn versions_parse_with_v_prefix_and_junk() {
        assert_eq!(parse_version("v1.2.3"), vec![1, 2, 3]);
        assert_eq!(parse_version("1.2.3-beta"), vec![1, 2]);
    }
}
