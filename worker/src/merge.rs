use std::collections::{HashMap, HashSet};

use chrono::Duration;
use tracing::info;
use uuid::Uuid;

use common_identity::hash;
use common_store::{AnalyticsStore, AppStore, StoreError};
use common_types::{ProjectId, SessionRow, UserId};

/// Fold all of `from`'s history into `into`, then delete the old rows.
///
/// Every step re-derives its inputs from the stores, so the at-least-once
/// queue can re-run the whole thing after a partial failure: recomputed
/// device ids collide into insert-if-absent, tombstone-then-insert lands on
/// the same rows, and session matching is deterministic.
pub async fn merge_users(
    analytics: &dyn AnalyticsStore,
    app: &dyn AppStore,
    window: Duration,
    project_id: ProjectId,
    from: UserId,
    into: UserId,
) -> Result<(), StoreError> {
    // Old devices are recreated, deduplicated, under the new id.
    let old_devices = analytics.devices_by_user(project_id, from).await?;
    analytics.delete_devices_by_user(project_id, from).await?;

    let old_sessions = analytics.sessions_by_user(project_id, from).await?;
    let mut old_events = analytics.events_by_user(project_id, from).await?;
    if old_events.is_empty() {
        return Ok(());
    }

    // Identity to stamp onto everything that moves.
    let identifier = app
        .mapping_by_user(project_id, into)
        .await?
        .map(|m| m.identifier);
    let display_name = analytics
        .user_by_id(project_id, into)
        .await?
        .and_then(|u| u.display_name);

    let earliest = old_events.iter().map(|e| e.created_at).min();
    let latest = old_events.iter().map(|e| e.created_at).max();
    let (Some(earliest), Some(latest)) = (earliest, latest) else {
        return Ok(());
    };

    let mut destinations = analytics
        .sessions_in_range(project_id, into, earliest - window, latest + window)
        .await?;

    // Remap each old event into the destination session whose expanded
    // window contains it. When several match, the one whose start is
    // closest to the event wins. Events with no match keep their session,
    // and that session migrates wholesale.
    let mut grew: HashSet<Uuid> = HashSet::new();
    let mut kept: HashSet<Uuid> = HashSet::new();

    for event in &mut old_events {
        let target = destinations
            .iter_mut()
            .filter(|s| {
                s.started_at - window <= event.created_at && event.created_at <= s.ended_at + window
            })
            .min_by_key(|s| (event.created_at - s.started_at).num_milliseconds().abs());

        match target {
            Some(dest) => {
                event.session_id = dest.id;
                if dest.cover(event.created_at) {
                    grew.insert(dest.id);
                }
            }
            None => {
                kept.insert(event.session_id);
            }
        }
    }

    let grown: Vec<SessionRow> = destinations
        .iter()
        .filter(|s| grew.contains(&s.id))
        .cloned()
        .collect();
    if !grown.is_empty() {
        analytics.insert_sessions(&grown).await?;
    }

    let migrated: Vec<SessionRow> = old_sessions
        .into_iter()
        .filter(|s| kept.contains(&s.id))
        .map(|mut s| {
            s.user_id = into;
            s.identifier = identifier.clone();
            s.display_name = display_name.clone();
            s
        })
        .collect();
    if !migrated.is_empty() {
        analytics.insert_sessions(&migrated).await?;
    }

    // Tombstone the old identity, then re-insert its events under the new
    // one. A crash between the two is an accepted window of eventual
    // consistency; the retry re-runs the whole merge.
    analytics.delete_sessions_by_user(project_id, from).await?;
    analytics.delete_events_by_user(project_id, from).await?;

    let mut device_ids: HashMap<String, String> = HashMap::new();
    for device in &old_devices {
        let recomputed_id = hash::device_id(project_id, into, &device.signature());

        let mut recomputed = device.clone();
        recomputed.user_id = into;
        recomputed.id = recomputed_id.clone();
        analytics.insert_device_if_absent(&recomputed).await?;

        device_ids.insert(device.id.clone(), recomputed_id);
    }

    for event in &mut old_events {
        event.user_id = into;
        event.identifier = identifier.clone();
        event.display_name = display_name.clone();
        if let Some(recomputed) = device_ids.get(&event.device_id) {
            event.device_id = recomputed.clone();
        }
    }
    analytics.insert_events(&old_events).await?;

    info!(
        %project_id,
        from = %from,
        into = %into,
        events = old_events.len(),
        sessions_migrated = migrated.len(),
        "merged user history"
    );

    Ok(())
}
