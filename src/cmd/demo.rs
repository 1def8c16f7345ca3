//! `splitfair demo`: live lists over the in-memory backend.
//!
//! Creates a home, mounts an event list and a notification feed, applies a
//! scripted series of writes and prints every snapshot the views would
//! render.

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use splitfair::backend::{ChangeFeed, MemoryBackend, RecordStore};
use splitfair::common::{Event, HomeId, Notification, Record, Resource, ScopeKey, UserId};
use splitfair::config::SplitfairConfig;
use splitfair::home_setup::HomeSetup;
use splitfair::logging::DebugLog;
use splitfair::repo::HomeRepository;
use splitfair::sync::{EventReconciler, LiveList, NotificationReconciler, Snapshot};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait until the list publishes a snapshot satisfying `ready`.
async fn settle<R: Record>(
    rx: &mut watch::Receiver<Snapshot<R>>,
    step: &str,
    ready: impl FnMut(&Snapshot<R>) -> bool,
) -> Result<Snapshot<R>> {
    let snapshot = tokio::time::timeout(SETTLE_TIMEOUT, rx.wait_for(ready))
        .await
        .with_context(|| format!("Timed out waiting for '{}'", step))?
        .with_context(|| format!("List closed while waiting for '{}'", step))?;
    Ok(snapshot.clone())
}

fn print_events(step: &str, snapshot: &Snapshot<Event>) {
    println!("{} {}", console::style("events").cyan().bold(), step);
    for event in &snapshot.items {
        println!("  {}  {}", event.event_date, event.title);
    }
}

fn print_notifications(step: &str, snapshot: &Snapshot<Notification>) {
    println!(
        "{} {} (unread: {})",
        console::style("notifications").magenta().bold(),
        step,
        snapshot.unread
    );
    for n in &snapshot.items {
        let marker = if n.is_read { " " } else { "*" };
        let audience = if n.is_broadcast() { "everyone" } else { "you" };
        println!("  {} {} [{}]", marker, n.title, audience);
    }
}

async fn insert_event(store: &dyn RecordStore, home: &HomeId, owner: &UserId, id: &str, title: &str, date: &str) -> Result<()> {
    store
        .insert(
            "events",
            json!({"id": id, "home_id": home, "title": title, "event_date": date, "created_by": owner}),
        )
        .await?;
    Ok(())
}

async fn insert_notification(
    store: &dyn RecordStore,
    home: &HomeId,
    user: Option<&UserId>,
    id: &str,
    title: &str,
    created_at: &str,
) -> Result<()> {
    store
        .insert(
            "notifications",
            json!({"id": id, "home_id": home, "user_id": user, "title": title, "is_read": false, "created_at": created_at}),
        )
        .await?;
    Ok(())
}

pub async fn cmd_demo(config: &SplitfairConfig, viewer: &str, debug_log: &DebugLog) -> Result<()> {
    let backend = MemoryBackend::with_channel_capacity(config.channel_capacity());
    let store: Arc<dyn RecordStore> = Arc::new(backend.clone());
    let feed: Arc<dyn ChangeFeed> = Arc::new(backend.clone());
    let viewer = UserId::from(viewer);
    let housemate = UserId::from(format!("{}-housemate", viewer));

    let setup = HomeSetup::new(Arc::clone(&store));
    let home = setup.create_home("Demo Flat", &viewer).await?;
    setup.join_home(&home.invite_code, &housemate).await?;
    println!("Home '{}' created, invite code {}", home.name, home.invite_code);
    println!();

    let repo = Arc::new(HomeRepository::new(Arc::clone(&store)));
    let mut events = LiveList::<Event>::mount(
        repo.clone(),
        Arc::clone(&feed),
        Arc::new(EventReconciler),
        ScopeKey::new(Resource::Events, home.id.as_str()),
    )
    .await;
    let mut notifications = LiveList::<Notification>::mount(
        repo.clone(),
        Arc::clone(&feed),
        Arc::new(NotificationReconciler::new(viewer.clone())),
        ScopeKey::new(Resource::Notifications, home.id.as_str()),
    )
    .await;
    let mut events_rx = events.watch();
    let mut notes_rx = notifications.watch();

    let store = store.as_ref();
    insert_event(store, &home.id, &viewer, "e-dinner", "House dinner", "2024-06-10").await?;
    let snapshot = settle(&mut events_rx, "dinner added", |s| s.items.len() == 1).await?;
    print_events("after adding dinner", &snapshot);

    insert_event(store, &home.id, &housemate, "e-movie", "Movie night", "2024-06-03").await?;
    let snapshot = settle(&mut events_rx, "movie added", |s| s.items.len() == 2).await?;
    print_events("after adding an earlier movie night", &snapshot);

    store
        .update("events", "e-dinner", json!({"event_date": "2024-06-01"}))
        .await?;
    let snapshot = settle(&mut events_rx, "dinner moved", |s| {
        s.items.first().is_some_and(|e| e.id.as_str() == "e-dinner")
    })
    .await?;
    print_events("after moving dinner earlier", &snapshot);

    store.delete("events", "e-movie").await?;
    let snapshot = settle(&mut events_rx, "movie removed", |s| s.items.len() == 1).await?;
    print_events("after cancelling movie night", &snapshot);
    println!();

    insert_notification(store, &home.id, None, "n-rent", "Rent is due Friday", "2024-06-01T09:00:00Z").await?;
    let snapshot = settle(&mut notes_rx, "broadcast", |s| s.unread == 1).await?;
    print_notifications("after a broadcast", &snapshot);

    // Not for the viewer, so the feed must not change.
    insert_notification(store, &home.id, Some(&housemate), "n-other", "Your turn to vacuum", "2024-06-01T10:00:00Z").await?;
    insert_notification(store, &home.id, Some(&viewer), "n-mine", "You owe 12.50", "2024-06-01T11:00:00Z").await?;
    let snapshot = settle(&mut notes_rx, "targeted", |s| s.unread == 2).await?;
    print_notifications("after one message for you and one for a housemate", &snapshot);

    let marked = repo.mark_all_read(&home.id, &viewer).await?;
    let snapshot = settle(&mut notes_rx, "mark all read", |s| s.unread == 0).await?;
    print_notifications(&format!("after marking {} read", marked), &snapshot);
    println!();

    events.unmount();
    notifications.unmount();
    let stats = backend.stats()?;
    println!(
        "channels opened: {}, closed: {}, still open: {}",
        stats.opened,
        stats.closed,
        stats.opened - stats.closed
    );
    println!("debug log entries: {}", debug_log.len());

    Ok(())
}
