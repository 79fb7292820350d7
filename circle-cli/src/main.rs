//! Circle sync demo: two members of one circle, every feed, one claim race.
//!
//! Runs against the in-process store. Set `RUST_LOG=debug` to watch each
//! event being applied.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;

use circle_core::{Payload, Record, Result, ShareKind};
use circle_sync::{
    CircleDirectory, CircleSync, ClaimOutcome, InMemoryStore, MemoryStoreConfig, SessionContext,
    SyncConfig,
};

/// Wait for `done`, waking on each revision, for at most two seconds.
async fn settle(mut revisions: watch::Receiver<u64>, done: impl Fn() -> bool) {
    let wait = async {
        while !done() {
            if revisions.changed().await.is_err() {
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(2), wait).await.is_err() {
        warn!("Gave up waiting for the views to settle");
    }
}

fn describe(record: &Record) -> String {
    let author = record.author.as_ref().map_or("?", |a| a.name.as_str());
    match &record.payload {
        Payload::Thought { text } | Payload::Message { text } => format!("{author}: {text}"),
        Payload::Shared { title, source, .. } => format!("{author} shared \"{title}\" ({source})"),
        Payload::Request { text, state } => match state.claimed_by() {
            Some(by) => format!("{author} asked \"{text}\", claimed by {by}"),
            None => format!("{author} asked \"{text}\", open"),
        },
    }
}

async fn sign_up(store: &Arc<InMemoryStore>, name: &str) -> Result<SessionContext> {
    let profile = store.sign_up(name).await?;
    let context = SessionContext::new();
    context.sign_in(profile.id);
    Ok(context)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting circle sync demo...");

    let store = Arc::new(InMemoryStore::new(MemoryStoreConfig {
        latency: Some(Duration::from_millis(2)),
        ..MemoryStoreConfig::default()
    }));
    let config = SyncConfig::default();

    let alice = sign_up(&store, "Alice").await?;
    let bob = sign_up(&store, "Bob").await?;

    let circle = CircleDirectory::new(store.clone(), alice.clone())
        .create("Sunday dinners")
        .await?;
    info!("Invite code for {}: {}", circle.name, circle.invite_code);
    let bob_directory = CircleDirectory::new(store.clone(), bob.clone());
    bob_directory.join(&circle.invite_code).await?;

    let alice_sync = CircleSync::open(store.clone(), &alice, &config).await?;
    let bob_sync = CircleSync::open(store.clone(), &bob, &config).await?;

    alice_sync.thoughts.post("Made too much soup again").await?;
    bob_sync.messages.send("Anyone up for Sunday?").await?;
    alice_sync.messages.send("Count me in").await?;
    bob_sync
        .shared
        .share(ShareKind::Video, "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "Dinner music")
        .await?;

    let request = alice_sync.requests.create_request("Bring folding chairs?").await?;
    settle(bob_sync.requests.requests().watch(), || {
        bob_sync.requests.requests().get(request).is_some()
    })
    .await;

    // Both try to claim at once; the store picks exactly one.
    let (alice_claim, bob_claim) = tokio::join!(
        alice_sync.requests.claim(request),
        bob_sync.requests.claim(request),
    );
    for (name, outcome) in [("Alice", alice_claim?), ("Bob", bob_claim?)] {
        match outcome {
            ClaimOutcome::Won(_) => info!("{name} claimed the request"),
            ClaimOutcome::AlreadyClaimed { claimed_by } => {
                info!("{name} was too late, already claimed by {claimed_by}")
            }
        }
    }

    bob_sync.presence.toggle_awake().await?;
    bob_sync.presence.toggle_awake().await?;
    let awake = bob_sync.presence.toggle_awake().await?;
    info!("Bob is awake since {:?}", awake.awake_since);

    settle(alice_sync.presence.watch(), || {
        alice_sync.presence.get(awake.member_id) == Some(awake.clone())
    })
    .await;
    settle(alice_sync.requests.requests().watch(), || {
        alice_sync.requests.open_requests().is_empty()
    })
    .await;
    settle(alice_sync.shared.watch(), || !alice_sync.shared.is_empty()).await;
    settle(alice_sync.messages.watch(), || alice_sync.messages.len() == 2).await;

    info!("Alice's view of {}:", circle.name);
    for (feed, records) in [
        ("thoughts", alice_sync.thoughts.items()),
        ("chat", alice_sync.messages.items()),
        ("shared", alice_sync.shared.items()),
        ("requests", alice_sync.requests.requests().items()),
    ] {
        for record in records {
            info!("  [{feed}] {}", describe(&record));
        }
    }
    for presence in alice_sync.presence.awake() {
        info!("  [awake] {}", presence.member_id);
    }

    alice.sign_out();
    bob.sign_out();
    info!(
        "Signed out; views disposed: alice={}, bob={}",
        alice_sync.is_disposed(),
        bob_sync.is_disposed()
    );

    let stats = store.feed_stats().await;
    info!(
        "Store published {} notices, delivered {}",
        stats.published, stats.delivered
    );
    Ok(())
}
