//! Session scoping: one sync bundle per (actor, circle), torn down when
//! the session moves on.

use circle_core::{ShareKind, SyncError};
use circle_sync::{CircleDirectory, CircleSync, InMemoryStore, SessionContext, SyncConfig, ViewStatus};
use std::sync::Arc;
use tokio::time::{timeout, Duration};

async fn signed_in(store: &Arc<InMemoryStore>, name: &str) -> SessionContext {
    let profile = store.sign_up(name).await.unwrap();
    let context = SessionContext::new();
    context.sign_in(profile.id);
    context
}

#[tokio::test]
async fn test_open_requires_actor_and_circle() {
    let store = Arc::new(InMemoryStore::default());
    let config = SyncConfig::for_testing();

    let nobody = SessionContext::new();
    let err = CircleSync::open(store.clone(), &nobody, &config).await.err().unwrap();
    assert_eq!(err, SyncError::NoActor);

    let alice = signed_in(&store, "alice").await;
    let err = CircleSync::open(store.clone(), &alice, &config).await.err().unwrap();
    assert!(matches!(err, SyncError::InvalidInput(_)));
}

#[tokio::test]
async fn test_bundle_syncs_every_feed() {
    let store = Arc::new(InMemoryStore::default());
    let config = SyncConfig::for_testing();

    let alice = signed_in(&store, "alice").await;
    let circle = CircleDirectory::new(store.clone(), alice.clone())
        .create("family")
        .await
        .unwrap();
    let bob = signed_in(&store, "bob").await;
    CircleDirectory::new(store.clone(), bob.clone())
        .join(&circle.invite_code)
        .await
        .unwrap();

    let alice_sync = CircleSync::open(store.clone(), &alice, &config).await.unwrap();
    let bob_sync = CircleSync::open(store.clone(), &bob, &config).await.unwrap();
    assert_eq!(alice_sync.session().scope_id, circle.id);

    alice_sync.thoughts.post("feeling good").await.unwrap();
    alice_sync.messages.send("dinner at 7?").await.unwrap();
    bob_sync
        .shared
        .share(ShareKind::Link, "https://www.example.com/recipe", "")
        .await
        .unwrap();

    let mut revisions = bob_sync.shared.watch();
    timeout(Duration::from_secs(2), async {
        while bob_sync.thoughts.len() < 1 || bob_sync.messages.len() < 1 || alice_sync.shared.len() < 1 {
            let _ = timeout(Duration::from_millis(10), revisions.changed()).await;
        }
    })
    .await
    .expect("feeds did not converge");

    let shared = &alice_sync.shared.items()[0];
    match &shared.payload {
        circle_core::Payload::Shared { source, title, .. } => {
            assert_eq!(source, "example.com");
            assert_eq!(title, "https://www.example.com/recipe");
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(bob_sync.thoughts.status(), ViewStatus::Ready);
}

#[tokio::test]
async fn test_sign_out_disposes_everything() {
    let store = Arc::new(InMemoryStore::default());
    let config = SyncConfig::for_testing();

    let alice = signed_in(&store, "alice").await;
    CircleDirectory::new(store.clone(), alice.clone())
        .create("home")
        .await
        .unwrap();
    let sync = CircleSync::open(store.clone(), &alice, &config).await.unwrap();
    assert!(!sync.is_disposed());

    // Nothing runs between the sign-out and these checks.
    alice.sign_out();
    assert_eq!(sync.thoughts.post("ghost").await, Err(SyncError::Disposed));
    assert!(sync.is_disposed());
    assert_eq!(alice.bound(), 0);
    assert_eq!(sync.thoughts.status(), ViewStatus::Disposed);
    assert_eq!(sync.requests.requests().status(), ViewStatus::Disposed);
    assert_eq!(sync.presence.status(), ViewStatus::Disposed);
    assert_eq!(sync.presence.toggle_awake().await, Err(SyncError::Disposed));
}

#[tokio::test]
async fn test_switching_circle_disposes_old_bundle() {
    let store = Arc::new(InMemoryStore::default());
    let config = SyncConfig::for_testing();

    let alice = signed_in(&store, "alice").await;
    let directory = CircleDirectory::new(store.clone(), alice.clone());
    directory.create("home").await.unwrap();
    let home_sync = CircleSync::open(store.clone(), &alice, &config).await.unwrap();

    let work = directory.create("work").await.unwrap();
    assert!(home_sync.is_disposed());
    assert_eq!(home_sync.messages.send("still here?").await, Err(SyncError::Disposed));

    let work_sync = CircleSync::open(store.clone(), &alice, &config).await.unwrap();
    assert_eq!(work_sync.session().scope_id, work.id);
    assert!(!work_sync.is_disposed());

    // Re-entering the current circle is not a change.
    alice.enter_circle(work.id).unwrap();
    assert!(!work_sync.is_disposed());
    assert_eq!(alice.bound(), 1);

    drop(home_sync);
    drop(work_sync);
    assert_eq!(alice.bound(), 0);
}
