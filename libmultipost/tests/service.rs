//! Service facade: accounts, queued posting and cancellation

use std::sync::Arc;

use libmultipost::accounts::{Account, AccountStore, MemoryAccountStore};
use libmultipost::config::PostingConfig;
use libmultipost::registry::AdapterRegistry;
use libmultipost::service::events::Event;
use libmultipost::submission::{MemorySubmissionStore, SubmissionBundle};
use libmultipost::transport::MockTransport;
use libmultipost::types::{PostOutcome, WebsiteId};
use libmultipost::websites::AccountInfo;
use libmultipost::{MultipostError, MultipostService};

struct Harness {
    transport: Arc<MockTransport>,
    submissions: Arc<MemorySubmissionStore>,
    accounts: Arc<MemoryAccountStore>,
    service: MultipostService,
}

fn harness(transport: MockTransport) -> Harness {
    let transport = Arc::new(transport);
    let registry = Arc::new(AdapterRegistry::with_defaults(transport.clone()));
    let submissions = Arc::new(MemorySubmissionStore::new());
    let accounts = Arc::new(MemoryAccountStore::new());
    let service = MultipostService::new(
        registry,
        submissions.clone(),
        accounts.clone(),
        PostingConfig {
            advertise: false,
            ..Default::default()
        },
    );
    Harness {
        transport,
        submissions,
        accounts,
        service,
    }
}

fn notification_bundle(id: &str) -> SubmissionBundle {
    SubmissionBundle::from_json(&format!(
        r#"{{
            "submission": {{"id": "{}", "submission_type": "notification", "title": "News"}},
            "parts": [
                {{"account_id": "default", "is_default": true, "data": {{"description": {{"value": "<p>Hello</p>"}}}}}},
                {{"account_id": "hook", "website": "discord", "data": {{}}}}
            ]
        }}"#,
        id
    ))
    .unwrap()
}

fn hook_account() -> Account {
    Account::new(
        "hook",
        WebsiteId::Discord,
        serde_json::json!({"webhook": "https://discord.com/api/webhooks/1/abc", "name": "noise"}),
    )
}

#[tokio::test]
async fn test_add_account_keeps_only_login_data() {
    let harness = harness(MockTransport::new());
    harness.service.add_account(hook_account()).await.unwrap();

    let stored = harness.accounts.get("hook").await.unwrap();
    assert_eq!(
        stored.data,
        serde_json::json!({"webhook": "https://discord.com/api/webhooks/1/abc"})
    );
}

#[tokio::test]
async fn test_add_account_rejects_bad_id() {
    let harness = harness(MockTransport::new());
    let mut account = hook_account();
    account.id = "has space".to_string();
    let err = harness.service.add_account(account).await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[tokio::test]
async fn test_remove_account_clears_cached_information() {
    let harness = harness(MockTransport::new());
    harness.service.add_account(hook_account()).await.unwrap();
    let adapter = harness.service.registry().get_adapter(WebsiteId::Discord).unwrap();
    adapter
        .account_info()
        .set("hook", AccountInfo::Username("Bot".to_string()));

    assert!(harness.service.remove_account("hook").await);
    assert!(adapter.account_info().username("hook").is_none());
    assert!(!harness.service.remove_account("hook").await);
}

#[tokio::test]
async fn test_queued_post_resolves_with_results() {
    let harness = harness(MockTransport::new().on_post("/api/webhooks/", 200, "{}"));
    harness.service.add_account(hook_account()).await.unwrap();
    harness.submissions.insert_bundle(notification_bundle("s1")).unwrap();

    let mut events = harness.service.subscribe();
    let receiver = harness.service.post("s1").await.unwrap();
    let results = receiver.await.unwrap().unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].outcome.is_success());
    assert_eq!(harness.transport.call_count(), 1);

    let mut completed = false;
    while let Ok(event) = events.try_recv() {
        if let Event::PostingCompleted { submission_id, .. } = event {
            assert_eq!(submission_id, "s1");
            completed = true;
        }
    }
    assert!(completed);
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let harness = harness(MockTransport::new().on_post("/api/webhooks/", 200, "{}"));
    harness.service.add_account(hook_account()).await.unwrap();
    harness.submissions.insert_bundle(notification_bundle("s2")).unwrap();

    let receiver = harness.service.post("s2").await.unwrap();
    assert!(harness.service.cancel("s2"));

    let results = receiver.await.unwrap().unwrap();
    assert_eq!(results[0].outcome, PostOutcome::Cancelled);
    assert_eq!(harness.transport.call_count(), 0);
}

#[tokio::test]
async fn test_cancelled_token_is_released_when_the_worker_refuses() {
    let harness = harness(MockTransport::new().on_post("/api/webhooks/", 200, "{}"));
    harness.service.add_account(hook_account()).await.unwrap();
    harness.submissions.insert_bundle(notification_bundle("s4")).unwrap();

    let receiver = harness.service.post("s4").await.unwrap();
    assert!(harness.service.cancel("s4"));

    let mut untitled = notification_bundle("s4").submission;
    untitled.title = String::new();
    harness.submissions.insert_submission(untitled).unwrap();

    let refused = receiver.await.unwrap();
    assert!(matches!(refused, Err(MultipostError::ValidationFailed { .. })));
    assert!(!harness.service.cancel("s4"));

    harness
        .submissions
        .insert_submission(notification_bundle("s4").submission)
        .unwrap();
    let results = harness.service.post("s4").await.unwrap().await.unwrap().unwrap();
    assert!(results[0].outcome.is_success());
    assert_eq!(harness.transport.call_count(), 1);
}

#[tokio::test]
async fn test_enqueue_refuses_invalid_submission() {
    let harness = harness(MockTransport::new());
    harness
        .submissions
        .insert_bundle(
            SubmissionBundle::from_json(
                r#"{
                    "submission": {"id": "s3", "submission_type": "notification", "title": "News"},
                    "parts": [
                        {"account_id": "default", "is_default": true, "data": {}},
                        {"account_id": "booru", "website": "derpibooru", "data": {}}
                    ]
                }"#,
            )
            .unwrap(),
        )
        .unwrap();

    let err = harness.service.post("s3").await.unwrap_err();
    match err {
        MultipostError::ValidationFailed { problems } => {
            assert_eq!(problems, vec!["booru: Derpibooru does not support notifications."]);
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
    assert!(!harness.service.cancel("s3"));
}

#[tokio::test]
async fn test_check_login_unknown_account() {
    let harness = harness(MockTransport::new());
    let err = harness.service.check_login("nobody").await.unwrap_err();
    assert!(matches!(err, MultipostError::NotFound(_)));
}

#[tokio::test]
async fn test_shutdown_waits_for_worker() {
    let harness = harness(MockTransport::new());
    harness.service.shutdown().await;
}
