//! API integration tests.
//!
//! Drive the full router, auth middleware included, against a mock database
//! and the in-memory signal queue.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    middleware,
};
use chrono::Utc;
use maplit::btreemap;
use mediashelf_api::{AppState, auth_middleware, router as api_router};
use mediashelf_common::config::DeliveryConfig;
use mediashelf_core::{
    FollowService, MemorySignalQueue, NotificationService, OtpStore, SignalAction, SignalQueue,
    SignalQueueService, UserService,
};
use mediashelf_db::{
    entities::{
        follow_relationship::{self, FollowStatus},
        notification::{self, NotificationType},
        user,
    },
    repositories::{FollowRelationshipRepository, NotificationRepository, UserRepository},
};
use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
use serde_json::{Value as JsonValue, json};
use tokio::sync::watch;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    queue: Arc<MemorySignalQueue>,
    _shutdown: watch::Sender<bool>,
}

fn test_user(id: &str) -> user::Model {
    user::Model {
        id: id.to_string(),
        username: id.to_string(),
        username_lower: id.to_lowercase(),
        name: None,
        avatar_url: None,
        is_private: false,
        token: Some(format!("token-{id}")),
        created_at: Utc::now().into(),
        updated_at: None,
    }
}

fn relationship(
    id: &str,
    follower: &str,
    followee: &str,
    status: FollowStatus,
) -> follow_relationship::Model {
    follow_relationship::Model {
        id: id.to_string(),
        follower_id: follower.to_string(),
        followee_id: followee.to_string(),
        status,
        created_at: Utc::now().into(),
        updated_at: Utc::now().into(),
    }
}

fn follow_request_notification(id: &str, relationship_id: &str) -> notification::Model {
    notification::Model {
        id: id.to_string(),
        notifiee_id: "bob".to_string(),
        notifier_id: "alice".to_string(),
        notification_type: NotificationType::FollowRequest,
        follow_relationship_id: Some(relationship_id.to_string()),
        is_read: false,
        created_at: Utc::now().into(),
    }
}

fn create_test_app(db: MockDatabase) -> TestApp {
    let db = Arc::new(db.into_connection());
    let queue = Arc::new(MemorySignalQueue::new(Duration::from_secs(60)));
    let signal_queue: SignalQueueService = queue.clone();

    let user_repo = UserRepository::new(Arc::clone(&db));
    let follow_repo = FollowRelationshipRepository::new(Arc::clone(&db));
    let notification_repo = NotificationRepository::new(Arc::clone(&db));

    let user_service = UserService::new(user_repo.clone(), follow_repo.clone());
    let mut follow_service = FollowService::new(follow_repo.clone(), user_repo.clone());
    follow_service.set_signal_queue(signal_queue.clone());
    let mut notification_service =
        NotificationService::new(notification_repo, user_repo, follow_repo);
    notification_service.set_signal_queue(signal_queue.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        user_service,
        follow_service,
        notification_service,
        signal_queue,
        otp_store: Arc::new(OtpStore::with_ttl(Duration::from_secs(60), 6)),
        delivery: DeliveryConfig::default(),
        shutdown: shutdown_rx,
    };

    let router = api_router()
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .with_state(state);

    TestApp {
        router,
        queue,
        _shutdown: shutdown_tx,
    }
}

/// Mock database whose first query resolves the caller's token.
fn db_as(user_id: &str) -> MockDatabase {
    MockDatabase::new(DatabaseBackend::Postgres).append_query_results([[test_user(user_id)]])
}

fn post(uri: &str, token: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .uri(uri)
        .method("POST")
        .header("Content-Type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn body_json(response: axum::response::Response) -> JsonValue {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let app = create_test_app(MockDatabase::new(DatabaseBackend::Postgres));

    let response = app
        .router
        .oneshot(post("/notifications/unread-count", None, "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_token_is_unauthorized() {
    let app = create_test_app(
        MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user::Model>::new()]),
    );

    let response = app
        .router
        .oneshot(post("/notifications/unread-count", Some("bogus"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_stream_requires_authentication() {
    let app = create_test_app(MockDatabase::new(DatabaseBackend::Postgres));

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/streaming/notifications")
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stream_opens_for_authenticated_user() {
    let app = create_test_app(db_as("alice"));

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/streaming/notifications")
                .method("GET")
                .header("Authorization", "Bearer token-alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().starts_with("text/event-stream"));
}

#[tokio::test]
async fn test_follow_self_is_bad_request() {
    let app = create_test_app(db_as("alice"));

    let response = app
        .router
        .oneshot(post(
            "/following/create",
            Some("token-alice"),
            r#"{"userId":"alice"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_follow_unknown_user_is_bad_request() {
    let app = create_test_app(
        db_as("alice").append_query_results([Vec::<user::Model>::new()]),
    );

    let response = app
        .router
        .oneshot(post(
            "/following/create",
            Some("token-alice"),
            r#"{"userId":"ghost"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_follow_existing_relationship_conflicts() {
    let app = create_test_app(
        db_as("alice")
            .append_query_results([[test_user("bob")]])
            .append_query_results([[relationship("r1", "alice", "bob", FollowStatus::Rejected)]]),
    );

    let response = app
        .router
        .oneshot(post(
            "/following/create",
            Some("token-alice"),
            r#"{"userId":"bob"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn test_follow_creates_pending_and_signals_followee() {
    let app = create_test_app(
        db_as("alice")
            .append_query_results([[test_user("bob")]])
            .append_query_results([Vec::<follow_relationship::Model>::new()])
            .append_query_results([[relationship("r1", "alice", "bob", FollowStatus::Pending)]])
            .append_query_results([[follow_request_notification("n1", "r1")]]),
    );

    let response = app
        .router
        .oneshot(post(
            "/following/create",
            Some("token-alice"),
            r#"{"userId":"bob"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["followeeId"], "bob");

    let signal = app.queue.peek_latest("bob").await.unwrap().unwrap();
    assert_eq!(signal.action, SignalAction::New);
    assert_eq!(signal.notification_id.as_deref(), Some("n1"));
}

#[tokio::test]
async fn test_respond_with_invalid_decision_is_bad_request() {
    let app = create_test_app(db_as("bob"));

    let response = app
        .router
        .oneshot(post(
            "/following/requests/alice/respond",
            Some("token-bob"),
            r#"{"decision":"maybe"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_respond_without_pending_request_is_not_found() {
    let app = create_test_app(
        db_as("bob").append_query_results([Vec::<follow_relationship::Model>::new()]),
    );

    let response = app
        .router
        .oneshot(post(
            "/following/requests/alice/respond",
            Some("token-bob"),
            r#"{"decision":"accept"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn test_reject_signals_follower_with_removed_request() {
    let app = create_test_app(
        db_as("bob")
            .append_query_results([[relationship("r1", "alice", "bob", FollowStatus::Pending)]])
            .append_query_results([[follow_request_notification("n1", "r1")]])
            .append_query_results([[relationship("r1", "alice", "bob", FollowStatus::Rejected)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }]),
    );

    let response = app
        .router
        .oneshot(post(
            "/following/requests/alice/respond",
            Some("token-bob"),
            r#"{"decision":"reject"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "rejected");

    let signal = app.queue.peek_latest("alice").await.unwrap().unwrap();
    assert_eq!(signal.action, SignalAction::Update);
    assert_eq!(signal.notification_id.as_deref(), Some("n1"));
}

#[tokio::test]
async fn test_mark_as_read_rejects_non_array() {
    let app = create_test_app(db_as("bob"));

    let response = app
        .router
        .oneshot(post(
            "/notifications/mark-as-read",
            Some("token-bob"),
            r#"{"notificationIds":"n1"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_mark_as_read_signals_update() {
    let app = create_test_app(db_as("bob").append_exec_results([MockExecResult {
        last_insert_id: 0,
        rows_affected: 2,
    }]));

    let response = app
        .router
        .oneshot(post(
            "/notifications/mark-as-read",
            Some("token-bob"),
            r#"{"notificationIds":["n1","n2"]}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["updated"], 2);

    let signal = app.queue.peek_latest("bob").await.unwrap().unwrap();
    assert_eq!(signal.action, SignalAction::Update);
    assert!(signal.notification_id.is_none());
}

#[tokio::test]
async fn test_delete_without_id_is_bad_request() {
    let app = create_test_app(db_as("bob"));

    let response = app
        .router
        .oneshot(post("/notifications/delete", Some("token-bob"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_missing_notification_is_silent() {
    let app = create_test_app(db_as("bob").append_exec_results([MockExecResult {
        last_insert_id: 0,
        rows_affected: 0,
    }]));

    let response = app
        .router
        .oneshot(post(
            "/notifications/delete",
            Some("token-bob"),
            r#"{"notificationId":"gone"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"data": {"ok": true}}));
    assert!(app.queue.is_empty().await);
}

#[tokio::test]
async fn test_unread_count() {
    let app = create_test_app(db_as("bob").append_query_results([[btreemap! {
        "num_items" => Value::BigInt(Some(3)),
    }]]));

    let response = app
        .router
        .oneshot(post("/notifications/unread-count", Some("token-bob"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["unreadCount"], 3);
}

#[tokio::test]
async fn test_list_notifications_includes_request_status() {
    let app = create_test_app(
        db_as("bob")
            .append_query_results([[follow_request_notification("n1", "r1")]])
            .append_query_results([[test_user("alice")]])
            .append_query_results([[relationship("r1", "alice", "bob", FollowStatus::Pending)]])
            .append_query_results([[btreemap! {
                "num_items" => Value::BigInt(Some(1)),
            }]]),
    );

    let response = app
        .router
        .oneshot(post("/notifications", Some("token-bob"), "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let first = &body["data"]["notifications"][0];
    assert_eq!(first["type"], "follow_request");
    assert_eq!(first["followStatus"], "pending");
    assert_eq!(first["notifier"]["username"], "alice");
    assert_eq!(body["data"]["unreadCount"], 1);
}

#[tokio::test]
async fn test_list_notifications_accepts_empty_body() {
    let app = create_test_app(
        db_as("bob")
            .append_query_results([Vec::<notification::Model>::new()])
            .append_query_results([[btreemap! {
                "num_items" => Value::BigInt(Some(0)),
            }]]),
    );

    let response = app
        .router
        .oneshot(post("/notifications", Some("token-bob"), ""))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["notifications"], json!([]));
    assert_eq!(body["data"]["unreadCount"], 0);
}

#[tokio::test]
async fn test_otp_issue_then_verify() {
    let app = create_test_app(
        db_as("alice").append_query_results([[test_user("alice")]]),
    );

    let response = app
        .router
        .clone()
        .oneshot(post("/auth/otp/issue", Some("token-alice"), "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let code = body_json(response).await["data"]["code"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .router
        .oneshot(post(
            "/auth/otp/verify",
            Some("token-alice"),
            &json!({ "code": code }).to_string(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["valid"], true);
}
