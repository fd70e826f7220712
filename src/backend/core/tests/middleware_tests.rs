//! Integration tests for the access middleware.
//!
//! Tests cover:
//! - Missing identity
//! - Single-role and expression gates
//! - Fail-fast gate chains
//! - Error mapping for unavailable and failing checks
//! - The `AccessContext` extractor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;
use warden_core::db::MemoryStorage;
use warden_core::error::{Result, WardenError};
use warden_core::rbac::{
    AccessChecker, AccessContext, AccessLayer, AuthIdentity, AuthzEngine, CasbinPolicyStore,
    Domain, DomainId, Gate, Membership, PolicyStore, Role, RoleExpression, RoleId, RoleSubject,
    Subject, UserId,
};

async fn whoami(ctx: AccessContext) -> String {
    format!("{}@{}", ctx.user_id, ctx.domain_id)
}

/// Engine where user 42 holds `admin` (id 1) and nothing else; `auditor` is id 2.
async fn engine() -> Arc<AuthzEngine<MemoryStorage>> {
    let storage = MemoryStorage::default();
    storage.insert_domain(Domain {
        id: DomainId(1),
        value: "default".to_string(),
    });
    for (id, value) in [(1, "admin"), (2, "auditor")] {
        storage.insert_role(Role {
            id: RoleId(id),
            uuid: Uuid::new_v4(),
            value: value.to_string(),
        });
    }

    let policy = CasbinPolicyStore::in_memory().await.unwrap();
    policy
        .add_role_for_user_in_domain(&Membership::new(
            Subject::User(UserId(42)),
            RoleSubject::Role(RoleId(1)),
            DomainId(1),
        ))
        .await
        .unwrap();

    Arc::new(AuthzEngine::new(Arc::new(storage), Arc::new(policy)))
}

fn app(layer: AccessLayer) -> Router {
    Router::new().route("/", get(whoami)).layer(layer)
}

fn request(identity: Option<AuthIdentity>) -> Request<Body> {
    let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
    if let Some(identity) = identity {
        request.extensions_mut().insert(identity);
    }
    request
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ============================================================================
// Gates
// ============================================================================

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let layer = AccessLayer::require_role(engine().await, "admin");
    let response = app(layer).oneshot(request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["kind"], "unauthorized");
}

#[tokio::test]
async fn test_role_gate_allows_holder() {
    let layer = AccessLayer::require_role(engine().await, "admin");
    let response = app(layer)
        .oneshot(request(Some(AuthIdentity::new(UserId(42), DomainId(1)))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"42@1");
}

#[tokio::test]
async fn test_role_gate_denies_other_user() {
    let layer = AccessLayer::require_role(engine().await, "admin");
    let response = app(layer)
        .oneshot(request(Some(AuthIdentity::new(UserId(43), DomainId(1)))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");
    assert_eq!(body["error"]["kind"], "forbidden");
}

#[tokio::test]
async fn test_expression_gates() {
    let engine = engine().await;

    let or = AccessLayer::require_expression(engine.clone(), RoleExpression::Or, ["admin", "auditor"]);
    let response = app(or)
        .oneshot(request(Some(AuthIdentity::new(UserId(42), DomainId(1)))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let and = AccessLayer::require_expression(engine, RoleExpression::And, ["admin", "auditor"]);
    let response = app(and)
        .oneshot(request(Some(AuthIdentity::new(UserId(42), DomainId(1)))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unknown_role_denies() {
    let layer = AccessLayer::require_role(engine().await, "ghost");
    let response = app(layer)
        .oneshot(request(Some(AuthIdentity::new(UserId(42), DomainId(1)))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ============================================================================
// Chains
// ============================================================================

/// Answers from a fixed script and counts evaluations.
struct Scripted {
    answers: Vec<Result<bool>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(answers: Vec<Result<bool>>) -> Arc<Self> {
        Arc::new(Self {
            answers,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AccessChecker for Scripted {
    async fn evaluate(&self, _identity: &AuthIdentity, _gate: &Gate) -> Result<bool> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.answers[call] {
            Ok(answer) => Ok(*answer),
            Err(e) => Err(WardenError::new(e.code(), e.user_message().to_string())),
        }
    }
}

#[tokio::test]
async fn test_chain_stops_at_first_denial() {
    let checker = Scripted::new(vec![Ok(true), Ok(false), Ok(true)]);
    let layer = AccessLayer::chain(
        checker.clone(),
        vec![Gate::role("a"), Gate::role("b"), Gate::role("c")],
    );

    let response = app(layer)
        .oneshot(request(Some(AuthIdentity::new(UserId(1), DomainId(1)))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(checker.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_chain_passes_all_gates() {
    let checker = Scripted::new(vec![Ok(true), Ok(true)]);
    let layer = AccessLayer::require_role(checker.clone(), "a").then(Gate::role("b"));

    let response = app(layer)
        .oneshot(request(Some(AuthIdentity::new(UserId(7), DomainId(3)))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(checker.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unavailable_store_is_service_unavailable() {
    let checker = Scripted::new(vec![Err(WardenError::policy_store("down"))]);
    let layer = AccessLayer::require_role(checker, "a");

    let response = app(layer)
        .oneshot(request(Some(AuthIdentity::new(UserId(1), DomainId(1)))))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "upstream");
}

#[tokio::test]
async fn test_handler_without_layer_cannot_extract_context() {
    let response = Router::new()
        .route("/", get(whoami))
        .oneshot(request(Some(AuthIdentity::new(UserId(1), DomainId(1)))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
