//! Integration tests for enforcement and the resource catalog.
//!
//! Tests cover:
//! - Direct and membership-derived access
//! - Role checks and role expressions
//! - Resource catalog lookups and hierarchy rules
//! - Grant idempotence
//! - Denial of everything not granted

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use uuid::Uuid;
use warden_core::config::PolicyConfig;
use warden_core::db::{MemoryStorage, Storage, StorageTx};
use warden_core::error::{ErrorCode, ErrorKind, NotFoundKind};
use warden_core::rbac::{
    Action, AuthzEngine, CasbinPolicyStore, CompoundSubject, Domain, DomainId, Grant, GrantField,
    Membership, NewResource, PolicyStore, Role, RoleExpression, RoleId, RoleSubject, Selector,
    Subject, User, UserId,
};

fn user(id: i64) -> Subject {
    Subject::User(UserId(id))
}

fn new_resource(type_value: &str, uuid: &str, parent: Option<&str>) -> NewResource {
    NewResource {
        type_value: type_value.to_string(),
        uuid: uuid.to_string(),
        description: "desc".to_string(),
        parent_uuid: parent.map(str::to_string),
    }
}

/// Catalog with domain 1, roles 7 (builder_admin) and 8 (builder_manager),
/// users 42 and 43, and company C1.
async fn fixture() -> (Arc<MemoryStorage>, Arc<CasbinPolicyStore>, AuthzEngine<MemoryStorage>) {
    let storage = MemoryStorage::default();
    storage.insert_domain(Domain {
        id: DomainId(1),
        value: "default".to_string(),
    });
    storage.insert_role(Role {
        id: RoleId(7),
        uuid: Uuid::new_v4(),
        value: "builder_admin".to_string(),
    });
    storage.insert_role(Role {
        id: RoleId(8),
        uuid: Uuid::new_v4(),
        value: "builder_manager".to_string(),
    });
    for (id, email) in [(42, "u42@example.com"), (43, "u43@example.com")] {
        storage.insert_user(User {
            id: UserId(id),
            uuid: Uuid::new_v4(),
            email: email.to_string(),
        });
    }
    for value in ["company", "project", "worker", "user"] {
        storage.seed_resource_type(value).await.unwrap();
    }

    let mut tx = storage.begin().await.unwrap();
    tx.add_resource(&new_resource("company", "C1", None)).await.unwrap();
    tx.commit().await.unwrap();

    let storage = Arc::new(storage);
    let policy = Arc::new(CasbinPolicyStore::in_memory().await.unwrap());
    let engine = AuthzEngine::new(storage.clone(), policy.clone());
    (storage, policy, engine)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_direct_grant_scenario() {
    let (_, policy, engine) = fixture().await;

    policy
        .add_policies(&[Grant::new(user(42), DomainId(1), "C1", Action::Modify)])
        .await
        .unwrap();

    assert!(engine.check_access(UserId(42), DomainId(1), "C1", Action::Modify).await.unwrap());
    assert!(!engine.check_access(UserId(43), DomainId(1), "C1", Action::Modify).await.unwrap());
}

#[tokio::test]
async fn test_membership_grant_scenario() {
    let (_, policy, engine) = fixture().await;
    let scoped = CompoundSubject::new(RoleId(7), "C1").unwrap();
    let membership = Membership::new(user(42), scoped.clone().into(), DomainId(1));

    policy.add_role_for_user_in_domain(&membership).await.unwrap();
    policy
        .add_policies(&[Grant::new(scoped.into(), DomainId(1), "P9", Action::Read)])
        .await
        .unwrap();

    let parsed = Membership::new(user(42), "7::C1".parse().unwrap(), DomainId(1));
    assert!(policy.has_role_for_user(&parsed).await.unwrap());
    assert!(engine.check_access(UserId(42), DomainId(1), "P9", Action::Read).await.unwrap());

    // no direct grant exists
    let direct = policy
        .get_filtered_policy(GrantField::Subject, vec!["42".to_string()])
        .await
        .unwrap();
    assert!(direct.is_empty());
}

#[tokio::test]
async fn test_missing_parent_scenario() {
    let (storage, _, _) = fixture().await;
    let before = storage.resource_count();

    let mut tx = storage.begin().await.unwrap();
    let err = tx
        .add_resource(&new_resource("project", "P1", Some("C1-does-not-exist")))
        .await
        .unwrap_err();
    tx.commit().await.unwrap();

    assert_eq!(err.code(), ErrorCode::ParentNotFound);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(storage.resource_count(), before);
    assert!(storage
        .get_resource(&Selector::uuid("P1"), false)
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Resource Catalog
// ============================================================================

#[tokio::test]
async fn test_resource_lookup_by_id_and_uuid() {
    let (storage, _, _) = fixture().await;

    let by_uuid = storage
        .get_resource(&Selector::uuid("C1"), true)
        .await
        .unwrap()
        .unwrap();
    let by_id = storage
        .get_resource(&Selector::id(by_uuid.id.get()), true)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_uuid, by_id);
    assert!(by_uuid.is_root());

    let err = storage
        .get_resource(&Selector::uuid("nope"), true)
        .await
        .unwrap_err();
    assert_eq!(err.not_found_kind(), Some(NotFoundKind::Resource));
}

#[tokio::test]
async fn test_hierarchy_enforced_on_insert() {
    let (storage, _, _) = fixture().await;
    let mut tx = storage.begin().await.unwrap();

    tx.add_resource(&new_resource("project", "P1", Some("C1"))).await.unwrap();
    tx.add_resource(&new_resource("worker", "W1", Some("P1"))).await.unwrap();

    let err = tx
        .add_resource(&new_resource("project", "P2", Some("P1")))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidHierarchy);

    let err = tx
        .add_resource(&new_resource("gizmo", "G1", None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ResourceTypeNotFound);

    tx.commit().await.unwrap();

    let chain: Vec<String> = storage
        .ancestors("W1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.uuid)
        .collect();
    assert_eq!(chain, vec!["P1".to_string(), "C1".to_string()]);
}

#[tokio::test]
async fn test_duplicate_resource_is_conflict() {
    let (storage, _, _) = fixture().await;
    let mut tx = storage.begin().await.unwrap();
    let err = tx
        .add_resource(&new_resource("company", "C1", None))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateResource);
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

// ============================================================================
// Role checks
// ============================================================================

#[tokio::test]
async fn test_check_role_and_expressions() {
    let (_, policy, engine) = fixture().await;
    policy
        .add_role_for_user_in_domain(&Membership::new(user(42), RoleSubject::Role(RoleId(7)), DomainId(1)))
        .await
        .unwrap();

    let both = ["builder_admin", "builder_manager"];

    assert!(engine.check_role(UserId(42), DomainId(1), "builder_admin").await.unwrap());
    assert!(!engine.check_role(UserId(42), DomainId(1), "builder_manager").await.unwrap());
    assert!(!engine
        .check_role_expression(RoleExpression::And, UserId(42), DomainId(1), &both)
        .await
        .unwrap());
    assert!(engine
        .check_role_expression(RoleExpression::Or, UserId(42), DomainId(1), &both)
        .await
        .unwrap());

    policy
        .add_role_for_user_in_domain(&Membership::new(user(42), RoleSubject::Role(RoleId(8)), DomainId(1)))
        .await
        .unwrap();
    assert!(engine
        .check_role_expression(RoleExpression::And, UserId(42), DomainId(1), &both)
        .await
        .unwrap());

    assert!(!engine
        .check_role_expression(RoleExpression::Or, UserId(43), DomainId(1), &both)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_unknown_expression_is_invalid_input() {
    let (_, _, engine) = fixture().await;
    let err = engine
        .check_role_expression_str("XOR", UserId(42), DomainId(1), &["builder_admin"])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnknownRoleExpression);
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    assert!(!engine
        .check_role_expression_str("or", UserId(42), DomainId(1), &["builder_admin"])
        .await
        .unwrap());
}

#[tokio::test]
async fn test_expression_with_unknown_role_fails() {
    let (_, _, engine) = fixture().await;
    let err = engine
        .check_role_expression(RoleExpression::Or, UserId(42), DomainId(1), &["builder_admin", "ghost"])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::RoleNotFound);
}

#[tokio::test]
async fn test_role_check_sees_write_from_another_store_after_reload() {
    let (storage, policy, _) = fixture().await;
    let backend = policy.backend().clone();
    let other = Arc::new(CasbinPolicyStore::new(backend).await.unwrap());
    let engine = AuthzEngine::new(storage, other);

    policy
        .add_role_for_user_in_domain(&Membership::new(user(43), RoleSubject::Role(RoleId(8)), DomainId(1)))
        .await
        .unwrap();

    // role checks serve the cache until told to reload
    assert!(!engine.check_role(UserId(43), DomainId(1), "builder_manager").await.unwrap());
    engine.reload_policies().await.unwrap();
    assert!(engine.check_role(UserId(43), DomainId(1), "builder_manager").await.unwrap());
}

#[tokio::test]
async fn test_stale_cache_reloads_on_role_check() {
    let (storage, policy, _) = fixture().await;
    let backend = policy.backend().clone();
    let other = Arc::new(CasbinPolicyStore::new(backend).await.unwrap());
    let config = PolicyConfig {
        max_staleness: Some(Duration::ZERO),
    };
    let engine = AuthzEngine::with_config(storage, other, &config);

    policy
        .add_role_for_user_in_domain(&Membership::new(user(43), RoleSubject::Role(RoleId(8)), DomainId(1)))
        .await
        .unwrap();

    assert!(engine.check_role(UserId(43), DomainId(1), "builder_manager").await.unwrap());
    assert!(engine
        .check_role_expression(RoleExpression::Or, UserId(43), DomainId(1), &["builder_admin", "builder_manager"])
        .await
        .unwrap());
}

// ============================================================================
// Idempotence and denial
// ============================================================================

#[tokio::test]
async fn test_add_policies_twice_matches_once() {
    let (_, policy, engine) = fixture().await;
    let grants = Grant::for_actions(&user(42), DomainId(1), "C1", &Action::creator_rights());

    policy.add_policies(&grants).await.unwrap();
    let once = policy
        .get_filtered_policy(GrantField::Resource, vec!["C1".to_string()])
        .await
        .unwrap();

    let added = policy.add_policies(&grants).await.unwrap();
    let twice = policy
        .get_filtered_policy(GrantField::Resource, vec!["C1".to_string()])
        .await
        .unwrap();

    assert!(added.is_empty());
    assert_eq!(once.len(), twice.len());
    for action in Action::creator_rights() {
        assert!(engine.check_access(UserId(42), DomainId(1), "C1", action).await.unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_ungranted_access_is_denied(
        user_id in 40i64..46,
        domain in 1i64..3,
        resource in prop::sample::select(vec!["C1", "P1", "P9"]),
        action in prop::sample::select(Action::all().to_vec()),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let allowed = runtime.block_on(async {
            let (_, policy, engine) = fixture().await;
            let scoped = CompoundSubject::new(RoleId(7), "C1").unwrap();
            policy
                .add_policies(&[
                    Grant::new(user(42), DomainId(1), "C1", Action::Modify),
                    Grant::new(scoped.clone().into(), DomainId(1), "P9", Action::Read),
                ])
                .await
                .unwrap();
            policy
                .add_role_for_user_in_domain(&Membership::new(user(43), scoped.into(), DomainId(1)))
                .await
                .unwrap();
            engine
                .check_access(UserId(user_id), DomainId(domain), resource, action)
                .await
                .unwrap()
        });

        let covered = domain == 1
            && ((user_id == 42 && resource == "C1" && action == Action::Modify)
                || (user_id == 43 && resource == "P9" && action == Action::Read));
        prop_assert_eq!(allowed, covered);
    }
}
