//! Axum access middleware that gates requests on role checks.
//!
//! An upstream authentication layer inserts an [`AuthIdentity`] into the
//! request extensions. [`AccessLayer`] runs its gates against it in order and
//! stops at the first one that does not pass.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{error, warn};

use super::engine::AuthzEngine;
use super::expression::RoleExpression;
use super::models::{AuthIdentity, DomainId, UserId};
use crate::db::storage::Storage;
use crate::error::{ErrorKind, Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Gates
// ═══════════════════════════════════════════════════════════════════════════════

/// One condition a request must satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// The user holds this role.
    Role(String),
    /// The user's roles satisfy the expression.
    Expression(RoleExpression, Vec<String>),
}

impl Gate {
    pub fn role(value: impl Into<String>) -> Self {
        Self::Role(value.into())
    }

    pub fn expression<I, R>(expression: RoleExpression, roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::Expression(expression, roles.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role(role) => write!(f, "role {}", role),
            Self::Expression(expression, roles) => {
                write!(f, "{}({})", expression, roles.join(", "))
            }
        }
    }
}

/// Evaluates gates for an identity.
#[async_trait]
pub trait AccessChecker: Send + Sync {
    async fn evaluate(&self, identity: &AuthIdentity, gate: &Gate) -> Result<bool>;
}

#[async_trait]
impl<S: Storage> AccessChecker for AuthzEngine<S> {
    async fn evaluate(&self, identity: &AuthIdentity, gate: &Gate) -> Result<bool> {
        match gate {
            Gate::Role(role) => {
                self.check_role(identity.user_id, identity.domain_id, role)
                    .await
            }
            Gate::Expression(expression, roles) => {
                self.check_role_expression(*expression, identity.user_id, identity.domain_id, roles)
                    .await
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Access Context (extracted in handlers)
// ═══════════════════════════════════════════════════════════════════════════════

/// Identity that passed every gate, inserted for downstream handlers.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub user_id: UserId,
    pub domain_id: DomainId,
    /// Gates this request satisfied, in order.
    pub passed: Vec<Gate>,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AccessContext
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessContext>()
            .cloned()
            .ok_or_else(|| {
                WardenError::internal("access context missing; is the access layer applied?")
                    .into_response()
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// Layer that wraps services with an ordered chain of gates.
///
/// # Example
///
/// ```rust,ignore
/// let layer = AccessLayer::require_expression(
///     engine.clone(),
///     RoleExpression::Or,
///     ["builder_admin", "builder_manager"],
/// );
/// let app = Router::new()
///     .route("/projects", post(create_project))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct AccessLayer {
    checker: Arc<dyn AccessChecker>,
    gates: Arc<Vec<Gate>>,
}

impl AccessLayer {
    /// Gates evaluated in order; the first denial ends the request.
    pub fn chain(checker: Arc<dyn AccessChecker>, gates: Vec<Gate>) -> Self {
        Self {
            checker,
            gates: Arc::new(gates),
        }
    }

    pub fn require_role(checker: Arc<dyn AccessChecker>, role: impl Into<String>) -> Self {
        Self::chain(checker, vec![Gate::role(role)])
    }

    pub fn require_expression<I, R>(
        checker: Arc<dyn AccessChecker>,
        expression: RoleExpression,
        roles: I,
    ) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::chain(checker, vec![Gate::expression(expression, roles)])
    }

    /// Append a gate after the existing ones.
    pub fn then(self, gate: Gate) -> Self {
        let mut gates = (*self.gates).clone();
        gates.push(gate);
        Self::chain(self.checker, gates)
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }
}

impl<S> Layer<S> for AccessLayer {
    type Service = AccessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessService {
            inner,
            checker: self.checker.clone(),
            gates: self.gates.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

/// Service that runs the gate chain before the inner service.
#[derive(Clone)]
pub struct AccessService<S> {
    inner: S,
    checker: Arc<dyn AccessChecker>,
    gates: Arc<Vec<Gate>>,
}

impl<S> Service<Request<Body>> for AccessService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let checker = self.checker.clone();
        let gates = self.gates.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(identity) = request.extensions().get::<AuthIdentity>().copied() else {
                return Ok(
                    WardenError::unauthorized("Authentication required for this resource")
                        .into_response(),
                );
            };

            for gate in gates.iter() {
                match checker.evaluate(&identity, gate).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(
                            user_id = %identity.user_id,
                            domain_id = %identity.domain_id,
                            gate = %gate,
                            "Access denied"
                        );
                        return Ok(WardenError::forbidden(format!("Requires {}", gate))
                            .into_response());
                    }
                    Err(e) => return Ok(failure_response(e, gate)),
                }
            }

            request.extensions_mut().insert(AccessContext {
                user_id: identity.user_id,
                domain_id: identity.domain_id,
                passed: gates.to_vec(),
            });

            inner.call(request).await
        })
    }
}

/// An unavailable dependency is 503; any other failure denies the request.
fn failure_response(e: WardenError, gate: &Gate) -> Response {
    if e.kind() == ErrorKind::Upstream {
        error!(error = %e, gate = %gate, "Access check unavailable");
        let mut response = e.into_response();
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        return response;
    }

    warn!(error = %e, gate = %gate, "Access check failed, denying");
    WardenError::forbidden(format!("Requires {}", gate)).into_response()
}
