//! Request handlers: one declared mock rule each.
//!
//! A handler is created for a `(method, path)` pair in the unconfigured
//! state. Declaring a response makes it active; only active handlers match
//! requests. `bypass()` forgets the response but keeps restrictions and the
//! intercepted log, `clear()` resets everything back to unconfigured.

use crate::http::{HttpRequest, HttpResponse, Method, ResponseDeclaration};
use crate::restriction::{MatchError, Restriction};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

/// Builds a response declaration from the intercepted request, possibly
/// asynchronously.
pub type ResponseFactory = Arc<
    dyn Fn(HttpRequest) -> BoxFuture<'static, Result<ResponseDeclaration, anyhow::Error>>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum ResponseDefinition {
    Declared(ResponseDeclaration),
    Factory(ResponseFactory),
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// A response was requested before one was declared. Programmer error;
    /// raised loudly, never swallowed.
    #[error("no response definition declared for handler {id} ({method} {path})")]
    NoResponseDefinition {
        id: String,
        method: Method,
        path: String,
    },
    #[error("response factory failed")]
    Factory(#[source] anyhow::Error),
}

/// One intercepted request and the response returned for it.
#[derive(Debug, Clone)]
pub struct InterceptedExchange {
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub received_at: DateTime<Utc>,
}

#[derive(Default)]
struct HandlerState {
    restrictions: Vec<Restriction>,
    response: Option<ResponseDefinition>,
    intercepted: Vec<InterceptedExchange>,
}

/// A single declared mock rule: restrictions, a response, and a log of
/// intercepted request/response pairs. Shared as `Arc<Handler>`; all methods
/// take `&self`.
pub struct Handler {
    id: String,
    method: Method,
    path: String,
    state: RwLock<HandlerState>,
}

impl Handler {
    pub(crate) fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            path: path.into(),
            state: RwLock::new(HandlerState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Add a restriction. Restrictions accumulate and AND together.
    pub fn with(&self, restriction: impl Into<Restriction>) -> &Self {
        self.state.write().restrictions.push(restriction.into());
        self
    }

    /// Declare a concrete response, activating the handler.
    pub fn respond(&self, declaration: ResponseDeclaration) -> &Self {
        self.state.write().response = Some(ResponseDefinition::Declared(declaration));
        self
    }

    /// Declare a synchronous response factory, activating the handler.
    pub fn respond_with<F>(&self, factory: F) -> &Self
    where
        F: Fn(&HttpRequest) -> ResponseDeclaration + Send + Sync + 'static,
    {
        let factory: ResponseFactory =
            Arc::new(move |request| Box::pin(std::future::ready(Ok(factory(&request)))));
        self.state.write().response = Some(ResponseDefinition::Factory(factory));
        self
    }

    /// Declare an asynchronous response factory, activating the handler.
    pub fn respond_with_async<F, Fut>(&self, factory: F) -> &Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<ResponseDeclaration, anyhow::Error>>
            + Send
            + 'static,
    {
        let factory: ResponseFactory = Arc::new(move |request| Box::pin(factory(request)));
        self.state.write().response = Some(ResponseDefinition::Factory(factory));
        self
    }

    /// Forget the declared response without touching restrictions or the
    /// intercepted log. The handler stops matching until a new response is
    /// declared.
    pub fn bypass(&self) -> &Self {
        self.state.write().response = None;
        self
    }

    /// Reset to the unconfigured state: response, restrictions, and the
    /// intercepted log are all wiped.
    pub fn clear(&self) -> &Self {
        let mut state = self.state.write();
        state.response = None;
        state.restrictions.clear();
        state.intercepted.clear();
        self
    }

    /// True once a response has been declared and not bypassed or cleared.
    pub fn is_active(&self) -> bool {
        self.state.read().response.is_some()
    }

    /// Whether this handler answers the request: it must be active and every
    /// restriction must accept. Predicate errors propagate.
    pub fn matches_request(&self, request: &HttpRequest) -> Result<bool, MatchError> {
        // Snapshot under the lock, evaluate outside it: computed predicates
        // run arbitrary test code.
        let restrictions = {
            let state = self.state.read();
            if state.response.is_none() {
                return Ok(false);
            }
            state.restrictions.clone()
        };

        for restriction in &restrictions {
            if !restriction.matches(request)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resolve the declared response for a request, invoking and awaiting the
    /// factory if one was declared.
    pub async fn apply_response_declaration(
        &self,
        request: &HttpRequest,
    ) -> Result<ResponseDeclaration, HandlerError> {
        let definition = self.state.read().response.clone();
        match definition {
            None => Err(HandlerError::NoResponseDefinition {
                id: self.id.clone(),
                method: self.method,
                path: self.path.clone(),
            }),
            Some(ResponseDefinition::Declared(declaration)) => Ok(declaration),
            Some(ResponseDefinition::Factory(factory)) => factory(request.clone())
                .await
                .map_err(HandlerError::Factory),
        }
    }

    /// Append an exchange to the intercepted log. The log keeps request
    /// arrival order and is only emptied by `clear()`.
    pub fn register_intercepted(&self, request: HttpRequest, response: HttpResponse) {
        self.state.write().intercepted.push(InterceptedExchange {
            request,
            response,
            received_at: Utc::now(),
        });
    }

    /// Read-only snapshot of the intercepted log, in arrival order.
    pub fn requests(&self) -> Vec<InterceptedExchange> {
        self.state.read().intercepted.clone()
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("active", &self.is_active())
            .finish()
    }
}
