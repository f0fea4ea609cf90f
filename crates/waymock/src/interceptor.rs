//! Interceptor facades over the client registry.
//!
//! [`Interceptor`] resolves everything in-process: the capture layer hands it
//! a request and gets back the mocked response, synchronously up to response
//! factories. [`RemoteInterceptor`] additionally commits one route per
//! distinct `(method, path)` pair to a relay and serves the relay's
//! `responses/create` calls for them.

use crate::config::UnhandledRequestPolicy;
use crate::handler::{Handler, HandlerError};
use crate::http::serialized::{SerializedRequest, SerializedResponse};
use crate::http::{HttpRequest, HttpResponse, Method};
use crate::registry::ClientRegistry;
use crate::restriction::MatchError;
use crate::transport::channel::{EndpointError, WorkerConnector, WorkerEndpoint};
use crate::transport::WorkerResponder;
use crate::url::UrlError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// Callback invoked for unhandled requests, alongside the logging policy.
pub type UnhandledRequestCallback = Arc<dyn Fn(&HttpRequest) + Send + Sync>;

/// Apply a matched handler: resolve its declaration, log the exchange, and
/// return the concrete response.
pub(crate) async fn produce_response(
    handler: &Handler,
    request: &HttpRequest,
) -> Result<HttpResponse, HandlerError> {
    let declaration = handler.apply_response_declaration(request).await?;
    let response = declaration.into_response();
    handler.register_intercepted(request.clone(), response.clone());
    Ok(response)
}

fn report_unhandled(
    policy: UnhandledRequestPolicy,
    callback: &Option<UnhandledRequestCallback>,
    request: &HttpRequest,
) {
    if let Some(callback) = callback {
        callback(request);
    }
    match policy {
        UnhandledRequestPolicy::Ignore => {}
        UnhandledRequestPolicy::Warn => {
            warn!(method = %request.method, url = %request.url, "unhandled intercepted request");
        }
        UnhandledRequestPolicy::Error => {
            error!(method = %request.method, url = %request.url, "unhandled intercepted request");
        }
    }
}

/// Local-mode interceptor: declares handlers and resolves intercepted
/// requests entirely in-process.
pub struct Interceptor {
    registry: Arc<ClientRegistry>,
    policy: RwLock<UnhandledRequestPolicy>,
    on_unhandled: RwLock<Option<UnhandledRequestCallback>>,
}

impl Interceptor {
    pub fn new(base_url: &str) -> Result<Self, UrlError> {
        Ok(Self {
            registry: Arc::new(ClientRegistry::new(base_url)?),
            policy: RwLock::new(UnhandledRequestPolicy::Warn),
            on_unhandled: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        self.registry.base_url()
    }

    pub fn set_unhandled_policy(&self, policy: UnhandledRequestPolicy) {
        *self.policy.write() = policy;
    }

    pub fn on_unhandled(&self, callback: impl Fn(&HttpRequest) + Send + Sync + 'static) {
        *self.on_unhandled.write() = Some(Arc::new(callback));
    }

    pub fn get(&self, path: &str) -> Result<Arc<Handler>, UrlError> {
        self.register(Method::Get, path)
    }

    pub fn post(&self, path: &str) -> Result<Arc<Handler>, UrlError> {
        self.register(Method::Post, path)
    }

    pub fn patch(&self, path: &str) -> Result<Arc<Handler>, UrlError> {
        self.register(Method::Patch, path)
    }

    pub fn put(&self, path: &str) -> Result<Arc<Handler>, UrlError> {
        self.register(Method::Put, path)
    }

    pub fn delete(&self, path: &str) -> Result<Arc<Handler>, UrlError> {
        self.register(Method::Delete, path)
    }

    pub fn head(&self, path: &str) -> Result<Arc<Handler>, UrlError> {
        self.register(Method::Head, path)
    }

    pub fn options(&self, path: &str) -> Result<Arc<Handler>, UrlError> {
        self.register(Method::Options, path)
    }

    fn register(&self, method: Method, path: &str) -> Result<Arc<Handler>, UrlError> {
        Ok(self.registry.register(method, path)?.handler)
    }

    /// Resolve an intercepted request. `Ok(None)` means no active handler
    /// accepted it; the configured unhandled-request policy has already been
    /// applied and the caller decides what to do with the real request.
    pub async fn handle_request(
        &self,
        request: &HttpRequest,
    ) -> Result<Option<HttpResponse>, InterceptError> {
        match self.registry.resolve(request)? {
            Some(handler) => {
                let response = produce_response(&handler, request).await?;
                Ok(Some(response))
            }
            None => {
                report_unhandled(*self.policy.read(), &self.on_unhandled.read(), request);
                Ok(None)
            }
        }
    }

    /// Clear every handler and empty every bucket.
    pub fn clear(&self) {
        self.registry.clear();
    }
}

/// Worker-side state of a remote interceptor, shared with the task serving
/// `responses/create` calls.
struct RemoteCore {
    registry: Arc<ClientRegistry>,
}

#[async_trait]
impl WorkerResponder for RemoteCore {
    async fn create_response(
        &self,
        handler_id: &str,
        request: SerializedRequest,
    ) -> Option<SerializedResponse> {
        let Some((method, path)) = self.registry.committed_route(handler_id) else {
            debug!(handler_id, "responses/create for unknown handler id; bypassing");
            return None;
        };

        let request = match request.into_request() {
            Ok(request) => request,
            Err(source) => {
                error!(handler_id, error = %source, "failed to decode serialized request");
                return None;
            }
        };

        let handler = match self.registry.find_match(method, &path, &request) {
            Ok(Some(handler)) => handler,
            Ok(None) => {
                debug!(handler_id, %method, path, "no local handler matched; bypassing");
                return None;
            }
            Err(source) => {
                // A broken predicate must stay visible even though the relay
                // only understands response-or-bypass.
                error!(handler_id, error = %source, "restriction evaluation failed; bypassing");
                return None;
            }
        };

        match produce_response(&handler, &request).await {
            Ok(response) => Some(SerializedResponse::from_response(&response)),
            Err(source) => {
                error!(handler_id, error = %source, "failed to produce response; bypassing");
                None
            }
        }
    }
}

/// Remote-mode interceptor: shares its routes with a relay over a control
/// channel so multiple workers can answer one stream of real traffic.
pub struct RemoteInterceptor {
    core: Arc<RemoteCore>,
    endpoint: WorkerEndpoint,
}

impl RemoteInterceptor {
    /// Connect a new worker to the relay's control channel.
    pub fn connect(base_url: &str, connector: &WorkerConnector) -> Result<Self, UrlError> {
        let core = Arc::new(RemoteCore {
            registry: Arc::new(ClientRegistry::new(base_url)?),
        });
        let endpoint = connector.connect(Arc::clone(&core) as Arc<dyn WorkerResponder>);
        Ok(Self { core, endpoint })
    }

    pub fn base_url(&self) -> &str {
        self.core.registry.base_url()
    }

    pub async fn get(&self, path: &str) -> Result<Arc<Handler>, RemoteError> {
        self.register(Method::Get, path).await
    }

    pub async fn post(&self, path: &str) -> Result<Arc<Handler>, RemoteError> {
        self.register(Method::Post, path).await
    }

    pub async fn patch(&self, path: &str) -> Result<Arc<Handler>, RemoteError> {
        self.register(Method::Patch, path).await
    }

    pub async fn put(&self, path: &str) -> Result<Arc<Handler>, RemoteError> {
        self.register(Method::Put, path).await
    }

    pub async fn delete(&self, path: &str) -> Result<Arc<Handler>, RemoteError> {
        self.register(Method::Delete, path).await
    }

    pub async fn head(&self, path: &str) -> Result<Arc<Handler>, RemoteError> {
        self.register(Method::Head, path).await
    }

    pub async fn options(&self, path: &str) -> Result<Arc<Handler>, RemoteError> {
        self.register(Method::Options, path).await
    }

    async fn register(&self, method: Method, path: &str) -> Result<Arc<Handler>, RemoteError> {
        let registration = self.core.registry.register(method, path)?;
        if let Some(commit) = registration.commit {
            self.endpoint.commit(commit).await?;
        }
        Ok(registration.handler)
    }

    /// Clear every handler and invalidate all of this worker's commits with
    /// one relay reset.
    pub async fn clear(&self) -> Result<(), RemoteError> {
        self.core.registry.clear();
        self.endpoint.reset(None).await?;
        Ok(())
    }

    /// Re-apply this worker's current commits in one reset. Used after a
    /// relay restart, so stale and fresh entries never coexist.
    pub async fn resync(&self) -> Result<(), RemoteError> {
        let commits = self.core.registry.commits();
        self.endpoint.reset(Some(commits)).await?;
        Ok(())
    }

    /// Close this worker's connection; the relay drops all of its routes.
    pub fn disconnect(&self) {
        self.endpoint.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::ResponseDeclaration;
    use crate::restriction::StaticRestriction;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn interceptor() -> Interceptor {
        Interceptor::new("http://localhost:3000").unwrap()
    }

    #[tokio::test]
    async fn test_handle_request_resolves_and_logs() {
        let interceptor = interceptor();
        let handler = interceptor.get("/users/:id").unwrap();
        handler.respond(ResponseDeclaration::new(200).with_body(json!({"id": 42})));

        let request = HttpRequest::new(Method::Get, "http://localhost:3000/users/42");
        let response = interceptor
            .handle_request(&request)
            .await
            .unwrap()
            .expect("handler must answer");
        assert_eq!(response.status, 200);

        let log = handler.requests();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].request.url, request.url);
        assert_eq!(log[0].response.status, 200);
    }

    #[tokio::test]
    async fn test_unhandled_request_invokes_callback() {
        let interceptor = interceptor();
        interceptor.set_unhandled_policy(UnhandledRequestPolicy::Ignore);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        interceptor.on_unhandled(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let request = HttpRequest::new(Method::Get, "http://localhost:3000/missing");
        let response = interceptor.handle_request(&request).await.unwrap();
        assert!(response.is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_newer_handler_wins_on_shared_pair() {
        let interceptor = interceptor();
        let older = interceptor.get("/users").unwrap();
        let newer = interceptor.get("/users").unwrap();

        older.respond(ResponseDeclaration::new(200));
        newer
            .with(StaticRestriction::new().with_search_param("role", "admin"))
            .respond(ResponseDeclaration::new(201));

        let admin = HttpRequest::new(Method::Get, "http://localhost:3000/users?role=admin");
        assert_eq!(
            interceptor.handle_request(&admin).await.unwrap().unwrap().status,
            201
        );

        let guest = HttpRequest::new(Method::Get, "http://localhost:3000/users?role=guest");
        assert_eq!(
            interceptor.handle_request(&guest).await.unwrap().unwrap().status,
            200
        );
    }

    #[tokio::test]
    async fn test_clear_forgets_previous_log() {
        let interceptor = interceptor();
        let handler = interceptor.get("/users").unwrap();
        handler.respond(ResponseDeclaration::new(200));

        let request = HttpRequest::new(Method::Get, "http://localhost:3000/users");
        interceptor.handle_request(&request).await.unwrap();
        assert_eq!(handler.requests().len(), 1);

        interceptor.clear();
        assert!(handler.requests().is_empty());
        assert!(interceptor.handle_request(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_predicate_error_propagates_out_of_handle_request() {
        let interceptor = interceptor();
        interceptor.set_unhandled_policy(UnhandledRequestPolicy::Ignore);
        let handler = interceptor.get("/users").unwrap();
        handler
            .with(crate::restriction::Restriction::computed_fallible(|_| {
                Err(anyhow::anyhow!("broken predicate"))
            }))
            .respond(ResponseDeclaration::new(200));

        let request = HttpRequest::new(Method::Get, "http://localhost:3000/users");
        let error = interceptor.handle_request(&request).await.unwrap_err();
        assert!(matches!(error, InterceptError::Match(_)));
    }
}
