//! Per-interceptor handler registry.
//!
//! Handlers are grouped by method and declared path, insertion-ordered.
//! Resolution scans a bucket tail-to-head so the most recently declared
//! handler that still accepts a request wins; an older handler stays
//! eligible for requests a newer one rejects.
//!
//! The registry also owns the commit-once bookkeeping for remote mode: the
//! first registration for a `(method, path)` pair yields the commit to send
//! to the relay, and later handlers for the same pair are resolved purely
//! locally.

use crate::handler::Handler;
use crate::http::{HttpRequest, Method, HTTP_METHODS};
use crate::restriction::MatchError;
use crate::transport::HandlerCommit;
use crate::url::{join_url, normalize_match_url, validated_base_url, UrlError, UrlPattern};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct Bucket {
    /// Pattern compiled from the normalized full URL, used to resolve whole
    /// requests in local mode.
    pattern: UrlPattern,
    /// Full URL as committed to the relay.
    commit_url: String,
    /// Handler id carried by the commit for this pair.
    lead_id: String,
    handlers: Vec<Arc<Handler>>,
}

#[derive(Default)]
struct PathBuckets {
    /// Declared paths in registration order.
    order: Vec<String>,
    by_path: HashMap<String, Bucket>,
}

/// Result of registering a handler. `commit` is present only for the first
/// handler of its `(method, path)` pair.
pub struct Registration {
    pub handler: Arc<Handler>,
    pub commit: Option<HandlerCommit>,
}

/// Mapping `method -> path -> ordered handlers` for one interceptor.
pub struct ClientRegistry {
    base_url: String,
    methods: RwLock<[PathBuckets; HTTP_METHODS.len()]>,
}

impl ClientRegistry {
    pub fn new(base_url: &str) -> Result<Self, UrlError> {
        Ok(Self {
            base_url: validated_base_url(base_url)?,
            methods: RwLock::new(std::array::from_fn(|_| PathBuckets::default())),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create a handler for `(method, path)` and append it to the tail of
    /// its bucket. Path parameters are validated eagerly.
    pub fn register(&self, method: Method, path: &str) -> Result<Registration, UrlError> {
        let full_url = join_url(&self.base_url, path);
        let handler = Arc::new(Handler::new(method, path));

        let mut methods = self.methods.write();
        let buckets = &mut methods[method.index()];

        if let Some(bucket) = buckets.by_path.get_mut(path) {
            bucket.handlers.push(Arc::clone(&handler));
            return Ok(Registration {
                handler,
                commit: None,
            });
        }

        // First handler for this pair: validate and compile its pattern now,
        // and surface the one commit to send to the relay.
        let pattern = UrlPattern::compile(&normalize_match_url(&full_url)?)?;
        let commit = HandlerCommit {
            handler_id: handler.id().to_string(),
            url: full_url.clone(),
            method,
        };

        buckets.order.push(path.to_string());
        buckets.by_path.insert(
            path.to_string(),
            Bucket {
                pattern,
                commit_url: full_url,
                lead_id: handler.id().to_string(),
                handlers: vec![Arc::clone(&handler)],
            },
        );

        Ok(Registration {
            handler,
            commit: Some(commit),
        })
    }

    /// Find the handler answering `request` within the bucket for
    /// `(method, path)`: the most recently declared active handler whose
    /// restrictions accept it. Predicate errors abort the scan.
    pub fn find_match(
        &self,
        method: Method,
        path: &str,
        request: &HttpRequest,
    ) -> Result<Option<Arc<Handler>>, MatchError> {
        // Snapshot before evaluating: computed restrictions run test code.
        let handlers = {
            let methods = self.methods.read();
            match methods[method.index()].by_path.get(path) {
                Some(bucket) => bucket.handlers.clone(),
                None => return Ok(None),
            }
        };

        for handler in handlers.iter().rev() {
            if handler.matches_request(request)? {
                return Ok(Some(Arc::clone(handler)));
            }
        }
        Ok(None)
    }

    /// Resolve a whole request in local mode: scan this method's declared
    /// path patterns newest-first against the normalized URL, then match
    /// within each bucket. A bucket whose handlers all decline does not stop
    /// the scan.
    pub fn resolve(&self, request: &HttpRequest) -> Result<Option<Arc<Handler>>, MatchError> {
        let Ok(normalized) = normalize_match_url(&request.url) else {
            return Ok(None);
        };

        let candidates: Vec<(String, UrlPattern)> = {
            let methods = self.methods.read();
            let buckets = &methods[request.method.index()];
            buckets
                .order
                .iter()
                .rev()
                .filter_map(|path| {
                    buckets
                        .by_path
                        .get(path)
                        .map(|bucket| (path.clone(), bucket.pattern.clone()))
                })
                .collect()
        };

        for (path, pattern) in candidates {
            if !pattern.is_match(&normalized) {
                continue;
            }
            if let Some(handler) = self.find_match(request.method, &path, request)? {
                return Ok(Some(handler));
            }
        }
        Ok(None)
    }

    /// Declared path for the committed handler id, if it is one of ours.
    pub fn committed_route(&self, handler_id: &str) -> Option<(Method, String)> {
        let methods = self.methods.read();
        for method in HTTP_METHODS {
            let buckets = &methods[method.index()];
            for (path, bucket) in &buckets.by_path {
                if bucket.lead_id == handler_id {
                    return Some((method, path.clone()));
                }
            }
        }
        None
    }

    /// Current commits, one per `(method, path)` pair, in registration order
    /// per method. Used to resynchronize a relay after it restarts.
    pub fn commits(&self) -> Vec<HandlerCommit> {
        let methods = self.methods.read();
        let mut commits = Vec::new();
        for method in HTTP_METHODS {
            let buckets = &methods[method.index()];
            for path in &buckets.order {
                if let Some(bucket) = buckets.by_path.get(path) {
                    commits.push(HandlerCommit {
                        handler_id: bucket.lead_id.clone(),
                        url: bucket.commit_url.clone(),
                        method,
                    });
                }
            }
        }
        commits
    }

    /// Clear every handler and empty every bucket.
    pub fn clear(&self) {
        let mut methods = self.methods.write();
        for buckets in methods.iter() {
            for bucket in buckets.by_path.values() {
                for handler in &bucket.handlers {
                    handler.clear();
                }
            }
        }
        *methods = std::array::from_fn(|_| PathBuckets::default());
    }
}
