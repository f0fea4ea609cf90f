//! Committed route groups, one ordered list per method.
//!
//! Entries reflect commit arrival order and are scanned in reverse so the
//! most recently committed matching route wins. Each method gets its own
//! lock; registration and matching never contend across methods.

use crate::http::{Method, HTTP_METHODS};
use crate::transport::{ConnectionId, HandlerCommit};
use crate::url::{normalize_match_url, UrlError, UrlPattern};
use parking_lot::RwLock;

/// One committed `(handler, URL pattern)` under an owning connection.
#[derive(Debug, Clone)]
pub(crate) struct RouteEntry {
    pub handler_id: String,
    pub pattern: UrlPattern,
    pub connection: ConnectionId,
}

pub(crate) struct RouteTable {
    groups: [RwLock<Vec<RouteEntry>>; HTTP_METHODS.len()],
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            groups: std::array::from_fn(|_| RwLock::new(Vec::new())),
        }
    }

    fn compile(connection: ConnectionId, commit: &HandlerCommit) -> Result<RouteEntry, UrlError> {
        let normalized = normalize_match_url(&commit.url)?;
        Ok(RouteEntry {
            handler_id: commit.handler_id.clone(),
            pattern: UrlPattern::compile(&normalized)?,
            connection,
        })
    }

    /// Append one route under the sending connection. Invalid URLs and
    /// duplicate path parameters are rejected here, at registration time.
    pub fn commit(&self, connection: ConnectionId, commit: &HandlerCommit) -> Result<(), UrlError> {
        let entry = Self::compile(connection, commit)?;
        self.groups[commit.method.index()].write().push(entry);
        Ok(())
    }

    /// Replace all of `connection`'s routes with the supplied list. Each
    /// method group swaps under a single write guard, so stale and fresh
    /// entries never coexist.
    pub fn reset(
        &self,
        connection: ConnectionId,
        commits: &[HandlerCommit],
    ) -> Result<(), UrlError> {
        // Compile everything up front; a bad commit must not leave the
        // connection half-reset.
        let mut fresh: [Vec<RouteEntry>; HTTP_METHODS.len()] = std::array::from_fn(|_| Vec::new());
        for commit in commits {
            fresh[commit.method.index()].push(Self::compile(connection, commit)?);
        }

        for (group, entries) in self.groups.iter().zip(fresh) {
            let mut group = group.write();
            group.retain(|entry| entry.connection != connection);
            group.extend(entries);
        }
        Ok(())
    }

    /// Drop every route owned by a closed connection.
    pub fn remove_connection(&self, connection: ConnectionId) {
        for group in &self.groups {
            group.write().retain(|entry| entry.connection != connection);
        }
    }

    /// Clone the group for a method so matching can proceed without holding
    /// its lock across remote calls.
    pub fn snapshot(&self, method: Method) -> Vec<RouteEntry> {
        self.groups[method.index()].read().clone()
    }

    #[cfg(test)]
    pub fn len(&self, method: Method) -> usize {
        self.groups[method.index()].read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(handler_id: &str, url: &str, method: Method) -> HandlerCommit {
        HandlerCommit {
            handler_id: handler_id.to_string(),
            url: url.to_string(),
            method,
        }
    }

    #[test]
    fn test_commits_keep_arrival_order() {
        let table = RouteTable::new();
        let conn = ConnectionId(1);

        table
            .commit(conn, &commit("h1", "http://x/users", Method::Get))
            .unwrap();
        table
            .commit(conn, &commit("h2", "http://x/users/:id", Method::Get))
            .unwrap();

        let snapshot = table.snapshot(Method::Get);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].handler_id, "h1");
        assert_eq!(snapshot[1].handler_id, "h2");
    }

    #[test]
    fn test_commit_rejects_duplicate_path_params() {
        let table = RouteTable::new();
        let result = table.commit(
            ConnectionId(1),
            &commit("h1", "http://x/users/:id/pets/:id", Method::Get),
        );
        assert!(matches!(result, Err(UrlError::DuplicatePathParam { .. })));
        assert_eq!(table.len(Method::Get), 0);
    }

    #[test]
    fn test_reset_replaces_only_that_connection() {
        let table = RouteTable::new();
        let first = ConnectionId(1);
        let second = ConnectionId(2);

        table
            .commit(first, &commit("h1", "http://x/users", Method::Get))
            .unwrap();
        table
            .commit(second, &commit("h2", "http://x/items", Method::Get))
            .unwrap();

        table
            .reset(first, &[commit("h3", "http://x/orders", Method::Get)])
            .unwrap();

        let snapshot = table.snapshot(Method::Get);
        let ids: Vec<&str> = snapshot
            .iter()
            .map(|entry| entry.handler_id.as_str())
            .collect();
        assert_eq!(ids, vec!["h2", "h3"]);
    }

    #[test]
    fn test_reset_with_bad_commit_changes_nothing() {
        let table = RouteTable::new();
        let conn = ConnectionId(1);
        table
            .commit(conn, &commit("h1", "http://x/users", Method::Get))
            .unwrap();

        let result = table.reset(
            conn,
            &[
                commit("h2", "http://x/items", Method::Get),
                commit("h3", "http://x/:a/:a", Method::Get),
            ],
        );
        assert!(result.is_err());
        assert_eq!(table.snapshot(Method::Get)[0].handler_id, "h1");
    }

    #[test]
    fn test_remove_connection_drops_all_methods() {
        let table = RouteTable::new();
        let conn = ConnectionId(1);
        table
            .commit(conn, &commit("h1", "http://x/users", Method::Get))
            .unwrap();
        table
            .commit(conn, &commit("h2", "http://x/users", Method::Post))
            .unwrap();
        table
            .commit(ConnectionId(2), &commit("h3", "http://x/users", Method::Get))
            .unwrap();

        table.remove_connection(conn);

        assert_eq!(table.len(Method::Get), 1);
        assert_eq!(table.len(Method::Post), 0);
        assert_eq!(table.snapshot(Method::Get)[0].handler_id, "h3");
    }
}
