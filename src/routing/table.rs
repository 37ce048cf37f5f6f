use crate::config::ProxyMap;
use crate::error::ProxyError;
use crate::metrics::Telemetry;
use crate::upstream::{Forwarder, HttpClient};

/// One mount point and its backend pool.
pub struct Mount {
    prefix: String,
    pool: Vec<Forwarder>,
}

impl Mount {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn pool(&self) -> &[Forwarder] {
        &self.pool
    }
}

/// The routing table: mount points ordered longest-prefix-first, each
/// paired with its preconstructed forwarders.
///
/// Built from the `proxy_map` configuration value. The table is immutable
/// once installed; reconfiguration builds a fresh table and swaps it in
/// wholesale, so request workers read it without locking.
pub struct RouteTable {
    mounts: Vec<Mount>,
}

impl RouteTable {
    /// Build from a proxy map, constructing one forwarder per backend.
    ///
    /// This is the single validation point for the routing invariants:
    /// mount-point syntax, non-empty pools, and parseable backend URLs.
    /// An invalid map never produces a partially built table.
    pub fn build(
        map: &ProxyMap,
        client: &HttpClient,
        telemetry: &Telemetry,
    ) -> Result<Self, ProxyError> {
        let mut mounts = Vec::with_capacity(map.len());

        for (prefix, backends) in map {
            validate_mount(prefix)?;
            if backends.is_empty() {
                return Err(ProxyError::ConfigInvalid(format!(
                    "mount point {} has an empty backend pool",
                    prefix
                )));
            }

            let mut pool = Vec::with_capacity(backends.len());
            for url in backends {
                pool.push(Forwarder::new(url, client.clone(), telemetry.clone())?);
            }

            mounts.push(Mount {
                prefix: prefix.clone(),
                pool,
            });
        }

        // Longest prefix first, so the first match below wins. Mount
        // points are unique map keys, so ties cannot happen.
        mounts.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        tracing::info!("routing: compiled routing table, mounts={}", mounts.len());

        Ok(Self { mounts })
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    /// Split a request URI into (mount, residual) by longest-prefix match.
    ///
    /// A mount `M` matches path `U` iff `U == M` or `U` starts with `M`
    /// followed by `/`. The residual is `U` with the mount stripped,
    /// normalized to `/` when empty; the query string is carried over
    /// verbatim.
    pub fn split<'a>(&'a self, path_and_query: &str) -> Result<(&'a Mount, String), ProxyError> {
        let (path, query) = match path_and_query.find('?') {
            Some(idx) => path_and_query.split_at(idx),
            None => (path_and_query, ""),
        };

        for mount in &self.mounts {
            if !prefix_matches(&mount.prefix, path) {
                continue;
            }

            let rest = &path[mount.prefix.len()..];
            let mut residual = String::with_capacity(rest.len().max(1) + query.len());
            if rest.is_empty() {
                residual.push('/');
            } else {
                residual.push_str(rest);
            }
            residual.push_str(query);

            return Ok((mount, residual));
        }

        Err(ProxyError::UnknownPath)
    }
}

/// `/bloggo` matches `/bloggo` and `/bloggo/...` but not `/bloggotastic`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn validate_mount(prefix: &str) -> Result<(), ProxyError> {
    if prefix.is_empty() || !prefix.starts_with('/') {
        return Err(ProxyError::ConfigInvalid(format!(
            "mount point {:?} must begin with /",
            prefix
        )));
    }
    if prefix == "/" {
        return Err(ProxyError::ConfigInvalid(
            "the root mount point / is reserved".to_string(),
        ));
    }
    if prefix.ends_with('/') {
        return Err(ProxyError::ConfigInvalid(format!(
            "mount point {} must not end with /",
            prefix
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{Metrics, Telemetry};
    use crate::upstream;

    fn table(entries: &[(&str, &[&str])]) -> Result<RouteTable, ProxyError> {
        let map: ProxyMap = entries
            .iter()
            .map(|(prefix, backends)| {
                (
                    prefix.to_string(),
                    backends.iter().map(|b| b.to_string()).collect(),
                )
            })
            .collect();
        let telemetry = Telemetry::new(Metrics::install(), "");
        RouteTable::build(&map, &upstream::build_http_client(), &telemetry)
    }

    fn split(table: &RouteTable, uri: &str) -> (String, String) {
        let (mount, residual) = table.split(uri).unwrap();
        (mount.prefix().to_string(), residual)
    }

    #[test]
    fn test_split_longest_prefix_wins() {
        let t = table(&[
            ("/b", &["http://a:4242"]),
            ("/bloggo", &["http://b:4243"]),
        ])
        .unwrap();

        assert_eq!(
            split(&t, "/bloggo/posts"),
            ("/bloggo".to_string(), "/posts".to_string())
        );
        assert_eq!(split(&t, "/b/posts"), ("/b".to_string(), "/posts".to_string()));
    }

    #[test]
    fn test_split_exact_match_normalizes_residual() {
        let t = table(&[("/bloggo", &["http://a:4242"])]).unwrap();
        assert_eq!(split(&t, "/bloggo"), ("/bloggo".to_string(), "/".to_string()));
    }

    #[test]
    fn test_split_trailing_slash_normalizes_residual() {
        let t = table(&[("/bloggo", &["http://a:4242"])]).unwrap();
        assert_eq!(split(&t, "/bloggo/"), ("/bloggo".to_string(), "/".to_string()));
    }

    #[test]
    fn test_split_mount_boundary_is_respected() {
        let t = table(&[("/bloggo", &["http://a:4242"])]).unwrap();
        assert!(matches!(
            t.split("/bloggotastic"),
            Err(ProxyError::UnknownPath)
        ));
    }

    #[test]
    fn test_split_preserves_query_string() {
        let t = table(&[("/bloggo", &["http://a:4242"])]).unwrap();
        assert_eq!(
            split(&t, "/bloggo/posts?x=1&y=2"),
            ("/bloggo".to_string(), "/posts?x=1&y=2".to_string())
        );
        assert_eq!(
            split(&t, "/bloggo?x=1"),
            ("/bloggo".to_string(), "/?x=1".to_string())
        );
    }

    #[test]
    fn test_split_recomposes_original_path() {
        let t = table(&[
            ("/a", &["http://a:4242"]),
            ("/a/b", &["http://b:4243"]),
            ("/test", &["http://c:4244"]),
        ])
        .unwrap();

        for uri in ["/a", "/a/x", "/a/b", "/a/b/c", "/test/health"] {
            let (mount, residual) = t.split(uri).unwrap();
            let recomposed = if residual == "/" && !uri.ends_with('/') {
                mount.prefix().to_string()
            } else {
                format!("{}{}", mount.prefix(), residual)
            };
            assert_eq!(recomposed, uri, "uri {}", uri);
            assert!(residual.starts_with('/'));
        }
    }

    #[test]
    fn test_split_nested_mounts_both_route() {
        let t = table(&[
            ("/a", &["http://a:4242"]),
            ("/a/b", &["http://b:4243"]),
        ])
        .unwrap();

        assert_eq!(split(&t, "/a/b/c"), ("/a/b".to_string(), "/c".to_string()));
        assert_eq!(split(&t, "/a/c"), ("/a".to_string(), "/c".to_string()));
    }

    #[test]
    fn test_split_unknown_path() {
        let t = table(&[("/bloggo", &["http://a:4242"])]).unwrap();
        assert!(matches!(
            t.split("/unknown/thing"),
            Err(ProxyError::UnknownPath)
        ));
    }

    #[test]
    fn test_empty_map_routes_nothing() {
        let t = table(&[]).unwrap();
        assert!(t.is_empty());
        assert!(matches!(t.split("/anything"), Err(ProxyError::UnknownPath)));
    }

    #[test]
    fn test_build_rejects_empty_pool() {
        assert!(matches!(
            table(&[("/bloggo", &[])]),
            Err(ProxyError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_build_rejects_bad_mounts() {
        assert!(table(&[("bloggo", &["http://a:4242"])]).is_err());
        assert!(table(&[("/", &["http://a:4242"])]).is_err());
        assert!(table(&[("/bloggo/", &["http://a:4242"])]).is_err());
        assert!(table(&[("", &["http://a:4242"])]).is_err());
    }

    #[test]
    fn test_build_rejects_bad_backend_urls() {
        assert!(table(&[("/bloggo", &["not a url"])]).is_err());
        assert!(table(&[("/bloggo", &["a:4242"])]).is_err());
        assert!(table(&[("/bloggo", &["ftp://a:4242"])]).is_err());
    }
}
