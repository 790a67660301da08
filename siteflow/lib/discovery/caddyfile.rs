//! A minimal Caddyfile reader and rewriter.
//!
//! Understands exactly the subset the gateway uses: top-level site blocks
//! (`host1, host2 { ... }`) containing `reverse_proxy` and `redir`
//! directives. Comments and blank lines are ignored; nested braces inside a
//! block are tracked so matcher blocks do not terminate the site block
//! early.

use crate::{SiteflowError, SiteflowResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A site block parsed from the Caddyfile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaddyRoute {
    /// Host names of the block header.
    pub hosts: Vec<String>,
    /// `reverse_proxy` directive arguments, in order.
    pub reverse_proxies: Vec<String>,
    /// `redir` directive arguments, in order.
    pub redirects: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CaddyRoute {
    /// Extracts `(container, port)` pairs from the block's proxy targets.
    ///
    /// Targets look like `container:port`, `container:port/path` or a bare
    /// host; non-container targets (addresses with userinfo or schemes) are
    /// skipped by the caller.
    pub fn proxy_targets(&self) -> Vec<(String, Option<u16>)> {
        self.reverse_proxies
            .iter()
            .map(|target| {
                let target = target.split('/').next().unwrap_or(target);
                match target.split_once(':') {
                    Some((container, port)) => {
                        (container.to_string(), port.parse().ok())
                    }
                    None => (target.to_string(), None),
                }
            })
            .collect()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a Caddyfile into its top-level site blocks.
pub fn parse_caddyfile(raw: &str) -> Vec<CaddyRoute> {
    let mut routes = Vec::new();
    let mut brace_depth: i32 = 0;
    let mut current: Option<CaddyRoute> = None;

    for raw_line in raw.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let opening = raw_line.matches('{').count() as i32;
        let closing = raw_line.matches('}').count() as i32;

        if line.ends_with('{') && brace_depth == 0 {
            let hosts_line = line[..line.len() - 1].trim();
            let hosts = hosts_line
                .split(',')
                .map(|h| h.trim().trim_matches(',').to_string())
                .filter(|h| !h.is_empty())
                .collect();
            current = Some(CaddyRoute {
                hosts,
                ..Default::default()
            });
            brace_depth = 1;
            continue;
        }

        if let Some(route) = current.as_mut() {
            if let Some(target) = line.strip_prefix("reverse_proxy") {
                let target = target.trim();
                if !target.is_empty() {
                    route.reverse_proxies.push(target.to_string());
                }
            } else if let Some(target) = line.strip_prefix("redir") {
                let target = target.trim();
                if !target.is_empty() {
                    route.redirects.push(target.to_string());
                }
            }
        }

        if brace_depth > 0 {
            brace_depth += opening - closing;
            if brace_depth <= 0 {
                if let Some(route) = current.take() {
                    routes.push(route);
                }
                brace_depth = 0;
            }
        } else {
            brace_depth = (brace_depth + opening - closing).max(0);
        }
    }

    if let Some(route) = current.take() {
        routes.push(route);
    }
    routes
}

/// Renders the site block appended for a provisioned route.
pub fn render_route_block(domain: &str, container: &str, port: u16) -> String {
    format!("\n{domain} {{\n    reverse_proxy {container}:{port}\n}}\n")
}

/// Appends a route block, rejecting a domain that already has one.
pub fn append_route(
    caddyfile: &str,
    domain: &str,
    container: &str,
    port: u16,
) -> SiteflowResult<String> {
    let routes = parse_caddyfile(caddyfile);
    if routes.iter().any(|r| r.hosts.iter().any(|h| h == domain)) {
        return Err(SiteflowError::Conflict(format!(
            "route for domain '{domain}' already exists"
        )));
    }
    let mut content = caddyfile.trim_end().to_string();
    content.push('\n');
    content.push_str(&render_route_block(domain, container, port));
    Ok(content)
}

/// Removes the site block whose header contains `domain`.
///
/// Returns `NotFound` when no block matches. Blocks with multiple hosts
/// keep their other hosts only if the whole header matches; the gateway
/// writes one host per block, so the entire block goes.
pub fn remove_route(caddyfile: &str, domain: &str) -> SiteflowResult<String> {
    let mut result: Vec<&str> = Vec::new();
    let mut brace_depth: i32 = 0;
    let mut skipping = false;
    let mut removed = 0u32;

    for raw_line in caddyfile.lines() {
        let line = raw_line.trim();
        let opening = raw_line.matches('{').count() as i32;
        let closing = raw_line.matches('}').count() as i32;

        if !skipping && brace_depth == 0 && line.ends_with('{') {
            let hosts_line = line[..line.len() - 1].trim();
            let matches_domain = hosts_line
                .split(',')
                .map(|h| h.trim().trim_matches(','))
                .any(|h| h == domain);
            if matches_domain {
                skipping = true;
                removed += 1;
                brace_depth = 1;
                continue;
            }
        }

        if skipping {
            brace_depth += opening - closing;
            if brace_depth <= 0 {
                skipping = false;
                brace_depth = 0;
            }
            continue;
        }

        brace_depth = (brace_depth + opening - closing).max(0);
        result.push(raw_line);
    }

    if removed == 0 {
        return Err(SiteflowError::NotFound(format!(
            "route for domain '{domain}'"
        )));
    }

    let mut content = result.join("\n").trim_end().to_string();
    if !content.is_empty() {
        content.push('\n');
    }
    Ok(content)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const CADDYFILE: &str = r#"# gateway routes
blog.example.com {
    reverse_proxy blog:80
}

shop.example.com, www.shop.example.com {
    encode gzip
    reverse_proxy shop:3000
    redir /old /new
}
"#;

    #[test]
    fn test_parse_blocks() {
        let routes = parse_caddyfile(CADDYFILE);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].hosts, vec!["blog.example.com"]);
        assert_eq!(routes[0].reverse_proxies, vec!["blog:80"]);
        assert_eq!(
            routes[1].hosts,
            vec!["shop.example.com", "www.shop.example.com"]
        );
        assert_eq!(routes[1].reverse_proxies, vec!["shop:3000"]);
        assert_eq!(routes[1].redirects, vec!["/old /new"]);
    }

    #[test]
    fn test_parse_nested_braces() {
        let raw = r#"
api.example.com {
    handle /v1/* {
        reverse_proxy api:8000
    }
}
next.example.com {
    reverse_proxy next:3000
}
"#;
        let routes = parse_caddyfile(raw);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].reverse_proxies, vec!["api:8000"]);
        assert_eq!(routes[1].hosts, vec!["next.example.com"]);
    }

    #[test]
    fn test_proxy_targets() {
        let route = CaddyRoute {
            hosts: vec!["a.example.com".to_string()],
            reverse_proxies: vec!["blog:80/api".to_string(), "bare-host".to_string()],
            redirects: vec![],
        };
        let targets = route.proxy_targets();
        assert_eq!(targets[0], ("blog".to_string(), Some(80)));
        assert_eq!(targets[1], ("bare-host".to_string(), None));
    }

    #[test]
    fn test_append_route_rejects_duplicate() {
        let err = append_route(CADDYFILE, "blog.example.com", "blog", 80).unwrap_err();
        assert!(matches!(err, SiteflowError::Conflict(_)));
    }

    #[test]
    fn test_append_then_parse_roundtrip() {
        let updated = append_route(CADDYFILE, "new.example.com", "new-site", 8080).unwrap();
        let routes = parse_caddyfile(&updated);
        assert_eq!(routes.len(), 3);
        assert_eq!(routes[2].hosts, vec!["new.example.com"]);
        assert_eq!(routes[2].reverse_proxies, vec!["new-site:8080"]);
    }

    #[test]
    fn test_remove_route() {
        let updated = remove_route(CADDYFILE, "blog.example.com").unwrap();
        let routes = parse_caddyfile(&updated);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].hosts[0], "shop.example.com");
        // The other block is untouched.
        assert!(updated.contains("redir /old /new"));
    }

    #[test]
    fn test_remove_route_missing_is_not_found() {
        let err = remove_route(CADDYFILE, "nope.example.com").unwrap_err();
        assert!(matches!(err, SiteflowError::NotFound(_)));
    }
}
