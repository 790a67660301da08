use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    models::{PortMapping, SiteService},
    SiteflowResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A parsed compose document, reduced to the fields discovery needs.
#[derive(Debug, Default, Deserialize)]
pub struct ComposeDoc {
    /// Declared services keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
}

/// A single service entry in a compose document.
///
/// `ports`, `labels` and `environment` are kept as raw YAML because compose
/// accepts both map and `KEY=VALUE` list forms for them.
#[derive(Debug, Default, Deserialize)]
pub struct ComposeService {
    /// Explicit container name, when declared.
    #[serde(default)]
    pub container_name: Option<String>,
    /// Image reference.
    #[serde(default)]
    pub image: Option<String>,
    /// Raw ports section.
    #[serde(default)]
    pub ports: serde_yaml::Value,
    /// Raw labels section.
    #[serde(default)]
    pub labels: serde_yaml::Value,
    /// Raw environment section.
    #[serde(default)]
    pub environment: serde_yaml::Value,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a compose document. An empty or whitespace-only file yields an
/// empty document rather than an error.
pub fn parse_compose(raw: &str) -> SiteflowResult<ComposeDoc> {
    if raw.trim().is_empty() {
        return Ok(ComposeDoc::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

/// Builds the ordered service list for a site from its compose document,
/// expanding `${VAR}` label references from the site's `.env` entries.
pub fn build_services(
    site: &str,
    doc: &ComposeDoc,
    env_vars: &BTreeMap<String, String>,
) -> Vec<SiteService> {
    let mut services: Vec<SiteService> = doc
        .services
        .iter()
        .map(|(name, svc)| {
            let container_name = svc
                .container_name
                .clone()
                .or_else(|| Some(format!("{site}-{name}")));
            let labels = normalize_kv(&svc.labels)
                .into_iter()
                .map(|(k, v)| (k, expand_env_vars(&v, env_vars)))
                .collect();
            SiteService {
                name: name.clone(),
                container_name,
                image: svc.image.clone(),
                ports: parse_compose_ports(&svc.ports),
                labels,
                environment: normalize_kv(&svc.environment),
            }
        })
        .collect();
    services.sort_by(|a, b| a.name.cmp(&b.name));
    services
}

/// Parses a site `.env` file into key/value pairs.
pub fn parse_env_file(raw: &str) -> BTreeMap<String, String> {
    let mut env_vars = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            env_vars.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    env_vars
}

/// Expands `${VAR}` references, leaving unknown references untouched.
pub fn expand_env_vars(value: &str, env_vars: &BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match env_vars.get(name) {
                    Some(replacement) => result.push_str(replacement),
                    None => {
                        result.push_str("${");
                        result.push_str(name);
                        result.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                return result;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Normalizes a compose map-or-list section into key/value pairs.
fn normalize_kv(raw: &serde_yaml::Value) -> BTreeMap<String, String> {
    let mut pairs = BTreeMap::new();
    match raw {
        serde_yaml::Value::Mapping(map) => {
            for (key, value) in map {
                if let Some(key) = yaml_scalar(key) {
                    pairs.insert(key, yaml_scalar(value).unwrap_or_default());
                }
            }
        }
        serde_yaml::Value::Sequence(entries) => {
            for entry in entries {
                if let Some(entry) = yaml_scalar(entry) {
                    if let Some((key, value)) = entry.split_once('=') {
                        pairs.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }
        _ => {}
    }
    pairs
}

/// Parses the compose `ports` section (string and long map forms).
fn parse_compose_ports(raw: &serde_yaml::Value) -> Vec<PortMapping> {
    let serde_yaml::Value::Sequence(entries) = raw else {
        return Vec::new();
    };
    let mut ports = Vec::new();
    for entry in entries {
        match entry {
            serde_yaml::Value::String(s) => {
                let parts: Vec<&str> = s.split(':').collect();
                match parts.as_slice() {
                    [public, private] => ports.push(PortMapping {
                        private: (*private).to_string(),
                        public: Some((*public).to_string()),
                        protocol: "tcp".to_string(),
                    }),
                    [host, public, private] => ports.push(PortMapping {
                        private: format!("{public}:{private}"),
                        public: Some((*host).to_string()),
                        protocol: "tcp".to_string(),
                    }),
                    [only] => ports.push(PortMapping {
                        private: (*only).to_string(),
                        public: None,
                        protocol: "tcp".to_string(),
                    }),
                    _ => {}
                }
            }
            serde_yaml::Value::Mapping(map) => {
                let get = |key: &str| {
                    map.iter()
                        .find(|(k, _)| matches!(k, serde_yaml::Value::String(s) if s == key))
                        .and_then(|(_, v)| yaml_scalar(v))
                };
                if let Some(target) = get("target") {
                    ports.push(PortMapping {
                        private: target,
                        public: get("published"),
                        protocol: get("protocol").unwrap_or_else(|| "tcp".to_string()),
                    });
                }
            }
            serde_yaml::Value::Number(n) => ports.push(PortMapping {
                private: n.to_string(),
                public: None,
                protocol: "tcp".to_string(),
            }),
            _ => {}
        }
    }
    ports
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = r#"
services:
  wordpress:
    image: wordpress:latest
    container_name: blog
    environment:
      - WORDPRESS_DB_HOST=blog-mariadb
    labels:
      caddy: http://${DOMAIN}
      caddy.reverse_proxy: "{{upstreams 80}}"
  mariadb:
    image: mariadb:11
    container_name: blog-mariadb
    ports:
      - "3306"
"#;

    #[test]
    fn test_parse_and_build_services() {
        let doc = parse_compose(COMPOSE).unwrap();
        let mut env = BTreeMap::new();
        env.insert("DOMAIN".to_string(), "blog.example.com".to_string());

        let services = build_services("blog", &doc, &env);
        assert_eq!(services.len(), 2);
        // Sorted by name.
        assert_eq!(services[0].name, "mariadb");
        assert_eq!(services[1].name, "wordpress");
        assert_eq!(services[1].container_name.as_deref(), Some("blog"));
        assert_eq!(
            services[1].labels.get("caddy").map(String::as_str),
            Some("http://blog.example.com")
        );
        assert_eq!(
            services[1].environment.get("WORDPRESS_DB_HOST").map(String::as_str),
            Some("blog-mariadb")
        );
    }

    #[test]
    fn test_default_container_name_follows_convention() {
        let doc = parse_compose("services:\n  web:\n    image: nginx:alpine\n").unwrap();
        let services = build_services("shop", &doc, &BTreeMap::new());
        assert_eq!(services[0].container_name.as_deref(), Some("shop-web"));
    }

    #[test]
    fn test_empty_compose_is_empty_doc() {
        assert!(parse_compose("").unwrap().services.is_empty());
        assert!(parse_compose("   \n").unwrap().services.is_empty());
    }

    #[test]
    fn test_port_forms() {
        let doc = parse_compose(
            r#"
services:
  web:
    ports:
      - "8080:80"
      - "127.0.0.1:9000:9000"
      - target: 443
        published: 8443
        protocol: tcp
"#,
        )
        .unwrap();
        let services = build_services("x", &doc, &BTreeMap::new());
        let ports = &services[0].ports;
        assert_eq!(ports[0].public.as_deref(), Some("8080"));
        assert_eq!(ports[0].private, "80");
        assert_eq!(ports[1].public.as_deref(), Some("127.0.0.1"));
        assert_eq!(ports[1].private, "9000:9000");
        assert_eq!(ports[2].private, "443");
        assert_eq!(ports[2].public.as_deref(), Some("8443"));
    }

    #[test]
    fn test_env_expansion_leaves_unknown() {
        let env = BTreeMap::new();
        assert_eq!(expand_env_vars("http://${DOMAIN}", &env), "http://${DOMAIN}");
        assert_eq!(expand_env_vars("no refs", &env), "no refs");
    }

    #[test]
    fn test_parse_env_file() {
        let env = parse_env_file("# comment\nDOMAIN=blog.example.com\n\nEMPTY=\n");
        assert_eq!(env.get("DOMAIN").map(String::as_str), Some("blog.example.com"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(env.len(), 2);
    }
}
