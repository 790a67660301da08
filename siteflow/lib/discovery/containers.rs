use std::collections::BTreeMap;

use serde::Deserialize;

use crate::models::{ContainerMetrics, ContainerStatus, PortMapping};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One line of `docker ps -a --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "State", default)]
    state: Option<String>,
    #[serde(rename = "Image", default)]
    image: Option<String>,
    #[serde(rename = "Ports", default)]
    ports: Option<String>,
}

/// One line of `docker stats --no-stream --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct StatsLine {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses `docker ps` JSON-lines output into a name-keyed container map.
/// Malformed lines are skipped.
pub fn parse_ps_output(raw: &str) -> BTreeMap<String, ContainerStatus> {
    let mut containers = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Result::Ok(parsed) = serde_json::from_str::<PsLine>(line) else {
            continue;
        };
        if parsed.names.is_empty() {
            continue;
        }
        let container = ContainerStatus {
            name: parsed.names.clone(),
            status: parsed.status,
            state: parsed.state,
            image: parsed.image,
            ports: parse_docker_ports(parsed.ports.as_deref()),
        };
        containers.insert(parsed.names, container);
    }
    containers
}

/// Parses the `Ports` column of `docker ps`
/// (`0.0.0.0:8080->80/tcp, :::8080->80/tcp, 3306/tcp`).
pub fn parse_docker_ports(raw: Option<&str>) -> Vec<PortMapping> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let mut ports = Vec::new();
    for segment in raw.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if let Some((public, private)) = segment.split_once("->") {
            let public = public
                .rsplit_once(':')
                .map(|(_, port)| port)
                .unwrap_or(public);
            let (private, protocol) = private
                .split_once('/')
                .unwrap_or((private, "tcp"));
            ports.push(PortMapping {
                private: private.to_string(),
                public: Some(public.to_string()),
                protocol: protocol.to_string(),
            });
        } else {
            let (private, protocol) = segment.split_once('/').unwrap_or((segment, "tcp"));
            ports.push(PortMapping {
                private: private.to_string(),
                public: None,
                protocol: protocol.to_string(),
            });
        }
    }
    ports
}

/// Parses `docker stats` JSON-lines output into a name-keyed metrics map.
pub fn parse_stats_output(raw: &str) -> BTreeMap<String, ContainerMetrics> {
    let mut metrics = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Result::Ok(parsed) = serde_json::from_str::<StatsLine>(line) else {
            tracing::warn!(line, "failed to parse docker stats line");
            continue;
        };
        if parsed.name.is_empty() {
            continue;
        }
        let (usage_mb, limit_mb) = parse_memory_pair(&parsed.mem_usage);
        metrics.insert(
            parsed.name.clone(),
            ContainerMetrics {
                container_name: parsed.name,
                cpu_percent: parse_percent(&parsed.cpu_perc),
                memory_percent: parse_percent(&parsed.mem_perc),
                memory_usage_mb: usage_mb,
                memory_limit_mb: limit_mb,
            },
        );
    }
    metrics
}

/// Parses a percentage like `"0.12%"`.
fn parse_percent(value: &str) -> f64 {
    value.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

/// Parses `"100MiB / 1GiB"` into `(usage_mb, limit_mb)`.
fn parse_memory_pair(value: &str) -> (f64, f64) {
    let Some((usage, limit)) = value.split_once('/') else {
        return (0.0, 0.0);
    };
    (parse_size_mb(usage), parse_size_mb(limit))
}

/// Parses a docker size string (`1.5GiB`, `100MiB`, `512kB`) into MB.
fn parse_size_mb(value: &str) -> f64 {
    let value = value.trim();
    let split = value
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let Result::Ok(number) = number.trim().parse::<f64>() else {
        return 0.0;
    };
    let multiplier = match unit.trim() {
        "B" => 1.0 / (1024.0 * 1024.0),
        "KB" | "KiB" | "kB" => 1.0 / 1024.0,
        "MB" | "MiB" => 1.0,
        "GB" | "GiB" => 1024.0,
        "TB" | "TiB" => 1024.0 * 1024.0,
        _ => 1.0,
    };
    number * multiplier
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_output() {
        let raw = concat!(
            r#"{"Names":"blog","Status":"Up 3 hours","State":"running","Image":"wordpress:latest","Ports":"0.0.0.0:8080->80/tcp"}"#,
            "\n",
            r#"{"Names":"blog-mariadb","Status":"Exited (0) 2 days ago","State":"exited","Image":"mariadb:11","Ports":""}"#,
            "\n",
            "not json\n",
        );
        let containers = parse_ps_output(raw);
        assert_eq!(containers.len(), 2);
        let blog = &containers["blog"];
        assert_eq!(blog.status, "Up 3 hours");
        assert_eq!(blog.ports[0].public.as_deref(), Some("8080"));
        assert_eq!(blog.ports[0].private, "80");
        assert_eq!(blog.ports[0].protocol, "tcp");
    }

    #[test]
    fn test_parse_docker_ports_unpublished() {
        let ports = parse_docker_ports(Some("3306/tcp, 33060/tcp"));
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].private, "3306");
        assert!(ports[0].public.is_none());
    }

    #[test]
    fn test_parse_stats_output() {
        let raw = r#"{"Name":"blog","CPUPerc":"1.25%","MemPerc":"10.00%","MemUsage":"100MiB / 1GiB"}"#;
        let metrics = parse_stats_output(raw);
        let blog = &metrics["blog"];
        assert!((blog.cpu_percent - 1.25).abs() < f64::EPSILON);
        assert!((blog.memory_usage_mb - 100.0).abs() < 0.01);
        assert!((blog.memory_limit_mb - 1024.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_size_units() {
        assert!((parse_size_mb("512kB") - 0.5).abs() < 0.01);
        assert!((parse_size_mb("2GiB") - 2048.0).abs() < 0.01);
        assert_eq!(parse_size_mb("garbage"), 0.0);
    }
}
