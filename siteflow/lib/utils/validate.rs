//! Input validation for names that end up inside shell commands, Caddyfile
//! blocks and provider APIs.

use url::Url;

use crate::{SiteflowError, SiteflowResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Git hosts accepted for clone URLs.
pub const ALLOWED_GIT_HOSTS: &[&str] = &["github.com", "gitlab.com", "bitbucket.org"];

/// Maximum length of a site name (one DNS label).
pub const MAX_SITE_NAME_LEN: usize = 63;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Validates and normalizes a site name.
///
/// Site names are lowercase alphanumeric with single interior hyphens,
/// 2..=63 characters, and double as directory names and DNS labels.
pub fn validate_site_name(name: &str) -> SiteflowResult<String> {
    let name = name.trim().to_lowercase();
    if name.len() < 2 {
        return Err(SiteflowError::Validation(
            "site name must be at least 2 characters".to_string(),
        ));
    }
    if name.len() > MAX_SITE_NAME_LEN {
        return Err(SiteflowError::Validation(format!(
            "site name must be {MAX_SITE_NAME_LEN} characters or less"
        )));
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return Err(SiteflowError::Validation(
            "site name must start and end with a lowercase letter or digit".to_string(),
        ));
    }
    if !bytes.iter().all(|&b| alnum(b) || b == b'-') {
        return Err(SiteflowError::Validation(
            "site name may only contain lowercase letters, digits and hyphens".to_string(),
        ));
    }
    if name.contains("--") {
        return Err(SiteflowError::Validation(
            "site name cannot contain consecutive hyphens".to_string(),
        ));
    }
    Ok(name)
}

/// Validates a domain name, stripping any protocol prefix and path.
pub fn validate_domain(domain: &str) -> SiteflowResult<String> {
    let mut domain = domain.trim().to_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = domain.strip_prefix(prefix) {
            domain = rest.to_string();
            break;
        }
    }
    if let Some((host, _)) = domain.split_once('/') {
        domain = host.to_string();
    }
    if domain.is_empty() {
        return Err(SiteflowError::Validation("domain cannot be empty".to_string()));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(SiteflowError::Validation(
            "domain must have at least two labels (e.g. example.com)".to_string(),
        ));
    }
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return Err(SiteflowError::Validation(format!(
                "invalid domain label in: {domain}"
            )));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(SiteflowError::Validation(
                "domain labels cannot start or end with a hyphen".to_string(),
            ));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(SiteflowError::Validation(format!(
                "invalid domain format: {domain}"
            )));
        }
    }
    Ok(domain)
}

/// Validates a git branch name against flag injection and traversal.
pub fn validate_branch(branch: &str) -> SiteflowResult<String> {
    let branch = branch.trim();
    if branch.is_empty() {
        return Err(SiteflowError::Validation(
            "branch name cannot be empty".to_string(),
        ));
    }
    if branch.len() > 255 {
        return Err(SiteflowError::Validation("branch name too long".to_string()));
    }
    if branch.starts_with('-') {
        return Err(SiteflowError::Validation(
            "branch name cannot start with a hyphen".to_string(),
        ));
    }
    if branch.contains("..") {
        return Err(SiteflowError::Validation(
            "branch name cannot contain '..'".to_string(),
        ));
    }
    if !branch
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'/' | b'-'))
    {
        return Err(SiteflowError::Validation(
            "branch name may only contain alphanumerics, dots, underscores, slashes and hyphens"
                .to_string(),
        ));
    }
    Ok(branch.to_string())
}

/// Validates and normalizes a git URL to an HTTPS clone URL on an
/// allowlisted host, ensuring the `.git` suffix.
pub fn validate_git_url(raw: &str) -> SiteflowResult<String> {
    let mut url = raw.trim().to_string();
    if url.is_empty() {
        return Err(SiteflowError::Validation("git URL cannot be empty".to_string()));
    }

    // git@host:path -> https://host/path
    if let Some(rest) = url.strip_prefix("git@") {
        let (host, path) = rest.split_once(':').ok_or_else(|| {
            SiteflowError::Validation(format!("invalid git@ URL format: {raw}"))
        })?;
        url = format!("https://{host}/{path}");
    }

    let parsed = Url::parse(&url)
        .map_err(|e| SiteflowError::Validation(format!("invalid git URL: {e}")))?;
    if !matches!(parsed.scheme(), "https" | "http") {
        return Err(SiteflowError::Validation(
            "git URL must use HTTPS".to_string(),
        ));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| SiteflowError::Validation("git URL must include a host".to_string()))?
        .to_lowercase();
    if !ALLOWED_GIT_HOSTS.contains(&host.as_str()) {
        return Err(SiteflowError::Validation(format!(
            "git host '{host}' not allowed; allowed hosts: {}",
            ALLOWED_GIT_HOSTS.join(", ")
        )));
    }
    let mut path = parsed.path().trim_end_matches('/').to_string();
    if !path.ends_with(".git") {
        path.push_str(".git");
    }
    Ok(format!("https://{host}{path}"))
}

/// Validates a container name against the engine's naming rules.
pub fn validate_container_name(name: &str) -> SiteflowResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SiteflowError::Validation(
            "container name cannot be empty".to_string(),
        ));
    }
    if name.len() > 128 {
        return Err(SiteflowError::Validation(
            "container name too long".to_string(),
        ));
    }
    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() {
        return Err(SiteflowError::Validation(
            "container name must start with an alphanumeric character".to_string(),
        ));
    }
    if !bytes
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
    {
        return Err(SiteflowError::Validation(
            "container name may only contain alphanumerics, underscores, dots and hyphens"
                .to_string(),
        ));
    }
    Ok(name.to_string())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
