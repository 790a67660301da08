use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_COMMAND_TIMEOUT, GIT_TIMEOUT},
    utils::{shell_quote, validate_git_url},
    SiteflowResult,
};

use super::{Provisioner, TemplateType};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Detection request: a repository to clone or an existing remote path.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetectRequest {
    /// Repository to clone and scan.
    #[serde(default)]
    pub git_url: Option<String>,
    /// Existing remote path to scan.
    #[serde(default)]
    pub path: Option<String>,
}

/// How confident the detector is in its classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// A canonical marker was found.
    High,
    /// Only a weak marker was found.
    Medium,
    /// Nothing matched; defaulted to static.
    Low,
}

/// Detection result.
#[derive(Debug, Clone, Serialize)]
pub struct DetectResponse {
    /// The classified template.
    pub detected_type: TemplateType,
    /// Classification confidence.
    pub confidence: Confidence,
    /// Human-readable reason.
    pub reason: String,
    /// Root entries that were inspected.
    pub files_checked: Vec<String>,
}

/// A detection marker: its presence classifies the project.
struct Marker {
    file: &'static str,
    template: TemplateType,
    confidence: Confidence,
}

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Markers in their fixed check order: node, then python, then wordpress.
/// The first hit wins; order is part of the API contract.
const MARKERS: &[Marker] = &[
    Marker {
        file: "package.json",
        template: TemplateType::Node,
        confidence: Confidence::High,
    },
    Marker {
        file: "requirements.txt",
        template: TemplateType::Python,
        confidence: Confidence::High,
    },
    Marker {
        file: "pyproject.toml",
        template: TemplateType::Python,
        confidence: Confidence::High,
    },
    Marker {
        file: "manage.py",
        template: TemplateType::Python,
        confidence: Confidence::High,
    },
    Marker {
        file: "wp-config.php",
        template: TemplateType::Wordpress,
        confidence: Confidence::High,
    },
    Marker {
        file: "wp-content",
        template: TemplateType::Wordpress,
        confidence: Confidence::Medium,
    },
];

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Provisioner {
    /// Classifies a project by its well-known marker files.
    ///
    /// Git URLs are cloned shallowly into a scratch directory on the
    /// managed host and cleaned up afterwards. Failures classify as static
    /// with low confidence rather than erroring, so the UI can always show
    /// a suggestion.
    pub async fn detect_project_type(&self, request: &DetectRequest) -> SiteflowResult<DetectResponse> {
        let mut scratch_dir: Option<String> = None;

        let scan_path = match (&request.git_url, &request.path) {
            (Some(git_url), _) => {
                let url = match validate_git_url(git_url) {
                    Result::Ok(url) => url,
                    Result::Err(e) => {
                        return Ok(DetectResponse {
                            detected_type: TemplateType::Static,
                            confidence: Confidence::Low,
                            reason: format!("invalid git URL: {e}"),
                            files_checked: Vec::new(),
                        })
                    }
                };
                let dir = format!("/tmp/siteflow-detect-{}", uuid::Uuid::new_v4().simple());
                let clone = self
                    .remote
                    .run(
                        &format!(
                            "git clone --depth 1 {} {} 2>&1",
                            shell_quote(&url),
                            shell_quote(&dir)
                        ),
                        GIT_TIMEOUT,
                    )
                    .await?;
                if clone.exit_code != 0 {
                    return Ok(DetectResponse {
                        detected_type: TemplateType::Static,
                        confidence: Confidence::Low,
                        reason: format!("failed to clone repository: {}", clone.stdout),
                        files_checked: Vec::new(),
                    });
                }
                scratch_dir = Some(dir.clone());
                dir
            }
            (None, Some(path)) => path.clone(),
            (None, None) => {
                return Ok(DetectResponse {
                    detected_type: TemplateType::Static,
                    confidence: Confidence::Low,
                    reason: "no git_url or path provided".to_string(),
                    files_checked: Vec::new(),
                })
            }
        };

        let result = self.scan_markers(&scan_path).await;

        if let Some(dir) = scratch_dir {
            let _ = self
                .remote
                .run(&format!("rm -rf {}", shell_quote(&dir)), DEFAULT_COMMAND_TIMEOUT)
                .await;
        }

        result
    }

    async fn scan_markers(&self, scan_path: &str) -> SiteflowResult<DetectResponse> {
        let quoted = shell_quote(scan_path);
        let listing = self
            .remote
            .run(
                &format!("ls -1a {quoted} 2>/dev/null || echo DIR_NOT_FOUND"),
                DEFAULT_COMMAND_TIMEOUT,
            )
            .await?;
        if listing.stdout.contains("DIR_NOT_FOUND") {
            return Ok(DetectResponse {
                detected_type: TemplateType::Static,
                confidence: Confidence::Low,
                reason: "directory not found".to_string(),
                files_checked: Vec::new(),
            });
        }

        let files_checked: Vec<String> = listing
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != "." && *line != "..")
            .take(10)
            .map(str::to_string)
            .collect();

        for marker in MARKERS {
            let check = self
                .remote
                .run(
                    &format!(
                        "test -e {quoted}/{} && echo FOUND || echo NOT_FOUND",
                        marker.file
                    ),
                    DEFAULT_COMMAND_TIMEOUT,
                )
                .await?;
            if check.stdout.trim() == "FOUND" {
                return Ok(DetectResponse {
                    detected_type: marker.template,
                    confidence: marker.confidence,
                    reason: format!("{} present", marker.file),
                    files_checked,
                });
            }
        }

        Ok(DetectResponse {
            detected_type: TemplateType::Static,
            confidence: Confidence::Low,
            reason: "no framework markers found, defaulting to static".to_string(),
            files_checked,
        })
    }
}
