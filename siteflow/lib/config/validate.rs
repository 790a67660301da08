//! Cross-field configuration validation.

use super::SiteflowConfig;
use crate::{SiteflowError, SiteflowResult};

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SiteflowConfig {
    /// Validates the loaded configuration.
    ///
    /// Checks that values required together are present together and that
    /// tuning knobs are non-zero where zero would deadlock or spin.
    pub fn validate(&self) -> SiteflowResult<()> {
        if self.remote.pool_size == 0 {
            return Err(SiteflowError::Validation(
                "remote.pool_size must be at least 1".to_string(),
            ));
        }
        if self.runtime.monitor_interval_secs == 0 {
            return Err(SiteflowError::Validation(
                "runtime.monitor_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.runtime.hub_queue_capacity == 0 {
            return Err(SiteflowError::Validation(
                "runtime.hub_queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.layout.sites_root.starts_with('/') {
            return Err(SiteflowError::Validation(
                "layout.sites_root must be an absolute path".to_string(),
            ));
        }
        if !self.layout.caddyfile_path.starts_with('/') {
            return Err(SiteflowError::Validation(
                "layout.caddyfile_path must be an absolute path".to_string(),
            ));
        }

        // Partial provider credentials are almost certainly a mistake.
        let cf = &self.cloudflare;
        let cf_fields = [&cf.account_id, &cf.api_token, &cf.tunnel_id];
        let present = cf_fields.iter().filter(|f| f.is_some()).count();
        if present != 0 && present != cf_fields.len() {
            return Err(SiteflowError::Validation(
                "cloudflare requires account_id, api_token and tunnel_id together".to_string(),
            ));
        }

        if self.uptime.url.is_some() && self.uptime.username.is_none() {
            return Err(SiteflowError::Validation(
                "uptime.username is required when uptime.url is set".to_string(),
            ));
        }
        if self.uptime.heartbeat_window < 30 {
            return Err(SiteflowError::Validation(
                "uptime.heartbeat_window must be at least 30".to_string(),
            ));
        }

        let t = &self.backup_thresholds;
        if t.db_fresh_hours <= 0
            || t.uploads_fresh_hours <= 0
            || t.verify_fresh_days <= 0
            || t.snapshot_fresh_days <= 0
        {
            return Err(SiteflowError::Validation(
                "backup thresholds must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
