//! Host adapters for running outside a browser.

use async_trait::async_trait;
use nid_bootstrap::{AccessStatus, PermissionProbe, Result, StatusIndicator};
use tracing::{info, warn};

/// Private-context permission taken from the agent config.
pub struct ConfigPermission {
    allowed: bool,
}

impl ConfigPermission {
    pub fn new(allowed: bool) -> Self {
        Self { allowed }
    }
}

#[async_trait]
impl PermissionProbe for ConfigPermission {
    async fn is_allowed_in_private(&self) -> Result<bool> {
        Ok(self.allowed)
    }
}

/// Reports status changes through the log.
pub struct LogStatus;

impl StatusIndicator for LogStatus {
    fn show(&self, status: &AccessStatus) {
        if status.enabled {
            info!("{}", status.message);
        } else {
            warn!(badge = status.badge.unwrap_or_default(), "{}", status.message);
        }
    }
}
