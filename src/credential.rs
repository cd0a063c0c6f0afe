// Signed vehicle feed URL, requested once at startup.

use tracing::{error, info};

use crate::error::{Result, TransitError};

#[derive(Debug, Default)]
pub struct CredentialGate {
    signed_url: Option<String>,
    resolved: bool,
}

impl CredentialGate {
    /// Records the outcome of the one acquisition attempt. A failure is logged
    /// and leaves the gate closed; it is never retried.
    pub fn resolve(&mut self, result: Result<String>) {
        self.resolved = true;
        match result {
            Ok(url) => {
                info!("🔑 Signed URL fetched successfully");
                self.signed_url = Some(url);
            }
            Err(e) => {
                error!("❌ Error fetching signed URL: {}", e);
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.signed_url.is_some()
    }

    /// Whether acquisition has finished, successfully or not.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn signed_url(&self) -> Result<&str> {
        self.signed_url.as_deref().ok_or(TransitError::CredentialUnavailable)
    }
}
