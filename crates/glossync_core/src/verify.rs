use serde::Serialize;
use tracing::{info, warn};

use crate::store::ContentStore;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VerifyReport {
    pub verified: bool,
    pub identity: Option<String>,
    pub display_name: Option<String>,
    pub detail: Option<String>,
    pub request_count: usize,
}

/// Ask the store who we are. Verified when the answer carries an account
/// id, email address or username.
pub fn verify_connection<S>(store: &mut S) -> VerifyReport
where
    S: ContentStore + ?Sized,
{
    let requests_before = store.request_count();
    let mut report = VerifyReport {
        verified: false,
        identity: None,
        display_name: None,
        detail: None,
        request_count: 0,
    };

    match store.current_user() {
        Ok(profile) => {
            report.display_name = profile.display_name.clone();
            match profile.identity() {
                Some(identity) => {
                    info!(%identity, "credentials verified");
                    report.verified = true;
                    report.identity = Some(identity.to_string());
                }
                None => {
                    warn!("current user response carried no identity");
                    report.detail = Some("response did not identify a user".to_string());
                }
            }
        }
        Err(error) => {
            warn!(error = %format!("{error:#}"), "credential check failed");
            report.detail = Some(format!("{error:#}"));
        }
    }

    report.request_count = store.request_count().saturating_sub(requests_before);
    report
}
