//! Request extractor that resolves the caller's canonical identity.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::AppState;
use crate::error::QuorumError;
use crate::identity::{AccountId, CanonicalIdentity, DeviceKey, Reconciliation, SessionKey};

pub const DEVICE_HEADER: &str = "x-device-key";
pub const SESSION_HEADER: &str = "x-session-key";
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Longest accepted key, in bytes.
const MAX_KEY_LEN: usize = 256;

/// The reconciled caller of a request.
#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: CanonicalIdentity,
    pub decision: Reconciliation,
}

fn header<'a>(parts: &'a Parts, name: &'static str) -> Result<Option<&'a str>, QuorumError> {
    let Some(value) = parts.headers.get(name) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| QuorumError::validation(format!("{} must be visible ASCII", name)))?
        .trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.len() > MAX_KEY_LEN {
        return Err(QuorumError::validation(format!(
            "{} cannot exceed {} bytes",
            name, MAX_KEY_LEN
        )));
    }
    Ok(Some(value))
}

#[async_trait]
impl FromRequestParts<AppState> for Participant {
    type Rejection = QuorumError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let device = header(parts, DEVICE_HEADER)?.ok_or_else(|| QuorumError::missing_field(DEVICE_HEADER))?;
        let session = header(parts, SESSION_HEADER)?.ok_or_else(|| QuorumError::missing_field(SESSION_HEADER))?;
        let account = header(parts, ACCOUNT_HEADER)?.map(AccountId::from);

        let resolution = state
            .service
            .resolve(&DeviceKey::from(device), &SessionKey::from(session), account.as_ref())
            .await?;

        Ok(Self {
            identity: resolution.identity,
            decision: resolution.decision,
        })
    }
}
