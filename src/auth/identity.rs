//! Organization identity from the access token.
//!
//! The payload segment is decoded without signature verification; the agent
//! only needs the org claim, the control plane verifies the token itself.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

pub const ORG_CLAIM: &str = "https://api.resim.ai/org_id";

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("malformed access token")]
    Malformed,

    #[error("no org claim in token")]
    NoOrgClaim,
}

/// Extract the organization name from an access token's claims.
pub fn org_name_from_token(access_token: &str) -> Result<String, IdentityError> {
    let payload = access_token
        .split('.')
        .nth(1)
        .ok_or(IdentityError::Malformed)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| IdentityError::Malformed)?;
    let claims: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| IdentityError::Malformed)?;

    claims
        .get(ORG_CLAIM)
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .ok_or(IdentityError::NoOrgClaim)
}

#[cfg(test)]
pub(crate) fn unsigned_token(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
    format!("{header}.{payload}.")
}
