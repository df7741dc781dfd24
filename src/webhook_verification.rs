//! # Webhook Signature Verification
//!
//! Verifies inbound VCS deliveries against a hook's shared secret using
//! constant-time comparison to prevent timing attacks.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const GITHUB_SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
pub const GITLAB_TOKEN_HEADER: &str = "X-Gitlab-Token";

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: &'static str },

    #[error("Invalid signature format: {reason}")]
    InvalidSignatureFormat { reason: &'static str },

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Computes the `sha256=<hex>` signature GitHub sends for `body`.
pub fn sign_github_payload(body: &[u8], secret: &str) -> VerificationResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verifies GitHub webhook signature using HMAC-SHA256
pub fn verify_github_signature(
    body: &[u8],
    signature_header: &str,
    secret: &str,
) -> VerificationResult<()> {
    debug!(
        body_size = body.len(),
        "Starting GitHub signature verification"
    );

    if signature_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: GITHUB_SIGNATURE_HEADER,
        });
    }

    let Some(provided_hex) = signature_header.strip_prefix("sha256=") else {
        return Err(VerificationError::InvalidSignatureFormat {
            reason: "X-Hub-Signature-256 must start with 'sha256='",
        });
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected_bytes = mac.finalize().into_bytes();

    let provided_bytes =
        hex::decode(provided_hex).map_err(|_| VerificationError::InvalidSignatureFormat {
            reason: "X-Hub-Signature-256 contains invalid hex",
        })?;

    let expected_bytes: &[u8] = expected_bytes.as_ref();
    if expected_bytes.ct_eq(&provided_bytes[..]).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Verifies the plain shared token GitLab echoes in `X-Gitlab-Token`.
pub fn verify_gitlab_token(token_header: &str, secret: &str) -> VerificationResult<()> {
    if token_header.is_empty() {
        return Err(VerificationError::MissingSignature {
            header: GITLAB_TOKEN_HEADER,
        });
    }

    if token_header.as_bytes().ct_eq(secret.as_bytes()).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_github_signature_verification_success() {
        let secret = "test_secret";
        let body = b"test payload";

        let signature_header = sign_github_payload(body, secret).unwrap();

        assert!(verify_github_signature(body, &signature_header, secret).is_ok());
    }

    #[test]
    fn test_github_signature_verification_wrong_secret() {
        let body = b"test payload";
        let signature_header = sign_github_payload(body, "other_secret").unwrap();

        assert!(matches!(
            verify_github_signature(body, &signature_header, "test_secret"),
            Err(VerificationError::VerificationFailed)
        ));
    }

    #[test]
    fn test_github_signature_verification_invalid_signature() {
        assert!(verify_github_signature(b"test payload", "sha256=invalid_signature", "s").is_err());
    }

    #[test]
    fn test_github_signature_verification_missing_signature() {
        assert!(matches!(
            verify_github_signature(b"test payload", "", "s"),
            Err(VerificationError::MissingSignature { .. })
        ));
    }

    #[test]
    fn test_github_signature_verification_invalid_format() {
        assert!(matches!(
            verify_github_signature(b"test payload", "invalid_format", "s"),
            Err(VerificationError::InvalidSignatureFormat { .. })
        ));
    }

    #[test]
    fn test_gitlab_token_verification() {
        assert!(verify_gitlab_token("s3cret", "s3cret").is_ok());
        assert!(matches!(
            verify_gitlab_token("nope", "s3cret"),
            Err(VerificationError::VerificationFailed)
        ));
        assert!(matches!(
            verify_gitlab_token("", "s3cret"),
            Err(VerificationError::MissingSignature { .. })
        ));
    }
}
