//! Tests for request signature verification.

use super::*;
use crate::adapters::InMemorySecretStore;

const SECRET: &str = "8f742231b10e8888abcd99yyyzzz85a5";

// ============================================================================
// Helpers
// ============================================================================

fn secret_name() -> SecretName {
    SecretName::new("test-project", "slack-signing-secret").unwrap()
}

fn verifier_with_store(store: Arc<InMemorySecretStore>) -> RequestVerifier {
    RequestVerifier::new(store, secret_name(), VerifierSettings::default())
}

fn verifier() -> (RequestVerifier, Arc<InMemorySecretStore>) {
    let store = Arc::new(InMemorySecretStore::with_secret(secret_name(), SECRET));
    (verifier_with_store(store.clone()), store)
}

fn signed_request(body: &str, timestamp: i64) -> SignedRequest {
    let ts = timestamp.to_string();
    let signature = compute_signature(SECRET.as_bytes(), &ts, body.as_bytes()).unwrap();
    request_with(Some(&signature), Some(&ts), body)
}

fn request_with(signature: Option<&str>, timestamp: Option<&str>, body: &str) -> SignedRequest {
    let mut headers = HashMap::new();
    if let Some(signature) = signature {
        headers.insert("X-Slack-Signature".to_string(), signature.to_string());
    }
    if let Some(timestamp) = timestamp {
        headers.insert("X-Slack-Request-Timestamp".to_string(), timestamp.to_string());
    }
    headers.insert(
        "Content-Type".to_string(),
        "application/x-www-form-urlencoded".to_string(),
    );
    SignedRequest::new(headers, body.as_bytes().to_vec())
}

fn now() -> i64 {
    Timestamp::now().unix_seconds()
}

// ============================================================================
// compute_signature
// ============================================================================

/// Slack's documented example request must produce the documented signature.
#[test]
fn test_compute_signature_matches_platform_example() {
    let body = "token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&team_domain=testteamnow&channel_id=G8PSS9T3V&channel_name=foobar&user_id=U2CERLKJA&user_name=roadrunner&command=%2Fwebhook-collect&text=&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2FT1DC2JH3J%2F397700885554%2F96rGlfmibIGlgcZRskXaIFfN&trigger_id=398738663015.47445629121.803a0bc887a14d10d2c447fce8b6703c";

    let signature = compute_signature(SECRET.as_bytes(), "1531420618", body.as_bytes()).unwrap();

    assert_eq!(
        signature,
        "v0=a2114d57b48eac39b9ad189dd8316235a7b4a8d21a10bd27519666489c69b503"
    );
}

// ============================================================================
// Valid requests
// ============================================================================

#[tokio::test]
async fn test_valid_signature_and_fresh_timestamp_accepted() {
    let (verifier, store) = verifier();
    let request = signed_request("channel_name=ops&user_name=alice", now());

    let result = verifier.verify(&request).await;

    assert!(result.is_ok(), "expected success, got {:?}", result);
    assert_eq!(store.fetch_count(), 1);
}

#[tokio::test]
async fn test_timestamp_slightly_in_future_accepted() {
    let (verifier, _) = verifier();
    let request = signed_request("channel_name=ops", now() + 60);

    assert!(verifier.verify(&request).await.is_ok());
}

#[tokio::test]
async fn test_empty_body_can_be_verified() {
    let (verifier, _) = verifier();
    let request = signed_request("", now());

    assert!(verifier.verify(&request).await.is_ok());
}

// ============================================================================
// Missing or malformed headers
// ============================================================================

mod header_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_signature_rejected_without_fetching_secret() {
        let (verifier, store) = verifier();
        let ts = now().to_string();
        let request = request_with(None, Some(&ts), "user_name=alice");

        let result = verifier.verify(&request).await;

        assert!(matches!(
            result,
            Err(VerificationError::MissingHeaders { ref header, .. }) if header == DEFAULT_SIGNATURE_HEADER
        ));
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_timestamp_rejected() {
        let (verifier, store) = verifier();
        let request = request_with(Some("v0=abcd"), None, "user_name=alice");

        let result = verifier.verify(&request).await;

        assert!(matches!(
            result,
            Err(VerificationError::MissingHeaders { ref header, .. }) if header == DEFAULT_TIMESTAMP_HEADER
        ));
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_signature_without_version_prefix_rejected() {
        let (verifier, _) = verifier();
        let ts = now().to_string();
        let request = request_with(Some("sha256=abcd"), Some(&ts), "");

        let result = verifier.verify(&request).await;

        assert!(matches!(result, Err(VerificationError::MissingHeaders { .. })));
    }

    #[tokio::test]
    async fn test_non_hex_signature_rejected() {
        let (verifier, _) = verifier();
        let ts = now().to_string();
        let request = request_with(Some("v0=not-hex!"), Some(&ts), "");

        let result = verifier.verify(&request).await;

        assert!(matches!(result, Err(VerificationError::MissingHeaders { .. })));
    }

    #[tokio::test]
    async fn test_non_numeric_timestamp_rejected() {
        let (verifier, _) = verifier();
        let request = request_with(Some("v0=abcd"), Some("yesterday"), "");

        let result = verifier.verify(&request).await;

        assert!(matches!(result, Err(VerificationError::MissingHeaders { .. })));
    }

    #[tokio::test]
    async fn test_custom_header_names_are_honoured() {
        let store = Arc::new(InMemorySecretStore::with_secret(secret_name(), SECRET));
        let settings = VerifierSettings {
            signature_header: "X-Chat-Signature".to_string(),
            timestamp_header: "X-Chat-Timestamp".to_string(),
            ..VerifierSettings::default()
        };
        let verifier = RequestVerifier::new(store, secret_name(), settings);

        let ts = now().to_string();
        let body = "user_name=alice";
        let signature = compute_signature(SECRET.as_bytes(), &ts, body.as_bytes()).unwrap();
        let mut headers = HashMap::new();
        headers.insert("x-chat-signature".to_string(), signature);
        headers.insert("x-chat-timestamp".to_string(), ts);

        let result = verifier.verify(&SignedRequest::new(headers, body)).await;

        assert!(result.is_ok(), "expected success, got {:?}", result);
    }
}

// ============================================================================
// Replay protection
// ============================================================================

mod freshness_tests {
    use super::*;

    /// A correctly signed but old request must be rejected as stale.
    #[tokio::test]
    async fn test_stale_timestamp_rejected_even_with_valid_signature() {
        let (verifier, store) = verifier();
        let request = signed_request("channel_name=ops&user_name=alice", now() - 10 * 60);

        let result = verifier.verify(&request).await;

        assert!(matches!(
            result,
            Err(VerificationError::StaleTimestamp {
                window_seconds: 300,
                ..
            })
        ));
        assert_eq!(store.fetch_count(), 0, "stale requests must not fetch the secret");
    }

    #[tokio::test]
    async fn test_far_future_timestamp_rejected() {
        let (verifier, _) = verifier();
        let request = signed_request("channel_name=ops", now() + 10 * 60);

        let result = verifier.verify(&request).await;

        assert!(matches!(result, Err(VerificationError::StaleTimestamp { .. })));
    }

    #[tokio::test]
    async fn test_custom_window_applies() {
        let store = Arc::new(InMemorySecretStore::with_secret(secret_name(), SECRET));
        let settings = VerifierSettings {
            freshness_window: Duration::from_secs(30),
            ..VerifierSettings::default()
        };
        let verifier = RequestVerifier::new(store, secret_name(), settings);

        let request = signed_request("channel_name=ops", now() - 120);

        assert!(matches!(
            verifier.verify(&request).await,
            Err(VerificationError::StaleTimestamp {
                window_seconds: 30,
                ..
            })
        ));
    }
}

// ============================================================================
// Signature mismatches and secret failures
// ============================================================================

mod mismatch_tests {
    use super::*;

    #[tokio::test]
    async fn test_tampered_body_rejected() {
        let (verifier, _) = verifier();
        let ts = now().to_string();
        let signature = compute_signature(
            SECRET.as_bytes(),
            &ts,
            b"channel_name=ops&user_name=alice",
        )
        .unwrap();
        let request = request_with(
            Some(&signature),
            Some(&ts),
            "channel_name=ops&user_name=mallory",
        );

        let result = verifier.verify(&request).await;

        assert!(matches!(result, Err(VerificationError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn test_signature_from_wrong_secret_rejected() {
        let (verifier, _) = verifier();
        let ts = now().to_string();
        let body = "user_name=alice";
        let signature = compute_signature(b"other-secret", &ts, body.as_bytes()).unwrap();
        let request = request_with(Some(&signature), Some(&ts), body);

        let result = verifier.verify(&request).await;

        assert!(matches!(result, Err(VerificationError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn test_truncated_signature_rejected() {
        let (verifier, _) = verifier();
        let ts = now().to_string();
        let body = "user_name=alice";
        let signature = compute_signature(SECRET.as_bytes(), &ts, body.as_bytes()).unwrap();
        let request = request_with(Some(&signature[..21]), Some(&ts), body);

        let result = verifier.verify(&request).await;

        assert!(matches!(result, Err(VerificationError::SignatureMismatch)));
    }

    #[tokio::test]
    async fn test_rotated_secret_takes_effect_immediately() {
        let (verifier, store) = verifier();
        store.put(secret_name(), "rotated-secret").await;

        let request = signed_request("user_name=alice", now());

        assert!(matches!(
            verifier.verify(&request).await,
            Err(VerificationError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_unavailable_secret_store_reported() {
        let (verifier, store) = verifier();
        store.set_unavailable(true);

        let result = verifier.verify(&signed_request("user_name=alice", now())).await;

        let err = result.unwrap_err();
        assert!(matches!(err, VerificationError::SecretUnavailable(_)));
        assert!(err.is_server_error());
    }

    #[tokio::test]
    async fn test_unknown_secret_reported_as_unavailable() {
        let store = Arc::new(InMemorySecretStore::new());
        let verifier = verifier_with_store(store);

        let result = verifier.verify(&signed_request("user_name=alice", now())).await;

        assert!(matches!(
            result,
            Err(VerificationError::SecretUnavailable(SecretStoreError::NotFound { .. }))
        ));
    }
}

#[test]
fn test_verifier_debug_does_not_leak_secret() {
    let (verifier, _) = verifier();
    let output = format!("{:?}", verifier);
    assert!(!output.contains(SECRET));
}
