#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Regression tests for intentmesh-security: AuditLog, HmacSigner, Sanitizer.

use intentmesh_core::Signer;
use intentmesh_security::{AuditLog, AuditOutcome, HmacSigner, Sanitizer};

// --- AuditLog ---

#[tokio::test]
async fn test_audit_log_writes_entries_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let log_dir = tmp.path().join("audit");
    let audit = AuditLog::new(log_dir.clone());

    for i in 0..5 {
        audit.log_action(
            format!("replicate_{i}"),
            Some(format!("intent-{i}")),
            serde_json::json!({"index": i}),
            AuditOutcome::Degraded,
        );
    }

    // Give the background task time to write
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let contents = tokio::fs::read_to_string(log_dir.join("audit.jsonl"))
        .await
        .unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 5);
    for (i, line) in lines.iter().enumerate() {
        let v: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(v["action"], format!("replicate_{i}"));
        assert_eq!(v["outcome"], "degraded");
    }
}

#[tokio::test]
async fn test_disabled_audit_log_is_silent() {
    let audit = AuditLog::disabled();
    audit.log_action("noop", None, serde_json::json!({}), AuditOutcome::Success);
}

// --- HmacSigner ---

#[tokio::test]
async fn test_signer_is_deterministic_per_key() {
    let signer = HmacSigner::new("did:key:me", b"k".to_vec()).unwrap();
    let a = signer.sign(b"same").await.unwrap();
    let b = signer.sign(b"same").await.unwrap();
    assert_eq!(a, b);
    assert_eq!(signer.identity(), "did:key:me");
}

// --- Sanitizer ---

#[test]
fn test_sanitizer_keeps_unicode() {
    let s = Sanitizer::default();
    let out = s.sanitize("Mudanza en Málaga 🚚").into_string().unwrap();
    assert_eq!(out, "Mudanza en Málaga 🚚");
}
