// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::NodeError;
use crate::test_support::{staff, TEST_STATION_ID};

const SECRET: &[u8] = b"test-secret";

fn verifier(store: Arc<Store>) -> AuthVerifier {
    AuthVerifier::new(
        store,
        None,
        SECRET,
        Duration::from_secs(24 * 3600),
        Duration::from_secs(8 * 3600),
        TEST_STATION_ID,
    )
}

async fn store_with_staff(cin: &str) -> Arc<Store> {
    let store = Arc::new(Store::in_memory());
    let cin = cin.to_owned();
    let seeded: crate::error::Result<()> = store
        .transaction(move |t| {
            let s = staff("staff-1", &cin, StaffRole::Worker);
            t.staff.insert(s.id.clone(), s);
            Ok(())
        })
        .await;
    assert!(seeded.is_ok());
    store
}

#[test]
fn password_hash_round_trip() {
    let hash = hash_password("secret123");
    assert!(hash.starts_with("v1$"));
    assert!(verify_password("secret123", &hash));
    assert!(!verify_password("secret124", &hash));
    assert!(!verify_password("secret123", "garbage"));
}

#[test]
fn hashes_are_salted() {
    assert_ne!(hash_password("same"), hash_password("same"));
}

#[test]
fn token_sign_and_decode() -> anyhow::Result<()> {
    let claims = TokenClaims {
        staff_id: "staff-1".into(),
        cin: "12345678".into(),
        role: StaffRole::Supervisor,
        station_id: TEST_STATION_ID.into(),
        issued_at: 1,
        expires_at: 2,
    };
    let token = sign_token(&claims, SECRET).map_err(|e| anyhow::anyhow!("{e}"))?;
    let decoded = decode_token(&token, SECRET).ok_or_else(|| anyhow::anyhow!("decode failed"))?;
    assert_eq!(decoded.staff_id, "staff-1");
    assert_eq!(decoded.role, StaffRole::Supervisor);

    // Tampering and wrong keys fail verification.
    assert!(decode_token(&token, b"other-secret").is_none());
    let tampered = format!("{token}x");
    assert!(decode_token(&tampered, SECRET).is_none());
    Ok(())
}

#[tokio::test]
async fn local_login_issues_session_with_default_cin_password() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));

    // Default password is the CIN.
    let response = auth.login("12345678", "12345678").await?;
    assert_eq!(response.staff.id, "staff-1");
    assert!(response.created_offline, "no link configured: session is offline-issued");

    let session_count = store
        .read(|t| t.sessions.values().filter(|s| s.is_active).count())
        .await;
    assert_eq!(session_count, 1);

    let last_login = store
        .read(|t| t.staff.get("staff-1").and_then(|s| s.last_login))
        .await;
    assert!(last_login.is_some());
    Ok(())
}

#[tokio::test]
async fn second_login_deactivates_prior_session() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));

    let first = auth.login("12345678", "12345678").await?;
    let second = auth.login("12345678", "12345678").await?;
    assert_ne!(first.token, second.token);

    assert!(matches!(auth.verify_token(&first.token).await, Err(NodeError::Unauthorized)));
    let verified = auth.verify_token(&second.token).await?;
    assert_eq!(verified.id, "staff-1");
    Ok(())
}

#[tokio::test]
async fn login_rejects_bad_cin_wrong_password_and_inactive_staff() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));

    assert!(matches!(
        auth.login("123", "pw").await,
        Err(NodeError::InvalidArgument(_))
    ));
    assert!(matches!(
        auth.login("12345678", "wrong").await,
        Err(NodeError::Unauthorized)
    ));
    assert!(matches!(
        auth.login("99999999", "whatever").await,
        Err(NodeError::Unauthorized)
    ));

    store
        .transaction(|t| {
            if let Some(s) = t.staff.get_mut("staff-1") {
                s.is_active = false;
            }
            Ok(())
        })
        .await?;
    assert!(matches!(
        auth.login("12345678", "12345678").await,
        Err(NodeError::Unauthorized)
    ));
    Ok(())
}

#[tokio::test]
async fn verify_token_touches_activity_and_expires() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));
    let login = auth.login("12345678", "12345678").await?;

    auth.verify_token(&login.token).await?;

    // Force the session past its expiry; verification deactivates it.
    store
        .transaction(|t| {
            for s in t.sessions.values_mut() {
                s.expires_at = 1;
            }
            Ok(())
        })
        .await?;
    assert!(matches!(auth.verify_token(&login.token).await, Err(NodeError::Unauthorized)));
    let active = store
        .read(|t| t.sessions.values().filter(|s| s.is_active).count())
        .await;
    assert_eq!(active, 0);

    assert!(matches!(auth.verify_token("no-such-token").await, Err(NodeError::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn verify_token_rejects_inactive_staff() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));
    let login = auth.login("12345678", "12345678").await?;

    store
        .transaction(|t| {
            if let Some(s) = t.staff.get_mut("staff-1") {
                s.is_active = false;
            }
            Ok(())
        })
        .await?;
    assert!(matches!(auth.verify_token(&login.token).await, Err(NodeError::Unauthorized)));
    Ok(())
}

#[tokio::test]
async fn change_password_then_login_with_new_one() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));

    assert!(matches!(
        auth.change_password("staff-1", "wrong", "newpass").await,
        Err(NodeError::Unauthorized)
    ));
    assert!(matches!(
        auth.change_password("staff-1", "12345678", "abc").await,
        Err(NodeError::InvalidArgument(_))
    ));

    auth.change_password("staff-1", "12345678", "newpass").await?;
    assert!(matches!(
        auth.login("12345678", "12345678").await,
        Err(NodeError::Unauthorized)
    ));
    auth.login("12345678", "newpass").await?;
    Ok(())
}

#[tokio::test]
async fn logout_deactivates_the_session() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));
    let login = auth.login("12345678", "12345678").await?;

    let n = auth.logout(&login.token).await?;
    assert_eq!(n, 1);
    assert!(matches!(auth.verify_token(&login.token).await, Err(NodeError::Unauthorized)));

    // Logging out an unknown token is a no-op.
    let n = auth.logout("missing").await?;
    assert_eq!(n, 0);
    Ok(())
}

#[tokio::test]
async fn sweeper_deactivates_expired_sessions() -> anyhow::Result<()> {
    let store = store_with_staff("12345678").await;
    let auth = verifier(Arc::clone(&store));
    auth.login("12345678", "12345678").await?;

    assert_eq!(auth.sweep_expired_sessions().await?, 0);
    store
        .transaction(|t| {
            for s in t.sessions.values_mut() {
                s.expires_at = 1;
            }
            Ok(())
        })
        .await?;
    assert_eq!(auth.sweep_expired_sessions().await?, 1);
    Ok(())
}
