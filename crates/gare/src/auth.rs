// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Staff authentication: local database first, central fallback.
//!
//! Tokens are HMAC-SHA256-signed JSON claims. Lifetime follows
//! configuration (`JWT_EXPIRES_IN`, default 24 h). Verification is purely
//! local; the session table is authoritative, and central-side verification is
//! a future extension.
//!
//! Passwords are salted SHA-256 hashes. A staff record arrives from central
//! without a usable password hash, so the default is the hashed CIN.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use ring::hmac;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::central::protocol::SyncStaff;
use crate::central::CentralLink;
use crate::error::{NodeError, Result};
use crate::ids::{epoch_ms, is_valid_cin, new_id};
use crate::model::{Session, Staff, StaffPublic, StaffRole};
use crate::store::Store;

// -- Password hashing ---------------------------------------------------------

/// Hash a cleartext password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::rng().fill(&mut salt);
    let salt = URL_SAFE_NO_PAD.encode(salt);
    let digest = Sha256::digest(format!("{salt}:{password}").as_bytes());
    format!("v1${salt}${}", URL_SAFE_NO_PAD.encode(digest))
}

/// Check a cleartext password against a stored `v1$salt$digest` hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("v1"), Some(salt), Some(expected)) => {
            let digest = Sha256::digest(format!("{salt}:{password}").as_bytes());
            constant_time_eq(&URL_SAFE_NO_PAD.encode(digest), expected)
        }
        _ => false,
    }
}

/// Constant-time string comparison to prevent timing side-channel attacks.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

// -- Tokens -------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub staff_id: String,
    pub cin: String,
    pub role: StaffRole,
    pub station_id: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

/// Sign claims as `base64url(json).base64url(hmac)`.
pub fn sign_token(claims: &TokenClaims, secret: &[u8]) -> Result<String> {
    let json = serde_json::to_vec(claims)
        .map_err(|e| NodeError::ConfigInvalid(format!("token claims: {e}")))?;
    let payload = URL_SAFE_NO_PAD.encode(json);
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, payload.as_bytes());
    Ok(format!("{payload}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref())))
}

/// Verify the signature and decode the claims. Expiry is the caller's check.
pub fn decode_token(token: &str, secret: &[u8]) -> Option<TokenClaims> {
    let (payload, tag) = token.split_once('.')?;
    let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, payload.as_bytes(), &tag).ok()?;
    let json = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&json).ok()
}

// -- Verifier -----------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub staff: StaffPublic,
    /// True when the session was issued without central involvement.
    pub created_offline: bool,
}

pub struct AuthVerifier {
    store: Arc<Store>,
    /// Absent in tests that only exercise the local path.
    link: Option<Arc<CentralLink>>,
    secret: Vec<u8>,
    token_ttl: Duration,
    session_idle_timeout: Duration,
    station_id: String,
}

impl AuthVerifier {
    pub fn new(
        store: Arc<Store>,
        link: Option<Arc<CentralLink>>,
        secret: impl Into<Vec<u8>>,
        token_ttl: Duration,
        session_idle_timeout: Duration,
        station_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            link,
            secret: secret.into(),
            token_ttl,
            session_idle_timeout,
            station_id: station_id.into(),
        }
    }

    /// Staff login: local hash check, then central fallback when the link is
    /// authenticated. A new session deactivates the staff's prior sessions.
    pub async fn login(&self, cin: &str, password: &str) -> Result<LoginResponse> {
        if !is_valid_cin(cin) {
            return Err(NodeError::InvalidArgument("cin must be exactly 8 digits".into()));
        }

        match self.login_local(cin, password).await {
            Ok(response) => return Ok(response),
            Err(NodeError::Unauthorized) => {}
            Err(e) => return Err(e),
        }

        let Some(link) = self.link.as_ref().filter(|l| l.is_authenticated()) else {
            return Err(NodeError::Unauthorized);
        };
        debug!(cin, "local login failed, trying central");
        let reply = link.staff_login(cin, password).await?;
        let staff = reply
            .staff
            .ok_or_else(|| NodeError::CentralRejected("login reply without staff".into()))?;
        self.adopt_central_staff(staff, password, reply.token).await
    }

    async fn login_local(&self, cin: &str, password: &str) -> Result<LoginResponse> {
        let staff = self
            .store
            .read({
                let cin = cin.to_owned();
                move |t| t.staff_by_cin(&cin).cloned()
            })
            .await
            .ok_or(NodeError::Unauthorized)?;
        if !staff.is_active || !verify_password(password, &staff.password) {
            return Err(NodeError::Unauthorized);
        }

        let created_offline = !self.link.as_ref().is_some_and(|l| l.is_authenticated());
        self.open_session(&staff, None, created_offline).await
    }

    /// Store the centrally-confirmed staff locally and open its session.
    ///
    /// A local record already holding this CIN under a different id is the
    /// loser of the conflict: it goes away together with its sessions.
    async fn adopt_central_staff(
        &self,
        sync: SyncStaff,
        password: &str,
        central_token: Option<String>,
    ) -> Result<LoginResponse> {
        let password_hash = hash_password(password);
        let staff = self
            .store
            .transaction(move |t| {
                if let Some(existing) = t.staff_by_cin(&sync.cin) {
                    if existing.id != sync.id {
                        let loser = existing.id.clone();
                        t.staff.remove(&loser);
                        t.sessions.retain(|_, s| s.staff_id != loser);
                    }
                }
                let staff = Staff {
                    id: sync.id.clone(),
                    cin: sync.cin.clone(),
                    first_name: sync.first_name.clone(),
                    last_name: sync.last_name.clone(),
                    role: sync.role,
                    phone_number: sync.phone_number.clone(),
                    password: password_hash,
                    is_active: sync.is_active,
                    last_login: None,
                };
                t.staff.insert(staff.id.clone(), staff.clone());
                Ok(staff)
            })
            .await?;
        info!(staff = %staff.id, "staff adopted from central");
        self.open_session(&staff, central_token, false).await
    }

    async fn open_session(
        &self,
        staff: &Staff,
        central_token: Option<String>,
        created_offline: bool,
    ) -> Result<LoginResponse> {
        let now = epoch_ms();
        let expires_at = now + self.token_ttl.as_millis() as u64;
        let token = match central_token {
            Some(token) => token,
            None => sign_token(
                &TokenClaims {
                    staff_id: staff.id.clone(),
                    cin: staff.cin.clone(),
                    role: staff.role,
                    station_id: self.station_id.clone(),
                    issued_at: now,
                    expires_at,
                },
                &self.secret,
            )?,
        };

        let staff_id = staff.id.clone();
        let session_token = token.clone();
        let staff_data = serde_json::to_value(StaffPublic::from(staff)).unwrap_or_default();
        let public = self
            .store
            .transaction(move |t| {
                let staff = t
                    .staff
                    .get_mut(&staff_id)
                    .ok_or_else(|| NodeError::NotFound(format!("staff {staff_id}")))?;
                staff.last_login = Some(now);
                let public = StaffPublic::from(&*staff);

                t.deactivate_sessions_for(&staff_id);
                let session = Session {
                    id: new_id(),
                    staff_id,
                    token: session_token,
                    staff_data,
                    is_active: true,
                    last_activity: now,
                    expires_at,
                    created_offline,
                };
                t.sessions.insert(session.id.clone(), session);
                Ok(public)
            })
            .await?;

        Ok(LoginResponse { token, staff: public, created_offline })
    }

    /// Validate a token against the local session table, touching
    /// `last_activity`. Expired or idle sessions auto-deactivate.
    pub async fn verify_token(&self, token: &str) -> Result<StaffPublic> {
        let token = token.to_owned();
        let idle_cap = self.session_idle_timeout.as_millis() as u64;
        self.store
            .transaction(move |t| {
                let now = epoch_ms();
                let id = t
                    .session_by_token(&token)
                    .map(|s| s.id.clone())
                    .ok_or(NodeError::Unauthorized)?;
                let session = t.sessions.get_mut(&id).ok_or(NodeError::Unauthorized)?;
                if !session.is_active {
                    return Err(NodeError::Unauthorized);
                }
                if now >= session.expires_at
                    || now.saturating_sub(session.last_activity) > idle_cap
                {
                    session.is_active = false;
                    return Err(NodeError::Unauthorized);
                }
                session.last_activity = now;
                let staff_id = session.staff_id.clone();

                let staff = t
                    .staff
                    .get(&staff_id)
                    .filter(|s| s.is_active)
                    .ok_or(NodeError::Unauthorized)?;
                Ok(StaffPublic::from(staff))
            })
            .await
    }

    /// Rotate a staff password after checking the current one.
    pub async fn change_password(
        &self,
        staff_id: &str,
        current: &str,
        new_password: &str,
    ) -> Result<()> {
        if new_password.len() < 4 {
            return Err(NodeError::InvalidArgument("password too short".into()));
        }
        let staff_id = staff_id.to_owned();
        let current = current.to_owned();
        let new_hash = hash_password(new_password);
        self.store
            .transaction(move |t| {
                let staff = t
                    .staff
                    .get_mut(&staff_id)
                    .ok_or_else(|| NodeError::NotFound(format!("staff {staff_id}")))?;
                if !verify_password(&current, &staff.password) {
                    return Err(NodeError::Unauthorized);
                }
                staff.password = new_hash;
                Ok(())
            })
            .await
    }

    /// Deactivate every active session carrying this token.
    pub async fn logout(&self, token: &str) -> Result<usize> {
        let token = token.to_owned();
        self.store
            .transaction(move |t| {
                let mut n = 0;
                for session in t.sessions.values_mut() {
                    if session.token == token && session.is_active {
                        session.is_active = false;
                        n += 1;
                    }
                }
                Ok(n)
            })
            .await
    }

    /// Deactivate sessions past their expiry. Run periodically.
    pub async fn sweep_expired_sessions(&self) -> Result<usize> {
        self.store
            .transaction(|t| {
                let now = epoch_ms();
                let mut n = 0;
                for session in t.sessions.values_mut() {
                    if session.is_active && now >= session.expires_at {
                        session.is_active = false;
                        n += 1;
                    }
                }
                Ok(n)
            })
            .await
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
