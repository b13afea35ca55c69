// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Time and identifier helpers: wall-clock epoch millis, record ids,
//! passenger ticket codes, and correlation ids for central request frames.

use rand::Rng;

/// Alphabet for ticket verification codes: base36 uppercase.
const TICKET_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a ticket verification code.
pub const TICKET_CODE_LEN: usize = 6;

/// Return current UTC time as milliseconds since the Unix epoch.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a unique record id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a 6-character base36 uppercase ticket code.
///
/// Uniqueness is enforced at insert time; callers retry on collision.
pub fn ticket_code() -> String {
    let mut rng = rand::rng();
    (0..TICKET_CODE_LEN)
        .map(|_| {
            let idx = rng.random_range(0..TICKET_ALPHABET.len());
            char::from(TICKET_ALPHABET[idx])
        })
        .collect()
}

/// Whether `code` has the shape of a ticket code (`^[A-Z0-9]{6}$`).
pub fn is_ticket_code(code: &str) -> bool {
    code.len() == TICKET_CODE_LEN
        && code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Correlation id for request-style central frames: `kind_<unixMs>_<rand>`.
pub fn message_id(kind: &str) -> String {
    let rand: u32 = rand::rng().random_range(0..1_000_000);
    format!("{kind}_{}_{rand:06}", epoch_ms())
}

/// Whether `cin` is a valid national id number: exactly 8 ASCII digits.
pub fn is_valid_cin(cin: &str) -> bool {
    cin.len() == 8 && cin.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
#[path = "ids_tests.rs"]
mod tests;
