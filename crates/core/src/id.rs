// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job and run identifiers

use rand::RngCore;

/// Define a newtype ID wrapper around `String`.
///
/// Generates `new()`, `as_str()`, `Display`, `From<String>`, `From<&str>`,
/// `PartialEq<str>`, `PartialEq<&str>`, and `Borrow<str>` implementations.
#[macro_export]
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        pub struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Stable identity of a job within a live daemon.
    ///
    /// Three base62 characters, minted from cryptographic randomness and
    /// unique among the daemon's live jobs.
    pub struct JobId;
}

define_id! {
    /// Identity of one execution of a job, `"{job_id}-{seq}"`.
    pub struct RunId;
}

impl RunId {
    /// Compose a run id from its job and sequence number.
    pub fn compose(job_id: &JobId, seq: u64) -> Self {
        Self(format!("{}-{}", job_id, seq))
    }
}

/// Alphabet for job ids: 0-9, A-Z, a-z.
pub const ID_ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Fixed job-id length (62^3 ≈ 238k combinations).
pub const JOB_ID_LEN: usize = 3;

/// Mint a fresh job id from the OS random source.
///
/// Candidates colliding with a live id (per `taken`) are rejected and
/// re-drawn; termination is guaranteed while the live population is far
/// below 62^3.
pub fn mint_job_id(taken: impl Fn(&str) -> bool) -> String {
    mint_job_id_with(&mut rand::rngs::OsRng, taken)
}

/// Mint a job id using the provided random source (tests inject a seeded rng).
pub fn mint_job_id_with(rng: &mut impl RngCore, taken: impl Fn(&str) -> bool) -> String {
    loop {
        let mut bytes = [0u8; JOB_ID_LEN];
        rng.fill_bytes(&mut bytes);
        let candidate: String = bytes
            .iter()
            .map(|b| ID_ALPHABET[*b as usize % ID_ALPHABET.len()] as char)
            .collect();
        if !taken(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
