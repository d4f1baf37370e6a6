// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command identity hashing

use sha2::{Digest, Sha256};
use std::path::Path;

/// SHA-256 of the argv tokens joined by NUL, hex-encoded.
///
/// NUL cannot appear inside an argv token, so the join is unambiguous:
/// `["ab", "c"]` and `["a", "bc"]` hash differently.
pub fn command_signature(command: &[String]) -> String {
    let mut hasher = Sha256::new();
    for (i, arg) in command.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(arg.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Registry lookup key: `signature ⧺ NUL ⧺ workdir`.
pub fn index_key(signature: &str, workdir: &Path) -> String {
    format!("{}\0{}", signature, workdir.display())
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
