// Copyright 2025 KohakuHub Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Derivation of versioned-store repository names.
//!
//! The versioned object store restricts repository names to
//! `^[a-z0-9][a-z0-9-]{2,62}$`, so a hub repo id like `org/My_Model.v2`
//! cannot be used directly. Every hub repo maps to
//! `{type_char}-{sanitized_id[:38]}-{hash22}` where the 22-char suffix is
//! the base36 encoding of a 112-bit hash of the ORIGINAL full id.
//!
//! The hash is mandatory: sanitization collapses distinct ids
//! (`my_repo` and `my.repo` both become `my-repo`) and only the hash of
//! the unsanitized id keeps them apart.

use sha3::{Digest, Sha3_224};

use crate::RepoType;

const SANITIZED_MAX: usize = 38;
const HASH_CHARS: usize = 22;

/// Sanitize a repo id to store-safe characters: lowercase alphanumerics
/// and hyphens, runs collapsed, edges trimmed.
fn sanitize_repo_id(repo_id: &str) -> String {
    let mut out = String::with_capacity(repo_id.len());
    let mut last_dash = false;
    for c in repo_id.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

/// SHA3-224 of the input folded to 112 bits by XORing the two halves.
fn hash_to_112bit(data: &str) -> u128 {
    let digest = Sha3_224::digest(data.as_bytes());
    let mut half1 = [0u8; 16];
    let mut half2 = [0u8; 16];
    // 28-byte digest splits into two 14-byte (112-bit) halves.
    half1[2..].copy_from_slice(&digest[..14]);
    half2[2..].copy_from_slice(&digest[14..]);
    u128::from_be_bytes(half1) ^ u128::from_be_bytes(half2)
}

/// Encode to lowercase base36 (alphabet 0-9a-z).
fn base36_encode(mut num: u128) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while num > 0 {
        out.push(ALPHABET[(num % 36) as usize]);
        num /= 36;
    }
    out.iter().rev().map(|&b| b as char).collect()
}

/// Versioned-store repository name for a hub repo.
///
/// Layout: 1 type char + up to 38 sanitized chars + 22 hash chars plus two
/// separators, 63 chars at most.
pub fn vos_repo_name(repo_type: RepoType, full_id: &str) -> String {
    let mut safe_id = sanitize_repo_id(full_id);
    safe_id.truncate(SANITIZED_MAX);

    // Hash the ORIGINAL id, not the sanitized one.
    let hash_b36 = base36_encode(hash_to_112bit(full_id));
    debug_assert!(hash_b36.len() <= HASH_CHARS);
    let hash_suffix = format!("{hash_b36:0>22}");

    format!("{}-{}-{}", repo_type.type_char(), safe_id, hash_suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_shape_is_store_safe() {
        let name = vos_repo_name(RepoType::Model, "org/My_Model.v2");
        assert!(name.len() <= 63);
        assert!(name.starts_with("m-org-my-model-v2-"));
        let mut chars = name.chars();
        let first = chars.next().unwrap();
        assert!(first.is_ascii_lowercase() || first.is_ascii_digit());
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn hash_disambiguates_sanitization_collisions() {
        // Both sanitize to "org-my-repo" but must map to different stores.
        let a = vos_repo_name(RepoType::Model, "org/my_repo");
        let b = vos_repo_name(RepoType::Model, "org/my.repo");
        assert_ne!(a, b);
    }

    #[test]
    fn long_ids_truncate_but_stay_unique() {
        let long_a = format!("org/{}", "a".repeat(100));
        let long_b = format!("org/{}b", "a".repeat(100));
        let a = vos_repo_name(RepoType::Dataset, &long_a);
        let b = vos_repo_name(RepoType::Dataset, &long_b);
        assert!(a.len() <= 63);
        assert!(b.len() <= 63);
        assert_ne!(a, b);
        assert!(a.starts_with("d-"));
    }

    #[test]
    fn truncation_keeps_a_boundary_hyphen() {
        // Sanitized form is "org-" + 33*'a' + "-x"; the 38-char cut
        // lands exactly on the hyphen, which stays put.
        let full_id = format!("org/{}_x", "a".repeat(33));
        let expected_prefix = format!("m-org-{}-", "a".repeat(33));
        let name = vos_repo_name(RepoType::Model, &full_id);
        assert!(name.starts_with(&expected_prefix));
        // 1 type char + 38 sanitized + 22 hash + 2 separators.
        assert_eq!(name.len(), 63);
    }

    #[test]
    fn hash_suffix_is_22_chars() {
        let name = vos_repo_name(RepoType::Space, "u/n");
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 22);
    }

    #[test]
    fn base36_zero_pads() {
        assert_eq!(base36_encode(0), "0");
        assert_eq!(base36_encode(35), "z");
        assert_eq!(base36_encode(36), "10");
    }
}
