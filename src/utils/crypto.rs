//! Identifiers and hashing for the Vaultline protocol.
//!
//! - Addresses (20-byte account identifiers)
//! - Vault IDs (SHA256 of owner and nonce)
//! - Hashes (SHA256)

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{Error, Result};
use crate::utils::constants::{ADDRESS_LENGTH, HASH_LENGTH, VAULT_ID_LENGTH};

/// Hex string (de)serialization for fixed-size byte identifiers
macro_rules! impl_hex_serde {
    ($ty:ident, $len:expr) => {
        impl Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $ty::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }

        impl $ty {
            /// Parse from a hex string (optional `0x` prefix)
            pub fn from_hex(s: &str) -> Result<Self> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s).map_err(|e| Error::InvalidParameter {
                    name: stringify!($ty).into(),
                    reason: e.to_string(),
                })?;
                if bytes.len() != $len {
                    return Err(Error::InvalidParameter {
                        name: stringify!($ty).into(),
                        reason: format!("expected {} bytes, got {}", $len, bytes.len()),
                    });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }

            /// Convert to hex string
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Short representation for display
            pub fn short(&self) -> String {
                let hex = self.to_hex();
                format!("{}...{}", &hex[..6], &hex[hex.len() - 4..])
            }
        }
    };
}

// ═══════════════════════════════════════════════════════════════════════════════
// HASH
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte SHA256 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash([u8; HASH_LENGTH]);

impl_hex_serde!(Hash, HASH_LENGTH);

impl Hash {
    /// Create a new hash from bytes
    pub fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Compute SHA256 hash of data
    pub fn sha256(data: &[u8]) -> Self {
        let result = Sha256::digest(data);
        let mut bytes = [0u8; HASH_LENGTH];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Get the hash as bytes
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS
// ═══════════════════════════════════════════════════════════════════════════════

/// Account identifier for depositors, borrowers, front ends and system accounts
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl_hex_serde!(Address, ADDRESS_LENGTH);

impl Address {
    /// Create an address from raw bytes
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Deterministic address derived from a human-readable label.
    ///
    /// Used by the simulator and tests to name accounts (`"alice"`, `"frontend-1"`).
    pub fn from_label(label: &str) -> Self {
        let hash = Hash::sha256(label.as_bytes());
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&hash.as_bytes()[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    /// Address of an internal protocol account
    pub fn system(name: &str) -> Self {
        Self::from_label(&format!("vaultline:system:{}", name))
    }

    /// Get the address as bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VAULT ID
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a vault
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VaultId([u8; VAULT_ID_LENGTH]);

impl_hex_serde!(VaultId, VAULT_ID_LENGTH);

impl VaultId {
    /// Create a new vault ID from bytes
    pub fn new(bytes: [u8; VAULT_ID_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Generate a vault ID from owner address and nonce
    pub fn generate(owner: &Address, nonce: u64) -> Self {
        let mut data = Vec::with_capacity(ADDRESS_LENGTH + 8);
        data.extend_from_slice(owner.as_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        let hash = Hash::sha256(&data);
        Self(*hash.as_bytes())
    }

    /// Get the vault ID as bytes
    pub fn as_bytes(&self) -> &[u8; VAULT_ID_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultId({})", self.short())
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_sha256() {
        let hash = Hash::sha256(b"hello world");
        assert_eq!(
            hash.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_address_from_label_is_deterministic() {
        assert_eq!(Address::from_label("alice"), Address::from_label("alice"));
        assert_ne!(Address::from_label("alice"), Address::from_label("bob"));
        assert_ne!(Address::system("active_pool"), Address::from_label("active_pool"));
    }

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address::from_label("carol");
        let parsed = Address::from_hex(&addr.to_string()).unwrap();
        assert_eq!(addr, parsed);
        assert!(Address::from_hex("0x1234").is_err());
    }

    #[test]
    fn test_vault_id_generation() {
        let owner = Address::from_label("alice");
        let id1 = VaultId::generate(&owner, 0);
        let id2 = VaultId::generate(&owner, 1);
        assert_ne!(id1, id2);
        assert_eq!(id1, VaultId::generate(&owner, 0));
        assert_eq!(id1.short().len(), 13);
    }

    #[test]
    fn test_vault_id_serde_json() {
        let id = VaultId::generate(&Address::from_label("dave"), 7);
        let json = serde_json::to_string(&id).unwrap();
        let back: VaultId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
