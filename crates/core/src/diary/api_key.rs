//! API keys: generation, hashing and permission checks.
//!
//! Only the SHA-256 hash of a key is stored. The plaintext is handed to the
//! caller once, when the key is created.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::serde::deserialize_optional_string;

/// Prefix of every generated key.
pub const KEY_PREFIX: &str = "hst_";

/// One of the six grantable scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    ReadOwnUricAcid,
    WriteOwnUricAcid,
    ReadOwnMeals,
    WriteOwnMeals,
    ReadAllUricAcid,
    ReadAllMeals,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::ReadOwnUricAcid,
        Permission::WriteOwnUricAcid,
        Permission::ReadOwnMeals,
        Permission::WriteOwnMeals,
        Permission::ReadAllUricAcid,
        Permission::ReadAllMeals,
    ];

    /// Column holding this flag in `api_keys`.
    pub fn column(&self) -> &'static str {
        match self {
            Permission::ReadOwnUricAcid => "can_read_own_uric_acid",
            Permission::WriteOwnUricAcid => "can_write_own_uric_acid",
            Permission::ReadOwnMeals => "can_read_own_meals",
            Permission::WriteOwnMeals => "can_write_own_meals",
            Permission::ReadAllUricAcid => "can_read_all_uric_acid",
            Permission::ReadAllMeals => "can_read_all_meals",
        }
    }

    /// The broader scope that also grants this one, if any.
    fn implied_by(&self) -> Option<Permission> {
        match self {
            Permission::ReadOwnUricAcid => Some(Permission::ReadAllUricAcid),
            Permission::ReadOwnMeals => Some(Permission::ReadAllMeals),
            _ => None,
        }
    }
}

/// The six permission flags of a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyPermissions {
    #[serde(default)]
    pub can_read_own_uric_acid: bool,
    #[serde(default)]
    pub can_write_own_uric_acid: bool,
    #[serde(default)]
    pub can_read_own_meals: bool,
    #[serde(default)]
    pub can_write_own_meals: bool,
    #[serde(default)]
    pub can_read_all_uric_acid: bool,
    #[serde(default)]
    pub can_read_all_meals: bool,
}

impl ApiKeyPermissions {
    /// The raw flag, without implications.
    pub fn flag(&self, permission: Permission) -> bool {
        match permission {
            Permission::ReadOwnUricAcid => self.can_read_own_uric_acid,
            Permission::WriteOwnUricAcid => self.can_write_own_uric_acid,
            Permission::ReadOwnMeals => self.can_read_own_meals,
            Permission::WriteOwnMeals => self.can_write_own_meals,
            Permission::ReadAllUricAcid => self.can_read_all_uric_acid,
            Permission::ReadAllMeals => self.can_read_all_meals,
        }
    }

    pub fn is_empty(&self) -> bool {
        !Permission::ALL.iter().any(|p| self.flag(*p))
    }

    /// Whether any cross-user scope is granted.
    pub fn has_all_scope(&self) -> bool {
        self.can_read_all_uric_acid || self.can_read_all_meals
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    #[serde(skip_serializing, default)]
    pub key_hash: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(flatten)]
    pub permissions: ApiKeyPermissions,
    pub created_by: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// A freshly created key together with its plaintext, which is not
/// recoverable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedApiKey {
    #[serde(flatten)]
    pub api_key: ApiKey,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewApiKey {
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub permissions: ApiKeyPermissions,
    #[serde(default, deserialize_with = "deserialize_optional_string")]
    pub created_by: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl NewApiKey {
    pub fn new(name: impl Into<String>, permissions: ApiKeyPermissions) -> Self {
        Self {
            name: name.into(),
            description: None,
            permissions,
            created_by: None,
            is_active: true,
        }
    }
}

/// Full replacement of a key's editable fields.
pub type ApiKeyUpdate = NewApiKey;

/// Generates a new plaintext key: `hst_` followed by 32 hex characters.
pub fn generate_key() -> String {
    let secret: u128 = rand::rng().random();
    format!("{KEY_PREFIX}{secret:032x}")
}

/// Lowercase hex SHA-256 of a plaintext key.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether an active key grants `permission`.
///
/// A cross-user read scope also grants the matching own-data read scope.
/// Write scopes are only ever granted by their own flag.
pub fn has_permission(key: &ApiKey, permission: Permission) -> bool {
    if !key.is_active {
        return false;
    }
    key.permissions.flag(permission)
        || permission
            .implied_by()
            .is_some_and(|broader| key.permissions.flag(broader))
}

/// Whether an active key may touch data belonging to `requested_guid`.
///
/// Keys with a cross-user scope may access any user. Other keys only reach
/// the data of the guid they were presented with.
pub fn can_access_user_data(key: &ApiKey, caller_guid: &str, requested_guid: &str) -> bool {
    if !key.is_active {
        return false;
    }
    key.permissions.has_all_scope() || caller_guid == requested_guid
}
