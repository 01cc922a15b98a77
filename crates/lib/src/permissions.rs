//! Declarative access policy for a database
//!
//! A [`PermissionsConfig`] states who may read and who may write. The policy
//! decides which credentials an opener uses ([`select_credentials`]) and
//! whether the database is end-to-end encrypted (owner-only read and write).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::account::Did;
use crate::database::DatabaseError;

/// Who an operation is open to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionOption {
    /// Only the owning DID
    #[default]
    Owner,
    /// Anyone
    Public,
    /// The owner plus the DIDs in the matching list
    Users,
}

impl PermissionOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionOption::Owner => "owner",
            PermissionOption::Public => "public",
            PermissionOption::Users => "users",
        }
    }
}

impl fmt::Display for PermissionOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(PermissionOption::Owner),
            "public" => Ok(PermissionOption::Public),
            "users" => Ok(PermissionOption::Users),
            other => Err(format!(
                "unknown permission '{other}', expected owner, public or users"
            )),
        }
    }
}

/// Read/write policy of one database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionsConfig {
    pub read: PermissionOption,
    pub write: PermissionOption,
    pub read_list: Vec<Did>,
    pub write_list: Vec<Did>,
}

impl PermissionsConfig {
    /// Owner-only read and write. Databases with this policy are encrypted.
    pub fn owner() -> Self {
        Self::default()
    }

    /// Anyone may read, only the owner may write.
    pub fn public_read() -> Self {
        Self {
            read: PermissionOption::Public,
            ..Self::default()
        }
    }

    /// Read and write restricted to the given DIDs (plus the owner).
    pub fn users(read_list: Vec<Did>, write_list: Vec<Did>) -> Self {
        Self {
            read: PermissionOption::Users,
            write: PermissionOption::Users,
            read_list,
            write_list,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.read == PermissionOption::Owner && self.write == PermissionOption::Owner
    }

    /// Replace the user lists, keeping the read/write options.
    pub fn with_users(mut self, read_list: Vec<Did>, write_list: Vec<Did>) -> Self {
        self.read_list = read_list;
        self.write_list = write_list;
        self
    }

    /// Apply per-call overrides on top of this policy.
    pub fn with_overrides(mut self, overrides: &PermissionsOverride) -> Self {
        if let Some(read) = overrides.read {
            self.read = read;
        }
        if let Some(write) = overrides.write {
            self.write = write;
        }
        if let Some(read_list) = &overrides.read_list {
            self.read_list = read_list.clone();
        }
        if let Some(write_list) = &overrides.write_list {
            self.write_list = write_list.clone();
        }
        self
    }

    /// Report conditions that are valid but probably unintended.
    ///
    /// Each warning is also logged.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.read == PermissionOption::Users && self.read_list.is_empty() {
            warnings.push("read is 'users' with an empty read list; only the owner can read".into());
        }
        if self.write == PermissionOption::Users && self.write_list.is_empty() {
            warnings
                .push("write is 'users' with an empty write list; only the owner can write".into());
        }
        if self.read != PermissionOption::Users && !self.read_list.is_empty() {
            warnings.push(format!("read list is ignored when read is '{}'", self.read));
        }
        if self.write != PermissionOption::Users && !self.write_list.is_empty() {
            warnings.push(format!("write list is ignored when write is '{}'", self.write));
        }
        for warning in &warnings {
            warn!(%warning, "Suspicious permissions");
        }
        warnings
    }

    /// Whether `did` may read a database owned by `owner`.
    pub fn can_read(&self, did: Option<&Did>, owner: &Did) -> bool {
        Self::allows(self.read, &self.read_list, did, owner)
    }

    /// Whether `did` may write a database owned by `owner`.
    pub fn can_write(&self, did: Option<&Did>, owner: &Did) -> bool {
        Self::allows(self.write, &self.write_list, did, owner)
    }

    fn allows(option: PermissionOption, list: &[Did], did: Option<&Did>, owner: &Did) -> bool {
        if did == Some(owner) {
            return true;
        }
        match option {
            PermissionOption::Owner => false,
            PermissionOption::Public => true,
            PermissionOption::Users => did.is_some_and(|did| list.contains(did)),
        }
    }
}

/// Partial policy merged over context defaults when opening a database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionsOverride {
    pub read: Option<PermissionOption>,
    pub write: Option<PermissionOption>,
    pub read_list: Option<Vec<Did>>,
    pub write_list: Option<Vec<Did>>,
}

impl From<PermissionsConfig> for PermissionsOverride {
    fn from(config: PermissionsConfig) -> Self {
        Self {
            read: Some(config.read),
            write: Some(config.write),
            read_list: Some(config.read_list),
            write_list: Some(config.write_list),
        }
    }
}

/// Which set of server credentials a connection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialScope {
    /// Full access, authenticated as the owning DID
    Owner,
    /// Anonymous read-only access
    Public,
}

impl fmt::Display for CredentialScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialScope::Owner => f.write_str("owner"),
            CredentialScope::Public => f.write_str("public"),
        }
    }
}

/// Pick the credentials an opener connects with.
///
/// Owners always use owner credentials. Anyone else can only connect when the
/// database is publicly readable.
pub fn select_credentials(
    permissions: &PermissionsConfig,
    is_owner: bool,
) -> Result<CredentialScope, DatabaseError> {
    if is_owner {
        return Ok(CredentialScope::Owner);
    }
    if permissions.read == PermissionOption::Public {
        return Ok(CredentialScope::Public);
    }
    Err(DatabaseError::PermissionDenied {
        reason: format!(
            "read access is '{}' and the caller is not the owner",
            permissions.read
        ),
    })
}
