//! Normalized roster types exchanged between the sync core and the gateways.
//!
//! Both directories are reduced to these shapes before the core ever sees
//! them; attribute names on the wire (LDAP `mail`, `cn`, `sn`) stay inside
//! the target gateway and the [`TargetRecord`] struct.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user as reported by the upstream identity source.
///
/// Produced fresh on every roster fetch; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUser {
    /// Opaque upstream primary key.
    pub id: String,
    /// Stable identifier used to correlate with the target directory.
    pub identifier: String,
    /// Email address, empty when unset upstream.
    #[serde(default)]
    pub email: String,
    /// Display name, empty when unset upstream.
    #[serde(default)]
    pub display_name: String,
    /// Whether the account is active upstream.
    pub active: bool,
    /// Whether a credential has been set for the account.
    ///
    /// Accounts without a credential are intentionally excluded from
    /// downstream provisioning.
    pub has_credential: bool,
    /// Optional upstream attributes (phone, title, department, ...).
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl SourceUser {
    /// Display name with fallback to the identifier when blank.
    pub fn display_name_or_identifier(&self) -> &str {
        if self.display_name.is_empty() {
            &self.identifier
        } else {
            &self.display_name
        }
    }

    /// Surname derived from the display name.
    ///
    /// The last whitespace-delimited token of the display name, or the
    /// identifier when the display name is absent.
    pub fn surname(&self) -> &str {
        if self.display_name.is_empty() {
            return &self.identifier;
        }
        self.display_name
            .split_whitespace()
            .last()
            .unwrap_or(&self.identifier)
    }

    /// First given-name token of the display name, identifier when blank.
    pub fn given_name(&self) -> &str {
        self.display_name
            .split_whitespace()
            .next()
            .unwrap_or(&self.identifier)
    }
}

/// A group as reported by the upstream identity source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceGroup {
    /// Opaque upstream primary key.
    pub id: String,
    /// Group name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}

/// An entry as reported by the downstream target directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRecord {
    /// Stable identifier (uid attribute).
    pub identifier: String,
    /// Distinguished name of the entry.
    pub dn: String,
    /// Mail attribute, empty when unset.
    #[serde(default)]
    pub mail: String,
    /// Common name attribute, empty when unset.
    #[serde(default)]
    pub cn: String,
    /// Surname attribute, empty when unset.
    #[serde(default)]
    pub sn: String,
    /// Given name attribute, empty when unset.
    #[serde(default)]
    pub given_name: String,
    /// Groups the entry belongs to.
    #[serde(default)]
    pub member_of: Vec<String>,
}

/// A new entry to create in the target directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTargetEntry {
    /// Stable identifier (uid attribute).
    pub identifier: String,
    /// Common name.
    pub cn: String,
    /// Surname.
    pub sn: String,
    /// Given name.
    pub given_name: String,
    /// Mail attribute.
    pub mail: String,
    /// Extra attributes already mapped to target attribute names.
    #[serde(default)]
    pub extra_attributes: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(identifier: &str, display_name: &str) -> SourceUser {
        SourceUser {
            id: "1".to_string(),
            identifier: identifier.to_string(),
            email: String::new(),
            display_name: display_name.to_string(),
            active: true,
            has_credential: true,
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(user("jdoe", "Jane Doe").display_name_or_identifier(), "Jane Doe");
        assert_eq!(user("jdoe", "").display_name_or_identifier(), "jdoe");
    }

    #[test]
    fn test_surname_derivation() {
        assert_eq!(user("jdoe", "Jane Doe").surname(), "Doe");
        assert_eq!(user("jdoe", "Jane van der Berg").surname(), "Berg");
        assert_eq!(user("jdoe", "").surname(), "jdoe");
        assert_eq!(user("jdoe", "Cher").surname(), "Cher");
    }

    #[test]
    fn test_given_name_derivation() {
        assert_eq!(user("jdoe", "Jane Doe").given_name(), "Jane");
        assert_eq!(user("jdoe", "").given_name(), "jdoe");
    }
}
