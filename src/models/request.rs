use std::fmt;

use crate::errors::ProvisionError;

pub const MIN_NAME_LEN: usize = 3;
pub const MAX_NAME_LEN: usize = 24;

/// URL query parameters of a provisioning request. Both are required;
/// they are optional here so a missing one can be reported by name.
#[derive(Debug, Default, Clone)]
pub struct ProvisionParams {
    pub owning_group_object_id: Option<String>,
    pub keyvault_name: Option<String>,
}

/// A validated provisioning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    pub keyvault_name: KeyVaultName,
    pub owning_group_object_id: String,
}

impl ProvisionParams {
    /// Parse from a raw query string. The first occurrence of a key wins;
    /// unknown keys are ignored.
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            let slot = match &*key {
                "owning_group_object_id" => &mut params.owning_group_object_id,
                "keyvault_name" => &mut params.keyvault_name,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    /// Checks presence first (group id, then name), then the name rules.
    pub fn validate(self) -> Result<ProvisionRequest, ProvisionError> {
        let owning_group_object_id =
            self.owning_group_object_id.ok_or(ProvisionError::MissingParameter {
                parameter: "owning_group_object_id",
            })?;
        let keyvault_name = self.keyvault_name.ok_or(ProvisionError::MissingParameter {
            parameter: "keyvault_name",
        })?;

        Ok(ProvisionRequest {
            keyvault_name: KeyVaultName::parse(keyvault_name)?,
            owning_group_object_id,
        })
    }
}

/// A vault name that satisfies Key Vault's naming rules:
/// lowercase ASCII letters, digits and `-`, 3 to 24 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyVaultName(String);

impl KeyVaultName {
    pub fn parse(name: impl Into<String>) -> Result<Self, ProvisionError> {
        let name = name.into();

        let invalid_chars: Vec<char> = name.chars().filter(|c| !is_allowed(*c)).collect();
        if !invalid_chars.is_empty() {
            return Err(ProvisionError::InvalidName {
                keyvault_name: name,
                invalid_chars,
            });
        }

        // ASCII only past this point
        let length = name.chars().count();
        if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&length) {
            return Err(ProvisionError::InvalidNameLength {
                keyvault_name: name,
                length,
            });
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
}

impl fmt::Display for KeyVaultName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KeyVaultName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
