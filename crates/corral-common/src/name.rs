//! Group name validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CorralError, CorralResult};

/// A validated resource group name.
///
/// The name becomes a directory under the controller's namespace, so it
/// must:
/// - Be 1-64 characters long
/// - Contain only ASCII alphanumerics, `-`, `_` and `.`
/// - Start with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupName(String);

impl GroupName {
    /// Maximum length of a group name.
    pub const MAX_LENGTH: usize = 64;

    /// Create a new group name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidGroupName`] if the format is invalid.
    pub fn new(name: impl Into<String>) -> CorralResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> CorralResult<()> {
        let invalid = || CorralError::InvalidGroupName {
            name: name.to_string(),
        };

        if name.is_empty() || name.len() > Self::MAX_LENGTH {
            return Err(invalid());
        }

        // Also rules out "." and ".."
        if !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid());
        }

        Ok(())
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GroupName {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for GroupName {
    type Error = CorralError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GroupName> for String {
    fn from(name: GroupName) -> Self {
        name.0
    }
}

impl AsRef<str> for GroupName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn valid_group_names() {
        assert!(GroupName::new("quota-test").is_ok());
        assert!(GroupName::new("build_42").is_ok());
        assert!(GroupName::new("svc.worker").is_ok());
        assert!(GroupName::new("A").is_ok());
    }

    #[test]
    fn invalid_group_names() {
        assert!(GroupName::new("").is_err());
        assert!(GroupName::new(".").is_err());
        assert!(GroupName::new("..").is_err());
        assert!(GroupName::new("-leading").is_err());
        assert!(GroupName::new("a/b").is_err());
        assert!(GroupName::new("with space").is_err());
        assert!(GroupName::new("a".repeat(65)).is_err());
    }

    proptest! {
        #[test]
        fn accepted_names_never_escape_the_namespace(name in "\\PC{0,80}") {
            if let Ok(valid) = GroupName::new(name.clone()) {
                prop_assert!(!valid.as_str().contains('/'));
                prop_assert!(valid.as_str() != "." && valid.as_str() != "..");
                prop_assert!(valid.as_str().len() <= GroupName::MAX_LENGTH);
            }
        }

        #[test]
        fn well_formed_names_are_accepted(name in "[a-z0-9][a-z0-9._-]{0,63}") {
            prop_assert!(GroupName::new(name).is_ok());
        }
    }
}
