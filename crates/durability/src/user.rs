//! Commit author

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name and email recorded on commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

impl User {
    /// Build a user
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// `Name <email>`
    pub fn author(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new("gitstore", "gitstore@localhost")
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.author())
    }
}
