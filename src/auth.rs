//! Account directory: turns a login into a [`Role`].
//!
//! The gateway trusts whatever role it is handed; this is the step that
//! decides it.

use crate::config::AccountConfig;
use crate::core::{ConsoleError, Result};
use crate::gateway::Role;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
struct Account {
    secret: String,
    role: Role,
}

/// Known accounts, keyed by username.
#[derive(Debug, Clone, Default)]
pub struct AccountDirectory {
    accounts: HashMap<String, Account>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        AccountDirectory::default()
    }

    /// Builds the directory from configuration.
    ///
    /// # Errors
    ///
    /// `ConsoleError::Config` when a username appears twice or is empty.
    pub fn from_config(accounts: &[AccountConfig]) -> Result<Self> {
        let mut directory = AccountDirectory::new();
        for account in accounts {
            directory.add(&account.username, &account.secret, account.role)?;
        }
        Ok(directory)
    }

    pub fn add(&mut self, username: &str, secret: &str, role: Role) -> Result<()> {
        if username.trim().is_empty() {
            return Err(ConsoleError::Config("account with an empty username".to_string()));
        }
        if self.accounts.contains_key(username) {
            return Err(ConsoleError::Config(format!("duplicate account '{}'", username)));
        }
        self.accounts.insert(
            username.to_string(),
            Account {
                secret: secret.to_string(),
                role,
            },
        );
        Ok(())
    }

    /// Returns the role for a matching username/secret pair.
    pub fn authenticate(&self, username: &str, secret: &str) -> Option<Role> {
        match self.accounts.get(username) {
            Some(account) if account.secret == secret => {
                info!(username, role = %account.role, "login succeeded");
                Some(account.role)
            }
            _ => {
                warn!(username, "login rejected");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
