//! Public vs. protected channels.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::AuthError;

/// Which channel a stream connects to and which credentials it carries.
#[derive(Debug, Clone)]
pub enum Access {
    /// `public_path`, no credentials.
    Public,
    /// `protected_path` with a bearer token.
    Protected(TokenStore),
}

impl Access {
    pub fn protected(token: impl Into<String>) -> Result<Self, AuthError> {
        Ok(Access::Protected(TokenStore::new(token)?))
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, Access::Protected(_))
    }

    /// Current bearer token, if this channel carries one.
    pub fn token(&self) -> Option<String> {
        match self {
            Access::Public => None,
            Access::Protected(store) => Some(store.get()),
        }
    }
}

/// Shared, rotatable bearer token.
///
/// Cloning shares the underlying value: a rotation through one clone is seen
/// by every stream holding another.
#[derive(Debug, Clone)]
pub struct TokenStore {
    token: Arc<RwLock<String>>,
}

impl TokenStore {
    pub fn new(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = validate(token.into())?;
        Ok(Self {
            token: Arc::new(RwLock::new(token)),
        })
    }

    pub fn get(&self) -> String {
        self.token.read().clone()
    }

    pub fn set(&self, token: impl Into<String>) -> Result<(), AuthError> {
        *self.token.write() = validate(token.into())?;
        Ok(())
    }
}

fn validate(token: String) -> Result<String, AuthError> {
    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(AuthError::InvalidToken("token is empty".into()));
    }
    Ok(token)
}
