//! Per-object auth token and property store.
//!
//! Every object served over RPC carries an [`ObjectData`]. The control
//! procedures `__auth`, `__getProperty` and `__setProperty` operate on it
//! rather than on the object itself, so they work for any target type.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use czrpc_proto::{Any, IntoAny};
use tracing::debug;

#[derive(Debug, Clone)]
struct Property {
    value: Any,
    read_only: bool,
}

/// Auth token and named properties of one served object.
#[derive(Debug, Default)]
pub struct ObjectData {
    auth_token: Option<String>,
    properties: RwLock<HashMap<String, Property>>,
}

impl ObjectData {
    /// Object data with no token and no properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `token` from `__auth`.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Declare a writable property with an initial value.
    #[must_use]
    pub fn with_property(self, name: impl Into<String>, value: impl IntoAny) -> Self {
        self.insert(name.into(), value.into_any(), false);
        self
    }

    /// Declare a property that `__setProperty` cannot change.
    #[must_use]
    pub fn with_read_only_property(self, name: impl Into<String>, value: impl IntoAny) -> Self {
        self.insert(name.into(), value.into_any(), true);
        self
    }

    /// Check a token presented by `__auth`.
    ///
    /// Without a configured token every token is accepted.
    pub fn check_auth_token(&self, token: &str) -> bool {
        self.auth_token.as_deref().is_none_or(|expected| expected == token)
    }

    /// Current value of a property, or [`Any::None`] if it does not exist.
    pub fn get_property(&self, name: &str) -> Any {
        let properties = self.properties.read().unwrap_or_else(PoisonError::into_inner);
        properties.get(name).map(|p| p.value.clone()).unwrap_or_default()
    }

    /// Store a property value.
    ///
    /// Returns false if the property is read-only. Unknown names create a
    /// new writable property.
    pub fn set_property(&self, name: &str, value: Any) -> bool {
        let mut properties = self.properties.write().unwrap_or_else(PoisonError::into_inner);
        match properties.get_mut(name) {
            Some(property) if property.read_only => {
                debug!(property = name, "rejected write to read-only property");
                false
            },
            Some(property) => {
                property.value = value;
                true
            },
            None => {
                properties.insert(name.to_owned(), Property { value, read_only: false });
                true
            },
        }
    }

    fn insert(&self, name: String, value: Any, read_only: bool) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Property { value, read_only });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_token_accepts_anything() {
        let data = ObjectData::new();
        assert!(data.check_auth_token(""));
        assert!(data.check_auth_token("whatever"));
    }

    #[test]
    fn configured_token_requires_exact_match() {
        let data = ObjectData::new().with_auth_token("secret");
        assert!(data.check_auth_token("secret"));
        assert!(!data.check_auth_token("Secret"));
        assert!(!data.check_auth_token(""));
    }

    #[test]
    fn unknown_property_reads_as_none() {
        assert_eq!(ObjectData::new().get_property("missing"), Any::None);
    }

    #[test]
    fn read_only_property_rejects_writes() {
        let data = ObjectData::new()
            .with_read_only_property("version", Any::UnsignedInteger(3))
            .with_property("name", Any::String("calc".into()));

        assert!(!data.set_property("version", Any::UnsignedInteger(4)));
        assert_eq!(data.get_property("version"), Any::UnsignedInteger(3));

        assert!(data.set_property("name", Any::String("renamed".into())));
        assert_eq!(data.get_property("name"), Any::String("renamed".into()));
    }

    #[test]
    fn writing_unknown_property_creates_it() {
        let data = ObjectData::new();
        assert!(data.set_property("fresh", Any::Bool(true)));
        assert_eq!(data.get_property("fresh"), Any::Bool(true));
    }
}
