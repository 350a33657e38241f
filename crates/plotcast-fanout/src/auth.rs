//! Per-topic-type subscription authorization.
//!
//! A topic `"<type>:<rest>"` is authorized by the function registered for
//! `<type>`, which receives the client's token and `<rest>`. Topics whose
//! type has no registered function follow the registry's
//! [`UnregisteredAuthPolicy`]; the default allows them, matching the
//! historical fail-open behaviour.

use std::collections::HashMap;
use std::sync::Arc;

use plotcast_types::Topic;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decides whether `token` may subscribe to the topic remainder.
pub type AuthFn = Arc<dyn Fn(Option<&str>, &str) -> bool + Send + Sync>;

/// What to do with a topic whose type has no registered auth function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnregisteredAuthPolicy {
    /// Allow the subscription.
    #[default]
    Allow,
    /// Deny the subscription.
    Deny,
}

impl UnregisteredAuthPolicy {
    const fn allows(self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl core::str::FromStr for UnregisteredAuthPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(format!("unknown auth policy: {other}")),
        }
    }
}

/// Typed dispatch table from auth type to auth function.
#[derive(Clone, Default)]
pub struct AuthRegistry {
    functions: HashMap<String, AuthFn>,
    unregistered: UnregisteredAuthPolicy,
}

impl AuthRegistry {
    /// An empty registry with the given policy for unregistered types.
    pub fn new(unregistered: UnregisteredAuthPolicy) -> Self {
        Self {
            functions: HashMap::new(),
            unregistered,
        }
    }

    /// Register (or replace) the function for `auth_type`.
    pub fn register<F>(&mut self, auth_type: impl Into<String>, func: F)
    where
        F: Fn(Option<&str>, &str) -> bool + Send + Sync + 'static,
    {
        self.register_arc(auth_type, Arc::new(func));
    }

    /// Register an already shared function.
    pub fn register_arc(&mut self, auth_type: impl Into<String>, func: AuthFn) {
        let auth_type = auth_type.into();
        debug!(auth_type, "registering auth function");
        self.functions.insert(auth_type, func);
    }

    /// Remove the function for `auth_type`.
    pub fn unregister(&mut self, auth_type: &str) -> bool {
        self.functions.remove(auth_type).is_some()
    }

    /// Whether a function is registered for `auth_type`.
    pub fn is_registered(&self, auth_type: &str) -> bool {
        self.functions.contains_key(auth_type)
    }

    /// The policy applied to unregistered types.
    pub const fn policy(&self) -> UnregisteredAuthPolicy {
        self.unregistered
    }

    /// Change the policy applied to unregistered types.
    pub const fn set_policy(&mut self, policy: UnregisteredAuthPolicy) {
        self.unregistered = policy;
    }

    /// Decide whether `token` may subscribe to `topic`.
    ///
    /// A topic without a `:` has no auth type and falls under the
    /// unregistered policy.
    pub fn check(&self, token: Option<&str>, topic: &Topic) -> bool {
        let Some((auth_type, rest)) = topic.split() else {
            return self.unregistered.allows();
        };
        match self.functions.get(auth_type) {
            Some(func) => func(token, rest),
            None => self.unregistered.allows(),
        }
    }
}

impl core::fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("AuthRegistry")
            .field("auth_types", &types)
            .field("unregistered", &self.unregistered)
            .finish()
    }
}
