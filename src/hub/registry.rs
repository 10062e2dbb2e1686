//! Hub Registry
//!
//! Static description of each hub (which methods the server exposes, which
//! push slots the client offers) plus the handlers the application plugs
//! into those slots. Slot names are checked when a handler is registered, so
//! a misspelled handler fails at setup rather than silently never firing.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::HubError;

/// A client-side push handler. Receives the invocation's positional args.
pub type ClientHandler = Arc<dyn Fn(Vec<Value>) -> Result<(), HubError> + Send + Sync>;

/// One hub's method surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubDefinition {
    pub name: String,
    pub server_methods: BTreeSet<String>,
    pub client_methods: BTreeSet<String>,
}

impl HubDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_methods: BTreeSet::new(),
            client_methods: BTreeSet::new(),
        }
    }

    pub fn server_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_methods.extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn client_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_methods.extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn has_server_method(&self, name: &str) -> bool {
        self.server_methods.contains(name)
    }

    pub fn has_client_method(&self, name: &str) -> bool {
        self.client_methods.contains(name)
    }
}

#[derive(Debug, Default)]
pub struct HubRegistryBuilder {
    hubs: BTreeMap<String, HubDefinition>,
}

impl HubRegistryBuilder {
    /// Add a hub. A second definition with the same name merges into the first.
    pub fn hub(mut self, definition: HubDefinition) -> Self {
        match self.hubs.get_mut(&definition.name) {
            Some(existing) => {
                existing.server_methods.extend(definition.server_methods);
                existing.client_methods.extend(definition.client_methods);
            }
            None => {
                self.hubs.insert(definition.name.clone(), definition);
            }
        }
        self
    }

    pub fn build(self) -> HubRegistry {
        HubRegistry {
            hubs: self.hubs,
            handlers: DashMap::new(),
        }
    }
}

/// Hub definitions (fixed after build) and handler slots (filled at runtime).
pub struct HubRegistry {
    hubs: BTreeMap<String, HubDefinition>,
    handlers: DashMap<(String, String), ClientHandler>,
}

impl HubRegistry {
    pub fn builder() -> HubRegistryBuilder {
        HubRegistryBuilder::default()
    }

    pub fn get(&self, hub: &str) -> Option<&HubDefinition> {
        self.hubs.get(hub)
    }

    pub fn contains_hub(&self, hub: &str) -> bool {
        self.hubs.contains_key(hub)
    }

    /// Every hub with its server and client method names.
    pub fn structure(&self) -> Vec<HubDefinition> {
        self.hubs.values().cloned().collect()
    }

    /// Check that `hub` exposes `function` to clients.
    pub fn check_server_method(&self, hub: &str, function: &str) -> Result<(), HubError> {
        let definition = self
            .get(hub)
            .ok_or_else(|| HubError::UnknownHub(hub.to_string()))?;
        if !definition.has_server_method(function) {
            return Err(HubError::UnknownServerMethod {
                hub: hub.to_string(),
                function: function.to_string(),
            });
        }
        Ok(())
    }

    /// Fill a client slot with a raw handler, replacing any previous one.
    pub fn set_handler(
        &self,
        hub: &str,
        function: &str,
        handler: ClientHandler,
    ) -> Result<(), HubError> {
        let definition = self
            .get(hub)
            .ok_or_else(|| HubError::UnknownHub(hub.to_string()))?;
        if !definition.has_client_method(function) {
            return Err(HubError::UnknownClientFunction {
                hub: hub.to_string(),
                function: function.to_string(),
            });
        }
        self.handlers
            .insert((hub.to_string(), function.to_string()), handler);
        Ok(())
    }

    /// Fill a client slot with a typed handler.
    ///
    /// The invocation's positional args are deserialized into `A` (usually a
    /// tuple, e.g. `(String, u32)`). A mismatch surfaces as `HubError::Handler`.
    pub fn on<A, F>(&self, hub: &str, function: &str, handler: F) -> Result<(), HubError>
    where
        A: DeserializeOwned,
        F: Fn(A) + Send + Sync + 'static,
    {
        let hub_name = hub.to_string();
        let function_name = function.to_string();
        let wrapped: ClientHandler = Arc::new(move |args: Vec<Value>| {
            let typed: A = serde_json::from_value(Value::Array(args)).map_err(|e| {
                HubError::Handler {
                    hub: hub_name.clone(),
                    function: function_name.clone(),
                    message: format!("bad arguments: {}", e),
                }
            })?;
            handler(typed);
            Ok(())
        });
        self.set_handler(hub, function, wrapped)
    }

    /// Empty a client slot. Returns whether a handler was installed.
    pub fn remove_handler(&self, hub: &str, function: &str) -> bool {
        self.handlers
            .remove(&(hub.to_string(), function.to_string()))
            .is_some()
    }

    /// The handler in a slot, if any. Cloned out so no map lock is held while it runs.
    pub fn handler(&self, hub: &str, function: &str) -> Option<ClientHandler> {
        self.handlers
            .get(&(hub.to_string(), function.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl fmt::Debug for HubRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubRegistry")
            .field("hubs", &self.hubs)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn chat_registry() -> HubRegistry {
        HubRegistry::builder()
            .hub(
                HubDefinition::new("ChatHub")
                    .server_methods(["send", "join"])
                    .client_methods(["onMessage"]),
            )
            .build()
    }

    #[test]
    fn test_unknown_slot_rejected_at_registration() {
        let registry = chat_registry();
        let err = registry
            .on("ChatHub", "onMesage", |_: (String,)| {})
            .unwrap_err();
        assert!(matches!(err, HubError::UnknownClientFunction { .. }));

        let err = registry.on("NoHub", "onMessage", |_: (String,)| {}).unwrap_err();
        assert!(matches!(err, HubError::UnknownHub(_)));
    }

    #[test]
    fn test_typed_handler_receives_args() {
        let registry = chat_registry();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        registry
            .on("ChatHub", "onMessage", move |(who, text): (String, String)| {
                sink.lock().unwrap().push(format!("{}: {}", who, text));
            })
            .unwrap();

        let handler = registry.handler("ChatHub", "onMessage").unwrap();
        handler(vec![json!("ana"), json!("hello")]).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["ana: hello".to_string()]);

        let err = handler(vec![json!(1)]).unwrap_err();
        assert!(matches!(err, HubError::Handler { .. }));
    }

    #[test]
    fn test_check_server_method() {
        let registry = chat_registry();
        assert!(registry.check_server_method("ChatHub", "send").is_ok());
        assert!(matches!(
            registry.check_server_method("ChatHub", "leave"),
            Err(HubError::UnknownServerMethod { .. })
        ));
    }

    #[test]
    fn test_structure_merges_duplicate_hubs() {
        let registry = HubRegistry::builder()
            .hub(HubDefinition::new("A").server_methods(["x"]))
            .hub(HubDefinition::new("A").server_methods(["y"]).client_methods(["z"]))
            .hub(HubDefinition::new("B"))
            .build();

        let structure = registry.structure();
        assert_eq!(structure.len(), 2);
        assert_eq!(
            serde_json::to_value(&structure[0]).unwrap(),
            json!({"name": "A", "server_methods": ["x", "y"], "client_methods": ["z"]})
        );
    }

    #[test]
    fn test_remove_handler() {
        let registry = chat_registry();
        registry.on("ChatHub", "onMessage", |_: Vec<Value>| {}).unwrap();
        assert!(registry.remove_handler("ChatHub", "onMessage"));
        assert!(!registry.remove_handler("ChatHub", "onMessage"));
        assert!(registry.handler("ChatHub", "onMessage").is_none());
    }
}
