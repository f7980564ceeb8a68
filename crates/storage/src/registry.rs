//! Named store registry
//!
//! Maps store names to connection strings and hands out a fresh [`Store`]
//! for every `open` call. Sessions are never cached or shared; the only
//! state kept here is the connection configuration.
//!
//! The registry is an ordinary value owned by the backend and passed to the
//! transaction wrapper, not a process-wide singleton.

use crate::error::{StoreError, StoreResult};
use crate::store::{SessionObserver, Store};
use crate::uri::{StoreUri, UriError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tandem_core::ServerConfig;

/// Produces exclusive sessions bound to named stores
pub struct StoreRegistry {
    stores: RwLock<HashMap<Arc<str>, StoreUri>>,
    default_name: Arc<str>,
    debug: bool,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl StoreRegistry {
    /// Create a registry with one default store
    pub fn new(default_name: &str, uri: StoreUri) -> Self {
        let default_name: Arc<str> = Arc::from(default_name);
        let mut stores = HashMap::new();
        stores.insert(Arc::clone(&default_name), uri);
        Self {
            stores: RwLock::new(stores),
            default_name,
            debug: false,
            observer: None,
        }
    }

    /// Create a registry from the server configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configured store URI cannot be parsed.
    pub fn from_config(config: &ServerConfig) -> Result<Self, UriError> {
        let uri: StoreUri = config.resolved_store_uri().parse()?;
        Ok(Self::new(&config.store_name, uri).with_debug(config.debug))
    }

    /// Log every SQL statement executed through sessions from this registry
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Attach an observer to every session opened from now on
    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Register (or replace) a named store
    pub fn register(&self, name: &str, uri: StoreUri) {
        self.stores.write().insert(Arc::from(name), uri);
    }

    /// Name of the default store
    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Connection configuration of a named store
    pub fn uri(&self, name: &str) -> Option<StoreUri> {
        self.stores.read().get(name).cloned()
    }

    /// Registered store names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().map(|k| k.to_string()).collect();
        names.sort();
        names
    }

    /// Open a fresh session on the named store
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Open` if the name is not registered or the
    /// connection cannot be established.
    pub fn open(&self, name: &str) -> StoreResult<Store> {
        let (name, uri) = {
            let stores = self.stores.read();
            match stores.get_key_value(name) {
                Some((name, uri)) => (Arc::clone(name), uri.clone()),
                None => {
                    return Err(StoreError::Open {
                        name: name.to_string(),
                        reason: "no such store registered".to_string(),
                    })
                }
            }
        };
        Store::open(name, &uri, self.debug, self.observer.clone())
    }

    /// Open a fresh session on the named store that refuses `commit()`
    ///
    /// # Errors
    ///
    /// Same as [`StoreRegistry::open`].
    pub fn open_read_only(&self, name: &str) -> StoreResult<Store> {
        let mut store = self.open(name)?;
        store.set_read_only();
        Ok(store)
    }

    /// Open a fresh session on the default store
    pub fn open_default(&self) -> StoreResult<Store> {
        let name = Arc::clone(&self.default_name);
        self.open(&name)
    }
}
