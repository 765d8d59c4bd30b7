//! Client registry: lazy construction and caching of per-service clients.
//!
//! The registry is an explicit object passed to commands (no global state).
//! It is populated once at startup from two ordered plugin groups: the
//! builtin "base" group, then "extension" names declared in the config
//! file. Each plugin contributes a service name, an optional one-time init
//! hook, and a factory. The first access per service invokes the factory
//! and caches the handle for the process lifetime; credential changes after
//! that point require a new process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::client::ServiceClient;
use crate::error::CliError;
use crate::session::SessionManager;

/// Factory building a client handle. Receives the registry so it can reach
/// the shared session manager.
pub type ClientFactory =
    Box<dyn Fn(&ClientRegistry) -> Result<ServiceClient, CliError> + Send + Sync>;

/// A discovered client plugin.
pub struct ClientPlugin {
    /// Name the client is registered (and looked up) under.
    pub service_name: String,
    /// One-time initializer, run at registration.
    pub init: Option<fn()>,
    pub factory: ClientFactory,
}

impl ClientPlugin {
    /// A plugin whose client talks to the catalog service type of the same
    /// name. Covers every base service and config-declared extensions.
    pub fn for_service_type(name: &str) -> Self {
        let service_type = name.to_string();
        Self {
            service_name: name.to_string(),
            init: None,
            factory: Box::new(move |registry: &ClientRegistry| {
                Ok(ServiceClient::new(
                    registry.session().clone(),
                    service_type.clone(),
                ))
            }),
        }
    }
}

/// Base plugin group, registered before any extensions.
const BASE_SERVICES: &[&str] = &["identity", "compute", "network", "image", "volume"];

/// Process-wide client registry.
pub struct ClientRegistry {
    session: Arc<SessionManager>,
    plugins: BTreeMap<String, ClientPlugin>,
    handles: Mutex<HashMap<String, Arc<ServiceClient>>>,
}

impl ClientRegistry {
    /// Build the registry: base group first, then the extension names from
    /// the config file, in declaration order.
    pub fn new(session: Arc<SessionManager>, extensions: &[String]) -> Self {
        let mut registry = Self {
            session,
            plugins: BTreeMap::new(),
            handles: Mutex::new(HashMap::new()),
        };
        for name in BASE_SERVICES {
            registry.register(ClientPlugin::for_service_type(name));
        }
        for name in extensions {
            registry.register(ClientPlugin::for_service_type(name));
        }
        registry
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Register a plugin, running its one-time init hook.
    pub fn register(&mut self, plugin: ClientPlugin) {
        debug!(service = plugin.service_name.as_str(), "registering client plugin");
        if let Some(init) = plugin.init {
            init();
        }
        self.plugins.insert(plugin.service_name.clone(), plugin);
    }

    /// Get the client for a service name, constructing and caching it on
    /// first access. A factory failure surfaces as `PluginAttribute` —
    /// distinct from an unregistered name — so plugin-loading bugs stay
    /// visible instead of looking like a missing service.
    pub fn client(&self, service_name: &str) -> Result<Arc<ServiceClient>, CliError> {
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| CliError::Command("client handle cache poisoned".into()))?;

        if let Some(handle) = handles.get(service_name) {
            return Ok(handle.clone());
        }

        let plugin = self
            .plugins
            .get(service_name)
            .ok_or_else(|| CliError::UnknownService(service_name.to_string()))?;

        let client = (plugin.factory)(self).map_err(|err| CliError::PluginAttribute {
            service: service_name.to_string(),
            message: err.to_string(),
        })?;

        let handle = Arc::new(client);
        handles.insert(service_name.to_string(), handle.clone());
        debug!(service = service_name, "client handle constructed");
        Ok(handle)
    }

    pub fn identity(&self) -> Result<Arc<ServiceClient>, CliError> {
        self.client("identity")
    }

    pub fn compute(&self) -> Result<Arc<ServiceClient>, CliError> {
        self.client("compute")
    }

    pub fn network(&self) -> Result<Arc<ServiceClient>, CliError> {
        self.client("network")
    }

    pub fn image(&self) -> Result<Arc<ServiceClient>, CliError> {
        self.client("image")
    }

    pub fn volume(&self) -> Result<Arc<ServiceClient>, CliError> {
        self.client("volume")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliOptions;

    use std::sync::atomic::{AtomicUsize, Ordering};

    static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn test_session() -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            CliOptions::default(),
            Box::new(|_| Ok("unused".to_string())),
        ))
    }

    #[test]
    fn base_services_are_registered() {
        let registry = ClientRegistry::new(test_session(), &[]);
        for name in BASE_SERVICES {
            assert!(registry.client(name).is_ok(), "{name} should be registered");
        }
    }

    #[test]
    fn handles_are_cached_per_service() {
        let registry = ClientRegistry::new(test_session(), &[]);
        let a = registry.client("compute").unwrap();
        let b = registry.client("compute").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unknown_service_is_its_own_error() {
        let registry = ClientRegistry::new(test_session(), &[]);
        assert!(matches!(
            registry.client("baremetal").unwrap_err(),
            CliError::UnknownService(_)
        ));
    }

    #[test]
    fn factory_failure_is_distinct_from_unknown_service() {
        let mut registry = ClientRegistry::new(test_session(), &[]);
        registry.register(ClientPlugin {
            service_name: "dns".into(),
            init: None,
            factory: Box::new(|_| {
                Err(CliError::Config("optional dependency missing".into()))
            }),
        });
        match registry.client("dns").unwrap_err() {
            CliError::PluginAttribute { service, message } => {
                assert_eq!(service, "dns");
                assert!(message.contains("optional dependency missing"));
            }
            other => panic!("expected PluginAttribute, got {other:?}"),
        }
    }

    #[test]
    fn init_hook_runs_once_at_registration() {
        fn init_hook() {
            INIT_CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let mut registry = ClientRegistry::new(test_session(), &[]);
        registry.register(ClientPlugin {
            service_name: "metering".into(),
            init: Some(init_hook),
            factory: Box::new(|r| Ok(ServiceClient::new(r.session().clone(), "metering"))),
        });
        assert_eq!(INIT_CALLS.load(Ordering::SeqCst), 1);

        // Accessing the client twice does not re-run the init hook.
        registry.client("metering").unwrap();
        registry.client("metering").unwrap();
        assert_eq!(INIT_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn extensions_register_after_base_group() {
        let registry = ClientRegistry::new(test_session(), &["dns".to_string()]);
        assert!(registry.client("dns").is_ok());
    }
}
