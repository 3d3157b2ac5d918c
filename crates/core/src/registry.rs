//! Plugin and reader registry
//!
//! The registry is the process entry point of the terminal service: plugin
//! factories are registered with a [`SmartCardService`], which wraps every
//! driver they produce into a [`Reader`] or an [`ObservableReader`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extension::{
    CardExtension, SERVICE_API_VERSION_MAJOR, SERVICE_API_VERSION_MINOR,
};
use crate::reader::{MonitoringOptions, ObservableReader, Reader, ReaderDriver};

/// Factory contract implemented by reader plugins
pub trait PluginFactory {
    /// Name under which the plugin registers
    fn plugin_name(&self) -> String;

    /// Create one driver per reader currently available
    fn create_drivers(&self) -> Result<Vec<Arc<dyn ReaderDriver>>>;
}

enum PluginReader {
    Plain(Arc<Reader>),
    Observable(Arc<ObservableReader>),
}

impl std::fmt::Debug for PluginReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginReader::Plain(reader) => f.debug_tuple("Plain").field(reader).finish(),
            PluginReader::Observable(_) => f.debug_tuple("Observable").finish(),
        }
    }
}

/// A registered plugin and the readers it produced
pub struct Plugin {
    name: String,
    readers: Mutex<HashMap<String, PluginReader>>,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin").field("name", &self.name).finish()
    }
}

impl Plugin {
    fn new(name: String, drivers: Vec<Arc<dyn ReaderDriver>>) -> Self {
        let mut readers = HashMap::new();
        for driver in drivers {
            let reader_name = driver.name().to_string();
            let reader = if driver.observation_capabilities().is_some() {
                // Observability checked above, construction cannot fail
                match ObservableReader::new(&name, driver, MonitoringOptions::default()) {
                    Ok(observable) => PluginReader::Observable(Arc::new(observable)),
                    Err(_) => continue,
                }
            } else {
                PluginReader::Plain(Arc::new(Reader::new(&name, driver)))
            };
            readers.insert(reader_name, reader);
        }
        Self {
            name,
            readers: Mutex::new(readers),
        }
    }

    /// Plugin name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the readers this plugin produced
    pub fn reader_names(&self) -> Vec<String> {
        self.readers.lock().unwrap().keys().cloned().collect()
    }

    /// Get a reader by name; for an observable reader this returns its
    /// underlying plain view
    pub fn reader(&self, name: &str) -> Result<Arc<Reader>> {
        match self.readers.lock().unwrap().get(name) {
            Some(PluginReader::Plain(reader)) => Ok(reader.clone()),
            Some(PluginReader::Observable(observable)) => Ok(observable.reader().clone()),
            None => Err(Error::illegal_state(format!(
                "no reader '{name}' in plugin '{}'",
                self.name
            ))),
        }
    }

    /// Get an observable reader by name; fails when the driver offers no
    /// observation capabilities
    pub fn observable_reader(&self, name: &str) -> Result<Arc<ObservableReader>> {
        match self.readers.lock().unwrap().get(name) {
            Some(PluginReader::Observable(observable)) => Ok(observable.clone()),
            Some(PluginReader::Plain(_)) => Err(Error::illegal_state(format!(
                "reader '{name}' is not observable"
            ))),
            None => Err(Error::illegal_state(format!(
                "no reader '{name}' in plugin '{}'",
                self.name
            ))),
        }
    }
}

/// Process-wide directory of registered plugins
#[derive(Default)]
pub struct SmartCardService {
    plugins: Mutex<HashMap<String, Arc<Plugin>>>,
}

impl SmartCardService {
    /// Create an empty service
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin and wrap its readers.
    ///
    /// Driver enumeration failures surface as [`Error::Plugin`]; registering
    /// the same name twice is an API misuse.
    pub fn register_plugin(&self, factory: &dyn PluginFactory) -> Result<Arc<Plugin>> {
        let name = factory.plugin_name();
        let mut plugins = self.plugins.lock().unwrap();
        if plugins.contains_key(&name) {
            return Err(Error::illegal_state(format!(
                "plugin '{name}' is already registered"
            )));
        }

        let drivers = factory
            .create_drivers()
            .map_err(|e| Error::plugin(format!("plugin '{name}' failed to start: {e}")))?;
        let plugin = Arc::new(Plugin::new(name.clone(), drivers));
        info!(
            plugin = %name,
            readers = plugin.reader_names().len(),
            "plugin registered"
        );
        plugins.insert(name, plugin.clone());
        Ok(plugin)
    }

    /// Remove a plugin from the registry
    pub fn unregister_plugin(&self, name: &str) -> Result<()> {
        match self.plugins.lock().unwrap().remove(name) {
            Some(_) => {
                debug!(plugin = name, "plugin unregistered");
                Ok(())
            }
            None => Err(Error::illegal_state(format!(
                "plugin '{name}' is not registered"
            ))),
        }
    }

    /// Get a registered plugin by name
    pub fn plugin(&self, name: &str) -> Result<Arc<Plugin>> {
        self.plugins
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::illegal_state(format!("plugin '{name}' is not registered")))
    }

    /// Names of the registered plugins
    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins.lock().unwrap().keys().cloned().collect()
    }

    /// Verify that a card extension is compatible with this service
    pub fn check_card_extension(&self, extension: &dyn CardExtension) -> Result<()> {
        extension.check_service_version(SERVICE_API_VERSION_MAJOR, SERVICE_API_VERSION_MINOR)
    }
}
