//! Command implementations

pub mod alias;
pub mod completions;
pub mod cp;
pub mod diff;
pub mod mirror;
pub mod session;
pub mod watch;

use std::sync::Arc;

use dm_core::ClientFactory;
use dm_core::config::{Config, ConfigStore};
use dm_store::StoreFactory;

/// Loaded configuration plus the client factory built from it.
///
/// Constructed once at command entry; the config value is passed along
/// explicitly, never cached globally.
pub(crate) struct Context {
    pub store: ConfigStore,
    pub config: Config,
    pub factory: Arc<dyn ClientFactory>,
}

impl Context {
    pub fn load() -> dm_core::Result<Self> {
        let store = ConfigStore::new()?;
        let config = store.load()?;
        let factory = StoreFactory::shared(config.clone());
        Ok(Self {
            store,
            config,
            factory,
        })
    }
}
