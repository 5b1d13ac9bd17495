use std::collections::HashMap;

use tracing::{error, info, warn};

use crate::host::{ImplementationType, Listener};

/// Listeners keyed by implementation type.
///
/// Holds at most one listener per implementation. Entries are never
/// removed, and listeners are opened and closed in creation order.
#[derive(Default)]
pub struct HostRegistry {
    listeners: Vec<Box<dyn Listener>>,
    by_key: HashMap<String, usize>,
}

impl HostRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the listener for `implementation`, creating it on first use.
    pub fn get_or_create(
        &mut self,
        implementation: ImplementationType,
        create: impl FnOnce(ImplementationType) -> Box<dyn Listener>,
    ) -> &mut Box<dyn Listener> {
        let key = implementation.key();
        let index = match self.by_key.get(&key) {
            Some(&index) => index,
            None => {
                self.listeners.push(create(implementation));
                self.by_key.insert(key, self.listeners.len() - 1);
                self.listeners.len() - 1
            }
        };
        &mut self.listeners[index]
    }

    /// Looks up a listener by implementation key (`Type.Name, Module`).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&dyn Listener> {
        self.by_key.get(key).map(|&index| &*self.listeners[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Listener> {
        self.listeners.iter().map(|listener| &**listener)
    }

    /// Implementation keys in creation order.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.listeners.iter().map(|l| l.implementation().key())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Opens every listener. A failure is logged and does not stop the
    /// others; listeners already opened stay open.
    ///
    /// Returns how many listeners opened.
    pub async fn open_all(&mut self) -> usize {
        let mut opened = 0;
        for listener in &mut self.listeners {
            let key = listener.implementation().key();
            match listener.open().await {
                Ok(()) => {
                    info!("Started host for {key}");
                    opened += 1;
                }
                Err(e) => error!("Unable to start host for {key}: {e:#}"),
            }
        }
        opened
    }

    /// Closes every listener gracefully, aborting any that fail to close.
    ///
    /// Never fails: an abort failure is logged and the remaining listeners
    /// are still stopped.
    pub async fn close_all(&mut self) {
        for listener in &mut self.listeners {
            let key = listener.implementation().key();
            let Err(e) = listener.close().await else {
                info!("Stopped host for {key}");
                continue;
            };
            warn!("Unable to close host for {key}, aborting: {e:#}");
            match listener.abort().await {
                Ok(()) => info!("Aborted host for {key}"),
                Err(e) => error!("Unable to abort host for {key}: {e:#}"),
            }
        }
    }
}
