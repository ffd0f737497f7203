//! Native handle lifecycle
//!
//! [`Connection`] owns at most one native handle produced by a
//! [`NativeConnector`]. It guarantees:
//! - `connect` opens at most once until the next `disconnect`
//! - a failed open leaves no partial state behind
//! - `disconnect` always clears the handle, even when close fails
//! - dropping a connected wrapper closes the handle

use std::fmt::Debug;

use kvbridge_core::{Error, Result};
use tracing::{debug, error, info};

/// The three native primitives a backend supplies.
pub trait NativeConnector: Send + 'static {
    /// Connection configuration
    type Config: Clone + Debug + Send;
    /// Native handle type
    type Handle: Send;

    /// Open a handle.
    fn open(&mut self, config: &Self::Config) -> Result<Self::Handle>;

    /// Release a handle. The handle is never used again afterwards.
    fn close(&mut self, handle: Self::Handle) -> Result<()>;

    /// Whether the handle is still usable.
    fn is_open(&self, handle: &Self::Handle) -> bool;
}

/// Connected/disconnected wrapper around one native handle.
pub struct Connection<C: NativeConnector> {
    connector: C,
    config: Option<C::Config>,
    handle: Option<C::Handle>,
}

impl<C: NativeConnector> Connection<C> {
    /// Create a disconnected wrapper.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            config: None,
            handle: None,
        }
    }

    /// Open the handle unless already connected.
    pub fn connect(&mut self, config: &C::Config) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        // A handle that reports closed is released before reopening.
        if let Some(stale) = self.handle.take() {
            self.config = None;
            if let Err(e) = self.connector.close(stale) {
                debug!(target: "kvbridge::conn", error = %e, "closing stale handle failed");
            }
        }

        let handle = self.connector.open(config)?;
        info!(target: "kvbridge::conn", ?config, "connected");
        self.config = Some(config.clone());
        self.handle = Some(handle);
        Ok(())
    }

    /// Close the handle if connected.
    ///
    /// State is reset even when close reports an error; the error is
    /// logged and returned.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.config = None;
        match self.connector.close(handle) {
            Ok(()) => {
                info!(target: "kvbridge::conn", "disconnected");
                Ok(())
            }
            Err(e) => {
                error!(target: "kvbridge::conn", error = %e, "closing native handle failed");
                Err(e)
            }
        }
    }

    /// True while a usable handle is held.
    pub fn is_connected(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| self.connector.is_open(h))
            .unwrap_or(false)
    }

    /// Configuration of the open handle.
    pub fn config(&self) -> Option<&C::Config> {
        self.config.as_ref()
    }

    /// Borrow the open handle.
    ///
    /// # Errors
    ///
    /// `NotConnected` when no usable handle is held.
    pub fn handle_mut(&mut self) -> Result<&mut C::Handle> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.handle.as_mut().ok_or(Error::NotConnected)
    }

    /// Borrow the open handle immutably.
    pub fn handle(&self) -> Result<&C::Handle> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.handle.as_ref().ok_or(Error::NotConnected)
    }

    /// The connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: NativeConnector> Drop for Connection<C> {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            error!(target: "kvbridge::conn", error = %e, "disconnect on drop failed");
            debug_assert!(false, "disconnect on drop failed: {}", e);
        }
    }
}
