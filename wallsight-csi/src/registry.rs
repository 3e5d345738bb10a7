//! Known WiFi anchors

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wallsight_common::{Error, Result, Vector3};

/// Free-space path loss at 1 m for a carrier frequency, in dB.
///
/// `32.4 + 20·log10(f_GHz)`.
pub fn free_space_loss_db(frequency_ghz: f64) -> f64 {
    32.4 + 20.0 * frequency_ghz.log10()
}

/// A WiFi router used as a triangulation anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Router {
    /// Unique router identifier
    pub id: String,
    /// Known position (meters)
    pub position: Vector3,
    /// Carrier frequency (GHz)
    pub frequency_ghz: f64,
    /// Transmit power (dBm)
    pub tx_power_dbm: f64,
}

impl Router {
    /// Creates a new router
    pub fn new(id: impl Into<String>, position: Vector3, frequency_ghz: f64, tx_power_dbm: f64) -> Self {
        Self {
            id: id.into(),
            position,
            frequency_ghz,
            tx_power_dbm,
        }
    }

    /// Checks that the router can serve as an anchor.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidRouter("router id must not be empty".to_string()));
        }
        if !self.position.is_finite() {
            return Err(Error::InvalidRouter(format!(
                "router {} has a non-finite position",
                self.id
            )));
        }
        if !self.frequency_ghz.is_finite() || self.frequency_ghz <= 0.0 {
            return Err(Error::InvalidRouter(format!(
                "router {} frequency must be positive, got {}",
                self.id, self.frequency_ghz
            )));
        }
        if !self.tx_power_dbm.is_finite() {
            return Err(Error::InvalidRouter(format!(
                "router {} has a non-finite tx power",
                self.id
            )));
        }
        Ok(())
    }

    /// Free-space loss at 1 m for this router's carrier.
    pub fn free_space_loss_db(&self) -> f64 {
        free_space_loss_db(self.frequency_ghz)
    }
}

/// Registry of known routers, keyed by id.
///
/// Routers persist until explicitly removed.
#[derive(Debug, Default, Clone)]
pub struct RouterRegistry {
    routers: BTreeMap<String, Router>,
}

impl RouterRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a router.
    pub fn register(&mut self, router: Router) -> Result<Router> {
        router.validate()?;
        if self.routers.contains_key(&router.id) {
            return Err(Error::DuplicateRouterId(router.id));
        }
        tracing::info!(
            "Registered router {} at {} ({:.3} GHz, {:.1} dBm)",
            router.id,
            router.position,
            router.frequency_ghz,
            router.tx_power_dbm
        );
        self.routers.insert(router.id.clone(), router.clone());
        Ok(router)
    }

    /// All routers in id order.
    pub fn list(&self) -> Vec<Router> {
        self.routers.values().cloned().collect()
    }

    /// Looks up a router by id.
    pub fn get(&self, id: &str) -> Result<&Router> {
        self.routers
            .get(id)
            .ok_or_else(|| Error::RouterNotFound(id.to_string()))
    }

    /// Removes a router and returns it.
    pub fn remove(&mut self, id: &str) -> Result<Router> {
        let router = self
            .routers
            .remove(id)
            .ok_or_else(|| Error::RouterNotFound(id.to_string()))?;
        tracing::info!("Removed router {}", router.id);
        Ok(router)
    }

    /// Returns true if a router with this id is registered
    pub fn contains(&self, id: &str) -> bool {
        self.routers.contains_key(id)
    }

    /// Number of registered routers
    pub fn len(&self) -> usize {
        self.routers.len()
    }

    /// Returns true if no router is registered
    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }
}
