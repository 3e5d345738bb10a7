//! Wall material classification from excess path loss

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wallsight_common::{default_material_database, Error, Result};

use crate::registry::free_space_loss_db;

/// A material and its nominal excess loss over free space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialProfile {
    /// Material label
    pub label: String,
    /// Nominal excess loss (dB)
    pub excess_loss_db: f64,
}

impl MaterialProfile {
    /// Creates a new profile
    pub fn new(label: impl Into<String>, excess_loss_db: f64) -> Self {
        Self {
            label: label.into(),
            excess_loss_db,
        }
    }
}

/// Outcome of classifying one loss measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialMatch {
    /// Label of the closest profile
    pub label: String,
    /// Measured loss beyond free space (dB); may be negative
    pub excess_loss_db: f64,
    /// Nominal loss of the matched profile (dB)
    pub nominal_loss_db: f64,
    /// Match quality in [0, 1]
    pub confidence: f64,
}

/// Nearest-profile material classifier.
///
/// Profiles are kept sorted by ascending loss so that a tie resolves to the
/// lighter material.
#[derive(Debug, Clone)]
pub struct MaterialClassifier {
    profiles: Vec<MaterialProfile>,
}

impl Default for MaterialClassifier {
    fn default() -> Self {
        // The built-in table is valid by construction
        let mut profiles: Vec<MaterialProfile> = default_material_database()
            .into_iter()
            .map(|(label, loss)| MaterialProfile::new(label, loss))
            .collect();
        profiles.sort_by(|a, b| a.excess_loss_db.total_cmp(&b.excess_loss_db));
        Self { profiles }
    }
}

impl MaterialClassifier {
    /// Creates a classifier from a list of profiles.
    pub fn new(mut profiles: Vec<MaterialProfile>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::Config("material table must not be empty".to_string()));
        }
        if let Some(bad) = profiles
            .iter()
            .find(|p| !p.excess_loss_db.is_finite() || p.excess_loss_db <= 0.0)
        {
            return Err(Error::Config(format!(
                "material {} must have a positive loss, got {}",
                bad.label, bad.excess_loss_db
            )));
        }
        profiles.sort_by(|a, b| {
            a.excess_loss_db
                .total_cmp(&b.excess_loss_db)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(Self { profiles })
    }

    /// Creates a classifier from a `label -> loss` table.
    pub fn from_database(database: &BTreeMap<String, f64>) -> Result<Self> {
        Self::new(
            database
                .iter()
                .map(|(label, loss)| MaterialProfile::new(label.clone(), *loss))
                .collect(),
        )
    }

    /// Profiles in ascending loss order
    pub fn profiles(&self) -> &[MaterialProfile] {
        &self.profiles
    }

    /// Classifies a measured loss at the given carrier frequency.
    ///
    /// Distance to the router is not taken into account: everything above
    /// the 1 m free-space loss counts as excess.
    pub fn classify(&self, measured_loss_db: f64, frequency_ghz: f64) -> MaterialMatch {
        let excess = measured_loss_db - free_space_loss_db(frequency_ghz);
        self.classify_excess(excess)
    }

    /// Classifies an excess loss directly.
    pub fn classify_excess(&self, excess_loss_db: f64) -> MaterialMatch {
        let mut best = &self.profiles[0];
        let mut best_delta = (excess_loss_db - best.excess_loss_db).abs();
        for profile in &self.profiles[1..] {
            let delta = (excess_loss_db - profile.excess_loss_db).abs();
            // Strict comparison keeps the lower loss on ties
            if delta < best_delta {
                best = profile;
                best_delta = delta;
            }
        }

        let confidence = if best_delta.is_finite() {
            (1.0 - (best_delta / best.excess_loss_db).min(1.0)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        MaterialMatch {
            label: best.label.clone(),
            excess_loss_db,
            nominal_loss_db: best.excess_loss_db,
            confidence,
        }
    }
}
