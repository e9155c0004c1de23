//! Vehicle catalog and the bus picker options derived from it.

use std::collections::HashSet;

use thiserror::Error;

use super::traits::BoxFuture;
use crate::identity::Identity;

/// Label of the synthetic distress entry appended to every option list.
pub const NEED_HELP_LABEL: &str = "NEED HELP!!";

/// Errors reading the vehicle catalog.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    #[error("Vehicle catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Vehicle catalog read denied: {0}")]
    PermissionDenied(String),
}

/// One-shot source of vehicle-type labels.
///
/// Entries may repeat and may be blank; [`bus_options`] cleans them up.
pub trait VehicleCatalog: Send + Sync {
    fn vehicle_types(&self) -> BoxFuture<'_, Result<Vec<String>, CatalogError>>;
}

/// Fixed catalog, used for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    labels: Vec<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }
}

impl VehicleCatalog for StaticCatalog {
    fn vehicle_types(&self) -> BoxFuture<'_, Result<Vec<String>, CatalogError>> {
        Box::pin(async move { Ok(self.labels.clone()) })
    }
}

/// An entry in the bus picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusOption {
    /// Text shown to the user.
    pub label: String,
    /// Label passed to `start_sharing`.
    pub value: String,
}

/// Build the picker options: catalog labels deduplicated in first-seen
/// order, followed by the `NEED HELP!!` entry tagged with the user's name.
pub async fn bus_options(
    catalog: &dyn VehicleCatalog,
    identity: &Identity,
) -> Result<Vec<BusOption>, CatalogError> {
    let labels = catalog.vehicle_types().await?;

    let mut seen = HashSet::new();
    let mut options: Vec<BusOption> = labels
        .into_iter()
        .filter(|label| !label.trim().is_empty())
        .filter(|label| seen.insert(label.clone()))
        .map(|label| BusOption {
            value: label.clone(),
            label,
        })
        .collect();

    options.push(BusOption {
        label: NEED_HELP_LABEL.to_string(),
        value: format!("{} {}", NEED_HELP_LABEL, identity.help_name()),
    });

    tracing::debug!(count = options.len(), "Bus options loaded");
    Ok(options)
}
