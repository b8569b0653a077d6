//! Catalog file loading.
//!
//! The cost collector exports the reporting period either as a bare JSON
//! array of services or wrapped as `{"services": [...]}`. Order is preserved.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::CatalogError;
use crate::models::Service;

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Service>),
    Wrapped { services: Vec<Service> },
}

/// Load a catalog from a JSON file.
pub fn load_catalog(path: &Path) -> Result<Vec<Service>, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let services = parse_catalog(&content)?;
    debug!(path = %path.display(), services = services.len(), "Loaded catalog");
    Ok(services)
}

/// Parse catalog JSON.
pub fn parse_catalog(content: &str) -> Result<Vec<Service>, CatalogError> {
    let services = match serde_json::from_str(content)? {
        CatalogFile::List(services) | CatalogFile::Wrapped { services } => services,
    };
    validate_catalog(&services)?;
    Ok(services)
}

/// Reject entries whose cost is negative or not a finite number.
pub fn validate_catalog(services: &[Service]) -> Result<(), CatalogError> {
    match services
        .iter()
        .find(|s| !s.cost.is_finite() || s.cost < 0.0)
    {
        Some(service) => Err(CatalogError::InvalidCost {
            name: service.name.clone(),
            cost: service.cost,
        }),
        None => Ok(()),
    }
}
