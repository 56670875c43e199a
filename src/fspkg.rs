//! Default CA package loading.
//!
//! The package is a JSON file shipped next to the binary, holding a named,
//! versioned vendor CA bundle. It is loaded once at startup and handed to the
//! reconciler as an immutable capability; Bundles opting in via
//! `useDefaultCAs` fail with a not-found error when no package is configured.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result, pem};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub bundle: String,
}

/// Read and validate a package file. The bundle is run through the sanitizer
/// here so a corrupt package fails startup rather than every reconcile.
pub fn load_package(path: impl AsRef<Path>) -> Result<Package> {
    let file = std::fs::File::open(path).map_err(Error::IoError)?;
    let pkg: Package = serde_json::from_reader(file).map_err(Error::SerializationError)?;
    pem::sanitize_bundle(pkg.bundle.as_bytes())?;
    Ok(pkg)
}
