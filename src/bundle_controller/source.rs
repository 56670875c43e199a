//! Source materialization and bundle assembly.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};

use super::types::Bundle;
use crate::fspkg::Package;
use crate::jks::encode_jks;
use crate::pem;
use crate::{Error, Result};

/// Read-only access to source objects in the trust namespace. The reconciler
/// uses the cluster-backed implementation; tests inject an in-memory one.
#[allow(async_fn_in_trait)]
pub trait SourceReader {
    async fn config_map(&self, name: &str) -> Result<Option<ConfigMap>>;
    async fn secret(&self, name: &str) -> Result<Option<Secret>>;
}

pub struct ClusterSourceReader {
    client: Client,
    namespace: String,
}

impl ClusterSourceReader {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }
}

impl SourceReader for ClusterSourceReader {
    async fn config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        api.get_opt(name).await.map_err(Error::KubeError)
    }

    async fn secret(&self, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        api.get_opt(name).await.map_err(Error::KubeError)
    }
}

/// The assembled outputs projected into every target object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedBundle {
    /// Canonical PEM bundle.
    pub data: String,
    /// Alternate encodings keyed by their target data key.
    pub binary_data: BTreeMap<String, Vec<u8>>,
}

/// Materialize every source in spec order, concatenate, canonicalize, and
/// render the requested alternate formats.
pub async fn resolve_sources<R: SourceReader>(
    bundle: &Bundle,
    reader: &R,
    default_package: Option<&Package>,
    jks_password: &str,
) -> Result<ResolvedBundle> {
    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(bundle.spec.sources.len());

    for source in &bundle.spec.sources {
        if let Some(selector) = &source.config_map {
            let config_map = reader.config_map(&selector.name).await?.ok_or_else(|| {
                Error::NotFound(format!("configmap \"{}\" not found", selector.name))
            })?;
            let value = config_map
                .data
                .as_ref()
                .and_then(|data| data.get(&selector.key))
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "no data found in configmap \"{}\" at key \"{}\"",
                        selector.name, selector.key
                    ))
                })?;
            parts.push(value.clone().into_bytes());
        }

        if let Some(selector) = &source.secret {
            let secret = reader.secret(&selector.name).await?.ok_or_else(|| {
                Error::NotFound(format!("secret \"{}\" not found", selector.name))
            })?;
            let value = secret
                .data
                .as_ref()
                .and_then(|data| data.get(&selector.key))
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "no data found in secret \"{}\" at key \"{}\"",
                        selector.name, selector.key
                    ))
                })?;
            parts.push(value.0.clone());
        }

        if let Some(text) = &source.in_line {
            parts.push(text.clone().into_bytes());
        }

        if source.use_default_cas == Some(true) {
            let package = default_package.ok_or_else(|| {
                Error::NotFound("no default CA package is configured".to_string())
            })?;
            parts.push(package.bundle.clone().into_bytes());
        }
    }

    let certs = pem::parse_bundle(&parts.join(&b"\n"[..]))?;
    let data = pem::serialize_bundle(&certs);

    let mut binary_data = BTreeMap::new();
    if let Some(jks_key) = bundle.jks_key() {
        binary_data.insert(jks_key.to_string(), encode_jks(&certs, jks_password)?);
    }

    Ok(ResolvedBundle { data, binary_data })
}
