use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition as K8sCondition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::conditions::DeriveConditions;

pub static BUNDLE_GROUP: &str = "trust.cert-manager.io";
pub static BUNDLE_API_VERSION: &str = "trust.cert-manager.io/v1alpha1";
pub static BUNDLE_KIND: &str = "Bundle";
pub static BUNDLE_MANAGER_NAME: &str = "bundle-controller";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
#[kube(
    group = "trust.cert-manager.io",
    version = "v1alpha1",
    kind = "Bundle",
    derive = "Default",
    shortname = "bundle",
    doc = "Bundle assembles trust anchors from a list of sources and distributes them to a ConfigMap in every selected namespace",
    printcolumn = r#"{"name":"Target Key","jsonPath":".spec.target.configMap.key","type":"string"}"#,
    printcolumn = r#"{"name":"Synced","jsonPath":".status.conditions[?(@.type == \"Synced\")].status","type":"string"}"#,
    printcolumn = r#"{"name":"Reason","jsonPath":".status.conditions[?(@.type == \"Synced\")].reason","type":"string"}"#,
    status = "BundleStatus"
)]
pub struct BundleSpec {
    /// Inputs concatenated, in order, into the distributed bundle
    pub sources: Vec<BundleSource>,
    /// Shape of the per-namespace object the bundle is written to
    pub target: BundleTarget,
}

/// One trust input. Exactly one of the fields must be set per item.
#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleSource {
    /// A data key of a ConfigMap in the trust namespace
    pub config_map: Option<SourceObjectKeySelector>,
    /// A data key of a Secret in the trust namespace
    pub secret: Option<SourceObjectKeySelector>,
    /// Literal PEM text
    pub in_line: Option<String>,
    /// Include the default CA package configured at startup.
    /// `false` contributes nothing
    #[serde(rename = "useDefaultCAs")]
    pub use_default_cas: Option<bool>,
}

/// Names an object and the data key to read from it.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceObjectKeySelector {
    pub name: String,
    pub key: String,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    /// Data key the PEM bundle is written to in each target ConfigMap
    pub config_map: Option<KeySelector>,
    /// Alternate encodings written next to the PEM data
    pub additional_formats: Option<AdditionalFormats>,
    /// Restricts distribution to namespaces matching these labels.
    /// Absent means all namespaces
    pub namespace_selector: Option<NamespaceSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeySelector {
    pub key: String,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalFormats {
    /// Java KeyStore rendition, written to the binary data of the target
    pub jks: Option<KeySelector>,
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    pub match_labels: Option<BTreeMap<String, String>>,
}

impl NamespaceSelector {
    /// True when every required label is present with the required value.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .flatten()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[skip_serializing_none]
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, DeriveConditions, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    /// Latest observations of the Bundle's state
    pub conditions: Option<Vec<K8sCondition>>,
    /// Version of the default CA package baked into the distributed bundle,
    /// present only while a source requests the default CAs
    #[serde(rename = "defaultCAPackageVersion")]
    pub default_ca_package_version: Option<String>,
}

impl Bundle {
    /// Key the PEM data is written under, empty until validation has run.
    pub fn target_key(&self) -> &str {
        self.spec
            .target
            .config_map
            .as_ref()
            .map(|sel| sel.key.as_str())
            .unwrap_or_default()
    }

    /// Key for the JKS rendition, when requested.
    pub fn jks_key(&self) -> Option<&str> {
        self.spec
            .target
            .additional_formats
            .as_ref()
            .and_then(|formats| formats.jks.as_ref())
            .map(|sel| sel.key.as_str())
    }

    /// True when any source opts into the default CA package.
    pub fn requests_default_cas(&self) -> bool {
        self.spec
            .sources
            .iter()
            .any(|source| source.use_default_cas == Some(true))
    }
}
