use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        WatchStreamExt,
        controller::{Action, Controller},
        events::{Recorder, Reporter},
        reflector::{self, ObjectRef},
        watcher,
    },
};
use serde::Serialize;
use tokio::{sync::RwLock, time::Duration};
use tracing::*;

use super::types::{BUNDLE_KIND, Bundle};
use crate::fspkg::Package;
use crate::jks::DEFAULT_JKS_PASSWORD;
use crate::{Error, Result};

/// Upper bound on a single reconcile cycle.
const RECONCILE_DEADLINE: Duration = Duration::from_secs(60);
/// Backoff for sources that are referenced but not there yet.
const NOT_FOUND_REQUEUE: Duration = Duration::from_secs(5);
/// Backoff for everything else.
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Startup configuration shared by every reconcile.
#[derive(Clone)]
pub struct Settings {
    /// Namespace source ConfigMaps and Secrets are read from
    pub trust_namespace: String,
    /// Password for generated JKS keystores
    pub jks_password: String,
    /// Default CA package, when one was loaded at startup
    pub default_package: Option<Arc<Package>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            trust_namespace: "cert-manager".into(),
            jks_password: DEFAULT_JKS_PASSWORD.into(),
            default_package: None,
        }
    }
}

// Context for the reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Event recorder
    pub recorder: Recorder,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Namespace source objects are read from
    pub trust_namespace: String,
    /// Password for generated JKS keystores
    pub jks_password: String,
    /// Default CA package capability
    pub default_package: Option<Arc<Package>>,
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "bundle-controller".into(),
        }
    }
}

impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    diagnostics: Arc<RwLock<Diagnostics>>,
    settings: Settings,
}

impl State {
    pub fn new(settings: Settings) -> Self {
        Self {
            diagnostics: Arc::default(),
            settings,
        }
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub async fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client: client.clone(),
            recorder: self.diagnostics.read().await.recorder(client),
            diagnostics: self.diagnostics.clone(),
            trust_namespace: self.settings.trust_namespace.clone(),
            jks_password: self.settings.jks_password.clone(),
            default_package: self.settings.default_package.clone(),
        })
    }
}

async fn reconcile_bundle(bundle: Arc<Bundle>, ctx: Arc<Context>) -> Result<Action> {
    info!("Reconciling Bundle \"{}\"", bundle.name_any());
    {
        let mut diagnostics = ctx.diagnostics.write().await;
        diagnostics.last_event = Utc::now();
    }
    tokio::time::timeout(RECONCILE_DEADLINE, bundle.reconcile(ctx.clone()))
        .await
        .map_err(|_| Error::DeadlineExceeded)?
}

fn error_policy(_: Arc<Bundle>, error: &Error, _: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    if error.is_not_found() {
        Action::requeue(NOT_FOUND_REQUEUE)
    } else {
        Action::requeue(ERROR_REQUEUE)
    }
}

/// Bundles to re-reconcile for an event on a ConfigMap: every Bundle sourcing
/// the object by name, the Bundle named by its controlling owner reference,
/// and the Bundle sharing its name (a not-yet-owned target).
pub fn bundles_for_config_map(
    bundles: &[Arc<Bundle>],
    config_map: &ConfigMap,
) -> Vec<ObjectRef<Bundle>> {
    let name = config_map.name_any();
    let controller_owner = config_map
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|or| or.controller == Some(true) && or.kind == BUNDLE_KIND)
        .map(|or| or.name.clone());

    bundles
        .iter()
        .filter(|bundle| {
            let sourced = bundle.spec.sources.iter().any(|source| {
                source
                    .config_map
                    .as_ref()
                    .is_some_and(|selector| selector.name == name)
            });
            sourced
                || controller_owner.as_deref() == Some(&bundle.name_any())
                || bundle.name_any() == name
        })
        .map(|bundle| ObjectRef::from_obj(bundle.as_ref()))
        .collect()
}

/// Bundles to re-reconcile for an event on a Secret: source references only.
pub fn bundles_for_secret(bundles: &[Arc<Bundle>], secret: &Secret) -> Vec<ObjectRef<Bundle>> {
    let name = secret.name_any();
    bundles
        .iter()
        .filter(|bundle| {
            bundle.spec.sources.iter().any(|source| {
                source
                    .secret
                    .as_ref()
                    .is_some_and(|selector| selector.name == name)
            })
        })
        .map(|bundle| ObjectRef::from_obj(bundle.as_ref()))
        .collect()
}

/// Namespace membership is global input, so namespace events fan out to all.
pub fn all_bundles(bundles: &[Arc<Bundle>]) -> Vec<ObjectRef<Bundle>> {
    bundles
        .iter()
        .map(|bundle| ObjectRef::from_obj(bundle.as_ref()))
        .collect()
}

pub async fn run(state: State) {
    let client = Client::try_default()
        .await
        .expect("Expected a valid KUBECONFIG environment variable");
    let api_bundle = Api::<Bundle>::all(client.clone());
    if let Err(e) = api_bundle.list(&ListParams::default().limit(1)).await {
        error!("Bundle CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin gencrd | kubectl apply -f -");
        std::process::exit(1);
    }

    // A reflector keeps the Bundle set available to the watch mappers below,
    // which have to answer "which Bundles reference this object" without I/O.
    let (store, writer) = reflector::store::<Bundle>();
    let bundle_events = reflector::reflector(
        writer,
        watcher(api_bundle.clone(), watcher::Config::default().any_semantic()),
    );
    tokio::spawn(async move {
        bundle_events
            .applied_objects()
            .for_each(|_| futures::future::ready(()))
            .await;
    });

    let config_maps = Api::<ConfigMap>::all(client.clone());
    let secrets = Api::<Secret>::all(client.clone());
    let namespaces = Api::<Namespace>::all(client.clone());

    let cm_store = store.clone();
    let secret_store = store.clone();
    let ns_store = store.clone();

    Controller::new(api_bundle, watcher::Config::default().any_semantic())
        .watches(config_maps, watcher::Config::default(), move |config_map| {
            bundles_for_config_map(&cm_store.state(), &config_map)
        })
        .watches(secrets, watcher::Config::default(), move |secret| {
            bundles_for_secret(&secret_store.state(), &secret)
        })
        .watches(namespaces, watcher::Config::default(), move |_namespace| {
            all_bundles(&ns_store.state())
        })
        .shutdown_on_signal()
        .run(
            reconcile_bundle,
            error_policy,
            state.to_context(client.clone()).await,
        )
        .filter_map(async |x| std::result::Result::ok(x))
        .for_each(async |_| ())
        .await;
}

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    fn bundle_sourcing(name: &str, config_map: Option<&str>, secret: Option<&str>) -> Arc<Bundle> {
        Arc::new(Bundle::new(
            name,
            BundleSpec {
                sources: vec![BundleSource {
                    config_map: config_map.map(|cm| SourceObjectKeySelector {
                        name: cm.into(),
                        key: "k".into(),
                    }),
                    secret: secret.map(|s| SourceObjectKeySelector {
                        name: s.into(),
                        key: "k".into(),
                    }),
                    ..BundleSource::default()
                }],
                target: BundleTarget {
                    config_map: Some(KeySelector { key: "trust.pem".into() }),
                    ..BundleTarget::default()
                },
            },
        ))
    }

    fn named_config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[test]
    fn config_map_events_map_to_sourcing_bundles() {
        let bundles = vec![
            bundle_sourcing("a", Some("shared-cas"), None),
            bundle_sourcing("b", Some("other-cas"), None),
            bundle_sourcing("c", Some("shared-cas"), None),
        ];
        let refs = bundles_for_config_map(&bundles, &named_config_map("shared-cas"));
        let names: Vec<String> = refs.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn target_events_map_by_owner_reference() {
        let bundles = vec![bundle_sourcing("a", Some("cas"), None)];
        let mut target = named_config_map("some-target");
        target.metadata.owner_references = Some(vec![OwnerReference {
            api_version: BUNDLE_API_VERSION.into(),
            kind: BUNDLE_KIND.into(),
            name: "a".into(),
            controller: Some(true),
            ..OwnerReference::default()
        }]);
        let refs = bundles_for_config_map(&bundles, &target);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "a");
    }

    #[test]
    fn target_events_map_by_name_for_unowned_objects() {
        let bundles = vec![bundle_sourcing("a", Some("cas"), None)];
        let refs = bundles_for_config_map(&bundles, &named_config_map("a"));
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "a");
    }

    #[test]
    fn unrelated_config_maps_map_to_nothing() {
        let bundles = vec![bundle_sourcing("a", Some("cas"), None)];
        assert!(bundles_for_config_map(&bundles, &named_config_map("unrelated")).is_empty());
    }

    #[test]
    fn secret_events_map_to_sourcing_bundles_only() {
        let bundles = vec![
            bundle_sourcing("a", None, Some("tls-roots")),
            bundle_sourcing("b", Some("tls-roots"), None),
        ];
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("tls-roots".into()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        };
        let refs = bundles_for_secret(&bundles, &secret);
        let names: Vec<String> = refs.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn namespace_events_fan_out_to_every_bundle() {
        let bundles = vec![
            bundle_sourcing("a", Some("cas"), None),
            bundle_sourcing("b", None, Some("cas")),
        ];
        assert_eq!(all_bundles(&bundles).len(), 2);
    }
}
