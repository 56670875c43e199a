//! Per-namespace convergence of target ConfigMaps.
//!
//! The decision of what to do with a namespace's target object is computed by
//! [`plan_target`] without touching the cluster; [`sync_target`] reads the
//! live object, runs the planner and applies the outcome. Objects that are
//! not controller-owned are never written to or deleted, whatever the
//! selector says.

use std::collections::BTreeMap;

use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::ResourceExt;

use super::Context;
use super::source::ResolvedBundle;
use super::types::{BUNDLE_API_VERSION, BUNDLE_GROUP, BUNDLE_KIND, Bundle};
use crate::conditions::REASON_NOT_OWNED;
use crate::events_helper::emit_warning;
use crate::{Error, Result};

/// Outcome of planning one namespace's target object.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetPlan {
    /// Nothing to do.
    Leave,
    /// The object exists but belongs to someone else; hands off.
    WarnNotOwned,
    /// The namespace left the selector and the object is ours to remove.
    Delete,
    Create(ConfigMap),
    /// Replace with the merged object, unrelated content preserved.
    Apply(ConfigMap),
}

/// The owner reference stamped on every object this controller writes.
pub fn bundle_owner_reference(bundle: &Bundle) -> OwnerReference {
    OwnerReference {
        api_version: BUNDLE_API_VERSION.to_string(),
        kind: BUNDLE_KIND.to_string(),
        name: bundle.name_any(),
        uid: bundle.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// True when the object carries a controlling reference to this Bundle.
/// The uid is deliberately ignored so a recreated Bundle keeps its targets.
pub fn is_bundle_owned(target: &ConfigMap, bundle: &Bundle) -> bool {
    target.metadata.owner_references.iter().flatten().any(|or| {
        or.controller == Some(true)
            && or.kind == BUNDLE_KIND
            && or.api_version == BUNDLE_API_VERSION
            && or.name == bundle.name_any()
    })
}

/// Decision table over (selector match, object exists, controller-owned).
pub fn plan_target(
    bundle: &Bundle,
    namespace: &str,
    selector_matches: bool,
    existing: Option<&ConfigMap>,
    resolved: &ResolvedBundle,
) -> TargetPlan {
    match existing {
        None if !selector_matches => TargetPlan::Leave,
        None => TargetPlan::Create(desired_target(bundle, namespace, resolved)),
        Some(target) if !is_bundle_owned(target, bundle) => TargetPlan::WarnNotOwned,
        Some(_) if !selector_matches => TargetPlan::Delete,
        Some(target) if target_matches(target, bundle, resolved) => TargetPlan::Leave,
        Some(target) => TargetPlan::Apply(merged_target(target, bundle, resolved)),
    }
}

/// Exact byte equality for the configured keys plus presence of the canonical
/// owner reference.
fn target_matches(target: &ConfigMap, bundle: &Bundle, resolved: &ResolvedBundle) -> bool {
    let data_matches = target
        .data
        .as_ref()
        .and_then(|data| data.get(bundle.target_key()))
        .is_some_and(|value| *value == resolved.data);

    let binary_matches = resolved.binary_data.iter().all(|(key, bytes)| {
        target
            .binary_data
            .as_ref()
            .and_then(|binary| binary.get(key))
            .is_some_and(|value| value.0 == *bytes)
    });

    let owner_matches = target
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|or| *or == bundle_owner_reference(bundle));

    data_matches && binary_matches && owner_matches
}

fn desired_target(bundle: &Bundle, namespace: &str, resolved: &ResolvedBundle) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(bundle.name_any()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![bundle_owner_reference(bundle)]),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            bundle.target_key().to_string(),
            resolved.data.clone(),
        )])),
        binary_data: binary_data_for(resolved),
        ..ConfigMap::default()
    }
}

/// Overlay the desired keys and the canonical owner reference onto the live
/// object, leaving third-party keys and foreign owner references in place.
fn merged_target(existing: &ConfigMap, bundle: &Bundle, resolved: &ResolvedBundle) -> ConfigMap {
    let mut target = existing.clone();

    let mut owner_references = target.metadata.owner_references.take().unwrap_or_default();
    let canonical = bundle_owner_reference(bundle);
    match owner_references.iter_mut().find(|or| {
        or.controller == Some(true) && or.kind == BUNDLE_KIND && or.name == canonical.name
    }) {
        Some(existing_ref) => *existing_ref = canonical,
        None => owner_references.push(canonical),
    }
    target.metadata.owner_references = Some(owner_references);

    let mut data = target.data.take().unwrap_or_default();
    data.insert(bundle.target_key().to_string(), resolved.data.clone());
    target.data = Some(data);

    if !resolved.binary_data.is_empty() {
        let mut binary = target.binary_data.take().unwrap_or_default();
        for (key, bytes) in &resolved.binary_data {
            binary.insert(key.clone(), ByteString(bytes.clone()));
        }
        target.binary_data = Some(binary);
    }

    target
}

fn binary_data_for(resolved: &ResolvedBundle) -> Option<BTreeMap<String, ByteString>> {
    if resolved.binary_data.is_empty() {
        return None;
    }
    Some(
        resolved
            .binary_data
            .iter()
            .map(|(key, bytes)| (key.clone(), ByteString(bytes.clone())))
            .collect(),
    )
}

/// Bring one namespace's target object to the desired state. Returns whether
/// a mutation was performed.
pub async fn sync_target(
    ctx: &Context,
    bundle: &Bundle,
    namespace: &Namespace,
    resolved: &ResolvedBundle,
) -> Result<bool> {
    let empty = BTreeMap::new();
    let labels = namespace.metadata.labels.as_ref().unwrap_or(&empty);
    let selector_matches = bundle
        .spec
        .target
        .namespace_selector
        .as_ref()
        .map(|selector| selector.matches(labels))
        .unwrap_or(true);

    let ns_name = namespace.name_any();
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ns_name);
    let existing = api
        .get_opt(&bundle.name_any())
        .await
        .map_err(Error::KubeError)?;

    match plan_target(bundle, &ns_name, selector_matches, existing.as_ref(), resolved) {
        TargetPlan::Leave => Ok(false),
        TargetPlan::WarnNotOwned => {
            emit_warning(
                &ctx.recorder,
                bundle,
                REASON_NOT_OWNED,
                "Syncing",
                Some(format!("ConfigMap is not owned by {BUNDLE_GROUP} so ignoring")),
            )
            .await;
            Ok(false)
        }
        TargetPlan::Delete => {
            api.delete(&bundle.name_any(), &DeleteParams::default())
                .await
                .map_err(Error::KubeError)?;
            Ok(true)
        }
        TargetPlan::Create(target) => {
            api.create(&PostParams::default(), &target)
                .await
                .map_err(Error::KubeError)?;
            Ok(true)
        }
        TargetPlan::Apply(target) => {
            // The merged object carries the live resourceVersion, so a
            // concurrent writer surfaces as a conflict and a requeue.
            api.replace(&bundle.name_any(), &PostParams::default(), &target)
                .await
                .map_err(Error::KubeError)?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::*;
    use super::*;
    use crate::testdata::TEST_CERT_1;

    const NAMESPACE: &str = "test-namespace";
    const PEM_KEY: &str = "trust.pem";
    const JKS_KEY: &str = "trust.jks";

    fn test_bundle(with_jks: bool) -> Bundle {
        Bundle::new(
            "test-bundle",
            BundleSpec {
                sources: vec![BundleSource {
                    in_line: Some(TEST_CERT_1.into()),
                    ..BundleSource::default()
                }],
                target: BundleTarget {
                    config_map: Some(KeySelector { key: PEM_KEY.into() }),
                    additional_formats: with_jks.then(|| AdditionalFormats {
                        jks: Some(KeySelector { key: JKS_KEY.into() }),
                    }),
                    ..BundleTarget::default()
                },
            },
        )
    }

    fn resolved(with_jks: bool) -> ResolvedBundle {
        ResolvedBundle {
            data: TEST_CERT_1.into(),
            binary_data: if with_jks {
                BTreeMap::from([(JKS_KEY.to_string(), vec![0xFE, 0xED, 0xFE, 0xED])])
            } else {
                BTreeMap::new()
            },
        }
    }

    fn owned_target(bundle: &Bundle, data: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(bundle.name_any()),
                namespace: Some(NAMESPACE.into()),
                owner_references: Some(vec![bundle_owner_reference(bundle)]),
                ..ObjectMeta::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..ConfigMap::default()
        }
    }

    fn foreign_target(bundle: &Bundle) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(bundle.name_any()),
                namespace: Some(NAMESPACE.into()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(PEM_KEY.to_string(), TEST_CERT_1.to_string())])),
            ..ConfigMap::default()
        }
    }

    #[test]
    fn absent_object_outside_selector_is_left_alone() {
        let bundle = test_bundle(false);
        let plan = plan_target(&bundle, NAMESPACE, false, None, &resolved(false));
        assert_eq!(plan, TargetPlan::Leave);
    }

    #[test]
    fn absent_object_inside_selector_is_created() {
        let bundle = test_bundle(false);
        let plan = plan_target(&bundle, NAMESPACE, true, None, &resolved(false));
        let TargetPlan::Create(target) = plan else {
            panic!("expected Create, got {plan:?}");
        };
        assert_eq!(target.metadata.name.as_deref(), Some("test-bundle"));
        assert_eq!(target.metadata.namespace.as_deref(), Some(NAMESPACE));
        assert_eq!(
            target.data.as_ref().unwrap().get(PEM_KEY).unwrap(),
            TEST_CERT_1
        );
        assert_eq!(
            target.metadata.owner_references.as_ref().unwrap()[0],
            bundle_owner_reference(&bundle)
        );
        assert!(target.binary_data.is_none());
    }

    #[test]
    fn created_object_carries_jks_when_requested() {
        let bundle = test_bundle(true);
        let plan = plan_target(&bundle, NAMESPACE, true, None, &resolved(true));
        let TargetPlan::Create(target) = plan else {
            panic!("expected Create, got {plan:?}");
        };
        let binary = target.binary_data.as_ref().unwrap();
        assert_eq!(binary.get(JKS_KEY).unwrap().0, vec![0xFE, 0xED, 0xFE, 0xED]);
    }

    #[test]
    fn foreign_object_is_never_touched() {
        let bundle = test_bundle(false);
        let target = foreign_target(&bundle);
        for selector_matches in [true, false] {
            let plan = plan_target(
                &bundle,
                NAMESPACE,
                selector_matches,
                Some(&target),
                &resolved(false),
            );
            assert_eq!(plan, TargetPlan::WarnNotOwned);
        }
    }

    #[test]
    fn object_with_different_controller_is_foreign() {
        let bundle = test_bundle(false);
        let mut target = foreign_target(&bundle);
        target.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
            name: "other".into(),
            controller: Some(true),
            ..OwnerReference::default()
        }]);
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(false));
        assert_eq!(plan, TargetPlan::WarnNotOwned);
    }

    #[test]
    fn owned_object_outside_selector_is_deleted() {
        let bundle = test_bundle(false);
        let target = owned_target(&bundle, &[(PEM_KEY, TEST_CERT_1)]);
        let plan = plan_target(&bundle, NAMESPACE, false, Some(&target), &resolved(false));
        assert_eq!(plan, TargetPlan::Delete);
    }

    #[test]
    fn owned_object_with_correct_content_is_left_alone() {
        let bundle = test_bundle(false);
        let target = owned_target(&bundle, &[(PEM_KEY, TEST_CERT_1)]);
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(false));
        assert_eq!(plan, TargetPlan::Leave);
    }

    #[test]
    fn extra_keys_and_owners_do_not_force_an_update() {
        let bundle = test_bundle(false);
        let mut target = owned_target(
            &bundle,
            &[(PEM_KEY, TEST_CERT_1), ("another-key", "another-data")],
        );
        target
            .metadata
            .owner_references
            .as_mut()
            .unwrap()
            .push(OwnerReference {
                api_version: BUNDLE_API_VERSION.into(),
                kind: BUNDLE_KIND.into(),
                name: "another-bundle".into(),
                controller: Some(true),
                block_owner_deletion: Some(true),
                ..OwnerReference::default()
            });
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(false));
        assert_eq!(plan, TargetPlan::Leave);
    }

    #[test]
    fn wrong_data_is_replaced_but_unrelated_content_kept() {
        let bundle = test_bundle(false);
        let target = owned_target(
            &bundle,
            &[(PEM_KEY, "wrong data"), ("another-key", "another-data")],
        );
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(false));
        let TargetPlan::Apply(merged) = plan else {
            panic!("expected Apply, got {plan:?}");
        };
        let data = merged.data.as_ref().unwrap();
        assert_eq!(data.get(PEM_KEY).unwrap(), TEST_CERT_1);
        assert_eq!(data.get("another-key").unwrap(), "another-data");
    }

    #[test]
    fn data_under_wrong_key_is_fixed_without_dropping_it() {
        let bundle = test_bundle(false);
        let target = owned_target(&bundle, &[("wrong-key", TEST_CERT_1)]);
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(false));
        let TargetPlan::Apply(merged) = plan else {
            panic!("expected Apply, got {plan:?}");
        };
        let data = merged.data.as_ref().unwrap();
        assert_eq!(data.get(PEM_KEY).unwrap(), TEST_CERT_1);
        assert!(data.contains_key("wrong-key"));
    }

    #[test]
    fn missing_jks_forces_an_update() {
        let bundle = test_bundle(true);
        let target = owned_target(&bundle, &[(PEM_KEY, TEST_CERT_1)]);
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(true));
        let TargetPlan::Apply(merged) = plan else {
            panic!("expected Apply, got {plan:?}");
        };
        let binary = merged.binary_data.as_ref().unwrap();
        assert_eq!(binary.get(JKS_KEY).unwrap().0, vec![0xFE, 0xED, 0xFE, 0xED]);
    }

    #[test]
    fn jks_under_wrong_key_is_added_at_the_right_one() {
        let bundle = test_bundle(true);
        let mut target = owned_target(&bundle, &[(PEM_KEY, TEST_CERT_1)]);
        target.binary_data = Some(BTreeMap::from([(
            "wrong-key".to_string(),
            ByteString(b"stale".to_vec()),
        )]));
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(true));
        let TargetPlan::Apply(merged) = plan else {
            panic!("expected Apply, got {plan:?}");
        };
        let binary = merged.binary_data.as_ref().unwrap();
        assert_eq!(binary.get(JKS_KEY).unwrap().0, vec![0xFE, 0xED, 0xFE, 0xED]);
        assert!(binary.contains_key("wrong-key"));
    }

    #[test]
    fn degraded_owner_reference_is_restored() {
        let bundle = test_bundle(false);
        let mut target = owned_target(&bundle, &[(PEM_KEY, TEST_CERT_1)]);
        target.metadata.owner_references.as_mut().unwrap()[0].block_owner_deletion = None;
        let plan = plan_target(&bundle, NAMESPACE, true, Some(&target), &resolved(false));
        let TargetPlan::Apply(merged) = plan else {
            panic!("expected Apply, got {plan:?}");
        };
        assert_eq!(
            merged.metadata.owner_references.as_ref().unwrap(),
            &vec![bundle_owner_reference(&bundle)]
        );
    }

    // Selector flip lifecycle: create, then delete once the namespace stops
    // matching, then settle.
    #[test]
    fn selector_flip_converges_in_two_steps() {
        let bundle = test_bundle(false);
        let resolved = resolved(false);

        let plan = plan_target(&bundle, NAMESPACE, true, None, &resolved);
        let TargetPlan::Create(created) = plan else {
            panic!("expected Create, got {plan:?}");
        };

        let plan = plan_target(&bundle, NAMESPACE, false, Some(&created), &resolved);
        assert_eq!(plan, TargetPlan::Delete);

        let plan = plan_target(&bundle, NAMESPACE, false, None, &resolved);
        assert_eq!(plan, TargetPlan::Leave);
    }
}
