//! The Bundle reconcile cycle: validate, resolve, fan out, report.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, ListParams, Patch, PatchParams, ResourceExt},
    runtime::controller::Action,
};
use serde_json::json;
use tokio::time::Duration;
use tracing::*;

use super::Context;
use super::source::{ClusterSourceReader, resolve_sources};
use super::sync::sync_target;
use super::types::{BUNDLE_MANAGER_NAME, Bundle, BundleStatus};
use super::validation::validate_bundle;
use crate::conditions::{
    CONDITION_SYNCED, Conditions, REASON_INVALID_BUNDLE, REASON_SOURCE_BUILD_ERROR,
    REASON_SOURCE_NOT_FOUND, REASON_SYNC_TARGET_FAILED, REASON_SYNCED,
};
use crate::events_helper::emit_info;
use crate::{Error, Result};

/// Periodic resync interval on success.
const RESYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

impl Bundle {
    pub async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        debug!("Reconciling Bundle {:?}", self.name_any());
        let api: Api<Bundle> = Api::all(ctx.client.clone());
        let generation = self.metadata.generation.unwrap_or(0);
        let observed = self.status.clone().unwrap_or_default();
        let mut status = observed.clone();

        match validate_bundle(self).into_result() {
            Ok(warnings) => {
                for warning in warnings {
                    debug!("Bundle {:?}: {warning}", self.name_any());
                }
            }
            Err(err) => {
                status.set_condition(
                    CONDITION_SYNCED,
                    false,
                    REASON_INVALID_BUNDLE,
                    &format!("Invalid Bundle: {err}"),
                    generation,
                );
                status.default_ca_package_version = None;
                self.patch_status_if_changed(&api, &observed, status).await?;
                // Terminal for this generation; only a spec change can fix it.
                return Ok(Action::await_change());
            }
        }

        let reader = ClusterSourceReader::new(ctx.client.clone(), &ctx.trust_namespace);
        let resolved = match resolve_sources(
            self,
            &reader,
            ctx.default_package.as_deref(),
            &ctx.jks_password,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(err) => {
                let reason = if err.is_not_found() {
                    REASON_SOURCE_NOT_FOUND
                } else {
                    REASON_SOURCE_BUILD_ERROR
                };
                status.set_condition(
                    CONDITION_SYNCED,
                    false,
                    reason,
                    &format!("Failed to build source bundle: {err}"),
                    generation,
                );
                status.default_ca_package_version = None;
                self.patch_status_if_changed(&api, &observed, status).await?;
                return Err(err);
            }
        };

        let api_ns: Api<Namespace> = Api::all(ctx.client.clone());
        let namespaces = api_ns
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        let total = namespaces.items.len();
        let mut updated = 0usize;

        for namespace in &namespaces {
            match sync_target(&ctx, self, namespace, &resolved).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(err) => {
                    status.set_condition(
                        CONDITION_SYNCED,
                        false,
                        REASON_SYNC_TARGET_FAILED,
                        &format!(
                            "Failed to sync target in namespace {:?}: {err}",
                            namespace.name_any()
                        ),
                        generation,
                    );
                    self.patch_status_if_changed(&api, &observed, status).await?;
                    return Err(err);
                }
            }
        }

        if updated > 0 {
            emit_info(
                &ctx.recorder,
                self,
                REASON_SYNCED,
                "Syncing",
                Some(format!("Synced bundle to {updated} of {total} namespaces")),
            )
            .await;
        }

        status.default_ca_package_version = if self.requests_default_cas() {
            ctx.default_package.as_ref().map(|pkg| pkg.version.clone())
        } else {
            None
        };
        status.set_condition(
            CONDITION_SYNCED,
            true,
            REASON_SYNCED,
            &format!("Successfully synced Bundle to {total} namespaces"),
            generation,
        );
        self.patch_status_if_changed(&api, &observed, status).await?;

        Ok(Action::requeue(RESYNC_INTERVAL))
    }

    /// Server-side status patch, skipped when nothing changed to avoid a
    /// write loop between the reconciler and its own watch.
    async fn patch_status_if_changed(
        &self,
        api: &Api<Bundle>,
        observed: &BundleStatus,
        next: BundleStatus,
    ) -> Result<()> {
        if *observed == next {
            return Ok(());
        }
        let serverside = PatchParams::apply(BUNDLE_MANAGER_NAME);
        let patch = Patch::Merge(json!({ "status": next }));
        api.patch_status(&self.name_any(), &serverside, &patch)
            .await
            .map_err(Error::KubeError)?;
        Ok(())
    }
}
