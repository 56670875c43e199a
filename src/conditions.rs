use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
pub use trust_operator_derive::Conditions as DeriveConditions;

/// The single condition type tracked on a Bundle.
pub static CONDITION_SYNCED: &str = "Synced";

// Reasons used on the Synced condition and on published events.
pub static REASON_SYNCED: &str = "Synced";
pub static REASON_INVALID_BUNDLE: &str = "InvalidBundle";
pub static REASON_SOURCE_NOT_FOUND: &str = "SourceNotFound";
pub static REASON_SOURCE_BUILD_ERROR: &str = "SourceBuildError";
pub static REASON_SYNC_TARGET_FAILED: &str = "SyncTargetFailed";
pub static REASON_NOT_OWNED: &str = "NotOwned";

/// Types exposing a Kubernetes-style `conditions` list.
pub trait Conditions {
    fn conditions(&self) -> &Option<Vec<Condition>>;
    fn conditions_mut(&mut self) -> &mut Option<Vec<Condition>>;

    /// Insert or update a boolean condition. `lastTransitionTime` only moves
    /// when the status flips; reason, message and observedGeneration are
    /// refreshed either way. Condition types stay unique.
    fn set_condition(
        &mut self,
        type_: &str,
        status: bool,
        reason: &str,
        message: &str,
        observed_generation: i64,
    ) {
        let status = if status { "True" } else { "False" };
        let fresh = Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: Some(observed_generation),
            last_transition_time: Time(chrono::Utc::now()),
        };

        let conditions = self.conditions_mut().get_or_insert_with(Vec::new);
        match conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) if existing.status == status => {
                existing.reason = fresh.reason;
                existing.message = fresh.message;
                existing.observed_generation = fresh.observed_generation;
            }
            Some(existing) => *existing = fresh,
            None => conditions.push(fresh),
        }
    }

    fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions()
            .as_ref()
            .and_then(|conds| conds.iter().find(|c| c.type_ == type_))
    }
}
