//! Reboot Policy Evaluator.

use crate::backend::HostState;
use anyhow::Result;
use autopatch_common::{RebootPolicy, RebootRecommendation, UpdateCandidate};
use tracing::debug;

/// Decide whether the applied set warrants a reboot. Never triggers one.
pub async fn evaluate(
    policy: RebootPolicy,
    applied: &[UpdateCandidate],
    host: &dyn HostState,
) -> Result<RebootRecommendation> {
    let recommendation = match policy {
        RebootPolicy::Never => RebootRecommendation::default(),
        _ if applied.is_empty() => RebootRecommendation::default(),
        RebootPolicy::WhenChanged => RebootRecommendation {
            recommended: true,
            reason: format!("{} packages updated", applied.len()),
            triggered: false,
        },
        RebootPolicy::WhenNeeded => match host.reboot_required(applied).await? {
            Some(reason) => RebootRecommendation {
                recommended: true,
                reason,
                triggered: false,
            },
            None => RebootRecommendation::default(),
        },
    };

    debug!(
        "Reboot policy {}: recommended={}",
        policy.as_str(),
        recommendation.recommended
    );
    Ok(recommendation)
}
