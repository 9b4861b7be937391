//! Update Query - available upgrades narrowed to the run's scope.

use crate::backend::PackageBackend;
use crate::error::RunError;
use autopatch_common::{UpdateCandidate, UpgradeScope};
use glob::Pattern;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct UpdateQuery<'a> {
    backend: &'a dyn PackageBackend,
    scope: &'a UpgradeScope,
    exclude: &'a [String],
    timeout: Duration,
}

impl<'a> UpdateQuery<'a> {
    pub fn new(
        backend: &'a dyn PackageBackend,
        scope: &'a UpgradeScope,
        exclude: &'a [String],
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            scope,
            exclude,
            timeout,
        }
    }

    /// Candidates from `available_repos` that match the scope. An empty
    /// list means the system is up to date.
    pub async fn list_candidates(
        &self,
        available_repos: &[String],
    ) -> Result<Vec<UpdateCandidate>, RunError> {
        let all = tokio::time::timeout(self.timeout, self.backend.available_upgrades(available_repos))
            .await
            .map_err(|_| RunError::Query(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| RunError::Query(format!("{:#}", e)))?;

        let total = all.len();
        let selected = select(all, self.scope, available_repos, self.exclude);
        info!(
            "{} of {} available upgrades match scope {}",
            selected.len(),
            total,
            self.scope
        );
        Ok(selected)
    }
}

/// Filter by repository, exclusion list and scope, then order by (name, arch)
pub fn select(
    candidates: Vec<UpdateCandidate>,
    scope: &UpgradeScope,
    available_repos: &[String],
    exclude: &[String],
) -> Vec<UpdateCandidate> {
    let exclude = exclude_patterns(exclude);
    let mut selected: Vec<UpdateCandidate> = candidates
        .into_iter()
        .filter(|c| {
            if !available_repos.contains(&c.repo) {
                debug!("Dropping {}: repository {} unavailable", c.name, c.repo);
                return false;
            }
            if exclude.iter().any(|pattern| pattern.matches(&c.name)) {
                debug!("Dropping {}: excluded", c.name);
                return false;
            }
            scope.matches(c)
        })
        .collect();

    selected.sort_by(|a, b| (&a.name, &a.arch).cmp(&(&b.name, &b.arch)));
    selected
}

/// `excludepkgs` entries as shell globs; invalid ones are skipped
fn exclude_patterns(exclude: &[String]) -> Vec<Pattern> {
    exclude
        .iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!("Ignoring excludepkgs entry {:?}: {}", raw, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FakeBackend, FakeBackendBuilder};
    use autopatch_common::Severity;

    fn repos() -> Vec<String> {
        vec!["fedora".to_string(), "updates".to_string()]
    }

    #[test]
    fn test_security_scope_picks_exactly_security() {
        let candidates = vec![
            FakeBackend::candidate("vim", "updates"),
            FakeBackend::security_candidate("openssl", "updates", "FEDORA-1", None),
            FakeBackend::candidate("bash", "updates"),
            FakeBackend::security_candidate("curl", "fedora", "FEDORA-2", Some(Severity::Low)),
            FakeBackend::candidate("zsh", "fedora"),
        ];

        let selected = select(candidates, &UpgradeScope::Security, &repos(), &[]);
        let names: Vec<&str> = selected.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["curl", "openssl"]);
    }

    #[test]
    fn test_unavailable_repo_and_excludes_dropped() {
        let candidates = vec![
            FakeBackend::candidate("kernel-core", "updates"),
            FakeBackend::candidate("kernel-modules", "updates"),
            FakeBackend::candidate("git", "testing"),
            FakeBackend::candidate("bash", "fedora"),
        ];
        let exclude = vec!["kernel*".to_string()];

        let selected = select(candidates, &UpgradeScope::All, &repos(), &exclude);
        let names: Vec<&str> = selected.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["bash"]);
    }

    #[test]
    fn test_stable_order_by_name_then_arch() {
        let mut i686 = FakeBackend::candidate("glibc", "updates");
        i686.arch = "i686".to_string();
        let candidates = vec![
            FakeBackend::candidate("glibc", "updates"),
            FakeBackend::candidate("bash", "updates"),
            i686,
        ];

        let selected = select(candidates, &UpgradeScope::All, &repos(), &[]);
        let ids: Vec<String> = selected.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["bash.x86_64", "glibc.i686", "glibc.x86_64"]);
    }

    #[test]
    fn test_exclude_globs() {
        let candidates = vec![
            FakeBackend::candidate("openssl-devel", "updates"),
            FakeBackend::candidate("python3", "updates"),
            FakeBackend::candidate("bash", "updates"),
            FakeBackend::candidate("bash-completion", "updates"),
            FakeBackend::candidate("openssl", "updates"),
        ];
        let exclude = vec![
            "*-devel".to_string(),
            "py?hon3".to_string(),
            "bash".to_string(),
        ];

        let selected = select(candidates, &UpgradeScope::All, &repos(), &exclude);
        let names: Vec<&str> = selected.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["bash-completion", "openssl"]);
    }

    #[test]
    fn test_invalid_exclude_pattern_skipped() {
        let candidates = vec![
            FakeBackend::candidate("vim", "updates"),
            FakeBackend::candidate("zsh", "updates"),
        ];
        let exclude = vec!["[vim".to_string(), "zsh".to_string()];

        let selected = select(candidates, &UpgradeScope::All, &repos(), &exclude);
        let names: Vec<&str> = selected.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["vim"]);
    }

    #[tokio::test]
    async fn test_query_limited_to_available_repos() {
        let backend = FakeBackendBuilder::new()
            .repo("fedora", None)
            .failing_repo("updates-testing")
            .candidate(FakeBackend::candidate("bash", "fedora"))
            .candidate(FakeBackend::candidate("vim", "updates-testing"))
            .build();
        let scope = UpgradeScope::All;
        let available = vec!["fedora".to_string()];
        let query = UpdateQuery::new(&backend, &scope, &[], Duration::from_secs(5));

        let selected = query.list_candidates(&available).await.unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(backend.last_query_repos(), available);
    }

    #[tokio::test]
    async fn test_empty_result_is_not_error() {
        let backend = FakeBackendBuilder::new().repo("fedora", None).build();
        let scope = UpgradeScope::All;
        let query = UpdateQuery::new(&backend, &scope, &[], Duration::from_secs(5));
        assert!(query.list_candidates(&repos()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_failure() {
        let backend = FakeBackendBuilder::new().query_error("dnf crashed").build();
        let scope = UpgradeScope::All;
        let query = UpdateQuery::new(&backend, &scope, &[], Duration::from_secs(5));
        let err = query.list_candidates(&repos()).await.unwrap_err();
        assert!(matches!(err, RunError::Query(msg) if msg.contains("dnf crashed")));
    }
}
