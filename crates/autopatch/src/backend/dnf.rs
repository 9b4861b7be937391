//! dnf / rpm package collaborator.
//!
//! Shells out to `dnf` and `rpm` for metadata, queries and transactions, and
//! downloads artifacts with a URL location over HTTP.

use super::{FetchError, PackageBackend, RepoState, TransactionError};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use autopatch_common::{
    Advisory, AdvisoryKind, Checksum, DownloadedArtifact, Severity, UpdateCandidate,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// dnf metadata cache root
pub const DNF_CACHE_DIR: &str = "/var/cache/dnf";

/// Upgrade query: name, arch, evr, repo, location, "algo:digest"
const UPGRADE_QUERYFORMAT: &str =
    "%{name}\\t%{arch}\\t%{evr}\\t%{repoid}\\t%{location}\\t%{checksum}\\n";

const INSTALLED_QUERYFORMAT: &str = "%{NAME}\\t%{ARCH}\\t%{EPOCHNUM}:%{VERSION}-%{RELEASE}\\n";

pub struct DnfBackend {
    dnf: String,
    rpm: String,
    cache_root: PathBuf,
    /// Limit for metadata and query commands
    query_timeout: Duration,
    /// Limit for the upgrade transaction
    apply_timeout: Duration,
    http: reqwest::Client,
}

impl DnfBackend {
    pub fn new(query_timeout: Duration, apply_timeout: Duration) -> Self {
        Self {
            dnf: "dnf".to_string(),
            rpm: "rpm".to_string(),
            cache_root: PathBuf::from(DNF_CACHE_DIR),
            query_timeout,
            apply_timeout,
            http: reqwest::Client::builder()
                .user_agent(format!("autopatch/{}", env!("CARGO_PKG_VERSION")))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Use different executables (wrappers, dnf5, test stubs)
    pub fn with_binaries(mut self, dnf: impl Into<String>, rpm: impl Into<String>) -> Self {
        self.dnf = dnf.into();
        self.rpm = rpm.into();
        self
    }

    pub fn with_cache_root(mut self, cache_root: impl Into<PathBuf>) -> Self {
        self.cache_root = cache_root.into();
        self
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let command_line = format!("{} {}", program, args.join(" "));
        debug!("Executing: {}", command_line);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.query_timeout, child)
            .await
            .map_err(|_| {
                anyhow!(
                    "`{}` timed out after {}s",
                    command_line,
                    self.query_timeout.as_secs()
                )
            })?
            .with_context(|| format!("Failed to execute `{}`", command_line))?;

        if !output.status.success() {
            bail!(
                "`{}` exited with {}: {}",
                command_line,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Newest repomd.xml mtime among the repo's own cache directories
    fn metadata_mtime(&self, repo_id: &str) -> Option<DateTime<Utc>> {
        std::fs::read_dir(&self.cache_root)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_repo_cache_dir(&entry.file_name().to_string_lossy(), repo_id))
            .filter_map(|entry| {
                std::fs::metadata(entry.path().join("repodata/repomd.xml"))
                    .and_then(|m| m.modified())
                    .ok()
            })
            .map(DateTime::<Utc>::from)
            .max()
    }

    async fn fetch_http(&self, url: &str, dest: &Path) -> Result<(), FetchError> {
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::Transient(format!("{} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(FetchError::Permanent(format!("{} returned {}", url, status)));
        }

        let write_err =
            |e: std::io::Error| FetchError::Permanent(format!("cannot write {}: {}", dest.display(), e));
        let mut file = tokio::fs::File::create(dest).await.map_err(write_err)?;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transient(format!("{}: {}", url, e)))?
        {
            file.write_all(&chunk).await.map_err(write_err)?;
        }
        file.flush().await.map_err(write_err)
    }

    async fn fetch_with_dnf(
        &self,
        candidate: &UpdateCandidate,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        let nevra = format!("{}-{}.{}", candidate.name, candidate.new_version, candidate.arch);
        let dest = dest_dir.to_string_lossy().into_owned();
        self.run(
            &self.dnf,
            &[
                "download",
                "--quiet",
                "--repo",
                candidate.repo.as_str(),
                "--destdir",
                dest.as_str(),
                nevra.as_str(),
            ],
        )
        .await
        .map_err(|e| FetchError::Transient(e.to_string()))?;

        // dnf names the file without the epoch
        let file = format!(
            "{}-{}.{}.rpm",
            candidate.name,
            strip_epoch(&candidate.new_version),
            candidate.arch
        );
        let path = dest_dir.join(file);
        if path.exists() {
            Ok(path)
        } else {
            Err(FetchError::Permanent(format!(
                "dnf download produced no {}",
                path.display()
            )))
        }
    }
}

#[async_trait]
impl PackageBackend for DnfBackend {
    async fn repositories(&self) -> Result<Vec<RepoState>> {
        let output = self
            .run(&self.dnf, &["repolist", "--enabled", "--quiet"])
            .await?;
        Ok(parse_repolist(&output)
            .into_iter()
            .map(|id| RepoState {
                last_refreshed: self.metadata_mtime(&id),
                id,
            })
            .collect())
    }

    async fn refresh(&self, repo_id: &str) -> Result<()> {
        info!("Refreshing metadata for {}", repo_id);
        self.run(
            &self.dnf,
            &["makecache", "--refresh", "--quiet", "--repo", repo_id],
        )
        .await
        .map(|_| ())
    }

    async fn available_upgrades(&self, repos: &[String]) -> Result<Vec<UpdateCandidate>> {
        if repos.is_empty() {
            return Ok(Vec::new());
        }
        // Only the metadata the refresher vouched for; never fetch here
        let mut scope = vec!["--cacheonly"];
        for repo in repos {
            scope.extend(["--repo", repo.as_str()]);
        }

        let installed = self
            .run(&self.rpm, &["-qa", "--qf", INSTALLED_QUERYFORMAT])
            .await
            .context("Failed to list installed packages")?;
        let installed = parse_installed(&installed);

        let mut args = vec!["repoquery", "--upgrades", "--latest-limit=1", "--quiet"];
        args.extend(&scope);
        args.extend(["--queryformat", UPGRADE_QUERYFORMAT]);
        let upgrades = self
            .run(&self.dnf, &args)
            .await
            .context("Failed to query available upgrades")?;
        let mut candidates = parse_upgrades(&upgrades);

        for candidate in &mut candidates {
            candidate.old_version = installed
                .get(&(candidate.name.clone(), candidate.arch.clone()))
                .cloned();
        }

        let mut args = vec!["updateinfo", "list", "--updates", "--quiet"];
        args.extend(&scope);
        match self.run(&self.dnf, &args).await {
            Ok(output) => attach_advisories(&mut candidates, &parse_updateinfo(&output)),
            Err(e) => warn!("Advisory metadata unavailable: {}", e),
        }

        Ok(candidates)
    }

    async fn fetch(
        &self,
        candidate: &UpdateCandidate,
        dest_dir: &Path,
    ) -> Result<PathBuf, FetchError> {
        tokio::fs::create_dir_all(dest_dir).await.map_err(|e| {
            FetchError::Permanent(format!("cannot create {}: {}", dest_dir.display(), e))
        })?;

        match candidate.location.as_deref() {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                let path = dest_dir.join(candidate.artifact_file_name());
                self.fetch_http(url, &path).await?;
                Ok(path)
            }
            Some(local) if Path::new(local).is_absolute() => {
                let path = dest_dir.join(candidate.artifact_file_name());
                tokio::fs::copy(local, &path)
                    .await
                    .map_err(|e| FetchError::Permanent(format!("cannot copy {}: {}", local, e)))?;
                Ok(path)
            }
            _ => self.fetch_with_dnf(candidate, dest_dir).await,
        }
    }

    async fn apply(&self, artifacts: &[DownloadedArtifact]) -> Result<(), TransactionError> {
        let mut command = Command::new(&self.dnf);
        command
            .args(["upgrade", "--assumeyes", "--quiet"])
            .args(artifacts.iter().map(|a| a.path.as_os_str()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        info!("Executing: {} upgrade ({} packages)", self.dnf, artifacts.len());
        let child = command
            .spawn()
            .map_err(|e| TransactionError::Executor(e.to_string()))?;

        // The transaction is never killed halfway; a detached waiter keeps
        // draining its pipes if we stop waiting
        let mut waiter = tokio::spawn(async move {
            let output = child.wait_with_output().await;
            if let Ok(output) = &output {
                debug!("dnf upgrade exited with {}", output.status);
            }
            output
        });

        let output = match tokio::time::timeout(self.apply_timeout, &mut waiter).await {
            Ok(joined) => joined
                .map_err(|e| TransactionError::Executor(e.to_string()))?
                .map_err(|e| TransactionError::Executor(e.to_string()))?,
            Err(_) => {
                warn!(
                    "dnf upgrade still running after {:?}, leaving it to finish",
                    self.apply_timeout
                );
                return Err(TransactionError::Timeout(self.apply_timeout));
            }
        };

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            Err(TransactionError::Rejected(format!(
                "dnf exited with {}: {}",
                output.status,
                tail.join(" | ")
            )))
        }
    }
}

// ============================================================================
// Output parsers
// ============================================================================

/// Repository ids from `dnf repolist`
pub fn parse_repolist(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("repo id"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `(name, arch) -> evr` from the rpm query
pub fn parse_installed(output: &str) -> HashMap<(String, String), String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            let arch = fields.next()?.trim();
            let evr = fields.next()?.trim();
            if name.is_empty() || evr.is_empty() {
                return None;
            }
            Some(((name.to_string(), arch.to_string()), strip_zero_epoch(evr)))
        })
        .collect()
}

/// Candidates from the repoquery output; old versions filled in later
pub fn parse_upgrades(output: &str) -> Vec<UpdateCandidate> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() < 4 || fields[0].is_empty() {
                return None;
            }
            let location = fields
                .get(4)
                .filter(|l| !l.is_empty() && **l != "(none)")
                .map(|l| l.to_string());
            let checksum = fields.get(5).and_then(|c| parse_checksum(c));
            Some(UpdateCandidate {
                name: fields[0].to_string(),
                arch: fields[1].to_string(),
                old_version: None,
                new_version: strip_zero_epoch(fields[2]),
                repo: fields[3].to_string(),
                advisory: None,
                location,
                checksum,
            })
        })
        .collect()
}

/// `sha256:abcd...`
fn parse_checksum(field: &str) -> Option<Checksum> {
    let (algorithm, digest) = field.split_once(':')?;
    let algorithm = algorithm.parse().ok()?;
    if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(Checksum {
        algorithm,
        digest: digest.to_ascii_lowercase(),
    })
}

/// `(nevra, advisory)` pairs from `dnf updateinfo list`
///
/// Lines look like `FEDORA-2026-1a2b  Important/Sec.  openssl-1:3.2.1-1.fc41.x86_64`
/// or `FEDORA-2026-3c4d  bugfix  bash-5.2.26-3.fc41.x86_64`.
pub fn parse_updateinfo(output: &str) -> Vec<(String, Advisory)> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }
            let (kind, severity) = match fields[1].split_once('/') {
                Some((severity, kind)) => (
                    kind.parse().unwrap_or(AdvisoryKind::Unknown),
                    severity.parse::<Severity>().ok(),
                ),
                None => (fields[1].parse().ok()?, None),
            };
            Some((
                fields[2].to_string(),
                Advisory {
                    id: fields[0].to_string(),
                    kind,
                    severity,
                },
            ))
        })
        .collect()
}

/// Attach the most relevant advisory (security first, then severity)
pub fn attach_advisories(candidates: &mut [UpdateCandidate], advisories: &[(String, Advisory)]) {
    let mut by_nevra: HashMap<&str, &Advisory> = HashMap::new();
    for (nevra, advisory) in advisories {
        let entry = by_nevra.entry(nevra.as_str()).or_insert(advisory);
        if rank(advisory) > rank(*entry) {
            *entry = advisory;
        }
    }

    for candidate in candidates.iter_mut() {
        let with_epoch = format!(
            "{}-{}.{}",
            candidate.name, candidate.new_version, candidate.arch
        );
        let without_epoch = format!(
            "{}-{}.{}",
            candidate.name,
            strip_epoch(&candidate.new_version),
            candidate.arch
        );
        candidate.advisory = by_nevra
            .get(with_epoch.as_str())
            .or_else(|| by_nevra.get(without_epoch.as_str()))
            .map(|a| (*a).clone());
    }
}

/// dnf caches a repo as `<repo_id>-<hex hash>`; ids may contain dashes
fn is_repo_cache_dir(dir_name: &str, repo_id: &str) -> bool {
    match dir_name.rsplit_once('-') {
        Some((id, hash)) => {
            id == repo_id && !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

fn rank(advisory: &Advisory) -> (bool, Option<Severity>) {
    (advisory.kind == AdvisoryKind::Security, advisory.severity)
}

fn strip_zero_epoch(evr: &str) -> String {
    evr.strip_prefix("0:").unwrap_or(evr).to_string()
}

fn strip_epoch(evr: &str) -> &str {
    evr.split_once(':').map(|(_, rest)| rest).unwrap_or(evr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopatch_common::ChecksumAlgorithm;
    use std::os::unix::fs::PermissionsExt;
    use std::time::SystemTime;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const DNF_STUB: &str = r#"printf '%s\n' "$*" >> LOG
case "$1" in
  repolist) printf 'repo id  repo name\nfedora  Fedora 41\nupdates  Fedora 41 Updates\n' ;;
  makecache) case "$*" in *broken*) echo "Curl error (6): Could not resolve host" >&2; exit 1 ;; esac ;;
  repoquery) printf 'openssl\tx86_64\t1:3.2.1-1.fc41\tupdates\t(none)\tsha256:ab12\nbash\tx86_64\t5.2.26-4.fc41\tupdates\t(none)\tsha256:cd34\n' ;;
  updateinfo) printf 'FEDORA-2026-1 Important/Sec. openssl-1:3.2.1-1.fc41.x86_64\n' ;;
  download) touch "$6/$7.rpm" ;;
  upgrade) echo "Error: package conflict" >&2; exit 1 ;;
esac"#;

    const RPM_STUB: &str =
        r#"printf 'openssl\tx86_64\t1:3.2.0-1.fc41\nbash\tx86_64\t0:5.2.26-3.fc41\n'"#;

    struct Stubs {
        temp: TempDir,
        log: PathBuf,
    }

    impl Stubs {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let log = temp.path().join("calls.log");
            Self { temp, log }
        }

        fn script(&self, name: &str, body: &str) -> String {
            let path = self.temp.path().join(name);
            let body = body.replace("LOG", &self.log.to_string_lossy());
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn backend(&self, dnf_body: &str, apply_timeout: Duration) -> DnfBackend {
            let dnf = self.script("dnf", dnf_body);
            let rpm = self.script("rpm", RPM_STUB);
            DnfBackend::new(Duration::from_secs(10), apply_timeout)
                .with_binaries(dnf, rpm)
                .with_cache_root(self.temp.path().join("cache"))
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(&self.log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn repomd(cache: &Path, dir: &str, age: Duration) {
        let repodata = cache.join(dir).join("repodata");
        std::fs::create_dir_all(&repodata).unwrap();
        let file = std::fs::File::create(repodata.join("repomd.xml")).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    fn artifact_candidate(name: &str, version: &str, location: Option<String>) -> UpdateCandidate {
        UpdateCandidate {
            name: name.to_string(),
            arch: "x86_64".to_string(),
            old_version: None,
            new_version: version.to_string(),
            repo: "updates".to_string(),
            advisory: None,
            location,
            checksum: None,
        }
    }

    /// One-shot HTTP server answering with `status` and `body`
    async fn serve_once(status: &'static str, body: &'static [u8]) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
        });
        format!("http://{}/Packages/b/bash.rpm", addr)
    }

    #[test]
    fn test_repo_cache_dir_names() {
        assert!(is_repo_cache_dir("fedora-0123abcd", "fedora"));
        assert!(is_repo_cache_dir("fedora-cisco-openh264-fedcba98", "fedora-cisco-openh264"));
        assert!(!is_repo_cache_dir("fedora-cisco-openh264-fedcba98", "fedora"));
        assert!(!is_repo_cache_dir("updates-testing-89ab", "updates"));
        assert!(!is_repo_cache_dir("updates-", "updates"));
        assert!(!is_repo_cache_dir("updates", "updates"));
    }

    #[tokio::test]
    async fn test_repositories_age_ignores_sibling_caches() {
        let stubs = Stubs::new();
        let cache = stubs.temp.path().join("cache");
        let two_days = Duration::from_secs(2 * 86_400);
        repomd(&cache, "fedora-0123abcd", two_days);
        repomd(&cache, "fedora-cisco-openh264-fedcba98", Duration::ZERO);
        repomd(&cache, "updates-testing-89ab", Duration::ZERO);
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));

        let repos = backend.repositories().await.unwrap();

        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].id, "fedora");
        let age = Utc::now() - repos[0].last_refreshed.unwrap();
        assert!(age.num_hours() >= 47, "fedora reported {}h old", age.num_hours());
        assert_eq!(repos[1].id, "updates");
        assert!(repos[1].last_refreshed.is_none());
    }

    #[tokio::test]
    async fn test_refresh_one_repo() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));

        backend.refresh("updates").await.unwrap();
        let err = backend.refresh("broken").await.unwrap_err();

        assert!(format!("{:#}", err).contains("Could not resolve host"));
        assert_eq!(stubs.calls()[0], "makecache --refresh --quiet --repo updates");
    }

    #[tokio::test]
    async fn test_available_upgrades_from_cached_repos() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));

        let candidates = backend
            .available_upgrades(&["updates".to_string()])
            .await
            .unwrap();

        assert_eq!(candidates.len(), 2);
        let openssl = &candidates[0];
        assert_eq!(openssl.old_version.as_deref(), Some("1:3.2.0-1.fc41"));
        let advisory = openssl.advisory.as_ref().unwrap();
        assert_eq!(advisory.id, "FEDORA-2026-1");
        assert_eq!(advisory.kind, AdvisoryKind::Security);
        assert_eq!(advisory.severity, Some(Severity::Important));
        let bash = &candidates[1];
        assert_eq!(bash.old_version.as_deref(), Some("5.2.26-3.fc41"));
        assert!(bash.advisory.is_none());

        let calls = stubs.calls();
        for verb in ["repoquery", "updateinfo"] {
            let call = calls.iter().find(|c| c.starts_with(verb)).unwrap();
            assert!(call.contains("--cacheonly --repo updates"), "{}", call);
            assert!(!call.contains("fedora"), "{}", call);
        }
    }

    #[tokio::test]
    async fn test_no_repos_queries_nothing() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));

        assert!(backend.available_upgrades(&[]).await.unwrap().is_empty());
        assert!(stubs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_rejection_keeps_stderr() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));
        let artifact = DownloadedArtifact {
            candidate: artifact_candidate("bash", "5.2.26-4.fc41", None),
            path: stubs.temp.path().join("bash.rpm"),
        };

        let err = backend.apply(&[artifact]).await.unwrap_err();

        match err {
            TransactionError::Rejected(reason) => assert!(reason.contains("package conflict")),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(stubs.calls()[0].starts_with("upgrade --assumeyes --quiet "));
    }

    #[tokio::test]
    async fn test_apply_timeout_leaves_transaction_running() {
        let stubs = Stubs::new();
        let marker = stubs.temp.path().join("installed");
        let body = format!("sleep 1; touch '{}'", marker.display());
        let backend = stubs.backend(&body, Duration::from_millis(200));
        let artifact = DownloadedArtifact {
            candidate: artifact_candidate("bash", "5.2.26-4.fc41", None),
            path: stubs.temp.path().join("bash.rpm"),
        };

        let err = backend.apply(&[artifact]).await.unwrap_err();

        assert_eq!(err, TransactionError::Timeout(Duration::from_millis(200)));
        assert!(err.state_unknown());
        assert!(err.to_string().contains("200ms"));
        // The package manager was not killed
        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_fetch_absolute_local_location() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));
        let source = stubs.temp.path().join("local-bash.rpm");
        std::fs::write(&source, b"local rpm").unwrap();
        let candidate = artifact_candidate(
            "bash",
            "5.2.26-4.fc41",
            Some(source.to_string_lossy().into_owned()),
        );
        let dest = stubs.temp.path().join("cache/packages");

        let path = backend.fetch(&candidate, &dest).await.unwrap();

        assert_eq!(path, dest.join(candidate.artifact_file_name()));
        assert_eq!(std::fs::read(&path).unwrap(), b"local rpm");
        assert!(stubs.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_location_uses_dnf_download() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));
        let candidate = artifact_candidate("bash", "5.2.26-4.fc41", None);
        let dest = stubs.temp.path().join("dl");

        let path = backend.fetch(&candidate, &dest).await.unwrap();

        assert_eq!(path, dest.join("bash-5.2.26-4.fc41.x86_64.rpm"));
        assert!(stubs.calls()[0].starts_with("download --quiet --repo updates --destdir "));
    }

    #[tokio::test]
    async fn test_fetch_http_streams_to_file() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));
        let url = serve_once("200 OK", b"rpm payload over http").await;
        let candidate = artifact_candidate("bash", "5.2.26-4.fc41", Some(url));
        let dest = stubs.temp.path().join("http");

        let path = backend.fetch(&candidate, &dest).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"rpm payload over http");
    }

    #[tokio::test]
    async fn test_fetch_http_status_classes() {
        let stubs = Stubs::new();
        let backend = stubs.backend(DNF_STUB, Duration::from_secs(10));
        let dest = stubs.temp.path().join("http");

        let url = serve_once("503 Service Unavailable", b"").await;
        let candidate = artifact_candidate("bash", "5.2.26-4.fc41", Some(url));
        let err = backend.fetch(&candidate, &dest).await.unwrap_err();
        assert!(err.is_transient());

        let url = serve_once("404 Not Found", b"").await;
        let candidate = artifact_candidate("bash", "5.2.26-4.fc41", Some(url));
        let err = backend.fetch(&candidate, &dest).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_parse_repolist_skips_header() {
        let output = "repo id              repo name\nfedora               Fedora 41 - x86_64\nupdates              Fedora 41 - x86_64 - Updates\n";
        assert_eq!(parse_repolist(output), vec!["fedora", "updates"]);
    }

    #[test]
    fn test_parse_installed_strips_zero_epoch() {
        let output = "bash\tx86_64\t0:5.2.26-3.fc41\nopenssl\tx86_64\t1:3.2.0-1.fc41\n";
        let installed = parse_installed(output);
        assert_eq!(
            installed.get(&("bash".to_string(), "x86_64".to_string())),
            Some(&"5.2.26-3.fc41".to_string())
        );
        assert_eq!(
            installed.get(&("openssl".to_string(), "x86_64".to_string())),
            Some(&"1:3.2.0-1.fc41".to_string())
        );
    }

    #[test]
    fn test_parse_upgrades() {
        let output = "openssl\tx86_64\t1:3.2.1-1.fc41\tupdates\thttps://mirror.example/o.rpm\tsha256:ABCDEF01\n\
                      bash\tx86_64\t5.2.26-4.fc41\tupdates\t(none)\t\n";
        let candidates = parse_upgrades(output);
        assert_eq!(candidates.len(), 2);

        let openssl = &candidates[0];
        assert_eq!(openssl.new_version, "1:3.2.1-1.fc41");
        assert_eq!(openssl.location.as_deref(), Some("https://mirror.example/o.rpm"));
        let checksum = openssl.checksum.as_ref().unwrap();
        assert_eq!(checksum.algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(checksum.digest, "abcdef01");

        assert!(candidates[1].location.is_none());
        assert!(candidates[1].checksum.is_none());
    }

    #[test]
    fn test_parse_updateinfo_and_attach() {
        let output = "FEDORA-2026-1 Important/Sec. openssl-1:3.2.1-1.fc41.x86_64\n\
                      FEDORA-2026-2 bugfix        openssl-1:3.2.1-1.fc41.x86_64\n\
                      FEDORA-2026-3 enhancement   bash-5.2.26-4.fc41.x86_64\n";
        let advisories = parse_updateinfo(output);
        assert_eq!(advisories.len(), 3);
        assert_eq!(advisories[0].1.kind, AdvisoryKind::Security);
        assert_eq!(advisories[0].1.severity, Some(Severity::Important));

        let mut candidates = parse_upgrades(
            "openssl\tx86_64\t1:3.2.1-1.fc41\tupdates\n\
             bash\tx86_64\t5.2.26-4.fc41\tupdates\n\
             zsh\tx86_64\t5.9-10.fc41\tupdates\n",
        );
        attach_advisories(&mut candidates, &advisories);

        assert_eq!(candidates[0].advisory.as_ref().unwrap().id, "FEDORA-2026-1");
        assert_eq!(
            candidates[1].advisory.as_ref().unwrap().kind,
            AdvisoryKind::Enhancement
        );
        assert!(candidates[2].advisory.is_none());
    }
}
