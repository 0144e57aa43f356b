//! Lookup and batch installation over the package index.
//!
//! The resolver is the public entry point: it turns `;`-separated specs into
//! index entries, arranges for the cached archive to exist, and hands off to
//! the installer. Packages in a batch install sequentially; a failure for
//! one never aborts the rest.

use std::path::{Path, PathBuf};

use anyhow::Result;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use log::debug;

use crate::error::SdkError;
use crate::fetch::HttpClient;
use crate::index::{ArtifactRef, PackageId, PackageIndex};
use crate::install::Installer;
use crate::reporter::Reporter;
use crate::runtime::Runtime;

pub struct Resolver<'a, R: Runtime> {
    runtime: &'a R,
    reporter: &'a dyn Reporter,
    index: &'a PackageIndex,
    sdk_root: PathBuf,
}

impl<'a, R: Runtime> Resolver<'a, R> {
    pub fn new(
        runtime: &'a R,
        reporter: &'a dyn Reporter,
        index: &'a PackageIndex,
        sdk_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            reporter,
            index,
            sdk_root: sdk_root.into(),
        }
    }

    /// Resolve a `;`-separated spec against the index.
    pub fn lookup(&self, spec: &str) -> Result<(PackageId, &'a ArtifactRef)> {
        let id = PackageId::parse(spec);
        match self.index.get(&id) {
            Some(artifact) => Ok((id, artifact)),
            None => Err(SdkError::MissingPackage {
                spec: spec.to_string(),
                suggestion: self.closest_match(spec),
            }
            .into()),
        }
    }

    /// All known identifiers, `;`-joined and sorted, for listing.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<String> = self.index.iter().map(|(id, _)| id.to_string()).collect();
        names.sort();
        names
    }

    /// Install each requested package in order, continuing past failures.
    /// Returns the number of packages that failed.
    pub async fn install_all(
        &self,
        client: &HttpClient,
        cache_dir: &Path,
        specs: &[String],
    ) -> usize {
        let mut failures = 0;
        for spec in specs {
            if let Err(err) = self.install_one(client, cache_dir, spec).await {
                failures += 1;
                let recoverable = err
                    .downcast_ref::<SdkError>()
                    .is_some_and(SdkError::is_recoverable);
                if recoverable {
                    self.reporter.warning(&format!("{}: {:#}", spec, err));
                } else {
                    self.reporter.error(&format!("{}: {:#}", spec, err));
                }
                if let Some(SdkError::MissingPackage {
                    suggestion: Some(suggestion),
                    ..
                }) = err.downcast_ref::<SdkError>()
                {
                    self.reporter
                        .info(&format!("Did you mean '{}'?", suggestion));
                }
            }
        }
        failures
    }

    async fn install_one(&self, client: &HttpClient, cache_dir: &Path, spec: &str) -> Result<()> {
        let (id, artifact) = self.lookup(spec)?;
        let installer = Installer::new(self.runtime, self.reporter, &self.sdk_root, self.index);

        let install_dir = installer.install_dir(&id)?;
        if self.runtime.exists(&install_dir) {
            self.reporter
                .info(&format!("{} already installed, skipping", id));
            return Ok(());
        }

        let filename = artifact.url.rsplit('/').next().unwrap_or(&artifact.url);
        let zipball = cache_dir.join(filename);
        if !self.runtime.exists(&zipball) {
            client
                .download_file(self.runtime, &artifact.url, &zipball)
                .await?;
        } else {
            debug!("using cached {:?}", zipball);
        }

        installer.install(&id, artifact, &zipball)
    }

    /// Remove the install directories of the requested packages.
    pub fn uninstall_all(&self, specs: &[String]) -> usize {
        let mut failures = 0;
        for spec in specs {
            let result = self
                .lookup(spec)
                .and_then(|(id, _)| {
                    Installer::new(self.runtime, self.reporter, &self.sdk_root, self.index)
                        .remove(&id)
                });
            if let Err(err) = result {
                failures += 1;
                self.reporter.error(&format!("{}: {:#}", spec, err));
            }
        }
        failures
    }

    /// Closest known identifier to a misspelled spec, if any matches.
    fn closest_match(&self, spec: &str) -> Option<String> {
        let matcher = SkimMatcherV2::default();
        self.index
            .iter()
            .filter_map(|(id, _)| {
                let name = id.to_string();
                // match both directions so dropped characters on either
                // side still produce a suggestion
                let score = matcher
                    .fuzzy_match(&name, spec)
                    .max(matcher.fuzzy_match(spec, &name))?;
                Some((score, name))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
            .map(|(_, name)| name)
    }
}
