//! Winner-per-identifier package index built from manifest entries.
//!
//! The index is rebuilt from scratch on every run and is read-only once
//! built. At most one artifact is kept per identifier: the one with the
//! highest revision observed anywhere in the manifest, independent of
//! processing order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use log::debug;

use crate::manifest::{Family, Manifest, Normalized};
use crate::revision::Revision;

/// `;`-segmented package path, e.g. `build-tools;30.0.3`. Equality is
/// segment-wise; this is the sole lookup key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(Vec<String>);

impl PackageId {
    pub fn new<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        Self(segments.into_iter().map(str::to_string).collect())
    }

    /// Split a `;`-joined spec into segments.
    pub fn parse(spec: &str) -> Self {
        Self(spec.split(';').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The family segment.
    pub fn family(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    /// The final segment, which carries the revision for versioned
    /// identifiers.
    pub fn last(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(";"))
    }
}

/// Resolved artifact for one identifier. Immutable once inserted, except via
/// the monotonic-max replacement rule.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRef {
    pub url: String,
    pub revision: Revision,
}

/// Identifier → winning artifact mapping.
#[derive(Debug, Default)]
pub struct PackageIndex {
    entries: BTreeMap<PackageId, ArtifactRef>,
    ndk_releases: HashMap<String, String>,
}

impl PackageIndex {
    pub fn get(&self, id: &PackageId) -> Option<&ArtifactRef> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PackageId, &ArtifactRef)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dotted revision recorded for an ndk release tag, e.g.
    /// `r25b` → `25.1.8937393`. Install dirs use revisions, not tags.
    pub fn ndk_release_revision(&self, release: &str) -> Option<&str> {
        self.ndk_releases.get(release).map(String::as_str)
    }
}

/// Accumulates normalized entries and reduces each identifier to its
/// highest-revision artifact, then resolves the family aliases.
#[derive(Debug, Default)]
pub struct PackageIndexBuilder {
    index: PackageIndex,
}

impl PackageIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed every entry of one manifest through classification and
    /// normalization. May be called once per manifest URL; identical
    /// manifest bytes always yield an identical index.
    #[tracing::instrument(skip(self, manifest))]
    pub fn add_manifest(&mut self, manifest: &Manifest) {
        for (url, bags) in manifest {
            let Some(family) = Family::classify(url) else {
                continue;
            };
            if family == Family::Ndk {
                // one manifest row per ndk artifact; only the first bag
                // carries properties
                self.absorb(url, family.normalize(url, bags.first()));
            } else {
                for bag in bags {
                    self.absorb(url, family.normalize(url, Some(bag)));
                }
            }
        }
    }

    fn absorb(&mut self, url: &str, normalized: Normalized) {
        for entry in normalized.entries {
            self.insert(
                entry.id,
                ArtifactRef {
                    url: url.to_string(),
                    revision: entry.revision,
                },
            );
        }
        for (release, revision) in normalized.ndk_releases {
            self.index.ndk_releases.insert(release, revision);
        }
    }

    /// Monotonic-max reducer: the highest revision wins; exact ties favor
    /// the entry observed later.
    fn insert(&mut self, id: PackageId, candidate: ArtifactRef) {
        match self.index.entries.get(&id) {
            Some(current) if candidate.revision < current.revision => {
                debug!("keeping {} at {} over {}", id, current.revision, candidate.revision);
            }
            _ => {
                self.index.entries.insert(id, candidate);
            }
        }
    }

    /// Run the aggregate alias passes, in fixed order, and return the
    /// finished index. The passes read already-assigned concrete entries,
    /// so they must come after every per-entry pass.
    pub fn build(mut self) -> PackageIndex {
        self.alias_highest(
            "cmdline-tools",
            PackageId::new(["cmdline-tools", "latest"]),
            |version| version != "latest" && is_numeric_dotted(version),
        );
        self.alias_highest("platform-tools", PackageId::new(["platform-tools"]), |_| true);
        self.alias_highest("tools", PackageId::new(["tools"]), |_| true);
        self.index
    }

    /// Shared highest-by-family-prefix combinator behind the three alias
    /// passes: scan the concrete identifiers of `family` and point `alias`
    /// at the one whose version segment parses highest.
    ///
    /// The scan is linear in the index per pass, quadratic overall; fine at
    /// the expected scale of dozens of entries.
    fn alias_highest(
        &mut self,
        family: &str,
        alias: PackageId,
        eligible: impl Fn(&str) -> bool,
    ) {
        let mut best: Option<(Revision, ArtifactRef)> = None;
        for (id, artifact) in &self.index.entries {
            if id.family() != family || id.segments().len() < 2 || *id == alias {
                continue;
            }
            let version = id.last();
            if !eligible(version) {
                continue;
            }
            let revision = Revision::parse_or_lowest(version);
            match &best {
                Some((current, _)) if revision < *current => {}
                _ => best = Some((revision, artifact.clone())),
            }
        }
        if let Some((_, artifact)) = best {
            self.index.entries.insert(alias, artifact);
        }
    }
}

fn is_numeric_dotted(version: &str) -> bool {
    !version.is_empty()
        && version.chars().all(|c| c.is_ascii_digit() || c == '.')
        && version.chars().any(|c| c.is_ascii_digit())
}
