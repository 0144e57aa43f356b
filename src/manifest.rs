//! Classification and normalization of raw manifest entries.
//!
//! The manifest maps artifact URLs to property bags. Each URL is classified
//! into a package family by its filename pattern, then the family's
//! normalization rule turns the (url, bag) pair into zero or more index
//! entries. Dispatch happens before parsing, so a malformed entry in one
//! family can never affect another.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::index::PackageId;
use crate::revision::Revision;

/// Flat string→string bag parsed from a `source.properties` blob.
pub type PropertyBag = HashMap<String, String>;

/// Already-parsed manifest: artifact URL → ordered property bags, one per
/// published entry for that URL. An empty bag means the entry carried no
/// `source.properties`.
pub type Manifest = BTreeMap<String, Vec<PropertyBag>>;

/// Parse java-style `key=value` properties text into a bag.
///
/// Keys are lowercased (`Pkg.Revision` → `pkg.revision`), matching how the
/// upstream repository metadata is conventionally read.
pub fn parse_properties(text: &str) -> PropertyBag {
    let mut bag = PropertyBag::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            bag.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    bag
}

/// One published entry in the checksums document. Only `source.properties`
/// is significant here; the checksums themselves belong to the fetch
/// collaborator.
#[derive(Debug, Deserialize)]
struct ChecksumEntry {
    #[serde(rename = "source.properties")]
    source_properties: Option<String>,
}

/// Parse the raw checksums JSON into a [`Manifest`].
pub fn parse_checksums(bytes: &[u8]) -> Result<Manifest> {
    let raw: BTreeMap<String, Vec<ChecksumEntry>> =
        serde_json::from_slice(bytes).context("Failed to parse checksums manifest")?;

    let mut manifest = Manifest::new();
    for (url, entries) in raw {
        let bags = entries
            .iter()
            .map(|entry| {
                entry
                    .source_properties
                    .as_deref()
                    .map(parse_properties)
                    .unwrap_or_default()
            })
            .collect();
        manifest.insert(url, bags);
    }
    Ok(manifest)
}

/// Package family, selected by artifact filename pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    BuildTools,
    Cmake,
    CmdlineTools,
    Emulator,
    M2Repository,
    Ndk,
    PlatformTools,
    Platforms,
    SkiaParser,
    Tools,
}

impl Family {
    /// Classify an artifact URL. Non-zip artifacts and unrecognized filename
    /// patterns yield `None` and are skipped entirely.
    pub fn classify(url: &str) -> Option<Family> {
        if !url.ends_with(".zip") {
            return None;
        }
        let name = basename(url);
        // platform-tools must be checked before the platforms patterns
        if name.starts_with("build-tools") {
            Some(Family::BuildTools)
        } else if name.starts_with("cmake") {
            Some(Family::Cmake)
        } else if name.starts_with("cmdline-tools") || name.starts_with("commandlinetools") {
            Some(Family::CmdlineTools)
        } else if name.starts_with("emulator") {
            Some(Family::Emulator)
        } else if name.starts_with("android_m2repository_r") {
            Some(Family::M2Repository)
        } else if url.contains("ndk-") {
            Some(Family::Ndk)
        } else if name.starts_with("platform-tools") {
            Some(Family::PlatformTools)
        } else if name.starts_with("android-") || name.starts_with("platform-") {
            Some(Family::Platforms)
        } else if name.starts_with("skiaparser") {
            Some(Family::SkiaParser)
        } else if name.starts_with("tools") || name.starts_with("sdk-tools-") {
            Some(Family::Tools)
        } else {
            None
        }
    }

    /// Apply this family's normalization rule to one manifest entry.
    ///
    /// Entries missing required fields for their family produce nothing;
    /// manifests contain partial and legacy entries and none of them may
    /// abort index building.
    pub fn normalize(self, url: &str, bag: Option<&PropertyBag>) -> Normalized {
        let mut out = Normalized::default();
        match self {
            Family::BuildTools => {
                let Some(pkg_revision) = bag.and_then(|b| b.get("pkg.revision")) else {
                    return out;
                };
                let dashed = pkg_revision.replace(' ', "-");
                out.push(
                    ["build-tools", dashed.as_str()],
                    Revision::parse_or_lowest(pkg_revision),
                );
            }
            Family::Cmake | Family::CmdlineTools | Family::SkiaParser => {
                let Some(bag) = bag else { return out };
                let Some(path) = bag.get("pkg.path") else {
                    return out;
                };
                let revision = bag
                    .get("pkg.revision")
                    .map(|r| Revision::parse_or_lowest(r))
                    .unwrap_or_default();
                out.push_id(PackageId::parse(path), revision);
            }
            Family::Emulator => {
                let Some(bag) = bag else { return out };
                let Some(path) = bag.get("pkg.path") else {
                    return out;
                };
                let revision = bag
                    .get("pkg.revision")
                    .map(|r| Revision::parse_or_lowest(r))
                    .unwrap_or_default();
                out.push_id(PackageId::parse(path), revision.clone());
                if let Some(pkg_revision) = bag.get("pkg.revision") {
                    let family_root = path.split(';').next().unwrap_or(path);
                    out.push([family_root, pkg_revision.as_str()], revision);
                }
            }
            Family::M2Repository => out = normalize_m2repository(url),
            Family::Ndk => out = normalize_ndk(url, bag),
            Family::Platforms => {
                let Some(bag) = bag else { return out };
                let Some(apilevel) = bag.get("androidversion.apilevel") else {
                    return out;
                };
                // platform-version and pkg-revision concatenated so full
                // releases sort above previews; anything not starting with a
                // non-zero digit can never win
                let vstring = format!(
                    "{}.{}",
                    bag.get("platform.version").map(String::as_str).unwrap_or(""),
                    bag.get("pkg.revision").map(String::as_str).unwrap_or("")
                );
                if !vstring.starts_with(|c: char| ('1'..='9').contains(&c)) {
                    return out;
                }
                let android = format!("android-{}", apilevel);
                out.push(
                    ["platforms", android.as_str()],
                    Revision::parse_or_lowest(&vstring),
                );
            }
            Family::PlatformTools => {
                let Some(pkg_revision) = bag.and_then(|b| b.get("pkg.revision")) else {
                    return out;
                };
                out.push(
                    ["platform-tools", pkg_revision.as_str()],
                    Revision::parse_or_lowest(pkg_revision),
                );
            }
            Family::Tools => {
                let Some(bag) = bag else { return out };
                let Some(pkg_revision) = bag.get("pkg.revision") else {
                    return out;
                };
                let path = bag.get("pkg.path").map(String::as_str).unwrap_or("tools");
                out.push(
                    [path, pkg_revision.as_str()],
                    Revision::parse_or_lowest(pkg_revision),
                );
            }
        }
        out
    }
}

/// Output of normalizing one manifest entry.
#[derive(Debug, Default, PartialEq)]
pub struct Normalized {
    pub entries: Vec<NormalizedEntry>,
    /// ndk release tag (e.g. `r25b`) → dotted revision, consumed by the
    /// installer's `ndk/{revision}` path template.
    pub ndk_releases: Vec<(String, String)>,
}

impl Normalized {
    fn push<'a>(&mut self, segments: impl IntoIterator<Item = &'a str>, revision: Revision) {
        self.push_id(PackageId::new(segments), revision);
    }

    fn push_id(&mut self, id: PackageId, revision: Revision) {
        self.entries.push(NormalizedEntry { id, revision });
    }
}

/// One identifier produced from a manifest entry, ready for the index.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntry {
    pub id: PackageId,
    pub revision: Revision,
}

fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

/// `source.properties` does not reliably carry revision or path info for
/// m2repository, so the revision comes from the filename. Emits the family
/// root plus the revision both as published and with leading zeros stripped.
fn normalize_m2repository(url: &str) -> Normalized {
    let mut out = Normalized::default();
    let Some(digits) = basename(url)
        .strip_prefix("android_m2repository_r")
        .and_then(|rest| rest.strip_suffix(".zip"))
        .filter(|d| !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()))
    else {
        return out;
    };
    let revision = Revision::parse_or_lowest(digits);
    out.push(["extras", "android", "m2repository"], revision.clone());
    out.push(["extras", "android", "m2repository", digits], revision.clone());
    let stripped = digits.trim_start_matches('0');
    if !stripped.is_empty() && stripped != digits {
        out.push(["extras", "android", "m2repository", stripped], revision);
    }
    out
}

/// NDK artifacts are published under both the `ndk` and legacy `ndk-bundle`
/// families, keyed by concrete revision and by release tag (`r25b`).
fn normalize_ndk(url: &str, bag: Option<&PropertyBag>) -> Normalized {
    let mut out = Normalized::default();

    let pkg_revision = bag.and_then(|b| b.get("pkg.revision"));
    if let Some(pkg_revision) = pkg_revision {
        let revision = Revision::parse_or_lowest(pkg_revision);
        for family in ["ndk", "ndk-bundle"] {
            out.push([family, pkg_revision.as_str()], revision.clone());
        }
    }

    if let Some(release) = ndk_release_tag(url) {
        let revision = match pkg_revision {
            Some(pkg_revision) => {
                // Install dirs use revisions, not release tags
                out.ndk_releases.push((release.clone(), pkg_revision.clone()));
                Revision::parse_or_lowest(pkg_revision)
            }
            None => synthesized_ndk_revision(url),
        };
        for family in ["ndk", "ndk-bundle"] {
            out.push([family, release.as_str()], revision.clone());
        }
    }
    out
}

/// Scan for a release tag of the form `r<N>[<letter>][-rcX|-betaX]`,
/// N starting with a non-zero digit, at most two digits.
fn ndk_release_tag(url: &str) -> Option<String> {
    let bytes = url.as_bytes();
    for start in 0..bytes.len() {
        if bytes[start] != b'r' {
            continue;
        }
        let mut end = start + 1;
        if end >= bytes.len() || !(b'1'..=b'9').contains(&bytes[end]) {
            continue;
        }
        end += 1;
        if end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end < bytes.len() && bytes[end].is_ascii_lowercase() {
            end += 1;
        }
        // optional preview suffix: -rc<digits> or -beta<digits>
        if bytes[end..].starts_with(b"-") {
            let rest = &url[end + 1..];
            for marker in ["rc", "beta"] {
                if let Some(after) = rest.strip_prefix(marker) {
                    let digits = after.chars().take_while(char::is_ascii_digit).count();
                    if digits > 0 {
                        end += 1 + marker.len() + digits;
                        break;
                    }
                }
            }
        }
        return Some(url[start..end].to_string());
    }
    None
}

/// Fake revision for NDKs published without `source.properties`: the numeric
/// part of the release tag plus the letter's offset from 'a'.
fn synthesized_ndk_revision(url: &str) -> Revision {
    if let Some(pos) = url.find("android-ndk-r") {
        let rest = &url[pos + "android-ndk-r".len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        let after = &rest[digits.len()..];
        if !digits.is_empty()
            && let Some(letter) = after.chars().next()
            && letter.is_ascii_lowercase()
            && after[letter.len_utf8()..].starts_with("-linux")
            && let Ok(number) = digits.parse::<u64>()
        {
            return Revision::new(vec![number], Some(letter as u32 - 'a' as u32));
        }
    }
    Revision::new(vec![1], None)
}
