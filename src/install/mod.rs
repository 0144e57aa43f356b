//! Secure installation of cached artifacts into the SDK layout.
//!
//! An install consumes an identifier already resolved to an artifact plus a
//! locally cached archive file. Extraction happens in a staging directory
//! inside the SDK root; only after the archive fully extracts does anything
//! move into place. A single redundant wrapper folder is collapsed so the
//! install directory holds the package contents directly.

pub mod extract;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::index::{ArtifactRef, PackageId, PackageIndex};
use crate::licenses::{ANDROID_SDK_LICENSE, SDK_LICENSE_ID};
use crate::reporter::Reporter;
use crate::revision::Revision;
use crate::runtime::Runtime;

/// Install sub-directory per package family, relative to the SDK root.
const INSTALL_DIRS: &[(&str, &str)] = &[
    ("build-tools", "build-tools/{revision}"),
    ("cmake", "cmake/{revision}"),
    ("cmdline-tools", "cmdline-tools/{revision}"),
    ("emulator", "emulator"),
    ("ndk", "ndk/{revision}"),
    ("ndk-bundle", "ndk-bundle"),
    ("platforms", "platforms/{revision}"),
    ("platform-tools", "platform-tools"),
    ("skiaparser", "skiaparser/{revision}"),
    ("tools", "tools"),
    ("extras;android;m2repository", "extras/android/m2repository"),
];

/// Families where a generated package.xml confuses downstream tooling.
const NO_PACKAGE_XML: &[&str] = &["extras", "platforms", "sources", "system-images"];

const PACKAGE_XML_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<ns2:repository
    xmlns:ns2="http://schemas.android.com/repository/android/common/01"
    xmlns:ns3="http://schemas.android.com/repository/android/generic/01"
    xmlns:ns4="http://schemas.android.com/sdk/android/repo/addon2/01"
    xmlns:ns5="http://schemas.android.com/sdk/android/repo/repository2/01"
    xmlns:ns6="http://schemas.android.com/sdk/android/repo/sys-img2/01">
  <license id="{license_id}" type="text">{license}</license>
  <localPackage path="{path}">
    <type-details xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:type="ns3:genericDetailsType"/>
    <revision>{revision}</revision>
    <display-name>PLACEHOLDER</display-name>
    <uses-license ref="{license_id}"/>
  </localPackage>
</ns2:repository>"#;

/// Installs resolved artifacts into the SDK directory hierarchy.
pub struct Installer<'a, R: Runtime> {
    runtime: &'a R,
    reporter: &'a dyn Reporter,
    sdk_root: &'a Path,
    index: &'a PackageIndex,
}

impl<'a, R: Runtime> Installer<'a, R> {
    pub fn new(
        runtime: &'a R,
        reporter: &'a dyn Reporter,
        sdk_root: &'a Path,
        index: &'a PackageIndex,
    ) -> Self {
        Self {
            runtime,
            reporter,
            sdk_root,
            index,
        }
    }

    /// Target directory for an identifier, from the family's path template.
    pub fn install_dir(&self, id: &PackageId) -> Result<PathBuf> {
        let name = if id.family() == "extras" && (3..=4).contains(&id.segments().len()) {
            id.segments()[..3].join(";")
        } else {
            id.family().to_string()
        };
        let template = INSTALL_DIRS
            .iter()
            .find(|(family, _)| *family == name)
            .map(|(_, template)| *template)
            .ok_or_else(|| anyhow!("no install layout for package family '{}'", name))?;

        let relative = if id.segments().len() > 1 {
            let revision = if id.family() == "ndk" {
                self.index
                    .ndk_release_revision(id.last())
                    .unwrap_or(id.last())
            } else {
                id.last()
            };
            template.replace("{revision}", revision)
        } else {
            template.to_string()
        };
        Ok(self.sdk_root.join(relative))
    }

    /// Install one package from its cached archive.
    ///
    /// Idempotent: an existing install directory is left untouched. The
    /// cached archive is deleted after a successful move to bound cache
    /// growth.
    #[tracing::instrument(skip(self, artifact, archive_path))]
    pub fn install(
        &self,
        id: &PackageId,
        artifact: &ArtifactRef,
        archive_path: &Path,
    ) -> Result<()> {
        let install_dir = self.install_dir(id)?;
        if self.runtime.exists(&install_dir) {
            self.reporter
                .info(&format!("{} already installed, skipping", id));
            return Ok(());
        }
        if let Some(parent) = install_dir.parent() {
            self.runtime.create_dir_all(parent)?;
        }

        // staging inside the SDK root keeps the final move on one
        // filesystem; the TempDir guard removes it on any failure path
        let staging = tempfile::Builder::new()
            .prefix(".sdkmgr-")
            .tempdir_in(self.sdk_root)
            .context("Failed to create staging directory")?;
        self.reporter
            .info(&format!("Unzipping to {}", staging.path().display()));
        let extracted = extract::extract_archive(
            self.runtime,
            self.reporter,
            archive_path,
            staging.path(),
            &artifact.url,
        )?;

        self.reporter
            .info(&format!("Installing into {}", install_dir.display()));
        if extracted.toplevels.len() == 1 {
            // collapse the redundant wrapper folder
            let entries = self.runtime.read_dir(staging.path())?;
            let single = entries
                .first()
                .ok_or_else(|| anyhow!("archive appears to be empty"))?;
            self.runtime.rename(single, &install_dir)?;
        } else {
            self.runtime.create_dir_all(&install_dir)?;
            for entry in self.runtime.read_dir(staging.path())? {
                let name = entry
                    .file_name()
                    .ok_or_else(|| anyhow!("staged entry has no file name: {:?}", entry))?;
                self.runtime.rename(&entry, &install_dir.join(name))?;
            }
        }

        if self.runtime.exists(archive_path) {
            self.runtime.remove_file(archive_path)?;
        }

        self.write_package_manifest(&install_dir, id, artifact)?;
        Ok(())
    }

    /// Remove an installed package directory. Nothing more.
    pub fn remove(&self, id: &PackageId) -> Result<()> {
        let install_dir = self.install_dir(id)?;
        if !self.runtime.exists(&install_dir) {
            self.reporter.info(&format!("{} is not installed", id));
            return Ok(());
        }
        self.reporter
            .info(&format!("Removing {}", install_dir.display()));
        self.runtime.remove_dir_all(&install_dir)
    }

    /// Write the generated package.xml, except for the families where one
    /// is known to confuse downstream tooling.
    fn write_package_manifest(
        &self,
        install_dir: &Path,
        id: &PackageId,
        artifact: &ArtifactRef,
    ) -> Result<()> {
        let family = id.family();
        if NO_PACKAGE_XML.contains(&family) {
            return Ok(());
        }

        // these never carry the version in the recorded path
        let path = if matches!(family, "emulator" | "ndk-bundle" | "tools") {
            family.to_string()
        } else if family == "ndk" {
            format!("ndk;{}", artifact.revision.dotted(usize::MAX))
        } else {
            id.to_string()
        };

        let contents = PACKAGE_XML_TEMPLATE
            .replace("{license_id}", SDK_LICENSE_ID)
            .replace("{license}", ANDROID_SDK_LICENSE)
            .replace("{path}", &path)
            .replace("{revision}", &xml_revision(&artifact.revision));
        self.runtime
            .write(&install_dir.join("package.xml"), contents.as_bytes())
    }
}

/// `<major>/<minor>/<micro>` elements from at most three numeric revision
/// components; a trailing letter ordinal is never recorded.
fn xml_revision(revision: &Revision) -> String {
    let tags = ["major", "minor", "micro"];
    revision
        .numeric_parts()
        .iter()
        .take(tags.len())
        .enumerate()
        .map(|(i, value)| format!("<{tag}>{value}</{tag}>", tag = tags[i]))
        .collect()
}
