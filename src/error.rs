//! Error taxonomy for resolution and installation.
//!
//! Recoverable errors (missing package, corrupt download, dropped symlink)
//! never abort a batch; the remaining packages still install. Disk and
//! verification failures are fatal for the artifact they hit.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum SdkError {
    /// The install root is missing or not usable.
    Configuration(String),
    /// Unknown package identifier, with a closest-match suggestion when one
    /// scores well enough.
    MissingPackage {
        spec: String,
        suggestion: Option<String>,
    },
    /// The cached archive is not a valid zip container. The cached copy has
    /// been removed so the next run re-fetches it.
    BadArchive { url: String },
    /// A symlink inside an archive resolved outside the staging root. The
    /// entry was dropped; the rest of the install continues.
    SymlinkEscape { entry: String, target: String },
    /// Signature verification failed; the cached files were removed.
    Verification { path: PathBuf },
    /// Disk or permission failure.
    Io(std::io::Error),
}

impl SdkError {
    /// Whether a batch run should carry on with the remaining packages
    /// after reporting this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SdkError::MissingPackage { .. }
                | SdkError::BadArchive { .. }
                | SdkError::SymlinkEscape { .. }
        )
    }
}

impl fmt::Display for SdkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdkError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            SdkError::MissingPackage { spec, .. } => {
                write!(f, "failed to find package '{}'", spec)
            }
            SdkError::BadArchive { url } => {
                write!(f, "corrupt archive from {}, cached copy removed", url)
            }
            SdkError::SymlinkEscape { entry, target } => {
                write!(f, "unexpected symlink target: {} -> {}", entry, target)
            }
            SdkError::Verification { path } => {
                write!(f, "{} failed to verify", path.display())
            }
            SdkError::Io(err) => write!(f, "io failure: {}", err),
        }
    }
}

impl std::error::Error for SdkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SdkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        SdkError::Io(err)
    }
}
