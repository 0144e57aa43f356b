use anyhow::{Context, Result, bail};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use sdkmgr::error::SdkError;
use sdkmgr::fetch::{CHECKSUMS_URLS, GpgvVerifier, HttpClient, NullVerifier, Verifier};
use sdkmgr::index::{PackageIndex, PackageIndexBuilder};
use sdkmgr::licenses;
use sdkmgr::manifest;
use sdkmgr::reporter::LogReporter;
use sdkmgr::resolver::Resolver;
use sdkmgr::runtime::{RealRuntime, Runtime};

/// sdkmgr - Android SDK package manager
///
/// Resolves sdk-style package paths (e.g. "build-tools;30.0.3") against the
/// signed checksums manifest and installs them into the SDK root. Built for
/// unattended use: resolution is deterministic and archives are extracted
/// through a staging directory with symlink containment checks.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SDK root directory (also via ANDROID_HOME)
    #[arg(
        long = "sdk-root",
        env = "ANDROID_HOME",
        value_name = "PATH",
        global = true
    )]
    sdk_root: Option<PathBuf>,

    /// Cache directory for manifests and downloads (defaults to
    /// ~/.cache/sdkmgr)
    #[arg(
        long = "cache-dir",
        env = "SDKMGR_CACHE",
        value_name = "PATH",
        global = true
    )]
    cache_dir: Option<PathBuf>,

    /// Checksums manifest URL, overriding the built-in mirror list
    #[arg(long = "checksums-url", value_name = "URL", global = true)]
    checksums_url: Option<String>,

    /// Skip gpgv signature verification of the manifest
    #[arg(long = "skip-verification", global = true)]
    skip_verification: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install packages into the SDK root
    Install(PackagesArgs),

    /// Remove installed package directories
    Uninstall(PackagesArgs),

    /// List available packages
    List,

    /// Review and accept SDK package licenses
    Licenses,
}

#[derive(clap::Args, Debug)]
struct PackagesArgs {
    /// sdk-style package paths, e.g. "build-tools;30.0.3"
    #[arg(value_name = "PACKAGE", required = true)]
    packages: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let runtime = RealRuntime;
    let reporter = LogReporter;

    let sdk_root = resolve_sdk_root(&runtime, cli.sdk_root)?;

    if let Commands::Licenses = cli.command {
        return licenses::accept_licenses(&runtime, &reporter, &sdk_root, confirm_on_stdin);
    }

    let cache_dir = match cli.cache_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .context("Cannot determine home directory for the cache")?
            .join(".cache/sdkmgr"),
    };
    runtime.create_dir_all(&cache_dir)?;

    let client = HttpClient::new()?;
    let verifier: Box<dyn Verifier> = if cli.skip_verification {
        Box::new(NullVerifier)
    } else {
        Box::new(GpgvVerifier::new(cache_dir.join("keyring.gpg")))
    };
    let mirrors: Vec<String> = match cli.checksums_url {
        Some(url) => vec![url],
        None => CHECKSUMS_URLS.iter().map(|url| url.to_string()).collect(),
    };

    // listing always revalidates; installs reuse a verified cached manifest
    let refresh = matches!(cli.command, Commands::List);
    let bytes = client
        .checksums(&runtime, &cache_dir, &mirrors, verifier.as_ref(), refresh)
        .await?;
    let index = build_index(&bytes)?;
    let resolver = Resolver::new(&runtime, &reporter, &index, &sdk_root);

    match cli.command {
        Commands::Install(args) => {
            let failures = resolver
                .install_all(&client, &cache_dir, &args.packages)
                .await;
            if failures > 0 {
                bail!("{} package(s) failed to install", failures);
            }
        }
        Commands::Uninstall(args) => {
            let failures = resolver.uninstall_all(&args.packages);
            if failures > 0 {
                bail!("{} package(s) failed to uninstall", failures);
            }
        }
        Commands::List => print_available(&resolver.available()),
        Commands::Licenses => unreachable!("handled above"),
    }
    Ok(())
}

fn build_index(bytes: &[u8]) -> Result<PackageIndex> {
    let manifest = manifest::parse_checksums(bytes)?;
    let mut builder = PackageIndexBuilder::new();
    builder.add_manifest(&manifest);
    Ok(builder.build())
}

/// The SDK root comes from --sdk-root/ANDROID_HOME, falling back to the
/// conventional system location. Its parent must already exist; the root
/// itself is created on demand.
fn resolve_sdk_root<R: Runtime>(runtime: &R, flag: Option<PathBuf>) -> Result<PathBuf> {
    let sdk_root = flag.unwrap_or_else(|| PathBuf::from("/opt/android-sdk"));
    if let Some(parent) = sdk_root.parent()
        && !runtime.exists(parent)
    {
        return Err(SdkError::Configuration(format!(
            "SDK root parent {:?} does not exist",
            parent
        ))
        .into());
    }
    runtime.create_dir_all(&sdk_root)?;
    Ok(sdk_root)
}

fn print_available(names: &[String]) {
    let width = names.iter().map(String::len).max().unwrap_or(7);
    println!("Available Packages:");
    println!("  {} | Version", pad("Path", width));
    println!("  {} | -------", pad("-------", width));
    for name in names {
        println!("  {} |", pad(name, width));
    }
}

fn pad(text: &str, width: usize) -> String {
    format!("{:<width$}", text, width = width)
}

fn confirm_on_stdin(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read from stdin")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from(["sdkmgr", "install", "build-tools;30.0.3"]).unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.packages, vec!["build-tools;30.0.3"]);
            }
            _ => panic!("Expected Install command"),
        }
        assert_eq!(cli.sdk_root, None);
    }

    #[test]
    fn test_cli_install_requires_packages() {
        assert!(Cli::try_parse_from(["sdkmgr", "install"]).is_err());
    }

    #[test]
    fn test_cli_global_sdk_root() {
        let cli = Cli::try_parse_from(["sdkmgr", "--sdk-root", "/tmp/sdk", "list"]).unwrap();
        assert_eq!(cli.sdk_root, Some(PathBuf::from("/tmp/sdk")));
    }

    #[test]
    fn test_cli_skip_verification_flag() {
        let cli =
            Cli::try_parse_from(["sdkmgr", "list", "--skip-verification"]).unwrap();
        assert!(cli.skip_verification);
    }

    #[test]
    fn test_resolve_sdk_root_rejects_missing_parent() {
        let runtime = RealRuntime;
        let result = resolve_sdk_root(
            &runtime,
            Some(PathBuf::from("/no/such/parent/anywhere/sdk")),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_sdk_root_creates_root() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runtime = RealRuntime;
        let sdk_root = resolve_sdk_root(&runtime, Some(dir.path().join("sdk")))?;
        assert!(sdk_root.is_dir());
        Ok(())
    }
}
