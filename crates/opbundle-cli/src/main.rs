mod commands;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_MANIFEST_ERROR};
use opbundle_core::{BundleConfig, InputSource, OutputSink};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

/// Annotation naming the tool that stamped the descriptor and metadata.
const BUILDER_ANNOTATION: &str = "operators.operatorframework.io/builder";

#[derive(Debug, Parser)]
#[command(
    name = "opbundle",
    version,
    about = "Idempotent operator bundle assembler"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Package (operator) name. Defaults to the current directory's name.
    #[arg(long)]
    package: Option<String>,

    /// Bundle root directory to write into.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SourceArgs {
    /// Directory of cluster-ready manifests to bundle.
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Legacy directory of deployment manifests. Without --crds-dir this is
    /// reinterpreted as --input-dir.
    #[arg(long)]
    deploy_dir: Option<PathBuf>,

    /// Legacy directory of CRD manifests, merged with --deploy-dir.
    #[arg(long)]
    crds_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct ManifestsOpts {
    /// Semantic version for the bundle. When omitted, the seed descriptor's
    /// version is kept.
    #[arg(long)]
    version: Option<String>,

    /// Root directory holding descriptor base templates
    /// (bases/<package>.clusterserviceversion.yaml).
    #[arg(long, default_value = "config/manifests")]
    kustomize_dir: PathBuf,

    /// Write the whole bundle to stdout as one multiplexed stream.
    #[arg(long, default_value_t = false)]
    stdout: bool,

    /// Keep the existing descriptor byte-for-byte when only its createdAt
    /// timestamp would change.
    #[arg(long, default_value_t = false)]
    ignore_if_only_created_at_changed: bool,

    /// Pin image tags to content digests after writing manifests.
    #[arg(long, default_value_t = false)]
    use_image_digests: bool,

    /// Digest resolver option, repeatable. Keys: kind=registry|fixed,
    /// insecure=true|false, pin.<reference>=<digest>.
    #[arg(long = "resolver-option", value_name = "KEY=VALUE")]
    resolver_options: Vec<String>,

    /// Extra service accounts to declare RBAC subjects for.
    #[arg(long, value_delimiter = ',')]
    extra_service_accounts: Vec<String>,

    /// Extra annotation to stamp into the descriptor, repeatable.
    #[arg(long = "annotation", value_name = "KEY=VALUE")]
    annotations: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct MetadataOpts {
    /// Comma-separated channel list for the bundle. An empty list is
    /// accepted.
    #[arg(long, value_delimiter = ',')]
    channels: Vec<String>,

    /// Default channel for the package.
    #[arg(long)]
    default_channel: Option<String>,

    /// Overwrite existing bundle metadata.
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generate bundle manifests and metadata in one run.
    Generate {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        manifests: ManifestsOpts,
        #[command(flatten)]
        metadata: MetadataOpts,
    },
    /// Generate the manifests area: descriptor, CRDs, and plain objects.
    Manifests {
        #[command(flatten)]
        common: CommonArgs,
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        manifests: ManifestsOpts,
    },
    /// Generate bundle metadata (annotations.yaml and the Dockerfile) only.
    Metadata {
        #[command(flatten)]
        common: CommonArgs,
        /// Existing bundle directory to probe for metadata.
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[command(flatten)]
        metadata: MetadataOpts,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("OPBUNDLE_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Generate {
            common,
            source,
            manifests,
            metadata,
        } => manifests_config(&common, &source, &manifests, Some(&metadata))
            .and_then(|config| commands::generate::run(config, json_output)),
        Commands::Manifests {
            common,
            source,
            manifests,
        } => manifests_config(&common, &source, &manifests, None)
            .and_then(|config| commands::manifests::run(config, json_output)),
        Commands::Metadata {
            common,
            input_dir,
            metadata,
        } => metadata_config(&common, input_dir.as_deref(), &metadata)
            .and_then(|config| commands::metadata::run(config, json_output)),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("configuration error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("schema error:")
                || msg.starts_with("merge error:")
                || msg.starts_with("failed to parse")
            {
                EXIT_MANIFEST_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn manifests_config(
    common: &CommonArgs,
    source: &SourceArgs,
    opts: &ManifestsOpts,
    metadata: Option<&MetadataOpts>,
) -> Result<BundleConfig, String> {
    let input = InputSource::resolve(
        stdin_is_piped(),
        source.input_dir.as_deref(),
        source.deploy_dir.as_deref(),
        source.crds_dir.as_deref(),
    )
    .map_err(|e| e.to_string())?;
    let output = OutputSink::resolve(opts.stdout, common.output_dir.as_deref())
        .map_err(|e| e.to_string())?;

    let mut csv_annotations = parse_key_values(&opts.annotations)?;
    csv_annotations.insert(BUILDER_ANNOTATION.to_owned(), builder_value());

    Ok(BundleConfig {
        package_name: package_name(common)?,
        version: opts.version.clone(),
        input,
        output,
        template_root: opts.kustomize_dir.clone(),
        channels: metadata.map(|m| m.channels.clone()).unwrap_or_default(),
        default_channel: metadata.and_then(|m| m.default_channel.clone()),
        overwrite_metadata: metadata.is_some_and(|m| m.overwrite),
        ignore_created_at_only: opts.ignore_if_only_created_at_changed,
        pin_images: opts.use_image_digests,
        resolver_options: parse_key_values(&opts.resolver_options)?,
        extra_service_accounts: opts.extra_service_accounts.clone(),
        csv_annotations,
        metadata_labels: builder_labels(),
    })
}

fn metadata_config(
    common: &CommonArgs,
    input_dir: Option<&std::path::Path>,
    opts: &MetadataOpts,
) -> Result<BundleConfig, String> {
    let output = OutputSink::resolve(false, common.output_dir.as_deref())
        .map_err(|e| e.to_string())?;
    // The metadata pass collects nothing; its input is only a probe root.
    let input = match (input_dir, &output) {
        (Some(dir), _) => InputSource::Dir(dir.to_path_buf()),
        (None, OutputSink::Directory(dir)) => InputSource::Dir(dir.clone()),
        (None, OutputSink::Stream) => unreachable!("metadata output is always a directory"),
    };

    Ok(BundleConfig {
        package_name: package_name(common)?,
        version: None,
        input,
        output,
        template_root: PathBuf::from("config/manifests"),
        channels: opts.channels.clone(),
        default_channel: opts.default_channel.clone(),
        overwrite_metadata: opts.overwrite,
        ignore_created_at_only: false,
        pin_images: false,
        resolver_options: BTreeMap::new(),
        extra_service_accounts: Vec::new(),
        csv_annotations: BTreeMap::new(),
        metadata_labels: builder_labels(),
    })
}

fn package_name(common: &CommonArgs) -> Result<String, String> {
    if let Some(ref package) = common.package {
        return Ok(package.clone());
    }
    let dir = std::env::current_dir().map_err(|e| format!("cannot determine package name: {e}"))?;
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            "cannot derive a package name from the current directory; pass --package".to_owned()
        })
}

fn builder_value() -> String {
    format!("opbundle-v{}", env!("CARGO_PKG_VERSION"))
}

fn builder_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(BUILDER_ANNOTATION.to_owned(), builder_value());
    labels
}

fn parse_key_values(items: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut map = BTreeMap::new();
    for item in items {
        let Some((key, value)) = item.split_once('=') else {
            return Err(format!("expected KEY=VALUE, got '{item}'"));
        };
        map.insert(key.to_owned(), value.to_owned());
    }
    Ok(map)
}

/// Whether stdin is a pipe. A terminal or /dev/null stdin does not select
/// the stream source; only an actual pipe does.
fn stdin_is_piped() -> bool {
    use std::os::unix::fs::FileTypeExt;
    std::fs::metadata("/proc/self/fd/0")
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_values_accepts_pairs() {
        let map = parse_key_values(&["kind=fixed".to_owned(), "a=b=c".to_owned()]).unwrap();
        assert_eq!(map.get("kind").map(String::as_str), Some("fixed"));
        assert_eq!(map.get("a").map(String::as_str), Some("b=c"));
    }

    #[test]
    fn parse_key_values_rejects_bare_keys() {
        assert!(parse_key_values(&["no-equals".to_owned()]).is_err());
    }

    #[test]
    fn builder_value_carries_the_crate_version() {
        assert!(builder_value().starts_with("opbundle-v"));
    }

    #[test]
    fn cli_parses_generate_flags() {
        let cli = Cli::parse_from([
            "opbundle",
            "generate",
            "--package",
            "memcached-operator",
            "--input-dir",
            "deploy",
            "--version",
            "0.0.1",
            "--channels",
            "alpha,stable",
            "--default-channel",
            "stable",
            "--use-image-digests",
        ]);
        match cli.command {
            Commands::Generate {
                common,
                source,
                manifests,
                metadata,
            } => {
                assert_eq!(common.package.as_deref(), Some("memcached-operator"));
                assert_eq!(source.input_dir.as_deref(), Some(std::path::Path::new("deploy")));
                assert_eq!(manifests.version.as_deref(), Some("0.0.1"));
                assert_eq!(metadata.channels, vec!["alpha", "stable"]);
                assert_eq!(metadata.default_channel.as_deref(), Some("stable"));
                assert!(manifests.use_image_digests);
            }
            _ => panic!("expected generate subcommand"),
        }
    }
}
