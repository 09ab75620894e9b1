use crate::base::{base_csv_path, load_base, BaseOutcome};
use crate::collector::ManifestSet;
use crate::pinner::pin_images;
use crate::related::find_related_images;
use crate::scorecard::write_scorecard_config;
use crate::source::{InputSource, OutputSink};
use crate::synth::CsvGenerator;
use crate::writer::{write_objects_to_dir, write_objects_to_stream, write_yaml_document};
use crate::CoreError;
use opbundle_registry::resolver_from_options;
use opbundle_schema::{validate_version, Document};
use opbundle_store::{find_metadata, BundleLayout, BundleMetadata};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use tracing::info;

/// Everything the pipeline needs, resolved once at startup and passed by
/// reference through every stage. No stage consults ambient state.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    pub package_name: String,
    /// Bundle version; when absent the seed descriptor's version is kept.
    pub version: Option<String>,
    pub input: InputSource,
    pub output: OutputSink,
    /// Root holding `bases/<package>.clusterserviceversion.yaml`.
    pub template_root: PathBuf,
    pub channels: Vec<String>,
    pub default_channel: Option<String>,
    pub overwrite_metadata: bool,
    /// Opt-in: keep the existing descriptor when only `createdAt` changed.
    pub ignore_created_at_only: bool,
    pub pin_images: bool,
    pub resolver_options: BTreeMap<String, String>,
    pub extra_service_accounts: Vec<String>,
    /// Annotations injected into the synthesized descriptor.
    pub csv_annotations: BTreeMap<String, String>,
    /// Auxiliary labels merged into the bundle metadata document.
    pub metadata_labels: BTreeMap<String, String>,
}

/// Summary of a manifests run, for reporting.
#[derive(Debug)]
pub struct ManifestsReport {
    pub output_dir: Option<PathBuf>,
    pub csv_name: String,
    pub descriptor_rewritten: bool,
    pub objects_written: usize,
    pub references_pinned: usize,
    pub scorecard_written: bool,
}

/// The bundle assembly pipeline. One sequential flow per invocation; the
/// manifests and metadata passes are independently invocable.
pub struct Pipeline {
    config: BundleConfig,
}

impl Pipeline {
    pub fn new(config: BundleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    /// Run the manifests pass wired to the process stdin/stdout.
    pub fn run_manifests(&self) -> Result<ManifestsReport, CoreError> {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        self.run_manifests_io(&mut stdin.lock(), &mut stdout.lock())
    }

    /// Run the manifests pass with injectable stream endpoints.
    pub fn run_manifests_io(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<ManifestsReport, CoreError> {
        let cfg = &self.config;
        info!("generating bundle manifests");

        if let Some(ref version) = cfg.version {
            validate_version(version)?;
        }

        let mut set = match &cfg.input {
            InputSource::Stream => ManifestSet::from_reader(input)?,
            InputSource::LegacyPair {
                deploy_dir,
                crds_dir,
            } => ManifestSet::from_dir_pair(deploy_dir, crds_dir)?,
            InputSource::Dir(dir) => ManifestSet::from_dir(dir)?,
        };

        // A base template only comes into play when the collected set
        // supplied no descriptor candidate of its own.
        if set.csvs.is_empty() {
            let base_path = base_csv_path(&cfg.template_root, &cfg.package_name);
            match load_base(&base_path)? {
                BaseOutcome::Found(base) => set.csvs.push(*base),
                BaseOutcome::NotFound => {
                    info!("building a ClusterServiceVersion without an existing base");
                }
            }
        }

        let related_images = find_related_images(&set)?;
        let generator = CsvGenerator {
            package: &cfg.package_name,
            version: cfg.version.as_deref(),
            annotations: &cfg.csv_annotations,
            extra_service_accounts: &cfg.extra_service_accounts,
            related_images: &related_images,
        };
        let csv = generator.synthesize(&set)?;
        let objects = bundle_objects(&set);

        match &cfg.output {
            OutputSink::Stream => {
                write_yaml_document(output, &csv.to_yaml()?)?;
                write_objects_to_stream(output, &objects)?;
                Ok(ManifestsReport {
                    output_dir: None,
                    csv_name: csv.metadata.name,
                    descriptor_rewritten: true,
                    objects_written: objects.len(),
                    references_pinned: 0,
                    scorecard_written: false,
                })
            }
            OutputSink::Directory(root) => {
                // Idempotency only applies to a pre-existing bundle, so the
                // check precedes directory creation.
                let ignore = cfg.ignore_created_at_only && root.exists();
                let layout = BundleLayout::new(root);
                layout.initialize()?;

                let descriptor_rewritten = generator.write_to_dir(&csv, &layout, ignore)?;
                write_objects_to_dir(&layout.manifests_dir(), &objects)?;

                let mut references_pinned = 0;
                if cfg.pin_images {
                    info!("pinning image tags to digests");
                    let resolver = resolver_from_options(&cfg.resolver_options)?;
                    let report = pin_images(&layout.manifests_dir(), resolver.as_ref())?;
                    references_pinned = report.references_pinned;
                }

                let scorecard_written = write_scorecard_config(&layout, set.scorecard.as_ref())?;

                info!("bundle manifests generated in {}", root.display());
                Ok(ManifestsReport {
                    output_dir: Some(root.clone()),
                    csv_name: csv.metadata.name,
                    descriptor_rewritten,
                    objects_written: objects.len(),
                    references_pinned,
                    scorecard_written,
                })
            }
        }
    }

    /// Run the metadata pass. Independent of manifest generation: it can be
    /// invoked on its own against an existing bundle.
    ///
    /// Returns whether metadata was written (`false` for the guarded no-op).
    pub fn run_metadata(&self) -> Result<bool, CoreError> {
        let cfg = &self.config;
        info!("generating bundle metadata");

        let OutputSink::Directory(output_dir) = &cfg.output else {
            return Err(CoreError::Config(
                "metadata generation requires a directory output".to_owned(),
            ));
        };
        // The input directory may itself be an existing bundle (the
        // regeneration flow), so both roots are probed for the guard.
        let mut probe_roots = vec![output_dir.clone()];
        if let InputSource::Dir(dir) = &cfg.input {
            probe_roots.insert(0, dir.clone());
        }

        for root in &probe_roots {
            match find_metadata(root) {
                Ok(found) if !cfg.overwrite_metadata => {
                    info!(
                        "bundle metadata already present at {}; skipping (pass overwrite to regenerate)",
                        found.path.display()
                    );
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) if e.is_metadata_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        let scorecard_config_present = probe_roots
            .iter()
            .any(|root| BundleLayout::new(root).scorecard_config_file().is_file());

        let metadata = BundleMetadata {
            bundle_dir: output_dir.clone(),
            package_name: cfg.package_name.clone(),
            channels: cfg.channels.clone(),
            default_channel: cfg.default_channel.clone(),
            other_labels: cfg.metadata_labels.clone(),
            scorecard_config_present,
        };
        metadata.write()?;
        Ok(true)
    }
}

/// Everything the bundle writer emits besides the descriptor: CRDs first,
/// then the plain objects, each partition in collection order.
fn bundle_objects(set: &ManifestSet) -> Vec<&Document> {
    set.crds.iter().chain(set.others.iter()).collect()
}
