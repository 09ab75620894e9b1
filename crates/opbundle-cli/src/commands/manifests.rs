use super::{json_pretty, spin_fail, spin_ok, spinner, styled_path, EXIT_SUCCESS};
use opbundle_core::{BundleConfig, ManifestsReport, OutputSink, Pipeline};

pub fn run(config: BundleConfig, json: bool) -> Result<u8, String> {
    let pipeline = Pipeline::new(config);
    let report = run_pass(&pipeline, json)?;

    // Stream mode owns stdout; any summary would corrupt the manifests.
    if matches!(pipeline.config().output, OutputSink::Stream) {
        return Ok(EXIT_SUCCESS);
    }

    if json {
        println!("{}", json_pretty(&summary(&report))?);
    } else if let Some(ref dir) = report.output_dir {
        println!("bundle manifests generated in {}", styled_path(dir));
    }
    Ok(EXIT_SUCCESS)
}

pub(super) fn run_pass(pipeline: &Pipeline, json: bool) -> Result<ManifestsReport, String> {
    let quiet = json || matches!(pipeline.config().output, OutputSink::Stream);
    let pb = if quiet {
        None
    } else {
        Some(spinner("generating bundle manifests..."))
    };

    match pipeline.run_manifests() {
        Ok(report) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, "bundle manifests generated");
            }
            Ok(report)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "manifest generation failed");
            }
            Err(e.to_string())
        }
    }
}

pub(super) fn summary(report: &ManifestsReport) -> serde_json::Value {
    serde_json::json!({
        "csv": report.csv_name,
        "output_dir": report.output_dir,
        "descriptor_rewritten": report.descriptor_rewritten,
        "objects_written": report.objects_written,
        "references_pinned": report.references_pinned,
        "scorecard_written": report.scorecard_written,
    })
}
