use super::{json_pretty, manifests, styled_path, EXIT_SUCCESS};
use opbundle_core::{BundleConfig, OutputSink, Pipeline};

/// The full pipeline: the manifests pass followed by the independent
/// metadata pass.
pub fn run(config: BundleConfig, json: bool) -> Result<u8, String> {
    let pipeline = Pipeline::new(config);
    let report = manifests::run_pass(&pipeline, json)?;

    if matches!(pipeline.config().output, OutputSink::Stream) {
        // No durable bundle root in stream mode, so there is no metadata
        // area to generate either.
        return Ok(EXIT_SUCCESS);
    }
    let metadata_written = pipeline.run_metadata().map_err(|e| e.to_string())?;

    if json {
        let mut payload = manifests::summary(&report);
        payload["metadata_written"] = serde_json::Value::Bool(metadata_written);
        println!("{}", json_pretty(&payload)?);
    } else if let Some(ref dir) = report.output_dir {
        println!("bundle generated in {}", styled_path(dir));
    }
    Ok(EXIT_SUCCESS)
}
