use super::{json_pretty, styled_path, EXIT_SUCCESS};
use opbundle_core::{BundleConfig, OutputSink, Pipeline};

pub fn run(config: BundleConfig, json: bool) -> Result<u8, String> {
    let pipeline = Pipeline::new(config);
    let wrote = pipeline.run_metadata().map_err(|e| e.to_string())?;

    let output_dir = match &pipeline.config().output {
        OutputSink::Directory(dir) => dir.clone(),
        OutputSink::Stream => unreachable!("run_metadata rejects stream output"),
    };

    if json {
        let payload = serde_json::json!({
            "status": if wrote { "written" } else { "skipped" },
            "output_dir": output_dir,
        });
        println!("{}", json_pretty(&payload)?);
    } else if wrote {
        println!("bundle metadata generated in {}", styled_path(&output_dir));
    } else {
        println!("bundle metadata already present; skipped (use --overwrite to regenerate)");
    }
    Ok(EXIT_SUCCESS)
}
