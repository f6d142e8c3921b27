use super::{json_pretty, percent_bar, EXIT_SUCCESS};
use hoist_patch::apply_patch_file;
use std::path::Path;

pub fn run(app: &Path, patch: &Path, json: bool) -> Result<u8, String> {
    let bar = percent_bar(json);
    bar.set_message("apply-patch");
    let summary = apply_patch_file(app, patch, &|percent: u8| bar.set_position(u64::from(percent)))
        .map_err(|e| format!("failed to apply {}: {e}", patch.display()))?;
    bar.finish_and_clear();

    if json {
        let payload = serde_json::json!({
            "patch": patch.display().to_string(),
            "created": summary.created,
            "patched": summary.patched,
            "deleted": summary.deleted,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "applied {}: {} created, {} patched, {} deleted",
            patch.display(),
            summary.created.len(),
            summary.patched.len(),
            summary.deleted.len()
        );
    }
    Ok(EXIT_SUCCESS)
}
