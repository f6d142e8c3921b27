use super::{json_pretty, open_updater, EXIT_FAILURE, EXIT_SUCCESS};
use std::path::Path;

pub fn run(app: &Path, json: bool) -> Result<u8, String> {
    let updater = open_updater(app, None)?;
    let failed = updater.verify().map_err(|e| e.to_string())?;
    let paths: Vec<&str> = failed.iter().map(hoist_schema::Resource::path).collect();

    if json {
        let payload = serde_json::json!({
            "valid": failed.is_empty(),
            "failed": paths,
        });
        println!("{}", json_pretty(&payload)?);
    } else if failed.is_empty() {
        println!("{}: all resources valid", app.display());
    } else {
        println!("{}: {} resource(s) invalid", app.display(), failed.len());
        for path in &paths {
            println!("  FAIL {path}");
        }
    }

    if failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}
