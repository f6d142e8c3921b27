use super::{json_pretty, load_descriptor, EXIT_SUCCESS};
use hoist_core::{UpdateLock, LOCK_FILE};
use hoist_store::{CacheLayout, GarbageCollector, Retention};
use std::path::Path;

pub fn run(app: &Path, retention_days: Option<i64>, json: bool) -> Result<u8, String> {
    let descriptor = load_descriptor(app)?;
    let days = retention_days.unwrap_or(descriptor.cache.retention_days);
    let retention = Retention::days(days);

    let _lock = UpdateLock::acquire(&app.join(LOCK_FILE)).map_err(|e| format!("cache error: {e}"))?;
    let code = GarbageCollector::new(CacheLayout::code(app).root()).collect(retention);
    let native = GarbageCollector::new(CacheLayout::native(app).root()).collect_native(retention);

    if json {
        let payload = serde_json::json!({
            "retention_days": days,
            "code": code,
            "native": native,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "gc: removed {} code and {} native entries ({} kept)",
            code.removed(),
            native.removed(),
            code.kept + native.kept
        );
    }
    Ok(EXIT_SUCCESS)
}
