use super::{json_pretty, load_descriptor, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use hoist_patch::{create_patch, patch_file_name};
use hoist_schema::Resource;
use std::path::Path;

/// Write `patch<from>.dat` (and one patch per aux group) into `app`, the
/// published directory of the newer version.
pub fn run(app: &Path, old: &Path, from: u64, json: bool) -> Result<u8, String> {
    let new_descriptor = load_descriptor(app)?;
    let old_descriptor = load_descriptor(old)?;
    let version = new_descriptor.digest_version().map_err(|e| e.to_string())?;

    let mut pairs: Vec<(Option<String>, Vec<Resource>, Vec<Resource>)> = vec![(
        None,
        old_descriptor.resource_list(old, old_descriptor.version),
        new_descriptor.resource_list(app, new_descriptor.version),
    )];
    let old_groups = old_descriptor.aux_groups(old, old_descriptor.version);
    for group in new_descriptor.aux_groups(app, new_descriptor.version) {
        let previous = old_groups
            .iter()
            .find(|g| g.name == group.name)
            .map(|g| g.resources.clone())
            .unwrap_or_default();
        pairs.push((Some(group.name.to_string()), previous, group.resources));
    }

    let pb = (!json).then(|| spinner("building patches..."));
    let mut written = Vec::new();
    for (group, old_set, new_set) in &pairs {
        let name = patch_file_name(from, group.as_deref());
        let summary = match create_patch(old_set, new_set, version, &app.join(&name)) {
            Ok(summary) => summary,
            Err(e) => {
                if let Some(pb) = &pb {
                    spin_fail(pb, &format!("{name} failed"));
                }
                return Err(format!("failed to build {name}: {e}"));
            }
        };
        written.push(serde_json::json!({
            "patch": name,
            "group": group,
            "created": summary.created,
            "patched": summary.patched,
            "deleted": summary.deleted,
        }));
    }

    if json {
        println!("{}", json_pretty(&written)?);
    } else if let Some(pb) = &pb {
        spin_ok(pb, &format!("wrote {} patch file(s)", written.len()));
        for entry in &written {
            println!(
                "  {}: {} created, {} patched, {} deleted",
                entry["patch"].as_str().unwrap_or_default(),
                entry["created"].as_array().map_or(0, Vec::len),
                entry["patched"].as_array().map_or(0, Vec::len),
                entry["deleted"].as_array().map_or(0, Vec::len),
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
