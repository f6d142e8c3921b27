use super::{json_pretty, load_descriptor, EXIT_SUCCESS};
use hoist_schema::{
    public_key_base64, sign_manifest, signature_path, signing_key_from_base64, Manifest,
};
use std::fs;
use std::path::Path;

pub fn run(app: &Path, sign_key: Option<&Path>, json: bool) -> Result<u8, String> {
    let descriptor = load_descriptor(app)?;
    let version = descriptor.digest_version().map_err(|e| e.to_string())?;
    let key = sign_key
        .map(|path| {
            let encoded = fs::read_to_string(path)
                .map_err(|e| format!("failed to read signing key {}: {e}", path.display()))?;
            signing_key_from_base64(&encoded).map_err(|e| e.to_string())
        })
        .transpose()?;

    // Publishers digest every group, active or not.
    let mut sets = vec![(None, descriptor.resource_list(app, descriptor.version))];
    for group in descriptor.aux_groups(app, descriptor.version) {
        sets.push((Some(group.name), group.resources));
    }

    let mut written = Vec::new();
    for (group, resources) in &sets {
        let manifest = Manifest::create(resources, version, group.as_deref())
            .map_err(|e| format!("failed to digest {}: {e}", app.display()))?;
        let path = manifest.write_to(app).map_err(|e| e.to_string())?;
        if let Some(key) = &key {
            let sig = signature_path(&path);
            fs::write(&sig, sign_manifest(&manifest.to_bytes(), key))
                .map_err(|e| format!("failed to write {}: {e}", sig.display()))?;
        }
        written.push(serde_json::json!({
            "manifest": manifest.name(),
            "group": group.as_deref(),
            "resources": manifest.len(),
            "signed": key.is_some(),
        }));
    }

    if json {
        let payload = serde_json::json!({
            "digest_version": version.number(),
            "manifests": written,
            "public_key": key.as_ref().map(public_key_base64),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for entry in &written {
            println!(
                "wrote {} ({} resources)",
                entry["manifest"].as_str().unwrap_or_default(),
                entry["resources"]
            );
        }
        if let Some(key) = &key {
            println!("signed with {}", public_key_base64(key));
        }
    }
    Ok(EXIT_SUCCESS)
}
