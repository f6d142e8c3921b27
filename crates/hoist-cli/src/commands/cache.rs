use super::{json_pretty, EXIT_SUCCESS};
use hoist_store::{CacheLayout, ResourceCache};
use std::path::Path;

pub fn run(app: &Path, json: bool) -> Result<u8, String> {
    let entries = ResourceCache::new(CacheLayout::code(app)).entries();

    if json {
        println!("{}", json_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("code cache is empty");
    } else {
        for entry in &entries {
            println!(
                "{}  {:>10}  {}  {}",
                entry.last_accessed.format("%Y-%m-%d %H:%M"),
                entry.size,
                entry.hash,
                entry.path.display()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
