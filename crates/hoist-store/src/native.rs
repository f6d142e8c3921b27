use crate::cache::ResourceCache;
use crate::layout::CacheLayout;
use crate::StoreError;
use hoist_schema::{ContentHash, Resource};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Cache of native library archives, unpacked next to the cached archive.
#[derive(Debug, Clone)]
pub struct NativeCache {
    cache: ResourceCache,
}

impl NativeCache {
    pub fn new(layout: CacheLayout) -> Self {
        Self {
            cache: ResourceCache::new(layout),
        }
    }

    pub fn for_app(app_dir: &Path) -> Self {
        Self::new(CacheLayout::native(app_dir))
    }

    pub fn layout(&self) -> &CacheLayout {
        self.cache.layout()
    }

    /// Cache `resource` under `hash` and make sure its contents are unpacked,
    /// returning the directory to add to the native library path.
    pub fn materialize(&self, resource: &Resource, hash: &ContentHash) -> Result<PathBuf, StoreError> {
        let ext = resource.extension();
        let archive = self.cache.cache_file(resource.local(), hash, &ext)?;
        let dir = self.layout().entry_dir(hash);
        let sentinel = self.layout().unpacked_path(hash, &ext);

        if sentinel.exists() {
            debug!("{} already unpacked", resource.path());
            return Ok(dir);
        }

        let mut zip = zip::ZipArchive::new(BufReader::new(File::open(&archive)?))?;
        zip.extract(&dir)?;
        fs::write(&sentinel, b"")?;
        info!("unpacked {} into {}", resource.path(), dir.display());
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoist_schema::ResourceKind;
    use std::io::Write;

    fn native_jar(path: &Path) {
        let mut zw = zip::ZipWriter::new(File::create(path).unwrap());
        zw.start_file("libhello.so", zip::write::SimpleFileOptions::default())
            .unwrap();
        zw.write_all(b"ELF").unwrap();
        zw.finish().unwrap();
    }

    #[test]
    fn materialize_unpacks_once() {
        let app = tempfile::tempdir().unwrap();
        fs::create_dir_all(app.path().join("native")).unwrap();
        native_jar(&app.path().join("native/linux.jar"));
        let resource = Resource::local_only("native/linux.jar", app.path(), ResourceKind::Data)
            .with_native(true);
        let hash = ContentHash::new("deadbeef");

        let cache = NativeCache::for_app(app.path());
        let dir = cache.materialize(&resource, &hash).unwrap();
        assert_eq!(dir, app.path().join(".ncache/deadbeef"));
        assert_eq!(fs::read(dir.join("libhello.so")).unwrap(), b"ELF");
        assert!(dir.join("deadbeef.jar.unpacked").exists());
        assert!(dir.join("deadbeef.jar.lastAccessed").exists());

        fs::remove_file(dir.join("libhello.so")).unwrap();
        cache.materialize(&resource, &hash).unwrap();
        assert!(!dir.join("libhello.so").exists(), "sentinel skips re-extraction");
    }
}
