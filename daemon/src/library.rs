use crate::config::{LibrarySettings, WallpaperDefaults, expand_path};
use common::Wallpaper;
use glob::glob;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source of the wallpapers a cycle may pick from.
pub trait CandidateProvider: Send {
    fn candidates(&mut self) -> Vec<Arc<Wallpaper>>;
}

impl<F> CandidateProvider for F
where
    F: FnMut() -> Vec<Arc<Wallpaper>> + Send,
{
    fn candidates(&mut self) -> Vec<Arc<Wallpaper>> {
        self()
    }
}

/// Wallpaper library: configured records plus files found in source directories.
///
/// A record keeps its `Arc` for as long as its file stays in the library, so
/// identity based history survives re-syncs.
pub struct Library {
    configured: Vec<Arc<Wallpaper>>,
    discovered: Vec<Arc<Wallpaper>>,
    sources: Vec<String>,
    extensions: Vec<String>,
    defaults: WallpaperDefaults,
}

impl Library {
    pub fn new(configured: Vec<Wallpaper>, settings: &LibrarySettings) -> Self {
        Self {
            configured: configured.into_iter().map(Arc::new).collect(),
            discovered: Vec::new(),
            sources: settings.sources.clone(),
            extensions: settings.extensions.clone(),
            defaults: settings.defaults.clone(),
        }
    }

    /// Re-scan the source directories.
    ///
    /// Files that are still present keep their record, new files get a
    /// record built from the defaults and vanished files are dropped.
    pub fn sync(&mut self) {
        let files = Self::load_wallpapers_from_sources(&self.sources, &self.extensions);

        let mut existing: HashMap<PathBuf, Arc<Wallpaper>> = self
            .discovered
            .drain(..)
            .map(|w| (w.image_path.clone(), w))
            .collect();
        let configured_paths: Vec<&Path> =
            self.configured.iter().map(|w| w.image_path.as_path()).collect();

        let mut added = 0;
        for file in files {
            // Explicit configuration wins over directory defaults
            if configured_paths.contains(&file.as_path()) {
                continue;
            }

            let wallpaper = match existing.remove(&file) {
                Some(wallpaper) => wallpaper,
                None => {
                    added += 1;
                    let mut wallpaper = self.defaults.create(file);
                    wallpaper.image_size = read_image_size(&wallpaper.image_path);
                    Arc::new(wallpaper)
                }
            };
            self.discovered.push(wallpaper);
        }

        if added > 0 || !existing.is_empty() {
            log::info!(
                "Library synced: {} added, {} removed, {} total",
                added,
                existing.len(),
                self.len()
            );
        }
    }

    /// Load wallpapers from source paths (files, directories or glob patterns)
    fn load_wallpapers_from_sources(sources: &[String], extensions: &[String]) -> Vec<PathBuf> {
        let mut wallpapers = Vec::new();

        for source in sources {
            let source_path = expand_path(source);

            if source_path.is_file() {
                if Self::has_valid_extension(&source_path, extensions) {
                    wallpapers.push(source_path);
                }
                continue;
            }

            let pattern = if source_path.is_dir() {
                format!("{}/*", source_path.display())
            } else {
                source_path.to_string_lossy().to_string()
            };

            match glob(&pattern) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        if entry.is_file() && Self::has_valid_extension(&entry, extensions) {
                            wallpapers.push(entry);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Failed to glob pattern '{}': {}", source, e);
                }
            }
        }

        wallpapers.sort();
        wallpapers.dedup();
        wallpapers
    }

    /// Check if a file has a valid extension
    fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    /// Look up a record by its image path
    pub fn find(&self, path: &Path) -> Option<&Arc<Wallpaper>> {
        self.iter().find(|w| w.image_path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Wallpaper>> {
        self.configured.iter().chain(self.discovered.iter())
    }

    pub fn len(&self) -> usize {
        self.configured.len() + self.discovered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CandidateProvider for Library {
    fn candidates(&mut self) -> Vec<Arc<Wallpaper>> {
        self.sync();
        self.iter().cloned().collect()
    }
}

fn read_image_size(path: &Path) -> Option<(u32, u32)> {
    match image::image_dimensions(path) {
        Ok(size) => Some(size),
        Err(e) => {
            log::debug!("Could not read size of {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn settings(dir: &Path) -> LibrarySettings {
        LibrarySettings {
            sources: vec![dir.to_string_lossy().to_string()],
            extensions: vec!["png".to_string(), "jpg".to_string()],
            defaults: WallpaperDefaults {
                priority: 40,
                ..Default::default()
            },
        }
    }

    fn write_png(path: &Path) {
        image::RgbaImage::from_pixel(4, 2, image::Rgba([1, 2, 3, 255]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_has_valid_extension() {
        let extensions = vec!["jpg".to_string(), "png".to_string()];

        assert!(Library::has_valid_extension(Path::new("test.jpg"), &extensions));
        assert!(Library::has_valid_extension(Path::new("test.PNG"), &extensions));
        assert!(!Library::has_valid_extension(Path::new("test.txt"), &extensions));
        assert!(!Library::has_valid_extension(Path::new("noext"), &extensions));
    }

    #[test]
    fn test_sync_discovers_files() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"));
        write_png(&dir.path().join("b.png"));
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut library = Library::new(Vec::new(), &settings(dir.path()));
        let candidates = library.candidates();

        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|w| w.priority == 40));
        assert_eq!(candidates[0].image_size, Some((4, 2)));
    }

    #[test]
    fn test_sync_keeps_identity() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_png(&a);
        write_png(&b);

        let mut library = Library::new(Vec::new(), &settings(dir.path()));
        library.sync();
        let first = library.find(&a).unwrap().clone();

        fs::remove_file(&b).unwrap();
        write_png(&dir.path().join("c.png"));
        library.sync();

        assert_eq!(library.len(), 2);
        assert!(Arc::ptr_eq(library.find(&a).unwrap(), &first));
        assert!(library.find(&b).is_none());
    }

    #[test]
    fn test_configured_record_overrides_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        write_png(&a);

        let mut configured = Wallpaper::new(&a);
        configured.priority = 5;

        let mut library = Library::new(vec![configured], &settings(dir.path()));
        let candidates = library.candidates();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].priority, 5);
    }

    #[test]
    fn test_closure_provider() {
        let wallpaper = Arc::new(Wallpaper::new("/tmp/a.png"));
        let shared = wallpaper.clone();
        let mut provider = move || vec![shared.clone()];

        let candidates = CandidateProvider::candidates(&mut provider);
        assert!(Arc::ptr_eq(&candidates[0], &wallpaper));
    }
}
