use common::Wallpaper;
use std::sync::Arc;

/// Smallest capacity the selection engine will ever set.
pub const MIN_HISTORY_CAPACITY: usize = 3;

/// Bounded FIFO of recently picked wallpapers.
///
/// Entries are compared by identity (`Arc::ptr_eq`), not by value. Once the
/// window is full, every insert shifts the contents down one slot and
/// overwrites the last one.
#[derive(Debug, Clone)]
pub struct LastActiveWindow {
    entries: Vec<Arc<Wallpaper>>,
    capacity: usize,
}

impl LastActiveWindow {
    /// Create an empty window; a capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    /// Append a wallpaper, evicting the oldest entry when full.
    pub fn add(&mut self, wallpaper: Arc<Wallpaper>) {
        if self.is_full() {
            self.entries.rotate_left(1);
            if let Some(last) = self.entries.last_mut() {
                *last = wallpaper;
            }
        } else {
            self.entries.push(wallpaper);
        }
    }

    /// Change the capacity, evicting the oldest entries that no longer fit.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if self.entries.len() > capacity {
            let excess = self.entries.len() - capacity;
            self.entries.drain(..excess);
        }
        self.capacity = capacity;
    }

    pub fn contains(&self, wallpaper: &Arc<Wallpaper>) -> bool {
        self.entries.iter().any(|w| Arc::ptr_eq(w, wallpaper))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Wallpaper>> {
        self.entries.iter()
    }
}

impl Default for LastActiveWindow {
    fn default() -> Self {
        Self::new(MIN_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallpaper(name: &str) -> Arc<Wallpaper> {
        Arc::new(Wallpaper::new(format!("/tmp/{}.png", name)))
    }

    fn names(window: &LastActiveWindow) -> Vec<String> {
        window
            .iter()
            .map(|w| w.image_path.file_stem().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_fill_then_shift() {
        let mut window = LastActiveWindow::new(3);
        assert!(window.is_empty());

        for name in ["a", "b", "c", "d"] {
            window.add(wallpaper(name));
        }

        assert!(window.is_full());
        assert_eq!(names(&window), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_shrink_evicts_oldest() {
        let mut window = LastActiveWindow::new(5);
        for name in ["a", "b", "c", "d", "e"] {
            window.add(wallpaper(name));
        }

        window.set_capacity(2);
        assert_eq!(window.capacity(), 2);
        assert_eq!(names(&window), vec!["d", "e"]);

        window.set_capacity(4);
        window.add(wallpaper("f"));
        assert_eq!(names(&window), vec!["d", "e", "f"]);
    }

    #[test]
    fn test_capacity_never_zero() {
        let mut window = LastActiveWindow::new(0);
        assert_eq!(window.capacity(), 1);

        window.set_capacity(0);
        assert_eq!(window.capacity(), 1);

        window.add(wallpaper("a"));
        window.add(wallpaper("b"));
        assert_eq!(names(&window), vec!["b"]);
    }

    #[test]
    fn test_contains_uses_identity() {
        let mut window = LastActiveWindow::new(3);
        let a = wallpaper("a");
        window.add(a.clone());

        assert!(window.contains(&a));
        // Same path, different record
        assert!(!window.contains(&wallpaper("a")));

        window.clear();
        assert!(!window.contains(&a));
    }
}
