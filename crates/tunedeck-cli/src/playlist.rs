use std::path::{Path, PathBuf};

/// Ordered list of files with a cursor.
#[derive(Debug, Default)]
pub struct Playlist {
    items: Vec<PathBuf>,
    index: usize,
}

impl Playlist {
    pub fn new(items: Vec<PathBuf>) -> Self {
        Self { items, index: 0 }
    }

    pub fn current(&self) -> Option<&Path> {
        self.items.get(self.index).map(PathBuf::as_path)
    }

    /// Move to the next entry. Returns `None` (cursor unchanged) at the end.
    pub fn advance(&mut self) -> Option<PathBuf> {
        if self.index + 1 >= self.items.len() {
            return None;
        }
        self.index += 1;
        self.current().map(Path::to_path_buf)
    }

    /// Move to the previous entry, staying on the first one.
    pub fn back(&mut self) -> Option<PathBuf> {
        self.index = self.index.saturating_sub(1);
        self.current().map(Path::to_path_buf)
    }

    pub fn position(&self) -> (usize, usize) {
        (self.index + 1, self.items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> Playlist {
        Playlist::new(vec!["a.flac".into(), "b.mp3".into(), "c.opus".into()])
    }

    #[test]
    fn advance_stops_at_end() {
        let mut pl = list();
        assert_eq!(pl.current(), Some(Path::new("a.flac")));
        assert_eq!(pl.advance(), Some(PathBuf::from("b.mp3")));
        assert_eq!(pl.advance(), Some(PathBuf::from("c.opus")));
        assert_eq!(pl.advance(), None);
        assert_eq!(pl.position(), (3, 3));
    }

    #[test]
    fn back_stays_on_first() {
        let mut pl = list();
        assert_eq!(pl.back(), Some(PathBuf::from("a.flac")));
        pl.advance();
        assert_eq!(pl.back(), Some(PathBuf::from("a.flac")));
    }

    #[test]
    fn empty_playlist_has_no_current() {
        let mut pl = Playlist::default();
        assert!(pl.current().is_none());
        assert!(pl.advance().is_none());
        assert!(pl.back().is_none());
    }
}
