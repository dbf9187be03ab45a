//! Hand paths and links to the operating system.

use std::io;
use std::path::Path;

/// Something that can show a folder or a web page to the user.
pub trait Opener: Send + Sync {
    fn open_folder(&self, path: &Path) -> io::Result<()>;
    fn open_url(&self, url: &str) -> io::Result<()>;
}

/// Uses the platform launcher (`xdg-open`, `open`, `explorer`).
#[derive(Debug, Default)]
pub struct SystemOpener;

impl Opener for SystemOpener {
    fn open_folder(&self, path: &Path) -> io::Result<()> {
        open::that_detached(path)
    }

    fn open_url(&self, url: &str) -> io::Result<()> {
        open::that_detached(url)
    }
}

/// Only plain web links are handed to the browser.
pub fn is_web_url(url: &str) -> bool {
    url.starts_with("http:") || url.starts_with("https:")
}

/// Create `dir` if needed and reveal it in the file browser.
pub fn reveal_dir(opener: &dyn Opener, dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    opener.open_folder(dir)
}
