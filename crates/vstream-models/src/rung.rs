//! Resolution rungs of the streaming ladder.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of every HLS playlist, per rung and for the master.
pub const PLAYLIST_FILENAME: &str = "index.m3u8";

/// One target encoding tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Rung {
    /// Target width in pixels
    pub width: u32,
    /// Target height in pixels
    pub height: u32,
}

impl Rung {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Tier label and output subdirectory, e.g. `720p`.
    pub fn name(&self) -> String {
        format!("{}p", self.height)
    }

    /// Output subdirectory for this rung under a job's output directory.
    pub fn output_dir(&self, base: impl AsRef<Path>) -> PathBuf {
        base.as_ref().join(self.name())
    }

    /// Sub-manifest path relative to the master playlist.
    pub fn playlist_uri(&self) -> String {
        format!("{}/{}", self.name(), PLAYLIST_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rung_layout() {
        let rung = Rung::new(1280, 720);
        assert_eq!(rung.name(), "720p");
        assert_eq!(rung.playlist_uri(), "720p/index.m3u8");
        assert_eq!(rung.output_dir("/work/out"), PathBuf::from("/work/out/720p"));
    }
}
