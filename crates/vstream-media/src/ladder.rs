//! Resolution ladder selection.
//!
//! Tier widths are canonical 16:9 values; the source aspect ratio never feeds
//! into them, so every rung is normalized to its tier's frame size.

use thiserror::Error;
use vstream_models::Rung;

/// Smallest source dimension the ladder accepts, and the lowest rung height.
pub const MIN_DIMENSION: u32 = 360;

/// Every tier, ascending. A tier is produced when its height fits the source.
pub const LADDER: [Rung; 6] = [
    Rung::new(640, 360),
    Rung::new(854, 480),
    Rung::new(1280, 720),
    Rung::new(1920, 1080),
    Rung::new(2880, 1620),
    Rung::new(4320, 2430),
];

/// Reasons a source cannot be laddered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LadderError {
    #[error("Unsupported aspect ratio: portrait video ({width}x{height}) is not supported")]
    AspectRatio { width: u32, height: u32 },

    #[error("Resolution too low: {width}x{height} is below the {min}p minimum")]
    ResolutionTooLow { width: u32, height: u32, min: u32 },
}

/// Build the ordered rung list for a source of `width` x `height`.
pub fn build_ladder(width: u32, height: u32) -> Result<Vec<Rung>, LadderError> {
    if height > width {
        return Err(LadderError::AspectRatio { width, height });
    }

    if width.min(height) < MIN_DIMENSION {
        return Err(LadderError::ResolutionTooLow {
            width,
            height,
            min: MIN_DIMENSION,
        });
    }

    Ok(LADDER
        .iter()
        .copied()
        .filter(|rung| rung.height == MIN_DIMENSION || rung.height <= height)
        .collect())
}
