//! HLS master playlist generation.

use vstream_models::Rung;

/// Synthetic bandwidth added per rung, in bits per second.
pub const BANDWIDTH_STEP: u64 = 800_000;

/// Generate the master playlist for an ascending rung list.
///
/// Pure and deterministic: the same rungs always give byte-identical output.
/// Rung `i` advertises `(i + 1) * BANDWIDTH_STEP` and points at `<h>p/index.m3u8`.
pub fn master_playlist(rungs: &[Rung]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");

    for (index, rung) in rungs.iter().enumerate() {
        let bandwidth = (index as u64 + 1) * BANDWIDTH_STEP;
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}\n",
            bandwidth,
            rung.width,
            rung.height,
            rung.playlist_uri()
        ));
    }

    out
}
