//! Media metadata as reported by `ffprobe -print_format json`.

use serde::{Deserialize, Serialize};

/// Snapshot of a probe result: container format plus every stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub streams: Vec<Stream>,
}

/// Container-level information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Format {
    pub filename: String,
    pub nb_streams: u32,
    pub nb_programs: u32,
    pub format_name: String,
    pub format_long_name: String,
    /// Duration in seconds, formatted as a decimal string (e.g. `"180.500000"`).
    pub duration: String,
    /// Total size in bytes, as a string.
    pub size: String,
    pub bit_rate: String,
    pub probe_score: i32,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tags {
    #[serde(rename = "ENCODER", alias = "encoder")]
    pub encoder: String,
}

/// A single audio, video, subtitle or data stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stream {
    pub index: u32,
    pub id: String,
    pub codec_name: String,
    pub codec_long_name: String,
    pub profile: String,
    pub codec_type: String,
    pub codec_time_base: String,
    pub codec_tag_string: String,
    pub codec_tag: String,
    pub width: u32,
    pub height: u32,
    pub coded_width: u32,
    pub coded_height: u32,
    pub has_b_frames: u32,
    pub sample_aspect_ratio: String,
    pub display_aspect_ratio: String,
    pub pix_fmt: String,
    pub level: i32,
    pub chroma_location: String,
    pub refs: u32,
    pub quarter_sample: String,
    pub divx_packed: String,
    pub r_frame_rate: String,
    pub avg_frame_rate: String,
    pub time_base: String,
    pub duration_ts: u64,
    pub duration: String,
    pub disposition: Disposition,
    pub bit_rate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disposition {
    pub default: u8,
    pub dub: u8,
    pub original: u8,
    pub comment: u8,
    pub lyrics: u8,
    pub karaoke: u8,
    pub forced: u8,
    pub hearing_impaired: u8,
    pub visual_impaired: u8,
    pub clean_effects: u8,
}

impl Metadata {
    /// Parses ffprobe's JSON output.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(json)
    }

    /// Duration as reported by ffprobe.
    pub fn duration(&self) -> &str {
        &self.format.duration
    }

    /// Size in bytes as reported by ffprobe.
    pub fn size(&self) -> &str {
        &self.format.size
    }

    /// Duration in seconds, if present and numeric.
    pub fn duration_secs(&self) -> Option<f64> {
        self.format.duration.trim().parse::<f64>().ok()
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.format.size.trim().parse::<u64>().ok()
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(|s| s.codec_type == "video")
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &Stream> {
        self.streams.iter().filter(|s| s.codec_type == "audio")
    }
}

impl Stream {
    /// Frame rate from `r_frame_rate`, e.g. `"24000/1001"` or `"30"`.
    pub fn frame_rate(&self) -> Option<f64> {
        let rate = self.r_frame_rate.as_str();
        match rate.split_once('/') {
            Some((num, den)) => {
                let num = num.parse::<f64>().ok()?;
                let den = den.parse::<f64>().ok()?;
                if den > 0.0 {
                    Some(num / den)
                } else {
                    None
                }
            }
            None => rate.parse::<f64>().ok(),
        }
    }
}
