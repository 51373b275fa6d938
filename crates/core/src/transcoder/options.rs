//! Structured ffmpeg options and their rendering into argument tokens.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Anything that can be rendered into an ordered list of command-line tokens.
///
/// The session treats providers as opaque: it only concatenates the tokens
/// they produce.
pub trait ArgumentProvider {
    /// Renders the provider into command-line tokens.
    fn arguments(&self) -> Vec<String>;
}

impl ArgumentProvider for str {
    fn arguments(&self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl ArgumentProvider for String {
    fn arguments(&self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl<T: AsRef<str>> ArgumentProvider for [T] {
    fn arguments(&self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_string()).collect()
    }
}

impl<T: AsRef<str>, const N: usize> ArgumentProvider for [T; N] {
    fn arguments(&self) -> Vec<String> {
        self.as_slice().arguments()
    }
}

impl<T: AsRef<str>> ArgumentProvider for Vec<T> {
    fn arguments(&self) -> Vec<String> {
        self.as_slice().arguments()
    }
}

/// A value that knows how to render itself behind a flag.
trait FlagValue {
    fn push_flag(&self, flag: &str, out: &mut Vec<String>);
}

/// A present switch is a bare flag; its value is not inspected.
impl FlagValue for bool {
    fn push_flag(&self, flag: &str, out: &mut Vec<String>) {
        out.push(flag.to_string());
    }
}

impl FlagValue for String {
    fn push_flag(&self, flag: &str, out: &mut Vec<String>) {
        out.push(flag.to_string());
        out.push(self.clone());
    }
}

macro_rules! numeric_flag_value {
    ($($ty:ty),*) => {
        $(
            impl FlagValue for $ty {
                fn push_flag(&self, flag: &str, out: &mut Vec<String>) {
                    out.push(flag.to_string());
                    out.push(self.to_string());
                }
            }
        )*
    };
}

numeric_flag_value!(i64, u32);

impl FlagValue for Vec<String> {
    fn push_flag(&self, flag: &str, out: &mut Vec<String>) {
        for item in self {
            out.push(flag.to_string());
            out.push(item.clone());
        }
    }
}

impl FlagValue for BTreeMap<String, String> {
    fn push_flag(&self, flag: &str, out: &mut Vec<String>) {
        for (key, value) in self {
            out.push(flag.to_string());
            out.push(format!("{}:{}", key, value));
        }
    }
}

/// Declares the options struct together with its flag table so that the
/// rendering order always matches the field declaration order.
macro_rules! declare_options {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field:ident: $ty:ty => $flag:literal,
            )*
        }
    ) => {
        $(#[$meta])*
        pub struct $name {
            $(
                $(#[$field_meta])*
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
            /// Raw tokens appended after every declared flag.
            #[serde(default, skip_serializing_if = "Vec::is_empty")]
            pub extra_args: Vec<String>,
        }

        impl $name {
            /// Flags in declaration order.
            pub const FLAGS: &'static [&'static str] = &[$($flag),*];

            fn push_declared(&self, out: &mut Vec<String>) {
                $(
                    if let Some(value) = &self.$field {
                        value.push_flag($flag, out);
                    }
                )*
            }
        }
    };
}

declare_options! {
    /// Common ffmpeg flags, each optional.
    ///
    /// Absent fields render nothing. A present switch renders its bare flag,
    /// so leave it `None` to turn it off.
    /// Lists and maps repeat their flag once per entry; map entries render as
    /// `key:value` in key order.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Options {
        aspect: String => "-aspect",
        resolution: String => "-s",
        video_bit_rate: String => "-b:v",
        video_bit_rate_tolerance: i64 => "-bt",
        video_max_bit_rate: i64 => "-maxrate",
        video_min_bitrate: i64 => "-minrate",
        video_codec: String => "-c:v",
        vframes: i64 => "-vframes",
        frame_rate: i64 => "-r",
        audio_rate: i64 => "-ar",
        keyframe_interval: i64 => "-g",
        audio_codec: String => "-c:a",
        audio_bitrate: String => "-ab",
        audio_channels: i64 => "-ac",
        audio_quality: i64 => "-q:a",
        buffer_size: i64 => "-bufsize",
        threads: i64 => "-threads",
        preset: String => "-preset",
        tune: String => "-tune",
        audio_profile: String => "-profile:a",
        video_profile: String => "-profile:v",
        target: String => "-target",
        duration: String => "-t",
        qscale: u32 => "-qscale",
        crf: u32 => "-crf",
        strict: i64 => "-strict",
        mux_delay: String => "-muxdelay",
        seek_time: String => "-ss",
        seek_using_timestamp: bool => "-seek_timestamp",
        mov_flags: String => "-movflags",
        hide_banner: bool => "-hide_banner",
        output_format: String => "-f",
        copy_ts: bool => "-copyts",
        native_framerate_input: bool => "-re",
        input_initial_offset: String => "-itsoffset",
        rtmp_live: String => "-rtmp_live",
        hls_playlist_type: String => "-hls_playlist_type",
        hls_list_size: i64 => "-hls_list_size",
        hls_segment_duration: i64 => "-hls_time",
        hls_master_playlist_name: String => "-master_pl_name",
        hls_segment_filename: String => "-hls_segment_filename",
        http_method: String => "-method",
        http_keep_alive: bool => "-multiple_requests",
        hwaccel: String => "-hwaccel",
        stream_ids: BTreeMap<String, String> => "-streamid",
        video_filter: String => "-vf",
        audio_filter: String => "-af",
        skip_video: bool => "-vn",
        skip_audio: bool => "-an",
        compression_level: i64 => "-compression_level",
        map_metadata: String => "-map_metadata",
        metadata: BTreeMap<String, String> => "-metadata",
        encryption_key: String => "-hls_key_info_file",
        bframe: i64 => "-bf",
        pix_fmt: String => "-pix_fmt",
        white_list_protocols: Vec<String> => "-protocol_whitelist",
        overwrite: bool => "-y",
    }
}

impl ArgumentProvider for Options {
    fn arguments(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.push_declared(&mut out);
        out.extend(self.extra_args.iter().cloned());
        out
    }
}
