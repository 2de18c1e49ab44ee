//! Deterministic ffmpeg argument construction.
//!
//! Every operation assembles its vector in one fixed order: transport and
//! input first, encoding parameters next (optional resolution / bitrate /
//! framerate at fixed positions), output-format flags, destination last.

use crate::domain::session::StreamOptions;
use crate::ports::process::CommandPlan;
use std::path::Path;
use std::time::Duration;

/// Playlist file name inside a stream's artifact directory. The full path
/// is the locator handed back to callers.
pub const PLAYLIST_FILE: &str = "index.m3u8";

/// Builds invocation plans for one configured ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegPlanner {
    program: String,
}

impl FfmpegPlanner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Continuous HLS transcode of a live source into `out_dir`.
    pub fn live_stream(
        &self,
        source_uri: &str,
        out_dir: &Path,
        options: &StreamOptions,
    ) -> CommandPlan {
        let mut args = input_args(source_uri, true);
        args.push(String::from("-c:v"));
        args.push(options.video_codec.clone());
        args.push(String::from("-preset"));
        args.push(options.preset.clone());
        if let Some(resolution) = &options.resolution {
            args.push(String::from("-s"));
            args.push(resolution.clone());
        }
        if let Some(bitrate) = &options.video_bitrate {
            args.push(String::from("-b:v"));
            args.push(bitrate.clone());
        }
        if let Some(framerate) = options.framerate {
            args.push(String::from("-r"));
            args.push(framerate.to_string());
        }
        args.push(String::from("-c:a"));
        args.push(String::from("aac"));
        args.push(String::from("-f"));
        args.push(String::from("hls"));
        args.push(String::from("-hls_time"));
        args.push(options.segment_seconds.to_string());
        args.push(String::from("-hls_list_size"));
        args.push(options.playlist_size.to_string());
        args.push(String::from("-hls_flags"));
        args.push(String::from("delete_segments"));
        args.push(String::from("-hls_segment_filename"));
        args.push(path_arg(&out_dir.join("segment_%05d.ts")));
        args.push(path_arg(&out_dir.join(PLAYLIST_FILE)));

        CommandPlan {
            program: self.program.clone(),
            args,
            output_dir: Some(out_dir.to_path_buf()),
        }
    }

    /// Bounded or open-ended capture into a single output file. Video is
    /// copied, audio transcoded so arbitrary camera codecs end up playable.
    pub fn record(&self, source_uri: &str, output: &Path, duration: Option<Duration>) -> CommandPlan {
        let mut args = input_args(source_uri, true);
        if let Some(duration) = duration {
            args.push(String::from("-t"));
            args.push(duration.as_secs().to_string());
        }
        args.push(String::from("-c:v"));
        args.push(String::from("copy"));
        args.push(String::from("-c:a"));
        args.push(String::from("aac"));
        args.push(String::from("-movflags"));
        args.push(String::from("+faststart"));
        args.push(path_arg(output));

        CommandPlan {
            program: self.program.clone(),
            args,
            output_dir: output.parent().map(Path::to_path_buf),
        }
    }

    /// Single-frame extraction.
    pub fn snapshot(&self, source_uri: &str, output: &Path) -> CommandPlan {
        let mut args = input_args(source_uri, true);
        args.push(String::from("-frames:v"));
        args.push(String::from("1"));
        args.push(String::from("-q:v"));
        args.push(String::from("2"));
        args.push(path_arg(output));

        CommandPlan {
            program: self.program.clone(),
            args,
            output_dir: output.parent().map(Path::to_path_buf),
        }
    }

    /// Decode-only connectivity check with no persistent output.
    pub fn probe(&self, source_uri: &str) -> CommandPlan {
        let mut args = input_args(source_uri, false);
        args.push(String::from("-t"));
        args.push(String::from("1"));
        args.push(String::from("-f"));
        args.push(String::from("null"));
        args.push(String::from("-"));

        CommandPlan {
            program: self.program.clone(),
            args,
            output_dir: None,
        }
    }
}

fn input_args(source_uri: &str, overwrite: bool) -> Vec<String> {
    let mut args = vec![String::from("-hide_banner")];
    if overwrite {
        args.push(String::from("-y"));
    }
    // RTSP over TCP: cameras on lossy networks drop too many UDP packets
    // for a stable transcode.
    if source_uri.starts_with("rtsp://") {
        args.push(String::from("-rtsp_transport"));
        args.push(String::from("tcp"));
    }
    args.push(String::from("-i"));
    args.push(source_uri.to_string());
    args
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
