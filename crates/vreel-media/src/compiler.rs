//! FFmpeg-backed media compiler.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use vreel_models::encoding::{
    EncodingProfile, THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP, TRANSITION_SECONDS,
};

use crate::error::{MediaError, MediaResult};

/// Compilation input: ordered clips, one audio track, encoding
/// parameters, and where to place outputs.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Local clip files, already ordered by scene index
    pub clip_paths: Vec<PathBuf>,
    /// Per-clip durations in seconds, parallel to `clip_paths`
    pub clip_durations: Vec<f64>,
    /// Local audio track
    pub audio_path: PathBuf,
    /// Encoding parameters
    pub profile: EncodingProfile,
    /// Directory for the output video and thumbnail
    pub output_dir: PathBuf,
}

/// Compilation output.
#[derive(Debug, Clone)]
pub struct CompiledVideo {
    pub video_path: PathBuf,
    pub thumbnail_path: PathBuf,
}

/// Black-box media compilation boundary.
#[async_trait]
pub trait MediaCompiler: Send + Sync {
    async fn compile(&self, request: &CompileRequest) -> MediaResult<CompiledVideo>;
}

/// FFmpeg implementation: crossfade-concatenates the clips, muxes the
/// audio track, scales to the platform dimensions, then extracts a
/// thumbnail frame.
pub struct FfmpegCompiler {
    ffmpeg: PathBuf,
}

impl FfmpegCompiler {
    pub fn new() -> MediaResult<Self> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        Ok(Self { ffmpeg })
    }

    async fn run(&self, args: &[String]) -> MediaResult<()> {
        debug!("ffmpeg {}", args.join(" "));
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(MediaError::compile_failed(tail));
        }
        Ok(())
    }
}

/// Build the xfade/scale filter graph for `n` clips.
///
/// Each clip is scaled and padded to the target dimensions, then
/// chained with crossfades. Offsets accumulate from the per-clip
/// durations minus the overlap spent in each transition.
pub fn build_filter_graph(
    durations: &[f64],
    width: u32,
    height: u32,
    fps: u32,
    transition: f64,
) -> String {
    let n = durations.len();
    let mut parts = Vec::new();

    for i in 0..n {
        parts.push(format!(
            "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,fps={fps},setsar=1[v{i}]"
        ));
    }

    if n == 1 {
        parts.push("[v0]copy[vout]".to_string());
        return parts.join(";");
    }

    let mut offset = 0.0;
    let mut prev = "v0".to_string();
    for i in 1..n {
        offset += durations[i - 1] - transition;
        let label = if i == n - 1 {
            "vout".to_string()
        } else {
            format!("x{i}")
        };
        parts.push(format!(
            "[{prev}][v{i}]xfade=transition=fade:duration={transition}:offset={offset:.3}[{label}]"
        ));
        prev = label;
    }

    parts.join(";")
}

#[async_trait]
impl MediaCompiler for FfmpegCompiler {
    async fn compile(&self, request: &CompileRequest) -> MediaResult<CompiledVideo> {
        if request.clip_paths.is_empty() {
            return Err(MediaError::compile_failed("no clips to compile"));
        }
        if request.clip_paths.len() != request.clip_durations.len() {
            return Err(MediaError::compile_failed(
                "clip paths and durations must be parallel",
            ));
        }

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let video_path = request.output_dir.join("final.mp4");
        let thumbnail_path = request.output_dir.join("thumbnail.jpg");

        let profile = &request.profile;
        let filter = build_filter_graph(
            &request.clip_durations,
            profile.width,
            profile.height,
            profile.fps,
            TRANSITION_SECONDS,
        );

        let mut args: Vec<String> = vec!["-y".to_string()];
        for clip in &request.clip_paths {
            args.push("-i".to_string());
            args.push(clip.to_string_lossy().into_owned());
        }
        args.push("-i".to_string());
        args.push(request.audio_path.to_string_lossy().into_owned());

        let audio_index = request.clip_paths.len();
        args.extend([
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "[vout]".to_string(),
            "-map".to_string(),
            format!("{audio_index}:a"),
            "-c:v".to_string(),
            profile.codec.clone(),
            "-preset".to_string(),
            profile.preset.clone(),
            "-crf".to_string(),
            profile.crf.to_string(),
            "-c:a".to_string(),
            profile.audio_codec.clone(),
            "-b:a".to_string(),
            profile.audio_bitrate.clone(),
            "-shortest".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            video_path.to_string_lossy().into_owned(),
        ]);

        info!(
            clips = request.clip_paths.len(),
            "compiling final video to {}",
            video_path.display()
        );
        self.run(&args).await?;

        // Thumbnail from the compiled video
        let thumb_args: Vec<String> = vec![
            "-y".to_string(),
            "-ss".to_string(),
            THUMBNAIL_TIMESTAMP.to_string(),
            "-i".to_string(),
            video_path.to_string_lossy().into_owned(),
            "-vframes".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!("scale={THUMBNAIL_SCALE_WIDTH}:-1"),
            thumbnail_path.to_string_lossy().into_owned(),
        ];
        self.run(&thumb_args).await?;

        Ok(CompiledVideo {
            video_path,
            thumbnail_path,
        })
    }
}
