//! Animation Encoder (C7, spec.md §4.7).
//!
//! Shells out to `ffmpeg` for both GIF and MP4 — covers the "verify an
//! external media-encoder binary is available" contract with a single
//! dependency, consistent with SPEC_FULL.md's C7 note.

use std::path::{Path, PathBuf};

use base64::Engine;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::AnimationArtifact;
use crate::error::{GgbError, GgbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Gif,
    Mp4,
}

impl OutputFormat {
    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Gif => "gif",
            OutputFormat::Mp4 => "mp4",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub format: OutputFormat,
    /// For MP4, interpreted directly as CRF (lower is better). For GIF,
    /// 1..=100 maps to a palette quality hint (spec.md §4.7).
    pub quality: u32,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EncodeResult {
    pub output_path: PathBuf,
    pub byte_size: u64,
}

pub struct AnimationEncoder {
    ffmpeg_path: String,
}

impl AnimationEncoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        AnimationEncoder {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Confirms the configured encoder binary can actually be invoked.
    async fn verify_binary(&self) -> GgbResult<()> {
        Command::new(&self.ffmpeg_path)
            .arg("-version")
            .output()
            .await
            .map(|_| ())
            .map_err(|e| {
                GgbError::DependencyMissing(format!(
                    "encoder binary '{}' unavailable: {e}",
                    self.ffmpeg_path
                ))
            })
    }

    /// Encodes a captured [`AnimationArtifact`] to GIF or MP4 (spec.md §4.7
    /// steps 1-4).
    pub async fn encode(
        &self,
        artifact: &AnimationArtifact,
        request: &EncodeRequest,
    ) -> GgbResult<EncodeResult> {
        self.verify_binary().await?;

        let scratch = tempfile::Builder::new()
            .prefix("ggb-anim-")
            .tempdir()
            .map_err(|e| GgbError::EncodingError(format!("scratch directory: {e}")))?;

        self.write_frames(scratch.path(), artifact).await?;

        let pattern = scratch.path().join("frame_%06d.png");
        let args = self.build_args(&pattern, artifact, request);

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .output()
            .await
            .map_err(|e| GgbError::EncodingError(format!("failed to spawn encoder: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            // `into_path` disarms the `TempDir` guard so the directory
            // survives this function returning (spec.md §5.5: "a failed
            // encoding retains the scratch directory for inspection").
            let kept_at = scratch.into_path();
            tracing::warn!(path = %kept_at.display(), "retaining scratch directory after encode failure");
            return Err(GgbError::EncodingError(format!(
                "{stderr} (frames retained at {})",
                kept_at.display()
            )));
        }

        let byte_size = tokio::fs::metadata(&request.output_path)
            .await
            .map_err(|e| GgbError::EncodingError(format!("reading encoded output: {e}")))?
            .len();

        // Success: `scratch` drops here and its `TempDir` guard removes the
        // directory, since nothing downstream needs the individual frames.
        drop(scratch);

        Ok(EncodeResult {
            output_path: request.output_path.clone(),
            byte_size,
        })
    }

    async fn write_frames(&self, dir: &Path, artifact: &AnimationArtifact) -> GgbResult<()> {
        for (i, frame) in artifact.frames.iter().enumerate() {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&frame.png_base64)
                .map_err(|e| GgbError::EncodingError(format!("decoding frame {i}: {e}")))?;
            let path = dir.join(format!("frame_{:06}.png", i + 1));
            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(|e| GgbError::EncodingError(format!("writing frame {i}: {e}")))?;
            file.write_all(&bytes)
                .await
                .map_err(|e| GgbError::EncodingError(format!("writing frame {i}: {e}")))?;
        }
        Ok(())
    }

    fn build_args(
        &self,
        pattern: &Path,
        artifact: &AnimationArtifact,
        request: &EncodeRequest,
    ) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-framerate".to_string(),
            artifact.frame_rate.to_string(),
            "-i".to_string(),
            pattern.to_string_lossy().to_string(),
        ];
        match request.format {
            OutputFormat::Mp4 => {
                args.extend([
                    "-c:v".to_string(),
                    "libx264".to_string(),
                    "-crf".to_string(),
                    request.quality.to_string(),
                    "-pix_fmt".to_string(),
                    "yuv420p".to_string(),
                ]);
            }
            OutputFormat::Gif => {
                // Palette generation + dithered paletteuse (spec.md §4.7):
                // quality 1..=100 maps onto a bayer dither scale.
                let scale = (request.quality.clamp(1, 100) as f64 / 100.0 * 5.0).round() as u32;
                args.extend([
                    "-vf".to_string(),
                    format!(
                        "split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse=dither=bayer:bayer_scale={scale}"
                    ),
                ]);
            }
        }
        args.push(request.output_path.to_string_lossy().to_string());
        args
    }
}

/// Picks a scratch-relative output path with the right extension.
pub fn default_output_path(dir: &Path, stem: &str, format: OutputFormat) -> PathBuf {
    dir.join(format!("{stem}.{}", format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Frame;

    fn sample_artifact() -> AnimationArtifact {
        AnimationArtifact {
            frames: vec![Frame {
                t_ms: 0,
                png_base64: base64::engine::general_purpose::STANDARD.encode(b"not-a-real-png"),
            }],
            frame_rate: 10,
            width: 320,
            height: 240,
            cancelled: false,
        }
    }

    #[test]
    fn build_args_maps_mp4_quality_to_crf() {
        let encoder = AnimationEncoder::new("ffmpeg");
        let artifact = sample_artifact();
        let request = EncodeRequest {
            format: OutputFormat::Mp4,
            quality: 23,
            output_path: PathBuf::from("/tmp/out.mp4"),
        };
        let args = encoder.build_args(Path::new("/tmp/frame_%06d.png"), &artifact, &request);
        let crf_index = args.iter().position(|a| a == "-crf").unwrap();
        assert_eq!(args[crf_index + 1], "23");
    }

    #[test]
    fn build_args_uses_palette_filter_for_gif() {
        let encoder = AnimationEncoder::new("ffmpeg");
        let artifact = sample_artifact();
        let request = EncodeRequest {
            format: OutputFormat::Gif,
            quality: 80,
            output_path: PathBuf::from("/tmp/out.gif"),
        };
        let args = encoder.build_args(Path::new("/tmp/frame_%06d.png"), &artifact, &request);
        assert!(args.iter().any(|a| a.contains("palettegen")));
    }

    #[tokio::test]
    async fn verify_binary_fails_for_a_nonexistent_path() {
        let encoder = AnimationEncoder::new("/definitely/not/a/real/encoder/binary");
        let err = encoder.verify_binary().await.unwrap_err();
        assert!(matches!(err, GgbError::DependencyMissing(_)));
    }
}
