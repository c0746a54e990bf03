//! ffmpeg-backed launcher producing multi-variant HLS.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use castforge_common::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{ExitOutcome, ProcessLauncher, TranscodeInput, TranscodeJob, TranscodeProcess};
use crate::config::TranscoderConfig;

/// Name of each variant's media playlist inside its directory.
pub const VARIANT_PLAYLIST: &str = "stream.m3u8";

/// Launches ffmpeg with one HLS rendition per configured variant.
///
/// Output goes to `<output_dir>/<variant index>/`, segments named
/// `<identifier>-<job>-NNNNN.ts`.
pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
    config: TranscoderConfig,
}

impl FfmpegLauncher {
    /// Resolve the ffmpeg binary from config or `PATH`.
    pub fn new(config: &TranscoderConfig) -> anyhow::Result<Self> {
        let ffmpeg = match &config.ffmpeg_path {
            Some(path) => path.clone(),
            None => which::which("ffmpeg")
                .map_err(|e| anyhow::anyhow!("ffmpeg not found in PATH: {}", e))?,
        };
        Ok(Self::with_binary(ffmpeg, config))
    }

    pub fn with_binary(ffmpeg: PathBuf, config: &TranscoderConfig) -> Self {
        Self {
            ffmpeg,
            config: config.clone(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.ffmpeg
    }

    /// Full ffmpeg argument list for `job`.
    pub fn build_args(&self, job: &TranscodeJob) -> Vec<String> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "warning".into()];

        let (video_map, audio_map) = match &job.input {
            TranscodeInput::Stream(_) => {
                args.extend(["-fflags", "+genpts", "-i", "pipe:0"].map(String::from));
                ("0:v:0", "0:a:0")
            }
            TranscodeInput::File(path) => {
                args.extend(["-re", "-stream_loop", "-1", "-i"].map(String::from));
                args.push(path.to_string_lossy().into_owned());
                ("0:v:0", "0:a:0")
            }
            TranscodeInput::Generated => {
                let fps = self.config.variants.first().map(|v| v.framerate).unwrap_or(30);
                args.extend(["-re", "-f", "lavfi", "-i"].map(String::from));
                args.push(format!("color=c=black:s=1280x720:r={}", fps));
                args.extend(["-f", "lavfi", "-i"].map(String::from));
                args.push("anullsrc=channel_layout=stereo:sample_rate=44100".into());
                ("0:v:0", "1:a:0")
            }
        };

        let mut stream_map = Vec::new();
        for (i, variant) in self.config.variants.iter().enumerate() {
            args.extend(["-map".to_string(), video_map.to_string()]);
            args.extend(["-map".to_string(), audio_map.to_string()]);

            args.push(format!("-c:v:{}", i));
            args.push("libx264".into());
            args.push(format!("-b:v:{}", i));
            args.push(format!("{}k", variant.video_bitrate_kbps));
            args.push(format!("-maxrate:v:{}", i));
            args.push(format!("{}k", variant.video_bitrate_kbps * 108 / 100));
            args.push(format!("-bufsize:v:{}", i));
            args.push(format!("{}k", variant.video_bitrate_kbps * 3 / 2));
            args.push(format!("-preset:v:{}", i));
            args.push(variant.encoder_preset.clone());
            args.push(format!("-r:v:{}", i));
            args.push(variant.framerate.to_string());
            args.push(format!("-g:v:{}", i));
            args.push((variant.framerate * self.config.segment_length_secs).to_string());

            if let (Some(w), Some(h)) = (variant.scaled_width, variant.scaled_height) {
                args.push(format!("-filter:v:{}", i));
                args.push(format!("scale={}:{}", w, h));
            }

            args.push(format!("-c:a:{}", i));
            args.push("aac".into());
            args.push(format!("-b:a:{}", i));
            args.push(format!("{}k", variant.audio_bitrate_kbps));

            stream_map.push(format!("v:{},a:{}", i, i));
        }

        args.extend(["-pix_fmt", "yuv420p", "-sc_threshold", "0"].map(String::from));

        let output_dir = job.output_dir.to_string_lossy();
        args.extend(["-f", "hls"].map(String::from));
        args.push("-hls_time".into());
        args.push(self.config.segment_length_secs.to_string());
        args.push("-hls_list_size".into());
        args.push(self.config.playlist_size.to_string());
        args.push("-hls_flags".into());
        args.push("delete_segments+temp_file+independent_segments".into());
        args.push("-hls_segment_filename".into());
        args.push(format!("{}/%v/{}-%05d.ts", output_dir, job.segment_prefix()));
        args.push("-var_stream_map".into());
        args.push(stream_map.join(" "));
        args.push(format!("{}/%v/{}", output_dir, VARIANT_PLAYLIST));

        args
    }
}

#[async_trait]
impl ProcessLauncher for FfmpegLauncher {
    async fn launch(&self, job: TranscodeJob) -> Result<Box<dyn TranscodeProcess>> {
        let args = self.build_args(&job);

        for i in 0..self.config.variants.len() {
            tokio::fs::create_dir_all(job.output_dir.join(i.to_string())).await?;
        }

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let is_stream = matches!(job.input, TranscodeInput::Stream(_));
        cmd.stdin(if is_stream { Stdio::piped() } else { Stdio::null() });

        tracing::debug!(job_id = %job.id, "Spawning {:?} {}", self.ffmpeg, args.join(" "));

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::internal(format!("failed to spawn ffmpeg: {}", e)))?;

        let pump = match (job.input, child.stdin.take()) {
            (TranscodeInput::Stream(mut source), Some(mut stdin)) => {
                let job_id = job.id;
                Some(tokio::spawn(async move {
                    while let Some(chunk) = source.recv().await {
                        if let Err(e) = stdin.write_all(&chunk).await {
                            tracing::debug!(job_id = %job_id, "ffmpeg stdin closed: {}", e);
                            break;
                        }
                    }
                }))
            }
            _ => None,
        };

        if let Some(stderr) = child.stderr.take() {
            let job_id = job.id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "castforge::ffmpeg", job_id = %job_id, "{}", line);
                }
            });
        }

        Ok(Box::new(FfmpegProcess { child, pump }))
    }
}

/// A running ffmpeg child.
pub struct FfmpegProcess {
    child: Child,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl TranscodeProcess for FfmpegProcess {
    async fn wait(&mut self) -> Result<ExitOutcome> {
        let status = self.child.wait().await?;
        if status.success() {
            Ok(ExitOutcome::success())
        } else {
            Ok(ExitOutcome::failure(status.to_string()))
        }
    }

    async fn terminate(&mut self) -> Result<()> {
        // Closing stdin ends a live input on its own.
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.child.id() {
                kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
                    .map_err(|e| Error::internal(format!("SIGTERM failed: {}", e)))?;
            }
        }

        #[cfg(not(unix))]
        self.child.start_kill()?;

        Ok(())
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariantConfig;
    use crate::transcoder::MediaSource;
    use castforge_common::StreamIdentifier;

    fn launcher(variants: Vec<VariantConfig>) -> FfmpegLauncher {
        let config = TranscoderConfig {
            variants,
            ..TranscoderConfig::default()
        };
        FfmpegLauncher::with_binary(PathBuf::from("ffmpeg"), &config)
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn live_input_reads_stdin() {
        let (_tx, source) = MediaSource::channel(1, None);
        let job = TranscodeJob::new(
            StreamIdentifier::Live,
            TranscodeInput::Stream(source),
            PathBuf::from("/data/transcode/live"),
        );
        let args = launcher(vec![VariantConfig::default()]).build_args(&job);

        assert_eq!(value_after(&args, "-i"), Some("pipe:0"));
        assert!(!args.contains(&"-stream_loop".to_string()));
        assert_eq!(value_after(&args, "-var_stream_map"), Some("v:0,a:0"));
        let pattern = value_after(&args, "-hls_segment_filename").unwrap();
        assert!(pattern.starts_with("/data/transcode/live/%v/live-"));
        assert!(pattern.ends_with("-%05d.ts"));
        assert_eq!(args.last().unwrap(), "/data/transcode/live/%v/stream.m3u8");
    }

    #[test]
    fn offline_file_loops() {
        let job = TranscodeJob::new(
            StreamIdentifier::Offline,
            TranscodeInput::File(PathBuf::from("/srv/offline.ts")),
            PathBuf::from("/out"),
        );
        let args = launcher(vec![VariantConfig::default()]).build_args(&job);

        assert_eq!(value_after(&args, "-stream_loop"), Some("-1"));
        assert_eq!(value_after(&args, "-i"), Some("/srv/offline.ts"));
    }

    #[test]
    fn generated_filler_uses_lavfi_sources() {
        let job = TranscodeJob::new(StreamIdentifier::Offline, TranscodeInput::Generated, PathBuf::from("/out"));
        let args = launcher(vec![VariantConfig::default()]).build_args(&job);

        assert!(args.iter().any(|a| a.starts_with("color=c=black")));
        assert!(args.iter().any(|a| a.starts_with("anullsrc")));
        assert!(args.contains(&"1:a:0".to_string()));
    }

    #[test]
    fn one_rendition_per_variant() {
        let variants = vec![
            VariantConfig {
                video_bitrate_kbps: 3000,
                scaled_width: Some(1280),
                scaled_height: Some(720),
                ..VariantConfig::default()
            },
            VariantConfig {
                video_bitrate_kbps: 800,
                ..VariantConfig::default()
            },
        ];
        let job = TranscodeJob::new(StreamIdentifier::Offline, TranscodeInput::Generated, PathBuf::from("/out"));
        let args = launcher(variants).build_args(&job);

        assert_eq!(value_after(&args, "-b:v:0"), Some("3000k"));
        assert_eq!(value_after(&args, "-b:v:1"), Some("800k"));
        assert_eq!(value_after(&args, "-filter:v:0"), Some("scale=1280:720"));
        assert!(value_after(&args, "-filter:v:1").is_none());
        assert_eq!(value_after(&args, "-var_stream_map"), Some("v:0,a:0 v:1,a:1"));
        assert_eq!(value_after(&args, "-g:v:0"), Some("120"));
    }
}
