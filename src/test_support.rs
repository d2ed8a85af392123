//! Fixtures and mocks shared by the unit tests.

use crate::args;
use crate::platform::{self, PlatformCommands};
use crate::postprocess::{BatchStage, StageParams};
use crate::transform::FrameTransform;
use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// True when both ffmpeg and ffprobe can be run.
///
/// Prints a skip line otherwise, so a passing test without ffmpeg is not
/// mistaken for coverage (`cargo test -- --nocapture` shows it).
pub async fn ffmpeg_available() -> bool {
    let commands = PlatformCommands::instance();
    let available =
        commands.is_command_available("ffmpeg").await && commands.is_command_available("ffprobe").await;
    if !available {
        let test = std::thread::current().name().unwrap_or("unknown test").to_string();
        eprintln!("skipping {}: ffmpeg/ffprobe not installed", test);
    }
    available
}

/// Encode a synthetic test pattern video, optionally with a sine audio track
pub async fn make_video(path: &Path, fps: u32, seconds: f64, audio: bool) -> Result<()> {
    let mut cmd = args![
        "-f", "lavfi",
        "-i", format!("testsrc=size=160x120:rate={}:duration={}", fps, seconds),
    ];
    if audio {
        cmd.extend(args!["-f", "lavfi", "-i", format!("sine=frequency=440:duration={}", seconds)]);
    }
    cmd.extend(args!["-c:v", "libx264", "-pix_fmt", "yuv420p"]);
    if audio {
        cmd.extend(args!["-c:a", "aac", "-shortest"]);
    }
    cmd.push(path.display().to_string());

    platform::ffmpeg().args(cmd).output().await?;
    Ok(())
}

/// Write `count` small solid PNG frames named by index into `dir`
pub fn write_frames(dir: &Path, indices: impl IntoIterator<Item = u64>) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    indices
        .into_iter()
        .map(|index| {
            let path = dir.join(crate::frames::Frame::file_name(index));
            let shade = (index % 255) as u8;
            image::RgbImage::from_pixel(64, 48, image::Rgb([shade, 128, 255 - shade]))
                .save(&path)
                .unwrap();
            path
        })
        .collect()
}

/// A face image for precondition checks
pub fn write_face(path: &Path) {
    image::RgbImage::from_pixel(32, 32, image::Rgb([200, 160, 140]))
        .save(path)
        .unwrap();
}

/// Records every call; optionally fails on a frame or sleeps per call
#[derive(Default)]
pub struct RecordingTransform {
    calls: Mutex<Vec<Vec<PathBuf>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay_ms: u64,
    fail_on: Option<PathBuf>,
    no_face: bool,
}

impl RecordingTransform {
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn failing_on(mut self, frame: PathBuf) -> Self {
        self.fail_on = Some(frame);
        self
    }

    pub fn without_face(mut self) -> Self {
        self.no_face = true;
        self
    }

    pub fn calls(&self) -> Vec<Vec<PathBuf>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameTransform for RecordingTransform {
    async fn source_has_face(&self, _source_face: &Path) -> Result<bool> {
        Ok(!self.no_face)
    }

    async fn transform_frames(&self, _source_face: &Path, frames: &[PathBuf]) -> Result<()> {
        self.calls.lock().unwrap().push(frames.to_vec());

        if let Some(ref bad) = self.fail_on {
            if frames.contains(bad) {
                return Err(anyhow::anyhow!("transform failed on {}", bad.display()));
            }
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Batch stage that copies its input frames to the output, or fails
pub struct CopyStage {
    name: &'static str,
    fail: bool,
    runs: Mutex<Vec<(PathBuf, PathBuf, StageParams)>>,
}

impl CopyStage {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fail: false,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn runs(&self) -> Vec<(PathBuf, PathBuf, StageParams)> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchStage for CopyStage {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, input: &Path, output: &Path, params: &StageParams) -> Result<()> {
        self.runs
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf(), params.clone()));
        if self.fail {
            return Err(anyhow::anyhow!("{} exited with status 1", self.name));
        }
        crate::file_manager::FileManager::copy_frames(input, output).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ffmpeg_guard_matches_tool_lookup() {
        let commands = PlatformCommands::instance();
        let expected =
            commands.is_command_available("ffmpeg").await && commands.is_command_available("ffprobe").await;
        assert_eq!(ffmpeg_available().await, expected);
    }
}
