//! # Media Prober Module
//!
//! Legge frame rate e numero di frame di un video tramite `ffprobe`, senza
//! decodificare il file (solo header di container e stream).
//!
//! ## Contratto:
//! - `probe()`: errore se il file non è leggibile o non ha uno stream video
//! - `probe_or_unknown()`: ritorna un `MediaInfo` azzerato (sentinel)
//! - `frame_count == 0` significa "sconosciuto", MAI "video vuoto"
//!
//! ## Frame count:
//! 1. `nb_frames` dello stream video, se presente
//! 2. altrimenti `round(duration × fps)`
//! 3. altrimenti 0

use crate::error::PipelineError;
use crate::platform;
use anyhow::Result;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Exact rational frame rate (e.g. 30000/1001)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRate {
    num: u32,
    den: u32,
}

/// Denominator bound, as a multiple of the source denominator, for rates
/// whose exact fraction does not fit in `u32`
const APPROX_DEN_FACTOR: u128 = 1000;

fn gcd(a: u128, b: u128) -> u128 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl FrameRate {
    /// Reduced rate; None for zero numerator or denominator
    pub fn new(num: u64, den: u64) -> Option<Self> {
        if num == 0 || den == 0 {
            return None;
        }
        Self::reduced(num as u128, den as u128)
    }

    fn reduced(num: u128, den: u128) -> Option<Self> {
        let g = gcd(num, den);
        Some(Self {
            num: u32::try_from(num / g).ok()?,
            den: u32::try_from(den / g).ok()?,
        })
    }

    pub fn whole(fps: u32) -> Self {
        Self { num: fps.max(1), den: 1 }
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn den(&self) -> u32 {
        self.den
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// `self × mul / div`, reduced.
    ///
    /// When the exact fraction does not fit in `u32` the closest fraction
    /// with a denominator of at most `den × 1000` is used instead.
    pub fn scaled(&self, mul: u64, div: u64) -> Option<Self> {
        let num = self.num as u128 * mul as u128;
        let den = self.den as u128 * div as u128;
        if num == 0 || den == 0 {
            return None;
        }
        Self::reduced(num, den).or_else(|| {
            let max_den = (self.den as u128 * APPROX_DEN_FACTOR).min(u32::MAX as u128);
            Self::approximate(num, den, max_den)
        })
    }

    /// Best rational approximation of `num/den` with denominator `≤ max_den`
    /// (continued fraction convergents and the last semiconvergent)
    fn approximate(num: u128, den: u128, max_den: u128) -> Option<Self> {
        let (mut p0, mut q0, mut p1, mut q1) = (0u128, 1u128, 1u128, 0u128);
        let (mut n, mut d) = (num, den);
        while d != 0 {
            let a = n / d;
            let q2 = q0 + a * q1;
            if q2 > max_den {
                break;
            }
            (p0, q0, p1, q1) = (p1, q1, p0 + a * p1, q2);
            (n, d) = (d, n - a * d);
        }
        if q1 == 0 {
            return None;
        }
        if d == 0 {
            return Self::reduced(p1, q1);
        }

        let k = (max_den - q0) / q1;
        let semiconvergent = (p0 + k * p1, q0 + k * q1);
        let target = num as f64 / den as f64;
        let error = |(p, q): (u128, u128)| (p as f64 / q as f64 - target).abs();
        let (p, q) = if error(semiconvergent) < error((p1, q1)) {
            semiconvergent
        } else {
            (p1, q1)
        };
        Self::reduced(p, q)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for FrameRate {
    type Err = PipelineError;

    /// Parses `num/den` or a plain integer
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PipelineError::FFmpeg(format!("invalid frame rate '{}'", s));
        let (num, den) = match s.trim().split_once('/') {
            Some((n, d)) => (n.trim().parse().map_err(|_| invalid())?, d.trim().parse().map_err(|_| invalid())?),
            None => (s.trim().parse().map_err(|_| invalid())?, 1),
        };
        Self::new(num, den).ok_or_else(invalid)
    }
}

/// What the pipeline needs to know about a video
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Number of frames; 0 = unknown
    pub frame_count: u64,
    /// Exact frame rate; None when the file could not be probed
    pub frame_rate: Option<FrameRate>,
    /// Video duration in seconds (0.0 = unknown)
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
    /// Audio stream duration in seconds, when known
    pub audio_duration: Option<f64>,
}

impl MediaInfo {
    /// Sentinel for files that cannot be opened
    pub fn unknown() -> Self {
        Self {
            frame_count: 0,
            frame_rate: None,
            duration: 0.0,
            width: 0,
            height: 0,
            has_audio: false,
            audio_duration: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.frame_rate.is_none()
    }

    /// Rate as a float for threshold comparisons, 0.0 when unknown
    pub fn fps(&self) -> f64 {
        self.frame_rate.map(|r| r.as_f64()).unwrap_or(0.0)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_seconds(value: &Option<String>) -> Option<f64> {
    value
        .as_deref()
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

/// Parse `ffprobe -show_streams -show_format -print_format json` output
pub fn parse_probe_output(json: &str) -> Result<MediaInfo> {
    let output: ProbeOutput = serde_json::from_str(json)?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| PipelineError::FFmpeg("no video stream found".to_string()))?;

    let frame_rate = [&video.r_frame_rate, &video.avg_frame_rate]
        .iter()
        .filter_map(|rate| rate.as_deref())
        .find_map(|rate| rate.parse::<FrameRate>().ok())
        .ok_or_else(|| PipelineError::FFmpeg("video stream has no frame rate".to_string()))?;

    let duration = parse_seconds(&video.duration)
        .or_else(|| output.format.as_ref().and_then(|f| parse_seconds(&f.duration)))
        .unwrap_or(0.0);

    let frame_count = video
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration * frame_rate.as_f64()).round() as u64);

    let audio = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));

    Ok(MediaInfo {
        frame_count,
        frame_rate: Some(frame_rate),
        duration,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
        has_audio: audio.is_some(),
        audio_duration: audio.and_then(|a| parse_seconds(&a.duration)),
    })
}

/// ffprobe-backed media inspection
pub struct MediaProber;

impl MediaProber {
    /// Probe a video; fails if it cannot be opened
    pub async fn probe(video_path: &Path) -> Result<MediaInfo> {
        if !video_path.is_file() {
            return Err(PipelineError::FFmpeg(format!("cannot open {}", video_path.display())).into());
        }

        let output = platform::ffprobe()
            .args(["-show_streams", "-show_format"])
            .args([video_path.display().to_string()])
            .output()
            .await?;

        let info = parse_probe_output(&String::from_utf8_lossy(&output.stdout))
            .map_err(|e| anyhow::anyhow!("Failed to probe {}: {}", video_path.display(), e))?;

        debug!(
            "Probed {}: {} frames @ {} fps, audio: {}",
            video_path.display(),
            info.frame_count,
            info.frame_rate.map(|r| r.to_string()).unwrap_or_default(),
            info.has_audio
        );
        Ok(info)
    }

    /// Probe a video, returning the zeroed sentinel on failure
    pub async fn probe_or_unknown(video_path: &Path) -> MediaInfo {
        match Self::probe(video_path).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Could not probe {}: {}", video_path.display(), e);
                MediaInfo::unknown()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NTSC_WITH_AUDIO: &str = r#"{
        "streams": [
            {"codec_type": "video", "r_frame_rate": "30000/1001", "avg_frame_rate": "30000/1001",
             "nb_frames": "300", "duration": "10.010000", "width": 1280, "height": 720},
            {"codec_type": "audio", "duration": "10.005000"}
        ],
        "format": {"duration": "10.010000"}
    }"#;

    #[test]
    fn test_frame_rate_parse_and_reduce() {
        let rate: FrameRate = "60/2".parse().unwrap();
        assert_eq!(rate, FrameRate::whole(30));
        assert_eq!(rate.to_string(), "30/1");

        let ntsc: FrameRate = "30000/1001".parse().unwrap();
        assert!((ntsc.as_f64() - 29.97).abs() < 0.01);

        assert!("0/0".parse::<FrameRate>().is_err());
        assert!("abc".parse::<FrameRate>().is_err());
        assert_eq!("25".parse::<FrameRate>().unwrap(), FrameRate::whole(25));
    }

    #[test]
    fn test_frame_rate_scaled() {
        let rate = FrameRate::whole(30);
        assert_eq!(rate.scaled(1, 3), Some(FrameRate::whole(10)));
        assert_eq!(rate.scaled(7, 2).unwrap().to_string(), "105/1");
        assert_eq!(rate.scaled(0, 2), None);
    }

    #[test]
    fn test_frame_rate_scaled_overflow_is_approximated() {
        let ntsc: FrameRate = "30000/1001".parse().unwrap();
        let exact = 30000.0 * 400_009.0 / (1001.0 * 100_003.0);

        let rate = ntsc.scaled(400_009, 100_003).unwrap();
        assert!(rate.den() <= 1_001_000);
        assert!((rate.as_f64() - exact).abs() / exact < 1e-9);

        // Exact fractions that fit are kept as they are
        assert_eq!(ntsc.scaled(4, 2).unwrap().to_string(), "60000/1001");
    }

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(NTSC_WITH_AUDIO).unwrap();
        assert_eq!(info.frame_count, 300);
        assert_eq!(info.frame_rate.unwrap().to_string(), "30000/1001");
        assert_eq!((info.width, info.height), (1280, 720));
        assert!(info.has_audio);
        assert_eq!(info.audio_duration, Some(10.005));
    }

    #[test]
    fn test_frame_count_estimated_from_duration() {
        let json = r#"{
            "streams": [{"codec_type": "video", "r_frame_rate": "25/1"}],
            "format": {"duration": "4.0"}
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_count, 100);
        assert!(!info.has_audio);
    }

    #[test]
    fn test_frame_count_unknown_is_zero() {
        let json = r#"{"streams": [{"codec_type": "video", "r_frame_rate": "25/1"}]}"#;
        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_count, 0);
        assert!(!info.is_unknown());
    }

    #[test]
    fn test_no_video_stream_is_error() {
        let json = r#"{"streams": [{"codec_type": "audio"}]}"#;
        assert!(parse_probe_output(json).is_err());
    }

    #[tokio::test]
    async fn test_unreadable_file_returns_sentinel() {
        let info = MediaProber::probe_or_unknown(Path::new("/definitely/not/here.mp4")).await;
        assert!(info.is_unknown());
        assert_eq!(info.frame_count, 0);
        assert_eq!(info.fps(), 0.0);
    }
}
