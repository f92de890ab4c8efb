//! 音频格式协商
//!
//! 硬件约束：
//! - 仅支持 signed 16-bit
//! - 采样率：8/11.025/12/16/22.05/24/32/44.1/48kHz
//! - 每帧样本数：8 ~ 2048

/// 硬件支持的采样率表（升序）
pub const SAMPLE_RATES: [u32; 9] = [
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000,
];

/// 每帧样本数下限
pub const MIN_FRAME_SAMPLES: u32 = 8;
/// 每帧样本数上限
pub const MAX_FRAME_SAMPLES: u32 = 2048;

/// 每样本字节数（S16）
pub const BYTES_PER_SAMPLE: usize = 2;

/// 预缓冲下限（帧）
pub const MIN_PRIMING_FRAMES: u32 = 2;

/// 预缓冲至少覆盖 1/50 秒（20ms）
const PRIMING_DIVISOR: u32 = 50;

/// 样本格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SampleFormat {
    U8,
    #[default]
    S16,
    S32,
    F32,
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::U8 => "U8",
            Self::S16 => "S16",
            Self::S32 => "S32",
            Self::F32 => "F32",
        };
        f.write_str(name)
    }
}

/// 宿主请求 / 协商后的音频规格
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioSpec {
    pub freq: u32,
    pub format: SampleFormat,
    pub channels: u8,
    /// 每帧样本数
    pub samples: u32,
    /// 每帧字节数（仅协商结果有效）
    pub size: usize,
}

impl AudioSpec {
    pub fn new(freq: u32, channels: u8, samples: u32) -> Self {
        Self {
            freq,
            format: SampleFormat::S16,
            channels,
            samples,
            size: 0,
        }
    }
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self::new(48000, 2, 256)
    }
}

/// 向上对齐到采样率表中最近的采样率，超过 48kHz 钳位到 48kHz
pub fn snap_sample_rate(requested: u32) -> u32 {
    SAMPLE_RATES
        .iter()
        .copied()
        .find(|&rate| requested <= rate)
        .unwrap_or(SAMPLE_RATES[SAMPLE_RATES.len() - 1])
}

/// 钳位每帧样本数到 [8, 2048]
pub fn clamp_frame_samples(requested: u32) -> u32 {
    requested.clamp(MIN_FRAME_SAMPLES, MAX_FRAME_SAMPLES)
}

/// 预缓冲帧数：至少 20ms 音频，最少 2 帧
///
/// ceil(rate / (50 * samples))
pub fn priming_frames(sample_rate: u32, frame_samples: u32) -> u32 {
    let per_frame = PRIMING_DIVISOR * frame_samples.max(1);
    sample_rate.div_ceil(per_frame).max(MIN_PRIMING_FRAMES)
}

/// 会话级节拍参数（open 后不可变）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacingParameters {
    pub sample_rate: u32,
    pub frame_samples: u32,
    pub channels: u8,
    pub frame_bytes: usize,
    pub priming_frames: u32,
    /// 每帧时长 × 采样率（µs），即 samples * 1_000_000
    ///
    /// 保持整数，用时先乘后除，避免逐帧舍入累积
    pub frame_time_scaled: u64,
}

impl PacingParameters {
    /// 按硬件约束协商参数
    pub fn negotiate(sample_rate: u32, frame_samples: u32, channels: u8) -> Self {
        let sample_rate = snap_sample_rate(sample_rate);
        let frame_samples = clamp_frame_samples(frame_samples);
        Self {
            sample_rate,
            frame_samples,
            channels,
            frame_bytes: frame_samples as usize * channels as usize * BYTES_PER_SAMPLE,
            priming_frames: priming_frames(sample_rate, frame_samples),
            frame_time_scaled: frame_samples as u64 * 1_000_000,
        }
    }

    /// 第 `index` 帧相对 epoch 的偏移（µs）
    #[inline]
    pub fn frame_offset_us(&self, index: u32) -> u64 {
        index as u64 * self.frame_time_scaled / self.sample_rate as u64
    }

    /// 每帧时长（µs，向下取整，仅用于显示）
    pub fn frame_duration_us(&self) -> u64 {
        self.frame_time_scaled / self.sample_rate as u64
    }

    /// 计数器回绕时 epoch 的前进量，恰为 `sample_rate` 帧的时长
    #[inline]
    pub fn wrap_advance_us(&self) -> u64 {
        self.frame_time_scaled
    }

    /// 预缓冲覆盖的音频时长（ms）
    pub fn priming_ms(&self) -> f64 {
        self.priming_frames as f64 * self.frame_samples as f64 * 1000.0 / self.sample_rate as f64
    }

    pub fn to_spec(&self) -> AudioSpec {
        AudioSpec {
            freq: self.sample_rate,
            format: SampleFormat::S16,
            channels: self.channels,
            samples: self.frame_samples,
            size: self.frame_bytes,
        }
    }
}

impl std::fmt::Display for PacingParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch S16 | {} samples/frame ({} bytes, {:.2} ms) | priming {} frames ({:.1} ms)",
            self.sample_rate,
            self.channels,
            self.frame_samples,
            self.frame_bytes,
            self.frame_time_scaled as f64 / self.sample_rate as f64 / 1000.0,
            self.priming_frames,
            self.priming_ms()
        )
    }
}
