//! 硬件输出端（Sink）抽象
//!
//! 对应厂商音频输出 API 的最小子集：配置、启用、逐帧提交、清空、关闭。
//! Sink 是独占资源：只允许驱动节拍的那一个线程调用。

use thiserror::Error;

/// Sink 调用失败（携带厂商状态码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sink {op} failed (status {code:#x})")]
pub struct SinkError {
    pub op: &'static str,
    pub code: i32,
}

impl SinkError {
    pub fn new(op: &'static str, code: i32) -> Self {
        Self { op, code }
    }
}

/// 声道模式（厂商 API 以 channels - 1 表示）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundMode {
    Mono = 0,
    Stereo = 1,
}

impl SoundMode {
    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            1 => Some(Self::Mono),
            2 => Some(Self::Stereo),
            _ => None,
        }
    }
}

/// 硬件输出端
pub trait Sink {
    fn configure(
        &mut self,
        sample_rate: u32,
        mode: SoundMode,
        channels: u8,
        samples_per_frame: u32,
    ) -> Result<(), SinkError>;

    fn enable(&mut self) -> Result<(), SinkError>;

    fn enable_channel(&mut self) -> Result<(), SinkError>;

    fn set_mute(&mut self, mute: bool) -> Result<(), SinkError>;

    /// 提交一帧（借用仅在调用期间有效）
    fn submit_frame(&mut self, frame: &[u8]) -> Result<(), SinkError>;

    /// 丢弃硬件中已缓冲的帧
    fn clear_buffer(&mut self) -> Result<(), SinkError>;

    fn disable_channel(&mut self) -> Result<(), SinkError>;

    fn disable(&mut self) -> Result<(), SinkError>;
}

/// 丢弃所有数据的 Sink，只计数
#[derive(Debug, Default)]
pub struct NullSink {
    frames: u64,
    bytes: u64,
    clears: u64,
    enabled: bool,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn clears(&self) -> u64 {
        self.clears
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Sink for NullSink {
    fn configure(
        &mut self,
        sample_rate: u32,
        mode: SoundMode,
        channels: u8,
        samples_per_frame: u32,
    ) -> Result<(), SinkError> {
        log::debug!(
            "NullSink configured: {}Hz {:?} {}ch {} samples/frame",
            sample_rate,
            mode,
            channels,
            samples_per_frame
        );
        Ok(())
    }

    fn enable(&mut self) -> Result<(), SinkError> {
        self.enabled = true;
        Ok(())
    }

    fn enable_channel(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn set_mute(&mut self, _mute: bool) -> Result<(), SinkError> {
        Ok(())
    }

    fn submit_frame(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.frames += 1;
        self.bytes += frame.len() as u64;
        Ok(())
    }

    fn clear_buffer(&mut self) -> Result<(), SinkError> {
        self.clears += 1;
        log::debug!("NullSink buffer cleared");
        Ok(())
    }

    fn disable_channel(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn disable(&mut self) -> Result<(), SinkError> {
        self.enabled = false;
        Ok(())
    }
}
