//! 帧节拍输出（Pacer）
//!
//! 按绝对时间表把固定大小的帧推给硬件 Sink：
//! - 每个周期从固定锚点重新计算目标时间，不累加 sleep(duration)
//! - 计数器每 `sample_rate` 帧回绕一次，epoch 前进恰好整数微秒
//! - 偏差超出 ±容差即视为失步，清空硬件缓冲并重新预缓冲
//!
//! # 单写者约束
//!
//! Sink 是独占资源。`Pacer` 的所有操作都取 `&mut self`，
//! 只能由驱动节拍的那一个线程调用；在稳态提交期间从另一个线程
//! 重新配置同一个 Sink 属于未定义行为。

use thiserror::Error;

use super::format::{PacingParameters, MIN_PRIMING_FRAMES};
use super::sink::{Sink, SinkError, SoundMode};
use super::stats::PacingStats;
use super::timing::{Clock, IdlePriorityGuard};

/// 默认失步容差：±300ms（8kHz/2048 samples 时单帧最长 256ms）
pub const DEFAULT_DRIFT_TOLERANCE_US: u64 = 300_000;

/// 混合等待默认保留的忙等时长（10ms 调度精度 + 0.5ms 余量）
pub const DEFAULT_TIGHT_WAIT_MARGIN_US: u64 = 10_500;

/// 等待策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// 整段阻塞睡眠
    #[default]
    Sleep,
    /// 先睡到目标前 `margin_us`，再以 SCHED_IDLE 忙等
    ///
    /// 时间更准，但会占用 CPU，并影响低优先级线程
    Hybrid { margin_us: u64 },
}

impl WaitStrategy {
    pub fn hybrid() -> Self {
        Self::Hybrid {
            margin_us: DEFAULT_TIGHT_WAIT_MARGIN_US,
        }
    }
}

/// Pacer 配置
#[derive(Clone, Debug)]
pub struct PacerConfig {
    pub wait_strategy: WaitStrategy,
    /// 失步判定容差（µs），边界值本身视为容差内
    pub drift_tolerance_us: u64,
    /// 覆盖 open 时的预缓冲帧数（下限 2）
    pub priming_frames: Option<u32>,
    /// 覆盖重同步时补的静音帧数（默认 priming - 1）
    pub resync_fill_frames: Option<u32>,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            wait_strategy: WaitStrategy::Sleep,
            drift_tolerance_us: DEFAULT_DRIFT_TOLERANCE_US,
            priming_frames: None,
            resync_fill_frames: None,
        }
    }
}

/// 输出错误
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("configuration rejected: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<SinkError>,
    },
    #[error("failed to allocate {bytes}-byte mix buffer")]
    Alloc { bytes: usize },
    #[error("frame submission failed: {0}")]
    Submit(#[source] SinkError),
    #[error("session disabled after a submission failure")]
    Disabled,
    #[error("session not opened")]
    NotOpen,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("session closed")]
    Closed,
}

impl OutputError {
    fn sink_config(reason: &str, source: SinkError) -> Self {
        Self::Config {
            reason: reason.to_string(),
            source: Some(source),
        }
    }
}

/// Pacer 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Unopened,
    /// 已配置并完成预缓冲
    Primed,
    Steady,
    /// 重同步进行中（仅在 await_next_slot 内部可见）
    Resyncing,
    Closed,
}

/// 每周期的节拍决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 已到达（或已过）目标时间，可以提交
    Proceed,
    /// 失步，已清空硬件缓冲并重新预缓冲
    Resynced,
}

/// Sink 启用进度（open 失败时按进度回滚）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Bringup {
    None,
    Enabled,
    ChannelEnabled,
}

/// 帧节拍器
pub struct Pacer<S: Sink, C: Clock> {
    sink: S,
    clock: C,
    config: PacerConfig,
    state: PacerState,
    params: Option<PacingParameters>,
    enabled: bool,

    /// 混音缓冲区（宿主填充，提交时借给 Sink）
    mix_buffer: Vec<u8>,

    /// 当前秒段的时间锚点（µs）
    epoch_base_us: u64,
    /// 自上次锚定以来的帧数，范围 [0, sample_rate)
    frame_counter: u32,

    stats: PacingStats,
}

impl<S: Sink, C: Clock> Pacer<S, C> {
    pub fn new(sink: S, clock: C, config: PacerConfig) -> Self {
        Self {
            sink,
            clock,
            config,
            state: PacerState::Unopened,
            params: None,
            enabled: false,
            mix_buffer: Vec::new(),
            epoch_base_us: 0,
            frame_counter: 0,
            stats: PacingStats::new(),
        }
    }

    /// 协商参数、启用 Sink、预缓冲并锚定时钟
    pub fn configure(
        &mut self,
        sample_rate: u32,
        frame_samples: u32,
        channels: u8,
    ) -> Result<PacingParameters, OutputError> {
        match self.state {
            PacerState::Unopened => {}
            PacerState::Closed => return Err(OutputError::Closed),
            _ => return Err(OutputError::InvalidState("session already configured")),
        }

        let mode = SoundMode::from_channels(channels).ok_or_else(|| OutputError::Config {
            reason: format!("unsupported channel count {}", channels),
            source: None,
        })?;

        let mut params = PacingParameters::negotiate(sample_rate, frame_samples, channels);
        if let Some(frames) = self.config.priming_frames {
            params.priming_frames = frames.max(MIN_PRIMING_FRAMES);
        }

        log::info!(
            "Negotiated: {}Hz → {}Hz, {} → {} samples/frame, {}ch",
            sample_rate,
            params.sample_rate,
            frame_samples,
            params.frame_samples,
            channels
        );

        let mut bringup = Bringup::None;
        if let Err(e) = self.bring_up_sink(&params, mode, &mut bringup) {
            self.release_sink(bringup);
            return Err(e);
        }

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(params.frame_bytes).is_err() {
            log::error!("Mix buffer allocation failed ({} bytes)", params.frame_bytes);
            self.release_sink(bringup);
            return Err(OutputError::Alloc {
                bytes: params.frame_bytes,
            });
        }
        buffer.resize(params.frame_bytes, 0);
        self.mix_buffer = buffer;
        self.params = Some(params);
        self.enabled = true;

        // 预缓冲：至少 20ms 静音，吸收启动时的调度抖动
        if let Err(e) = self.sink.clear_buffer() {
            log::warn!("Clear before priming failed: {}", e);
        }
        if let Err(e) = self.push_silence(params.priming_frames) {
            log::error!("Priming failed: {}", e);
            self.enabled = false;
            self.params = None;
            self.mix_buffer = Vec::new();
            self.release_sink(bringup);
            return Err(OutputError::Submit(e));
        }

        log::info!("Buffer size: {} bytes", params.frame_bytes);
        log::info!(
            "Primed {} frames ({:.1} ms), wait strategy: {:?}",
            params.priming_frames,
            params.priming_ms(),
            self.config.wait_strategy
        );

        self.frame_counter = 0;
        self.epoch_base_us = self.clock.now_us();
        self.state = PacerState::Primed;

        Ok(params)
    }

    fn bring_up_sink(
        &mut self,
        params: &PacingParameters,
        mode: SoundMode,
        bringup: &mut Bringup,
    ) -> Result<(), OutputError> {
        self.sink
            .configure(params.sample_rate, mode, params.channels, params.frame_samples)
            .map_err(|e| OutputError::sink_config("sink rejected attributes", e))?;
        self.sink
            .enable()
            .map_err(|e| OutputError::sink_config("sink enable failed", e))?;
        *bringup = Bringup::Enabled;
        self.sink
            .enable_channel()
            .map_err(|e| OutputError::sink_config("channel enable failed", e))?;
        *bringup = Bringup::ChannelEnabled;
        self.sink
            .set_mute(false)
            .map_err(|e| OutputError::sink_config("unmute failed", e))?;
        Ok(())
    }

    /// 回滚 open 过程中已获取的 Sink 资源
    fn release_sink(&mut self, bringup: Bringup) {
        if bringup >= Bringup::ChannelEnabled {
            let _ = self.sink.clear_buffer();
            let _ = self.sink.disable_channel();
        }
        if bringup >= Bringup::Enabled {
            let _ = self.sink.disable();
        }
    }

    /// 提交 `count` 帧静音（调用前 mix_buffer 必须已清零）
    fn push_silence(&mut self, count: u32) -> Result<(), SinkError> {
        for _ in 0..count {
            self.sink.submit_frame(&self.mix_buffer)?;
        }
        self.stats.record_silence(count as u64);
        Ok(())
    }

    /// 检查会话是否可用
    fn check_active(&self) -> Result<PacingParameters, OutputError> {
        match self.state {
            PacerState::Closed => return Err(OutputError::Closed),
            PacerState::Unopened => return Err(OutputError::NotOpen),
            _ => {}
        }
        if !self.enabled {
            return Err(OutputError::Disabled);
        }
        self.params.ok_or(OutputError::NotOpen)
    }

    /// 等待下一帧的提交时刻
    ///
    /// 每产出一帧调用一次，在 `submit` 之前
    pub fn await_next_slot(&mut self) -> Result<Decision, OutputError> {
        let params = self.check_active()?;
        self.stats.on_cycle();

        self.frame_counter += 1;
        if self.frame_counter == params.sample_rate {
            self.frame_counter = 0;
            self.epoch_base_us += params.wrap_advance_us();
        }

        let target = params.frame_offset_us(self.frame_counter) + self.epoch_base_us;
        let now = self.clock.now_us();
        let delta = target as i64 - now as i64;

        if delta.unsigned_abs() > self.config.drift_tolerance_us {
            self.resync(&params, delta)?;
            return Ok(Decision::Resynced);
        }

        if delta > 0 {
            self.wait_until(target, delta as u64);
            self.stats.record_wait(delta as u64);
        } else {
            self.stats.record_late(delta.unsigned_abs());
        }

        self.state = PacerState::Steady;
        Ok(Decision::Proceed)
    }

    /// 失步恢复：清空硬件缓冲、补静音、重新锚定
    fn resync(&mut self, params: &PacingParameters, delta: i64) -> Result<(), OutputError> {
        self.state = PacerState::Resyncing;
        log::warn!(
            "Desynchronized by {:.1} ms at frame {}, resyncing",
            delta as f64 / 1000.0,
            self.frame_counter
        );

        let fill = self
            .config
            .resync_fill_frames
            .unwrap_or(params.priming_frames.saturating_sub(1));

        if let Err(e) = self.sink.clear_buffer() {
            log::warn!("Clear on resync failed: {}", e);
        }
        self.mix_buffer.fill(0);
        if let Err(e) = self.push_silence(fill) {
            log::error!("Audio write failed during resync: {}", e);
            self.enabled = false;
            self.state = PacerState::Steady;
            return Err(OutputError::Submit(e));
        }

        self.frame_counter = 0;
        self.epoch_base_us = self.clock.now_us();
        self.stats.record_resync();
        self.state = PacerState::Steady;
        Ok(())
    }

    fn wait_until(&self, target: u64, delta: u64) {
        match self.config.wait_strategy {
            WaitStrategy::Sleep => self.clock.sleep_us(delta),
            WaitStrategy::Hybrid { margin_us } => {
                if delta > margin_us {
                    self.clock.sleep_us(delta - margin_us);
                }
                let _guard = IdlePriorityGuard::enter();
                loop {
                    self.clock.yield_now();
                    if self.clock.now_us() >= target {
                        break;
                    }
                }
            }
        }
    }

    /// 提交当前混音缓冲区
    ///
    /// 失败即禁用会话，不重试；之后的调用返回 `Disabled`
    pub fn submit(&mut self) -> Result<(), OutputError> {
        self.check_active()?;
        match self.sink.submit_frame(&self.mix_buffer) {
            Ok(()) => {
                self.stats.record_submit();
                Ok(())
            }
            Err(e) => {
                log::error!("Audio write failed: {}", e);
                self.enabled = false;
                Err(OutputError::Submit(e))
            }
        }
    }

    /// 混音缓冲区（只读）
    pub fn buffer(&self) -> Result<&[u8], OutputError> {
        self.check_active()?;
        Ok(&self.mix_buffer)
    }

    /// 混音缓冲区，供宿主在 submit 前填充
    pub fn buffer_mut(&mut self) -> Result<&mut [u8], OutputError> {
        self.check_active()?;
        Ok(&mut self.mix_buffer)
    }

    /// 关闭会话（幂等）
    pub fn close(&mut self) -> Result<(), OutputError> {
        match self.state {
            PacerState::Closed => return Ok(()),
            PacerState::Unopened => {
                self.state = PacerState::Closed;
                return Ok(());
            }
            _ => {}
        }

        log::info!("Closing audio output");
        if let Err(e) = self.sink.clear_buffer() {
            log::warn!("Clear on close failed: {}", e);
        }
        if let Err(e) = self.sink.disable_channel() {
            log::warn!("Channel disable failed: {}", e);
        }
        if let Err(e) = self.sink.disable() {
            log::warn!("Sink disable failed: {}", e);
        }

        self.mix_buffer = Vec::new();
        self.enabled = false;
        self.state = PacerState::Closed;
        Ok(())
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    pub fn params(&self) -> Option<&PacingParameters> {
        self.params.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn frame_counter(&self) -> u32 {
        self.frame_counter
    }

    pub fn epoch_base_us(&self) -> u64 {
        self.epoch_base_us
    }

    pub fn stats(&self) -> &PacingStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: Sink, C: Clock> Drop for Pacer<S, C> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
