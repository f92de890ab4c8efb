//! 节拍统计
//!
//! 由驱动节拍的线程独占更新，不需要原子操作

/// 节拍统计收集器
#[derive(Debug, Clone, Default)]
pub struct PacingStats {
    cycles: u64,
    waits: u64,
    total_wait_us: u64,
    max_wait_us: u64,
    late_cycles: u64,
    max_late_us: u64,
    resyncs: u64,
    frames_submitted: u64,
    silence_frames: u64,
}

impl PacingStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次 await_next_slot 调用
    #[inline]
    pub fn on_cycle(&mut self) {
        self.cycles += 1;
    }

    /// 提前到达，需要等待
    #[inline]
    pub fn record_wait(&mut self, wait_us: u64) {
        self.waits += 1;
        self.total_wait_us += wait_us;
        self.max_wait_us = self.max_wait_us.max(wait_us);
    }

    /// 到期或已迟到（容差内）
    #[inline]
    pub fn record_late(&mut self, late_us: u64) {
        self.late_cycles += 1;
        self.max_late_us = self.max_late_us.max(late_us);
    }

    #[inline]
    pub fn record_resync(&mut self) {
        self.resyncs += 1;
    }

    #[inline]
    pub fn record_submit(&mut self) {
        self.frames_submitted += 1;
    }

    /// 预缓冲 / 重同步填充的静音帧
    #[inline]
    pub fn record_silence(&mut self, frames: u64) {
        self.silence_frames += frames;
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn late_cycles(&self) -> u64 {
        self.late_cycles
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    pub fn silence_frames(&self) -> u64 {
        self.silence_frames
    }

    /// 生成报告
    pub fn report(&self, frame_samples: u32, sample_rate: u32) -> StatsReport {
        let expected_interval_us = (frame_samples as u64 * 1_000_000) / sample_rate.max(1) as u64;
        let avg_wait_us = if self.waits > 0 {
            self.total_wait_us / self.waits
        } else {
            0
        };

        StatsReport {
            cycles: self.cycles,
            expected_interval_us,
            waits: self.waits,
            avg_wait_us,
            max_wait_us: self.max_wait_us,
            late_cycles: self.late_cycles,
            max_late_us: self.max_late_us,
            resyncs: self.resyncs,
            frames_submitted: self.frames_submitted,
            silence_frames: self.silence_frames,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 统计报告
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub cycles: u64,
    pub expected_interval_us: u64,
    pub waits: u64,
    pub avg_wait_us: u64,
    pub max_wait_us: u64,
    pub late_cycles: u64,
    pub max_late_us: u64,
    pub resyncs: u64,
    pub frames_submitted: u64,
    pub silence_frames: u64,
}

impl std::fmt::Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pacing Statistics")?;
        writeln!(f, "=================")?;
        writeln!(f, "Total cycles: {}", self.cycles)?;
        writeln!(
            f,
            "Frame interval: {:.2} ms",
            self.expected_interval_us as f64 / 1000.0
        )?;
        writeln!(f)?;

        writeln!(f, "Waits: {}", self.waits)?;
        writeln!(f, "  Avg: {:.2} ms", self.avg_wait_us as f64 / 1000.0)?;
        writeln!(f, "  Max: {:.2} ms", self.max_wait_us as f64 / 1000.0)?;

        let late_pct = if self.cycles > 0 {
            self.late_cycles as f64 / self.cycles as f64 * 100.0
        } else {
            0.0
        };
        writeln!(f, "Late cycles: {} ({:.1}%)", self.late_cycles, late_pct)?;
        writeln!(f, "  Max lateness: {:.2} ms", self.max_late_us as f64 / 1000.0)?;
        writeln!(f)?;

        writeln!(f, "Resyncs: {}", self.resyncs)?;
        writeln!(f, "Frames submitted: {}", self.frames_submitted)?;
        writeln!(f, "Silence frames: {}", self.silence_frames)?;

        Ok(())
    }
}
