//! 宿主驱动接口
//!
//! 面向宿主音频框架的契约：open / wait_for_next_slot / play / get_buffer / close。
//! `run` 提供标准的音频线程循环：等待节拍 → 宿主填充 → 提交。

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::audio::{
    AudioSpec, Clock, Decision, OutputError, Pacer, PacerConfig, PacerState, PacingParameters,
    Sink, StatsReport,
};

/// 引擎配置
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    pub pacer: PacerConfig,
}

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("output error: {0}")]
    Output(#[from] OutputError),
}

/// 播放引擎统计
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub cycles: u64,
    pub resyncs: u64,
    pub late_cycles: u64,
    pub frames_submitted: u64,
    /// 已提交音频的时长（秒）
    pub position_secs: f64,
}

/// 播放引擎
///
/// 与 `Pacer` 相同的单写者约束：只能在音频线程上驱动。
pub struct Engine<S: Sink, C: Clock> {
    pacer: Pacer<S, C>,
    spec: Option<AudioSpec>,
}

impl<S: Sink, C: Clock> Engine<S, C> {
    /// 创建新引擎
    pub fn new(sink: S, clock: C, config: EngineConfig) -> Self {
        Self {
            pacer: Pacer::new(sink, clock, config.pacer),
            spec: None,
        }
    }

    /// 协商并打开输出，返回实际规格（格式固定为 S16）
    pub fn open(&mut self, requested: AudioSpec) -> Result<AudioSpec, EngineError> {
        if requested.format != crate::audio::SampleFormat::S16 {
            log::info!("Requested {} output, forcing S16", requested.format);
        }

        let params = self
            .pacer
            .configure(requested.freq, requested.samples, requested.channels)?;
        let spec = params.to_spec();

        log::info!("Audio output opened: {}", params);
        self.spec = Some(spec);
        Ok(spec)
    }

    /// 节拍决策点，每个输出周期调用一次
    pub fn wait_for_next_slot(&mut self) -> Result<Decision, EngineError> {
        Ok(self.pacer.await_next_slot()?)
    }

    /// 提交宿主已填充的缓冲区
    pub fn play(&mut self) -> Result<(), EngineError> {
        Ok(self.pacer.submit()?)
    }

    /// 混音缓冲区，宿主在 play 前写入
    pub fn get_buffer(&mut self) -> Result<&mut [u8], EngineError> {
        Ok(self.pacer.buffer_mut()?)
    }

    /// 关闭输出（幂等）
    pub fn close(&mut self) -> Result<(), EngineError> {
        Ok(self.pacer.close()?)
    }

    /// 音频线程主循环
    ///
    /// `running` 变为 false 时在当前周期结束后退出；首个错误直接返回。
    pub fn run<F>(&mut self, running: &AtomicBool, mut fill: F) -> Result<EngineStats, EngineError>
    where
        F: FnMut(&mut [u8]),
    {
        while running.load(Ordering::Relaxed) {
            self.wait_for_next_slot()?;
            fill(self.get_buffer()?);
            self.play()?;
        }
        Ok(self.stats())
    }

    pub fn spec(&self) -> Option<AudioSpec> {
        self.spec
    }

    pub fn params(&self) -> Option<&PacingParameters> {
        self.pacer.params()
    }

    pub fn state(&self) -> PacerState {
        self.pacer.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.pacer.is_enabled()
    }

    pub fn pacer(&self) -> &Pacer<S, C> {
        &self.pacer
    }

    /// 获取统计
    pub fn stats(&self) -> EngineStats {
        let stats = self.pacer.stats();
        let position_secs = match self.pacer.params() {
            Some(p) => {
                stats.frames_submitted() as f64 * p.frame_samples as f64 / p.sample_rate as f64
            }
            None => 0.0,
        };

        EngineStats {
            cycles: stats.cycles(),
            resyncs: stats.resyncs(),
            late_cycles: stats.late_cycles(),
            frames_submitted: stats.frames_submitted(),
            position_secs,
        }
    }

    /// 完整统计报告（未打开时返回 None）
    pub fn report(&self) -> Option<StatsReport> {
        self.pacer
            .params()
            .map(|p| self.pacer.stats().report(p.frame_samples, p.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::testing::{Call, RecordingSink};
    use crate::audio::{ManualClock, NullSink, SampleFormat};

    fn engine() -> (Engine<RecordingSink, ManualClock>, RecordingSink, ManualClock) {
        let sink = RecordingSink::new();
        let clock = ManualClock::new(0);
        let engine = Engine::new(sink.clone(), clock.clone(), EngineConfig::default());
        (engine, sink, clock)
    }

    #[test]
    fn test_open_negotiates() {
        let (mut engine, _sink, _clock) = engine();
        let mut requested = AudioSpec::new(50000, 2, 5000);
        requested.format = SampleFormat::F32;

        let spec = engine.open(requested).unwrap();
        assert_eq!(spec.freq, 48000);
        assert_eq!(spec.samples, 2048);
        assert_eq!(spec.format, SampleFormat::S16);
        assert_eq!(spec.size, 2048 * 2 * 2);
        assert_eq!(engine.spec(), Some(spec));
        assert_eq!(engine.state(), PacerState::Primed);
    }

    #[test]
    fn test_host_cycle() {
        let (mut engine, sink, clock) = engine();
        engine.open(AudioSpec::new(48000, 1, 480)).unwrap();
        sink.reset_calls();

        assert_eq!(engine.wait_for_next_slot().unwrap(), Decision::Proceed);
        assert_eq!(clock.now_us(), 10_000);
        engine.get_buffer().unwrap().fill(1);
        engine.play().unwrap();

        assert_eq!(sink.calls(), vec![Call::Submit(960, false)]);
        let stats = engine.stats();
        assert_eq!(stats.frames_submitted, 1);
        assert!((stats.position_secs - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_run_stops_on_submit_failure() {
        let (mut engine, sink, clock) = engine();
        engine.open(AudioSpec::new(48000, 2, 480)).unwrap();
        let primed = sink.log.borrow().submits();
        sink.log.borrow_mut().fail_submit_at = Some(primed + 3);

        let running = AtomicBool::new(true);
        let mut fills = 0;
        let result = engine.run(&running, |buf| {
            fills += 1;
            buf.fill(0x7F);
        });

        assert!(matches!(
            result,
            Err(EngineError::Output(OutputError::Submit(_)))
        ));
        assert_eq!(fills, 4);
        assert_eq!(clock.now_us(), 40_000);
        assert!(!engine.is_enabled());
        assert!(matches!(
            engine.play(),
            Err(EngineError::Output(OutputError::Disabled))
        ));
        assert_eq!(sink.log.borrow().submits(), primed + 4);
    }

    #[test]
    fn test_pacer_exposes_sink() {
        let mut engine = Engine::new(NullSink::new(), ManualClock::new(0), EngineConfig::default());
        engine.open(AudioSpec::new(48000, 2, 256)).unwrap();
        assert_eq!(engine.pacer().sink().frames(), 4);

        engine.wait_for_next_slot().unwrap();
        engine.play().unwrap();
        assert_eq!(engine.pacer().sink().frames(), 5);
        assert_eq!(engine.pacer().sink().bytes(), 5 * 1024);
    }

    #[test]
    fn test_run_exits_when_not_running() {
        let (mut engine, _sink, _clock) = engine();
        engine.open(AudioSpec::default()).unwrap();

        let running = AtomicBool::new(false);
        let stats = engine.run(&running, |_| unreachable!()).unwrap();
        assert_eq!(stats.cycles, 0);
    }

    #[test]
    fn test_close_twice() {
        let (mut engine, sink, _clock) = engine();
        engine.open(AudioSpec::default()).unwrap();
        sink.reset_calls();

        engine.close().unwrap();
        engine.close().unwrap();
        assert_eq!(sink.calls().len(), 3);
        assert!(matches!(
            engine.get_buffer(),
            Err(EngineError::Output(OutputError::Closed))
        ));
    }

    #[test]
    fn test_report_after_open() {
        let (mut engine, _sink, _clock) = engine();
        assert!(engine.report().is_none());
        engine.open(AudioSpec::new(44100, 2, 441)).unwrap();
        engine.wait_for_next_slot().unwrap();

        let report = engine.report().unwrap();
        assert_eq!(report.cycles, 1);
        assert_eq!(report.expected_interval_us, 10_000);
    }
}
