//! 音频核心模块
//!
//! 包含：
//! - Format: 采样率/帧长协商与节拍参数
//! - Timing: 单调时钟与空闲优先级忙等
//! - Sink: 硬件输出端抽象
//! - Stats: 节拍统计
//! - Output: 帧节拍器（Pacer）

pub mod format;
pub mod output;
pub mod sink;
pub mod stats;
pub mod timing;

pub use format::{AudioSpec, PacingParameters, SampleFormat};
pub use output::{Decision, OutputError, Pacer, PacerConfig, PacerState, WaitStrategy};
pub use sink::{NullSink, Sink, SinkError, SoundMode};
pub use stats::{PacingStats, StatsReport};
pub use timing::{Clock, ManualClock, MonotonicClock};
