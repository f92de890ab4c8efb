//! Frame Pacer - 帧节拍演示
//!
//! 以 NullSink 为输出端，按硬件节拍推送测试音，
//! 可注入调度停顿观察失步重同步。

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use frame_pacer::audio::{
    AudioSpec, MonotonicClock, NullSink, PacerConfig, PacingParameters, WaitStrategy,
};
use frame_pacer::engine::{Engine, EngineConfig};

/// Frame Pacer - drift-corrected audio frame pacing
#[derive(Parser)]
#[command(name = "frame-pacer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Requested sample rate (snapped up to a supported rate)
    #[arg(short, long, default_value = "48000")]
    rate: u32,

    /// Requested samples per frame (clamped to 8..=2048)
    #[arg(short = 'n', long, default_value = "256")]
    samples: u32,

    /// Channel count (1 or 2)
    #[arg(short, long, default_value = "2")]
    channels: u8,

    /// Playback length in seconds
    #[arg(long, default_value = "5")]
    seconds: u32,

    /// Sleep coarsely then busy-wait at idle priority for the last stretch
    #[arg(long)]
    tight_wait: bool,

    /// Busy-wait margin for --tight-wait, in microseconds
    #[arg(long, default_value = "10500")]
    margin_us: u64,

    /// Drift tolerance before resync, in milliseconds
    #[arg(long, default_value = "300")]
    tolerance_ms: u64,

    /// Override the number of priming frames
    #[arg(long)]
    priming_frames: Option<u32>,

    /// Override the number of silent frames pushed on resync
    #[arg(long)]
    resync_fill: Option<u32>,

    /// Inject a host stall every N cycles (0 = never)
    #[arg(long, default_value = "0")]
    stall_every: u64,

    /// Length of each injected stall, in milliseconds
    #[arg(long, default_value = "500")]
    stall_ms: u64,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show negotiated pacing parameters
    Info,

    /// Pace a test tone into a null sink
    Play,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    match cli.command {
        Some(Commands::Info) => show_info(&cli),
        Some(Commands::Play) | None => play_tone(&cli)?,
    }

    Ok(())
}

fn pacer_config(cli: &Cli) -> PacerConfig {
    PacerConfig {
        wait_strategy: if cli.tight_wait {
            WaitStrategy::Hybrid {
                margin_us: cli.margin_us,
            }
        } else {
            WaitStrategy::Sleep
        },
        drift_tolerance_us: cli.tolerance_ms.saturating_mul(1000),
        priming_frames: cli.priming_frames,
        resync_fill_frames: cli.resync_fill,
    }
}

/// 显示协商结果
fn show_info(cli: &Cli) {
    let params = PacingParameters::negotiate(cli.rate, cli.samples, cli.channels);

    println!("=== Negotiated Pacing Parameters ===\n");
    println!("Sample rate:   {} Hz (requested {})", params.sample_rate, cli.rate);
    println!(
        "Frame length:  {} samples (requested {})",
        params.frame_samples, cli.samples
    );
    println!("Channels:      {}", params.channels);
    println!("Format:        S16");
    println!("Frame bytes:   {}", params.frame_bytes);
    println!(
        "Frame period:  {:.3} ms",
        params.frame_time_scaled as f64 / params.sample_rate as f64 / 1000.0
    );
    println!(
        "Priming:       {} frames ({:.1} ms)",
        params.priming_frames,
        params.priming_ms()
    );
    println!(
        "Counter wrap:  every {} frames (epoch +{} s)",
        params.sample_rate, params.frame_samples
    );
}

/// 440Hz 正弦测试音
struct ToneGenerator {
    phase: f64,
    step: f64,
    channels: usize,
}

impl ToneGenerator {
    fn new(freq: f64, sample_rate: u32, channels: u8) -> Self {
        Self {
            phase: 0.0,
            step: TAU * freq / sample_rate as f64,
            channels: channels.max(1) as usize,
        }
    }

    /// 填充交织 S16LE
    fn fill(&mut self, buf: &mut [u8]) {
        let frame_bytes = self.channels * 2;
        for frame in buf.chunks_exact_mut(frame_bytes) {
            let value = (self.phase.sin() * i16::MAX as f64 * 0.25) as i16;
            let bytes = value.to_le_bytes();
            for sample in frame.chunks_exact_mut(2) {
                sample.copy_from_slice(&bytes);
            }
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

/// 推送测试音
fn play_tone(cli: &Cli) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let config = EngineConfig {
        pacer: pacer_config(cli),
    };
    let mut engine = Engine::new(NullSink::new(), MonotonicClock::new(), config);
    let spec = engine.open(AudioSpec::new(cli.rate, cli.channels, cli.samples))?;

    println!(
        "Pacing {}Hz {}ch S16, {} samples/frame for {}s",
        spec.freq, spec.channels, spec.samples, cli.seconds
    );
    if cli.stall_every > 0 {
        println!(
            "Injecting a {} ms stall every {} cycles",
            cli.stall_ms, cli.stall_every
        );
    }
    println!("Press Ctrl+C to stop.\n");

    let total_cycles = cli.seconds as u64 * spec.freq as u64 / spec.samples as u64;
    let mut tone = ToneGenerator::new(440.0, spec.freq, spec.channels);
    let mut cycle = 0u64;

    let result = engine.run(&running, |buf| {
        tone.fill(buf);
        cycle += 1;
        if cli.stall_every > 0 && cycle % cli.stall_every == 0 {
            std::thread::sleep(Duration::from_millis(cli.stall_ms));
        }
        if cycle >= total_cycles {
            running.store(false, Ordering::SeqCst);
        }
    });

    let report = engine.report();
    let sink_frames = engine.pacer().sink().frames();
    engine.close()?;

    let stats = result?;
    println!(
        "Played {:.2}s of audio ({} frames reached the sink)\n",
        stats.position_secs, sink_frames
    );
    if let Some(report) = report {
        println!("{}", report);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_fills_interleaved() {
        let mut tone = ToneGenerator::new(440.0, 48000, 2);
        let mut buf = vec![0u8; 256 * 2 * 2];
        tone.fill(&mut buf);

        // 第一个样本 sin(0) = 0
        assert_eq!(&buf[0..4], &[0, 0, 0, 0]);
        // 左右声道相同
        for frame in buf.chunks_exact(4) {
            assert_eq!(frame[0..2], frame[2..4]);
        }
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_cli_config() {
        let cli = Cli::parse_from([
            "frame-pacer",
            "--tight-wait",
            "--margin-us",
            "2000",
            "--tolerance-ms",
            "150",
            "--resync-fill",
            "3",
            "play",
        ]);
        let config = pacer_config(&cli);
        assert_eq!(config.wait_strategy, WaitStrategy::Hybrid { margin_us: 2000 });
        assert_eq!(config.drift_tolerance_us, 150_000);
        assert_eq!(config.resync_fill_frames, Some(3));
        assert_eq!(config.priming_frames, None);
    }

    #[test]
    fn test_cli_huge_tolerance_saturates() {
        let cli = Cli::parse_from(["frame-pacer", "--tolerance-ms", "18446744073709551615", "info"]);
        let config = pacer_config(&cli);
        assert_eq!(config.drift_tolerance_us, u64::MAX);
    }
}
