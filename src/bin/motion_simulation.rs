//! Motion Sensor Simulation
//!
//! Generates accelerometer samples of a person alternating between standing,
//! walking and running, for exercising pedocore without a device.
//! Vertical acceleration is a sinusoid at the step cadence plus Gaussian
//! noise; gravity sits on the z axis.
//!
//! # Usage
//! ```bash
//! ./motion-simulation --minutes 5 --speed 10 | ./pedocore run --stdin
//! ./motion-simulation --format csv --speed 0 > walk.csv
//! ```

use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::f64::consts::TAU;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use pedocore::types::MotionSample;

// ============================================================================
// Motion Constants
// ============================================================================

/// Standard gravity (m/s²)
const GRAVITY: f64 = 9.81;
/// Walking cadence (steps per second)
const WALK_CADENCE_HZ: f64 = 1.0;
/// Vertical amplitude while walking (m/s²)
const WALK_AMPLITUDE: f64 = 1.2;
/// Running cadence (steps per second)
const RUN_CADENCE_HZ: f64 = 1.2;
/// Vertical amplitude while running (m/s²)
const RUN_AMPLITUDE: f64 = 3.0;
/// Sensor noise while standing still (m/s²)
const STILL_NOISE: f64 = 0.015;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "motion-simulation")]
#[command(about = "Accelerometer data simulation for pedocore testing")]
#[command(version = "1.0")]
struct Args {
    /// Simulation duration in minutes (1-1440)
    #[arg(short, long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=1440))]
    minutes: u32,

    /// Time compression factor (1 = real-time, 0 = as fast as possible)
    #[arg(short, long, default_value = "1")]
    speed: u32,

    /// Output format: json or csv
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Suppress activity log (only output sensor data)
    #[arg(short, long)]
    quiet: bool,

    /// Output sample rate in Hz
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=200))]
    sample_rate: u32,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Activity Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Activity {
    /// Standing still (0-10%)
    Standing,
    /// Steady walk (10-50%)
    Walking,
    /// Short pause (50-60%)
    Pause,
    /// Run (60-85%)
    Running,
    /// Cool-down walk (85-100%)
    CoolDown,
}

impl Activity {
    fn name(self) -> &'static str {
        match self {
            Self::Standing => "Standing",
            Self::Walking => "Walking",
            Self::Pause => "Pause",
            Self::Running => "Running",
            Self::CoolDown => "Cool-down walk",
        }
    }

    fn from_progress(progress: f64) -> Self {
        match progress {
            p if p < 0.10 => Self::Standing,
            p if p < 0.50 => Self::Walking,
            p if p < 0.60 => Self::Pause,
            p if p < 0.85 => Self::Running,
            _ => Self::CoolDown,
        }
    }

    /// (cadence Hz, vertical amplitude)
    fn gait(self) -> Option<(f64, f64)> {
        match self {
            Self::Standing | Self::Pause => None,
            Self::Walking | Self::CoolDown => Some((WALK_CADENCE_HZ, WALK_AMPLITUDE)),
            Self::Running => Some((RUN_CADENCE_HZ, RUN_AMPLITUDE)),
        }
    }
}

// ============================================================================
// Simulation State
// ============================================================================

struct SimulationState {
    rng: StdRng,
    activity: Activity,
    elapsed_ms: u64,
    total_ms: u64,
    /// Gait phase in cycles; one cycle is one step.
    gait_phase: f64,
    expected_steps: u64,
    samples_generated: u64,
    noise: Normal<f64>,
}

impl SimulationState {
    fn new(minutes: u32, seed: Option<u64>) -> Result<Self, rand_distr::NormalError> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            rng,
            activity: Activity::Standing,
            elapsed_ms: 0,
            total_ms: u64::from(minutes) * 60_000,
            gait_phase: 0.0,
            expected_steps: 0,
            samples_generated: 0,
            noise: Normal::new(0.0, STILL_NOISE)?,
        })
    }

    fn progress(&self) -> f64 {
        self.elapsed_ms as f64 / self.total_ms as f64
    }

    /// Returns true if the activity changed.
    fn update_activity(&mut self) -> bool {
        let next = Activity::from_progress(self.progress());
        let changed = next != self.activity;
        self.activity = next;
        changed
    }

    fn generate_sample(&mut self, step_ms: u64) -> MotionSample {
        let dt = step_ms as f64 / 1000.0;

        let y = match self.activity.gait() {
            Some((cadence, amplitude)) => {
                let before = self.gait_phase.floor();
                self.gait_phase += cadence * dt;
                if self.gait_phase.floor() > before {
                    self.expected_steps += 1;
                }
                amplitude * (TAU * self.gait_phase).sin()
            }
            None => 0.0,
        };

        let sample = MotionSample {
            timestamp_ms: self.elapsed_ms,
            x: self.noise.sample(&mut self.rng),
            y: y + self.noise.sample(&mut self.rng),
            z: GRAVITY + self.noise.sample(&mut self.rng),
        };

        self.samples_generated += 1;
        sample
    }
}

// ============================================================================
// Logging Utilities
// ============================================================================

fn format_time(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn log_activity(ms: u64, message: &str, quiet: bool) {
    if !quiet {
        eprintln!("[{}] {}", format_time(ms), message);
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut state = SimulationState::new(args.minutes, args.seed)?;

    let step_ms = u64::from(1000 / args.sample_rate).max(1);
    let sample_interval_real = if args.speed == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(step_ms) / args.speed
    };

    log_activity(0, &"=".repeat(60), args.quiet);
    log_activity(0, "MOTION SENSOR SIMULATION v1.0", args.quiet);
    log_activity(0, &"=".repeat(60), args.quiet);
    log_activity(0, &format!("  Duration: {} min ({} Hz)", args.minutes, args.sample_rate), args.quiet);
    log_activity(0, &format!("  Speed: {}x", args.speed), args.quiet);
    if let Some(seed) = args.seed {
        log_activity(0, &format!("  Random seed: {}", seed), args.quiet);
    }
    log_activity(0, "  0-10% stand | 10-50% walk | 50-60% pause | 60-85% run | 85-100% walk", args.quiet);
    log_activity(0, &"=".repeat(60), args.quiet);

    if args.format == "csv" {
        println!("timestamp_ms,x,y,z");
    }

    let start_time = Instant::now();
    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();

    while state.elapsed_ms < state.total_ms {
        let loop_start = Instant::now();

        if state.update_activity() {
            log_activity(
                state.elapsed_ms,
                &format!(">>> {} ({} steps so far)", state.activity.name(), state.expected_steps),
                args.quiet,
            );
        }

        let sample = state.generate_sample(step_ms);

        match args.format.as_str() {
            "csv" => writeln!(
                stdout_lock,
                "{},{:.4},{:.4},{:.4}",
                sample.timestamp_ms, sample.x, sample.y, sample.z
            )?,
            _ => writeln!(stdout_lock, "{}", serde_json::to_string(&sample)?)?,
        }
        stdout_lock.flush()?;

        state.elapsed_ms += step_ms;

        let elapsed = loop_start.elapsed();
        if elapsed < sample_interval_real {
            std::thread::sleep(sample_interval_real - elapsed);
        }
    }

    stdout_lock.flush()?;
    drop(stdout_lock);

    log_activity(state.elapsed_ms, &"=".repeat(60), args.quiet);
    log_activity(state.elapsed_ms, "SIMULATION COMPLETE", args.quiet);
    log_activity(state.elapsed_ms, &format!("Samples: {}", state.samples_generated), args.quiet);
    log_activity(state.elapsed_ms, &format!("Gait cycles: {}", state.expected_steps), args.quiet);
    log_activity(
        state.elapsed_ms,
        &format!("Real time: {:.1}s", start_time.elapsed().as_secs_f64()),
        args.quiet,
    );

    Ok(())
}
