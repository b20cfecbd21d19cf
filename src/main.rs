use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use cloud_blower::audio::CpalPlatform;
use cloud_blower::calibration::BaselineSampler;
use cloud_blower::classifier::BlowEvent;
use cloud_blower::config::Config;
use cloud_blower::controller::MicrophoneController;
use cloud_blower::events::{DetectorEvent, Subscription};
use cloud_blower::permission::{PermissionManager, PermissionState};
use cloud_blower::trace::LevelTrace;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloud-blower")]
#[command(about = "Blow into the microphone to reveal what hides in the clouds", long_about = None)]
struct Cli {
    /// Input device index (see `list-devices`); defaults to the system input
    #[arg(short, long, global = true)]
    device: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for blows and print every detected gesture (default)
    Listen {
        /// Override the configured blow threshold (0-1)
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Stop after this many seconds instead of waiting for ENTER
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Measure ambient noise and recommend a blow threshold
    Calibrate {
        /// Write the recommended threshold to settings.yaml
        #[arg(long)]
        save: bool,
    },
    /// Show the microphone permission state and request access
    Permission,
    /// Record the level stream of a session for later replay
    RecordTrace {
        /// Name for this recording
        #[arg(default_value = "session")]
        name: String,
    },
    /// Replay a recorded trace through the blow classifier
    ReplayTrace {
        /// Name of the recording to replay
        name: String,
        /// Override the configured blow threshold (0-1)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List available input devices
    ListDevices,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::load_or_create()?;

    match cli.command.unwrap_or(Commands::Listen { threshold: None, duration: None }) {
        Commands::Listen { threshold, duration } => {
            if let Some(threshold) = threshold {
                config.detection.blow_threshold = threshold;
                config.validate()?;
            }
            listen_command(&config, cli.device, duration)
        }
        Commands::Calibrate { save } => calibrate_command(&mut config, cli.device, save),
        Commands::Permission => permission_command(cli.device),
        Commands::RecordTrace { name } => record_trace_command(&config, cli.device, &name),
        Commands::ReplayTrace { name, threshold } => {
            if let Some(threshold) = threshold {
                config.detection.blow_threshold = threshold;
                config.validate()?;
            }
            replay_trace_command(&config, &name)
        }
        Commands::ListDevices => list_devices_command(cli.device),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Check permission, request access and start a listening session on the granted stream
fn start_session(config: &Config, device: Option<usize>) -> Result<MicrophoneController<CpalPlatform>> {
    let platform = Arc::new(CpalPlatform::with_device(device));
    let permissions = PermissionManager::new(Arc::clone(&platform));

    let existing = permissions.check_existing_permission_state();
    if existing == PermissionState::Denied {
        println!("⚠️  Microphone permission is currently denied, asking again...");
    }

    let outcome = permissions.request_microphone_access();
    if !outcome.success {
        let reason = outcome.denial_reason.map(|r| r.help_text()).unwrap_or("Unknown failure.");
        bail!("Microphone unavailable ({}): {}", outcome.state, reason);
    }

    let mut controller = MicrophoneController::new(
        platform,
        config.detection.clone(),
        config.analyser.clone(),
    );
    if let Some(stream) = permissions.take_stream() {
        controller.attach_stream(stream);
    }

    if !controller.start_listening() {
        bail!("Failed to start listening. Is the microphone in use by another application?");
    }

    Ok(controller)
}

/// Drive frames until ENTER, the deadline, or `on_event` returns false
fn run_frames<F>(
    controller: &mut MicrophoneController<CpalPlatform>,
    subscription: &Subscription,
    deadline: Option<Instant>,
    mut on_event: F,
) where
    F: FnMut(DetectorEvent) -> bool,
{
    let enter_pressed = Arc::new(AtomicBool::new(false));
    {
        let enter_pressed = Arc::clone(&enter_pressed);
        std::thread::spawn(move || {
            let mut line = String::new();
            let _ = io::stdin().lock().read_line(&mut line);
            enter_pressed.store(true, Ordering::Release);
        });
    }

    'frames: loop {
        if enter_pressed.load(Ordering::Acquire) {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }

        controller.poll_frame(Instant::now());

        for event in subscription.drain() {
            if !on_event(event) {
                break 'frames;
            }
        }

        if !controller.is_listening() {
            eprintln!("\n✗ Session ended unexpectedly (microphone lost?)");
            break;
        }

        if let Some(next) = controller.next_frame_at() {
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            }
        }
    }

    controller.stop_listening();
}

fn level_meter(level: f32) -> String {
    const WIDTH: usize = 30;
    let filled = ((level.clamp(0.0, 1.0) * WIDTH as f32).round() as usize).min(WIDTH);
    format!("[{}{}] {:.2}", "#".repeat(filled), " ".repeat(WIDTH - filled), level)
}

fn blow_glyph(event: BlowEvent) -> &'static str {
    match event {
        BlowEvent::AnyBlow => "💨",
        BlowEvent::DoubleBlow => "💨💨",
        BlowEvent::LongBlow => "🌬️ ",
        BlowEvent::XlBlow => "🌪️ ",
    }
}

fn listen_command(config: &Config, device: Option<usize>, duration: Option<u64>) -> Result<()> {
    let mut controller = start_session(config, device)?;
    let subscription = controller.subscribe();

    println!("🎤 Listening - blow into the microphone!");
    println!(
        "   threshold {:.2}, long {}ms, xl {}ms, double gap {}ms",
        config.detection.blow_threshold,
        config.detection.long_blow_threshold_ms,
        config.detection.xl_blow_threshold_ms,
        config.detection.double_blow_max_gap_ms
    );
    println!("   Press ENTER to stop");
    println!();

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut counts = [0usize; 4];

    run_frames(&mut controller, &subscription, deadline, |event| {
        match event {
            DetectorEvent::Level(level) => {
                print!("\r{}", level_meter(level));
                let _ = io::stdout().flush();
            }
            DetectorEvent::Blow(blow) => {
                counts[blow as usize] += 1;
                println!("\r{} {}{}", blow_glyph(blow), blow.name(), " ".repeat(30));
            }
        }
        true
    });

    println!();
    println!("📊 Session summary:");
    for blow in [BlowEvent::AnyBlow, BlowEvent::DoubleBlow, BlowEvent::LongBlow, BlowEvent::XlBlow] {
        println!("   {:<12} {}", blow.name(), counts[blow as usize]);
    }

    Ok(())
}

fn calibrate_command(config: &mut Config, device: Option<usize>, save: bool) -> Result<()> {
    let mut controller = start_session(config, device)?;
    let subscription = controller.subscribe();

    println!(
        "🔇 Calibrating - stay quiet for {:.1}s...",
        config.calibration.sample_duration_ms as f32 / 1000.0
    );

    let mut sampler = BaselineSampler::new(&config.calibration);
    run_frames(&mut controller, &subscription, None, |event| match event {
        DetectorEvent::Level(level) => !sampler.record(level, Instant::now()),
        DetectorEvent::Blow(_) => true,
    });

    let result = sampler.finish()?;
    println!();
    println!("✓ Calibration complete ({} frames)", result.samples);
    println!("   Ambient mean:  {:.3}", result.mean);
    println!("   Ambient peak:  {:.3}", result.peak);
    println!("   Recommended blow threshold: {:.2}", result.recommended_threshold);
    println!("   Current blow threshold:     {:.2}", config.detection.blow_threshold);

    if save {
        config.detection.blow_threshold = result.recommended_threshold;
        config.validate()?;
        config.save()?;
        println!("✓ Saved to {}", Config::config_path()?.display());
    } else {
        println!();
        println!("Run with --save to store it in settings.yaml");
    }

    Ok(())
}

fn permission_command(device: Option<usize>) -> Result<()> {
    let platform = Arc::new(CpalPlatform::with_device(device));
    let permissions = PermissionManager::new(platform);

    let existing = permissions.check_existing_permission_state();
    println!("Existing permission state: {}", existing);

    println!("Requesting microphone access...");
    let outcome = permissions.request_microphone_access();

    if outcome.success {
        println!("✓ Microphone access {}", outcome.state);
    } else {
        println!("✗ Microphone access {}", outcome.state);
        if let Some(reason) = outcome.denial_reason {
            println!("   Reason: {}", reason);
            println!("   {}", reason.help_text());
        }
        if let Some(error) = outcome.error {
            println!("   Error: {}", error);
        }
    }

    permissions.reset_permission_state();
    Ok(())
}

fn record_trace_command(config: &Config, device: Option<usize>, name: &str) -> Result<()> {
    let path = LevelTrace::trace_path(name)?;

    let mut controller = start_session(config, device)?;
    let subscription = controller.subscribe();

    println!("🔴 RECORDING - blow a few times, press ENTER when done");

    let started = Instant::now();
    let mut trace = LevelTrace::new();
    let mut write_error = None;

    run_frames(&mut controller, &subscription, None, |event| {
        if let DetectorEvent::Level(level) = event {
            if let Err(e) = trace.push(started.elapsed().as_millis() as u64, level) {
                write_error = Some(e);
                return false;
            }
        }
        true
    });

    if let Some(e) = write_error {
        return Err(e);
    }

    trace.save(&path)?;
    println!(
        "✓ Saved {} frames ({:.1}s) to {}",
        trace.len(),
        trace.duration_ms() as f32 / 1000.0,
        path.display()
    );

    Ok(())
}

fn replay_trace_command(config: &Config, name: &str) -> Result<()> {
    let path = LevelTrace::trace_path(name)?;
    if !path.exists() {
        bail!("Trace '{}' not found at {}", name, path.display());
    }

    println!("📂 Loading: {}", path.display());
    let trace = LevelTrace::load(&path)?;
    println!(
        "✓ Loaded {} frames ({:.1}s)",
        trace.len(),
        trace.duration_ms() as f32 / 1000.0
    );
    println!();

    let events = trace.replay(&config.detection);
    if events.is_empty() {
        println!("(no blows detected at threshold {:.2})", config.detection.blow_threshold);
    }
    for (elapsed_ms, event) in &events {
        println!("[{:7}ms] {} {}", elapsed_ms, blow_glyph(*event), event.name());
    }

    Ok(())
}

fn list_devices_command(selected: Option<usize>) -> Result<()> {
    let platform = CpalPlatform::new();
    let names = platform.input_device_names()?;

    if names.is_empty() {
        println!("No input devices found");
        return Ok(());
    }

    println!("Available input devices:");
    for (index, name) in names.iter().enumerate() {
        let marker = if Some(index) == selected { "→" } else { " " };
        println!("  {} {}: {}", marker, index, name);
    }

    Ok(())
}
