use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use wallcycle::compositor::{Compositor, ImageCompositor};
use wallcycle::config::Config;
use wallcycle::cycler::{Cycler, CyclerSettings};
use wallcycle::desktop::{CommandApplier, DesktopApplier, NoopApplier};
use wallcycle::library::Library;
use wallcycle::log_and_continue;
use wallcycle::state::SessionState;

#[derive(Parser, Debug)]
#[command(name = "wallcycle", version, about = "Randomized multi-screen wallpaper cycler")]
struct Args {
    /// Config file (defaults to ~/.config/wallcycle/config.toml)
    #[arg(short, long, env = "WALLCYCLE_CONFIG")]
    config: Option<PathBuf>,

    /// Cycle once, wait for the wallpaper to be applied and exit
    #[arg(long)]
    once: bool,

    /// Write the composed image without applying it to the desktop
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    let (config, load_error) = match Config::load_from_path(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(e) => (Config::default(), Some(e)),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.general.log_level.as_str()),
    )
    .init();

    log::info!("Starting wallcycle v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        Some(e) => log::warn!("Failed to load config: {:#}. Using defaults.", e),
        None => log_config_summary(&config, &config_path),
    }

    let settings = CyclerSettings::from_config(&config.cycle)?;
    let state_path = SessionState::default_path()?;

    let applier: Arc<dyn DesktopApplier> = match (&config.cycle.apply_command, args.dry_run) {
        (_, true) => Arc::new(NoopApplier),
        (Some(command), false) => Arc::new(CommandApplier::new(command)?),
        (None, false) => {
            log::warn!("No apply_command configured, wallpapers will only be written to disk");
            Arc::new(NoopApplier)
        }
    };
    let compositor: Arc<dyn Compositor> = Arc::new(ImageCompositor);

    let (mut cycler, mut events) =
        Cycler::new(settings, config.screens(), compositor, applier);

    let mut library = Library::new(config.wallpaper.clone(), &config.library);
    library.sync();
    log::info!("Library holds {} wallpaper(s)", library.len());

    match SessionState::load(&state_path) {
        Ok(state) => cycler.restore_session(&state, |path| library.find(path).cloned()),
        Err(e) => log::warn!("Ignoring session state: {:#}", e),
    }
    cycler.set_provider(Box::new(library));

    if args.once {
        cycler.cycle_next()?;
        let event = events
            .recv()
            .await
            .context("Cycle worker stopped without reporting")?;
        cycler.handle_event(event)?;
        cycler.session_state().save(&state_path)?;
        return Ok(());
    }

    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    if config.cycle.cycle_on_start {
        start_cycle(&mut cycler, "startup");
    }
    if config.cycle.autocycle {
        cycler.start_autocycle();
    }

    loop {
        let until_autocycle = cycler.time_until_autocycle();

        tokio::select! {
            _ = sleep_for(until_autocycle) => {
                if cycler.autocycle_due() {
                    start_cycle(&mut cycler, "autocycle");
                } else {
                    // A build is running; its completion resets the timer
                    cycler.reset_timer();
                }
            }
            Some(event) = events.recv() => {
                log_and_continue!(cycler.handle_event(event), "apply wallpaper");
                log_and_continue!(cycler.session_state().save(&state_path), "save session state");
            }
            _ = sigusr1.recv() => {
                log::info!("Received SIGUSR1, cycling to the next wallpaper");
                start_cycle(&mut cycler, "manual");
            }
            _ = sighup.recv() => {
                log::info!("Received SIGHUP, reloading configuration");
                reload_config(&mut cycler, &config_path);
            }
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
                break;
            }
        }
    }

    log_and_continue!(cycler.session_state().save(&state_path), "save session state");
    log::info!("Daemon shutting down");
    Ok(())
}

/// Start a cycle; a cycle that can't start still restarts the interval
fn start_cycle(cycler: &mut Cycler, trigger: &str) {
    if let Err(e) = cycler.cycle_next() {
        log::warn!("Cannot cycle ({}): {}", trigger, e);
        cycler.reset_timer();
    }
}

/// Pick up screen layout and autocycle changes from the config file
fn reload_config(cycler: &mut Cycler, config_path: &Path) {
    match Config::load_from_path(config_path) {
        Ok(config) => {
            cycler.set_autocycle_interval(config.cycle.interval());
            if config.cycle.autocycle {
                cycler.start_autocycle();
            } else {
                cycler.stop_autocycle();
            }
            log::info!(
                "Autocycle {} ({}s)",
                if cycler.is_autocycling() { "on" } else { "off" },
                config.cycle.interval
            );

            if let Err(e) = cycler.update_screens(config.screens()) {
                log::warn!("Cannot cycle after display change: {}", e);
                cycler.reset_timer();
            }
        }
        Err(e) => log::error!("Failed to reload config: {:#}", e),
    }
}

async fn sleep_for(duration: Option<std::time::Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

fn log_config_summary(config: &Config, path: &Path) {
    log::info!("✓ Configuration loaded from {}", path.display());
    log::info!("  Cycle settings:");
    log::info!(
        "    - Autocycle: {}",
        if config.cycle.autocycle { "yes" } else { "no" }
    );
    log::info!("    - Interval: {}s", config.cycle.interval);
    log::info!("    - Change type: {}", config.cycle.change_type.name());
    log::info!("    - History: {}%", config.cycle.history_percentage);

    if config.library.sources.is_empty() {
        log::info!("  Library: no source directories");
    } else {
        log::info!("  Library: {} source(s)", config.library.sources.len());
    }
    log::info!("  Configured wallpapers: {}", config.wallpaper.len());

    let screens = config.screens();
    log::info!(
        "  Screens: {} ({} cycled randomly)",
        screens.len(),
        screens.random_cycled_screen_count()
    );
}
