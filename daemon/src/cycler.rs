use crate::compositor::{ActiveWallpapers, CompositeError, CompositeRequest, Compositor, write_image};
use crate::config::CycleSettings;
use crate::desktop::{Arrangement, DesktopApplier};
use crate::history::{LastActiveWindow, MIN_HISTORY_CAPACITY};
use crate::library::CandidateProvider;
use crate::selection::{
    SelectionContext, check_integrity, next_cycled_screen, required_per_screen, select_next,
};
use crate::state::SessionState;
use crate::timer::AutocycleTimer;
use anyhow::Result;
use chrono::{DateTime, Local};
use common::{ChangeType, CycleError, ScreenSettingsCollection, Wallpaper};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

/// Cycle settings resolved from the configuration.
#[derive(Debug, Clone)]
pub struct CyclerSettings {
    pub change_type: ChangeType,
    pub history_percentage: u8,
    pub interval: Duration,
    pub cycle_after_display_change: bool,
    pub opacity: f32,
    pub high_quality: bool,
    pub output_path: PathBuf,
}

impl CyclerSettings {
    pub fn from_config(cycle: &CycleSettings) -> Result<Self> {
        Ok(Self {
            change_type: cycle.change_type,
            history_percentage: cycle.history_percentage,
            interval: cycle.interval(),
            cycle_after_display_change: cycle.cycle_after_display_change,
            opacity: cycle.opacity,
            high_quality: cycle.high_quality,
            output_path: cycle.output_path()?,
        })
    }
}

/// Result of a background build, delivered to the control loop.
///
/// `layout` is the screen layout generation the build was started for.
#[derive(Debug)]
pub enum CycleEvent {
    Applied {
        layout: u64,
        wallpapers: ActiveWallpapers,
        image_path: PathBuf,
    },
    Failed {
        layout: u64,
        error: CompositeError,
    },
}

impl CycleEvent {
    pub fn layout(&self) -> u64 {
        match self {
            Self::Applied { layout, .. } | Self::Failed { layout, .. } => *layout,
        }
    }
}

/// State needed to undo a cycle whose build failed
struct PendingCycle {
    history: LastActiveWindow,
    one_by_one_screen: Option<usize>,
}

/// Drives wallpaper cycles: selection on the caller's task, composition and
/// desktop application on a blocking worker.
///
/// Only one build may be in flight. Completion comes back as a
/// [`CycleEvent`] on the receiver returned by [`Cycler::new`] and must be
/// passed to [`Cycler::handle_event`].
pub struct Cycler<R: Rng = StdRng> {
    settings: CyclerSettings,
    screens: ScreenSettingsCollection,
    /// Bumped on every screen layout change
    layout: u64,
    history: LastActiveWindow,
    provider: Option<Box<dyn CandidateProvider>>,
    compositor: Arc<dyn Compositor>,
    applier: Arc<dyn DesktopApplier>,
    build_slot: Arc<Semaphore>,
    events: mpsc::UnboundedSender<CycleEvent>,
    active: ActiveWallpapers,
    one_by_one_screen: Option<usize>,
    pending: Option<PendingCycle>,
    last_cycle: Option<DateTime<Local>>,
    timer: AutocycleTimer,
    rng: R,
}

impl Cycler<StdRng> {
    pub fn new(
        settings: CyclerSettings,
        screens: ScreenSettingsCollection,
        compositor: Arc<dyn Compositor>,
        applier: Arc<dyn DesktopApplier>,
    ) -> (Self, mpsc::UnboundedReceiver<CycleEvent>) {
        Self::with_rng(settings, screens, compositor, applier, StdRng::from_os_rng())
    }
}

impl<R: Rng> Cycler<R> {
    pub fn with_rng(
        settings: CyclerSettings,
        screens: ScreenSettingsCollection,
        compositor: Arc<dyn Compositor>,
        applier: Arc<dyn DesktopApplier>,
        rng: R,
    ) -> (Self, mpsc::UnboundedReceiver<CycleEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let timer = AutocycleTimer::new(settings.interval);

        let cycler = Self {
            settings,
            screens,
            layout: 0,
            history: LastActiveWindow::default(),
            provider: None,
            compositor,
            applier,
            build_slot: Arc::new(Semaphore::new(1)),
            events,
            active: ActiveWallpapers::default(),
            one_by_one_screen: None,
            pending: None,
            last_cycle: None,
            timer,
            rng,
        };

        (cycler, receiver)
    }

    pub fn set_provider(&mut self, provider: Box<dyn CandidateProvider>) {
        self.provider = Some(provider);
    }

    /// Select the next wallpapers and start building them in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn cycle_next(&mut self) -> Result<(), CycleError> {
        let permit = Arc::clone(&self.build_slot)
            .try_acquire_owned()
            .map_err(|_| CycleError::CyclingInProgress)?;

        let now = Local::now().time();
        let change_type = self.settings.change_type;

        let candidates = if self.screens.random_cycled_screen_count() > 0 {
            let candidates = self
                .provider
                .as_mut()
                .map(|provider| provider.candidates())
                .unwrap_or_default();

            if candidates.is_empty() {
                return Err(CycleError::NoWallpapersProvided);
            }
            if !check_integrity(&candidates, &self.screens, now) {
                return Err(CycleError::InsufficientCandidates);
            }
            candidates
        } else {
            Vec::new()
        };

        let one_by_one_screen = match change_type {
            ChangeType::OneByOne => next_cycled_screen(&self.screens, self.one_by_one_screen),
            _ => None,
        };
        let required = required_per_screen(&self.screens, change_type, one_by_one_screen);

        let snapshot = self.history.clone();
        let ctx = SelectionContext {
            screens: &self.screens,
            required_per_screen: &required,
            change_type,
            history_percentage: self.settings.history_percentage,
            now,
        };

        let outcome = match select_next(&candidates, &mut self.history, &ctx, &mut self.rng) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.history = snapshot;
                return Err(e.into());
            }
        };

        let wallpapers =
            ActiveWallpapers::arrange(&outcome, &self.screens, change_type, &self.active);

        log::info!(
            "Cycling {} ({}): {}",
            if outcome.multiscreen { "multiscreen" } else { "per screen" },
            change_type.name(),
            describe(outcome.picks())
        );

        self.pending = Some(PendingCycle {
            history: snapshot,
            one_by_one_screen: self.one_by_one_screen,
        });
        if one_by_one_screen.is_some() {
            self.one_by_one_screen = one_by_one_screen;
        }

        let request = CompositeRequest {
            bounds: self.screens.iter().map(|s| s.bounds).collect(),
            wallpapers,
            opacity: self.settings.opacity,
            high_quality: self.settings.high_quality,
        };

        // A lone multiscreen image covers the desktop as one piece
        let arrangement = if request.wallpapers.multiscreen.is_some()
            && request.wallpapers.per_screen.iter().all(Option::is_none)
        {
            Arrangement::Span
        } else {
            Arrangement::Tile
        };

        let compositor = Arc::clone(&self.compositor);
        let applier = Arc::clone(&self.applier);
        let image_path = self.settings.output_path.clone();
        let events = self.events.clone();
        let layout = self.layout;

        tokio::spawn(async move {
            let wallpapers = request.wallpapers.clone();
            let path = image_path.clone();

            let result = tokio::task::spawn_blocking(move || {
                let image = compositor.composite(&request)?;
                write_image(&image, &path)?;
                applier.apply(&path, arrangement)
            })
            .await;

            drop(permit);

            let event = match result {
                Ok(Ok(())) => CycleEvent::Applied {
                    layout,
                    wallpapers,
                    image_path,
                },
                Ok(Err(error)) => CycleEvent::Failed { layout, error },
                Err(e) => CycleEvent::Failed {
                    layout,
                    error: CompositeError::Worker(e.to_string()),
                },
            };

            if events.send(event).is_err() {
                log::debug!("Cycle event receiver dropped");
            }
        });

        Ok(())
    }

    /// Apply the outcome of a background build.
    ///
    /// A failed build puts the history back the way it was before the cycle.
    /// A build started for a previous screen layout is not recorded as active.
    /// The autocycle timer is reset in every case.
    pub fn handle_event(&mut self, event: CycleEvent) -> Result<(), CompositeError> {
        let pending = self.pending.take();

        if event.layout() != self.layout {
            self.timer.reset();
            return self.handle_stale_event(event, pending);
        }

        let result = match event {
            CycleEvent::Applied {
                wallpapers,
                image_path,
                ..
            } => {
                log::info!("Wallpaper applied from {}", image_path.display());
                self.active = wallpapers;
                self.last_cycle = Some(Local::now());
                Ok(())
            }
            CycleEvent::Failed { error, .. } => {
                log::warn!("Cycle failed: {}", error);
                if let Some(pending) = pending {
                    self.history = pending.history;
                    self.one_by_one_screen = pending.one_by_one_screen;
                }
                Err(error)
            }
        };

        self.timer.reset();
        result
    }

    /// The screens changed while the build ran; the one-by-one cursor and
    /// active wallpapers already belong to the new layout.
    fn handle_stale_event(
        &mut self,
        event: CycleEvent,
        pending: Option<PendingCycle>,
    ) -> Result<(), CompositeError> {
        match event {
            CycleEvent::Applied { image_path, .. } => {
                log::info!(
                    "Discarding {} built for a previous screen layout",
                    image_path.display()
                );
                self.last_cycle = Some(Local::now());
                if self.settings.cycle_after_display_change {
                    log_and_continue!(self.cycle_next(), "cycle after display change");
                }
                Ok(())
            }
            CycleEvent::Failed { error, .. } => {
                log::warn!("Cycle for a previous screen layout failed: {}", error);
                if let Some(pending) = pending {
                    self.history = pending.history;
                }
                Err(error)
            }
        }
    }

    /// Replace the screen layout after a display configuration change.
    ///
    /// A build still running for the old layout is discarded when it
    /// completes.
    pub fn update_screens(&mut self, screens: ScreenSettingsCollection) -> Result<(), CycleError> {
        log::info!("Display configuration changed: {} screen(s)", screens.len());

        self.screens = screens;
        self.layout += 1;
        self.one_by_one_screen = None;
        self.active = ActiveWallpapers::default();

        if self.settings.cycle_after_display_change {
            self.cycle_next()?;
        }
        Ok(())
    }

    pub fn start_autocycle(&mut self) {
        self.timer.start();
    }

    pub fn stop_autocycle(&mut self) {
        self.timer.stop();
    }

    /// Change the autocycle interval; the countdown restarts from now.
    pub fn set_autocycle_interval(&mut self, interval: Duration) {
        self.settings.interval = interval;
        self.timer.set_interval(interval);
    }

    pub fn is_autocycling(&self) -> bool {
        self.timer.is_running()
    }

    pub fn reset_timer(&mut self) {
        self.timer.reset();
    }

    /// `None` while autocycling is stopped
    pub fn time_until_autocycle(&self) -> Option<Duration> {
        self.timer.time_until_due()
    }

    pub fn autocycle_due(&self) -> bool {
        self.timer.is_due() && !self.is_building()
    }

    pub fn is_building(&self) -> bool {
        self.build_slot.available_permits() == 0
    }

    pub fn active_wallpapers(&self) -> &ActiveWallpapers {
        &self.active
    }

    pub fn history(&self) -> &LastActiveWindow {
        &self.history
    }

    pub fn screens(&self) -> &ScreenSettingsCollection {
        &self.screens
    }

    pub fn last_cycle(&self) -> Option<DateTime<Local>> {
        self.last_cycle
    }

    pub fn session_state(&self) -> SessionState {
        let path_of = |w: &Arc<Wallpaper>| w.image_path.clone();

        SessionState {
            last_cycle: self.last_cycle,
            active_multiscreen: self.active.multiscreen.as_ref().map(path_of),
            active_per_screen: self
                .active
                .per_screen
                .iter()
                .map(|w| w.as_ref().map(path_of))
                .collect(),
            history: self.history.iter().map(path_of).collect(),
        }
    }

    /// Restore a saved session; paths `lookup` can't resolve are skipped.
    pub fn restore_session<F>(&mut self, state: &SessionState, lookup: F)
    where
        F: Fn(&Path) -> Option<Arc<Wallpaper>>,
    {
        let history: Vec<Arc<Wallpaper>> = state.history.iter().filter_map(|p| lookup(p)).collect();
        self.history = LastActiveWindow::new(history.len().max(MIN_HISTORY_CAPACITY));
        for wallpaper in history {
            self.history.add(wallpaper);
        }

        self.active = ActiveWallpapers {
            multiscreen: state.active_multiscreen.as_deref().and_then(&lookup),
            per_screen: state
                .active_per_screen
                .iter()
                .map(|p| p.as_deref().and_then(&lookup))
                .collect(),
        };
        self.last_cycle = state.last_cycle;

        log::debug!(
            "Restored session: {} history entries, last cycle {:?}",
            self.history.len(),
            self.last_cycle
        );
    }
}

fn describe<'a>(picks: impl Iterator<Item = &'a Arc<Wallpaper>>) -> String {
    let names: Vec<String> = picks
        .map(|w| {
            w.image_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_else(|| w.image_path.display().to_string())
        })
        .collect();

    if names.is_empty() {
        "static wallpapers only".to_string()
    } else {
        names.join(", ")
    }
}
