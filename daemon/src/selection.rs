//! Weighted random wallpaper selection.
//!
//! A cycle either shows one multiscreen wallpaper spanning every screen or
//! one singlescreen wallpaper per screen slot. The engine first decides which
//! of the two pools to draw from, weighting each pool by its summed priority,
//! then picks from that pool with a priority threshold that is re-drawn on
//! every pass over the candidates.

use crate::history::{LastActiveWindow, MIN_HISTORY_CAPACITY};
use chrono::NaiveTime;
use common::{ChangeType, ScreenSettingsCollection, SelectionError, ShortfallReason, Wallpaper};
use rand::Rng;
use std::sync::Arc;

/// Wallpapers picked for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionOutcome {
    /// A single wallpaper spans all screens
    pub multiscreen: bool,

    /// Picks per slot. Multiscreen outcomes use exactly one slot.
    pub picks_by_screen: Vec<Vec<Arc<Wallpaper>>>,
}

impl SelectionOutcome {
    /// Outcome used when no screen cycles randomly.
    pub fn static_only(slots: usize) -> Self {
        Self {
            multiscreen: false,
            picks_by_screen: vec![Vec::new(); slots],
        }
    }

    pub fn is_static_only(&self) -> bool {
        self.picks_by_screen.iter().all(Vec::is_empty)
    }

    /// Every picked wallpaper, slot by slot.
    pub fn picks(&self) -> impl Iterator<Item = &Arc<Wallpaper>> {
        self.picks_by_screen.iter().flatten()
    }

    /// First pick of a slot.
    pub fn pick_for(&self, slot: usize) -> Option<&Arc<Wallpaper>> {
        self.picks_by_screen.get(slot).and_then(|picks| picks.first())
    }
}

/// Everything the engine needs besides the candidates, history and rng.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub screens: &'a ScreenSettingsCollection,
    /// Number of singlescreen picks each slot needs
    pub required_per_screen: &'a [usize],
    pub change_type: ChangeType,
    /// History size as a percentage of the usable pool
    pub history_percentage: u8,
    /// Time of day used for cycle window checks
    pub now: NaiveTime,
}

#[derive(Debug, Default, Clone, Copy)]
struct PriorityStats {
    max: u8,
    sum: u64,
}

impl PriorityStats {
    fn record(&mut self, priority: u8) {
        self.max = self.max.max(priority);
        self.sum += u64::from(priority);
    }
}

/// Per-slot requirement for a change type.
///
/// `one_by_one_screen` is the screen that changes this cycle; it is ignored
/// by the other change types.
pub fn required_per_screen(
    screens: &ScreenSettingsCollection,
    change_type: ChangeType,
    one_by_one_screen: Option<usize>,
) -> Vec<usize> {
    match change_type {
        ChangeType::AllSame => screens
            .iter()
            .map(|s| usize::from(s.cycle_randomly))
            .collect(),
        ChangeType::AllCloned => {
            vec![usize::from(screens.random_cycled_screen_count() > 0)]
        }
        ChangeType::OneByOne => screens
            .iter()
            .enumerate()
            .map(|(i, s)| usize::from(s.cycle_randomly && Some(i) == one_by_one_screen))
            .collect(),
    }
}

/// Next randomly cycled screen after `previous`, wrapping around.
pub fn next_cycled_screen(
    screens: &ScreenSettingsCollection,
    previous: Option<usize>,
) -> Option<usize> {
    let count = screens.len();
    if count == 0 {
        return None;
    }

    let start = previous.map_or(0, |p| (p + 1) % count);
    (0..count)
        .map(|offset| (start + offset) % count)
        .find(|&i| screens.get(i).is_some_and(|s| s.cycle_randomly))
}

/// Quick feasibility test used before a cycle is attempted.
///
/// Returns `true` as soon as one usable multiscreen wallpaper (on a system
/// with more than one screen) or enough usable singlescreen wallpapers for
/// every randomly cycled screen are found.
pub fn check_integrity(
    candidates: &[Arc<Wallpaper>],
    screens: &ScreenSettingsCollection,
    now: NaiveTime,
) -> bool {
    if candidates.is_empty() {
        return false;
    }

    let needed = screens.random_cycled_screen_count();
    if needed == 0 {
        return true;
    }

    let multiscreen_system = screens.is_multiscreen_system();
    let mut singlescreen_hits = 0;

    for wallpaper in candidates {
        if !wallpaper.is_selectable() || !wallpaper.is_in_cycle_window(now) {
            continue;
        }

        if wallpaper.is_multiscreen {
            if multiscreen_system {
                return true;
            }
        } else {
            singlescreen_hits += 1;
            if singlescreen_hits >= needed {
                return true;
            }
        }
    }

    false
}

/// Pick the wallpapers for the next cycle.
///
/// On success the picks are appended to `history`. When repeat avoidance
/// can't be honored this cycle the history is cleared before the picks are
/// recorded.
pub fn select_next<R: Rng>(
    candidates: &[Arc<Wallpaper>],
    history: &mut LastActiveWindow,
    ctx: &SelectionContext<'_>,
    rng: &mut R,
) -> Result<SelectionOutcome, SelectionError> {
    let slots = ctx.required_per_screen.len();
    let requested: usize = ctx.required_per_screen.iter().sum();

    if ctx.screens.random_cycled_screen_count() == 0 || requested == 0 {
        log::debug!("No screen needs a random wallpaper, skipping selection");
        return Ok(SelectionOutcome::static_only(slots));
    }

    let cloned = ctx.change_type == ChangeType::AllCloned;
    let multiscreen_system = ctx.screens.is_multiscreen_system();

    // Filter, accumulate and shuffle in one pass
    let mut pool: Vec<Arc<Wallpaper>> = Vec::with_capacity(candidates.len());
    let mut multi = PriorityStats::default();
    let mut single = PriorityStats::default();
    let mut single_by_screen = vec![0usize; slots];

    for wallpaper in candidates {
        if !wallpaper.is_selectable() {
            continue;
        }

        if wallpaper.is_multiscreen {
            if !multiscreen_system {
                continue;
            }
            multi.record(wallpaper.priority);
        } else {
            single.record(wallpaper.priority);
            for (slot, count) in single_by_screen.iter_mut().enumerate() {
                if cloned || !wallpaper.excludes_screen(slot) {
                    *count += 1;
                }
            }
        }

        let at = rng.random_range(0..=pool.len());
        pool.insert(at, Arc::clone(wallpaper));
    }

    if pool.is_empty() {
        return Err(SelectionError::InsufficientCandidates(
            ShortfallReason::EmptyPool,
        ));
    }

    let multiscreen = match (multi.sum > 0, single.sum > 0) {
        (true, false) => true,
        (false, true) => false,
        _ => {
            // One multiscreen pick competes against `requested` singlescreen picks
            let single_normalized = (single.sum / requested as u64).max(1);
            let draw = rng.random_range(1..=multi.sum + single_normalized);
            log::debug!(
                "Mode draw {} of {} (multiscreen weight {})",
                draw,
                multi.sum + single_normalized,
                multi.sum
            );
            draw <= multi.sum
        }
    };

    pool.retain(|w| w.is_multiscreen == multiscreen);
    // Stable, so equal priorities keep their shuffled order
    pool.sort_by_key(|w| w.priority);
    let max_priority = if multiscreen { multi.max } else { single.max };

    let required: Vec<usize> = if multiscreen {
        vec![1]
    } else {
        ctx.required_per_screen.to_vec()
    };
    let required_total: usize = required.iter().sum();

    if pool.len() < required_total {
        return Err(SelectionError::InsufficientCandidates(
            ShortfallReason::ModeShortfall {
                available: pool.len(),
                required: required_total,
            },
        ));
    }

    if !multiscreen {
        for (screen, (&available, &needed)) in single_by_screen.iter().zip(&required).enumerate() {
            if available < needed {
                return Err(SelectionError::InsufficientCandidates(
                    ShortfallReason::ScreenShortfall {
                        screen,
                        available,
                        required: needed,
                    },
                ));
            }
        }
    }

    let capacity =
        MIN_HISTORY_CAPACITY.max(pool.len() * usize::from(ctx.history_percentage) / 100);
    history.set_capacity(capacity);

    let history_hits = pool.iter().filter(|w| history.contains(w)).count();
    let avoid_repeats = pool.len() >= history_hits + required_total;
    if !avoid_repeats {
        log::debug!(
            "Repeat avoidance disabled this cycle ({} usable, {} recently shown, {} required)",
            pool.len(),
            history_hits,
            required_total
        );
    }

    let mut picks: Vec<Vec<Arc<Wallpaper>>> = vec![Vec::new(); required.len()];
    let mut remaining = required_total;
    // Cycle window, repeat avoidance and the priority threshold
    let mut honor_conditions = true;
    let mut honor_disabled = !multiscreen && !cloned;

    while remaining > 0 {
        if pool.is_empty() {
            debug_assert!(false, "candidate pool exhausted after feasibility check");
            log::error!("Candidate pool exhausted with {} picks missing", remaining);
            return Err(SelectionError::InsufficientCandidates(
                ShortfallReason::PoolExhausted,
            ));
        }

        let min_priority = if honor_conditions {
            rng.random_range(1..=max_priority.max(1))
        } else {
            0
        };
        let mut progressed = false;
        let mut deferred = false;
        let mut i = 0;

        while i < pool.len() && remaining > 0 {
            let wallpaper = &pool[i];

            if honor_conditions {
                let filtered_out = !wallpaper.is_in_cycle_window(ctx.now)
                    || (avoid_repeats && history.contains(wallpaper));

                if filtered_out {
                    if pool.len() > remaining {
                        pool.remove(i);
                        continue;
                    }
                    log::debug!("Too few wallpapers left, ignoring cycle conditions");
                    honor_conditions = false;
                } else if wallpaper.priority < min_priority {
                    deferred = true;
                    i += 1;
                    continue;
                }
            }

            let mut visited = vec![false; required.len()];
            if place(wallpaper, &mut picks, &required, honor_disabled, &mut visited) {
                pool.remove(i);
                remaining -= 1;
                progressed = true;
            } else {
                i += 1;
            }
        }

        // Every remaining wallpaper was tried against every reassignment of
        // the picks, so the open screens can't be filled without them
        if honor_disabled && remaining > 0 && !progressed && !deferred {
            log::debug!("No wallpaper fits the open screens, ignoring disabled screens");
            honor_disabled = false;
        }
    }

    if !avoid_repeats {
        history.clear();
    }
    for wallpaper in picks.iter().flatten() {
        history.add(Arc::clone(wallpaper));
    }

    log::debug!(
        "Selected {} {} wallpaper(s)",
        required_total,
        if multiscreen { "multiscreen" } else { "singlescreen" }
    );

    Ok(SelectionOutcome {
        multiscreen,
        picks_by_screen: picks,
    })
}

/// Put `wallpaper` into a slot it may use, moving earlier picks to other
/// slots they may use when that frees one up.
///
/// Slots marked in `visited` are already part of the current move chain.
fn place(
    wallpaper: &Arc<Wallpaper>,
    picks: &mut [Vec<Arc<Wallpaper>>],
    required: &[usize],
    honor_disabled: bool,
    visited: &mut [bool],
) -> bool {
    let allowed = |slot: usize| !honor_disabled || !wallpaper.excludes_screen(slot);

    if let Some(slot) = (0..required.len())
        .find(|&slot| picks[slot].len() < required[slot] && allowed(slot))
    {
        picks[slot].push(Arc::clone(wallpaper));
        return true;
    }

    for slot in 0..required.len() {
        if visited[slot] || required[slot] == 0 || !allowed(slot) {
            continue;
        }
        visited[slot] = true;

        for k in 0..picks[slot].len() {
            let displaced = Arc::clone(&picks[slot][k]);
            if place(&displaced, picks, required, honor_disabled, visited) {
                picks[slot][k] = Arc::clone(wallpaper);
                return true;
            }
        }
    }

    false
}
