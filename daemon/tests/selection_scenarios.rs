// Statistical and multi-cycle behavior of the selection engine.

use chrono::NaiveTime;
use common::{
    ChangeType, Rect, ScreenSettings, ScreenSettingsCollection, SelectionError, ShortfallReason,
    Wallpaper,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use wallcycle::history::{LastActiveWindow, MIN_HISTORY_CAPACITY};
use wallcycle::selection::{
    SelectionContext, SelectionOutcome, check_integrity, required_per_screen, select_next,
};

fn screens(count: usize) -> ScreenSettingsCollection {
    ScreenSettingsCollection::new(
        (0..count)
            .map(|i| ScreenSettings::new(Rect::new(i as i32 * 1920, 0, 1920, 1080)))
            .collect(),
    )
}

fn record(name: &str, priority: u8) -> Arc<Wallpaper> {
    let mut wallpaper = Wallpaper::new(format!("/wallpapers/{}.png", name));
    wallpaper.priority = priority;
    Arc::new(wallpaper)
}

fn multiscreen_record(name: &str, priority: u8) -> Arc<Wallpaper> {
    let mut wallpaper = Wallpaper::new(format!("/wallpapers/{}.png", name));
    wallpaper.priority = priority;
    wallpaper.is_multiscreen = true;
    Arc::new(wallpaper)
}

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).unwrap()
}

fn select(
    pool: &[Arc<Wallpaper>],
    history: &mut LastActiveWindow,
    screens: &ScreenSettingsCollection,
    history_percentage: u8,
    rng: &mut StdRng,
) -> Result<SelectionOutcome, SelectionError> {
    let required = required_per_screen(screens, ChangeType::AllSame, None);
    let ctx = SelectionContext {
        screens,
        required_per_screen: &required,
        change_type: ChangeType::AllSame,
        history_percentage,
        now: noon(),
    };
    select_next(pool, history, &ctx, rng)
}

fn frequencies(
    pool: &[Arc<Wallpaper>],
    trials: usize,
    seed: u64,
) -> HashMap<PathBuf, usize> {
    let screens = screens(1);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut counts = HashMap::new();

    for _ in 0..trials {
        let mut history = LastActiveWindow::default();
        let outcome = select(pool, &mut history, &screens, 30, &mut rng).unwrap();
        let picks: Vec<_> = outcome.picks().collect();
        assert_eq!(picks.len(), 1);
        *counts.entry(picks[0].image_path.clone()).or_insert(0) += 1;
    }
    counts
}

/// Probability of each record under the priority threshold scan: the
/// threshold is uniform in 1..=max and the lowest record reaching it wins.
fn threshold_distribution(priorities: &[u8]) -> Vec<f64> {
    let max = f64::from(*priorities.iter().max().unwrap());
    let mut previous = 0.0;
    priorities
        .iter()
        .map(|&p| {
            let p = f64::from(p);
            let share = (p - previous) / max;
            previous = p;
            share
        })
        .collect()
}

#[test]
fn test_priority_weighted_pick() {
    let priorities = [10u8, 20, 30, 40, 50];
    let pool: Vec<_> = priorities
        .iter()
        .map(|&p| record(&format!("p{p}"), p))
        .collect();
    let trials = 10_000;

    let counts = frequencies(&pool, trials, 42);
    let expected = threshold_distribution(&priorities);

    let chi_square: f64 = pool
        .iter()
        .zip(&expected)
        .map(|(wallpaper, share)| {
            let observed = *counts.get(&wallpaper.image_path).unwrap_or(&0) as f64;
            let expected = share * trials as f64;
            (observed - expected).powi(2) / expected
        })
        .sum();

    // 4 degrees of freedom, p = 0.001
    assert!(chi_square < 18.47, "chi-square {chi_square} too large: {counts:?}");

    // Higher priority never loses to lower priority by a wide margin
    let low = counts[&pool[0].image_path] as f64;
    let high = counts[&pool[4].image_path] as f64;
    assert!(high > low * 0.8);
}

#[test]
fn test_priority_gap_favors_higher() {
    let pool = vec![record("low", 10), record("high", 100)];
    let trials = 10_000;

    let counts = frequencies(&pool, trials, 7);
    let low_share = counts[&pool[0].image_path] as f64 / trials as f64;

    assert!((low_share - 0.1).abs() < 0.02, "low share {low_share}");
}

#[test]
fn test_multiscreen_mode_ratio() {
    let pool = vec![
        multiscreen_record("span", 100),
        record("a", 10),
        record("b", 10),
        record("c", 10),
    ];
    let screens = screens(2);
    let mut rng = StdRng::seed_from_u64(1234);
    let trials = 1_000;

    let mut multiscreen = 0;
    for _ in 0..trials {
        let mut history = LastActiveWindow::default();
        let outcome = select(&pool, &mut history, &screens, 30, &mut rng).unwrap();
        if outcome.multiscreen {
            multiscreen += 1;
            assert!(Arc::ptr_eq(outcome.pick_for(0).unwrap(), &pool[0]));
        } else {
            assert_eq!(outcome.picks().count(), 2);
        }
    }

    // Singlescreen weight is normalized by the two requested picks
    let expected = 100.0 / (100.0 + 30.0 / 2.0);
    let observed = f64::from(multiscreen) / trials as f64;
    assert!(
        (observed - expected).abs() < 0.05,
        "observed {observed}, expected {expected}"
    );
}

#[test]
fn test_exhausted_history_is_cleared() {
    let x = record("x", 100);
    let a = record("a", 100);
    let b = record("b", 100);
    let pool = vec![a.clone(), b.clone()];

    let mut history = LastActiveWindow::new(3);
    history.add(x.clone());
    history.add(a.clone());
    history.add(b.clone());

    let mut rng = StdRng::seed_from_u64(5);
    let outcome = select(&pool, &mut history, &screens(2), 30, &mut rng).unwrap();

    let picks: Vec<_> = outcome.picks().collect();
    assert_eq!(picks.len(), 2);
    assert!(picks.iter().any(|w| Arc::ptr_eq(w, &a)));
    assert!(picks.iter().any(|w| Arc::ptr_eq(w, &b)));

    // Cleared before the picks were recorded
    assert_eq!(history.len(), 2);
    assert!(!history.contains(&x));
    assert!(history.contains(&a) && history.contains(&b));
}

#[test]
fn test_all_static_screens_pass_integrity() {
    let mut settings: Vec<_> = screens(2).iter().cloned().collect();
    for screen in &mut settings {
        screen.cycle_randomly = false;
        screen.static_wallpaper = Some(Wallpaper::new("/wallpapers/static.png"));
    }
    let screens = ScreenSettingsCollection::new(settings);

    assert!(check_integrity(&[record("a", 0)], &screens, noon()));
}

#[test]
fn test_history_window_shift() {
    let records: Vec<_> = ["a", "b", "c", "d"].iter().map(|n| record(n, 100)).collect();
    let mut history = LastActiveWindow::new(3);
    for wallpaper in &records {
        history.add(wallpaper.clone());
    }

    let contents: Vec<_> = history.iter().collect();
    assert_eq!(contents.len(), 3);
    for (entry, expected) in contents.iter().zip(&records[1..]) {
        assert!(Arc::ptr_eq(entry, expected));
    }
}

#[test]
fn test_recent_wallpapers_not_repeated() {
    let pool: Vec<_> = (0..10).map(|i| record(&format!("w{i}"), 100)).collect();
    let screens = screens(1);
    let mut history = LastActiveWindow::default();
    let mut rng = StdRng::seed_from_u64(99);

    for _ in 0..200 {
        let before = history.clone();
        let outcome = select(&pool, &mut history, &screens, 50, &mut rng).unwrap();

        for pick in outcome.picks() {
            assert!(!before.contains(pick), "{} repeated", pick.image_path.display());
        }
        assert_eq!(history.capacity(), 5);
    }
}

#[test]
fn test_disabled_screen_never_assigned() {
    let mut pool: Vec<_> = (0..8).map(|i| record(&format!("both{i}"), 100)).collect();
    for i in 0..2 {
        let mut wallpaper = Wallpaper::new(format!("/wallpapers/left{i}.png"));
        wallpaper.disabled_screens.insert(1);
        pool.push(Arc::new(wallpaper));
    }

    let screens = screens(2);
    let mut history = LastActiveWindow::default();
    let mut rng = StdRng::seed_from_u64(17);
    let mut left_only_on_first = 0;

    for _ in 0..500 {
        let outcome = select(&pool, &mut history, &screens, 30, &mut rng).unwrap();
        assert_eq!(outcome.picks_by_screen.len(), 2);
        for pick in &outcome.picks_by_screen[1] {
            assert!(!pick.excludes_screen(1), "{}", pick.image_path.display());
        }
        left_only_on_first += outcome.picks_by_screen[0]
            .iter()
            .filter(|w| w.excludes_screen(1))
            .count();
    }

    // The restricted wallpapers are still used on the screen they allow
    assert!(left_only_on_first > 0);
}

#[test]
fn test_disabled_screen_respected_with_two_records() {
    let both = record("both", 10);
    let mut left_only = Wallpaper::new("/wallpapers/left_only.png");
    left_only.priority = 50;
    left_only.disabled_screens.insert(1);
    let left_only = Arc::new(left_only);
    let pool = vec![both.clone(), left_only.clone()];

    let screens = screens(2);
    let mut history = LastActiveWindow::default();
    let mut rng = StdRng::seed_from_u64(1000);

    for _ in 0..1000 {
        let outcome = select(&pool, &mut history, &screens, 30, &mut rng).unwrap();
        assert!(Arc::ptr_eq(outcome.pick_for(0).unwrap(), &left_only));
        assert!(Arc::ptr_eq(outcome.pick_for(1).unwrap(), &both));
    }
}

#[test]
fn test_out_of_window_skipped_when_enough_remain() {
    let mut pool: Vec<_> = (0..3).map(|i| record(&format!("day{i}"), 100)).collect();
    for i in 0..3 {
        let mut wallpaper = Wallpaper::new(format!("/wallpapers/night{i}.png"));
        wallpaper.only_cycle_between_start = NaiveTime::from_hms_opt(0, 0, 0).unwrap();
        wallpaper.only_cycle_between_stop = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        pool.push(Arc::new(wallpaper));
    }

    let screens = screens(1);
    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..300 {
        let mut history = LastActiveWindow::default();
        let outcome = select(&pool, &mut history, &screens, 30, &mut rng).unwrap();
        for pick in outcome.picks() {
            assert!(pick.is_in_cycle_window(noon()));
        }
    }
}

#[test]
fn test_history_stays_bounded() {
    let screens = screens(2);
    let mut history = LastActiveWindow::default();
    let mut rng = StdRng::seed_from_u64(2024);

    for round in 0..300usize {
        // Shrinking and growing pools recompute the capacity every cycle
        let size = 2 + round % 25;
        let pool: Vec<_> = (0..size).map(|i| record(&format!("r{i}"), 100)).collect();

        select(&pool, &mut history, &screens, 40, &mut rng).unwrap();

        assert!(history.capacity() >= MIN_HISTORY_CAPACITY);
        assert!(history.len() <= history.capacity());
    }
}

#[test]
fn test_unusable_pools_fail() {
    let screens = screens(1);
    let mut rng = StdRng::seed_from_u64(0);
    let mut history = LastActiveWindow::default();

    let zero = vec![record("a", 0), record("b", 0)];
    assert_eq!(
        select(&zero, &mut history, &screens, 30, &mut rng).unwrap_err(),
        SelectionError::InsufficientCandidates(ShortfallReason::EmptyPool)
    );
    assert!(select(&[], &mut history, &screens, 30, &mut rng).is_err());
}
