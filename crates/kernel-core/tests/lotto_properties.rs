use chrono::{DateTime, Utc};
use contracts::{
    EngineConfig, LootDraft, TierName, UniverseRecord, INSTABILITY_MAX, INSTABILITY_MIN,
};
use kernel_core::draw;
use kernel_core::drop_rate::{DropRateError, DropRates};
use kernel_core::economy::try_debit;
use kernel_core::scheduler::TickKind;
use kernel_core::store::{InMemoryStore, UniverseStore};
use kernel_core::{DispatchOutcome, LottoEngine};
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn record(instability: f64, threshold: f64) -> UniverseRecord {
    UniverseRecord {
        instability,
        collapse_threshold: threshold,
        last_collapse_at: None,
        total_messages: 0,
        collapse_count: 0,
    }
}

fn engine_with(
    seed: u64,
    starting_credits: i64,
    universe: UniverseRecord,
) -> LottoEngine<InMemoryStore> {
    let config = EngineConfig {
        seed: Some(seed),
        starting_credits,
        ..EngineConfig::default()
    };
    LottoEngine::open(config, InMemoryStore::with_universe(universe))
        .expect("engine opens")
        .with_clock(epoch)
}

fn tick_kind(code: u8, user_id: u64) -> TickKind {
    match code % 5 {
        0 => TickKind::Message,
        1 => TickKind::Pull(user_id),
        2 => TickKind::Stabilize(user_id),
        3 => TickKind::PassiveGrowth,
        _ => TickKind::CollapseCheck,
    }
}

#[test]
fn base_distribution_matches_table_at_zero() {
    let rates = DropRates::at(0.0).expect("valid instability");
    assert!((rates.probability(TierName::Common) - 0.60).abs() < 1e-12);
    assert!((rates.probability(TierName::RealityBreaker) - 0.002).abs() < 1e-12);
}

#[test]
fn out_of_range_instability_is_a_defect() {
    for bad in [-0.001, 100.001, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            DropRates::at(bad),
            Err(DropRateError::InvalidInstabilityInput(_))
        ));
    }
}

#[test]
fn seeded_draws_at_zero_track_base_weights() {
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let trials = 100_000;
    let mut counts = [0_u64; 6];
    for _ in 0..trials {
        let drawn = draw::draw(0.0, &mut rng).expect("valid instability");
        counts[drawn.tier.rank()] += 1;
    }

    let common_share = counts[TierName::Common.rank()] as f64 / trials as f64;
    assert!((0.55..=0.65).contains(&common_share), "common={common_share}");
    let rare_share = counts[TierName::Rare.rank()] as f64 / trials as f64;
    assert!((0.23..=0.27).contains(&rare_share), "rare={rare_share}");
}

#[test]
fn high_instability_shifts_draws_toward_rare_tiers() {
    let mut calm = ChaCha8Rng::seed_from_u64(11);
    let mut stormy = ChaCha8Rng::seed_from_u64(11);
    let trials = 50_000;
    let top_tier_hits = |instability: f64, rng: &mut ChaCha8Rng| {
        (0..trials)
            .filter(|_| {
                let drawn = draw::draw(instability, rng).expect("valid instability");
                drawn.tier.rank() >= TierName::Legendary.rank()
            })
            .count()
    };

    let calm_hits = top_tier_hits(0.0, &mut calm);
    let stormy_hits = top_tier_hits(100.0, &mut stormy);
    assert!(stormy_hits > calm_hits * 3, "calm={calm_hits} stormy={stormy_hits}");
}

#[test]
fn repeated_pulls_near_the_ceiling_stay_clamped() {
    let mut engine = engine_with(3, 1_000, record(99.9, 99.0));
    for _ in 0..200 {
        let outcome = engine.handle_pull(1).expect("pull");
        assert!(outcome.success);
        assert!(outcome.warning);
        assert!(outcome.instability <= INSTABILITY_MAX);
    }
    assert_eq!(engine.instability(), INSTABILITY_MAX);
}

#[test]
fn stabilize_near_the_floor_clamps_to_zero() {
    let mut engine = engine_with(3, 100, record(2.0, 97.0));
    let outcome = engine.handle_stabilize(1).expect("stabilize");
    assert!(outcome.success);
    assert_eq!(outcome.instability, INSTABILITY_MIN);
    assert!(outcome.delta.expect("delta") >= 5.0);
}

#[test]
fn collapse_scenario_from_ninety_six() {
    let mut engine = engine_with(96, 10, record(96.0, 95.0));
    for owner in 0..1_000 {
        engine.store_mut().insert_loot(LootDraft {
            owner_id: owner % 7,
            tier: TierName::Rare,
            item_name: "Golden Feather".to_string(),
            acquired_at: epoch(),
        });
    }

    let report = engine
        .on_collapse_check_tick()
        .expect("check")
        .expect("collapse");

    let removed_share = report.removed_items as f64 / report.total_items_before as f64;
    assert!(
        (removed_share - report.wipe_fraction).abs() < 0.08,
        "removed={removed_share} p={}",
        report.wipe_fraction
    );
    assert_eq!(engine.instability(), 0.0);
    let status = engine.get_status().expect("status");
    assert!((95.0..=99.0).contains(&status.threshold));
    assert_eq!(status.collapse_count, 1);
    assert_eq!(status.last_collapse_at, Some(epoch()));
}

proptest! {
    #[test]
    fn drop_rates_always_sum_to_one(instability in 0.0_f64..=100.0) {
        let rates = DropRates::at(instability).expect("valid instability");
        let total = rates.iter().map(|(_, probability)| probability).sum::<f64>();
        prop_assert!((total - 1.0).abs() < 1e-9);
        prop_assert!(rates.iter().all(|(_, probability)| probability > 0.0));
    }

    #[test]
    fn rarer_tiers_never_lose_share_as_instability_rises(
        low in 0.0_f64..=100.0,
        high in 0.0_f64..=100.0,
    ) {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        let calm = DropRates::at(low).expect("valid instability");
        let stormy = DropRates::at(high).expect("valid instability");

        prop_assert!(stormy.probability(TierName::Common) <= calm.probability(TierName::Common) + 1e-12);
        prop_assert!(stormy.probability(TierName::Rare) <= calm.probability(TierName::Rare) + 1e-12);
        for tier in [TierName::Legendary, TierName::Mythic, TierName::RealityBreaker] {
            prop_assert!(stormy.probability(tier) + 1e-12 >= calm.probability(tier));
        }
    }

    #[test]
    fn instability_stays_in_range_under_any_event_sequence(
        seed in 0_u64..10_000,
        start in 0.0_f64..=100.0,
        events in prop::collection::vec((0_u8..5, 0_u64..4), 1..150),
    ) {
        let mut engine = engine_with(seed, 500, record(start, 97.0));
        for (code, user_id) in events {
            engine.dispatch(tick_kind(code, user_id)).expect("dispatch");
            let instability = engine.instability();
            prop_assert!((INSTABILITY_MIN..=INSTABILITY_MAX).contains(&instability));
        }
    }

    #[test]
    fn credits_never_go_negative(
        seed in 0_u64..10_000,
        starting_credits in 0_i64..40,
        events in prop::collection::vec(any::<bool>(), 1..80),
    ) {
        let mut engine = engine_with(seed, starting_credits, record(10.0, 97.0));
        for pull in events {
            let before = engine.account(1).expect("account").credits;
            let (success, after) = if pull {
                let outcome = engine.handle_pull(1).expect("pull");
                (outcome.success, outcome.credits_remaining)
            } else {
                let outcome = engine.handle_stabilize(1).expect("stabilize");
                (outcome.success, outcome.credits_remaining)
            };
            let cost = if pull { 1 } else { 10 };

            prop_assert_eq!(success, before >= cost);
            prop_assert_eq!(after, if success { before - cost } else { before });
            prop_assert!(after >= 0);
        }
    }

    #[test]
    fn try_debit_is_check_then_decrement(credits in 0_i64..1_000, amount in -5_i64..1_000) {
        let mut account = contracts::Account::new(1, credits);
        let debited = try_debit(&mut account, amount);
        prop_assert_eq!(debited, amount > 0 && credits >= amount);
        prop_assert!(account.credits >= 0);
    }

    #[test]
    fn collapse_resets_and_redraws_threshold(
        seed in 0_u64..10_000,
        threshold in 95.0_f64..99.0,
        overshoot in 0.001_f64..1.0,
        items in 0_u64..300,
    ) {
        let mut engine = engine_with(seed, 10, record(threshold + overshoot, threshold));
        for owner in 0..items {
            engine.store_mut().insert_loot(LootDraft {
                owner_id: owner,
                tier: TierName::Common,
                item_name: "Rusty Coin".to_string(),
                acquired_at: epoch(),
            });
        }

        let outcome = engine.dispatch(TickKind::CollapseCheck).expect("check");
        let DispatchOutcome::CollapseCheck(Some(report)) = outcome else {
            return Err(TestCaseError::fail("collapse did not fire"));
        };

        prop_assert_eq!(engine.instability(), 0.0);
        prop_assert!((95.0..=99.0).contains(&report.new_threshold));
        prop_assert!((0.5..=0.8).contains(&report.wipe_fraction));
        prop_assert_eq!(report.total_items_before, items);
        prop_assert_eq!(
            engine.store().loot_ids().expect("ids").len() as u64,
            items - report.removed_items
        );
    }

    #[test]
    fn no_collapse_at_or_below_threshold(
        seed in 0_u64..10_000,
        threshold in 95.0_f64..99.0,
        undershoot in 0.0_f64..95.0,
    ) {
        let mut engine = engine_with(seed, 10, record(threshold - undershoot, threshold));
        prop_assert_eq!(engine.on_collapse_check_tick().expect("check"), None);
    }

    #[test]
    fn same_seed_same_outcomes(
        seed in 0_u64..10_000,
        events in prop::collection::vec((0_u8..5, 0_u64..3), 1..40),
    ) {
        let mut left = engine_with(seed, 50, record(40.0, 96.0));
        let mut right = engine_with(seed, 50, record(40.0, 96.0));
        for (code, user_id) in events {
            let kind = tick_kind(code, user_id);
            prop_assert_eq!(
                left.dispatch(kind).expect("dispatch"),
                right.dispatch(kind).expect("dispatch")
            );
        }
    }
}
