//! Fake-wall detection: baseline-relative z-scores, the sign-divergence
//! branch, the secondary feature score, and the trap step inside the
//! pipeline.

mod common;

use std::sync::Arc;

use common::{RecordingEmitter, calm_market, order, paper_account, pipeline};
use warden_core::admission::{
    AuditKind, GateStep, GateVerdict, MarketSnapshot, ReasonCode, Severity,
};
use warden_core::microstructure::trap::{REPLENISH_LATENCY_CEILING_MS, Z_CLIP};
use warden_core::microstructure::{TrapWindow, cancel_ratio, replenish_latency_ms, trap_feature_score};

// --- Feature score (unit) ---------------------------------------------

#[test]
fn test_cancel_burst_scores_high() {
    // 900 cancels vs 50 adds over a 2s window: ratio 0.947, 40ms replenish.
    let ratio = cancel_ratio(450.0, 25.0);
    let latency = replenish_latency_ms(25.0);
    assert!((ratio - 0.947368).abs() < 1e-6);
    assert!((latency - 40.0).abs() < 1e-9);

    let score = trap_feature_score(ratio, latency);
    assert!((score - 0.8762).abs() < 1e-3, "got {score}");
}

#[test]
fn test_balanced_flow_scores_low() {
    let score = trap_feature_score(0.5, 100.0);
    assert!((score - 0.3375).abs() < 1e-3, "got {score}");
    assert!(score < 0.65);
}

#[test]
fn test_idle_window_scores_near_zero_but_not_zero() {
    let score = trap_feature_score(cancel_ratio(0.0, 0.0), replenish_latency_ms(0.0));
    assert!(score > 0.0);
    assert!(score < 0.05);
}

#[test]
fn test_feature_inputs_are_sanitized() {
    assert_eq!(cancel_ratio(0.0, 0.0), 0.0);
    assert_eq!(cancel_ratio(5.0, 0.0), 1.0);
    assert_eq!(replenish_latency_ms(0.0), REPLENISH_LATENCY_CEILING_MS);
    assert_eq!(replenish_latency_ms(f64::NAN), REPLENISH_LATENCY_CEILING_MS);
    assert!(replenish_latency_ms(1e9) < 1.0);

    // Garbage in, quiet score out.
    let score = trap_feature_score(f64::NAN, f64::NAN);
    assert!(score < 0.05);
}

// --- Window and z-score (unit) ---------------------------------------

#[test]
fn test_first_observation_has_no_baseline() {
    let mut w = TrapWindow::new(2.0, 10);
    let reading = w.update(&[900.0], &[50.0], 3, 2.5, 90.0, None, None);
    assert_eq!(reading.z, 0.0);
    assert!(!reading.flag);
    assert!((reading.cancel_rate - 450.0).abs() < 1e-9);
    assert!((reading.repl_rate - 25.0).abs() < 1e-9);
    assert_eq!(w.baseline_len(), 1);
}

#[test]
fn test_spike_against_flat_baseline_clips_at_z_cap() {
    let mut w = TrapWindow::new(2.0, 10);
    for _ in 0..3 {
        w.update(&[0.0], &[0.0], 0, 2.5, 90.0, None, None);
    }
    let reading = w.update(&[1_000.0], &[0.0], 0, 2.5, 90.0, None, None);
    assert_eq!(reading.z, Z_CLIP);
    assert!(reading.flag);
}

#[test]
fn test_sign_divergence_with_elevated_cancels_flags() {
    let mut w = TrapWindow::new(1.0, 10);
    for _ in 0..5 {
        w.update(&[100.0], &[100.0], 10, 2.5, 90.0, None, None);
    }

    // Same flow shape, so z stays at zero; opposing imbalance signs plus a
    // cancel rate at the baseline percentile trip the divergence branch.
    let reading = w.update(&[100.0], &[100.0], 10, 2.5, 90.0, Some(1.0), Some(-1.0));
    assert_eq!(reading.z, 0.0);
    assert!(reading.flag);

    let control = w.update(&[100.0], &[100.0], 10, 2.5, 90.0, Some(1.0), Some(1.0));
    assert!(!control.flag, "aligned signs must not trip");

    let unscored = w.update(&[100.0], &[100.0], 10, 2.5, 90.0, None, Some(-1.0));
    assert!(!unscored.flag, "missing sign must not trip");
}

#[test]
fn test_depth_truncation_and_negative_deltas() {
    let mut w = TrapWindow::new(1.0, 2);
    let reading = w.update(&[10.0, 10.0, 999.0], &[10.0, -5.0], 1, 2.5, 90.0, None, None);
    assert!((reading.cancel_rate - 20.0).abs() < 1e-9, "third level must be ignored");
    assert!((reading.repl_rate - 10.0).abs() < 1e-9, "negative delta floors at zero");
}

// --- Through the pipeline --------------------------------------------

#[test]
fn test_cancel_burst_denies_and_audits() {
    let emitter = Arc::new(RecordingEmitter::default());
    let p = pipeline().with_emitter(emitter.clone());

    let market = MarketSnapshot {
        trap_cancel_deltas: Some(vec![900.0]),
        trap_add_deltas: Some(vec![50.0]),
        trap_trades_cnt: Some(3),
        ..calm_market()
    };
    let d = p
        .decide(&paper_account(), &order("BTC-PERP"), &market, 0.5)
        .unwrap();

    assert!(!d.allow);
    assert_eq!(d.reason, ReasonCode::TrapSuspected);
    let trap = d.observability.trap.as_ref().unwrap();
    assert!(trap.tripped);
    assert!(trap.feature_score > 0.65);
    assert!(
        d.observability
            .reasons
            .iter()
            .any(|r| r.starts_with("trap:"))
    );

    let events = emitter.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditKind::TrapTrip);
    assert_eq!(events[0].severity, Severity::Warn);
    assert_eq!(events[0].code, ReasonCode::TrapSuspected);
    assert_eq!(events[0].symbol, "BTC-PERP");
}

#[test]
fn test_balanced_flow_passes_through() {
    let p = pipeline();
    let market = MarketSnapshot {
        trap_cancel_deltas: Some(vec![20.0]),
        trap_add_deltas: Some(vec![20.0]),
        trap_trades_cnt: Some(10),
        ..calm_market()
    };
    let d = p
        .decide(&paper_account(), &order("BTC-PERP"), &market, 0.5)
        .unwrap();

    assert!(d.allow);
    let trap = d.observability.trap.as_ref().unwrap();
    assert!(!trap.tripped);
    assert!(trap.feature_score < 0.65);
}

#[test]
fn test_denied_requests_never_feed_the_detector() {
    let p = pipeline();
    let market = MarketSnapshot {
        latency_ms: 500.0,
        trap_cancel_deltas: Some(vec![900.0]),
        trap_add_deltas: Some(vec![50.0]),
        trap_trades_cnt: Some(3),
        ..calm_market()
    };
    let d = p
        .decide(&paper_account(), &order("BTC-PERP"), &market, 0.5)
        .unwrap();

    assert_eq!(d.reason, ReasonCode::LatencyExceeded);
    let verdict = d
        .observability
        .gates
        .iter()
        .find(|e| e.gate == GateStep::Trap)
        .unwrap()
        .verdict;
    assert_eq!(verdict, GateVerdict::Skipped);
    assert!(d.observability.trap.is_none());
}

#[test]
fn test_absent_feeds_disengage_the_detector() {
    let p = pipeline();
    let d = p
        .decide(&paper_account(), &order("BTC-PERP"), &calm_market(), 0.5)
        .unwrap();

    assert!(d.allow);
    let verdict = d
        .observability
        .gates
        .iter()
        .find(|e| e.gate == GateStep::Trap)
        .unwrap()
        .verdict;
    assert_eq!(verdict, GateVerdict::Disengaged);
    assert!(d.observability.trap.is_none());
}
