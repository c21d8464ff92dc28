//! Supervision loops feeding the fallback consumer

use chrono::{Duration as ChronoDuration, Utc};
use handover_recovery::{
    spawn_fallback_consumer, AnomalyDetector, AnomalyHistory, AnomalySeverity, AnomalyType,
    DecisionOutcome, DetectorConfig, EngineConfig, FallbackDecisionEngine, FallbackStrategy,
    HandoverContext, NetworkConditions, RecoveryDecision, SignalSnapshot, StatisticsStore,
};
use orbital_mechanics::{GeoPosition, SatelliteReachability};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn fast_config() -> DetectorConfig {
    DetectorConfig {
        poll_interval_ms: 10,
        ..DetectorConfig::default()
    }
}

fn context(elapsed_s: i64) -> HandoverContext {
    HandoverContext::new("ue-42", "SAT_A", "SAT_B", GeoPosition::new(25.0, 121.5))
        .with_started_at(Utc::now() - ChronoDuration::seconds(elapsed_s))
        .with_signal(SignalSnapshot::new(-92.0, 14.0))
        .with_alternatives(["SAT_A", "SAT_B", "SAT_C"])
}

struct Pipeline {
    detector: AnomalyDetector,
    engine: Arc<FallbackDecisionEngine>,
    decisions: mpsc::Receiver<RecoveryDecision>,
    history: Arc<AnomalyHistory>,
}

fn pipeline(
    config: DetectorConfig,
    reachability: Option<Arc<dyn SatelliteReachability>>,
) -> Pipeline {
    let history = Arc::new(AnomalyHistory::new());
    let (detector, escalations) =
        AnomalyDetector::new(config, reachability, Arc::clone(&history)).unwrap();
    let engine = Arc::new(
        FallbackDecisionEngine::new(EngineConfig::default(), Arc::new(StatisticsStore::new()))
            .unwrap(),
    );
    let (tx, decisions) = mpsc::channel(64);
    spawn_fallback_consumer(Arc::clone(&engine), escalations, tx);
    Pipeline {
        detector,
        engine,
        decisions,
        history,
    }
}

#[tokio::test]
async fn test_twelve_second_handover_escalates_one_timeout() {
    let mut p = pipeline(fast_config(), None);
    let id = p.detector.start_supervision(context(12)).unwrap();

    let decision = timeout(Duration::from_secs(2), p.decisions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.anomaly.anomaly_type, AnomalyType::Timeout);
    assert_eq!(decision.anomaly.severity, AnomalySeverity::High);
    assert_eq!(decision.action.handover_id, id);

    // several more polls at the same severity
    tokio::time::sleep(Duration::from_millis(60)).await;
    p.detector.stop_supervision(&id).await.unwrap();

    let recorded = p.history.for_handover(&id);
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].anomaly_type, AnomalyType::Timeout);
    assert!(p.decisions.try_recv().is_err());
    assert_eq!(p.engine.open_decisions(), 1);
}

#[tokio::test]
async fn test_signal_degradation_picks_alternative_or_rollback() {
    let mut p = pipeline(fast_config(), None);
    let ctx = context(1).with_signal(SignalSnapshot::new(-115.0, 2.0));
    let id = p.detector.start_supervision(ctx).unwrap();

    let decision = timeout(Duration::from_secs(2), p.decisions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.anomaly.anomaly_type, AnomalyType::SignalDegradation);
    assert_eq!(decision.anomaly.severity, AnomalySeverity::High);
    assert!(matches!(
        decision.action.strategy,
        FallbackStrategy::SelectAlternativeSatellite | FallbackStrategy::RollbackToSource
    ));

    p.engine
        .record_outcome(&decision.action.action_id, DecisionOutcome::Success, 1.8, true)
        .unwrap();
    assert_eq!(p.engine.performance_metrics().successful_decisions, 1);
    p.detector.stop_supervision(&id).await;
}

#[tokio::test]
async fn test_medium_waits_for_recheck() {
    let mut p = pipeline(fast_config(), None);
    let ctx = context(0).with_network(NetworkConditions {
        interference_level: Some(0.8),
        ..NetworkConditions::default()
    });
    let id = p.detector.start_supervision(ctx).unwrap();

    let decision = timeout(Duration::from_secs(2), p.decisions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.anomaly.anomaly_type, AnomalyType::InterferenceDetected);
    assert_eq!(decision.anomaly.severity, AnomalySeverity::Medium);

    // raising interference escalates again at HIGH
    p.detector
        .update_context(&id, |c| c.network.interference_level = Some(0.95))
        .unwrap();
    let decision = timeout(Duration::from_secs(2), p.decisions.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(decision.anomaly.severity, AnomalySeverity::High);

    p.detector.stop_supervision(&id).await;
    let counts = p.history.counts_by_type();
    assert_eq!(counts[&AnomalyType::InterferenceDetected], 2);
}

struct Unreachable;

impl SatelliteReachability for Unreachable {
    fn is_reachable(&self, _satellite_id: &str) -> bool {
        false
    }
}

#[tokio::test]
async fn test_stop_halts_loop_before_returning() {
    let mut p = pipeline(fast_config(), Some(Arc::new(Unreachable)));
    let ids: Vec<String> = (0..4)
        .map(|_| p.detector.start_supervision(context(0)).unwrap())
        .collect();
    assert_eq!(p.detector.active_count(), 4);

    for _ in 0..4 {
        let d = timeout(Duration::from_secs(2), p.decisions.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(d.anomaly.anomaly_type, AnomalyType::TargetUnavailable);
    }

    p.detector.shutdown().await;
    assert_eq!(p.detector.active_count(), 0);

    let before = p.history.len();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(p.history.len(), before);
    for id in ids {
        assert!(!p.detector.is_supervising(&id));
    }
}
