//! Property tests for detection rules and the decision engine

use chrono::Utc;
use handover_recovery::{
    Anomaly, AnomalySeverity, AnomalyType, DecisionOutcome, DetectionRules, DetectorConfig,
    EngineConfig, FallbackDecisionEngine, FallbackStrategy, HandoverContext, NetworkConditions,
    SignalSnapshot, StatisticsStore,
};
use orbital_mechanics::GeoPosition;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

fn base_context() -> HandoverContext {
    HandoverContext::new("ue-p", "SAT_A", "SAT_B", GeoPosition::new(0.0, 0.0))
}

fn engine() -> FallbackDecisionEngine {
    FallbackDecisionEngine::new(EngineConfig::default(), Arc::new(StatisticsStore::new())).unwrap()
}

fn any_type() -> impl Strategy<Value = AnomalyType> {
    prop::sample::select(AnomalyType::ALL.to_vec())
}

fn any_severity() -> impl Strategy<Value = AnomalySeverity> {
    prop::sample::select(AnomalySeverity::ALL.to_vec())
}

fn any_measure() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        Just(None),
        Just(Some(f64::NAN)),
        Just(Some(f64::INFINITY)),
        (-200.0f64..50.0).prop_map(Some),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn no_signal_anomaly_at_or_above_thresholds(rsrp_above in 0.0f64..60.0, sinr_above in 0.0f64..30.0) {
        let config = DetectorConfig::default();
        let rules = DetectionRules::new(config.clone(), None).unwrap();
        let ctx = base_context().with_signal(SignalSnapshot::new(
            config.rsrp_threshold_dbm + rsrp_above,
            config.sinr_threshold_db + sinr_above,
        ));
        let found = rules.evaluate(&ctx, Utc::now());
        prop_assert!(found.iter().all(|a| a.anomaly_type != AnomalyType::SignalDegradation));
    }

    #[test]
    fn signal_anomaly_just_below_threshold(below in 0.001f64..40.0) {
        let config = DetectorConfig::default();
        let rules = DetectionRules::new(config.clone(), None).unwrap();
        let ctx = base_context().with_signal(SignalSnapshot::new(config.rsrp_threshold_dbm - below, 20.0));
        let found = rules.evaluate(&ctx, Utc::now());
        prop_assert!(found.iter().any(|a| a.anomaly_type == AnomalyType::SignalDegradation));
    }

    #[test]
    fn decide_fallback_is_total(
        anomaly_type in any_type(),
        severity in any_severity(),
        retries in 0u32..20,
        rsrp in any_measure(),
        congestion in any_measure(),
        load in any_measure(),
        budget in any_measure(),
        alternatives in prop::collection::vec("SAT_[A-F]", 0..6),
    ) {
        let e = engine();
        let mut ctx = base_context()
            .with_signal(SignalSnapshot { rsrp_dbm: rsrp, sinr_db: None })
            .with_network(NetworkConditions {
                interference_level: None,
                congestion_level: congestion,
                latency_ms: None,
                system_load: load,
            })
            .with_alternatives(alternatives.clone());
        ctx.retry_count = retries;
        ctx.time_budget_s = budget;
        if let Some(r) = rsrp {
            for sat in &alternatives {
                ctx.alternative_rsrp_dbm.insert(sat.clone(), r);
            }
        }

        let anomaly = Anomaly::new(anomaly_type, severity, &ctx, Utc::now(), vec![], BTreeMap::new());
        let action = e.decide_fallback(&anomaly, &ctx);

        let eligible = e
            .priority_table()
            .get(&(anomaly_type, severity))
            .cloned()
            .unwrap_or_default();
        prop_assert!(
            eligible.contains(&action.strategy) || action.strategy == FallbackStrategy::EmergencyFallback
        );
        prop_assert!((1..=10).contains(&action.priority));
        prop_assert!((0.0..=1.0).contains(&action.confidence));
        prop_assert!(action.estimated_recovery_time_s.is_finite());
        if action.strategy == FallbackStrategy::SelectAlternativeSatellite {
            let target = action.target_satellite.clone().unwrap_or_default();
            prop_assert!(target != "SAT_A" && target != "SAT_B");
            prop_assert!(alternatives.contains(&target));
        }
        prop_assert_eq!(e.open_decisions(), 1);
    }

    #[test]
    fn success_rate_converges_to_observed_ratio(outcomes in prop::collection::vec(any::<bool>(), 1..120)) {
        let e = engine();
        let ctx = base_context();
        for ok in &outcomes {
            // CRITICAL timeouts always resolve to the emergency fallback
            let anomaly = Anomaly::new(
                AnomalyType::Timeout,
                AnomalySeverity::Critical,
                &ctx,
                Utc::now(),
                vec![],
                BTreeMap::new(),
            );
            let action = e.decide_fallback(&anomaly, &ctx);
            let outcome = if *ok { DecisionOutcome::Success } else { DecisionOutcome::Failure };
            e.record_outcome(&action.action_id, outcome, 1.5, *ok).unwrap();
        }

        let expected = outcomes.iter().filter(|ok| **ok).count() as f64 / outcomes.len() as f64;
        let stats = e.statistics()[&FallbackStrategy::EmergencyFallback].clone();
        prop_assert_eq!(stats.total_attempts, outcomes.len() as u64);
        let rate = stats.success_rate().unwrap_or(-1.0);
        prop_assert!((rate - expected).abs() < 1e-12);
        prop_assert!((stats.average_recovery_time_s - 1.5).abs() < 1e-9);
    }
}
