//! Anomaly Detector
//!
//! One supervision task per open handover context. Each task polls the
//! detection rules at a fixed interval and:
//!
//! - records every new (type, severity) pair in the anomaly history
//! - escalates HIGH and CRITICAL anomalies to the fallback consumer at once
//! - escalates MEDIUM anomalies that persist for `medium_recheck_ticks`
//! - only logs LOW anomalies
//!
//! A type is escalated again for the same context only when its severity
//! rises. `stop_supervision` waits for the task to exit before returning.

use crate::context::HandoverContext;
use crate::history::AnomalyHistory;
use crate::rules::{DetectionRules, DetectorConfig};
use crate::{Anomaly, AnomalySeverity, AnomalyType, RecoveryError, Result};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use orbital_mechanics::SatelliteReachability;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// An anomaly handed to the fallback consumer, with the context as it was
/// when the anomaly fired
#[derive(Debug, Clone)]
pub struct Escalation {
    pub anomaly: Anomaly,
    pub context: HandoverContext,
}

struct Supervised {
    context: Arc<RwLock<HandoverContext>>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Per-context escalation bookkeeping
#[derive(Debug)]
struct EscalationTracker {
    medium_recheck_ticks: u32,
    recorded: HashMap<AnomalyType, AnomalySeverity>,
    escalated: HashMap<AnomalyType, AnomalySeverity>,
    medium_streak: HashMap<AnomalyType, u32>,
}

#[derive(Debug, Default)]
struct TickOutcome {
    record: Vec<Anomaly>,
    escalate: Vec<Anomaly>,
}

impl EscalationTracker {
    fn new(medium_recheck_ticks: u32) -> Self {
        Self {
            medium_recheck_ticks,
            recorded: HashMap::new(),
            escalated: HashMap::new(),
            medium_streak: HashMap::new(),
        }
    }

    fn observe(&mut self, anomalies: Vec<Anomaly>) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        let fired: Vec<AnomalyType> = anomalies.iter().map(|a| a.anomaly_type).collect();

        self.recorded.retain(|t, _| fired.contains(t));
        self.medium_streak.retain(|t, _| fired.contains(t));

        for anomaly in anomalies {
            let kind = anomaly.anomaly_type;
            let severity = anomaly.severity;

            if severity != AnomalySeverity::Medium {
                self.medium_streak.remove(&kind);
            }

            let already = self.escalated.get(&kind).is_some_and(|s| *s >= severity);
            let escalate = !already
                && match severity {
                    AnomalySeverity::High | AnomalySeverity::Critical => true,
                    AnomalySeverity::Medium => {
                        let streak = self.medium_streak.entry(kind).or_insert(0);
                        *streak += 1;
                        *streak >= self.medium_recheck_ticks
                    }
                    AnomalySeverity::Low => false,
                };
            if escalate {
                self.escalated.insert(kind, severity);
                self.medium_streak.remove(&kind);
                outcome.escalate.push(anomaly.clone());
            }

            if self.recorded.get(&kind) != Some(&severity) {
                self.recorded.insert(kind, severity);
                outcome.record.push(anomaly);
            }
        }
        outcome
    }
}

pub struct AnomalyDetector {
    config: DetectorConfig,
    rules: Arc<DetectionRules>,
    history: Arc<AnomalyHistory>,
    registry: DashMap<String, Supervised>,
    escalations: mpsc::Sender<Escalation>,
}

impl AnomalyDetector {
    /// Returns the detector and the receiving end of its escalation channel
    pub fn new(
        config: DetectorConfig,
        reachability: Option<Arc<dyn SatelliteReachability>>,
        history: Arc<AnomalyHistory>,
    ) -> Result<(Self, mpsc::Receiver<Escalation>)> {
        let rules = DetectionRules::new(config.clone(), reachability)?;
        let (tx, rx) = mpsc::channel(config.escalation_buffer);
        Ok((
            Self {
                config,
                rules: Arc::new(rules),
                history,
                registry: DashMap::new(),
                escalations: tx,
            },
            rx,
        ))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn history(&self) -> &Arc<AnomalyHistory> {
        &self.history
    }

    pub fn is_supervising(&self, handover_id: &str) -> bool {
        self.registry.contains_key(handover_id)
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// Spawn a supervision task for `context`. Must run inside a Tokio runtime.
    pub fn start_supervision(&self, context: HandoverContext) -> Result<String> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| RecoveryError::NoRuntime)?;
        let handover_id = context.handover_id.clone();

        match self.registry.entry(handover_id.clone()) {
            Entry::Occupied(_) => Err(RecoveryError::DuplicateHandover(handover_id)),
            Entry::Vacant(slot) => {
                let shared = Arc::new(RwLock::new(context));
                let (stop_tx, stop_rx) = watch::channel(false);
                let handle = runtime.spawn(supervise(
                    Arc::clone(&shared),
                    Arc::clone(&self.rules),
                    Arc::clone(&self.history),
                    self.escalations.clone(),
                    stop_rx,
                    Duration::from_millis(self.config.poll_interval_ms),
                    self.config.medium_recheck_ticks,
                ));
                slot.insert(Supervised {
                    context: shared,
                    stop: stop_tx,
                    handle,
                });
                info!(handover_id = %handover_id, "Supervision started");
                Ok(handover_id)
            }
        }
    }

    /// Stop the task and return the final context. The task has exited when
    /// this returns.
    pub async fn stop_supervision(&self, handover_id: &str) -> Option<HandoverContext> {
        let (_, supervised) = self.registry.remove(handover_id)?;
        // receiver gone means the task already ended
        let _ = supervised.stop.send(true);
        if let Err(e) = supervised.handle.await {
            error!(handover_id = %handover_id, "Supervision task failed: {}", e);
        }
        info!(handover_id = %handover_id, "Supervision stopped");
        let context = supervised.context.read().clone();
        Some(context)
    }

    /// Apply fresh measurements to a supervised context
    pub fn update_context<F>(&self, handover_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut HandoverContext),
    {
        let supervised = self
            .registry
            .get(handover_id)
            .ok_or_else(|| RecoveryError::UnknownHandover(handover_id.to_string()))?;
        let mut context = supervised.context.write();
        update(&mut context);
        Ok(())
    }

    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop_supervision(&id).await;
        }
    }
}

async fn supervise(
    context: Arc<RwLock<HandoverContext>>,
    rules: Arc<DetectionRules>,
    history: Arc<AnomalyHistory>,
    escalations: mpsc::Sender<Escalation>,
    mut stop: watch::Receiver<bool>,
    poll: Duration,
    medium_recheck_ticks: u32,
) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = EscalationTracker::new(medium_recheck_ticks);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.changed() => break,
        }
        // liveness
        if *stop.borrow() {
            break;
        }

        let snapshot = context.read().clone();
        let outcome = tracker.observe(rules.evaluate(&snapshot, Utc::now()));

        for anomaly in outcome.record {
            log_anomaly(&anomaly);
            history.append(anomaly);
        }

        for anomaly in outcome.escalate {
            error!(
                handover_id = %snapshot.handover_id,
                "Escalating {} {:?} to fallback",
                anomaly.anomaly_type,
                anomaly.severity
            );
            let escalation = Escalation {
                anomaly,
                context: snapshot.clone(),
            };
            tokio::select! {
                sent = escalations.send(escalation) => {
                    if sent.is_err() {
                        warn!(handover_id = %snapshot.handover_id, "Fallback consumer gone");
                    }
                }
                _ = stop.changed() => return,
            }
        }
    }
    debug!("Supervision loop exited");
}

fn log_anomaly(anomaly: &Anomaly) {
    match anomaly.severity {
        AnomalySeverity::Low => info!(
            handover_id = %anomaly.handover_id,
            "{} LOW: {:?}",
            anomaly.anomaly_type,
            anomaly.metrics
        ),
        AnomalySeverity::Medium => warn!(
            handover_id = %anomaly.handover_id,
            "{} MEDIUM: {:?}",
            anomaly.anomaly_type,
            anomaly.metrics
        ),
        AnomalySeverity::High | AnomalySeverity::Critical => error!(
            handover_id = %anomaly.handover_id,
            "{} {:?}: {:?}",
            anomaly.anomaly_type,
            anomaly.severity,
            anomaly.metrics
        ),
    }
}
