//! Incoming-call notification fan-out
//!
//! Each ringing call owns exactly one loop made of two tasks: a tick task
//! that pushes to every target on a fixed interval, and a deadline task
//! that reports the call as unanswered. Both live in one `FanoutHandle`
//! and are always released together.

use crate::domain::call::{CallRepository, ParticipantScope, ParticipantStatus, ParticipantTransition};
use crate::domain::push::{
    redact_device_address, PushGateway, PushMessage, PushPriority, INTERCOM_CHANNEL_ID,
};
use crate::domain::shared::value_objects::{BuildingId, CallId, PartyId, PartyKind};
use crate::domain::DomainError;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, gauge};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Fan-out timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutSettings {
    pub tick_interval: Duration,
    pub ring_timeout: Duration,
    /// Upper bound of a single push delivery attempt
    pub push_timeout: Duration,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            ring_timeout: Duration::from_secs(45),
            push_timeout: Duration::from_secs(5),
        }
    }
}

/// What the callee's device shows while the call rings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub call_id: CallId,
    pub building_id: BuildingId,
    pub channel_name: String,
    pub caller_id: PartyId,
    pub caller_kind: PartyKind,
    pub caller_name: String,
    pub apartment_number: String,
}

impl IncomingCall {
    fn body(&self) -> String {
        match self.caller_kind {
            PartyKind::Doorman => format!(
                "{} is calling apartment {}",
                self.caller_name, self.apartment_number
            ),
            PartyKind::Resident => format!(
                "Apartment {} is calling the front desk",
                self.apartment_number
            ),
        }
    }

    /// Build the push for one target device
    pub fn push_for(&self, target: &RingTarget) -> PushMessage {
        PushMessage {
            to: target.device_address.clone(),
            title: "Intercom call".to_string(),
            body: self.body(),
            data: json!({
                "type": "intercom_call",
                "action": "incoming_call",
                "callId": self.call_id,
                "from": self.caller_id,
                "fromName": self.caller_name,
                "fromType": self.caller_kind,
                "apartmentNumber": self.apartment_number,
                "buildingId": self.building_id,
                "channelName": self.channel_name,
                "userId": target.callee_id,
                "timestamp": Utc::now().to_rfc3339(),
            }),
            priority: PushPriority::High,
            sound: Some("default".to_string()),
            channel_id: Some(INTERCOM_CHANNEL_ID.to_string()),
        }
    }
}

/// A callee device the loop keeps ringing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingTarget {
    pub callee_id: PartyId,
    pub device_address: String,
}

struct FanoutHandle {
    generation: u64,
    targets: Arc<RwLock<Vec<RingTarget>>>,
    tick: JoinHandle<()>,
    deadline: JoinHandle<()>,
}

impl FanoutHandle {
    fn release(self) {
        self.tick.abort();
        self.deadline.abort();
    }

    fn live_timers(&self) -> usize {
        [&self.tick, &self.deadline]
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }
}

/// Per-call push loops keyed by call id
pub struct NotificationFanoutLoop {
    push: Arc<dyn PushGateway>,
    calls: Arc<dyn CallRepository>,
    settings: FanoutSettings,
    loops: Arc<DashMap<CallId, FanoutHandle>>,
    next_generation: AtomicU64,
    timeouts: mpsc::UnboundedSender<CallId>,
}

impl NotificationFanoutLoop {
    /// The receiver yields the id of every call whose ring deadline elapsed
    pub fn new(
        push: Arc<dyn PushGateway>,
        calls: Arc<dyn CallRepository>,
        settings: FanoutSettings,
    ) -> (Self, mpsc::UnboundedReceiver<CallId>) {
        let (timeouts, rx) = mpsc::unbounded_channel();
        let fanout = Self {
            push,
            calls,
            settings,
            loops: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
            timeouts,
        };
        (fanout, rx)
    }

    pub fn settings(&self) -> FanoutSettings {
        self.settings
    }

    /// Start ringing; a loop already running for the same call is replaced
    pub fn start(&self, call: IncomingCall, targets: Vec<RingTarget>) {
        let call_id = call.call_id;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let targets = Arc::new(RwLock::new(targets));

        let tick = tokio::spawn(ring(
            Arc::clone(&self.push),
            Arc::clone(&self.calls),
            Arc::new(call),
            Arc::clone(&targets),
            self.settings,
        ));

        let loops = Arc::clone(&self.loops);
        let timeouts = self.timeouts.clone();
        let ring_timeout = self.settings.ring_timeout;
        let deadline = tokio::spawn(async move {
            tokio::time::sleep(ring_timeout).await;

            // A newer loop for the same call owns the entry now
            let Some((_, handle)) = loops.remove_if(&call_id, |_, h| h.generation == generation)
            else {
                return;
            };
            handle.tick.abort();
            gauge!("intercom_fanout_active_loops").set(loops.len() as f64);

            info!("Ring deadline reached for call {}", call_id);
            if timeouts.send(call_id).is_err() {
                warn!("No timeout consumer for call {}", call_id);
            }
        });

        let handle = FanoutHandle {
            generation,
            targets,
            tick,
            deadline,
        };

        if let Some(stale) = self.loops.insert(call_id, handle) {
            warn!(
                "Replacing stale fan-out loop for call {} (generation {})",
                call_id, stale.generation
            );
            stale.release();
        }
        gauge!("intercom_fanout_active_loops").set(self.loops.len() as f64);
        debug!("Fan-out started for call {} (generation {})", call_id, generation);
    }

    /// Release both timers of a call's loop; false if none was running
    pub fn stop(&self, call_id: &CallId) -> bool {
        match self.loops.remove(call_id) {
            Some((_, handle)) => {
                handle.release();
                gauge!("intercom_fanout_active_loops").set(self.loops.len() as f64);
                debug!("Fan-out stopped for call {}", call_id);
                true
            }
            None => false,
        }
    }

    /// Stop ringing one callee while the others keep ringing
    pub async fn withdraw(&self, call_id: &CallId, callee: &PartyId) {
        let targets = match self.loops.get(call_id) {
            Some(handle) => Arc::clone(&handle.targets),
            None => return,
        };
        targets.write().await.retain(|t| &t.callee_id != callee);
    }

    pub fn is_active(&self, call_id: &CallId) -> bool {
        self.loops.contains_key(call_id)
    }

    pub fn active_loops(&self) -> usize {
        self.loops.len()
    }

    /// Timers still held for a call; zero after any terminal transition
    pub fn active_timer_count(&self, call_id: &CallId) -> usize {
        self.loops.get(call_id).map_or(0, |h| h.live_timers())
    }

    pub fn stop_all(&self) {
        let ids: Vec<CallId> = self.loops.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            self.stop(id);
        }
        if !ids.is_empty() {
            info!("Stopped {} fan-out loops", ids.len());
        }
    }
}

async fn ring(
    push: Arc<dyn PushGateway>,
    calls: Arc<dyn CallRepository>,
    call: Arc<IncomingCall>,
    targets: Arc<RwLock<Vec<RingTarget>>>,
    settings: FanoutSettings,
) {
    // First tick completes immediately
    let mut interval = tokio::time::interval(settings.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut notified: HashSet<PartyId> = HashSet::new();

    loop {
        interval.tick().await;

        let snapshot = targets.read().await.clone();
        let deliveries = snapshot
            .iter()
            .map(|target| deliver(push.as_ref(), &call, target, settings.push_timeout));
        let delivered = join_all(deliveries).await;

        for (target, ok) in snapshot.iter().zip(delivered) {
            if ok && notified.insert(target.callee_id) {
                mark_notified(calls.as_ref(), &call.call_id, &target.callee_id).await;
            }
        }
    }
}

async fn deliver(
    push: &dyn PushGateway,
    call: &IncomingCall,
    target: &RingTarget,
    push_timeout: Duration,
) -> bool {
    let message = call.push_for(target);
    match tokio::time::timeout(push_timeout, push.send(&message)).await {
        Ok(Ok(_)) => {
            counter!("intercom_push_sent_total").increment(1);
            true
        }
        Ok(Err(DomainError::Validation(reason))) => {
            debug!(
                "Skipping push to {} for call {}: {}",
                redact_device_address(&target.device_address),
                call.call_id,
                reason
            );
            false
        }
        Ok(Err(e)) => {
            counter!("intercom_push_failed_total").increment(1);
            warn!(
                "Push to {} for call {} failed: {}",
                redact_device_address(&target.device_address),
                call.call_id,
                e
            );
            false
        }
        Err(_) => {
            counter!("intercom_push_failed_total").increment(1);
            warn!(
                "Push to {} for call {} timed out",
                redact_device_address(&target.device_address),
                call.call_id
            );
            false
        }
    }
}

async fn mark_notified(calls: &dyn CallRepository, call_id: &CallId, callee: &PartyId) {
    let transition =
        ParticipantTransition::new(ParticipantScope::Only(*callee), ParticipantStatus::Notified)
            .when_in(&[ParticipantStatus::Invited]);
    if let Err(e) = calls.transition_participants(call_id, &transition).await {
        warn!("Failed to mark {} notified on call {}: {}", callee, call_id, e);
    }
}
