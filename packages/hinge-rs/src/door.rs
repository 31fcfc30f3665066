//! Door runtime: one mailbox and one worker per door.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──subscribe──► Subscribed ──worker──► Active ──disable──► Disabled
//! ```
//!
//! Activation restores the persisted [`DoorHandlerState`], subscribes the
//! door to every source with exponential backoff and only then starts the
//! worker. If a subscription keeps failing, activation fails with
//! [`HingeError::Subscription`] and every subscription taken so far is
//! released.
//!
//! # Processing
//!
//! Everything that touches door state goes through the mailbox and is
//! handled by the single worker, one command at a time:
//!
//! 1. record the arrival (unlistened sources and redeliveries stop here)
//! 2. let the door logic decide (consumption happens here)
//! 3. record stimulations in the door's own status
//! 4. persist the state
//! 5. forward the stimulations through the [`SignalService`]
//!
//! Timers (buffered windows, `this` expiry) are tokio tasks that post back
//! into the mailbox. Disabling aborts them, and a stimulation decided just
//! before the disable is dropped before it is forwarded.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::HingeConfig;
use crate::definition::{DoorDefinition, DoorKind};
use crate::error::{BuildError, DeliveryError, HingeError};
use crate::fanout::{SignalReceiver, SignalService};
use crate::ids::{DoorId, SourceId};
use crate::logical::LogicalDoor;
use crate::message::{SignalMessage, SignalPayload, SignalSource};
use crate::persistence::{DoorStateStore, Revision, StoreError};
use crate::relay::RelayDoor;
use crate::retention::RetentionPolicy;
use crate::state::DoorHandlerState;

// =============================================================================
// Door logic
// =============================================================================

/// One outgoing message, before it is stamped by the worker.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Stimulation {
    pub payload: Option<SignalPayload>,
    pub metadata: BTreeMap<String, String>,
    pub origins: Vec<SignalSource>,
}

impl Stimulation {
    /// Content-less stimulation caused by `consumed`.
    pub(crate) fn from_consumed(consumed: &[SignalMessage]) -> Self {
        Self {
            origins: consumed.iter().map(|m| m.from.clone()).collect(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerRequest {
    pub id: u64,
    pub after: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct Decision {
    pub stimulations: Vec<Stimulation>,
    pub timers: Vec<TimerRequest>,
}

impl Decision {
    pub(crate) fn stimulate(stimulation: Stimulation) -> Self {
        Self {
            stimulations: vec![stimulation],
            timers: Vec::new(),
        }
    }
}

/// Behaviour of a door kind.
///
/// Called serially by the worker, synchronously, with no IO. State lives in
/// the [`DoorHandlerState`] passed in so that it is persisted as a whole.
pub(crate) trait DoorLogic: Send + 'static {
    /// A new message was recorded.
    fn on_arrival(&mut self, state: &mut DoorHandlerState, policy: &RetentionPolicy, now: DateTime<Utc>) -> Decision;

    /// A timer armed by an earlier decision elapsed.
    fn on_timer(
        &mut self,
        id: u64,
        state: &mut DoorHandlerState,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Decision;

    /// Timers to re-arm for a state restored from the store.
    fn restore(&mut self, state: &mut DoorHandlerState, now: DateTime<Utc>) -> Vec<TimerRequest>;
}

/// Compile the logic of `definition`.
///
/// Definitions coming out of the builder always compile; this catches
/// hand-written or stale ones from a provider.
pub(crate) fn build_logic(definition: &DoorDefinition) -> Result<Box<dyn DoorLogic>, BuildError> {
    match &definition.kind {
        DoorKind::LogicalAggregator(logical) => LogicalDoor::new(definition.uid(), logical)
            .map(|door| Box::new(door) as Box<dyn DoorLogic>)
            .map_err(|source| BuildError::Formula {
                door: definition.name().to_string(),
                formula: logical.logical_formula.clone(),
                source,
            }),
        DoorKind::RelayFilter(relay) => {
            relay
                .filter_condition
                .condition
                .validate()
                .map_err(|source| BuildError::Condition {
                    door: definition.name().to_string(),
                    source,
                })?;
            Ok(Box::new(RelayDoor::new(relay)))
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DoorLifecycle {
    Uninitialized,
    Subscribed,
    Active,
    Disabled,
}

/// What happened to a message handed to [`DoorHandle::receive_and_wait`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Receipt {
    /// The message was new and came from a listened source.
    pub recorded: bool,
    /// Uids of the stimulations forwarded while handling it.
    pub stimulations: Vec<Uuid>,
}

enum DoorCommand {
    Receive {
        message: SignalMessage,
        ack: Option<oneshot::Sender<Receipt>>,
    },
    TimerElapsed {
        id: u64,
    },
    Snapshot(oneshot::Sender<DoorHandlerState>),
    Reload(Box<DoorDefinition>),
    Disable(oneshot::Sender<()>),
}

/// Cheap, cloneable address of a running door.
///
/// The handle is also what the door subscribes to its sources with:
/// `receive_signal` only enqueues.
#[derive(Clone)]
pub struct DoorHandle {
    door_id: DoorId,
    sender: mpsc::UnboundedSender<DoorCommand>,
    lifecycle: watch::Receiver<DoorLifecycle>,
    disabled: Arc<AtomicBool>,
}

impl DoorHandle {
    pub fn id(&self) -> &DoorId {
        &self.door_id
    }

    pub fn uid(&self) -> Uuid {
        self.door_id.uid
    }

    pub fn lifecycle(&self) -> DoorLifecycle {
        *self.lifecycle.borrow()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    fn unavailable(&self) -> HingeError {
        HingeError::DoorUnavailable {
            door: self.door_id.uid,
            reason: "door worker stopped",
        }
    }

    /// Enqueue `message` and wait until the door has recorded, evaluated
    /// and forwarded everything it caused.
    pub async fn receive_and_wait(&self, message: SignalMessage) -> Result<Receipt, HingeError> {
        if self.is_disabled() {
            return Ok(Receipt::default());
        }
        let (ack, done) = oneshot::channel();
        self.sender
            .send(DoorCommand::Receive {
                message,
                ack: Some(ack),
            })
            .map_err(|_| self.unavailable())?;
        done.await.map_err(|_| self.unavailable())
    }

    /// Copy of the door state after every command enqueued so far.
    pub async fn snapshot(&self) -> Result<DoorHandlerState, HingeError> {
        let (reply, state) = oneshot::channel();
        self.sender
            .send(DoorCommand::Snapshot(reply))
            .map_err(|_| self.unavailable())?;
        state.await.map_err(|_| self.unavailable())
    }

    /// Stop the door: pending timers are cancelled, subscriptions released.
    ///
    /// Disabling an already stopped door is a no-op.
    pub async fn disable(&self) {
        self.disabled.store(true, Ordering::SeqCst);
        let (ack, done) = oneshot::channel();
        if self.sender.send(DoorCommand::Disable(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Ask the worker to apply a new definition. `false` if it is gone.
    pub(crate) fn reload(&self, definition: DoorDefinition) -> bool {
        self.sender
            .send(DoorCommand::Reload(Box::new(definition)))
            .is_ok()
    }
}

impl std::fmt::Debug for DoorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoorHandle")
            .field("door", &self.door_id)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

#[async_trait]
impl SignalReceiver for DoorHandle {
    fn receiver_uid(&self) -> Uuid {
        self.door_id.uid
    }

    async fn receive_signal(&self, message: SignalMessage) {
        if self.is_disabled() {
            return;
        }
        if self
            .sender
            .send(DoorCommand::Receive { message, ack: None })
            .is_err()
        {
            debug!(door = %self.door_id.name, "door worker stopped, message dropped");
        }
    }
}

// =============================================================================
// Activation
// =============================================================================

/// Shared collaborators every door runs with.
#[derive(Clone)]
pub(crate) struct DoorContext {
    pub service: Arc<dyn SignalService>,
    pub store: Arc<dyn DoorStateStore>,
    pub clock: Arc<dyn Clock>,
    pub config: HingeConfig,
}

/// Restore, subscribe and start the worker of `definition`.
pub(crate) async fn activate(definition: DoorDefinition, ctx: DoorContext) -> Result<DoorHandle, HingeError> {
    let door_uid = definition.uid();
    let mut logic = build_logic(&definition)?;

    let (mut state, revision) = match ctx.store.load(door_uid).await? {
        Some(restored) => {
            debug!(door = %definition.name(), revision = %restored.1, "door state restored");
            restored
        }
        None => (DoorHandlerState::new(door_uid), Revision::NONE),
    };
    let now = ctx.clock.now();
    state.listen(definition.source_uids());
    state.enforce_retention(&definition.retention, now);

    let (sender, mailbox) = mpsc::unbounded_channel();
    let (lifecycle, lifecycle_rx) = watch::channel(DoorLifecycle::Uninitialized);
    let disabled = Arc::new(AtomicBool::new(false));
    let handle = DoorHandle {
        door_id: definition.door_id.clone(),
        sender: sender.clone(),
        lifecycle: lifecycle_rx,
        disabled: disabled.clone(),
    };

    let receiver: Arc<dyn SignalReceiver> = Arc::new(handle.clone());
    let mut subscribed = BTreeSet::new();
    for source in definition.sources() {
        if let Err(e) = subscribe_with_retry(&ctx, &definition.door_id, &source, &receiver).await {
            for uid in &subscribed {
                ctx.service.unsubscribe(*uid, door_uid).await;
            }
            error!(door = %definition.name(), error = %e, "door activation failed");
            return Err(e);
        }
        subscribed.insert(source.uid());
    }
    lifecycle.send_replace(DoorLifecycle::Subscribed);

    let timers = logic.restore(&mut state, now);
    let mut worker = DoorWorker {
        definition,
        logic,
        state,
        revision,
        ctx,
        subscribed,
        mailbox,
        self_sender: sender.downgrade(),
        timers: HashMap::new(),
        lifecycle,
        disabled,
    };
    for timer in timers {
        worker.arm(timer);
    }
    worker.lifecycle.send_replace(DoorLifecycle::Active);
    info!(
        door = %worker.definition.name(),
        kind = worker.definition.kind.label(),
        sources = worker.subscribed.len(),
        "door active"
    );
    tokio::spawn(worker.run());

    Ok(handle)
}

async fn subscribe_with_retry(
    ctx: &DoorContext,
    door: &DoorId,
    source: &SourceId,
    receiver: &Arc<dyn SignalReceiver>,
) -> Result<(), HingeError> {
    let source_uid = source.uid();
    let attempts = AtomicUsize::new(0);
    let counter = &attempts;
    let service = &ctx.service;

    let result = (move || {
        let receiver = Arc::clone(receiver);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            service.subscribe(source_uid, receiver).await
        }
    })
    .retry(ctx.config.subscribe_backoff())
    .when(DeliveryError::is_retryable)
    .notify(|err: &DeliveryError, delay: Duration| {
        warn!(door = %door.name, source = %source, error = %err, delay = ?delay, "subscription failed, retrying");
    })
    .await;

    result.map_err(|reason| HingeError::Subscription {
        door: door.uid,
        source_uid,
        attempts: attempts.load(Ordering::SeqCst),
        reason,
    })
}

// =============================================================================
// Worker
// =============================================================================

struct DoorWorker {
    definition: DoorDefinition,
    logic: Box<dyn DoorLogic>,
    state: DoorHandlerState,
    revision: Revision,
    ctx: DoorContext,
    subscribed: BTreeSet<Uuid>,
    mailbox: mpsc::UnboundedReceiver<DoorCommand>,
    self_sender: mpsc::WeakUnboundedSender<DoorCommand>,
    timers: HashMap<u64, JoinHandle<()>>,
    lifecycle: watch::Sender<DoorLifecycle>,
    disabled: Arc<AtomicBool>,
}

impl DoorWorker {
    async fn run(mut self) {
        while let Some(command) = self.mailbox.recv().await {
            match command {
                DoorCommand::Receive { message, ack } => {
                    let receipt = self.receive(message).await;
                    if let Some(ack) = ack {
                        let _ = ack.send(receipt);
                    }
                }
                DoorCommand::TimerElapsed { id } => self.timer_elapsed(id).await,
                DoorCommand::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
                DoorCommand::Reload(definition) => self.reload(*definition).await,
                DoorCommand::Disable(ack) => {
                    self.shutdown().await;
                    let _ = ack.send(());
                    break;
                }
            }
        }

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        debug!(door = %self.definition.name(), "door worker stopped");
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    async fn receive(&mut self, message: SignalMessage) -> Receipt {
        if self.is_disabled() {
            return Receipt::default();
        }

        let now = self.ctx.clock.now();
        let policy = self.definition.retention.clone();
        let message_uid = message.uid;
        let source_uid = message.source_uid();

        if !self.definition.listens_to(source_uid) {
            trace!(
                door = %self.definition.name(),
                source = %source_uid,
                message = %message_uid,
                "ignored message from unlistened source"
            );
            return Receipt::default();
        }
        if !self.state.record(message, &policy, now) {
            trace!(
                door = %self.definition.name(),
                source = %source_uid,
                message = %message_uid,
                "ignored redelivered message"
            );
            return Receipt::default();
        }

        let decision = self.logic.on_arrival(&mut self.state, &policy, now);
        Receipt {
            recorded: true,
            stimulations: self.apply(decision, now).await,
        }
    }

    async fn timer_elapsed(&mut self, id: u64) {
        self.timers.remove(&id);
        if self.is_disabled() {
            return;
        }

        let now = self.ctx.clock.now();
        let policy = self.definition.retention.clone();
        let decision = self.logic.on_timer(id, &mut self.state, &policy, now);
        self.apply(decision, now).await;
    }

    /// Record, persist, then forward. Returns the forwarded uids.
    async fn apply(&mut self, decision: Decision, now: DateTime<Utc>) -> Vec<Uuid> {
        let policy = self.definition.retention.clone();
        let messages: Vec<SignalMessage> = decision
            .stimulations
            .into_iter()
            .map(|stimulation| self.stamp(stimulation, now))
            .collect();

        for message in &messages {
            self.state.record_stimulation(message.clone(), &policy, now);
        }
        for timer in decision.timers {
            self.arm(timer);
        }
        self.persist().await;

        let mut forwarded = Vec::with_capacity(messages.len());
        for message in messages {
            if self.is_disabled() {
                debug!(
                    door = %self.definition.name(),
                    message = %message.uid,
                    "door disabled, stimulation dropped"
                );
                break;
            }

            let uid = message.uid;
            let delivery = self.ctx.service.deliver(self.definition.uid(), message);
            match tokio::time::timeout(self.ctx.config.stimulation_timeout, delivery).await {
                Ok(receivers) => {
                    debug!(
                        door = %self.definition.name(),
                        message = %uid,
                        receivers,
                        "door stimulated"
                    );
                    forwarded.push(uid);
                }
                Err(_) => {
                    warn!(
                        door = %self.definition.name(),
                        message = %uid,
                        timeout = ?self.ctx.config.stimulation_timeout,
                        "stimulation forwarding timed out"
                    );
                }
            }
        }
        forwarded
    }

    fn stamp(&self, stimulation: Stimulation, now: DateTime<Utc>) -> SignalMessage {
        let source = SourceId::from(self.definition.door_id.clone());
        let mut from = SignalSource::new(Uuid::new_v4(), &source, now, stimulation.payload)
            .with_sender(format!("door:{}", self.definition.name()))
            .with_origins(stimulation.origins);
        from.metadata = stimulation.metadata;
        SignalMessage::from_source(from)
    }

    fn arm(&mut self, timer: TimerRequest) {
        let sender = self.self_sender.clone();
        let TimerRequest { id, after } = timer;
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(sender) = sender.upgrade() {
                let _ = sender.send(DoorCommand::TimerElapsed { id });
            }
        });
        if let Some(previous) = self.timers.insert(id, task) {
            previous.abort();
        }
        trace!(door = %self.definition.name(), timer = id, after = ?after, "timer armed");
    }

    async fn persist(&mut self) {
        let door_uid = self.definition.uid();
        match self.ctx.store.save(door_uid, &self.state, self.revision).await {
            Ok(revision) => self.revision = revision,
            Err(StoreError::Conflict) => {
                warn!(door = %self.definition.name(), revision = %self.revision, "door state revision conflict, overwriting");
                let current = match self.ctx.store.load(door_uid).await {
                    Ok(Some((_, revision))) => revision,
                    Ok(None) => Revision::NONE,
                    Err(e) => {
                        error!(door = %self.definition.name(), error = %e, "failed to reload door state revision");
                        return;
                    }
                };
                match self.ctx.store.save(door_uid, &self.state, current).await {
                    Ok(revision) => self.revision = revision,
                    Err(e) => error!(door = %self.definition.name(), error = %e, "failed to persist door state"),
                }
            }
            Err(e) => error!(door = %self.definition.name(), error = %e, "failed to persist door state"),
        }
    }

    /// A handle built from the worker's own mailbox, for subscribing.
    fn receiver(&self) -> Option<Arc<dyn SignalReceiver>> {
        let sender = self.self_sender.upgrade()?;
        Some(Arc::new(DoorHandle {
            door_id: self.definition.door_id.clone(),
            sender,
            lifecycle: self.lifecycle.subscribe(),
            disabled: self.disabled.clone(),
        }))
    }

    async fn reload(&mut self, definition: DoorDefinition) {
        if definition.uid() != self.definition.uid() || self.is_disabled() {
            return;
        }
        let mut logic = match build_logic(&definition) {
            Ok(logic) => logic,
            Err(e) => {
                error!(door = %definition.name(), error = %e, "rejected reloaded door definition");
                return;
            }
        };
        let Some(receiver) = self.receiver() else {
            return;
        };

        let wanted: BTreeSet<Uuid> = definition.source_uids().into_iter().collect();
        for source in definition.sources() {
            if self.subscribed.contains(&source.uid()) {
                continue;
            }
            match subscribe_with_retry(&self.ctx, &definition.door_id, &source, &receiver).await {
                Ok(()) => {
                    self.subscribed.insert(source.uid());
                }
                Err(e) => error!(door = %definition.name(), error = %e, "reload could not subscribe"),
            }
        }
        for source_uid in self.subscribed.difference(&wanted).copied().collect::<Vec<_>>() {
            self.ctx.service.unsubscribe(source_uid, definition.uid()).await;
            self.subscribed.remove(&source_uid);
        }

        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        let now = self.ctx.clock.now();
        self.state.listen(definition.source_uids());
        self.state.enforce_retention(&definition.retention, now);
        let timers = logic.restore(&mut self.state, now);

        self.definition = definition;
        self.logic = logic;
        for timer in timers {
            self.arm(timer);
        }
        self.persist().await;

        info!(
            door = %self.definition.name(),
            kind = self.definition.kind.label(),
            sources = self.subscribed.len(),
            "door definition reloaded"
        );
    }

    async fn shutdown(&mut self) {
        self.disabled.store(true, Ordering::SeqCst);
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.state.pending_window = None;

        let door_uid = self.definition.uid();
        for source_uid in std::mem::take(&mut self.subscribed) {
            self.ctx.service.unsubscribe(source_uid, door_uid).await;
        }
        self.persist().await;
        self.lifecycle.send_replace(DoorLifecycle::Disabled);
        info!(door = %self.definition.name(), "door disabled");
    }
}
