//! Stage state controller.
//!
//! Bridges one [`StageStateMachine`] to the [`StageStore`]:
//!
//! ```text
//! mount → load (or defaults) → loaded → state change → debounce → put
//! ```
//!
//! It also evaluates the stage's auto-advance rules on every state change
//! and runs load-time hooks once the stored state is in place.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use datastory_core::{Marker, SessionContext, SessionKey, StageState};
use datastory_progress::{HookId, MarkerChange, StageStateMachine, WeakStageStateMachine};
use datastory_reactive::SubscriptionId;
use datastory_storage::{StageStore, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::rule::AutoAdvanceRule;

/// Controller errors.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Store call failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Stored document could not be decoded
    #[error("invalid stored state: {0}")]
    Decode(#[from] serde_json::Error),

    /// Stored document belongs to another stage
    #[error("stored state is for stage `{found}`, expected `{expected}`")]
    StageMismatch {
        /// Stage this controller runs
        expected: String,
        /// Stage named in the document
        found: String,
    },

    /// Writer task ended abnormally
    #[error("writer task failed: {0}")]
    Writer(String),
}

type LoadedHook<M, F> = Box<dyn Fn(&StageStateMachine<M, F>)>;

struct Shared<M, F> {
    key: SessionKey,
    loaded: Cell<bool>,
    restoring: Cell<bool>,
    revision: Cell<u64>,
    rules: RefCell<Vec<AutoAdvanceRule<M, F>>>,
    loaded_hooks: RefCell<Vec<LoadedHook<M, F>>>,
    sender: RefCell<Option<mpsc::UnboundedSender<serde_json::Value>>>,
}

impl<M, F> Shared<M, F>
where
    M: Marker,
    F: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    fn on_state_change(&self, machine: &StageStateMachine<M, F>, state: &StageState<M, F>) {
        self.revision.set(self.revision.get() + 1);
        if !self.loaded.get() || self.restoring.get() {
            return;
        }
        self.enqueue_write(state);
        self.run_rules(machine, state);
    }

    fn enqueue_write(&self, state: &StageState<M, F>) {
        let snapshot = match serde_json::to_value(state) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to serialize stage state");
                return;
            }
        };
        if let Some(sender) = self.sender.borrow().as_ref() {
            if sender.send(snapshot).is_err() {
                warn!(key = %self.key, "Stage state writer is gone; dropping write");
            }
        }
    }

    fn prime_rules(&self, state: &StageState<M, F>) {
        for rule in self.rules.borrow().iter() {
            rule.prime(state);
        }
    }

    fn run_rules(&self, machine: &StageStateMachine<M, F>, state: &StageState<M, F>) {
        let fired: Vec<(String, M)> = self
            .rules
            .borrow()
            .iter()
            .filter(|rule| rule.observe(state))
            .map(|rule| (rule.name.clone(), rule.target))
            .collect();

        for (name, target) in fired {
            info!(key = %self.key, rule = %name, target = target.name(), "Auto-advance rule fired");
            if let Err(e) = machine.jump(target, true) {
                warn!(key = %self.key, rule = %name, error = %e, "Auto-advance failed");
            }
        }
    }
}

/// Persistence and rule wiring for one stage of one session.
///
/// Create it with [`new`](Self::new), register rules and hooks, then
/// [`load`](Self::load). [`mount`](Self::mount) does both for stages with
/// nothing to register.
pub struct StageStateController<M, F> {
    context: SessionContext,
    machine: StageStateMachine<M, F>,
    store: Arc<dyn StageStore>,
    config: ControllerConfig,
    shared: Rc<Shared<M, F>>,
    subscription: Option<SubscriptionId>,
    writer: Option<JoinHandle<()>>,
}

impl<M, F> StageStateController<M, F>
where
    M: Marker,
    F: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    /// Wrap `machine`. Nothing is loaded or written until [`load`](Self::load).
    pub fn new(
        context: SessionContext,
        machine: StageStateMachine<M, F>,
        store: Arc<dyn StageStore>,
        config: ControllerConfig,
    ) -> Self {
        let key = context.stage_key(&machine.stage_id());
        let shared = Rc::new(Shared {
            key,
            loaded: Cell::new(false),
            restoring: Cell::new(false),
            revision: Cell::new(0),
            rules: RefCell::new(Vec::new()),
            loaded_hooks: RefCell::new(Vec::new()),
            sender: RefCell::new(None),
        });

        let subscription = {
            let shared = Rc::downgrade(&shared);
            let weak_machine: WeakStageStateMachine<M, F> = machine.downgrade();
            machine.subscribe_state(move |_, new| {
                if let (Some(shared), Some(machine)) = (shared.upgrade(), weak_machine.upgrade()) {
                    shared.on_state_change(&machine, new);
                }
            })
        };

        Self {
            context,
            machine,
            store,
            config,
            shared,
            subscription: Some(subscription),
            writer: None,
        }
    }

    /// [`new`](Self::new) followed by [`load`](Self::load).
    pub async fn mount(
        context: SessionContext,
        machine: StageStateMachine<M, F>,
        store: Arc<dyn StageStore>,
        config: ControllerConfig,
    ) -> Self {
        let mut controller = Self::new(context, machine, store, config);
        controller.load().await;
        controller
    }

    /// Load the stored state, then start persisting changes.
    ///
    /// A missing document keeps the defaults. A failed or undecodable load
    /// is logged and also keeps the defaults. Rules are primed against the
    /// resulting state, so conditions that already hold do not fire, and
    /// loaded hooks run last.
    pub async fn load(&mut self) {
        if self.shared.loaded.get() {
            return;
        }

        match self.fetch().await {
            Ok(Some(state)) => {
                self.restore(state);
                info!(
                    key = %self.shared.key,
                    marker = self.machine.current_marker().name(),
                    "Restored stage state"
                );
            }
            Ok(None) => debug!(key = %self.shared.key, "No stored stage state; using defaults"),
            Err(e) => {
                warn!(
                    key = %self.shared.key,
                    error = %e,
                    "Failed to load stage state; using defaults"
                )
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        *self.shared.sender.borrow_mut() = Some(sender);
        self.writer = Some(tokio::spawn(run_writer(
            Arc::clone(&self.store),
            self.shared.key.clone(),
            self.config.write_debounce,
            receiver,
        )));
        self.shared.loaded.set(true);

        self.machine.with_state(|s| self.shared.prime_rules(s));

        let hooks = std::mem::take(&mut *self.shared.loaded_hooks.borrow_mut());
        for hook in &hooks {
            hook(&self.machine);
        }
    }

    /// Fetch the stored state again and apply it.
    ///
    /// Returns `false` when nothing was applied: no document, a failed
    /// load, or a response made stale by a local change while it was in
    /// flight.
    pub async fn reload(&self) -> bool {
        let revision = self.shared.revision.get();
        let fetched = self.fetch().await;
        if self.shared.revision.get() != revision {
            debug!(key = %self.shared.key, "Ignoring stale stage state response");
            return false;
        }
        match fetched {
            Ok(Some(state)) => {
                self.restore(state);
                self.machine.with_state(|s| self.shared.prime_rules(s));
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(key = %self.shared.key, error = %e, "Failed to reload stage state");
                false
            }
        }
    }

    async fn fetch(&self) -> Result<Option<StageState<M, F>>, ControllerError> {
        let Some(doc) = self.store.get_stage_state(&self.shared.key).await? else {
            return Ok(None);
        };
        let state: StageState<M, F> = serde_json::from_value(doc)?;
        if state.stage_id != self.shared.key.stage {
            return Err(ControllerError::StageMismatch {
                expected: self.shared.key.stage.clone(),
                found: state.stage_id,
            });
        }
        Ok(Some(state))
    }

    fn restore(&self, state: StageState<M, F>) {
        self.shared.restoring.set(true);
        self.machine.restore(state);
        self.shared.restoring.set(false);
    }

    /// Register an auto-advance rule.
    pub fn add_rule(&self, rule: AutoAdvanceRule<M, F>) {
        if self.shared.loaded.get() {
            self.machine.with_state(|s| rule.prime(s));
        }
        self.shared.rules.borrow_mut().push(rule);
    }

    /// Run `f` once, right after the stored state has been applied.
    ///
    /// Registered after loading, `f` runs immediately.
    pub fn on_loaded(&self, f: impl Fn(&StageStateMachine<M, F>) + 'static) {
        if self.shared.loaded.get() {
            f(&self.machine);
        } else {
            self.shared.loaded_hooks.borrow_mut().push(Box::new(f));
        }
    }

    /// Register a marker-change listener on the machine.
    pub fn on_marker_change(
        &self,
        f: impl Fn(&StageStateMachine<M, F>, MarkerChange<M>) + 'static,
    ) -> HookId {
        self.machine.on_marker_change(f)
    }

    /// Register a listener for transitions landing on `marker`.
    pub fn on_enter(
        &self,
        marker: M,
        f: impl Fn(&StageStateMachine<M, F>, MarkerChange<M>) + 'static,
    ) -> HookId {
        self.machine.on_enter(marker, f)
    }

    /// The state machine.
    pub fn machine(&self) -> &StageStateMachine<M, F> {
        &self.machine
    }

    /// Session this controller belongs to.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Persistence key.
    pub fn key(&self) -> &SessionKey {
        &self.shared.key
    }

    /// Whether the stored state has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.get()
    }

    /// Stop persisting, flush the pending write and wait for the writer.
    pub async fn unmount(mut self) -> Result<(), ControllerError> {
        self.detach();
        match self.writer.take() {
            Some(writer) => writer
                .await
                .map_err(|e| ControllerError::Writer(e.to_string())),
            None => Ok(()),
        }
    }

    fn detach(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.machine.unsubscribe_state(id);
        }
        self.shared.sender.borrow_mut().take();
    }
}

impl<M, F> Drop for StageStateController<M, F> {
    fn drop(&mut self) {
        // The writer keeps running until it has flushed what it received.
        self.shared.sender.borrow_mut().take();
    }
}

async fn run_writer(
    store: Arc<dyn StageStore>,
    key: SessionKey,
    debounce: Duration,
    mut receiver: mpsc::UnboundedReceiver<serde_json::Value>,
) {
    while let Some(mut latest) = receiver.recv().await {
        // Every newer snapshot restarts the quiet period.
        let closed = loop {
            match tokio::time::timeout(debounce, receiver.recv()).await {
                Ok(Some(newer)) => latest = newer,
                Ok(None) => break true,
                Err(_) => break false,
            }
        };

        match store.put_stage_state(&key, &latest).await {
            Ok(true) => debug!(%key, "Stage state written"),
            Ok(false) => warn!(%key, "Store declined stage state write"),
            Err(e) => warn!(%key, error = %e, "Failed to write stage state"),
        }
        if closed {
            break;
        }
    }
    debug!(%key, "Stage state writer stopped");
}
