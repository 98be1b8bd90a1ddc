//! The input manager: keyboard and mouse hooks fused into one key-state surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;

use crate::binding::HookBinding;
use crate::dispatch::Dispatcher;
use crate::engine::DEFAULT_JOIN_TIMEOUT;
use crate::error::HookError;
use crate::event::{KeyState, KeyboardEvent, MouseEvent};
use crate::key::Key;
use crate::keyboard::KeyboardHook;
use crate::lifecycle::{ExitNotifier, ExitSubscription, ProcessLifecycle};
use crate::mouse::{MouseButtons, MouseHook};
use crate::registry::{CallbackRegistry, KeyChange, SubscriptionId, Subscribers};
use crate::state::StateMap;
use crate::wait::WaitSet;

const KEYBOARD_LANE: usize = 0;
const MOUSE_LANE: usize = 1;

/// Builder for an [`InputManager`].
pub struct InputManagerBuilder {
    binding: Option<Arc<dyn HookBinding>>,
    lifecycle: Option<Arc<dyn ProcessLifecycle>>,
    capture_mouse_move: bool,
    callback_workers: usize,
    join_timeout: Duration,
    install_hooks: bool,
}

impl Default for InputManagerBuilder {
    fn default() -> Self {
        Self {
            binding: None,
            lifecycle: None,
            capture_mouse_move: false,
            callback_workers: 2,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            install_hooks: true,
        }
    }
}

impl InputManagerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this binding instead of the platform's native one.
    pub fn binding(mut self, binding: Arc<dyn HookBinding>) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Report mouse moves and wheel scrolls to mouse subscribers.
    pub fn capture_mouse_move(mut self, capture: bool) -> Self {
        self.capture_mouse_move = capture;
        self
    }

    /// Number of threads running callbacks (at least one).
    ///
    /// Keyboard subscriptions run on the first worker and mouse subscriptions on the
    /// second. Per-key callbacks are spread over all workers by key code.
    pub fn callback_workers(mut self, workers: usize) -> Self {
        self.callback_workers = workers.max(1);
        self
    }

    /// How long uninstall waits for a pump thread to exit.
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Exit signal that disposes the manager. Defaults to [`ExitNotifier::global`].
    pub fn lifecycle(mut self, lifecycle: Arc<dyn ProcessLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Install both hooks as part of `build`. On by default.
    pub fn install_hooks(mut self, install: bool) -> Self {
        self.install_hooks = install;
        self
    }

    /// Build the manager.
    pub fn build(self) -> Result<InputManager> {
        let binding = match self.binding {
            Some(binding) => binding,
            None => native_binding()?,
        };
        let lifecycle = self
            .lifecycle
            .unwrap_or_else(|| ExitNotifier::global() as Arc<dyn ProcessLifecycle>);
        let dispatcher = Dispatcher::new(self.callback_workers)?;

        let join_timeout = self.join_timeout;
        let capture_mouse_move = self.capture_mouse_move;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let keyboard_target = weak.clone();
            let mouse_target = weak.clone();
            Inner {
                keyboard: KeyboardHook::new(Arc::clone(&binding), join_timeout, move |event| {
                    if let Some(inner) = keyboard_target.upgrade() {
                        inner.on_keyboard(event);
                    }
                }),
                mouse: MouseHook::new(binding, join_timeout, capture_mouse_move, move |event| {
                    if let Some(inner) = mouse_target.upgrade() {
                        inner.on_mouse(event);
                    }
                }),
                states: StateMap::new(),
                callbacks: CallbackRegistry::new(),
                keyboard_subscribers: Subscribers::new(),
                mouse_subscribers: Subscribers::new(),
                waiters: WaitSet::new(),
                dispatcher,
                lifecycle: Arc::clone(&lifecycle),
                exit_subscription: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }
        });

        let exit_target = Arc::downgrade(&inner);
        let subscription = lifecycle.subscribe(Box::new(move || {
            if let Some(inner) = exit_target.upgrade() {
                inner.dispose();
            }
        }));
        *inner.exit_subscription.lock() = Some(subscription);

        let manager = InputManager { inner };
        if self.install_hooks {
            manager.install_hooks()?;
        }
        log::info!(
            "input manager ready ({} callback workers)",
            manager.inner.dispatcher.workers()
        );
        Ok(manager)
    }
}

#[cfg(target_os = "windows")]
fn native_binding() -> Result<Arc<dyn HookBinding>> {
    Ok(Arc::new(crate::windows::WindowsBinding::new()?))
}

#[cfg(not(target_os = "windows"))]
fn native_binding() -> Result<Arc<dyn HookBinding>> {
    anyhow::bail!("Low-level input hooks are not supported on this platform")
}

struct Inner {
    keyboard: KeyboardHook,
    mouse: MouseHook,
    states: StateMap,
    callbacks: CallbackRegistry,
    keyboard_subscribers: Subscribers<KeyboardEvent>,
    mouse_subscribers: Subscribers<MouseEvent>,
    waiters: WaitSet,
    dispatcher: Dispatcher,
    lifecycle: Arc<dyn ProcessLifecycle>,
    exit_subscription: Mutex<Option<ExitSubscription>>,
    disposed: AtomicBool,
}

impl Inner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Runs on the keyboard pump thread.
    fn on_keyboard(&self, event: KeyboardEvent) {
        if self.is_disposed() {
            return;
        }
        self.record(event.key, event.state);

        let subscribers = self.keyboard_subscribers.snapshot();
        if !subscribers.is_empty() {
            self.dispatcher.submit(
                KEYBOARD_LANE,
                Box::new(move || {
                    for subscriber in subscribers.iter() {
                        subscriber.invoke(&event);
                    }
                }),
            );
        }
        self.dispatch_key_change(event.key, event.state);
    }

    /// Runs on the mouse pump thread.
    fn on_mouse(&self, event: MouseEvent) {
        if self.is_disposed() {
            return;
        }
        let button = event.button();
        if let Some((state, key)) = button {
            self.record(key, state);
        }

        let subscribers = self.mouse_subscribers.snapshot();
        if !subscribers.is_empty() {
            self.dispatcher.submit(
                MOUSE_LANE,
                Box::new(move || {
                    for subscriber in subscribers.iter() {
                        subscriber.invoke(&event);
                    }
                }),
            );
        }
        if let Some((state, key)) = button {
            self.dispatch_key_change(key, state);
        }
    }

    /// Per-key callbacks go to the lane of their key code, which keeps each key in
    /// event order and spreads keys over every worker.
    fn dispatch_key_change(&self, key: Key, state: KeyState) {
        let Some(callbacks) = self.callbacks.snapshot(key) else {
            return;
        };
        self.dispatcher.submit(
            key.code() as usize,
            Box::new(move || {
                for callback in callbacks.iter() {
                    callback.invoke(&(state, key));
                }
            }),
        );
    }

    fn record(&self, key: Key, incoming: KeyState) {
        let recorded = self.states.apply(key, incoming);
        self.waiters.notify(key, incoming, recorded);
    }

    fn install(&self) -> Result<bool, HookError> {
        if self.is_disposed() {
            return Err(HookError::Disposed);
        }
        let keyboard = self.keyboard.install()?;
        let mouse = match self.mouse.install() {
            Ok(mouse) => mouse,
            Err(e) => {
                if keyboard {
                    if let Err(rollback) = self.keyboard.uninstall() {
                        log::warn!("keyboard hook rollback failed: {}", rollback);
                    }
                }
                return Err(e);
            }
        };
        if self.is_disposed() {
            // Raced with dispose; do not leave hooks behind.
            self.uninstall()?;
            return Err(HookError::Disposed);
        }
        Ok(keyboard || mouse)
    }

    /// Attempts both hooks, reporting the first failure.
    fn uninstall(&self) -> Result<bool, HookError> {
        let keyboard = self.keyboard.uninstall();
        let mouse = self.mouse.uninstall();
        Ok(keyboard? | mouse?)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.uninstall() {
            log::error!("failed to release hooks during dispose: {}", e);
        }
        self.waiters.cancel_all();
        self.states.clear();
        self.mouse.decoder().reset();
        self.callbacks.clear();
        self.keyboard_subscribers.clear();
        self.mouse_subscribers.clear();
        if let Some(subscription) = self.exit_subscription.lock().take() {
            self.lifecycle.unsubscribe(subscription);
        }
        self.dispatcher.shutdown();
        log::info!("input manager disposed");
    }
}

/// Global keyboard and mouse state with per-key callbacks and blocking waits.
///
/// Key state is updated on the hook threads as events arrive. Callbacks and
/// subscriptions run on a small worker pool, never on a hook thread, so they may block.
/// Callbacks for one key run in event order. Keyboard subscriptions see events in
/// order, as do mouse subscriptions.
///
/// Dropping the manager disposes it.
pub struct InputManager {
    inner: Arc<Inner>,
}

impl InputManager {
    /// Start configuring a manager.
    pub fn builder() -> InputManagerBuilder {
        InputManagerBuilder::new()
    }

    /// Install the keyboard and mouse hooks.
    ///
    /// Returns `Ok(false)` when both were already installed. If the second hook fails
    /// the first is removed again.
    pub fn install_hooks(&self) -> Result<bool, HookError> {
        self.inner.install()
    }

    /// Remove both hooks. Returns `Ok(false)` when neither was installed.
    pub fn uninstall_hooks(&self) -> Result<bool, HookError> {
        self.inner.uninstall()
    }

    /// Whether both hooks are installed.
    pub fn is_installed(&self) -> bool {
        self.inner.keyboard.is_installed() && self.inner.mouse.is_installed()
    }

    /// Whether `key` is currently held down.
    pub fn is_pressed(&self, key: Key) -> bool {
        self.inner.states.is_pressed(key)
    }

    /// Whether `key` went down and up since the last call, consuming that edge.
    pub fn was_pressed(&self, key: Key) -> bool {
        self.inner.states.was_pressed(key)
    }

    /// The recorded state of `key`, without consuming a `Pressed` edge.
    pub fn get_state(&self, key: Key) -> KeyState {
        self.inner.states.get(key)
    }

    /// Call `callback` with the incoming state whenever `key` changes.
    ///
    /// Callbacks for the same key run in registration order.
    pub fn register_event<F>(&self, key: Key, callback: F) -> SubscriptionId
    where
        F: Fn(KeyState, Key) + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .add(key, Box::new(move |&(state, key): &KeyChange| callback(state, key)))
    }

    /// Remove a callback added with [`register_event`](Self::register_event).
    ///
    /// Once this returns the callback will not be called again, and any invocation
    /// already running on another thread has finished. It may be called from inside the
    /// callback itself. An invocation whose thread is itself blocked in `remove_event`
    /// is not waited for, so two callbacks removing each other both return.
    pub fn remove_event(&self, key: Key, id: SubscriptionId) -> bool {
        self.inner.callbacks.remove(key, id)
    }

    /// Number of callbacks registered for `key`.
    pub fn callback_count(&self, key: Key) -> usize {
        self.inner.callbacks.count(key)
    }

    /// Call `callback` with every decoded keyboard event.
    pub fn subscribe_keyboard<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(KeyboardEvent) + Send + Sync + 'static,
    {
        self.inner
            .keyboard_subscribers
            .add(Box::new(move |event: &KeyboardEvent| callback(*event)))
    }

    /// Moves and scrolls are only reported while mouse-move capture is on.
    pub fn subscribe_mouse<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(MouseEvent) + Send + Sync + 'static,
    {
        self.inner
            .mouse_subscribers
            .add(Box::new(move |event: &MouseEvent| callback(*event)))
    }

    /// Remove a keyboard or mouse subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.keyboard_subscribers.remove(id) || self.inner.mouse_subscribers.remove(id)
    }

    /// Block until `key` reaches `state`, or `timeout` elapses (`None` waits forever).
    ///
    /// Waiting for `Down` on a key that is already down succeeds at once. Waiting for
    /// `Pressed` matches the release that completes a press. Returns `false` on timeout
    /// or when the manager is disposed while waiting.
    pub fn wait_for_event(&self, key: Key, state: KeyState, timeout: Option<Duration>) -> bool {
        let Some(waiter) = self
            .inner
            .waiters
            .register(move |k, incoming, recorded| k == key && (incoming == state || recorded == state))
        else {
            return false;
        };
        if state == KeyState::Down && self.is_down(key) {
            return true;
        }
        waiter.wait(timeout).is_some()
    }

    /// Block until any key or button goes down and return it.
    pub fn wait_for_next_event(&self, timeout: Option<Duration>) -> Option<Key> {
        let waiter = self
            .inner
            .waiters
            .register(|_, incoming, _| incoming == KeyState::Down)?;
        waiter.wait(timeout)
    }

    /// Mouse buttons held as of the last mouse message.
    pub fn mouse_buttons(&self) -> MouseButtons {
        self.inner.mouse.decoder().buttons()
    }

    /// Whether moves and scrolls are reported to mouse subscribers.
    pub fn capture_mouse_move(&self) -> bool {
        self.inner.mouse.decoder().capture_move()
    }

    /// Turn reporting of moves and scrolls on or off.
    pub fn set_capture_mouse_move(&self, capture: bool) {
        self.inner.mouse.decoder().set_capture_move(capture);
    }

    /// Remove both hooks, wake every blocked wait, and drop all state and callbacks.
    ///
    /// Idempotent. Afterwards `install_hooks` fails with [`HookError::Disposed`].
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    fn is_down(&self, key: Key) -> bool {
        self.is_pressed(key) || (key.is_mouse_button() && self.mouse_buttons().is_down(key))
    }
}

impl Drop for InputManager {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}
