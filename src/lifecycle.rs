//! Process-exit notification.
//!
//! The input manager subscribes here so that its hooks are removed before the process
//! goes away. Hosts either call [`ExitNotifier::notify`] from their own shutdown path
//! or let [`ExitNotifier::install_ctrlc_handler`] do it on Ctrl+C.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use parking_lot::Mutex;

use crate::error::panic_message;

pub type ExitHook = Box<dyn Fn() + Send + Sync>;

/// Token returned by [`ProcessLifecycle::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitSubscription(u64);

/// Source of the "process is exiting" signal.
pub trait ProcessLifecycle: Send + Sync {
    fn subscribe(&self, hook: ExitHook) -> ExitSubscription;

    /// Returns `false` if the subscription was unknown.
    fn unsubscribe(&self, subscription: ExitSubscription) -> bool;
}

type SharedHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct ExitNotifier {
    hooks: Mutex<Vec<(ExitSubscription, SharedHook)>>,
    next_id: AtomicU64,
}

impl ExitNotifier {
    /// Create a notifier with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide notifier used when no other lifecycle is configured.
    pub fn global() -> Arc<ExitNotifier> {
        static GLOBAL: OnceLock<Arc<ExitNotifier>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(ExitNotifier::new())))
    }

    /// Run every subscribed hook. Returns how many ran.
    ///
    /// Hooks run without the subscription lock held, so they may unsubscribe.
    pub fn notify(&self) -> usize {
        let hooks: Vec<SharedHook> = self
            .hooks
            .lock()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in &hooks {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| hook())) {
                log::error!("exit hook panicked: {}", panic_message(panic.as_ref()));
            }
        }
        hooks.len()
    }

    /// Number of subscribed exit hooks.
    pub fn subscriber_count(&self) -> usize {
        self.hooks.lock().len()
    }

    /// Notify subscribers on Ctrl+C, then exit with status 130.
    ///
    /// Only one Ctrl+C handler can exist per process.
    pub fn install_ctrlc_handler(self: &Arc<Self>) -> Result<()> {
        let notifier = Arc::clone(self);
        ctrlc::set_handler(move || {
            log::info!("interrupted, releasing input hooks");
            notifier.notify();
            std::process::exit(130);
        })
        .context("Failed to set Ctrl+C handler")
    }
}

impl ProcessLifecycle for ExitNotifier {
    fn subscribe(&self, hook: ExitHook) -> ExitSubscription {
        let id = ExitSubscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().push((id, Arc::from(hook)));
        id
    }

    fn unsubscribe(&self, subscription: ExitSubscription) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(id, _)| *id != subscription);
        hooks.len() != before
    }
}
