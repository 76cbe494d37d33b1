//! Presence reconciliation and automatic mode switching
//!
//! This module provides:
//! - Cancellable timers on a tokio runtime
//! - The debounced, polled reconciler that keeps presence in sync
//! - The pure posture decision
//! - The switcher that applies decisions behind a delay

pub mod decision;
pub mod reconciler;
pub mod scheduler;
pub mod switcher;

pub use decision::{decide, Posture};
pub use reconciler::{PassTrigger, PresenceEvent, PresenceSubscriber, Reconciler};
pub use scheduler::ScheduledTask;
pub use switcher::{AppEvent, ModeSwitcher, MAX_SWITCH_DELAY};
