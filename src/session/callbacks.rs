//! Lifecycle callback slots
//!
//! One optional handler per slot. Setting a slot replaces whatever was there;
//! there is no fan-out to multiple subscribers.

use std::fmt;

use super::protocol::{Event, Reply};
use crate::error::TetherError;

/// First connect / reconnect / missed event.
pub type LifecycleCallback = Box<dyn FnMut() + Send>;

/// Close, receives the consecutive failure count after incrementing.
pub type CloseCallback = Box<dyn FnMut(u32) + Send>;

/// Transport errors.
pub type ErrorCallback = Box<dyn FnMut(&TetherError) + Send>;

/// Every server-pushed event.
pub type EventCallback = Box<dyn FnMut(Event) + Send>;

/// One-shot reply handler registered by `send`.
pub type ReplyCallback = Box<dyn FnOnce(Reply) + Send>;

/// A handler destined for one slot.
pub enum CallbackSlot {
    FirstConnect(LifecycleCallback),
    Reconnect(LifecycleCallback),
    Close(CloseCallback),
    Error(ErrorCallback),
    MissedEvent(LifecycleCallback),
    Event(EventCallback),
}

impl CallbackSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FirstConnect(_) => "first_connect",
            Self::Reconnect(_) => "reconnect",
            Self::Close(_) => "close",
            Self::Error(_) => "error",
            Self::MissedEvent(_) => "missed_event",
            Self::Event(_) => "event",
        }
    }
}

impl fmt::Debug for CallbackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallbackSlot({})", self.name())
    }
}

#[derive(Default)]
pub struct Callbacks {
    first_connect: Option<LifecycleCallback>,
    reconnect: Option<LifecycleCallback>,
    close: Option<CloseCallback>,
    error: Option<ErrorCallback>,
    missed_event: Option<LifecycleCallback>,
    event: Option<EventCallback>,
}

impl Callbacks {
    pub fn set(&mut self, slot: CallbackSlot) {
        match slot {
            CallbackSlot::FirstConnect(cb) => self.first_connect = Some(cb),
            CallbackSlot::Reconnect(cb) => self.reconnect = Some(cb),
            CallbackSlot::Close(cb) => self.close = Some(cb),
            CallbackSlot::Error(cb) => self.error = Some(cb),
            CallbackSlot::MissedEvent(cb) => self.missed_event = Some(cb),
            CallbackSlot::Event(cb) => self.event = Some(cb),
        }
    }

    pub fn has_event(&self) -> bool {
        self.event.is_some()
    }

    pub(crate) fn first_connect(&mut self) {
        if let Some(cb) = self.first_connect.as_mut() {
            cb();
        }
    }

    pub(crate) fn reconnect(&mut self) {
        if let Some(cb) = self.reconnect.as_mut() {
            cb();
        }
    }

    pub(crate) fn close(&mut self, failures: u32) {
        if let Some(cb) = self.close.as_mut() {
            cb(failures);
        }
    }

    pub(crate) fn error(&mut self, error: &TetherError) {
        if let Some(cb) = self.error.as_mut() {
            cb(error);
        }
    }

    pub(crate) fn missed_event(&mut self) {
        if let Some(cb) = self.missed_event.as_mut() {
            cb();
        }
    }

    pub(crate) fn event(&mut self, event: Event) {
        if let Some(cb) = self.event.as_mut() {
            cb(event);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("first_connect", &self.first_connect.is_some())
            .field("reconnect", &self.reconnect.is_some())
            .field("close", &self.close.is_some())
            .field("error", &self.error.is_some())
            .field("missed_event", &self.missed_event.is_some())
            .field("event", &self.event.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_set_replaces_previous_handler() {
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));
        let mut callbacks = Callbacks::default();

        let counter = Arc::clone(&first);
        callbacks.set(CallbackSlot::Close(Box::new(move |n: u32| {
            counter.fetch_add(n, Ordering::SeqCst);
        })));
        let counter = Arc::clone(&second);
        callbacks.set(CallbackSlot::Close(Box::new(move |n: u32| {
            counter.fetch_add(n, Ordering::SeqCst);
        })));

        callbacks.close(3);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_empty_slots_are_noops() {
        let mut callbacks = Callbacks::default();
        callbacks.first_connect();
        callbacks.reconnect();
        callbacks.close(1);
        callbacks.missed_event();
        callbacks.error(&TetherError::MissingTarget);
        assert!(!callbacks.has_event());
    }
}
