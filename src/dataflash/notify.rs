use heapless::Vec;

use crate::dataflash::{
    error::FlashError,
    types::{Completion, FlashEvent, InstanceId},
};

/// Handler invoked for every matching [`FlashEvent`].
///
/// Runs synchronously in the poll context and must not block.
pub type EventHandler = fn(FlashEvent);

/// Subscription criteria for an [`EventHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventFilter {
    #[default]
    Any,
    Instance(InstanceId),
    Completion(Completion),
}

impl EventFilter {
    pub fn matches(&self, event: &FlashEvent) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Instance(id) => event.source_instance == *id,
            EventFilter::Completion(c) => event.completion() == Some(*c),
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Subscription {
    handler: EventHandler,
    filter: EventFilter,
}

/// Fixed-capacity list of registered handlers, in registration order.
#[derive(Clone)]
pub(crate) struct CallbackRegistry<const H: usize> {
    subs: Vec<Subscription, H>,
}

impl<const H: usize> CallbackRegistry<H> {
    pub(crate) const fn new() -> Self {
        Self { subs: Vec::new() }
    }

    pub(crate) fn clear(&mut self) {
        self.subs.clear();
    }

    pub(crate) fn register(
        &mut self,
        handler: EventHandler,
        filter: EventFilter,
    ) -> Result<(), FlashError> {
        self.subs
            .push(Subscription { handler, filter })
            .map_err(|_| FlashError::RegistryFull)
    }

    /// Removes every registration of `handler`; returns true if any existed.
    pub(crate) fn unregister(&mut self, handler: EventHandler) -> bool {
        let before = self.subs.len();
        self.subs
            .retain(|sub| !core::ptr::fn_addr_eq(sub.handler, handler));
        self.subs.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.subs.len()
    }

    /// Calls every handler whose filter accepts `event`.
    pub(crate) fn notify(&self, event: FlashEvent) {
        for sub in self.subs.iter().filter(|sub| sub.filter.matches(&event)) {
            (sub.handler)(event);
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::dataflash::types::ProviderId;
    use std::{cell::RefCell, thread_local, vec::Vec as StdVec};

    thread_local! {
        static CALLS: RefCell<StdVec<(u8, InstanceId)>> = const { RefCell::new(StdVec::new()) };
    }

    fn first(ev: FlashEvent) {
        CALLS.with(|c| c.borrow_mut().push((1, ev.source_instance)));
    }

    fn second(ev: FlashEvent) {
        CALLS.with(|c| c.borrow_mut().push((2, ev.source_instance)));
    }

    fn calls() -> StdVec<(u8, InstanceId)> {
        CALLS.with(|c| c.borrow().clone())
    }

    fn event(instance: InstanceId, completion: Completion) -> FlashEvent {
        FlashEvent::new(instance, ProviderId(0xE5), completion, 1)
    }

    #[test]
    fn notify_runs_handlers_in_registration_order() {
        let mut reg: CallbackRegistry<4> = CallbackRegistry::new();
        reg.register(second, EventFilter::Any).unwrap();
        reg.register(first, EventFilter::Any).unwrap();

        reg.notify(event(0, Completion::Write));

        assert_eq!(calls(), [(2, 0), (1, 0)]);
    }

    #[test]
    fn filters_select_events() {
        let mut reg: CallbackRegistry<4> = CallbackRegistry::new();
        reg.register(first, EventFilter::Instance(1)).unwrap();
        reg.register(second, EventFilter::Completion(Completion::Read))
            .unwrap();

        reg.notify(event(0, Completion::Write));
        reg.notify(event(1, Completion::Write));
        reg.notify(event(0, Completion::Read));

        assert_eq!(calls(), [(1, 1), (2, 0)]);
    }

    #[test]
    fn unregister_removes_all_registrations() {
        let mut reg: CallbackRegistry<4> = CallbackRegistry::new();
        reg.register(first, EventFilter::Any).unwrap();
        reg.register(second, EventFilter::Any).unwrap();
        reg.register(first, EventFilter::Instance(3)).unwrap();

        assert!(reg.unregister(first));
        assert!(!reg.unregister(first));
        assert_eq!(reg.len(), 1);

        reg.notify(event(3, Completion::Read));
        assert_eq!(calls(), [(2, 3)]);
    }

    #[test]
    fn register_past_capacity_fails() {
        let mut reg: CallbackRegistry<1> = CallbackRegistry::new();
        reg.register(first, EventFilter::Any).unwrap();
        assert_eq!(
            reg.register(second, EventFilter::Any),
            Err(FlashError::RegistryFull)
        );
    }
}
