use crate::dataflash::{sched::TimerAllocator, types::TimerHandle};

/// Arms and releases the per-instance bus timeout.
///
/// The handle lives in the instance's run state so the event context can
/// release it without touching any other instance.
pub(crate) struct TimeoutSupervisor<'t, T: TimerAllocator> {
    timers: &'t T,
    timeout_ms: u32,
}

impl<'t, T: TimerAllocator> TimeoutSupervisor<'t, T> {
    pub(crate) fn new(timers: &'t T, timeout_ms: u32) -> Self {
        Self { timers, timeout_ms }
    }

    /// Allocates a handle into `slot` if it holds none, then restarts it.
    ///
    /// Returns false if the allocator is exhausted; the operation then runs
    /// unsupervised.
    pub(crate) fn arm(&self, slot: &mut Option<TimerHandle>) -> bool {
        let timer = match *slot {
            Some(timer) => timer,
            None => match self.timers.allocate_handle() {
                Some(timer) => {
                    *slot = Some(timer);
                    timer
                }
                None => {
                    log_warn!("dataflash: no timer available for bus timeout");
                    return false;
                }
            },
        };
        self.timers.set_ms(timer, self.timeout_ms);
        true
    }

    pub(crate) fn release(&self, slot: &mut Option<TimerHandle>) {
        if let Some(timer) = slot.take() {
            self.timers.release_handle(timer);
        }
    }

    pub(crate) fn expired(&self, slot: Option<TimerHandle>) -> bool {
        slot.is_some_and(|timer| self.timers.is_expired(timer))
    }
}
