use crate::dataflash::types::{TaskHandle, TimerHandle};

/// Cooperative periodic task scheduler.
///
/// Methods take `&self`: `set_next_call_immediate` is called from the bus
/// event context, so implementations must tolerate being preempted by it.
pub trait TaskScheduler {
    /// Creates the periodic task that calls the driver's poll entry point.
    fn create_task(&self, name: &'static str, period_ms: u32, autostart: bool)
    -> Option<TaskHandle>;

    fn resume_task(&self, task: TaskHandle);

    /// Runs `task` at the earliest opportunity, bypassing its period.
    fn set_next_call_immediate(&self, task: TaskHandle);
}

/// One-shot millisecond timer pool.
///
/// Like [`TaskScheduler`], this is shared with the bus event context.
pub trait TimerAllocator {
    fn allocate_handle(&self) -> Option<TimerHandle>;

    /// (Re)starts `timer` so that it expires after `ms` milliseconds.
    fn set_ms(&self, timer: TimerHandle, ms: u32);

    fn release_handle(&self, timer: TimerHandle);

    fn is_expired(&self, timer: TimerHandle) -> bool;
}
