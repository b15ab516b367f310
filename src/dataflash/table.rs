use bitmaps::{Bitmap, Bits, BitsImpl};

use crate::dataflash::{
    config::InstanceConfig,
    types::{BusEvent, ChannelHandle, Process, State, TaskHandle, TimerHandle},
};

/// Mutable run state of one instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RunState {
    /// `None` until the bus provider allocates a channel.
    pub channel: Option<ChannelHandle>,
    pub state: State,
    pub process: Process,
    /// Device address of the first byte, memory offset included.
    pub target: u32,
    pub size: usize,
    pub progress: usize,
    pub timer: Option<TimerHandle>,
    pub memory_offset: u32,
    pub(crate) timeout_reported: bool,
}

impl RunState {
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle && self.process == Process::None
    }

    /// Loads a new operation; the first transfer is always a header write.
    pub(crate) fn begin(&mut self, state: State, target: u32, size: usize) {
        self.state = state;
        self.process = Process::WaitWrite;
        self.target = target;
        self.size = size;
        self.progress = 0;
        self.timeout_reported = false;
    }

    pub(crate) fn reset(&mut self) {
        self.state = State::Idle;
        self.process = Process::None;
    }
}

/// Run states shared between the poll and bus event contexts.
pub(crate) struct RunTable<const N: usize>
where
    BitsImpl<N>: Bits,
{
    pub(crate) runs: [RunState; N],
    /// Instances outside `Idle`.
    pub(crate) active: Bitmap<N>,
    pub(crate) task: Option<TaskHandle>,
}

impl<const N: usize> RunTable<N>
where
    BitsImpl<N>: Bits,
{
    pub(crate) fn new() -> Self {
        Self {
            runs: [RunState::default(); N],
            active: Bitmap::new(),
            task: None,
        }
    }

    pub(crate) fn begin(&mut self, id: usize, state: State, target: u32, size: usize) {
        self.runs[id].begin(state, target, size);
        self.active.set(id, true);
    }

    pub(crate) fn reset(&mut self, id: usize) {
        self.runs[id].reset();
        self.active.set(id, false);
    }

    /// True if an instance other than `id` that shares its device is active.
    pub(crate) fn device_active(&self, map: &[InstanceConfig; N], id: usize) -> bool {
        let mut idx = self.active.first_index();
        while let Some(other) = idx {
            if other != id && map[other].shares_device(&map[id]) {
                return true;
            }
            idx = self.active.next_index(other);
        }
        false
    }

    /// Advances the waiting instance the event belongs to.
    ///
    /// Returns the matched instance and the timer it held. Unmatched events
    /// leave the table untouched.
    pub(crate) fn classify(
        &mut self,
        map: &[InstanceConfig; N],
        event: &BusEvent,
    ) -> Option<(usize, Option<TimerHandle>)> {
        for (id, (cfg, run)) in map.iter().zip(self.runs.iter_mut()).enumerate() {
            if cfg.provider != event.provider || run.channel != Some(event.channel) {
                continue;
            }
            let next = match run.process {
                Process::WaitRead => Process::Read,
                Process::WaitWrite => Process::Write,
                _ => continue,
            };
            if run.state.is_payload() {
                run.progress += event.length as usize;
            }
            run.process = next;
            return Some((id, run.timer.take()));
        }
        None
    }
}
