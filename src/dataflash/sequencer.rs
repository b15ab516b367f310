//! Poll-driven transaction state machine.
//!
//! ```text
//!            read()                         write()
//!              │                               │
//!              ▼                               ▼
//!      SendReadHeader                 ┌─▶ SendWriteHeader
//!   (header sent: Write)              │   (header sent: Write)
//!              │ issue payload read   │        │ issue next chunk
//!              ▼                      │        ▼
//!            Read                     │      Write
//!   (payload received: Read)          │   (chunk sent: Write)
//!              │                      │        │
//!              ▼                      └─ more ─┤
//!    stop, notify Read, Idle                   ▼ done
//!                                    protect, notify Write, Idle
//! ```
//!
//! Every transition waits for the bus event classifier to move the
//! instance's process out of its `Wait*` variant.

use bitmaps::{Bits, BitsImpl};

use crate::dataflash::{
    bus::{AddressMode, BusRegistry},
    codec::WriteHeader,
    config::{InstanceConfig, TimeoutPolicy},
    error::BusError,
    io::DigitalOutput,
    sched::{TaskScheduler, TimerAllocator},
    status::StatusRegister,
    storage::{DataFlash, Port, Transfer},
    table::RunState,
    types::{ChannelHandle, Completion, FlashEvent, InstanceId, Process, State},
};

/// Drives the write-protect line of `cfg`, if it has one.
pub(crate) fn set_write_protect<IO: DigitalOutput>(io: &mut IO, cfg: &InstanceConfig, protect: bool) {
    if let Some(wp) = cfg.write_protect {
        io.write(wp.pin, if protect { wp.active_level } else { !wp.active_level });
    }
}

impl<'d, R, IO, S, T, const N: usize, const H: usize> DataFlash<'d, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    /// Advances every active instance by at most one step.
    pub(crate) fn poll_all(&self) {
        for idx in 0..N {
            if let Some(event) = self.step(idx) {
                self.notify(event);
            }
        }
    }

    fn step(&self, idx: usize) -> Option<FlashEvent> {
        let run = self.with_table(|table| table.active.get(idx).then(|| table.runs[idx]))?;
        let channel = run.channel?;

        if run.process.is_waiting() {
            return self.supervise(idx, channel, &run);
        }

        match (run.state, run.process) {
            (State::SendReadHeader, Process::Write) => self.issue_read_payload(idx, channel),
            (State::Read, Process::Read) => Some(self.finish(idx, channel, Completion::Read)),
            (State::SendWriteHeader, Process::Write) => self.issue_write_chunk(idx, channel, &run),
            (State::Write, Process::Write) => self.complete_write_chunk(idx, channel, &run),
            (State::SendStatusCommand, Process::Write) => self.issue_status_read(idx, channel),
            (State::ReadStatus, Process::Read) => {
                let raw = self.with_port(|port| port.slots[idx].status);
                critical_section::with(|cs| {
                    self.status.borrow(cs).set(StatusRegister::from_bytes(raw))
                });
                Some(self.finish(idx, channel, Completion::Read))
            }
            // Idle, Initialize and the reserved status-before states
            _ => None,
        }
    }

    fn supervise(&self, idx: usize, channel: ChannelHandle, run: &RunState) -> Option<FlashEvent> {
        if !self.supervisor().expired(run.timer) {
            return None;
        }
        match self.config.timeout_policy {
            TimeoutPolicy::Ignore => {
                if !run.timeout_reported {
                    log_warn!("dataflash: instance {} bus timeout, still waiting", idx);
                    self.with_table(|table| table.runs[idx].timeout_reported = true);
                }
                None
            }
            TimeoutPolicy::Abort => {
                log_warn!("dataflash: instance {} bus timeout, aborting", idx);
                self.abort(idx, channel, Completion::TimedOut, true)
            }
        }
    }

    fn issue_read_payload(&self, idx: usize, channel: ChannelHandle) -> Option<FlashEvent> {
        self.enter(idx, State::Read, Process::WaitRead);
        let provider = self.map[idx].provider;
        let res = self.with_port(|port| {
            let Port { bus, slots, .. } = port;
            let bus = bus.provider(provider).ok_or(BusError::Unsupported)?;
            match slots[idx].transfer.as_mut() {
                Some(Transfer::Read(buf)) => bus.read(channel, buf, AddressMode::None),
                _ => Err(BusError::Failed),
            }
        });
        self.abort_on_error(idx, channel, res)
    }

    fn issue_status_read(&self, idx: usize, channel: ChannelHandle) -> Option<FlashEvent> {
        self.enter(idx, State::ReadStatus, Process::WaitRead);
        let provider = self.map[idx].provider;
        let res = self.with_port(|port| {
            let Port { bus, slots, .. } = port;
            let bus = bus.provider(provider).ok_or(BusError::Unsupported)?;
            bus.read(channel, &mut slots[idx].status, AddressMode::None)
        });
        self.abort_on_error(idx, channel, res)
    }

    fn issue_write_chunk(
        &self,
        idx: usize,
        channel: ChannelHandle,
        run: &RunState,
    ) -> Option<FlashEvent> {
        let chunk = self
            .config
            .geometry
            .chunk_len(run.target, run.progress, run.size);
        if chunk == 0 {
            log_warn!("dataflash: instance {} has no bytes left to write", idx);
            return self.abort(idx, channel, Completion::Aborted, false);
        }

        self.enter(idx, State::Write, Process::WaitWrite);
        log_trace!(
            "dataflash: instance {} writing {} bytes at {}",
            idx,
            chunk,
            run.target as usize + run.progress
        );
        let provider = self.map[idx].provider;
        let start = run.progress;
        let res = self.with_port(|port| {
            let Port { bus, slots, .. } = port;
            let bus = bus.provider(provider).ok_or(BusError::Unsupported)?;
            match slots[idx].transfer.as_ref() {
                Some(Transfer::Write(buf)) if start + chunk <= buf.len() => {
                    bus.write(channel, &buf[start..start + chunk], AddressMode::None)
                }
                _ => Err(BusError::Failed),
            }
        });
        self.abort_on_error(idx, channel, res)
    }

    fn complete_write_chunk(
        &self,
        idx: usize,
        channel: ChannelHandle,
        run: &RunState,
    ) -> Option<FlashEvent> {
        let cfg = &self.map[idx];
        if run.progress >= run.size {
            self.with_port(|port| {
                if let Some(bus) = port.bus.provider(cfg.provider) {
                    let _ = bus.stop_transaction(channel);
                }
                set_write_protect(&mut port.io, cfg, true);
            });
            self.with_table(|table| table.reset(idx));
            return Some(self.event(idx, Completion::Write, run.size));
        }

        // Next chunk gets its own transaction, opened with a fresh header
        let res = self.with_port(|port| {
            let bus = port.bus.provider(cfg.provider).ok_or(BusError::Unsupported)?;
            let _ = bus.stop_transaction(channel);
            bus.start_transaction(channel)
        });
        if res.is_err() {
            return self.abort_on_error(idx, channel, res);
        }

        self.enter(idx, State::SendWriteHeader, Process::WaitWrite);
        let header = WriteHeader::new(&self.config.geometry, run.target + run.progress as u32);
        let res = self.with_port(|port| {
            let bus = port.bus.provider(cfg.provider).ok_or(BusError::Unsupported)?;
            bus.write(channel, header.as_bytes(), AddressMode::None)
        });
        self.abort_on_error(idx, channel, res)
    }

    /// Moves an instance to its next waiting step and arms its timeout.
    ///
    /// Must run before the transfer is issued so a fast completion event
    /// finds the instance already waiting.
    fn enter(&self, idx: usize, state: State, process: Process) {
        let supervisor = self.supervisor();
        self.with_table(|table| {
            let run = &mut table.runs[idx];
            run.state = state;
            run.process = process;
            supervisor.arm(&mut run.timer);
        });
    }

    /// Closes the transaction and reports a successful read.
    fn finish(&self, idx: usize, channel: ChannelHandle, completion: Completion) -> FlashEvent {
        let provider = self.map[idx].provider;
        self.with_port(|port| {
            if let Some(bus) = port.bus.provider(provider) {
                let _ = bus.stop_transaction(channel);
            }
        });
        let size = self.with_table(|table| {
            table.reset(idx);
            table.runs[idx].size
        });
        self.event(idx, completion, size)
    }

    fn abort_on_error(
        &self,
        idx: usize,
        channel: ChannelHandle,
        res: Result<(), BusError>,
    ) -> Option<FlashEvent> {
        match res {
            Ok(()) => None,
            Err(_err) => {
                log_error!("dataflash: instance {} bus transfer failed: {:?}", idx, _err);
                self.abort(idx, channel, Completion::Aborted, false)
            }
        }
    }

    /// Tears down the operation of `idx` and builds its notification.
    ///
    /// With `only_if_waiting`, does nothing if a bus event already advanced
    /// the instance.
    pub(crate) fn abort(
        &self,
        idx: usize,
        channel: ChannelHandle,
        completion: Completion,
        only_if_waiting: bool,
    ) -> Option<FlashEvent> {
        let supervisor = self.supervisor();
        let (progress, writing) = self.with_table(|table| {
            let run = &mut table.runs[idx];
            if only_if_waiting && !run.process.is_waiting() {
                return None;
            }
            supervisor.release(&mut run.timer);
            let writing = matches!(run.state, State::SendWriteHeader | State::Write);
            let progress = run.progress;
            table.reset(idx);
            Some((progress, writing))
        })?;

        let cfg = &self.map[idx];
        self.with_port(|port| {
            if let Some(bus) = port.bus.provider(cfg.provider) {
                let _ = bus.stop_transaction(channel);
            }
            if writing {
                set_write_protect(&mut port.io, cfg, true);
            }
        });
        Some(self.event(idx, completion, progress))
    }

    fn event(&self, idx: usize, completion: Completion, count: usize) -> FlashEvent {
        FlashEvent::new(
            idx as InstanceId,
            self.config.provider_id,
            completion,
            count.min(u16::MAX as usize) as u16,
        )
    }
}
