use bitmaps::{Bits, BitsImpl};

use crate::dataflash::{
    bus::{AddressMode, BusRegistry},
    codec::{ReadHeader, WriteHeader, opcode},
    config::InstanceConfig,
    error::{BusError, FlashError},
    io::DigitalOutput,
    notify::{EventFilter, EventHandler},
    sched::{TaskScheduler, TimerAllocator},
    sequencer::set_write_protect,
    status::StatusRegister,
    storage::{DataFlash, Transfer},
    types::{ChannelHandle, InstanceId, State},
};

/// Entry point for the poll context: client requests and the poll tick.
///
/// Requests return as soon as the command header is queued; the outcome
/// arrives later as a [`FlashEvent`](crate::dataflash::FlashEvent).
pub struct ClientHandle<'a, 'd, R, IO, S, T, const N: usize, const H: usize>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    storage: &'a DataFlash<'d, R, IO, S, T, N, H>,
}

impl<R, IO, S, T, const N: usize, const H: usize> core::fmt::Debug
    for ClientHandle<'_, '_, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientHandle").finish_non_exhaustive()
    }
}

/// Validated request, ready to be put on the bus.
struct Launch<'h> {
    idx: usize,
    channel: ChannelHandle,
    state: State,
    target: u32,
    size: usize,
    header: &'h [u8],
}

impl<'a, 'd, R, IO, S, T, const N: usize, const H: usize> ClientHandle<'a, 'd, R, IO, S, T, N, H>
where
    R: BusRegistry,
    IO: DigitalOutput,
    S: TaskScheduler,
    T: TimerAllocator,
    BitsImpl<N>: Bits,
{
    pub(crate) fn new(storage: &'a DataFlash<'d, R, IO, S, T, N, H>) -> Self {
        Self { storage }
    }

    /// Brings every instance to `Idle`.
    ///
    /// Clears the handler registry, creates the poll task, binds each
    /// instance to its bus channel, write-protects and releases reset on the
    /// configured lines and routes bus completions to the driver. Instances
    /// whose provider cannot allocate a channel stay unbound.
    pub fn initialize(&self) -> Result<(), FlashError> {
        let storage = self.storage;
        critical_section::with(|cs| storage.callbacks.borrow_ref_mut(cs).clear());

        let task = match storage.with_table(|table| table.task) {
            Some(task) => task,
            None => storage
                .scheduler
                .create_task(
                    storage.config.task_name,
                    storage.config.poll_period_ms,
                    false,
                )
                .ok_or(FlashError::TaskUnavailable)?,
        };
        storage.with_table(|table| table.task = Some(task));

        for (idx, cfg) in storage.map.iter().enumerate() {
            let channel = storage.with_port(|port| {
                if let Some(wp) = cfg.write_protect {
                    port.io.write(wp.pin, wp.active_level);
                }
                if let Some(reset) = cfg.reset {
                    port.io.write(reset.pin, !reset.active_level);
                }
                bind(&mut port.bus, idx, cfg)
            });

            let supervisor = storage.supervisor();
            storage.with_table(|table| {
                let run = &mut table.runs[idx];
                supervisor.release(&mut run.timer);
                run.channel = channel;
                table.reset(idx);
            });
        }

        log_debug!("dataflash: initialized {} instances", N);
        Ok(())
    }

    /// Starts reading `buf.len()` bytes at `address` into `buf`.
    ///
    /// Once the request passes validation, `buf` is held by the instance
    /// and handed back by [`reclaim`](Self::reclaim) when it is idle again,
    /// even if the bus then rejects the request. A request failing
    /// validation does not keep it.
    pub fn read(&self, id: InstanceId, buf: &'d mut [u8], address: u32) -> Result<(), FlashError> {
        let (idx, channel, target) = self.admit(id, buf.len(), address)?;
        let header = ReadHeader::new(&self.storage.config.geometry, target);
        let size = buf.len();
        self.park(idx, Transfer::Read(buf));

        self.launch(Launch {
            idx,
            channel,
            state: State::SendReadHeader,
            target,
            size,
            header: header.as_bytes(),
        })
    }

    /// Starts programming `buf` at `address`.
    ///
    /// The write is split at page boundaries; each page gets its own
    /// transaction and header. If a RAM mirror is registered, `buf` is
    /// copied into it at `address` once the first header is queued.
    pub fn write(&self, id: InstanceId, buf: &'d [u8], address: u32) -> Result<(), FlashError> {
        let storage = self.storage;
        let (idx, channel, target) = self.admit(id, buf.len(), address)?;

        let mirror_fits = storage.with_port(|port| {
            port.slots[idx].mirror.as_ref().is_none_or(|mirror| {
                address as usize + buf.len() <= mirror.len()
            })
        });
        if !mirror_fits {
            return Err(FlashError::MirrorOutOfBounds);
        }

        let header = WriteHeader::new(&storage.config.geometry, target);
        self.park(idx, Transfer::Write(buf));
        self.launch(Launch {
            idx,
            channel,
            state: State::SendWriteHeader,
            target,
            size: buf.len(),
            header: header.as_bytes(),
        })?;

        storage.with_port(|port| {
            let start = address as usize;
            if let Some(dst) = port.slots[idx]
                .mirror
                .as_deref_mut()
                .and_then(|mirror| mirror.get_mut(start..start + buf.len()))
            {
                dst.copy_from_slice(buf);
            }
        });
        Ok(())
    }

    /// Reads the device status register into [`DataFlash::status`].
    ///
    /// Completion is notified as a read of two bytes.
    pub fn refresh_status(&self, id: InstanceId) -> Result<(), FlashError> {
        let (idx, channel, _) = self.admit(id, StatusRegister::LEN, 0)?;
        self.launch(Launch {
            idx,
            channel,
            state: State::SendStatusCommand,
            target: 0,
            size: StatusRegister::LEN,
            header: &[opcode::READ_STATUS_REGISTER],
        })
    }

    /// Hands back the buffer of the last operation once the instance is idle.
    pub fn reclaim(&self, id: InstanceId) -> Option<Transfer<'d>> {
        let idx = self.index(id).ok()?;
        if !self.storage.with_table(|table| table.runs[idx].is_idle()) {
            return None;
        }
        self.storage
            .with_port(|port| port.slots[idx].transfer.take())
    }

    /// Looks up the instance serving `client_id`.
    ///
    /// Records `memory_offset`, added to every address the client passes,
    /// and the RAM `mirror` that receives a copy of every write. Returns
    /// `None` if no instance serves that channel.
    pub fn get_allocation(
        &self,
        client_id: u8,
        mirror: Option<&'d mut [u8]>,
        memory_offset: u32,
    ) -> Option<InstanceId> {
        let storage = self.storage;
        let idx = storage.map.iter().position(|cfg| cfg.channel == client_id)?;

        storage.with_table(|table| table.runs[idx].memory_offset = memory_offset);
        storage.with_port(|port| port.slots[idx].mirror = mirror);
        Some(idx as InstanceId)
    }

    /// Registers `handler` for completion events accepted by `filter`.
    pub fn register_event_handler(
        &self,
        handler: EventHandler,
        filter: EventFilter,
    ) -> Result<(), FlashError> {
        critical_section::with(|cs| {
            self.storage
                .callbacks
                .borrow_ref_mut(cs)
                .register(handler, filter)
        })
    }

    /// Removes every registration of `handler`. Returns false if it had none.
    pub fn unregister_event_handler(&self, handler: EventHandler) -> bool {
        critical_section::with(|cs| self.storage.callbacks.borrow_ref_mut(cs).unregister(handler))
    }

    /// True unless `id` is an initialized instance with no operation
    /// running. Unknown ids count as busy since they accept no request.
    pub fn is_busy(&self, id: InstanceId) -> bool {
        self.storage
            .run_state(id)
            .is_none_or(|run| !run.is_idle())
    }

    /// Poll tick: advances every active instance by one step.
    pub fn poll(&self) {
        self.storage.poll_all();
    }

    fn index(&self, id: InstanceId) -> Result<usize, FlashError> {
        let idx = id as usize;
        if idx < N {
            Ok(idx)
        } else {
            Err(FlashError::InvalidInstance)
        }
    }

    /// Checks that `id` may start a `size`-byte operation at `address`.
    ///
    /// Returns the instance index, its channel and the device address.
    fn admit(
        &self,
        id: InstanceId,
        size: usize,
        address: u32,
    ) -> Result<(usize, ChannelHandle, u32), FlashError> {
        let idx = self.index(id)?;
        if size == 0 {
            return Err(FlashError::ZeroLength);
        }
        if size > u16::MAX as usize {
            return Err(FlashError::OutOfRange);
        }

        let storage = self.storage;
        let (channel, target) = storage.with_table(|table| {
            let run = &table.runs[idx];
            let channel = run.channel.ok_or(FlashError::Unbound)?;
            if !run.is_idle() {
                return Err(FlashError::Busy);
            }
            if table.device_active(&storage.map, idx) {
                return Err(FlashError::DeviceBusy);
            }
            let target = run
                .memory_offset
                .checked_add(address)
                .ok_or(FlashError::OutOfRange)?;
            Ok((channel, target))
        })?;

        if !storage.config.geometry.contains(target, size) {
            return Err(FlashError::OutOfRange);
        }
        Ok((idx, channel, target))
    }

    /// Stores the client buffer of an admitted request.
    fn park(&self, idx: usize, transfer: Transfer<'d>) {
        self.storage
            .with_port(|port| port.slots[idx].transfer = Some(transfer));
    }

    /// Opens the transaction and queues the command header.
    ///
    /// On failure the instance is back in `Idle` with the bus closed and
    /// write-protect reasserted.
    fn launch(&self, req: Launch<'_>) -> Result<(), FlashError> {
        let storage = self.storage;
        let cfg = &storage.map[req.idx];
        let writing = req.state == State::SendWriteHeader;

        storage.with_port(|port| {
            let bus = port.bus.provider(cfg.provider).ok_or(FlashError::Unsupported)?;
            bus.start_transaction(req.channel).map_err(|err| match err {
                BusError::Unsupported => FlashError::Unsupported,
                BusError::Failed => FlashError::StartFailed,
            })?;
            if writing {
                set_write_protect(&mut port.io, cfg, false);
            }
            Ok::<(), FlashError>(())
        })?;

        let supervisor = storage.supervisor();
        storage.with_table(|table| {
            table.begin(req.idx, req.state, req.target, req.size);
            supervisor.arm(&mut table.runs[req.idx].timer);
        });

        let sent = storage.with_port(|port| {
            port.bus
                .provider(cfg.provider)
                .ok_or(BusError::Unsupported)?
                .write(req.channel, req.header, AddressMode::None)
        });

        if let Err(err) = sent {
            log_warn!("dataflash: instance {} header rejected: {}", req.idx, err);
            storage.with_table(|table| {
                supervisor.release(&mut table.runs[req.idx].timer);
                table.reset(req.idx);
            });
            storage.with_port(|port| {
                if let Some(bus) = port.bus.provider(cfg.provider) {
                    let _ = bus.stop_transaction(req.channel);
                }
                if writing {
                    set_write_protect(&mut port.io, cfg, true);
                }
            });
            return Err(err.into());
        }

        log_trace!(
            "dataflash: instance {} started {} bytes at {}",
            req.idx,
            req.size,
            req.target
        );
        if let Some(task) = storage.with_table(|table| table.task) {
            storage.scheduler.resume_task(task);
        }
        Ok(())
    }
}

/// Allocates the channel of one instance and routes its completions to the
/// driver.
fn bind<R: BusRegistry>(bus: &mut R, idx: usize, cfg: &InstanceConfig) -> Option<ChannelHandle> {
    let Some(bus) = bus.provider(cfg.provider) else {
        log_warn!("dataflash: instance {} has no bus provider", idx);
        return None;
    };
    let channel = match bus.get_allocation(cfg.bound_id) {
        Ok(channel) => channel,
        Err(_err) => {
            log_warn!("dataflash: instance {} channel allocation failed: {}", idx, _err);
            return None;
        }
    };
    match bus.register_event_handler(channel, None) {
        Ok(()) | Err(BusError::Unsupported) => {}
        Err(BusError::Failed) => {
            log_warn!("dataflash: instance {} event registration failed", idx);
        }
    }
    Some(channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataflash::{
        config::TimeoutPolicy,
        test_support::{BusOp, RESET_PIN, WP_PIN, ready_flash, test_flash},
    };

    #[test]
    fn initialize_binds_instances_and_sets_idle() {
        let flash = test_flash(TimeoutPolicy::Ignore);
        assert!(flash.client().is_busy(0));

        flash.client().initialize().unwrap();

        for id in 0..3 {
            let run = flash.run_state(id).unwrap();
            assert!(run.is_idle());
            assert!(run.channel.is_some());
        }
        assert_eq!(flash.run_state(2).unwrap().channel, Some(ChannelHandle(1)));
        flash.with_port(|port| {
            assert_eq!(port.io.level(WP_PIN), Some(false));
            assert_eq!(port.io.level(RESET_PIN), Some(true));
            assert!(port.bus.ops.contains(&BusOp::Register(ChannelHandle(0))));
        });
        assert_eq!(flash.scheduler.created.get(), 1);
    }

    #[test]
    fn initialize_twice_reuses_task() {
        let flash = ready_flash(TimeoutPolicy::Ignore);
        flash.client().initialize().unwrap();
        assert_eq!(flash.scheduler.created.get(), 1);
    }

    #[test]
    fn initialize_fails_without_task() {
        let flash = test_flash(TimeoutPolicy::Ignore);
        flash.scheduler.fail_create.set(true);
        assert_eq!(flash.client().initialize(), Err(FlashError::TaskUnavailable));
        assert_eq!(flash.run_state(0).unwrap().state, State::Initialize);
    }

    #[test]
    fn initialize_tolerates_bus_without_event_routing() {
        let flash = test_flash(TimeoutPolicy::Ignore);
        flash.with_bus(|bus| bus.events_supported = false);
        flash.client().initialize().unwrap();
        assert!(flash.run_state(0).unwrap().is_idle());
    }

    #[test]
    fn read_before_initialize_is_unbound() {
        let mut buf = [0u8; 4];
        let flash = test_flash(TimeoutPolicy::Ignore);
        assert_eq!(flash.client().read(0, &mut buf, 0), Err(FlashError::Unbound));
        assert!(flash.with_bus(|bus| bus.ops.is_empty()));
        assert_eq!(flash.timers.allocated(), 0);
    }

    #[test]
    fn unknown_instance_counts_as_busy() {
        let flash = ready_flash(TimeoutPolicy::Ignore);
        assert!(!flash.client().is_busy(2));
        assert!(flash.client().is_busy(3));
    }

    #[test]
    fn read_on_invalid_instance_touches_nothing() {
        let mut buf = [0u8; 4];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        assert_eq!(
            flash.client().read(3, &mut buf, 0),
            Err(FlashError::InvalidInstance)
        );
        assert!(flash.with_bus(|bus| bus.transfers()).is_empty());
    }

    #[test]
    fn read_queues_header_and_resumes_task() {
        let mut buf = [0u8; 16];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().read(2, &mut buf, 0x0A17).unwrap();

        let run = flash.run_state(2).unwrap();
        assert_eq!(run.state, State::SendReadHeader);
        assert_eq!(run.size, 16);
        assert!(run.timer.is_some());
        flash.with_bus(|bus| {
            assert_eq!(
                bus.transfers(),
                [BusOp::Start(ChannelHandle(1)), BusOp::Write(ChannelHandle(1), 5)]
            );
            assert_eq!(bus.writes[0], [0xD2, 0x00, 0x0A, 0x17, 0x00]);
        });
        assert_eq!(flash.scheduler.resumed.get(), 1);
        assert!(flash.client().is_busy(2));
    }

    #[test]
    fn second_request_while_busy_is_rejected() {
        let mut first = [0u8; 4];
        let second = [0u8; 4];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().read(2, &mut first, 0).unwrap();
        let before = flash.with_bus(|bus| bus.ops.len());

        assert_eq!(flash.client().write(2, &second, 0), Err(FlashError::Busy));
        assert_eq!(flash.with_bus(|bus| bus.ops.len()), before);
        assert_eq!(flash.run_state(2).unwrap().state, State::SendReadHeader);
    }

    #[test]
    fn second_write_leaves_first_untouched() {
        let first = [1u8; 8];
        let second = [2u8; 8];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().write(2, &first, 0x20).unwrap();
        let run = flash.run_state(2).unwrap();
        let ops = flash.with_bus(|bus| bus.ops.len());

        assert_eq!(flash.client().write(2, &second, 0x80), Err(FlashError::Busy));
        assert_eq!(flash.run_state(2).unwrap(), run);
        assert_eq!(run.state, State::SendWriteHeader);
        assert_eq!(run.target, 0x20);
        assert_eq!(flash.with_bus(|bus| bus.ops.len()), ops);
    }

    #[test]
    fn instances_sharing_a_device_are_exclusive() {
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut c = [0u8; 4];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().read(0, &mut a, 0).unwrap();
        assert_eq!(flash.client().read(1, &mut b, 0), Err(FlashError::DeviceBusy));
        flash.client().read(2, &mut c, 0).unwrap();
    }

    #[test]
    fn size_and_range_are_validated() {
        let mut empty: [u8; 0] = [];
        let big = [0u8; 70_000];
        let tail = [0u8; 2];
        let flash = ready_flash(TimeoutPolicy::Ignore);
        let capacity = flash.config().geometry.capacity();

        assert_eq!(flash.client().read(2, &mut empty, 0), Err(FlashError::ZeroLength));
        assert_eq!(flash.client().write(2, &big, 0), Err(FlashError::OutOfRange));
        assert_eq!(
            flash.client().write(2, &tail, capacity - 1),
            Err(FlashError::OutOfRange)
        );
        assert!(flash.with_bus(|bus| bus.transfers()).is_empty());
    }

    #[test]
    fn memory_offset_shifts_device_address() {
        let data = [1u8; 4];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        assert_eq!(flash.client().get_allocation(2, None, 0x100), Some(2));
        flash.client().write(2, &data, 0x10).unwrap();

        assert_eq!(flash.run_state(2).unwrap().target, 0x110);
        flash.with_bus(|bus| assert_eq!(bus.writes[0], [0x58, 0x00, 0x01, 0x10]));
    }

    #[test]
    fn get_allocation_without_match_is_none() {
        let flash = ready_flash(TimeoutPolicy::Ignore);
        assert_eq!(flash.client().get_allocation(9, None, 0), None);
    }

    #[test]
    fn write_releases_protection_and_fills_mirror() {
        let mut mirror = [0u8; 32];
        let data = [7u8; 8];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().get_allocation(0, Some(&mut mirror), 0);
        flash.client().write(0, &data, 16).unwrap();

        flash.with_port(|port| {
            assert_eq!(port.io.level(WP_PIN), Some(true));
            let mirror = port.slots[0].mirror.as_deref().unwrap();
            assert_eq!(&mirror[16..24], &data);
            assert!(mirror[..16].iter().all(|b| *b == 0));
        });
    }

    #[test]
    fn write_past_mirror_fails_before_bus() {
        let mut mirror = [0u8; 8];
        let data = [7u8; 8];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().get_allocation(2, Some(&mut mirror), 0);
        assert_eq!(
            flash.client().write(2, &data, 4),
            Err(FlashError::MirrorOutOfBounds)
        );
        assert!(flash.with_bus(|bus| bus.transfers()).is_empty());
        assert!(flash.client().reclaim(2).is_none());
    }

    #[test]
    fn failed_start_leaves_instance_idle() {
        let mut buf = [0u8; 4];
        let flash = ready_flash(TimeoutPolicy::Ignore);
        flash.with_bus(|bus| bus.fail_start = true);

        assert_eq!(flash.client().read(2, &mut buf, 0), Err(FlashError::StartFailed));
        assert!(flash.run_state(2).unwrap().is_idle());
        assert_eq!(flash.timers.allocated(), 0);
    }

    #[test]
    fn failed_header_resets_and_reprotects() {
        let data = [0u8; 4];
        let flash = ready_flash(TimeoutPolicy::Ignore);
        flash.with_bus(|bus| bus.fail_write = true);

        assert_eq!(
            flash.client().write(0, &data, 0),
            Err(FlashError::TransferFailed)
        );
        assert!(flash.run_state(0).unwrap().is_idle());
        assert_eq!(flash.timers.allocated(), 0);
        flash.with_port(|port| {
            assert_eq!(port.io.level(WP_PIN), Some(false));
            assert_eq!(
                port.bus.transfers(),
                [BusOp::Start(ChannelHandle(0)), BusOp::Stop(ChannelHandle(0))]
            );
        });
        assert_eq!(flash.scheduler.resumed.get(), 0);
    }

    #[test]
    fn reclaim_waits_for_idle() {
        let mut buf = [0u8; 4];
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().read(2, &mut buf, 0).unwrap();
        assert!(flash.client().reclaim(2).is_none());
        assert!(flash.client().reclaim(9).is_none());
    }

    #[test]
    fn status_refresh_sends_single_opcode() {
        let flash = ready_flash(TimeoutPolicy::Ignore);

        flash.client().refresh_status(2).unwrap();

        assert_eq!(flash.run_state(2).unwrap().state, State::SendStatusCommand);
        flash.with_bus(|bus| assert_eq!(bus.writes[0], [0xD7]));
        assert_eq!(flash.scheduler.resumed.get(), 1);
    }
}
