//! The memory side of a user process: copying to and from its virtual
//! address space, servicing its TLB exceptions, and tearing it down when one of
//! them turns out to be fatal.

use log::{info, trace, warn};

use crate::{
    address_space::AddressSpace,
    error::{ExitCause, Result, VmError},
    kernel::Kernel,
    mmu::{Exception, REG_A0, REG_A1, REG_SP},
    tlb::{self, TlbManager},
};

enum Transfer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl<'a> Transfer<'a> {
    fn len(&self) -> usize {
        match self {
            Transfer::Read(buf) => buf.len(),
            Transfer::Write(buf) => buf.len(),
        }
    }

    fn is_write(&self) -> bool {
        matches!(self, Transfer::Write(_))
    }
}

pub struct Process {
    pid: u32,
    page_size: usize,
    space: Option<AddressSpace>,
    exit: Option<ExitCause>,
    argc: usize,
    argv: usize,
    initial_sp: usize,
}

impl Process {
    pub(crate) fn new(space: AddressSpace, page_size: usize) -> Self {
        let argv = space.argument_vpn() * page_size;

        Process {
            pid: space.pid(),
            page_size,
            space: Some(space),
            exit: None,
            argc: 0,
            argv,
            // the stack grows down from the argument page
            initial_sp: argv,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    pub fn argv(&self) -> usize {
        self.argv
    }

    pub fn initial_sp(&self) -> usize {
        self.initial_sp
    }

    pub fn is_running(&self) -> bool {
        self.exit.is_none()
    }

    pub fn exit_cause(&self) -> Option<ExitCause> {
        self.exit
    }

    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    fn live_space(&self) -> Result<&AddressSpace> {
        match (&self.space, self.exit) {
            (Some(space), None) => Ok(space),
            (_, cause) => Err(VmError::Terminated {
                pid: self.pid,
                cause: cause.unwrap_or(ExitCause::BusError),
            }),
        }
    }

    /// Lays `args` out in the argument page: `argc` little-endian pointers,
    /// then the NUL-terminated strings they point at.
    pub(crate) fn write_arguments(&mut self, kernel: &Kernel, args: &[&str]) -> Result<()> {
        let mut pointers = Vec::with_capacity(args.len() * 4);
        let mut strings = Vec::new();
        let mut string_offset = self.argv + args.len() * 4;

        for arg in args {
            pointers.extend_from_slice(&(string_offset as u32).to_le_bytes());
            strings.extend_from_slice(arg.as_bytes());
            strings.push(0);
            string_offset += arg.len() + 1;
        }

        pointers.append(&mut strings);
        if !pointers.is_empty() {
            self.write_virtual_memory(kernel, self.argv, &pointers)?;
        }
        self.argc = args.len();

        Ok(())
    }

    /// Points the stack pointer and the argument registers at this process.
    pub fn init_registers(&self, kernel: &Kernel) {
        let mut mem = kernel.memory.acquire();

        mem.mmu.write_register(REG_SP, self.initial_sp as u32);
        mem.mmu.write_register(REG_A0, self.argc as u32);
        mem.mmu.write_register(REG_A1, self.argv as u32);
    }

    pub fn read_virtual_memory(&mut self, kernel: &Kernel, vaddr: usize, data: &mut [u8]) -> Result<usize> {
        self.transfer(kernel, vaddr, Transfer::Read(data))
    }

    pub fn write_virtual_memory(&mut self, kernel: &Kernel, vaddr: usize, data: &[u8]) -> Result<usize> {
        self.transfer(kernel, vaddr, Transfer::Write(data))
    }

    /// Reads a NUL-terminated string of at most `max_length` bytes. `None`
    /// when no terminator shows up in time.
    pub fn read_virtual_memory_string(
        &mut self,
        kernel: &Kernel,
        vaddr: usize,
        max_length: usize,
    ) -> Result<Option<String>> {
        let end = self.live_space()?.num_pages() * self.page_size;
        let length = (max_length + 1).min(end.saturating_sub(vaddr));

        let mut bytes = vec![0; length];
        let read = self.read_virtual_memory(kernel, vaddr, &mut bytes)?;

        Ok(bytes[..read]
            .iter()
            .position(|b| *b == 0)
            .map(|nul| String::from_utf8_lossy(&bytes[..nul]).into_owned()))
    }

    fn transfer(&mut self, kernel: &Kernel, vaddr: usize, data: Transfer<'_>) -> Result<usize> {
        let space = self.live_space()?;
        let length = data.len();

        if length == 0 {
            return Ok(0);
        }

        let checked = check_range(space, self.page_size, vaddr, length, data.is_write());
        let copied = checked.and_then(|()| copy_pages(kernel, space, vaddr, data));

        copied.map_err(|e| self.terminate(kernel, e))
    }

    /// One simulated load instruction.
    pub fn load_byte(&mut self, kernel: &Kernel, vaddr: usize) -> Result<u8> {
        loop {
            let pid = self.live_space()?.pid();

            let attempt = {
                let mut mem = kernel.memory.acquire();
                let mem = &mut *mem;
                mem.tlb.restore(&mut mem.mmu, &mut mem.page_table, pid);
                mem.mmu.translate(vaddr, false).map(|paddr| mem.mmu.memory()[paddr])
            };

            match attempt {
                Ok(byte) => return Ok(byte),
                Err(cause) => self.handle_exception(kernel, cause)?,
            }
        }
    }

    /// One simulated store instruction.
    pub fn store_byte(&mut self, kernel: &Kernel, vaddr: usize, value: u8) -> Result<()> {
        loop {
            let pid = self.live_space()?.pid();

            let attempt = {
                let mut mem = kernel.memory.acquire();
                let mem = &mut *mem;
                mem.tlb.restore(&mut mem.mmu, &mut mem.page_table, pid);
                mem.mmu
                    .translate(vaddr, true)
                    .map(|paddr| mem.mmu.memory_mut()[paddr] = value)
            };

            match attempt {
                Ok(()) => return Ok(()),
                Err(cause) => self.handle_exception(kernel, cause)?,
            }
        }
    }

    /// Entry point for exceptions raised while this process runs. A miss that
    /// cannot be resolved, or a read-only violation, ends the process.
    pub fn handle_exception(&mut self, kernel: &Kernel, cause: Exception) -> Result<()> {
        let space = self.live_space()?;

        let outcome = {
            let mut mem = kernel.memory.acquire();
            let mem = &mut *mem;

            match cause {
                Exception::TlbMiss { vaddr } => tlb::handle_miss(mem, &kernel.swap, space, vaddr).map(|_| ()),
                Exception::ReadOnly { vaddr } => Err(VmError::ReadOnly {
                    vpn: mem.mmu.page_from_address(vaddr),
                }),
            }
        };

        outcome.map_err(|e| self.terminate(kernel, e))
    }

    pub fn exit(&mut self, kernel: &Kernel, status: i32) {
        info!("process {}: exit({})", self.pid, status);
        self.finish(kernel, ExitCause::Exit(status));
    }

    fn terminate(&mut self, kernel: &Kernel, err: VmError) -> VmError {
        let cause = err.exit_cause();
        warn!("process {}: killed by {} ({})", self.pid, cause, err);

        self.finish(kernel, cause);

        VmError::Terminated { pid: self.pid, cause }
    }

    fn finish(&mut self, kernel: &Kernel, cause: ExitCause) {
        assert!(
            !kernel.memory.is_held_by_current_thread(),
            "process torn down with the memory lock held"
        );

        if let Some(space) = self.space.take() {
            kernel.teardown_address_space(&space);
        }
        if self.exit.is_none() {
            self.exit = Some(cause);
        }
    }
}

/// Every page in `[vaddr, vaddr + len)` must exist, and be writable for a write,
/// before a single byte moves.
fn check_range(space: &AddressSpace, page_size: usize, vaddr: usize, len: usize, write: bool) -> Result<()> {
    let last = vaddr
        .checked_add(len - 1)
        .ok_or(VmError::Unmapped { vpn: usize::MAX / page_size })?;

    for vpn in vaddr / page_size..=last / page_size {
        match space.origin(vpn) {
            None => return Err(VmError::Unmapped { vpn }),
            Some(origin) if write && origin.read_only() => return Err(VmError::ReadOnly { vpn }),
            Some(_) => {}
        }
    }

    Ok(())
}

fn copy_pages(kernel: &Kernel, space: &AddressSpace, vaddr: usize, mut data: Transfer<'_>) -> Result<usize> {
    let page_size = kernel.page_size();
    let length = data.len();
    let write = data.is_write();
    let mut amount = 0;

    while amount < length {
        let addr = vaddr + amount;
        let vpn = addr / page_size;
        let offset = addr % page_size;
        let count = (page_size - offset).min(length - amount);

        let mut mem = kernel.memory.acquire();
        let mem = &mut *mem;
        mem.tlb.restore(&mut mem.mmu, &mut mem.page_table, space.pid());

        let slot = match TlbManager::lookup(&mem.mmu, vpn) {
            Some(slot) => slot,
            None => tlb::handle_miss(mem, &kernel.swap, space, addr)?,
        };

        let mut entry = mem.mmu.read_tlb_entry(slot);
        if write && entry.read_only {
            return Err(VmError::ReadOnly { vpn });
        }

        let paddr = mem.mmu.make_address(entry.ppn, offset);
        let memory = mem.mmu.memory_mut();
        match &mut data {
            Transfer::Read(buf) => buf[amount..amount + count].copy_from_slice(&memory[paddr..paddr + count]),
            Transfer::Write(buf) => memory[paddr..paddr + count].copy_from_slice(&buf[amount..amount + count]),
        }
        trace!(
            "process {}: {} {} bytes at {:#x} (frame {})",
            space.pid(),
            if write { "wrote" } else { "read" },
            count,
            addr,
            entry.ppn
        );

        entry.used = true;
        entry.dirty |= write;
        mem.mmu.write_tlb_entry(slot, entry);

        amount += count;
    }

    Ok(amount)
}
