//! The kernel object: owns the machine, the global paging tables and the swap
//! file for as long as the kernel runs.

use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};

use crate::{
    address_space::AddressSpace,
    config::VmConfig,
    error::{Result, VmError},
    frame_allocator::FrameAllocator,
    mmu::{Mmu, TranslationEntry},
    page_loader::Section,
    page_replacer::ReplacementPolicy,
    page_table::{InvertedPageTable, Vp},
    process::Process,
    swap::{SwapFile, SwapStats},
    sync::KernelLock,
    tlb::TlbManager,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmStats {
    pub tlb_misses: u64,
    pub page_faults: u64,
    pub evictions: u64,
    pub swap: SwapStats,
}

/// Everything guarded by the memory lock. A whole miss (lookup, eviction,
/// load, install) happens under one acquisition.
pub(crate) struct MemoryState {
    pub(crate) mmu: Mmu,
    pub(crate) page_table: InvertedPageTable,
    pub(crate) frames: FrameAllocator,
    pub(crate) tlb: TlbManager,
    pub(crate) policy: ReplacementPolicy,
    pub(crate) stats: VmStats,
}

pub struct Kernel {
    config: VmConfig,
    pub(crate) memory: KernelLock<MemoryState>,
    pub(crate) swap: SwapFile,
    next_pid: AtomicU32,
}

impl Kernel {
    pub fn new(config: VmConfig) -> Result<Kernel> {
        config.validate()?;

        let swap = SwapFile::open(&config.swap_path, config.page_size)?;

        info!(
            "kernel: {} frames of {} bytes, {} tlb slots, {:?} replacement",
            config.num_frames, config.page_size, config.tlb_size, config.replacement
        );

        let memory = MemoryState {
            mmu: Mmu::new(config.page_size, config.num_frames, config.tlb_size),
            page_table: InvertedPageTable::new(),
            frames: FrameAllocator::new(config.num_frames),
            tlb: TlbManager::new(config.tlb_seed),
            policy: config.replacement,
            stats: VmStats::default(),
        };

        Ok(Kernel {
            config,
            memory: KernelLock::new(memory),
            swap,
            next_pid: AtomicU32::new(1),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Creates a process running the image made of `sections`, with `args`
    /// copied into its argument page.
    pub fn spawn(&self, sections: Vec<Box<dyn Section>>, args: &[&str]) -> Result<Process> {
        let args_size: usize = args.iter().map(|arg| 4 + arg.len() + 1).sum();
        if args_size > self.config.page_size {
            return Err(VmError::BadExecutable(format!(
                "arguments need {} bytes, a page holds {}",
                args_size, self.config.page_size
            )));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let space = self.build_address_space(pid, sections, self.config.stack_pages)?;

        let mut process = Process::new(space, self.config.page_size);
        process.write_arguments(self, args)?;
        info!("kernel: spawned pid {} ({} args)", pid, args.len());

        Ok(process)
    }

    /// Registers every page of a new address space in the page table. Nothing
    /// is loaded until it is touched.
    pub fn build_address_space(
        &self,
        pid: u32,
        sections: Vec<Box<dyn Section>>,
        stack_pages: usize,
    ) -> Result<AddressSpace> {
        let space = AddressSpace::build(pid, sections, stack_pages)?;

        let mut mem = self.memory.acquire();
        for vp in space.vps() {
            let read_only = space.origin(vp.vpn).is_some_and(|o| o.read_only());
            mem.page_table.install(vp, TranslationEntry::unmapped(vp.vpn, read_only));
        }
        debug!("kernel: pid {} has {} pages", pid, space.num_pages());

        Ok(space)
    }

    /// Destroys every record of `space`, returning its frames and swap slots.
    pub fn teardown_address_space(&self, space: &AddressSpace) {
        let mut mem = self.memory.acquire();
        let mem = &mut *mem;

        mem.tlb.discard(&mut mem.mmu, space.pid());

        for vp in space.vps() {
            mem.page_table.remove(vp, &mut mem.frames);
            self.swap.free_slot(vp);
        }
        debug!(
            "kernel: pid {} torn down, {} frames free",
            space.pid(),
            mem.frames.free_count()
        );
    }

    /// Saves the outgoing process's TLB state and hands the TLB to `to`.
    pub fn context_switch(&self, from: Option<&Process>, to: &Process) {
        let mut mem = self.memory.acquire();
        let mem = &mut *mem;

        if from.is_some() {
            mem.tlb.save(&mut mem.mmu, &mut mem.page_table);
        }
        mem.tlb.restore(&mut mem.mmu, &mut mem.page_table, to.pid());
        debug!("kernel: switched to pid {}", to.pid());
    }

    pub fn stats(&self) -> VmStats {
        let stats = self.memory.acquire().stats;

        VmStats {
            swap: self.swap.stats(),
            ..stats
        }
    }

    pub fn lookup(&self, vp: Vp) -> Option<TranslationEntry> {
        self.memory.acquire().page_table.lookup(vp)
    }

    /// `(frame, owner)` of every resident page.
    pub fn resident_pages(&self) -> Vec<(usize, Vp)> {
        self.memory.acquire().page_table.resident().collect()
    }

    pub fn free_frames(&self) -> usize {
        self.memory.acquire().frames.free_count()
    }

    pub fn tlb_entries(&self) -> Vec<TranslationEntry> {
        let mem = self.memory.acquire();

        (0..mem.mmu.tlb_size()).map(|slot| mem.mmu.read_tlb_entry(slot)).collect()
    }

    pub fn read_register(&self, reg: usize) -> u32 {
        self.memory.acquire().mmu.read_register(reg)
    }

    pub fn has_swap_entry(&self, vp: Vp) -> bool {
        self.swap.has_entry(vp)
    }

    /// Traces every page table record.
    pub fn dump_page_table(&self) {
        self.memory.acquire().page_table.dump();
    }

    /// Checks the page table's two maps agree with each other and the free list.
    pub fn is_consistent(&self) -> bool {
        let mem = self.memory.acquire();
        mem.page_table.is_consistent(&mem.frames)
    }

    /// Closes and deletes the swap file.
    pub fn shutdown(self) -> Result<()> {
        let stats = self.stats();
        info!(
            "kernel: shutdown after {} faults, {} evictions, {} swap writes",
            stats.page_faults, stats.evictions, stats.swap.writes
        );

        self.swap.close()
    }
}
