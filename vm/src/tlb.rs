//! Software management of the simulated TLB.
//!
//! The TLB only ever caches translations of one process, its owner. Every
//! valid slot is a copy of a record in the inverted page table whose `used` and
//! `dirty` bits may be newer than the table's; those bits are folded back
//! whenever a slot is replaced, flushed or harvested.

use log::{debug, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    address_space::AddressSpace,
    error::{Result, VmError},
    fault,
    kernel::MemoryState,
    mmu::{Mmu, TranslationEntry},
    page_table::{InvertedPageTable, Vp},
    swap::SwapFile,
};

pub struct TlbManager {
    owner: Option<u32>,
    rng: StdRng,
}

impl TlbManager {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        TlbManager { owner: None, rng }
    }

    pub fn owner(&self) -> Option<u32> {
        self.owner
    }

    pub fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Slot holding a valid translation for `vpn`.
    pub fn lookup(mmu: &Mmu, vpn: usize) -> Option<usize> {
        (0..mmu.tlb_size()).find(|&slot| {
            let entry = mmu.read_tlb_entry(slot);
            entry.valid && entry.vpn == vpn
        })
    }

    fn write_back(&self, mmu: &mut Mmu, table: &mut InvertedPageTable, slot: usize) {
        let entry = mmu.read_tlb_entry(slot);

        if !entry.valid {
            return;
        }

        if let Some(pid) = self.owner {
            table.record_reference(Vp::new(entry.vpn, pid), entry.used, entry.dirty);
        }

        mmu.write_tlb_entry(slot, TranslationEntry { valid: false, ..entry });
    }

    /// Writes every valid slot back to the table and invalidates it.
    pub fn save(&mut self, mmu: &mut Mmu, table: &mut InvertedPageTable) {
        for slot in 0..mmu.tlb_size() {
            self.write_back(mmu, table, slot);
        }

        if let Some(pid) = self.owner.take() {
            debug!("tlb: flushed for pid {}", pid);
        }
    }

    /// Hands the TLB to `pid`. Its slots start out empty and fill on misses.
    pub fn restore(&mut self, mmu: &mut Mmu, table: &mut InvertedPageTable, pid: u32) {
        if self.owner != Some(pid) {
            self.save(mmu, table);
            self.owner = Some(pid);
        }
    }

    /// Copies the hardware reference bits into the table, clearing `used` in
    /// the TLB so the next clock lap sees only fresh references.
    pub fn harvest(&mut self, mmu: &mut Mmu, table: &mut InvertedPageTable) {
        let Some(pid) = self.owner else { return };

        for slot in 0..mmu.tlb_size() {
            let entry = mmu.read_tlb_entry(slot);
            if entry.valid {
                table.record_reference(Vp::new(entry.vpn, pid), entry.used, entry.dirty);
                mmu.write_tlb_entry(slot, TranslationEntry { used: false, ..entry });
            }
        }
    }

    /// Drops any slot that maps `ppn`. Bits must already have been harvested.
    pub fn invalidate_frame(&mut self, mmu: &mut Mmu, ppn: usize) {
        for slot in 0..mmu.tlb_size() {
            let entry = mmu.read_tlb_entry(slot);
            if entry.valid && entry.ppn == ppn {
                trace!("tlb: invalidating slot {} (frame {})", slot, ppn);
                mmu.write_tlb_entry(slot, TranslationEntry { valid: false, ..entry });
            }
        }
    }

    /// Forgets the owner's translations without writing them back. Only for
    /// an owner whose records are being destroyed.
    pub fn discard(&mut self, mmu: &mut Mmu, pid: u32) {
        if self.owner != Some(pid) {
            return;
        }

        for slot in 0..mmu.tlb_size() {
            let entry = mmu.read_tlb_entry(slot);
            mmu.write_tlb_entry(slot, TranslationEntry { valid: false, ..entry });
        }
        self.owner = None;
    }

    /// Puts `entry` in a free slot, or over a random one after writing the
    /// old occupant back.
    pub fn install(&mut self, mmu: &mut Mmu, table: &mut InvertedPageTable, entry: TranslationEntry) -> usize {
        let size = mmu.tlb_size();

        let slot = match (0..size).find(|&slot| !mmu.read_tlb_entry(slot).valid) {
            Some(slot) => slot,
            None => self.rng.gen_range(0..size),
        };

        self.write_back(mmu, table, slot);
        mmu.write_tlb_entry(slot, entry);

        slot
    }
}

/// Services a TLB miss at `vaddr` for the owner of `space`, faulting the page
/// in when it is not resident. Returns the slot now holding the translation.
pub(crate) fn handle_miss(
    mem: &mut MemoryState,
    swap: &SwapFile,
    space: &AddressSpace,
    vaddr: usize,
) -> Result<usize> {
    mem.stats.tlb_misses += 1;
    mem.tlb.restore(&mut mem.mmu, &mut mem.page_table, space.pid());

    let vpn = mem.mmu.page_from_address(vaddr);
    let vp = Vp::new(vpn, space.pid());

    let entry = match mem.page_table.lookup(vp) {
        Some(entry) if entry.valid => entry,
        Some(_) => fault::handle_page_fault(mem, swap, space, vp)?,
        None => return Err(VmError::Unmapped { vpn }),
    };

    let slot = mem.tlb.install(&mut mem.mmu, &mut mem.page_table, entry);
    trace!("tlb: {} -> slot {} (frame {})", vp, slot, entry.ppn);

    Ok(slot)
}
