//! The simulated processor's memory hardware: physical memory, a software-loaded
//! TLB and the registers the exception path fills in.

use std::ops::Range;

use log::trace;

/// One translation as the hardware sees it. The TLB holds these, and so does the
/// inverted page table.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: usize,
    pub ppn: usize,
    pub valid: bool,
    pub read_only: bool,
    pub used: bool,
    pub dirty: bool,
}

impl TranslationEntry {
    /// A page that exists but has no frame yet.
    pub fn unmapped(vpn: usize, read_only: bool) -> Self {
        TranslationEntry {
            vpn,
            read_only,
            ..Default::default()
        }
    }

    /// Freshly loaded into `ppn`.
    pub fn resident(vpn: usize, ppn: usize, read_only: bool) -> Self {
        TranslationEntry {
            vpn,
            ppn,
            valid: true,
            read_only,
            used: true,
            dirty: false,
        }
    }
}

/// What a load or store can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// No valid TLB entry for `vaddr`.
    TlbMiss { vaddr: usize },
    /// Store to `vaddr` through a read-only entry.
    ReadOnly { vaddr: usize },
}

pub const NUM_REGISTERS: usize = 40;
pub const REG_A0: usize = 4;
pub const REG_A1: usize = 5;
pub const REG_SP: usize = 29;
pub const REG_BAD_VADDR: usize = 37;

pub struct Mmu {
    page_size: usize,
    memory: Vec<u8>,
    tlb: Vec<TranslationEntry>,
    registers: [u32; NUM_REGISTERS],
}

impl Mmu {
    pub fn new(page_size: usize, num_frames: usize, tlb_size: usize) -> Self {
        assert!(page_size.is_power_of_two());

        Mmu {
            page_size,
            memory: vec![0; page_size * num_frames],
            tlb: vec![TranslationEntry::default(); tlb_size],
            registers: [0; NUM_REGISTERS],
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn tlb_size(&self) -> usize {
        self.tlb.len()
    }

    pub fn page_from_address(&self, vaddr: usize) -> usize {
        vaddr / self.page_size
    }

    pub fn offset_from_address(&self, vaddr: usize) -> usize {
        vaddr % self.page_size
    }

    pub fn make_address(&self, ppn: usize, offset: usize) -> usize {
        assert!(offset < self.page_size);

        ppn * self.page_size + offset
    }

    fn frame_range(&self, ppn: usize) -> Range<usize> {
        Range {
            start: ppn * self.page_size,
            end: (ppn + 1) * self.page_size,
        }
    }

    pub fn frame(&self, ppn: usize) -> &[u8] {
        let range = self.frame_range(ppn);
        &self.memory[range]
    }

    pub fn frame_mut(&mut self, ppn: usize) -> &mut [u8] {
        let range = self.frame_range(ppn);
        &mut self.memory[range]
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    pub fn read_register(&self, reg: usize) -> u32 {
        self.registers[reg]
    }

    pub fn write_register(&mut self, reg: usize, value: u32) {
        self.registers[reg] = value;
    }

    pub fn read_tlb_entry(&self, slot: usize) -> TranslationEntry {
        self.tlb[slot]
    }

    pub fn write_tlb_entry(&mut self, slot: usize, entry: TranslationEntry) {
        trace!("mmu: tlb[{}] <- {:?}", slot, entry);
        self.tlb[slot] = entry;
    }

    /// Translates one access the way the CPU would: TLB only, setting the
    /// reference bits on a hit.
    pub fn translate(&mut self, vaddr: usize, write: bool) -> Result<usize, Exception> {
        let vpn = self.page_from_address(vaddr);
        let offset = self.offset_from_address(vaddr);

        let slot = self.tlb.iter().position(|e| e.valid && e.vpn == vpn);

        let slot = match slot {
            Some(slot) => slot,
            None => {
                trace!("mmu: tlb miss at {:#x}", vaddr);
                self.registers[REG_BAD_VADDR] = vaddr as u32;
                return Err(Exception::TlbMiss { vaddr });
            }
        };

        let entry = &mut self.tlb[slot];

        if write && entry.read_only {
            self.registers[REG_BAD_VADDR] = vaddr as u32;
            return Err(Exception::ReadOnly { vaddr });
        }

        entry.used = true;
        if write {
            entry.dirty = true;
        }

        let ppn = entry.ppn;

        Ok(self.make_address(ppn, offset))
    }
}
