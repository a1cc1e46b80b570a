//! The global inverted page table.
//!
//! Records are keyed by [`Vp`] and live only in the forward map. The reverse map
//! stores the owning `Vp` of each occupied frame, so both directions always see
//! the same record.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

use log::{debug, trace};
use rand::Rng;

use crate::{frame_allocator::FrameAllocator, mmu::TranslationEntry};

/// A virtual page of one process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vp {
    pub vpn: usize,
    pub pid: u32,
}

impl Vp {
    pub fn new(vpn: usize, pid: u32) -> Self {
        Vp { vpn, pid }
    }
}

impl fmt::Display for Vp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vp(pid={}, vpn={:#x})", self.pid, self.vpn)
    }
}

#[derive(Debug, Default)]
pub struct InvertedPageTable {
    virtual_to_entry: HashMap<Vp, TranslationEntry>,
    physical_to_vp: BTreeMap<usize, Vp>,
    /// Next frame the clock looks at.
    hand: usize,
}

impl InvertedPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, vp: Vp) -> Option<TranslationEntry> {
        self.virtual_to_entry.get(&vp).copied()
    }

    pub fn lookup_by_frame(&self, ppn: usize) -> Option<(Vp, TranslationEntry)> {
        let vp = *self.physical_to_vp.get(&ppn)?;

        self.lookup(vp).map(|entry| (vp, entry))
    }

    /// Upserts `entry` for `vp`, keeping the frame map in step with it.
    pub fn install(&mut self, vp: Vp, entry: TranslationEntry) {
        assert_eq!(entry.vpn, vp.vpn, "record installed under the wrong vpn");

        if let Some(old) = self.virtual_to_entry.get(&vp) {
            if old.valid && self.physical_to_vp.get(&old.ppn) == Some(&vp) {
                self.physical_to_vp.remove(&old.ppn);
            }
        }

        if entry.valid {
            if let Some(owner) = self.physical_to_vp.get(&entry.ppn) {
                assert_eq!(*owner, vp, "frame {} already belongs to {}", entry.ppn, owner);
            }
            self.physical_to_vp.insert(entry.ppn, vp);
        }

        self.virtual_to_entry.insert(vp, entry);
    }

    /// Drops `vp` entirely; a frame it still occupies goes back to `frames`.
    pub fn remove(&mut self, vp: Vp, frames: &mut FrameAllocator) -> Option<TranslationEntry> {
        let entry = self.virtual_to_entry.remove(&vp)?;

        if entry.valid && self.physical_to_vp.get(&entry.ppn) == Some(&vp) {
            self.physical_to_vp.remove(&entry.ppn);
            frames.free(entry.ppn);
        }

        Some(entry)
    }

    /// Folds the reference bits the hardware reported for `vp` into its record.
    pub fn record_reference(&mut self, vp: Vp, used: bool, dirty: bool) {
        if let Some(entry) = self.virtual_to_entry.get_mut(&vp) {
            entry.used |= used;
            entry.dirty |= dirty;
        }
    }

    /// Marks a resident record as no longer in memory and returns the frame it
    /// held. The record stays in the table.
    pub fn evict(&mut self, vp: Vp) -> Option<usize> {
        let entry = self.virtual_to_entry.get_mut(&vp)?;

        if !entry.valid {
            return None;
        }

        entry.valid = false;
        entry.used = false;
        entry.dirty = false;

        let ppn = entry.ppn;
        if self.physical_to_vp.get(&ppn) == Some(&vp) {
            self.physical_to_vp.remove(&ppn);
        }

        Some(ppn)
    }

    /// Second-chance clock over resident frames in frame order.
    ///
    /// A referenced page gets its `used` bit cleared and is skipped; the first
    /// unreferenced one is the victim. Two laps are always enough.
    pub fn select_victim(&mut self) -> Option<(Vp, TranslationEntry)> {
        let resident = self.physical_to_vp.len();

        for _ in 0..=2 * resident {
            let (ppn, vp) = self
                .physical_to_vp
                .range(self.hand..)
                .next()
                .or_else(|| self.physical_to_vp.iter().next())
                .map(|(ppn, vp)| (*ppn, *vp))?;

            self.hand = ppn + 1;

            let entry = self.virtual_to_entry.get_mut(&vp)?;

            if entry.used {
                entry.used = false;
            } else {
                debug!("page_table: clock picked {} in frame {}", vp, ppn);
                return Some((vp, *entry));
            }
        }

        None
    }

    /// Any resident page, uniformly.
    pub fn select_random_victim<R: Rng>(&self, rng: &mut R) -> Option<(Vp, TranslationEntry)> {
        if self.physical_to_vp.is_empty() {
            return None;
        }

        let nth = rng.gen_range(0..self.physical_to_vp.len());
        let (ppn, _) = self.physical_to_vp.iter().nth(nth)?;

        self.lookup_by_frame(*ppn)
    }

    pub fn resident_count(&self) -> usize {
        self.physical_to_vp.len()
    }

    pub fn len(&self) -> usize {
        self.virtual_to_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.virtual_to_entry.is_empty()
    }

    /// Resident pages as `(frame, owner)`.
    pub fn resident(&self) -> impl Iterator<Item = (usize, Vp)> + '_ {
        self.physical_to_vp.iter().map(|(ppn, vp)| (*ppn, *vp))
    }

    /// Checks both directions agree and no resident frame is on the free list.
    pub fn is_consistent(&self, frames: &FrameAllocator) -> bool {
        let reverse_ok = self.physical_to_vp.iter().all(|(ppn, vp)| {
            matches!(self.virtual_to_entry.get(vp), Some(e) if e.valid && e.ppn == *ppn)
                && !frames.is_free(*ppn)
        });

        let forward_ok = self
            .virtual_to_entry
            .iter()
            .filter(|(_, e)| e.valid)
            .all(|(vp, e)| self.physical_to_vp.get(&e.ppn) == Some(vp));

        reverse_ok && forward_ok
    }

    pub fn dump(&self) {
        let mut entries: Vec<_> = self.virtual_to_entry.iter().collect();
        entries.sort_by_key(|(vp, _)| **vp);

        for (vp, entry) in entries {
            trace!("page_table: {} -> {:?}", vp, entry);
        }
    }
}
