//! Demand paging: bringing a page into a frame and making room when there is
//! no free frame.
//!
//! Everything here runs with the kernel memory lock held, so a victim cannot
//! be picked twice and a reclaimed frame cannot be handed out before its new
//! record is installed. The swap lock is taken inside, never the other way.

use log::debug;

use crate::{
    address_space::{AddressSpace, PageOrigin},
    error::{Result, VmError},
    kernel::MemoryState,
    mmu::TranslationEntry,
    page_table::Vp,
    swap::SwapFile,
};

/// Where the bytes of a faulting page come from this time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageSource {
    Swap,
    Section { section: usize, page: usize },
    ZeroFill,
}

fn page_source(origin: PageOrigin, in_swap: bool) -> PageSource {
    if in_swap {
        return PageSource::Swap;
    }

    match origin {
        PageOrigin::Section { section, page, .. } => PageSource::Section { section, page },
        PageOrigin::Stack | PageOrigin::Argument => PageSource::ZeroFill,
    }
}

/// Makes `vp` resident and returns its new record.
///
/// On failure no frame is lost: a frame taken for the page goes back on the
/// free list and the record stays non-resident.
pub(crate) fn handle_page_fault(
    mem: &mut MemoryState,
    swap: &SwapFile,
    space: &AddressSpace,
    vp: Vp,
) -> Result<TranslationEntry> {
    let origin = space
        .origin(vp.vpn)
        .ok_or(VmError::Unmapped { vpn: vp.vpn })?;

    mem.stats.page_faults += 1;

    let source = page_source(origin, swap.has_entry(vp));
    debug!("fault: {} from {:?}", vp, source);

    let ppn = acquire_frame(mem, swap)?;
    let frame = mem.mmu.frame_mut(ppn);

    let loaded = match source {
        PageSource::Swap => swap.read_page(vp, frame),
        PageSource::Section { section, page } => space.section(section).load_page(page, frame),
        PageSource::ZeroFill => {
            frame.fill(0);
            Ok(())
        }
    };

    if let Err(e) = loaded {
        mem.frames.free(ppn);
        return Err(e);
    }

    let entry = TranslationEntry::resident(vp.vpn, ppn, origin.read_only());
    mem.page_table.install(vp, entry);

    Ok(entry)
}

/// A free frame, or the frame of an evicted victim.
pub(crate) fn acquire_frame(mem: &mut MemoryState, swap: &SwapFile) -> Result<usize> {
    if let Some(ppn) = mem.frames.allocate() {
        return Ok(ppn);
    }

    mem.tlb.harvest(&mut mem.mmu, &mut mem.page_table);

    let (victim, entry) = mem
        .policy
        .pick_victim(&mut mem.page_table, mem.tlb.rng_mut())
        .ok_or(VmError::OutOfMemory)?;

    evict(mem, swap, victim, entry)
}

/// Pushes `victim` out of memory, saving it first if it was written, and
/// returns the frame it occupied.
fn evict(mem: &mut MemoryState, swap: &SwapFile, victim: Vp, entry: TranslationEntry) -> Result<usize> {
    if entry.dirty {
        swap.write_page(victim, mem.mmu.frame(entry.ppn))?;
    }

    mem.tlb.invalidate_frame(&mut mem.mmu, entry.ppn);

    let ppn = mem.page_table.evict(victim).ok_or(VmError::OutOfMemory)?;
    mem.stats.evictions += 1;
    debug!(
        "fault: evicted {} from frame {}{}",
        victim,
        ppn,
        if entry.dirty { " (written to swap)" } else { "" }
    );

    Ok(ppn)
}
