//! Backing store for evicted pages.
//!
//! The swap file is a flat run of page-sized slots with no header:
//!
//! | offset               | contents |
//! |----------------------|----------|
//! | 0                    | slot 0   |
//! | page_size            | slot 1   |
//! | ...                  | ...      |
//! | (n - 1) * page_size  | slot n-1 |
//!
//! Which page lives in which slot is only known in memory, so the file is
//! meaningless after a restart and is deleted on [`SwapFile::close`].

use std::{
    collections::{HashMap, VecDeque},
    fs::{self, File},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::{debug, error};

use crate::{
    error::{Result, VmError},
    page_table::Vp,
    sync::KernelLock,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SwapStats {
    pub reads: u64,
    pub writes: u64,
    /// Slots currently holding a page.
    pub slots_in_use: usize,
    /// Slots the file has grown to.
    pub file_slots: usize,
}

struct SwapState {
    file: Option<File>,
    indices: HashMap<Vp, usize>,
    free_slots: VecDeque<usize>,
    file_slots: usize,
    reads: u64,
    writes: u64,
}

impl SwapState {
    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "swap file closed"))
    }
}

pub struct SwapFile {
    path: PathBuf,
    page_size: usize,
    state: KernelLock<SwapState>,
}

impl SwapFile {
    /// Creates (or truncates) the backing file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize) -> Result<SwapFile> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;

        debug!("swap: backing store at {}", path.as_ref().display());

        Ok(SwapFile {
            path: path.as_ref().to_path_buf(),
            page_size,
            state: KernelLock::new(SwapState {
                file: Some(file),
                indices: HashMap::new(),
                free_slots: VecDeque::new(),
                file_slots: 0,
                reads: 0,
                writes: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slot_offset(&self, slot: usize) -> u64 {
        (slot * self.page_size) as u64
    }

    pub fn read_page(&self, vp: Vp, buffer: &mut [u8]) -> Result<()> {
        assert_eq!(buffer.len(), self.page_size, "swap reads are whole pages");

        let mut state = self.state.acquire();

        let slot = *state.indices.get(&vp).ok_or(VmError::NotInSwap(vp))?;
        let offset = self.slot_offset(slot);

        let file = state.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buffer).map_err(|e| {
            error!("swap: reading {} from slot {} failed: {}", vp, slot, e);
            e
        })?;

        state.reads += 1;
        debug!("swap: read {} from slot {}", vp, slot);

        Ok(())
    }

    /// Writes `buffer` as the saved copy of `vp`, taking a slot on first use.
    pub fn write_page(&self, vp: Vp, buffer: &[u8]) -> Result<()> {
        assert_eq!(buffer.len(), self.page_size, "swap writes are whole pages");

        let mut state = self.state.acquire();

        let existing = state.indices.get(&vp).copied();
        let (slot, fresh) = match existing {
            Some(slot) => (slot, false),
            None => match state.free_slots.pop_front() {
                Some(slot) => (slot, true),
                None => (state.file_slots, true),
            },
        };
        let offset = self.slot_offset(slot);

        let written = state.file().and_then(|file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buffer)?;
            file.flush()
        });

        if let Err(e) = written {
            error!("swap: writing {} to slot {} failed: {}", vp, slot, e);
            if fresh && slot < state.file_slots {
                state.free_slots.push_front(slot);
            }
            return Err(e.into());
        }

        if fresh {
            if slot == state.file_slots {
                state.file_slots += 1;
            }
            state.indices.insert(vp, slot);
        }
        state.writes += 1;
        debug!("swap: wrote {} to slot {}", vp, slot);

        Ok(())
    }

    pub fn has_entry(&self, vp: Vp) -> bool {
        self.state.acquire().indices.contains_key(&vp)
    }

    /// Forgets `vp` and recycles its slot.
    pub fn free_slot(&self, vp: Vp) {
        let mut state = self.state.acquire();

        if let Some(slot) = state.indices.remove(&vp) {
            debug!("swap: released slot {} of {}", slot, vp);
            state.free_slots.push_back(slot);
        }
    }

    pub fn stats(&self) -> SwapStats {
        let state = self.state.acquire();

        SwapStats {
            reads: state.reads,
            writes: state.writes,
            slots_in_use: state.indices.len(),
            file_slots: state.file_slots,
        }
    }

    /// Closes the backing file and deletes it.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.acquire();

        if state.file.take().is_none() {
            return Ok(());
        }
        state.indices.clear();
        state.free_slots.clear();

        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}
