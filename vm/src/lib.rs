//! Demand-paged virtual memory over a simulated machine.
//!
//! A single [`Kernel`] owns physical memory, the TLB, the global inverted page
//! table and the swap file. Processes reach their memory through it: a TLB miss
//! looks the page up in the inverted table, a page that is not resident is
//! faulted in from its executable section, from swap, or as a zero page, and
//! when frames run out a clock sweep picks a victim to push out.

pub mod address_space;
pub mod config;
pub mod error;
mod fault;
pub mod frame_allocator;
pub mod kernel;
pub mod mmu;
pub mod page_loader;
pub mod page_replacer;
pub mod page_table;
pub mod process;
pub mod swap;
pub mod sync;
pub mod tlb;

pub use config::VmConfig;
pub use error::{ExitCause, Result, VmError};
pub use kernel::{Kernel, VmStats};
pub use page_loader::{MemorySection, Section};
pub use page_table::Vp;
pub use process::Process;
