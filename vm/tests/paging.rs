use std::collections::HashSet;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::TempDir;
use vm::{
    page_replacer::ReplacementPolicy, ExitCause, Kernel, MemorySection, Section, VmConfig, VmError, Vp,
};

const PAGE: usize = 64;

fn kernel(dir: &TempDir, num_frames: usize, stack_pages: usize) -> Kernel {
    Kernel::new(VmConfig {
        page_size: PAGE,
        num_frames,
        tlb_size: 4,
        stack_pages,
        swap_path: dir.path().join("swap"),
        replacement: ReplacementPolicy::Clock,
        tlb_seed: Some(42),
    })
    .unwrap()
}

fn section(name: &str, first_vpn: usize, read_only: bool, fill: u8) -> Box<dyn Section> {
    Box::new(MemorySection::new(name, first_vpn, PAGE, read_only, vec![fill; PAGE]))
}

fn assert_no_aliasing(kernel: &Kernel) {
    kernel.dump_page_table();
    assert!(kernel.is_consistent());

    let resident = kernel.resident_pages();
    let frames: HashSet<_> = resident.iter().map(|(ppn, _)| *ppn).collect();
    let owners: HashSet<_> = resident.iter().map(|(_, vp)| *vp).collect();
    assert_eq!(frames.len(), resident.len());
    assert_eq!(owners.len(), resident.len());
}

#[test]
fn two_frames_code_and_stack_then_clock_evicts_the_code_page() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 2, 2);
    let mut process = kernel.spawn(vec![section(".text", 0, true, 0xC0)], &[]).unwrap();
    let pid = process.pid();

    assert_eq!(process.load_byte(&kernel, 0).unwrap(), 0xC0);
    assert_eq!(process.load_byte(&kernel, PAGE).unwrap(), 0);

    assert_eq!(kernel.resident_pages().len(), 2);
    assert_eq!(kernel.free_frames(), 0);
    assert_eq!(kernel.stats().swap.slots_in_use, 0);
    assert!(kernel.lookup(Vp::new(0, pid)).unwrap().used);
    assert!(kernel.lookup(Vp::new(1, pid)).unwrap().used);

    // both referenced: the sweep clears them and comes back round to vpn 0
    assert_eq!(process.load_byte(&kernel, 2 * PAGE).unwrap(), 0);

    let code = kernel.lookup(Vp::new(0, pid)).unwrap();
    assert!(!code.valid);
    assert!(kernel.lookup(Vp::new(1, pid)).unwrap().valid);
    assert!(kernel.lookup(Vp::new(2, pid)).unwrap().valid);
    assert!(!kernel.has_swap_entry(Vp::new(0, pid)));

    let stats = kernel.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.swap.writes, 0);
    assert_no_aliasing(&kernel);

    // clean code comes back from the image
    assert_eq!(process.load_byte(&kernel, 5).unwrap(), 0xC0);
    assert_eq!(kernel.stats().swap.reads, 0);
    assert_no_aliasing(&kernel);
}

#[test]
fn dirty_victim_is_written_exactly_once_and_reads_back_intact() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 2, 3);
    let mut process = kernel.spawn(vec![], &[]).unwrap();
    let pid = process.pid();

    let first: Vec<u8> = (0..PAGE as u8).collect();
    let second = vec![0x5A; PAGE];
    process.write_virtual_memory(&kernel, 0, &first).unwrap();
    process.write_virtual_memory(&kernel, PAGE, &second).unwrap();
    assert_eq!(kernel.stats().swap.writes, 0);

    let mut byte = [0xFF; 1];
    process.read_virtual_memory(&kernel, 2 * PAGE, &mut byte).unwrap();
    assert_eq!(byte, [0]);

    let stats = kernel.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.swap.writes, 1);
    assert!(kernel.has_swap_entry(Vp::new(0, pid)));
    let evicted = kernel.lookup(Vp::new(0, pid)).unwrap();
    assert!(!evicted.valid && !evicted.dirty);

    let mut back = vec![0; PAGE];
    process.read_virtual_memory(&kernel, 0, &mut back).unwrap();
    assert_eq!(back, first);
    assert_eq!(kernel.stats().swap.reads, 1);

    process.read_virtual_memory(&kernel, PAGE, &mut back).unwrap();
    assert_eq!(back, second);
    assert_no_aliasing(&kernel);
}

#[test]
fn reloaded_page_evicted_clean_is_not_written_again() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 1, 2);
    let mut process = kernel.spawn(vec![], &[]).unwrap();

    process.store_byte(&kernel, 3, 9).unwrap();
    process.load_byte(&kernel, PAGE).unwrap();
    assert_eq!(kernel.stats().swap.writes, 1);

    // back from swap, only read, then pushed out again
    assert_eq!(process.load_byte(&kernel, 3).unwrap(), 9);
    process.load_byte(&kernel, PAGE).unwrap();
    assert_eq!(kernel.stats().swap.writes, 1);

    assert_eq!(process.load_byte(&kernel, 3).unwrap(), 9);
}

#[test]
fn context_switch_flushes_tlb_and_restores_bits_on_next_miss() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 8, 2);
    let mut a = kernel.spawn(vec![], &[]).unwrap();
    let mut b = kernel.spawn(vec![], &[]).unwrap();

    kernel.context_switch(None, &a);
    a.store_byte(&kernel, 10, 1).unwrap();
    let cached = kernel.tlb_entries().into_iter().find(|e| e.valid && e.vpn == 0).unwrap();
    assert!(cached.used && cached.dirty);

    kernel.context_switch(Some(&a), &b);
    assert!(kernel.tlb_entries().iter().all(|e| !e.valid));
    let saved = kernel.lookup(Vp::new(0, a.pid())).unwrap();
    assert_eq!((saved.used, saved.dirty), (cached.used, cached.dirty));

    b.store_byte(&kernel, 10, 2).unwrap();

    kernel.context_switch(Some(&b), &a);
    let faults = kernel.stats().page_faults;
    assert_eq!(a.load_byte(&kernel, 10).unwrap(), 1);
    assert_eq!(kernel.stats().page_faults, faults);

    let reloaded = kernel.tlb_entries().into_iter().find(|e| e.valid && e.vpn == 0).unwrap();
    assert_eq!(reloaded.ppn, saved.ppn);
    assert!(reloaded.used && reloaded.dirty);
    assert_no_aliasing(&kernel);
}

#[test]
fn write_touching_a_read_only_page_kills_the_process_before_any_byte_moves() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 4, 1);
    let mut process = kernel
        .spawn(vec![section(".data", 0, false, 1), section(".rodata", 1, true, 2)], &[])
        .unwrap();
    let pid = process.pid();

    let written = process.write_virtual_memory(&kernel, PAGE - 8, &[0xEE; 16]);

    assert!(matches!(
        written,
        Err(VmError::Terminated { cause: ExitCause::ReadOnly, .. })
    ));
    assert_eq!(process.exit_cause(), Some(ExitCause::ReadOnly));
    assert_eq!(kernel.stats().page_faults, 0);
    assert!(kernel.lookup(Vp::new(0, pid)).is_none());
    assert_eq!(kernel.free_frames(), 4);

    let mut buf = [0; 1];
    assert!(matches!(
        process.read_virtual_memory(&kernel, 0, &mut buf),
        Err(VmError::Terminated { .. })
    ));
}

#[test]
fn store_to_resident_read_only_page_terminates() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 4, 1);
    let mut process = kernel.spawn(vec![section(".text", 0, true, 7)], &[]).unwrap();

    assert_eq!(process.load_byte(&kernel, 1).unwrap(), 7);
    let stored = process.store_byte(&kernel, 1, 0);

    assert!(matches!(stored, Err(VmError::Terminated { cause: ExitCause::ReadOnly, .. })));
    assert_eq!(kernel.free_frames(), 4);
    assert!(kernel.resident_pages().is_empty());
}

#[test]
fn unmapped_access_is_a_bus_error_and_releases_everything() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 1, 2);
    let mut process = kernel.spawn(vec![], &[]).unwrap();
    let pid = process.pid();

    // push a dirty page to swap first so teardown has a slot to free
    process.store_byte(&kernel, 0, 1).unwrap();
    process.store_byte(&kernel, PAGE, 1).unwrap();
    assert!(kernel.has_swap_entry(Vp::new(0, pid)));

    let beyond = process.address_space().unwrap().num_pages() * PAGE;
    assert!(matches!(
        process.load_byte(&kernel, beyond),
        Err(VmError::Terminated { cause: ExitCause::BusError, .. })
    ));

    assert!(!process.is_running());
    assert!(!kernel.has_swap_entry(Vp::new(0, pid)));
    assert_eq!(kernel.stats().swap.slots_in_use, 0);
    assert_eq!(kernel.free_frames(), 1);
}

#[test]
fn arguments_are_laid_out_in_the_last_page() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 4, 2);
    let mut process = kernel
        .spawn(vec![section(".text", 0, true, 0)], &["echo", "hello"])
        .unwrap();

    assert_eq!(process.argc(), 2);
    assert_eq!(process.argv(), 3 * PAGE);
    assert_eq!(process.initial_sp(), 3 * PAGE);

    let mut pointer = [0; 4];
    process.read_virtual_memory(&kernel, process.argv() + 4, &mut pointer).unwrap();
    let second = u32::from_le_bytes(pointer) as usize;
    assert_eq!(second, process.argv() + 8 + 5);

    let text = process.read_virtual_memory_string(&kernel, second, 32).unwrap();
    assert_eq!(text.as_deref(), Some("hello"));

    process.init_registers(&kernel);
    assert_eq!(kernel.read_register(vm::mmu::REG_A0), 2);
    assert_eq!(kernel.read_register(vm::mmu::REG_A1) as usize, process.argv());
}

#[test]
fn exit_returns_frames_and_swap_slots() {
    let dir = TempDir::new().unwrap();
    let kernel = kernel(&dir, 2, 4);
    let mut process = kernel.spawn(vec![], &["a"]).unwrap();

    for vpn in 0..4 {
        process.store_byte(&kernel, vpn * PAGE, vpn as u8).unwrap();
    }
    assert!(kernel.stats().swap.slots_in_use > 0);

    process.exit(&kernel, 0);

    assert_eq!(process.exit_cause(), Some(ExitCause::Exit(0)));
    assert_eq!(kernel.free_frames(), 2);
    assert_eq!(kernel.stats().swap.slots_in_use, 0);
    assert!(kernel.resident_pages().is_empty());
}

fn churn(replacement: ReplacementPolicy) {
    let dir = TempDir::new().unwrap();
    let kernel = Kernel::new(VmConfig {
        page_size: PAGE,
        num_frames: 3,
        tlb_size: 2,
        stack_pages: 5,
        swap_path: dir.path().join("swap"),
        replacement,
        tlb_seed: Some(7),
    })
    .unwrap();

    let mut processes: Vec<_> = (0..3)
        .map(|_| kernel.spawn(vec![section(".text", 0, true, 0xAB)], &[]).unwrap())
        .collect();
    let mut rng = StdRng::seed_from_u64(1234);
    let mut running = 0;
    kernel.context_switch(None, &processes[running]);

    for step in 0..400 {
        if step % 17 == 0 {
            let next = rng.gen_range(0..processes.len());
            kernel.context_switch(Some(&processes[running]), &processes[next]);
            running = next;
        }

        let process = &mut processes[running];
        let pid = process.pid() as u8;
        let vpn = rng.gen_range(1..6);
        let addr = vpn * PAGE + rng.gen_range(0..PAGE);

        if rng.gen_bool(0.5) {
            process.store_byte(&kernel, addr, pid ^ vpn as u8).unwrap();
        } else {
            let value = process.load_byte(&kernel, addr).unwrap();
            assert!(value == 0 || value == pid ^ vpn as u8, "lost data at {:#x}", addr);
        }

        assert_eq!(process.load_byte(&kernel, 0).unwrap(), 0xAB);
        assert_no_aliasing(&kernel);
    }

    assert!(kernel.stats().evictions > 0);
    assert!(kernel.stats().swap.writes > 0);

    for mut process in processes {
        process.exit(&kernel, 0);
    }
    assert_eq!(kernel.free_frames(), 3);
    kernel.shutdown().unwrap();
}

#[test]
fn many_processes_over_few_frames_never_alias_or_lose_data_with_clock() {
    churn(ReplacementPolicy::Clock);
}

#[test]
fn many_processes_over_few_frames_never_alias_or_lose_data_with_random() {
    churn(ReplacementPolicy::Random);
}
