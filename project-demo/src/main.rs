mod file_page_loader;

use std::{env, error::Error};

use vm::{Kernel, MemorySection, Process, Section, VmConfig};

use file_page_loader::FileSection;

/// Usage: `vm-demo [config.toml] [text-image]`
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);

    let config = match args.next() {
        Some(path) => VmConfig::from_file(path)?,
        None => VmConfig {
            page_size: 256,
            num_frames: 4,
            tlb_size: 2,
            stack_pages: 4,
            ..Default::default()
        },
    };
    let image = args.next();

    let kernel = Kernel::new(config)?;
    let page_size = kernel.page_size();

    let text = || -> vm::Result<Box<dyn Section>> {
        let section: Box<dyn Section> = match &image {
            Some(path) => Box::new(FileSection::open(path, ".text", 0, page_size)?),
            None => Box::new(MemorySection::new(".text", 0, page_size, true, [0xCA, 0xFE].repeat(page_size / 2))),
        };
        Ok(section)
    };

    let mut a = kernel.spawn(vec![text()?], &["alpha", "--verbose"])?;
    let mut b = kernel.spawn(vec![text()?], &["beta"])?;

    kernel.context_switch(None, &a);
    a.init_registers(&kernel);
    fill_stack(&kernel, &mut a, 0xA0)?;

    kernel.context_switch(Some(&a), &b);
    b.init_registers(&kernel);
    fill_stack(&kernel, &mut b, 0xB0)?;

    kernel.context_switch(Some(&b), &a);
    dump(&kernel, &mut a)?;

    kernel.context_switch(Some(&a), &b);
    dump(&kernel, &mut b)?;

    // writing over its own code ends `b`
    if let Err(e) = b.write_virtual_memory(&kernel, 0, b"oops") {
        println!("pid {}: {}", b.pid(), e);
    }

    kernel.context_switch(None, &a);
    a.exit(&kernel, 0);

    let stats = kernel.stats();
    println!(
        "tlb misses={} faults={} evictions={} swap reads={} writes={}",
        stats.tlb_misses, stats.page_faults, stats.evictions, stats.swap.reads, stats.swap.writes
    );

    kernel.shutdown()?;

    Ok(())
}

/// Writes a distinct pattern into every stack page.
fn fill_stack(kernel: &Kernel, process: &mut Process, tag: u8) -> vm::Result<()> {
    let page_size = kernel.page_size();
    let stack = process.initial_sp() / page_size - kernel.config().stack_pages..process.initial_sp() / page_size;

    for vpn in stack {
        let page = vec![tag | vpn as u8; page_size];
        process.write_virtual_memory(kernel, vpn * page_size, &page)?;
    }

    Ok(())
}

fn dump(kernel: &Kernel, process: &mut Process) -> vm::Result<()> {
    let page_size = kernel.page_size();
    let pages = process.initial_sp() / page_size;

    let argv0 = {
        let mut pointer = [0; 4];
        process.read_virtual_memory(kernel, process.argv(), &mut pointer)?;
        process.read_virtual_memory_string(kernel, u32::from_le_bytes(pointer) as usize, 64)?
    };
    println!("pid {} argc={} argv[0]={:?}", process.pid(), process.argc(), argv0);

    for vpn in 0..pages {
        let mut head = [0; 8];
        process.read_virtual_memory(kernel, vpn * page_size, &mut head)?;
        println!("  page {:#04x}: {}", vpn, hex::encode(head));
    }

    Ok(())
}
