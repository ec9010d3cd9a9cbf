//! ironcell - Cell Broadband Engine emulator
//!
//! Command-line entry point. Loads a raw big-endian PPU image at the
//! base of main memory, wires the LV2 kernel to the processor and runs
//! the image as the main thread until the guest exits.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use ic_core::config::Config;
use ic_cpu::{Cell, ThreadParams};
use ic_kernel::Lv2Kernel;
use ic_memory::constants::{MAIN_MEM_BASE, MAIN_MEM_SIZE};
use ic_memory::MemoryManager;

fn usage() -> ! {
    eprintln!("usage: ironcell <image> [arg]");
    eprintln!();
    eprintln!("  <image>  raw PPU image, loaded at 0x{MAIN_MEM_BASE:08x}");
    eprintln!("  [arg]    initial value of r3 (default 0)");
    std::process::exit(2);
}

fn run(image_path: PathBuf, arg: u64) -> Result<i32> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("config unreadable, using defaults: {e}");
        Config::default()
    });
    ic_core::logging::init(&config);

    let image = std::fs::read(&image_path)
        .with_context(|| format!("reading {}", image_path.display()))?;
    if image.is_empty() || image.len() % 4 != 0 {
        bail!("{} is not a PPU image (size {})", image_path.display(), image.len());
    }
    if image.len() > MAIN_MEM_SIZE as usize {
        bail!("image does not fit in main memory");
    }

    let memory = MemoryManager::new().context("reserving guest address space")?;
    let cell = Cell::new(Arc::clone(&memory), &config.cpu);
    let kernel = Lv2Kernel::new(&config.kernel);
    kernel.attach_cell(Arc::clone(&cell));
    cell.set_syscall_handler(kernel);

    memory.write_bytes(MAIN_MEM_BASE, &image)?;
    tracing::info!(
        "loaded {} ({} bytes) at 0x{:08x}",
        image_path.display(),
        image.len(),
        MAIN_MEM_BASE
    );

    let status = cell.run_main(&ThreadParams {
        entry: MAIN_MEM_BASE,
        arg,
        name: "main".into(),
        ..ThreadParams::default()
    })?;
    tracing::info!("guest exited with status {status}");
    Ok(status)
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let Some(image_path) = args.next() else { usage() };
    let arg = match args.next() {
        Some(text) => match text.parse() {
            Ok(value) => value,
            Err(_) => usage(),
        },
        None => 0,
    };

    match run(PathBuf::from(image_path), arg) {
        Ok(status) => ExitCode::from(status.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
