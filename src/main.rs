use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use clap::Parser;
use log::info;

use dmgcore::cpu::CLOCK_HZ;
use dmgcore::dbg::log_cpu;
use dmgcore::gameboy::GameBoy;
use dmgcore::io::read_bytes;

#[derive(Parser)]
#[command(about = "Runs a Game Boy ROM on the LR35902 core")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// 256-byte boot image; without one the cpu starts at 0x0100
    #[arg(long)]
    boot: Option<PathBuf>,

    /// Clock ticks to run
    #[arg(long, default_value_t = CLOCK_HZ)]
    ticks: u64,

    /// Append one line of cpu state per instruction to this file
    #[arg(long)]
    trace: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let rom = read_bytes(&args.rom)?;
    let mut gb = match &args.boot {
        Some(path) => {
            let mut gb = GameBoy::new();
            gb.mem.load_boot(&read_bytes(path)?)?;
            gb
        }
        None => GameBoy::post_boot(),
    };
    gb.mem.load_rom(&rom);

    let mut trace = match &args.trace {
        Some(path) => Some(BufWriter::new(
            OpenOptions::new().create(true).append(true).open(path)?,
        )),
        None => None,
    };

    let mut alive = true;
    for _ in 0..args.ticks {
        if let Some(out) = trace.as_mut() {
            if !gb.cpu.mid_instruction() && !gb.cpu.halted() && !gb.cpu.stopped() {
                log_cpu(out, &gb.cpu.regs, &gb.mem)?;
            }
        }
        if !gb.step()? {
            alive = false;
            break;
        }
    }
    if let Some(out) = trace.as_mut() {
        out.flush()?;
    }

    info!(
        "{} after {} ticks, {} instructions, pc 0x{:04X}",
        if alive { "running" } else { "stopped" },
        gb.cpu.ticks(),
        gb.cpu.retired(),
        gb.pc()
    );
    Ok(())
}
