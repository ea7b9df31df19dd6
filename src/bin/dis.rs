use std::path::PathBuf;

use clap::Parser;

use dmgcore::io::read_bytes;
use dmgcore::opcodes::{Instruction, CB_PREFIX, EXTENDED, PRIMARY};

#[derive(Parser)]
#[command(about = "Disassembles a Game Boy ROM")]
struct Args {
    /// Path to ROM file
    rom: PathBuf,

    /// First offset to decode
    #[arg(long, default_value_t = 0, value_parser = parse_offset)]
    start: usize,

    /// Stop before this offset (defaults to the end of the image)
    #[arg(long, value_parser = parse_offset)]
    end: Option<usize>,
}

// decimal or 0x-prefixed hex
fn parse_offset(s: &str) -> Result<usize, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    }
    .map_err(|e| format!("bad offset {}: {}", s, e))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();
    let rom = read_bytes(&args.rom)?;
    let end = args.end.unwrap_or(rom.len()).min(rom.len());

    let mut i = args.start;
    while i < end {
        let (ins, width, operands): (&Instruction, usize, &[u8]) = match rom.get(i + 1) {
            Some(&op) if rom[i] == CB_PREFIX => (&EXTENDED[op as usize], 2, &[][..]),
            _ => {
                let ins = &PRIMARY[rom[i] as usize];
                let width = ins.length as usize;
                (ins, width, &rom[(i + 1).min(rom.len())..(i + width).min(rom.len())])
            }
        };
        let hex: Vec<String> = rom[i..(i + width).min(rom.len())]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect();
        println!("{:04X}: {:<9} {}", i, hex.join(" "), ins.render(operands));
        i += width;
    }
    Ok(())
}
