//! Headless front end: loads firmware, pumps the tick loop, serves GDB.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use clap::Parser;
use n8machine::gdb::{GdbConfig, GdbServer, PollStatus, SIGTRAP};
use n8machine::Machine;

/// How long each burst of free-running execution lasts before the GDB queue
/// and host input are serviced again.
const FRAME_BUDGET: Duration = Duration::from_millis(13);

#[derive(Parser, Debug)]
#[command(
    name = "n8machine",
    about = "6502 microcomputer emulator with a GDB remote stub."
)]
struct Args {
    /// Raw firmware image loaded at 0xD000.
    #[arg(long, value_name = "PATH", default_value = "N8firmware")]
    rom: PathBuf,

    /// Symbol listing with `al <addr> .<label>` records.
    #[arg(long, value_name = "PATH")]
    sym: Option<PathBuf>,

    /// GDB stub TCP port.
    #[arg(long, default_value_t = n8machine::gdb::DEFAULT_PORT)]
    port: u16,

    /// Disable the GDB stub entirely.
    #[arg(long, default_value_t = false)]
    no_gdb: bool,

    /// Bus cycles allowed per single-step before the CPU counts as jammed.
    #[arg(long, default_value_t = 16)]
    step_guard: u32,

    /// Start free-running instead of waiting for a debugger.
    #[arg(long, default_value_t = false)]
    run: bool,
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("n8machine: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> n8machine::Result<()> {
    let mut machine = Machine::new();
    let rom_len = machine.load_rom_file(&args.rom)?;
    eprintln!("loaded {rom_len} bytes from {}", args.rom.display());
    if let Some(sym) = &args.sym {
        let labels = machine.load_symbols(sym)?;
        eprintln!("loaded {labels} labels from {}", sym.display());
    }
    machine.set_step_guard(args.step_guard);

    // Host input: one thread reading stdin bytes into the TTY queue.
    let (input_tx, input_rx) = mpsc::channel();
    machine.tty.set_input(input_rx);
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut byte = [0u8; 1];
        while stdin.read_exact(&mut byte).is_ok() {
            if input_tx.send(byte[0]).is_err() {
                break;
            }
        }
    });

    let config = GdbConfig {
        port: args.port,
        enabled: !args.no_gdb,
    };
    let mut server = if !config.enabled {
        None
    } else {
        match GdbServer::start(config) {
            Ok(server) => Some(server),
            Err(error) => {
                eprintln!("gdb: {error}; continuing without remote debugging");
                None
            }
        }
    };

    let mut running = args.run;
    let mut gdb_halted = false;

    loop {
        if let Some(server) = &mut server {
            match server.poll(&mut machine) {
                PollStatus::Halted => {
                    running = false;
                    gdb_halted = true;
                    machine.debug.enable_bp(true);
                }
                PollStatus::Resumed => {
                    gdb_halted = false;
                    running = true;
                }
                PollStatus::Stepped => {
                    gdb_halted = true;
                    running = false;
                }
                PollStatus::Detached => {
                    // A detached target runs at full speed.
                    gdb_halted = false;
                    running = true;
                }
                PollStatus::Kill => return Ok(()),
                PollStatus::None => {}
            }
        }

        if running && !gdb_halted {
            let deadline = Instant::now() + FRAME_BUDGET;
            while Instant::now() < deadline {
                machine.step();
                if machine.bp_hit() {
                    machine.clear_bp_hit();
                    running = false;
                    if let Some(server) = &mut server {
                        if server.is_connected() {
                            gdb_halted = true;
                            server.notify_stop(SIGTRAP);
                        }
                    }
                    break;
                }
                if machine.wp_hit() {
                    let addr = machine.debug.wp_hit_addr().unwrap_or(0);
                    let kind = machine.debug.wp_hit_kind().map(|k| k.code()).unwrap_or(4);
                    machine.clear_wp_hit();
                    running = false;
                    if let Some(server) = &mut server {
                        if server.is_connected() {
                            gdb_halted = true;
                            server.notify_watchpoint(addr, kind);
                        }
                    }
                    break;
                }
            }
        } else {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
