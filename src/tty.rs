//! Memory-mapped TTY serial port.
//!
//! Four registers at `0xC100`: out-status, out-data, in-status, in-data.
//! Input bytes arrive through [`Tty::inject`] or an optional channel drained
//! by the per-tick pump; output bytes go straight to the configured sink.
//! IRQ bit 1 in the aggregation cell tracks queue non-emptiness.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::mpsc::Receiver;

use crate::pins::Pins;

pub const TTY_BASE: u16 = 0xC100;
pub const TTY_REG_MASK: u16 = 0xFFF0;
/// Bit index in the IRQ aggregation cell assigned to the TTY.
pub const TTY_IRQ_BIT: u8 = 1;

pub const REG_OUT_STATUS: u8 = 0x0;
pub const REG_OUT_DATA: u8 = 0x1;
pub const REG_IN_STATUS: u8 = 0x2;
pub const REG_IN_DATA: u8 = 0x3;

pub struct Tty {
    queue: VecDeque<u8>,
    input: Option<Receiver<u8>>,
    output: Box<dyn Write + Send>,
}

impl Default for Tty {
    fn default() -> Self {
        Self::new()
    }
}

impl Tty {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            input: None,
            output: Box::new(io::stdout()),
        }
    }

    /// Attach a host input source. The pump takes at most one byte per tick.
    pub fn set_input(&mut self, input: Receiver<u8>) {
        self.input = Some(input);
    }

    pub fn set_output(&mut self, output: Box<dyn Write + Send>) {
        self.output = output;
    }

    pub fn inject(&mut self, byte: u8) {
        self.queue.push_back(byte);
    }

    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// Per-tick pump: poll host input, then mirror queue state onto the IRQ
    /// line.
    pub fn tick(&mut self, irq_cell: &mut u8) {
        if let Some(input) = &self.input {
            if let Ok(byte) = input.try_recv() {
                self.queue.push_back(byte);
            }
        }
        self.apply_irq(irq_cell);
    }

    /// Service one bus cycle addressed at TTY register `reg`.
    pub fn decode(&mut self, pins: &mut Pins, reg: u8, irq_cell: &mut u8) {
        if pins.rw() {
            let data = match reg {
                REG_OUT_STATUS => 0x00, // always ready to transmit
                REG_OUT_DATA => 0xFF,
                REG_IN_STATUS => {
                    if self.queue.is_empty() {
                        0x00
                    } else {
                        0x01
                    }
                }
                // Empty-queue reads return 0x00 without touching the queue.
                REG_IN_DATA => self.queue.pop_front().unwrap_or(0x00),
                _ => 0x00,
            };
            pins.set_data(data);
        } else if reg == REG_OUT_DATA {
            let byte = pins.data();
            let _ = self.output.write_all(&[byte]);
            let _ = self.output.flush();
        }
        self.apply_irq(irq_cell);
    }

    pub fn reset(&mut self, irq_cell: &mut u8) {
        self.queue.clear();
        self.apply_irq(irq_cell);
    }

    fn apply_irq(&self, irq_cell: &mut u8) {
        if self.queue.is_empty() {
            *irq_cell &= !(1 << TTY_IRQ_BIT);
        } else {
            *irq_cell |= 1 << TTY_IRQ_BIT;
        }
    }
}
