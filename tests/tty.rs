use std::io::Write;
use std::sync::{Arc, Mutex};

use n8machine::machine::{Machine, ROM_BASE};
use n8machine::pins::{Pins, PIN_RW};
use n8machine::tty::{Tty, REG_IN_DATA, REG_IN_STATUS, REG_OUT_DATA, REG_OUT_STATUS, TTY_BASE};

fn read_pins(addr: u16) -> Pins {
    let mut pins = Pins::new();
    pins.set_addr(addr);
    pins.set(PIN_RW, true);
    pins
}

fn write_pins(addr: u16, data: u8) -> Pins {
    let mut pins = Pins::new();
    pins.set_addr(addr);
    pins.set_data(data);
    pins
}

#[derive(Clone)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn out_status_reads_always_ready() {
    let mut tty = Tty::new();
    let mut irq = 0u8;
    let mut pins = read_pins(TTY_BASE);
    tty.decode(&mut pins, REG_OUT_STATUS, &mut irq);
    assert_eq!(pins.data(), 0x00);
}

#[test]
fn out_data_read_returns_ff() {
    let mut tty = Tty::new();
    let mut irq = 0u8;
    let mut pins = read_pins(TTY_BASE + 1);
    tty.decode(&mut pins, REG_OUT_DATA, &mut irq);
    assert_eq!(pins.data(), 0xFF);
}

#[test]
fn in_status_reflects_queue_state() {
    let mut tty = Tty::new();
    let mut irq = 0u8;

    let mut pins = read_pins(TTY_BASE + 2);
    tty.decode(&mut pins, REG_IN_STATUS, &mut irq);
    assert_eq!(pins.data(), 0x00);

    tty.inject(b'A');
    let mut pins = read_pins(TTY_BASE + 2);
    tty.decode(&mut pins, REG_IN_STATUS, &mut irq);
    assert_eq!(pins.data(), 0x01);
}

#[test]
fn in_data_read_drains_queue_and_irq() {
    let mut tty = Tty::new();
    let mut irq = 0u8;
    tty.inject(0x41);
    tty.tick(&mut irq);
    assert_ne!(irq & 0x02, 0);

    let mut pins = read_pins(TTY_BASE + 3);
    tty.decode(&mut pins, REG_IN_DATA, &mut irq);
    assert_eq!(pins.data(), 0x41);
    assert_eq!(tty.buffered(), 0);
    assert_eq!(irq & 0x02, 0);
}

#[test]
fn empty_in_data_read_returns_zero_without_underflow() {
    let mut tty = Tty::new();
    let mut irq = 0u8;
    let mut pins = read_pins(TTY_BASE + 3);
    tty.decode(&mut pins, REG_IN_DATA, &mut irq);
    assert_eq!(pins.data(), 0x00);
    assert_eq!(tty.buffered(), 0);
}

#[test]
fn phantom_registers_read_zero_and_ignore_writes() {
    let mut tty = Tty::new();
    let mut irq = 0u8;
    for reg in 4..=15u8 {
        let mut pins = read_pins(TTY_BASE + reg as u16);
        tty.decode(&mut pins, reg, &mut irq);
        assert_eq!(pins.data(), 0x00);

        let mut pins = write_pins(TTY_BASE + reg as u16, 0xAA);
        tty.decode(&mut pins, reg, &mut irq);
    }
    assert_eq!(tty.buffered(), 0);
}

#[test]
fn writes_to_status_registers_are_ignored() {
    let mut tty = Tty::new();
    let mut irq = 0u8;
    for reg in [0u8, 2, 3] {
        let mut pins = write_pins(TTY_BASE + reg as u16, 0xBB);
        tty.decode(&mut pins, reg, &mut irq);
    }
    assert_eq!(tty.buffered(), 0);
}

#[test]
fn reset_clears_pending_input() {
    let mut tty = Tty::new();
    let mut irq = 0u8;
    tty.inject(b'A');
    tty.inject(b'B');
    tty.reset(&mut irq);
    assert_eq!(tty.buffered(), 0);
    assert_eq!(irq & 0x02, 0);
}

#[test]
fn firmware_echo_reaches_output_sink() {
    // Poll in-status until a byte arrives, read it, write it to out-data:
    //   loop:  LDA $C102; BEQ loop; LDA $C103; STA $C101; JMP loop
    let program = [
        0xAD, 0x02, 0xC1, // LDA $C102
        0xF0, 0xFB, //       BEQ loop
        0xAD, 0x03, 0xC1, // LDA $C103
        0x8D, 0x01, 0xC1, // STA $C101
        0x4C, 0x00, 0xD0, // JMP loop
    ];
    let sink = Arc::new(Mutex::new(Vec::new()));
    let mut machine = Machine::new();
    machine.load_rom(&program).expect("load program");
    machine.set_reset_vector(ROM_BASE);
    machine.tty.set_output(Box::new(SharedSink(sink.clone())));
    machine.tty.inject(b'H');
    machine.tty.inject(b'i');

    for _ in 0..400 {
        machine.step();
    }
    assert_eq!(*sink.lock().unwrap(), b"Hi");
}
