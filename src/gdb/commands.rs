//! RSP command dispatch.
//!
//! Consumes a decoded packet payload and produces the reply payload. All
//! emulator access goes through [`RemoteTarget`]. Error replies follow the
//! stub's taxonomy: `E01` for range overflows, `E02` for bad register
//! numbers, `E03` for malformed packets; unknown packets reply empty, which
//! clients treat as "not supported".

use super::xml::{qxfer_chunk, MEMORY_MAP_XML, TARGET_XML};
use super::{
    hex_byte, hex_decode, hex_digit, hex_encode, hex_le16, parse_hex, HexError, RemoteTarget,
    SIGINT, SIGTRAP,
};

/// Protocol register numbers, per the served target description.
const PROTO_REG_PC: u32 = 4;
const PROTO_REG_FLAGS: u32 = 5;

pub struct GdbSession {
    pub connected: bool,
    pub halted: bool,
    pub noack: bool,
    pub last_stop_signal: u8,
}

impl Default for GdbSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GdbSession {
    pub fn new() -> Self {
        Self {
            connected: false,
            halted: true,
            noack: false,
            last_stop_signal: SIGTRAP,
        }
    }

    pub fn stop_reply(signal: u8) -> String {
        format!("T{:02x}thread:01;", signal)
    }

    pub fn dispatch(&mut self, target: &mut dyn RemoteTarget, payload: &str) -> String {
        let Some(command) = payload.chars().next() else {
            return String::new();
        };
        let args = &payload[1..];

        match command {
            '?' => Self::stop_reply(self.last_stop_signal),
            'g' => self.read_all_regs(target),
            'G' => self.write_all_regs(target, args),
            'p' => self.read_one_reg(target, args),
            'P' => self.write_one_reg(target, args),
            'm' => self.read_memory(target, args),
            'M' => self.write_memory(target, args),
            's' => self.step(target, args),
            'c' => self.resume(target, args),
            'Z' => self.insert_point(target, args),
            'z' => self.remove_point(target, args),
            'H' => "OK".to_string(),
            'D' => {
                self.connected = false;
                self.halted = false;
                "OK".to_string()
            }
            'k' => {
                self.connected = false;
                String::new()
            }
            'q' => self.query(target, args),
            'Q' => self.set_query(args),
            'v' => self.v_packet(target, args),
            _ => String::new(),
        }
    }

    fn read_all_regs(&self, target: &mut dyn RemoteTarget) -> String {
        let mut reply = String::with_capacity(14);
        reply.push_str(&hex_byte(target.read_reg8(0))); // A
        reply.push_str(&hex_byte(target.read_reg8(1))); // X
        reply.push_str(&hex_byte(target.read_reg8(2))); // Y
        reply.push_str(&hex_byte(target.read_reg8(3))); // SP
        reply.push_str(&hex_le16(target.read_reg16(5))); // PC, low byte first
        reply.push_str(&hex_byte(target.read_reg8(4))); // P
        reply
    }

    fn write_all_regs(&self, target: &mut dyn RemoteTarget, args: &str) -> String {
        if args.len() != 14 || !args.bytes().all(|b| hex_digit(b).is_some()) {
            return "E03".to_string();
        }
        let byte_at = |idx: usize| u8::from_str_radix(&args[idx..idx + 2], 16).unwrap_or(0);
        target.write_reg8(0, byte_at(0));
        target.write_reg8(1, byte_at(2));
        target.write_reg8(2, byte_at(4));
        target.write_reg8(3, byte_at(6));
        let pc = u16::from_le_bytes([byte_at(8), byte_at(10)]);
        target.write_reg16(5, pc);
        target.write_reg8(4, byte_at(12));
        "OK".to_string()
    }

    fn read_one_reg(&self, target: &mut dyn RemoteTarget, args: &str) -> String {
        let reg = match parse_hex(args, 0xFF) {
            Ok(reg) => reg,
            Err(_) => return "E03".to_string(),
        };
        match reg {
            0..=3 => hex_byte(target.read_reg8(reg as u8)),
            PROTO_REG_PC => hex_le16(target.read_reg16(5)),
            PROTO_REG_FLAGS => hex_byte(target.read_reg8(4)),
            _ => "E02".to_string(),
        }
    }

    fn write_one_reg(&self, target: &mut dyn RemoteTarget, args: &str) -> String {
        let Some((reg_field, value_field)) = args.split_once('=') else {
            return "E03".to_string();
        };
        let reg = match parse_hex(reg_field, 0xFF) {
            Ok(reg) => reg,
            Err(_) => return "E03".to_string(),
        };
        if reg > PROTO_REG_FLAGS {
            return "E02".to_string();
        }
        if reg == PROTO_REG_PC {
            if value_field.len() != 4 {
                return "E03".to_string();
            }
            let (Ok(lo), Ok(hi)) = (
                parse_hex(&value_field[..2], 0xFF),
                parse_hex(&value_field[2..], 0xFF),
            ) else {
                return "E03".to_string();
            };
            target.write_reg16(5, u16::from_le_bytes([lo as u8, hi as u8]));
        } else {
            if value_field.len() != 2 {
                return "E03".to_string();
            }
            let Ok(value) = parse_hex(value_field, 0xFF) else {
                return "E03".to_string();
            };
            let target_reg = if reg == PROTO_REG_FLAGS { 4 } else { reg as u8 };
            target.write_reg8(target_reg, value as u8);
        }
        "OK".to_string()
    }

    fn parse_range(args: &str) -> Result<(u16, u32), String> {
        let Some((addr_field, len_field)) = args.split_once(',') else {
            return Err("E03".to_string());
        };
        let addr = match parse_hex(addr_field, 0xFFFF) {
            Ok(addr) => addr,
            Err(HexError::Malformed) => return Err("E03".to_string()),
            Err(HexError::OutOfRange) => return Err("E01".to_string()),
        };
        let len = match parse_hex(len_field, 0xFFFF) {
            Ok(len) => len,
            Err(HexError::Malformed) => return Err("E03".to_string()),
            Err(HexError::OutOfRange) => return Err("E01".to_string()),
        };
        if addr + len > 0x10000 {
            return Err("E01".to_string());
        }
        Ok((addr as u16, len))
    }

    fn read_memory(&self, target: &mut dyn RemoteTarget, args: &str) -> String {
        let (addr, len) = match Self::parse_range(args) {
            Ok(range) => range,
            Err(reply) => return reply,
        };
        let mut reply = String::with_capacity(len as usize * 2);
        for offset in 0..len {
            reply.push_str(&hex_byte(target.read_mem(addr.wrapping_add(offset as u16))));
        }
        reply
    }

    fn write_memory(&self, target: &mut dyn RemoteTarget, args: &str) -> String {
        let Some((range_field, data_field)) = args.split_once(':') else {
            return "E03".to_string();
        };
        let (addr, len) = match Self::parse_range(range_field) {
            Ok(range) => range,
            Err(reply) => return reply,
        };
        if data_field.len() != len as usize * 2 {
            return "E03".to_string();
        }
        let Some(bytes) = hex_decode(data_field) else {
            return "E03".to_string();
        };
        for (offset, byte) in bytes.iter().enumerate() {
            target.write_mem(addr.wrapping_add(offset as u16), *byte);
        }
        "OK".to_string()
    }

    fn load_optional_pc(&self, target: &mut dyn RemoteTarget, args: &str) -> Option<String> {
        if args.is_empty() {
            return None;
        }
        match parse_hex(args, 0xFFFF) {
            Ok(addr) => {
                target.write_reg16(5, addr as u16);
                None
            }
            Err(HexError::Malformed) => Some("E03".to_string()),
            Err(HexError::OutOfRange) => Some("E01".to_string()),
        }
    }

    fn step(&mut self, target: &mut dyn RemoteTarget, args: &str) -> String {
        if let Some(error) = self.load_optional_pc(target, args) {
            return error;
        }
        let signal = target.step_instruction();
        self.last_stop_signal = signal;
        self.halted = true;
        Self::stop_reply(signal)
    }

    /// Continue never replies inline; the transport waits for an async stop.
    fn resume(&mut self, target: &mut dyn RemoteTarget, args: &str) -> String {
        if let Some(error) = self.load_optional_pc(target, args) {
            return error;
        }
        self.halted = false;
        String::new()
    }

    fn parse_point(args: &str) -> Result<(u8, u16), String> {
        let bytes = args.as_bytes();
        if bytes.len() < 3 {
            return Err("E03".to_string());
        }
        let kind = bytes[0].wrapping_sub(b'0');
        if kind > 4 {
            return Err(String::new()); // unsupported point type
        }
        if bytes[1] != b',' {
            return Err("E03".to_string());
        }
        let Some((addr_field, _)) = args[2..].split_once(',') else {
            return Err("E03".to_string());
        };
        let addr = match parse_hex(addr_field, 0xFFFF) {
            Ok(addr) => addr as u16,
            Err(HexError::Malformed) => return Err("E03".to_string()),
            Err(HexError::OutOfRange) => return Err("E01".to_string()),
        };
        Ok((kind, addr))
    }

    fn insert_point(&self, target: &mut dyn RemoteTarget, args: &str) -> String {
        let (kind, addr) = match Self::parse_point(args) {
            Ok(point) => point,
            Err(reply) => return reply,
        };
        if kind <= 1 {
            target.set_breakpoint(addr);
        } else if !target.set_watchpoint(addr, kind) {
            return String::new();
        }
        "OK".to_string()
    }

    fn remove_point(&self, target: &mut dyn RemoteTarget, args: &str) -> String {
        let (kind, addr) = match Self::parse_point(args) {
            Ok(point) => point,
            Err(reply) => return reply,
        };
        if kind <= 1 {
            target.clear_breakpoint(addr);
        } else if !target.clear_watchpoint(addr, kind) {
            return String::new();
        }
        "OK".to_string()
    }

    fn query(&mut self, target: &mut dyn RemoteTarget, args: &str) -> String {
        if args.starts_with("Supported") {
            return "PacketSize=20000;QStartNoAckMode+;qXfer:features:read+;\
                    qXfer:memory-map:read+"
                .to_string();
        }
        if let Some(params) = args.strip_prefix("Xfer:features:read:target.xml:") {
            return qxfer_chunk(TARGET_XML, params);
        }
        if let Some(params) = args.strip_prefix("Xfer:memory-map:read::") {
            return qxfer_chunk(MEMORY_MAP_XML, params);
        }
        match args {
            "fThreadInfo" => return "m01".to_string(),
            "sThreadInfo" => return "l".to_string(),
            "C" => return "QC01".to_string(),
            "Attached" => return "1".to_string(),
            _ => {}
        }
        if let Some(command_hex) = args.strip_prefix("Rcmd,") {
            return self.monitor_command(target, command_hex);
        }
        String::new()
    }

    fn monitor_command(&mut self, target: &mut dyn RemoteTarget, command_hex: &str) -> String {
        let command = hex_decode(command_hex)
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_default();
        match command.trim() {
            "reset" => {
                target.reset();
                "OK".to_string()
            }
            _ => format!("O{}", hex_encode(b"Unknown monitor command\n")),
        }
    }

    fn set_query(&mut self, args: &str) -> String {
        if args.starts_with("StartNoAckMode") {
            self.noack = true;
            return "OK".to_string();
        }
        String::new()
    }

    fn v_packet(&mut self, target: &mut dyn RemoteTarget, args: &str) -> String {
        if args == "MustReplyEmpty" {
            return String::new();
        }
        if args == "Cont?" {
            return "vCont;c;s;t".to_string();
        }
        if let Some(actions) = args.strip_prefix("Cont;") {
            let mut chars = actions.chars();
            return match chars.next() {
                Some('c') => self.resume(target, ""),
                Some('s') => self.step(target, ""),
                Some('t') => {
                    self.halted = true;
                    self.last_stop_signal = SIGINT;
                    Self::stop_reply(SIGINT)
                }
                _ => String::new(),
            };
        }
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_starts_halted_with_sigtrap() {
        let session = GdbSession::new();
        assert!(session.halted);
        assert!(!session.connected);
        assert!(!session.noack);
        assert_eq!(session.last_stop_signal, SIGTRAP);
    }

    #[test]
    fn stop_reply_formats_signal_as_two_hex_digits() {
        assert_eq!(GdbSession::stop_reply(5), "T05thread:01;");
        assert_eq!(GdbSession::stop_reply(2), "T02thread:01;");
    }
}
