//! End-to-end TCP session against a live transport thread.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use n8machine::gdb::{format_reply, GdbConfig, GdbServer, PollStatus, SIGTRAP};
use n8machine::machine::{Machine, ROM_BASE};

struct Session {
    server: GdbServer,
    machine: Machine,
    stream: TcpStream,
    rx_buf: Vec<u8>,
}

impl Session {
    fn start(program: &[u8]) -> Self {
        let mut machine = Machine::new();
        machine.load_rom(program).expect("load program");
        machine.set_reset_vector(ROM_BASE);
        for _ in 0..8 {
            machine.step();
        }

        let server = GdbServer::start(GdbConfig {
            port: 0,
            enabled: true,
        })
        .expect("bind ephemeral port");
        let stream = TcpStream::connect(server.local_addr()).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_millis(20)))
            .expect("read timeout");

        let mut session = Self {
            server,
            machine,
            stream,
            rx_buf: Vec::new(),
        };
        // Wait for the transport to accept and the driver to see CONNECT.
        session.pump_until(|_, status_seen| status_seen.contains(&PollStatus::Halted));
        session
    }

    /// Poll the driver and drain the socket until `done` says stop.
    fn pump_until(&mut self, done: impl Fn(&[u8], &[PollStatus]) -> bool) -> Vec<PollStatus> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut statuses = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let status = self.server.poll(&mut self.machine);
            if status != PollStatus::None {
                statuses.push(status);
            }
            match self.stream.read(&mut chunk) {
                Ok(0) => panic!("server closed the connection"),
                Ok(count) => self.rx_buf.extend_from_slice(&chunk[..count]),
                Err(error)
                    if matches!(
                        error.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(error) => panic!("socket error: {error}"),
            }
            if done(&self.rx_buf, &statuses) {
                return statuses;
            }
            assert!(
                Instant::now() < deadline,
                "timed out; received so far: {:?}",
                String::from_utf8_lossy(&self.rx_buf)
            );
        }
    }

    fn send_packet(&mut self, payload: &str) {
        self.stream
            .write_all(format_reply(payload).as_bytes())
            .expect("send packet");
    }

    fn take_rx(&mut self) -> String {
        let taken = std::mem::take(&mut self.rx_buf);
        String::from_utf8_lossy(&taken).into_owned()
    }

    fn transact(&mut self, payload: &str, expect: &str) -> String {
        self.rx_buf.clear();
        self.send_packet(payload);
        let needle = expect.to_string();
        self.pump_until(move |buf, _| {
            String::from_utf8_lossy(buf).contains(&needle)
        });
        self.take_rx()
    }
}

#[test]
fn supported_handshake_is_acked_and_answered() {
    let mut session = Session::start(&[0xEA, 0xEA]);
    let reply = session.transact("qSupported", "PacketSize=20000");
    assert!(reply.starts_with('+'), "expected ACK first, got {reply:?}");
    assert!(reply.contains("QStartNoAckMode+"));
}

#[test]
fn noack_mode_drops_ack_bytes() {
    let mut session = Session::start(&[0xEA, 0xEA]);
    let reply = session.transact("QStartNoAckMode", "OK");
    assert!(reply.starts_with('+'));

    let reply = session.transact("?", "thread:01;");
    assert!(
        !reply.contains('+'),
        "no ACK bytes expected in noack mode, got {reply:?}"
    );
    assert!(reply.contains("$T05thread:01;#"));
}

#[test]
fn step_packet_advances_the_machine() {
    let mut session = Session::start(&[0xA9, 0x42, 0xEA]);
    let reply = session.transact("s", "T05thread:01;");
    assert!(reply.contains("T05thread:01;"));
    assert_eq!(session.machine.cpu.a(), 0x42);
}

#[test]
fn continue_defers_reply_until_breakpoint_stop() {
    // NOP sled with a breakpoint a few instructions in.
    let mut session = Session::start(&[0xEA, 0xEA, 0xEA, 0xEA]);
    assert!(session.transact("Z0,d002,1", "OK").contains("OK"));

    session.rx_buf.clear();
    session.send_packet("c");
    // Drive the machine like the front-end run loop: step while free-running,
    // surface the hit as an async stop.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut resumed = false;
    let mut notified = false;
    loop {
        let status = session.server.poll(&mut session.machine);
        if status == PollStatus::Resumed {
            resumed = true;
        }
        if resumed && !notified {
            for _ in 0..200 {
                session.machine.step();
                if session.machine.bp_hit() {
                    session.machine.clear_bp_hit();
                    session.server.notify_stop(SIGTRAP);
                    notified = true;
                    break;
                }
            }
        }
        let mut chunk = [0u8; 256];
        match session.stream.read(&mut chunk) {
            Ok(count) => session.rx_buf.extend_from_slice(&chunk[..count]),
            Err(_) => {}
        }
        if String::from_utf8_lossy(&session.rx_buf).contains("T05thread:01;") {
            break;
        }
        assert!(Instant::now() < deadline, "no async stop reply arrived");
    }
    assert!(notified);
}

#[test]
fn interrupt_byte_yields_sigint_stop_reply() {
    let mut session = Session::start(&[0xEA, 0xEA]);
    session.rx_buf.clear();
    session.stream.write_all(&[0x03]).expect("send interrupt");
    let statuses = session.pump_until(|buf, _| {
        String::from_utf8_lossy(buf).contains("T02thread:01;")
    });
    // The poll consumed the one-shot interrupt flag when it halted.
    assert!(statuses.contains(&PollStatus::Halted));
    assert!(!session.server.interrupt_requested());
}

#[test]
fn detach_returns_ok_and_reports_detached() {
    let mut session = Session::start(&[0xEA, 0xEA]);
    session.rx_buf.clear();
    session.send_packet("D");
    let statuses =
        session.pump_until(|buf, _| String::from_utf8_lossy(buf).contains("OK"));
    assert!(statuses.contains(&PollStatus::Detached));
}
