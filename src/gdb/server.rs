//! TCP transport and driver-side polling.
//!
//! A dedicated thread owns the listening socket and one client at a time,
//! feeding bytes through the shared framer. Decoded packets cross to the
//! driver thread over a command channel; replies come back over a reply
//! channel. `Reply::Continue` is the sentinel that tells the transport "no
//! inline reply, await a later stop"; the transport then delivers whatever
//! `notify_stop`/`notify_watchpoint` pushes, either on its next recv timeout
//! or before handing over the next request.

use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::commands::GdbSession;
use super::framer::{format_reply, FramerEvent, PacketFramer};
use super::{GdbConfig, RemoteTarget, SIGINT, SIGTRAP};
use crate::Result;

const ACCEPT_POLL: Duration = Duration::from_millis(200);
const RECV_TIMEOUT: Duration = Duration::from_millis(100);
const REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Collapsed result of draining the command queue, highest urgency wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    None,
    Resumed,
    Detached,
    Stepped,
    Halted,
    Kill,
}

impl PollStatus {
    fn rank(self) -> u8 {
        match self {
            PollStatus::None => 0,
            PollStatus::Resumed => 1,
            PollStatus::Detached => 2,
            PollStatus::Stepped => 3,
            PollStatus::Halted => 4,
            PollStatus::Kill => 5,
        }
    }
}

enum Command {
    Connect,
    Disconnect,
    Interrupt,
    Packet(String),
}

enum Reply {
    Payload(String),
    Continue,
    NoReply,
}

struct Shared {
    shutdown: AtomicBool,
    connected: AtomicBool,
    noack: AtomicBool,
    interrupt_requested: AtomicBool,
}

pub struct GdbServer {
    session: GdbSession,
    command_rx: Receiver<Command>,
    reply_tx: Sender<Reply>,
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
}

impl GdbServer {
    /// Bind the listener and start the transport thread. Pass port 0 to let
    /// the OS choose; the bound address is available via [`local_addr`].
    ///
    /// [`local_addr`]: GdbServer::local_addr
    pub fn start(config: GdbConfig) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", config.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (command_tx, command_rx) = channel();
        let (reply_tx, reply_rx) = channel();
        let shared = Arc::new(Shared {
            shutdown: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            noack: AtomicBool::new(false),
            interrupt_requested: AtomicBool::new(false),
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("gdb-transport".to_string())
            .spawn(move || transport_main(listener, command_tx, reply_rx, thread_shared))?;

        eprintln!("gdb: listening on {local_addr}");
        Ok(Self {
            session: GdbSession::new(),
            command_rx,
            reply_tx,
            shared,
            thread: Some(thread),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_halted(&self) -> bool {
        self.session.halted
    }

    /// One-shot: true if the client sent Ctrl-C since the last call.
    pub fn interrupt_requested(&self) -> bool {
        self.shared.interrupt_requested.swap(false, Ordering::SeqCst)
    }

    /// Drain the command queue on the driver thread. Each packet is
    /// dispatched against `target`; the collapsed status tells the run loop
    /// how to react once.
    pub fn poll(&mut self, target: &mut dyn RemoteTarget) -> PollStatus {
        let mut status = PollStatus::None;
        while let Ok(command) = self.command_rx.try_recv() {
            let current = self.handle_command(target, command);
            if current.rank() > status.rank() {
                status = current;
            }
        }
        status
    }

    fn handle_command(&mut self, target: &mut dyn RemoteTarget, command: Command) -> PollStatus {
        match command {
            Command::Connect => {
                self.session.connected = true;
                self.session.halted = true;
                self.session.noack = false;
                self.session.last_stop_signal = SIGTRAP;
                self.shared.noack.store(false, Ordering::SeqCst);
                // Realign the CPU to an instruction boundary so the first
                // register read reports a stable PC.
                let pc = target.pc();
                target.write_reg16(5, pc);
                PollStatus::Halted
            }
            Command::Disconnect => {
                self.session.connected = false;
                self.session.halted = false;
                target.detach();
                PollStatus::Detached
            }
            Command::Interrupt => {
                self.shared.interrupt_requested.store(false, Ordering::SeqCst);
                self.session.halted = true;
                self.session.last_stop_signal = SIGINT;
                self.send_reply(Reply::Payload(GdbSession::stop_reply(SIGINT)));
                PollStatus::Halted
            }
            Command::Packet(payload) => self.handle_packet(target, &payload),
        }
    }

    fn handle_packet(&mut self, target: &mut dyn RemoteTarget, payload: &str) -> PollStatus {
        let is_continue = payload.starts_with('c') || payload.starts_with("vCont;c");
        let is_step = payload.starts_with('s') || payload.starts_with("vCont;s");
        let is_vcont_halt = payload.starts_with("vCont;t");

        if is_continue {
            // Dispatch for side effects (optional PC preload), then tell the
            // transport to await an async stop.
            self.session.dispatch(target, payload);
            self.send_reply(Reply::Continue);
            return PollStatus::Resumed;
        }
        if is_vcont_halt {
            let reply = self.session.dispatch(target, payload);
            self.send_reply(Reply::Payload(reply));
            return PollStatus::Halted;
        }
        match payload.chars().next() {
            Some('D') => {
                let reply = self.session.dispatch(target, payload);
                target.detach();
                self.send_reply(Reply::Payload(reply));
                PollStatus::Detached
            }
            Some('k') => {
                self.session.connected = false;
                self.send_reply(Reply::NoReply);
                PollStatus::Kill
            }
            _ => {
                let reply = self.session.dispatch(target, payload);
                if self.session.noack {
                    self.shared.noack.store(true, Ordering::SeqCst);
                }
                self.send_reply(Reply::Payload(reply));
                if is_step {
                    PollStatus::Stepped
                } else {
                    PollStatus::None
                }
            }
        }
    }

    /// Deliver an async stop reply after a breakpoint or guard trip while
    /// free-running.
    pub fn notify_stop(&mut self, signal: u8) {
        self.session.last_stop_signal = signal;
        self.session.halted = true;
        self.send_reply(Reply::Payload(GdbSession::stop_reply(signal)));
    }

    /// Deliver an async watchpoint stop. `kind` uses the Z packet type codes
    /// (2 write, 3 read, 4 access).
    pub fn notify_watchpoint(&mut self, addr: u16, kind: u8) {
        self.session.last_stop_signal = SIGTRAP;
        self.session.halted = true;
        let key = match kind {
            2 => "watch",
            3 => "rwatch",
            _ => "awatch",
        };
        let reply = format!("T05{key}:{};thread:01;", super::hex_le16(addr));
        self.send_reply(Reply::Payload(reply));
    }

    fn send_reply(&self, reply: Reply) {
        // A send can only fail after the transport thread exited; the driver
        // keeps running either way.
        let _ = self.reply_tx.send(reply);
    }

    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for GdbServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn transport_main(
    listener: TcpListener,
    command_tx: Sender<Command>,
    reply_rx: Receiver<Reply>,
    shared: Arc<Shared>,
) {
    while !shared.shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                eprintln!("gdb: client connected from {peer}");
                shared.connected.store(true, Ordering::SeqCst);
                shared.noack.store(false, Ordering::SeqCst);
                if command_tx.send(Command::Connect).is_err() {
                    return;
                }
                let _ = serve_client(stream, &command_tx, &reply_rx, &shared);
                if command_tx.send(Command::Disconnect).is_err() {
                    return;
                }
                shared.connected.store(false, Ordering::SeqCst);
                eprintln!("gdb: client disconnected");
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(error) => {
                eprintln!("gdb: accept failed: {error}");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve_client(
    mut stream: TcpStream,
    command_tx: &Sender<Command>,
    reply_rx: &Receiver<Reply>,
    shared: &Arc<Shared>,
) -> std::io::Result<()> {
    use std::io::Read;

    stream.set_read_timeout(Some(RECV_TIMEOUT))?;
    let trace = std::env::var("N8_GDB_TRACE").is_ok();
    let mut framer = PacketFramer::new();
    let mut waiting_async = false;
    let mut buf = [0u8; 1024];

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        let count = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(count) => count,
            Err(error)
                if matches!(
                    error.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                // Idle: opportunistically deliver a pending async stop.
                if waiting_async {
                    if let Ok(Reply::Payload(payload)) = reply_rx.try_recv() {
                        send_framed(&mut stream, &payload, trace)?;
                        waiting_async = false;
                    }
                }
                continue;
            }
            Err(error) => return Err(error),
        };

        for byte in &buf[..count] {
            match framer.feed(*byte) {
                FramerEvent::Pending => {}
                FramerEvent::Nak => {
                    if !shared.noack.load(Ordering::SeqCst) {
                        stream.write_all(b"-")?;
                    }
                }
                FramerEvent::Interrupt => {
                    shared.interrupt_requested.store(true, Ordering::SeqCst);
                    if command_tx.send(Command::Interrupt).is_err() {
                        return Ok(());
                    }
                    waiting_async = true;
                }
                FramerEvent::Packet(payload) => {
                    let payload = String::from_utf8_lossy(&payload).into_owned();
                    if trace {
                        eprintln!("gdb: <- {payload}");
                    }
                    if !shared.noack.load(Ordering::SeqCst) {
                        stream.write_all(b"+")?;
                    }

                    // A pending stop reply is always delivered before the
                    // next request's reply.
                    if waiting_async {
                        while let Ok(reply) = reply_rx.try_recv() {
                            if let Reply::Payload(pending) = reply {
                                send_framed(&mut stream, &pending, trace)?;
                            }
                        }
                        waiting_async = false;
                    }

                    if command_tx.send(Command::Packet(payload)).is_err() {
                        return Ok(());
                    }
                    match reply_rx.recv_timeout(REPLY_TIMEOUT) {
                        Ok(Reply::Continue) => waiting_async = true,
                        Ok(Reply::NoReply) => {}
                        Ok(Reply::Payload(reply)) => send_framed(&mut stream, &reply, trace)?,
                        Err(RecvTimeoutError::Timeout) => {
                            eprintln!("gdb: driver reply timeout, sending empty reply");
                            send_framed(&mut stream, "", trace)?;
                        }
                        Err(RecvTimeoutError::Disconnected) => return Ok(()),
                    }
                }
            }
        }
    }
}

fn send_framed(stream: &mut TcpStream, payload: &str, trace: bool) -> std::io::Result<()> {
    if trace {
        eprintln!("gdb: -> {payload}");
    }
    stream.write_all(format_reply(payload).as_bytes())
}
