pub mod cpu;
pub mod debug;
pub mod gdb;
pub mod labels;
pub mod machine;
pub mod pins;
pub mod tty;

use thiserror::Error;

pub use cpu::Cpu;
pub use debug::{DebugHooks, WatchKind};
pub use labels::LabelStore;
pub use machine::{Machine, MEM_SIZE, ROM_BASE, ROM_MAX_LEN};
pub use pins::Pins;
pub use tty::Tty;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rom image is {0} bytes, limit is {1}")]
    RomTooLarge(usize, usize),
    #[error("{0}")]
    Other(String),
}
