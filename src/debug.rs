//! Breakpoint and watchpoint tables.
//!
//! One boolean per address, checked on every bus cycle by the machine.
//! Hits latch one-shot until the debugger consumes them. Instruction
//! breakpoints only fire on fetch (SYNC) cycles; the machine enforces that
//! gate before calling [`DebugHooks::check_fetch`].

const TABLE_SIZE: usize = 1 << 16;

/// Watchpoint kinds, using the GDB `Z` packet type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Write,
    Read,
    Access,
}

impl WatchKind {
    pub fn code(self) -> u8 {
        match self {
            WatchKind::Write => 2,
            WatchKind::Read => 3,
            WatchKind::Access => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(WatchKind::Write),
            3 => Some(WatchKind::Read),
            4 => Some(WatchKind::Access),
            _ => None,
        }
    }
}

pub struct DebugHooks {
    bp_enable: bool,
    bp: Box<[bool]>,
    bp_hit: Option<u16>,
    wp_enable: bool,
    wp_write: Box<[bool]>,
    wp_read: Box<[bool]>,
    wp_access: Box<[bool]>,
    wp_hit: Option<(u16, WatchKind)>,
}

impl Default for DebugHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugHooks {
    pub fn new() -> Self {
        Self {
            bp_enable: false,
            bp: vec![false; TABLE_SIZE].into_boxed_slice(),
            bp_hit: None,
            wp_enable: false,
            wp_write: vec![false; TABLE_SIZE].into_boxed_slice(),
            wp_read: vec![false; TABLE_SIZE].into_boxed_slice(),
            wp_access: vec![false; TABLE_SIZE].into_boxed_slice(),
            wp_hit: None,
        }
    }

    pub fn set_bp(&mut self, addr: u16) {
        self.bp[addr as usize] = true;
    }

    pub fn clear_bp(&mut self, addr: u16) {
        self.bp[addr as usize] = false;
    }

    pub fn has_bp(&self, addr: u16) -> bool {
        self.bp[addr as usize]
    }

    pub fn any_bp(&self) -> bool {
        self.bp.iter().any(|set| *set)
    }

    pub fn clear_all_bp(&mut self) {
        self.bp.fill(false);
    }

    pub fn enable_bp(&mut self, enable: bool) {
        self.bp_enable = enable;
    }

    pub fn bp_enabled(&self) -> bool {
        self.bp_enable
    }

    /// Called on instruction-fetch cycles only.
    pub fn check_fetch(&mut self, addr: u16) {
        if self.bp_enable && self.bp[addr as usize] {
            self.bp_hit = Some(addr);
        }
    }

    pub fn bp_hit(&self) -> bool {
        self.bp_enable && self.bp_hit.is_some()
    }

    pub fn bp_hit_addr(&self) -> Option<u16> {
        self.bp_hit
    }

    pub fn clear_bp_hit(&mut self) {
        self.bp_hit = None;
    }

    pub fn set_wp(&mut self, addr: u16, kind: WatchKind) {
        match kind {
            WatchKind::Write => self.wp_write[addr as usize] = true,
            WatchKind::Read => self.wp_read[addr as usize] = true,
            WatchKind::Access => {
                self.wp_write[addr as usize] = true;
                self.wp_read[addr as usize] = true;
                self.wp_access[addr as usize] = true;
            }
        }
    }

    pub fn clear_wp(&mut self, addr: u16, kind: WatchKind) {
        match kind {
            WatchKind::Write => self.wp_write[addr as usize] = false,
            WatchKind::Read => self.wp_read[addr as usize] = false,
            WatchKind::Access => {
                self.wp_write[addr as usize] = false;
                self.wp_read[addr as usize] = false;
                self.wp_access[addr as usize] = false;
            }
        }
    }

    pub fn enable_wp(&mut self, enable: bool) {
        self.wp_enable = enable;
    }

    pub fn wp_enabled(&self) -> bool {
        self.wp_enable
    }

    /// Called on every non-fetch bus cycle. A hit on an address installed as
    /// an access watch reports kind 4; otherwise the kind follows the cycle
    /// direction.
    pub fn check_access(&mut self, addr: u16, is_write: bool) {
        if !self.wp_enable {
            return;
        }
        let tripped = if is_write {
            self.wp_write[addr as usize]
        } else {
            self.wp_read[addr as usize]
        };
        if tripped {
            let kind = if self.wp_access[addr as usize] {
                WatchKind::Access
            } else if is_write {
                WatchKind::Write
            } else {
                WatchKind::Read
            };
            self.wp_hit = Some((addr, kind));
        }
    }

    pub fn wp_hit(&self) -> bool {
        self.wp_enable && self.wp_hit.is_some()
    }

    pub fn wp_hit_addr(&self) -> Option<u16> {
        self.wp_hit.map(|(addr, _)| addr)
    }

    pub fn wp_hit_kind(&self) -> Option<WatchKind> {
        self.wp_hit.map(|(_, kind)| kind)
    }

    pub fn clear_wp_hit(&mut self) {
        self.wp_hit = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_check_only_latches_when_enabled() {
        let mut dbg = DebugHooks::new();
        dbg.set_bp(0xD000);
        dbg.check_fetch(0xD000);
        assert!(!dbg.bp_hit());
        dbg.enable_bp(true);
        dbg.check_fetch(0xD000);
        assert!(dbg.bp_hit());
        assert_eq!(dbg.bp_hit_addr(), Some(0xD000));
        dbg.clear_bp_hit();
        assert!(!dbg.bp_hit());
    }

    #[test]
    fn access_watch_reports_kind_four() {
        let mut dbg = DebugHooks::new();
        dbg.enable_wp(true);
        dbg.set_wp(0x0200, WatchKind::Access);
        dbg.check_access(0x0200, false);
        assert_eq!(dbg.wp_hit_kind(), Some(WatchKind::Access));
        dbg.clear_wp_hit();
        dbg.check_access(0x0200, true);
        assert_eq!(dbg.wp_hit_kind(), Some(WatchKind::Access));
    }

    #[test]
    fn write_watch_ignores_reads() {
        let mut dbg = DebugHooks::new();
        dbg.enable_wp(true);
        dbg.set_wp(0x0300, WatchKind::Write);
        dbg.check_access(0x0300, false);
        assert!(!dbg.wp_hit());
        dbg.check_access(0x0300, true);
        assert_eq!(dbg.wp_hit_kind(), Some(WatchKind::Write));
        assert_eq!(dbg.wp_hit_addr(), Some(0x0300));
    }

    #[test]
    fn clearing_access_watch_clears_both_tables() {
        let mut dbg = DebugHooks::new();
        dbg.enable_wp(true);
        dbg.set_wp(0x0400, WatchKind::Access);
        dbg.clear_wp(0x0400, WatchKind::Access);
        dbg.check_access(0x0400, true);
        dbg.check_access(0x0400, false);
        assert!(!dbg.wp_hit());
    }
}
