// Tue Jan 13 2026 - Alex

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// `vm_prot_t` bits from a segment command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Protection: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXECUTE = 0x4;
    }
}

impl Protection {
    pub fn from_vm_prot(flags: u32) -> Self {
        Self::from_bits_truncate(flags)
    }

    pub fn can_execute(self) -> bool {
        self.contains(Self::EXECUTE)
    }

    pub fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.contains(Self::READ) { 'r' } else { '-' };
        let w = if self.contains(Self::WRITE) { 'w' } else { '-' };
        let x = if self.contains(Self::EXECUTE) { 'x' } else { '-' };
        write!(f, "{}{}{}", r, w, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Protection::from_vm_prot(5).to_string(), "r-x");
        assert_eq!(Protection::from_vm_prot(3).to_string(), "rw-");
        assert!(Protection::from_vm_prot(0xff).can_execute());
    }
}
