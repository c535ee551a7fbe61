//! Address types. The protected-mode target has a 32-bit address space, so
//! both wrap `u32`; pointers are narrowed to that width when converted.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub const fn to_inner(self) -> u32 {
        self.0
    }
}

impl fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as usize as u32)
    }

    pub const fn to_inner(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Wraps at 4 GiB instead of overflowing.
    pub const fn wrapping_offset(self, offset: u32) -> Self {
        Self(self.0.wrapping_add(offset))
    }

    pub const fn align_down(self, align: u32) -> Self {
        Self(self.0 & !(align - 1))
    }
}

impl fmt::LowerHex for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod test {
    use super::VirtualAddress;

    #[test]
    fn align_down_clears_low_bits() {
        assert_eq!(VirtualAddress::new(0x1234f).align_down(16), VirtualAddress::new(0x12340));
        assert_eq!(VirtualAddress::new(0x12340).align_down(16), VirtualAddress::new(0x12340));
    }

    #[test]
    fn wrapping_offset_does_not_overflow() {
        assert_eq!(VirtualAddress::new(0xffff_e000).wrapping_offset(0x2000), VirtualAddress::new(0));
        assert_eq!(VirtualAddress::new(0x1000).wrapping_offset(0x10), VirtualAddress::new(0x1010));
    }

    #[test]
    fn hex_formatting_uses_inner_value() {
        let addr = VirtualAddress::new(0x0010_0000);
        assert_eq!(format!("{:#x}", addr), "0x100000");
    }
}
