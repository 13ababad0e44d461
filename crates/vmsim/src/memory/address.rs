use core::fmt;

use defines::error::{errno, KResult};

/// 模拟的虚拟地址
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA:{:#x}", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 虚拟页号，同时也是页在任务交换空间中的标识
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPageNum(pub usize);

impl fmt::Debug for VirtPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VPN:{:#x}", self.0)
    }
}

impl fmt::Display for VirtPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 由虚拟地址位数和页号位数决定的地址划分方式
///
/// 虚拟地址的高 `page_bits` 位为页号，剩下的低位为页内偏移
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressLayout {
    offset_bits: u32,
    page_bits: u32,
}

impl AddressLayout {
    /// 调用者需保证 `page_bits <= virtual_bits`
    pub const fn new(virtual_bits: u32, page_bits: u32) -> Self {
        Self {
            offset_bits: virtual_bits - page_bits,
            page_bits,
        }
    }

    pub const fn page_size(&self) -> usize {
        1 << self.offset_bits
    }

    /// 一个地址空间中页的数量
    pub const fn page_count(&self) -> usize {
        1 << self.page_bits
    }

    /// 地址空间的大小（字节）
    pub const fn space_size(&self) -> usize {
        1 << (self.offset_bits + self.page_bits)
    }

    /// 拆分为页号和页内偏移。超出地址空间的地址返回 `EFAULT`
    pub fn split(&self, va: VirtAddr) -> KResult<(VirtPageNum, usize)> {
        let vpn = va.0 >> self.offset_bits;
        if vpn >= self.page_count() {
            return Err(errno::EFAULT);
        }
        Ok((VirtPageNum(vpn), va.0 & (self.page_size() - 1)))
    }

    pub fn join(&self, vpn: VirtPageNum, offset: usize) -> VirtAddr {
        debug_assert!(offset < self.page_size());
        VirtAddr((vpn.0 << self.offset_bits) | offset)
    }
}

#[cfg(test)]
mod tests {
    use defines::error::errno;

    use super::{AddressLayout, VirtAddr, VirtPageNum};

    #[test]
    fn split_uses_configured_widths() {
        let layout = AddressLayout::new(16, 6);
        assert_eq!(layout.page_size(), 1024);
        assert_eq!(layout.page_count(), 64);
        assert_eq!(layout.space_size(), 1 << 16);

        assert_eq!(layout.split(VirtAddr(0)), Ok((VirtPageNum(0), 0)));
        assert_eq!(layout.split(VirtAddr(0x0c05)), Ok((VirtPageNum(3), 5)));
        assert_eq!(layout.split(VirtAddr(0xffff)), Ok((VirtPageNum(63), 1023)));
        assert_eq!(layout.join(VirtPageNum(3), 5), VirtAddr(0x0c05));
    }

    #[test]
    fn addresses_past_the_space_are_out_of_range() {
        let layout = AddressLayout::new(10, 2);
        assert_eq!(layout.split(VirtAddr(1 << 10)), Err(errno::EFAULT));
        assert_eq!(layout.split(VirtAddr(usize::MAX)), Err(errno::EFAULT));
        assert!(layout.split(VirtAddr((1 << 10) - 1)).is_ok());
    }

    #[test]
    fn zero_page_bits_means_a_single_page() {
        let layout = AddressLayout::new(8, 0);
        assert_eq!(layout.page_count(), 1);
        assert_eq!(layout.split(VirtAddr(255)), Ok((VirtPageNum(0), 255)));
    }
}
