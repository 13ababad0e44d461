//! 交换空间
//!
//! [`SwapTarget`] 是任务的交换存储对外暴露的读写能力，页只以页号寻址；
//! [`SwapDevice`] 模拟磁盘，请求异步完成

mod device;

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use defines::error::{errno, KResult};
use klocks::SpinMutex;

pub use self::device::{IoKind, IoRequest, SwapDevice};
use crate::memory::VirtPageNum;

pub trait SwapTarget: Send + Sync {
    /// 读出一页。`buf` 的长度即页大小
    fn read_page(&self, page_id: VirtPageNum, buf: &mut [u8]) -> KResult;
    fn write_page(&self, page_id: VirtPageNum, buf: &[u8]) -> KResult;
}

/// 内存中的交换文件。从未写过的页读出全 0
pub struct MemorySwapFile {
    page_size: usize,
    blocks: SpinMutex<BTreeMap<VirtPageNum, Box<[u8]>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemorySwapFile {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            blocks: SpinMutex::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// 成功读出的次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 成功写入的次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// 置位后所有读写都以 `EIO` 失败
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check(&self, len: usize) -> KResult {
        if self.failing.load(Ordering::Relaxed) {
            return Err(errno::EIO);
        }
        if len != self.page_size {
            return Err(errno::EINVAL);
        }
        Ok(())
    }
}

impl SwapTarget for MemorySwapFile {
    fn read_page(&self, page_id: VirtPageNum, buf: &mut [u8]) -> KResult {
        self.check(buf.len())?;
        match self.blocks.lock().get(&page_id) {
            Some(block) => buf.copy_from_slice(block),
            None => buf.fill(0),
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_page(&self, page_id: VirtPageNum, buf: &[u8]) -> KResult {
        self.check(buf.len())?;
        self.blocks.lock().insert(page_id, buf.into());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use defines::error::errno;

    use super::{MemorySwapFile, SwapTarget};
    use crate::memory::VirtPageNum;

    #[test]
    fn unwritten_pages_read_as_zero() {
        let file = MemorySwapFile::new(4);
        let mut buf = [7; 4];
        file.read_page(VirtPageNum(3), &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
        assert_eq!(file.reads(), 1);
    }

    #[test]
    fn pages_are_addressed_by_identity() {
        let file = MemorySwapFile::new(4);
        file.write_page(VirtPageNum(1), &[1, 2, 3, 4]).unwrap();
        file.write_page(VirtPageNum(2), &[5, 6, 7, 8]).unwrap();
        let mut buf = [0; 4];
        file.read_page(VirtPageNum(1), &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(file.writes(), 2);
    }

    #[test]
    fn wrong_size_and_injected_failure() {
        let file = MemorySwapFile::new(4);
        assert_eq!(file.write_page(VirtPageNum(0), &[0; 3]), Err(errno::EINVAL));
        file.set_failing(true);
        let mut buf = [0; 4];
        assert_eq!(file.read_page(VirtPageNum(0), &mut buf), Err(errno::EIO));
        assert_eq!(file.reads(), 0);
        file.set_failing(false);
        assert!(file.read_page(VirtPageNum(0), &mut buf).is_ok());
    }
}
