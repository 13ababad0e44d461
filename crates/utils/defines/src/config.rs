/// 虚拟地址的位数
pub const VIRTUAL_ADDRESS_BITS: u32 = 16;
/// 虚拟页号的位数，每个任务的页表因此有 `1 << PAGE_ADDRESS_BITS` 项
pub const PAGE_ADDRESS_BITS: u32 = 6;

/// 一个页大小的 bit 数，即页内偏移的位数
pub const PAGE_SIZE_BITS: u32 = VIRTUAL_ADDRESS_BITS - PAGE_ADDRESS_BITS;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;

/// 物理帧的数量
pub const FRAME_COUNT: usize = 16;

/// 交换设备完成一次请求需要经过的调度轮数
pub const SWAP_LATENCY: usize = 3;

/// 回收孤儿帧的间隔（调度轮数）
pub const DAEMON_INTERVAL: usize = 64;

/// 虚拟地址位数的上限，保证地址运算不会溢出 `usize`
pub const MAX_VIRTUAL_ADDRESS_BITS: u32 = 32;

const _: () = assert!(PAGE_ADDRESS_BITS <= VIRTUAL_ADDRESS_BITS);
const _: () = assert!(VIRTUAL_ADDRESS_BITS <= MAX_VIRTUAL_ADDRESS_BITS);
const _: () = assert!(FRAME_COUNT > 0 && DAEMON_INTERVAL > 0);
