//! 操作系统虚拟内存子系统的离散事件模拟
//!
//! 请求调页 + LRU 换出，帧的预留与加锁，以及多个模拟线程在同一页上缺页时的同步。
//! 所有模拟线程运行在同一个协作式调度器上，并发只来自显式的挂起点

#[macro_use]
extern crate log;

pub mod memory;
pub mod sim;
pub mod swap;
pub mod task;
pub mod thread;


pub use defines::error::{errno, Error, KResult};
