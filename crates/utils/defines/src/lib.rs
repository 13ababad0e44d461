//! 模拟器各 crate 共享的常量与错误码

pub mod config;
pub mod error;
