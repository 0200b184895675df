//! Veldra 工具集
//!
//! 提供日志初始化等通用工具，供各个 crate 与测试程序共享。

pub mod init_log;
