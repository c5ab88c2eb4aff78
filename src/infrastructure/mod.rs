//! 基础设施层
//!
//! 持有唯一的稀缺本地资源（子进程 + 临时工作区），只暴露"执行代码"的能力。

pub mod sandbox;
pub mod workspace;

pub use sandbox::{CodeExecutor, ProcessSandbox};
pub use workspace::EphemeralWorkspace;
