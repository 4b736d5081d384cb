#![deny(unsafe_code)]
#![doc = "hvsock-transport: Hyper-V 套接字的地址模型与底层传输协作契约。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：分帧核心只应依赖“已建立的双工字节流”，平台相关的建连、绑定与接受逻辑在此抽象为 trait。"]
#![doc = "- **What**：定义 `Guid`/`HvsockAddr` 值类型、`ShutdownDirection`，以及 `RawTransport`/`RawAcceptor`/`RawStream` 协作接口。"]
#![doc = "- **How**：以 Tokio 的 `AsyncRead`/`AsyncWrite` 作为原始读写能力；`memory` 特性提供进程内回环实现，供测试与演示使用。"]

pub mod addr;
#[cfg(feature = "memory")]
pub mod memory;
pub mod raw;
pub mod shutdown;

pub use addr::{AddrParseError, Guid, HvsockAddr};
#[cfg(feature = "memory")]
pub use memory::{MemoryAcceptor, MemoryTransport};
pub use raw::{RawAcceptor, RawStream, RawTransport};
pub use shutdown::ShutdownDirection;
