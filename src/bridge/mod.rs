//! 操作桥：把网络线程 / 工作线程发起的操作安全地送入宿主单线程回合

pub mod queue;

pub use queue::{BridgeFuture, OperationBridge};
