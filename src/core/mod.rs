//! 核心层：错误类型、能力发现、应用组装、优雅关闭

pub mod builder;
pub mod discovery;
pub mod error;
pub mod shutdown;

pub use builder::{App, AppBuilder};
pub use discovery::{Candidate, DiscoveryReport};
pub use error::{panic_message, AgentError, BridgeError, RegistryError, RpcError, ToolCallError};
pub use shutdown::{
    run_with_graceful_shutdown, BridgeCleanup, CleanupOutcome, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
