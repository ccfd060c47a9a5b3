//! 协议层：JSON-RPC 信封、内容块、会话状态机、方法分发、换行分帧传输

pub mod content;
pub mod engine;
pub mod message;
pub mod server;
pub mod session;

pub use content::{ContentBlock, ResourceBlock, ResourceContent, ToolResult};
pub use engine::McpServer;
pub use message::{
    methods, ErrorObject, Notification, Request, ResourceDescriptor, Response, ServerInfo,
    ToolDescriptor, JSONRPC_VERSION,
};
pub use server::{serve_connection, serve_listener, serve_stdio, serve_tcp};
pub use session::{Session, SessionState};
