//! 连接级会话状态机
//!
//! Unestablished → (initialize) → Negotiated → (notifications/initialized 或首个非 initialize 请求) → Active。
//! 未协商前只接受 initialize；重复 initialize 照常应答且不重置会话。

use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::RpcError;
use crate::protocol::message::{Notification, ServerInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unestablished,
    Negotiated,
    Active,
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    client: Option<ServerInfo>,
    client_protocol: Option<String>,
}

/// 一个连接对应一个会话；出站通道用于推送通知
#[derive(Debug)]
pub struct Session {
    id: String,
    inner: Mutex<SessionInner>,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Unestablished,
                client: None,
                client_protocol: None,
            }),
            outbound: None,
        }
    }

    /// 带出站通道的会话（传输层使用）
    pub fn with_outbound(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            outbound: Some(outbound),
            ..Self::new()
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn client(&self) -> Option<ServerInfo> {
        self.lock().client.clone()
    }

    pub fn client_protocol(&self) -> Option<String> {
        self.lock().client_protocol.clone()
    }

    /// initialize 成功：首次进入 Negotiated，之后的重复协商不改变状态
    pub fn negotiate(&self, client: Option<ServerInfo>, client_protocol: Option<String>) {
        let mut inner = self.lock();
        if inner.state == SessionState::Unestablished {
            inner.state = SessionState::Negotiated;
        }
        if client.is_some() {
            inner.client = client;
        }
        if client_protocol.is_some() {
            inner.client_protocol = client_protocol;
        }
    }

    /// notifications/initialized：Negotiated → Active；未协商时忽略
    pub fn activate(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Negotiated => {
                inner.state = SessionState::Active;
                true
            }
            SessionState::Active => true,
            SessionState::Unestablished => false,
        }
    }

    /// 非 initialize 方法的准入检查；Negotiated 时顺带转为 Active
    pub fn admit(&self, method: &str) -> Result<(), RpcError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Unestablished => {
                tracing::debug!(session = %self.id, method = %method, "request before initialize rejected");
                Err(RpcError::NotInitialized)
            }
            SessionState::Negotiated => {
                inner.state = SessionState::Active;
                Ok(())
            }
            SessionState::Active => Ok(()),
        }
    }

    /// 向客户端推送通知；没有出站通道或连接已关闭时返回 Err
    pub fn notify(&self, method: &str, params: Value) -> Result<(), String> {
        let Some(outbound) = &self.outbound else {
            return Err("session has no outbound channel".to_string());
        };
        let frame = Notification::new(method, params).to_frame().map_err(|e| {
            tracing::error!(session = %self.id, method = %method, error = %e, "notification not serialized");
            format!("notification not serialized: {}", e)
        })?;
        outbound
            .send(frame)
            .map_err(|_| "connection closed".to_string())
    }

    pub fn outbound(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.outbound.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Unestablished);
        assert_eq!(session.admit("tools/list"), Err(RpcError::NotInitialized));
        assert!(!session.activate());

        session.negotiate(None, Some("2024-11-05".into()));
        assert_eq!(session.state(), SessionState::Negotiated);
        assert!(session.admit("tools/list").is_ok());
        assert!(session.is_active());

        // 重复协商不回退
        session.negotiate(None, None);
        assert!(session.is_active());
        assert_eq!(session.client_protocol().as_deref(), Some("2024-11-05"));
    }

    #[test]
    fn test_initialized_notification_activates() {
        let session = Session::new();
        session.negotiate(
            Some(ServerInfo {
                name: "client".into(),
                version: "1".into(),
            }),
            None,
        );
        assert!(session.activate());
        assert!(session.is_active());
        assert_eq!(session.client().unwrap().name, "client");
    }

    #[tokio::test]
    async fn test_notify_uses_outbound_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::with_outbound(tx);
        session
            .notify("notifications/resources/updated", serde_json::json!({"uri": "host://scene"}))
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("host://scene"));
        assert!(!frame.contains("\"id\""));

        drop(rx);
        assert!(session.notify("x", Value::Null).is_err());
        assert!(Session::new().notify("x", Value::Null).is_err());
    }
}
