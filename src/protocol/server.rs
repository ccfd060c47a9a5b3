//! 换行分帧传输：TCP 与 stdio
//!
//! 每个连接：一个读循环 + 一个写任务（mpsc 汇集响应与通知帧）。会话 Active 之前按到达顺序内联处理，
//! 之后每帧独立 spawn，响应按 id 与请求配对而不保证顺序。连接关闭时移除该会话的全部订阅。

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::engine::McpServer;
use crate::protocol::session::Session;

/// 监听 TCP，直到 shutdown 被取消
pub async fn serve_tcp(
    server: Arc<McpServer>,
    bind_addr: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address: {}", bind_addr))?;
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("MCP server listening on tcp://{}", addr);
    serve_listener(server, listener, shutdown).await
}

/// 在已绑定的监听器上接受连接（便于测试使用临时端口）
pub async fn serve_listener(
    server: Arc<McpServer>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("TCP listener stopped");
                return Ok(());
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&server);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            if let Err(e) = serve_connection(server, reader, writer, shutdown).await {
                                tracing::error!("Connection error from {}: {:#}", peer, e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                }
            }
        }
    }
}

/// stdin 读、stdout 写；日志必须走 stderr
pub async fn serve_stdio(server: Arc<McpServer>, shutdown: CancellationToken) -> anyhow::Result<()> {
    tracing::info!("MCP server on stdio");
    serve_connection(server, tokio::io::stdin(), tokio::io::stdout(), shutdown).await
}

/// 处理单个连接直到对端关闭或 shutdown
pub async fn serve_connection<R, W>(
    server: Arc<McpServer>,
    reader: R,
    writer: W,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_frames(writer, rx));

    let session = Arc::new(Session::with_outbound(tx.clone()));
    tracing::info!(session = %session.id(), "connection opened");

    let mut lines = BufReader::new(reader).lines();
    let result = loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            line = lines.next_line() => line,
        };
        let frame = match line {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(anyhow::Error::new(e).context("read frame")),
        };
        if frame.trim().is_empty() {
            continue;
        }

        if session.is_active() {
            let server = Arc::clone(&server);
            let session = Arc::clone(&session);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(reply) = server.handle_frame(&session, &frame).await {
                    let _ = tx.send(reply);
                }
            });
        } else if let Some(reply) = server.handle_frame(&session, &frame).await {
            let _ = tx.send(reply);
        }
    };

    server.close_session(&session);
    // 写任务在所有发送端（含进行中的请求）释放后结束
    drop(tx);
    drop(session);
    match writer_task.await {
        Ok(Err(e)) => tracing::debug!(error = %e, "writer stopped"),
        Err(e) => tracing::warn!(error = %e, "writer task failed"),
        Ok(Ok(())) => {}
    }
    result
}

async fn write_frames<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
