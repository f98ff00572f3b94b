//! Client side of the RCK protocol

use super::protocol::{read_response, write_request, Handshake, Request, Response, MAX_MESSAGE_SIZE};
use crate::heap::DType;
use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// A connected client issuing one call at a time
#[derive(Debug)]
pub struct RckClient {
    stream: TcpStream,
    next_token: i64,
    max_message_size: u32,
}

impl RckClient {
    /// Connect and perform the handshake
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_limit(addr, MAX_MESSAGE_SIZE).await
    }

    /// Connect using the server's configured message limit
    pub async fn connect_with_limit(addr: SocketAddr, max_message_size: u32) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Handshake::connect(&mut stream).await?;
        Ok(Self {
            stream,
            next_token: 1,
            max_message_size,
        })
    }

    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    /// Send `request` and wait for its response
    ///
    /// A request larger than the message limit is refused locally; the
    /// server would drop the connection on it.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        let size = serde_json::to_vec(request)?.len();
        if size > self.max_message_size as usize {
            return Err(anyhow!(
                "Request too large: {} bytes (max: {})",
                size,
                self.max_message_size
            ));
        }

        let token = self.next_token;
        self.next_token += 1;

        write_request(&mut self.stream, token, request).await?;
        let reply = read_response(&mut self.stream, self.max_message_size).await?;
        if reply.token != token {
            return Err(anyhow!(
                "Response token {} does not match request token {}",
                reply.token,
                token
            ));
        }
        Ok(reply.response)
    }

    pub async fn reset(&mut self) -> Result<Response> {
        self.call(&Request::Reset).await
    }

    pub async fn allocate_variable(&mut self, dtype: DType, shape: &[i64]) -> Result<Response> {
        self.call(&Request::AllocateVariable {
            dtype: dtype.tag(),
            shape: shape.to_vec(),
        })
        .await
    }

    pub async fn free_variable(&mut self, id: i64) -> Result<Response> {
        self.call(&Request::FreeVariable { id }).await
    }

    pub async fn send_int(&mut self, id: i64, data: &[i32]) -> Result<Response> {
        self.call(&Request::SendInt { id, data: data.to_vec() }).await
    }

    pub async fn send_flt(&mut self, id: i64, data: &[f32]) -> Result<Response> {
        self.call(&Request::SendFlt { id, data: data.to_vec() }).await
    }

    pub async fn send_dbl(&mut self, id: i64, data: &[f64]) -> Result<Response> {
        self.call(&Request::SendDbl { id, data: data.to_vec() }).await
    }

    pub async fn recv_int(&mut self, id: i64) -> Result<Response> {
        self.call(&Request::RecvInt { id }).await
    }

    pub async fn recv_flt(&mut self, id: i64) -> Result<Response> {
        self.call(&Request::RecvFlt { id }).await
    }

    pub async fn recv_dbl(&mut self, id: i64) -> Result<Response> {
        self.call(&Request::RecvDbl { id }).await
    }

    pub async fn execute(&mut self, id: i64) -> Result<Response> {
        self.call(&Request::Execute { id }).await
    }

    pub async fn stats(&mut self) -> Result<Response> {
        self.call(&Request::Stats).await
    }

    /// Prometheus text export of the server's heap metrics
    pub async fn metrics(&mut self) -> Result<Response> {
        self.call(&Request::Metrics).await
    }
}
