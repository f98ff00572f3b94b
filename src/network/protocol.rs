//! RCK Wire Protocol Implementation
//!
//! A handshake followed by request/response frames carrying JSON bodies.
//!
//! ```text
//! client → server   u32 LE magic "RCK1"
//! server → client   JSON status object, NUL terminated
//! client → server   u32 LE size | i64 LE token | JSON request
//! server → client   i64 LE token | u32 LE size | JSON response
//! ```

use crate::heap::HeapStats;
use crate::service::Status;
use anyhow::{anyhow, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Handshake magic: ASCII "RCK1" read as a big-endian u32
pub const RCK_MAGIC: u32 = 0x52434B31;

/// Size limits
pub const MAX_MESSAGE_SIZE: u32 = 256 * 1024 * 1024; // 256 MB
pub const MAX_HANDSHAKE_REPLY: usize = 1024;

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake;

impl Handshake {
    /// Perform server-side handshake
    pub async fn accept<T>(stream: &mut T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let magic = stream.read_u32_le().await?;
        if magic != RCK_MAGIC {
            let reply = serde_json::json!({
                "success": false,
                "error": format!("unsupported protocol magic 0x{:x}", magic),
            });
            write_nul_terminated(stream, &reply.to_string()).await?;
            return Err(anyhow!("Unsupported protocol magic: 0x{:x}", magic));
        }

        let reply = serde_json::json!({
            "success": true,
            "server_version": crate::VERSION,
        });
        write_nul_terminated(stream, &reply.to_string()).await?;

        tracing::debug!("Handshake complete");
        Ok(Handshake)
    }

    /// Perform client-side handshake
    pub async fn connect<T>(stream: &mut T) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_u32_le(RCK_MAGIC).await?;
        stream.flush().await?;

        let mut reply = Vec::new();
        loop {
            let byte = stream.read_u8().await?;
            if byte == 0 {
                break;
            }
            reply.push(byte);
            if reply.len() > MAX_HANDSHAKE_REPLY {
                return Err(anyhow!("Handshake response too long"));
            }
        }

        let reply: serde_json::Value = serde_json::from_slice(&reply)?;
        if reply.get("success") != Some(&serde_json::Value::Bool(true)) {
            return Err(anyhow!("Handshake failed: {}", reply));
        }

        tracing::debug!("Client handshake complete");
        Ok(Handshake)
    }
}

async fn write_nul_terminated<T>(stream: &mut T, text: &str) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    stream.write_all(text.as_bytes()).await?;
    stream.write_all(b"\0").await?;
    stream.flush().await?;
    Ok(())
}

/// One client call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Reset,
    AllocateVariable { dtype: i32, shape: Vec<i64> },
    FreeVariable { id: i64 },
    SendInt { id: i64, data: Vec<i32> },
    SendFlt { id: i64, data: Vec<f32> },
    SendDbl { id: i64, data: Vec<f64> },
    RecvInt { id: i64 },
    RecvFlt { id: i64 },
    RecvDbl { id: i64 },
    Execute { id: i64 },
    Stats,
    Metrics,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Reset => "reset",
            Request::AllocateVariable { .. } => "allocate_variable",
            Request::FreeVariable { .. } => "free_variable",
            Request::SendInt { .. } => "send_int",
            Request::SendFlt { .. } => "send_flt",
            Request::SendDbl { .. } => "send_dbl",
            Request::RecvInt { .. } => "recv_int",
            Request::RecvFlt { .. } => "recv_flt",
            Request::RecvDbl { .. } => "recv_dbl",
            Request::Execute { .. } => "execute",
            Request::Stats => "stats",
            Request::Metrics => "metrics",
        }
    }
}

/// Reply to one call; only the fields the operation produces are set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<HeapStats>,
    /// Prometheus text exposition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Self::with_status(Status::Ok)
    }

    pub fn with_status(status: Status) -> Self {
        Self {
            status,
            message: None,
            id: None,
            shape: None,
            data: None,
            info: None,
            stats: None,
            metrics: None,
        }
    }

    /// Failure response carrying the error text
    pub fn error(status: Status, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::with_status(status)
        }
    }

    /// Decode `data` as a flat sequence of `T`
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<Vec<T>>> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }
}

/// Request frame with token
#[derive(Debug, Clone)]
pub struct RequestMessage {
    pub token: i64,
    pub body: Vec<u8>,
}

impl RequestMessage {
    pub fn decode(&self) -> serde_json::Result<Request> {
        serde_json::from_slice(&self.body)
    }
}

/// Response frame with token
#[derive(Debug, Clone)]
pub struct ResponseMessage {
    pub token: i64,
    pub response: Response,
}

/// Read a request frame from the stream (server side)
///
/// The body is returned undecoded so a malformed body can still be
/// answered under its token.
pub async fn read_request<T>(stream: &mut T, max_size: u32) -> Result<RequestMessage>
where
    T: AsyncRead + Unpin,
{
    let size = stream.read_u32_le().await?;

    if size == 0 {
        return Err(anyhow!("Empty request message"));
    }

    if size > max_size {
        return Err(anyhow!(
            "Request too large: {} bytes (max: {})",
            size,
            max_size
        ));
    }

    let token = stream.read_i64_le().await?;

    let mut body = vec![0u8; size as usize];
    stream.read_exact(&mut body).await?;

    Ok(RequestMessage { token, body })
}

/// Write a response frame to the stream (server side)
///
/// A response whose body exceeds `max_size` is replaced by an
/// `InvalidArgument` reply under the same token, so the caller still gets
/// an answer and the stream stays in step.
pub async fn write_response<T>(stream: &mut T, msg: &ResponseMessage, max_size: u32) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    let mut body = serde_json::to_vec(&msg.response)?;
    if body.len() > max_size as usize {
        tracing::warn!(
            token = msg.token,
            size = body.len(),
            max_size,
            "Response exceeds message limit"
        );
        let refused = Response::error(
            Status::InvalidArgument,
            format!(
                "response of {} bytes exceeds the {} byte message limit",
                body.len(),
                max_size
            ),
        );
        body = serde_json::to_vec(&refused)?;
    }
    let size = u32::try_from(body.len()).map_err(|_| anyhow!("Response too large: {} bytes", body.len()))?;

    stream.write_i64_le(msg.token).await?;
    stream.write_u32_le(size).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;

    Ok(())
}

/// Read a response frame from the stream (client side)
pub async fn read_response<T>(stream: &mut T, max_size: u32) -> Result<ResponseMessage>
where
    T: AsyncRead + Unpin,
{
    let token = stream.read_i64_le().await?;
    let size = stream.read_u32_le().await?;

    if size > max_size {
        return Err(anyhow!(
            "Response too large: {} bytes (max: {})",
            size,
            max_size
        ));
    }

    let mut body = vec![0u8; size as usize];
    stream.read_exact(&mut body).await?;

    let response: Response = serde_json::from_slice(&body)?;

    Ok(ResponseMessage { token, response })
}

/// Write a request frame to the stream (client side)
pub async fn write_request<T>(stream: &mut T, token: i64, request: &Request) -> Result<()>
where
    T: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(request)?;
    let size = u32::try_from(body.len()).map_err(|_| anyhow!("Request too large: {} bytes", body.len()))?;

    stream.write_u32_le(size).await?;
    stream.write_i64_le(token).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_request_json_shape() {
        let json = serde_json::to_value(Request::AllocateVariable {
            dtype: 6,
            shape: vec![2, 3],
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"op": "allocate_variable", "dtype": 6, "shape": [2, 3]})
        );

        let parsed: Request = serde_json::from_str(r#"{"op":"recv_dbl","id":4}"#).unwrap();
        assert_eq!(parsed, Request::RecvDbl { id: 4 });
        assert_eq!(parsed.op(), "recv_dbl");
    }

    #[test]
    fn test_response_omits_unset_fields() {
        let json = serde_json::to_value(Response::ok()).unwrap();
        assert_eq!(json, serde_json::json!({"status": 0}));

        let json = serde_json::to_value(Response::error(Status::InvalidId, "gone")).unwrap();
        assert_eq!(json, serde_json::json!({"status": 1, "message": "gone"}));
    }

    #[test]
    fn test_data_as() {
        let response = Response {
            data: Some(serde_json::json!([1.5, 2.5])),
            ..Response::ok()
        };
        assert_eq!(response.data_as::<f64>().unwrap(), Some(vec![1.5, 2.5]));
        assert!(response.data_as::<i32>().is_err());
        assert_eq!(Response::ok().data_as::<i32>().unwrap(), None);
    }

    #[tokio::test]
    async fn test_request_frame_layout() {
        let request = Request::FreeVariable { id: 3 };
        let mut buffer = Vec::new();
        write_request(&mut buffer, 42, &request).await.unwrap();

        let body = serde_json::to_vec(&request).unwrap();
        assert_eq!(&buffer[..4], &(body.len() as u32).to_le_bytes());
        assert_eq!(&buffer[4..12], &42i64.to_le_bytes());

        let mut cursor = Cursor::new(buffer);
        let decoded = read_request(&mut cursor, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(decoded.token, 42);
        assert_eq!(decoded.decode().unwrap(), request);
    }

    #[tokio::test]
    async fn test_oversized_request_rejected() {
        let mut buffer = Vec::new();
        write_request(&mut buffer, 1, &Request::SendInt { id: 0, data: vec![0; 64] })
            .await
            .unwrap();

        let mut cursor = Cursor::new(buffer);
        assert!(read_request(&mut cursor, 16).await.is_err());
    }

    #[tokio::test]
    async fn test_response_frame() {
        let msg = ResponseMessage {
            token: 7,
            response: Response {
                id: Some(0),
                ..Response::ok()
            },
        };

        let mut buffer = Vec::new();
        write_response(&mut buffer, &msg, MAX_MESSAGE_SIZE).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let decoded = read_response(&mut cursor, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(decoded.token, 7);
        assert_eq!(decoded.response, msg.response);
    }

    #[tokio::test]
    async fn test_oversized_response_replaced_by_error() {
        let msg = ResponseMessage {
            token: 11,
            response: Response {
                shape: Some(vec![64]),
                data: Some(serde_json::json!(vec![0.125f64; 64])),
                ..Response::ok()
            },
        };

        let mut buffer = Vec::new();
        write_response(&mut buffer, &msg, 200).await.unwrap();

        let mut cursor = Cursor::new(buffer);
        let decoded = read_response(&mut cursor, 200).await.unwrap();
        assert_eq!(decoded.token, 11);
        assert_eq!(decoded.response.status, Status::InvalidArgument);
        assert!(decoded.response.data.is_none());
        assert!(decoded.response.message.unwrap().contains("message limit"));
    }

    #[tokio::test]
    async fn test_handshake() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let server_task = tokio::spawn(async move { Handshake::accept(&mut server).await });
        Handshake::connect(&mut client).await.unwrap();
        assert!(server_task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_handshake_bad_magic() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let server_task = tokio::spawn(async move { Handshake::accept(&mut server).await });
        client.write_u32_le(0xdeadbeef).await.unwrap();
        assert!(server_task.await.unwrap().is_err());
    }
}
