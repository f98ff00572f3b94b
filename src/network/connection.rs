//! TCP connection management for the RCK protocol.
//!
//! Handles the lifecycle of one client connection:
//!
//! 1. **Handshake**: protocol magic check
//! 2. **Request Loop**: read a frame, dispatch to the heap, write the reply
//! 3. **Error Handling**: malformed bodies get an `InvalidArgument` reply;
//!    framing or I/O errors close the connection
//!
//! # Architecture
//!
//! ```text
//! Client → TCP → Handshake → Connection → HeapService → BufferStore
//!                               ↓              ↓
//!                          JSON Request    status code
//! ```

use super::protocol::{
    read_request, write_response, Handshake, Request, Response, ResponseMessage,
};
use crate::error::Result as HeapResult;
use crate::service::{HeapService, Status};
use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Turns decoded requests into service calls
#[derive(Debug, Clone)]
pub struct Dispatcher {
    service: Arc<HeapService>,
}

impl Dispatcher {
    pub fn new(service: Arc<HeapService>) -> Self {
        Self { service }
    }

    /// Execute one request against the heap
    pub fn dispatch(&self, request: Request) -> Response {
        let svc = &self.service;
        let start = std::time::Instant::now();
        let op = request.op();

        let response = match request {
            Request::Reset => {
                svc.reset();
                Response::ok()
            }
            Request::AllocateVariable { dtype, shape } => {
                reply(svc.allocate_variable(dtype, &shape), |id| Response {
                    id: Some(i64::from(id.0)),
                    ..Response::ok()
                })
            }
            Request::FreeVariable { id } => reply(svc.free_variable(id), |()| Response::ok()),
            Request::SendInt { id, data } => reply(svc.send_int(id, &data), |()| Response::ok()),
            Request::SendFlt { id, data } => match non_finite(data.iter().map(|v| v.is_finite())) {
                Some(refused) => refused,
                None => reply(svc.send_flt(id, &data), |()| Response::ok()),
            },
            Request::SendDbl { id, data } => match non_finite(data.iter().map(|v| v.is_finite())) {
                Some(refused) => refused,
                None => reply(svc.send_dbl(id, &data), |()| Response::ok()),
            },
            Request::RecvInt { id } => reply(svc.recv_int(id), |r| received(r.shape, &r.data)),
            Request::RecvFlt { id } => reply(svc.recv_flt(id), |r| received(r.shape, &r.data)),
            Request::RecvDbl { id } => reply(svc.recv_dbl(id), |r| received(r.shape, &r.data)),
            Request::Execute { id } => reply(svc.execute(id), |out| match encode_values(&out.values) {
                Ok(data) => Response {
                    info: Some(out.info),
                    data: Some(data),
                    ..Response::ok()
                },
                Err(refused) => refused,
            }),
            Request::Stats => Response {
                stats: Some(svc.stats()),
                ..Response::ok()
            },
            Request::Metrics => Response {
                metrics: Some(svc.export_metrics()),
                ..Response::ok()
            },
        };

        tracing::trace!(
            op,
            status = %response.status,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Request completed"
        );
        response
    }
}

fn reply<T>(result: HeapResult<T>, on_ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => on_ok(value),
        Err(e) => Response::error(Status::from(&e), e.to_string()),
    }
}

fn received<T: serde::Serialize>(shape: Vec<usize>, data: &[T]) -> Response {
    match encode_values(data) {
        Ok(data) => Response {
            shape: Some(shape),
            data: Some(data),
            ..Response::ok()
        },
        Err(refused) => refused,
    }
}

/// JSON has no NaN or infinity; serde_json writes them as `null`
fn encode_values<T: serde::Serialize>(values: &[T]) -> Result<serde_json::Value, Response> {
    let encoded = serde_json::json!(values);
    let position = encoded
        .as_array()
        .and_then(|items| items.iter().position(serde_json::Value::is_null));
    match position {
        Some(at) => Err(Response::error(
            Status::InvalidArgument,
            format!("element {} is not finite and cannot be encoded", at),
        )),
        None => Ok(encoded),
    }
}

/// Rejection for an incoming payload holding NaN or infinity
fn non_finite(mut finite: impl Iterator<Item = bool>) -> Option<Response> {
    finite.position(|ok| !ok).map(|at| {
        Response::error(
            Status::InvalidArgument,
            format!("element {} is not finite", at),
        )
    })
}

/// Connection handler for TCP streams
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    dispatcher: Dispatcher,
    max_message_size: u32,
}

impl ConnectionHandler {
    pub fn new(service: Arc<HeapService>, max_message_size: u32) -> Self {
        Self {
            dispatcher: Dispatcher::new(service),
            max_message_size,
        }
    }

    /// Handle a new TCP connection
    pub async fn handle(&self, stream: TcpStream) -> Result<()> {
        let peer_addr = stream.peer_addr()?;
        tracing::info!("New connection from {}", peer_addr);

        let result = self.serve_stream(stream).await;
        tracing::info!("Connection closed from {}", peer_addr);
        result
    }

    /// Run the handshake and request loop over any byte stream
    pub async fn serve_stream<S>(&self, mut stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Handshake::accept(&mut stream).await?;

        loop {
            let message = match read_request(&mut stream, self.max_message_size).await {
                Ok(message) => message,
                Err(e) => {
                    if is_disconnect(&e) {
                        tracing::debug!("Client disconnected");
                        return Ok(());
                    }
                    tracing::error!("Failed to read request: {}", e);
                    return Err(e);
                }
            };

            let response = match message.decode() {
                Ok(request) => self.dispatcher.dispatch(request),
                Err(e) => {
                    tracing::warn!(token = message.token, "Malformed request: {}", e);
                    Response::error(Status::InvalidArgument, format!("malformed request: {}", e))
                }
            };

            let reply = ResponseMessage {
                token: message.token,
                response,
            };
            if let Err(e) = write_response(&mut stream, &reply, self.max_message_size).await {
                if is_disconnect(&e) {
                    tracing::debug!("Client went away before the reply");
                    return Ok(());
                }
                tracing::error!("Failed to write response: {}", e);
                return Err(e);
            }
        }
    }
}

fn is_disconnect(e: &anyhow::Error) -> bool {
    use std::io::ErrorKind;

    e.downcast_ref::<std::io::Error>().is_some_and(|io| {
        matches!(
            io.kind(),
            ErrorKind::UnexpectedEof
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{read_response, write_request, MAX_MESSAGE_SIZE};
    use tokio::io::AsyncWriteExt;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(HeapService::with_defaults().unwrap()))
    }

    #[test]
    fn test_dispatch_allocate_and_recv() {
        let d = dispatcher();
        let response = d.dispatch(Request::AllocateVariable {
            dtype: 5,
            shape: vec![2],
        });
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.id, Some(0));

        let response = d.dispatch(Request::RecvFlt { id: 0 });
        assert_eq!(response.shape, Some(vec![2]));
        assert_eq!(response.data_as::<f32>().unwrap(), Some(vec![0.0, 0.0]));
    }

    #[test]
    fn test_dispatch_error_carries_message() {
        let d = dispatcher();
        let response = d.dispatch(Request::FreeVariable { id: 12 });
        assert_eq!(response.status, Status::InvalidId);
        assert!(response.message.is_some());
        assert!(response.id.is_none());
    }

    #[test]
    fn test_dispatch_stats() {
        let d = dispatcher();
        d.dispatch(Request::AllocateVariable {
            dtype: 3,
            shape: vec![4],
        });
        let stats = d.dispatch(Request::Stats).stats.unwrap();
        assert_eq!(stats.live_slots, 1);
        assert_eq!(stats.live_bytes, 16);
    }

    #[test]
    fn test_out_of_range_float_rejected() {
        let d = dispatcher();
        d.dispatch(Request::AllocateVariable {
            dtype: 5,
            shape: vec![1],
        });

        // 1e39 does not fit in f32 and decodes as infinity.
        let request: Request =
            serde_json::from_str(r#"{"op":"send_flt","id":0,"data":[1e39]}"#).unwrap();
        let response = d.dispatch(request);
        assert_eq!(response.status, Status::InvalidArgument);

        let response = d.dispatch(Request::RecvFlt { id: 0 });
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.data_as::<f32>().unwrap(), Some(vec![0.0]));
    }

    #[test]
    fn test_non_finite_double_rejected() {
        let d = dispatcher();
        d.dispatch(Request::AllocateVariable {
            dtype: 6,
            shape: vec![2],
        });
        let response = d.dispatch(Request::SendDbl {
            id: 0,
            data: vec![1.0, f64::NAN],
        });
        assert_eq!(response.status, Status::InvalidArgument);
        assert!(response.message.unwrap().contains("element 1"));
    }

    #[test]
    fn test_unencodable_slot_contents_not_reported_ok() {
        let service = Arc::new(HeapService::with_defaults().unwrap());
        let d = Dispatcher::new(service.clone());

        service.allocate_variable(6, &[3]).unwrap();
        service.send_dbl(0, &[1.0, f64::INFINITY, 2.0]).unwrap();

        let response = d.dispatch(Request::RecvDbl { id: 0 });
        assert_eq!(response.status, Status::InvalidArgument);
        assert!(response.data.is_none());
        assert!(response.shape.is_none());
    }

    #[test]
    fn test_dispatch_metrics() {
        let d = dispatcher();
        d.dispatch(Request::AllocateVariable {
            dtype: 3,
            shape: vec![2],
        });
        let response = d.dispatch(Request::Metrics);
        assert_eq!(response.status, Status::Ok);

        let text = response.metrics.unwrap();
        assert!(text.contains("rck_requests_total"));
        assert!(text.contains("rck_live_slots 1"));
    }

    #[test]
    fn test_peer_reset_counts_as_disconnect() {
        use std::io::{Error as IoError, ErrorKind};

        for kind in [
            ErrorKind::UnexpectedEof,
            ErrorKind::ConnectionReset,
            ErrorKind::ConnectionAborted,
            ErrorKind::BrokenPipe,
        ] {
            assert!(is_disconnect(&anyhow::Error::from(IoError::from(kind))));
        }
        assert!(!is_disconnect(&anyhow::Error::from(IoError::from(
            ErrorKind::InvalidData
        ))));
        assert!(!is_disconnect(&anyhow::anyhow!("Request too large")));
    }

    #[tokio::test]
    async fn test_oversized_reply_answered_with_status() {
        let service = Arc::new(HeapService::with_defaults().unwrap());
        let handler = ConnectionHandler::new(service, 256);
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { handler.serve_stream(server).await });

        Handshake::connect(&mut client).await.unwrap();

        let allocate = Request::AllocateVariable {
            dtype: 6,
            shape: vec![200],
        };
        write_request(&mut client, 1, &allocate).await.unwrap();
        let reply = read_response(&mut client, 256).await.unwrap();
        assert_eq!(reply.response.status, Status::Ok);

        write_request(&mut client, 2, &Request::RecvDbl { id: 0 }).await.unwrap();
        let reply = read_response(&mut client, 256).await.unwrap();
        assert_eq!(reply.token, 2);
        assert_eq!(reply.response.status, Status::InvalidArgument);

        // Still in step afterwards.
        write_request(&mut client, 3, &Request::Stats).await.unwrap();
        let reply = read_response(&mut client, 256).await.unwrap();
        assert_eq!(reply.token, 3);
        assert_eq!(reply.response.stats.unwrap().live_slots, 1);

        drop(client);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_malformed_body_answered() {
        let service = Arc::new(HeapService::with_defaults().unwrap());
        let handler = ConnectionHandler::new(service, MAX_MESSAGE_SIZE);
        let (mut client, server) = tokio::io::duplex(4096);
        let task = tokio::spawn(async move { handler.serve_stream(server).await });

        Handshake::connect(&mut client).await.unwrap();

        let body = br#"{"op":"launch_rockets"}"#;
        client.write_u32_le(body.len() as u32).await.unwrap();
        client.write_i64_le(9).await.unwrap();
        client.write_all(body).await.unwrap();

        let reply = read_response(&mut client, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(reply.token, 9);
        assert_eq!(reply.response.status, Status::InvalidArgument);

        // The connection stays usable after a malformed request.
        write_request(&mut client, 10, &Request::Stats).await.unwrap();
        let reply = read_response(&mut client, MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(reply.token, 10);
        assert_eq!(reply.response.status, Status::Ok);

        drop(client);
        assert!(task.await.unwrap().is_ok());
    }
}
