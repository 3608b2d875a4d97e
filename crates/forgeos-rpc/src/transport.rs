//! Duplex stream transport to a single kaspad endpoint.
//!
//! `StreamTransport` opens one bidirectional `MessageStream` per call with the
//! request already queued. The gRPC implementation runs over a lazily
//! connected `tonic` channel; tests substitute an in-process stream.

use std::any::Any;
use std::sync::Mutex;

use async_trait::async_trait;
use forgeos_protocol::{
    constants::MESSAGE_STREAM_PATH,
    wire::{KaspadRequest, KaspadResponse},
    RequestEnvelope, ResponseEnvelope,
};
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Certificate, Channel, ClientTlsConfig, Endpoint},
    Request, Status,
};

use crate::error::RpcError;

/// Inbound half of an open stream, plus whatever keeps the outbound half alive.
///
/// Dropping the stream cancels it.
pub struct MessageStream {
    inbound: BoxStream<'static, Result<ResponseEnvelope, RpcError>>,
    _outbound: Option<Box<dyn Any + Send>>,
}

impl MessageStream {
    pub fn new(inbound: BoxStream<'static, Result<ResponseEnvelope, RpcError>>) -> Self {
        Self { inbound, _outbound: None }
    }

    /// Keep `outbound` alive for as long as the stream is open, so the
    /// request side is not half-closed before the response arrives.
    pub fn with_outbound<G: Send + 'static>(mut self, outbound: G) -> Self {
        self._outbound = Some(Box::new(outbound));
        self
    }

    pub async fn next(&mut self) -> Option<Result<ResponseEnvelope, RpcError>> {
        self.inbound.next().await
    }
}

#[async_trait]
pub trait StreamTransport: Send + Sync + 'static {
    /// Endpoint address, for logs and health reports.
    fn target(&self) -> &str;

    /// Open a new stream and write `first` on it.
    async fn open(&self, first: RequestEnvelope) -> Result<MessageStream, RpcError>;

    /// Release the underlying connection. Later `open` calls fail.
    fn close(&self);
}

// ============================================================================
// gRPC transport
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    pub enabled: bool,
    /// PEM-encoded CA bundle trusted in addition to the system roots.
    pub ca_cert_pem: Option<Vec<u8>>,
}

pub struct GrpcTransport {
    target: String,
    channel: Mutex<Option<Channel>>,
}

impl GrpcTransport {
    /// Build a transport for `target` (`host:port` or a full URI).
    ///
    /// The connection is established on first use and re-established by the
    /// channel after failures. Must be called inside a tokio runtime.
    pub fn connect_lazy(target: &str, tls: &TlsOptions) -> Result<Self, RpcError> {
        let invalid = |reason: String| RpcError::InvalidEndpoint {
            target: target.to_owned(),
            reason,
        };

        let uri = if target.contains("://") {
            target.to_owned()
        } else if tls.enabled {
            format!("https://{target}")
        } else {
            format!("http://{target}")
        };

        let mut endpoint = Endpoint::from_shared(uri).map_err(|e| invalid(e.to_string()))?;
        if tls.enabled {
            let mut config = ClientTlsConfig::new().with_native_roots();
            if let Some(pem) = &tls.ca_cert_pem {
                config = config.ca_certificate(Certificate::from_pem(pem));
            }
            endpoint = endpoint.tls_config(config).map_err(|e| invalid(e.to_string()))?;
        }

        Ok(Self {
            target: target.to_owned(),
            channel: Mutex::new(Some(endpoint.connect_lazy())),
        })
    }

    fn channel(&self) -> Option<Channel> {
        self.channel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

fn status_to_error(status: Status) -> RpcError {
    if status.message().is_empty() {
        RpcError::Stream(status.code().to_string())
    } else {
        RpcError::Stream(status.message().to_owned())
    }
}

#[async_trait]
impl StreamTransport for GrpcTransport {
    fn target(&self) -> &str {
        &self.target
    }

    async fn open(&self, first: RequestEnvelope) -> Result<MessageStream, RpcError> {
        let channel = self
            .channel()
            .ok_or_else(|| RpcError::Stream("Kaspa RPC client is shut down".to_owned()))?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| RpcError::Stream(format!("Kaspa RPC endpoint not ready: {e}")))?;

        let (tx, rx) = mpsc::channel::<KaspadRequest>(1);
        tx.send(first.into())
            .await
            .map_err(|_| RpcError::Stream("request channel closed".to_owned()))?;

        let codec: ProstCodec<KaspadRequest, KaspadResponse> = ProstCodec::default();
        let response = grpc
            .streaming(
                Request::new(ReceiverStream::new(rx)),
                PathAndQuery::from_static(MESSAGE_STREAM_PATH),
                codec,
            )
            .await
            .map_err(status_to_error)?;

        let inbound = response
            .into_inner()
            .map(|item| item.map(ResponseEnvelope::from).map_err(status_to_error))
            .boxed();

        Ok(MessageStream::new(inbound).with_outbound(tx))
    }

    fn close(&self) {
        self.channel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }
}
