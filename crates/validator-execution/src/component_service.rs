// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! C5: the component endpoint transaction processors connect to. Each
//! connection is a single bidirectional stream (C4 framing): outbound
//! `TpProcessRequest`s are correlated to their response by `correlation_id`
//! via a pending-`oneshot` map, and inbound `TpState*`/`TpEventAdd`/
//! `TpReceiptAddData` requests are answered by looking up the transaction's
//! `SchedulerContext` in the shared registry. Modeled on the teacher's
//! pattern of a plain struct implementing a generated server trait over
//! shared `Arc` state (see `authority_service.rs`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use prost::Message as _;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use validator_types::Transaction;

use crate::error::{ExecutionError, Result};
use crate::executor::{ContextRegistry, ProcessorConnection, ProcessorRegistry};
use crate::proto::component_service_server::ComponentService;
use crate::proto::{self, ComponentMessage, MessageType, TpStatus};

/// Bound of the per-connection outbound channel. A slow or wedged processor
/// backs up against this before it can stall the executor.
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// A live connection to one registered processor instance, backed by the
/// outbound half of its bidirectional stream.
struct ProcessorHandle {
    outbound: mpsc::Sender<std::result::Result<ComponentMessage, Status>>,
    pending: DashMap<String, oneshot::Sender<ComponentMessage>>,
    next_correlation: AtomicU64,
}

impl ProcessorHandle {
    fn next_correlation_id(&self) -> String {
        format!("c{}", self.next_correlation.fetch_add(1, Ordering::Relaxed))
    }

    /// Sends `content` under `message_type`, correlated by a fresh id, and
    /// awaits the matching reply delivered through `deliver_reply`.
    async fn request(&self, message_type: MessageType, content: Vec<u8>) -> Result<ComponentMessage> {
        let correlation_id = self.next_correlation_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        let envelope = ComponentMessage { message_type: message_type as i32, correlation_id: correlation_id.clone(), content };
        if self.outbound.send(Ok(envelope)).await.is_err() {
            self.pending.remove(&correlation_id);
            return Err(ExecutionError::ConnectionClosed);
        }

        rx.await.map_err(|_| ExecutionError::ConnectionClosed)
    }

    /// Routes a reply envelope arriving on the stream to its waiting
    /// `request` call. No-op if the caller already gave up.
    fn deliver_reply(&self, message: ComponentMessage) {
        if let Some((_, tx)) = self.pending.remove(&message.correlation_id) {
            let _ = tx.send(message);
        }
    }
}

#[async_trait]
impl ProcessorConnection for ProcessorHandle {
    async fn send_process_request(&self, context_id: &str, transaction: &Transaction) -> Result<()> {
        let request = proto::TpProcessRequest { transaction: transaction.to_proto().encode_to_vec(), context_id: context_id.to_string() };
        let reply = self.request(MessageType::TpProcessRequest, request.encode_to_vec()).await?;
        let response = proto::TpProcessResponse::decode(reply.content.as_slice())?;
        match TpStatus::try_from(response.status).unwrap_or(TpStatus::InternalError) {
            TpStatus::Ok => Ok(()),
            TpStatus::InvalidTransaction => Err(ExecutionError::Authorization(response.message)),
            _ => Err(ExecutionError::Internal(response.message)),
        }
    }
}

/// The `ComponentService` implementation. Holds the registry processors
/// register into and the context map used to answer their state callbacks.
pub struct ComponentEndpoint {
    registry: Arc<ProcessorRegistry>,
    contexts: ContextRegistry,
}

impl ComponentEndpoint {
    pub fn new(registry: Arc<ProcessorRegistry>, contexts: ContextRegistry) -> Self {
        Self { registry, contexts }
    }

    /// Handles one inbound envelope from a connected processor, replying on
    /// `outbound` when the message is a request rather than a correlated
    /// response to something we sent.
    async fn handle_inbound(
        &self,
        message: ComponentMessage,
        handle: &Arc<ProcessorHandle>,
        registration: &mut Option<(String, String)>,
    ) {
        let message_type = MessageType::try_from(message.message_type).unwrap_or(MessageType::Unknown);
        match message_type {
            MessageType::TpRegisterRequest => {
                let status = match proto::TpRegisterRequest::decode(message.content.as_slice()) {
                    Ok(request) => {
                        debug!(family = %request.family, version = %request.version, "processor registered");
                        self.registry.register(request.family.clone(), request.version.clone(), handle.clone());
                        *registration = Some((request.family, request.version));
                        TpStatus::Ok
                    }
                    Err(err) => {
                        warn!("malformed register request: {err}");
                        TpStatus::InternalError
                    }
                };
                let response = proto::TpRegisterResponse { status: status as i32 };
                let reply = ComponentMessage {
                    message_type: MessageType::TpRegisterResponse as i32,
                    correlation_id: message.correlation_id,
                    content: response.encode_to_vec(),
                };
                let _ = handle.outbound.send(Ok(reply)).await;
            }
            MessageType::TpProcessResponse
            | MessageType::TpStateGetResponse
            | MessageType::TpStateSetResponse
            | MessageType::TpStateDeleteResponse
            | MessageType::TpEventAddResponse
            | MessageType::TpReceiptAddDataResponse => {
                handle.deliver_reply(message);
            }
            MessageType::TpStateGetRequest => self.reply_state_get(message, handle).await,
            MessageType::TpStateSetRequest => self.reply_state_set(message, handle).await,
            MessageType::TpStateDeleteRequest => self.reply_state_delete(message, handle).await,
            MessageType::TpEventAddRequest => self.reply_event_add(message, handle).await,
            MessageType::TpReceiptAddDataRequest => self.reply_receipt_add_data(message, handle).await,
            MessageType::Unknown => warn!("dropping envelope of unknown type"),
        }
    }

    async fn reply_state_get(&self, message: ComponentMessage, handle: &Arc<ProcessorHandle>) {
        let result = self.resolve_state_get(&message).await;
        let (status, entries) = match result {
            Ok(entries) => (TpStatus::Ok, entries),
            Err(err) => {
                warn!("get_state failed: {err}");
                (TpStatus::InternalError, Vec::new())
            }
        };
        let response = proto::TpStateGetResponse { status: status as i32, entries };
        self.send_response(handle, MessageType::TpStateGetResponse, message.correlation_id, response.encode_to_vec()).await;
    }

    async fn resolve_state_get(&self, message: &ComponentMessage) -> Result<Vec<proto::StateEntry>> {
        let request = proto::TpStateGetRequest::decode(message.content.as_slice())?;
        let context = self.context_for(&request.context_id)?;
        let mut entries = Vec::with_capacity(request.addresses.len());
        for address in request.addresses {
            if let Some(data) = context.get_state(&address).await? {
                entries.push(proto::StateEntry { address, data });
            }
        }
        Ok(entries)
    }

    async fn reply_state_set(&self, message: ComponentMessage, handle: &Arc<ProcessorHandle>) {
        let result = self.resolve_state_set(&message).await;
        let (status, addresses) = match result {
            Ok(addresses) => (TpStatus::Ok, addresses),
            Err(err) => {
                warn!("set_state failed: {err}");
                (TpStatus::InternalError, Vec::new())
            }
        };
        let response = proto::TpStateSetResponse { status: status as i32, addresses };
        self.send_response(handle, MessageType::TpStateSetResponse, message.correlation_id, response.encode_to_vec()).await;
    }

    async fn resolve_state_set(&self, message: &ComponentMessage) -> Result<Vec<String>> {
        let request = proto::TpStateSetRequest::decode(message.content.as_slice())?;
        let context = self.context_for(&request.context_id)?;
        let mut addresses = Vec::with_capacity(request.entries.len());
        for entry in request.entries {
            context.set_state(&entry.address, entry.data).await?;
            addresses.push(entry.address);
        }
        Ok(addresses)
    }

    async fn reply_state_delete(&self, message: ComponentMessage, handle: &Arc<ProcessorHandle>) {
        let result = self.resolve_state_delete(&message).await;
        let (status, addresses) = match result {
            Ok(addresses) => (TpStatus::Ok, addresses),
            Err(err) => {
                warn!("delete_state failed: {err}");
                (TpStatus::InternalError, Vec::new())
            }
        };
        let response = proto::TpStateDeleteResponse { status: status as i32, addresses };
        self.send_response(handle, MessageType::TpStateDeleteResponse, message.correlation_id, response.encode_to_vec()).await;
    }

    async fn resolve_state_delete(&self, message: &ComponentMessage) -> Result<Vec<String>> {
        let request = proto::TpStateDeleteRequest::decode(message.content.as_slice())?;
        let context = self.context_for(&request.context_id)?;
        for address in &request.addresses {
            context.delete_state(address).await?;
        }
        Ok(request.addresses)
    }

    async fn reply_event_add(&self, message: ComponentMessage, handle: &Arc<ProcessorHandle>) {
        let status = match self.resolve_event_add(&message).await {
            Ok(()) => TpStatus::Ok,
            Err(err) => {
                warn!("add_event failed: {err}");
                TpStatus::InternalError
            }
        };
        let response = proto::TpEventAddResponse { status: status as i32 };
        self.send_response(handle, MessageType::TpEventAddResponse, message.correlation_id, response.encode_to_vec()).await;
    }

    async fn resolve_event_add(&self, message: &ComponentMessage) -> Result<()> {
        let request = proto::TpEventAddRequest::decode(message.content.as_slice())?;
        let context = self.context_for(&request.context_id)?;
        let event = validator_types::Event {
            event_type: request.event_type,
            attributes: request.attributes.into_iter().collect(),
            data: request.data,
        };
        context.add_event(event).await
    }

    async fn reply_receipt_add_data(&self, message: ComponentMessage, handle: &Arc<ProcessorHandle>) {
        let status = match self.resolve_receipt_add_data(&message).await {
            Ok(()) => TpStatus::Ok,
            Err(err) => {
                warn!("add_receipt_data failed: {err}");
                TpStatus::InternalError
            }
        };
        let response = proto::TpReceiptAddDataResponse { status: status as i32 };
        self.send_response(handle, MessageType::TpReceiptAddDataResponse, message.correlation_id, response.encode_to_vec()).await;
    }

    async fn resolve_receipt_add_data(&self, message: &ComponentMessage) -> Result<()> {
        let request = proto::TpReceiptAddDataRequest::decode(message.content.as_slice())?;
        let context = self.context_for(&request.context_id)?;
        context.add_receipt_data(request.data).await
    }

    fn context_for(&self, context_id: &str) -> Result<Arc<dyn crate::scheduler::SchedulerContext>> {
        self.contexts
            .get(context_id)
            .ok_or_else(|| ExecutionError::Internal(format!("no in-flight context for {context_id}")))
    }

    async fn send_response(&self, handle: &Arc<ProcessorHandle>, message_type: MessageType, correlation_id: String, content: Vec<u8>) {
        let reply = ComponentMessage { message_type: message_type as i32, correlation_id, content };
        let _ = handle.outbound.send(Ok(reply)).await;
    }
}

#[tonic::async_trait]
impl ComponentService for ComponentEndpoint {
    type ConnectStream = ReceiverStream<std::result::Result<ComponentMessage, Status>>;

    async fn connect(&self, request: Request<Streaming<ComponentMessage>>) -> std::result::Result<Response<Self::ConnectStream>, Status> {
        let mut inbound = request.into_inner();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let handle = Arc::new(ProcessorHandle { outbound: outbound_tx, pending: DashMap::new(), next_correlation: AtomicU64::new(0) });

        let registry = self.registry.clone();
        let contexts = self.contexts.clone();
        let endpoint = ComponentEndpoint { registry, contexts };
        let connection_handle = handle.clone();

        tokio::spawn(async move {
            let mut registration: Option<(String, String)> = None;
            loop {
                match futures::StreamExt::next(&mut inbound).await {
                    Some(Ok(message)) => endpoint.handle_inbound(message, &connection_handle, &mut registration).await,
                    Some(Err(err)) => {
                        warn!("processor stream error: {err}");
                        break;
                    }
                    None => break,
                }
            }
            if let Some((family, version)) = registration {
                let conn: Arc<dyn ProcessorConnection> = connection_handle;
                endpoint.registry.unregister(&family, &version, &conn);
            }
        });

        Ok(Response::new(ReceiverStream::new(outbound_rx)))
    }
}
