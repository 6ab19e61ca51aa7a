//! The peer-side chaincode stream handler.
//!
//! One [`Handler`] exists per connected chaincode. It owns the conversation
//! on a single bidirectional message stream: the registration handshake and
//! lifecycle state machine, the demultiplexing of concurrent transactions,
//! the brokering of every ledger access the chaincode requests, and the
//! keepalive probing of an idle connection.
//!
//! Writes to the stream are serialized through a sender task that owns the
//! write side exclusively; everything else enqueues. Reads happen on the
//! read loop in [`Handler::process_stream`], which dispatches each
//! ledger-mediating message onto its own worker so that a slow simulator
//! never stalls the stream.

use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time,
};
use tracing::{debug, error, warn};

use chaincode_protocol::{
    marshal, parse_name, unmarshal, ChaincodeId, ChaincodeInstance, ChaincodeMessage,
    ChaincodeSpec, DelState, GetHistoryForKey, GetQueryResult, GetState, GetStateByRange,
    MessageType, Proposal, PutState, QueryResponse, QueryStateClose, QueryStateNext,
    SignedProposal,
};

use crate::{
    config::Config,
    error::{ExternalError, HandlerError, StreamError},
    ledger::{LedgerGetter, QueryIterator, TxSimulator},
    metrics::HandlerMetrics,
    runtime::{
        AclProvider, ChaincodeContext, ChaincodeDefinitionGetter, ExecuteContext, Executor,
        PolicyChecker, SystemCcProvider, UuidGenerator, PEER_CHAINCODE_TO_CHAINCODE,
    },
    transaction_context::TransactionContext,
};

/// Number of outgoing messages that may be queued for the sender task
/// before producers are backpressured.
const OUTGOING_QUEUE_DEPTH: usize = 64;

/// Lifecycle state of a handler.
///
/// `Created` until the chaincode registers, `Established` once registration
/// is recorded, `Ready` once the READY message has been sent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Created,
    Established,
    Ready,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            State::Created => f.write_str("created"),
            State::Established => f.write_str("established"),
            State::Ready => f.write_str("ready"),
        }
    }
}

/// The bidirectional message stream to one chaincode.
///
/// `recv` returning `Ok(None)` means the transport produced an empty
/// message; an orderly close surfaces as [`StreamError::Eof`]. The handler
/// guarantees a single sender task calls `send` at any moment.
#[async_trait]
pub trait ChaincodeStream: Send + Sync {
    async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError>;

    async fn recv(&self) -> Result<Option<ChaincodeMessage>, StreamError>;
}

/// The set of transactions currently being processed on this stream.
pub trait TransactionRegistry: Send + Sync {
    /// Records (channel, txid) as in flight. False if it already is.
    fn add(&self, channel_id: &str, tx_id: &str) -> bool;

    /// Forgets (channel, txid). Idempotent.
    fn remove(&self, channel_id: &str, tx_id: &str);
}

/// Registry of live transaction contexts, keyed by (channel, txid).
pub trait ContextRegistry: Send + Sync {
    fn create(
        &self,
        ctx: &ExecuteContext,
        channel_id: &str,
        tx_id: &str,
        signed_proposal: Option<SignedProposal>,
        proposal: Option<Proposal>,
    ) -> Result<Arc<TransactionContext>, HandlerError>;

    fn get(&self, channel_id: &str, tx_id: &str) -> Option<Arc<TransactionContext>>;

    /// Deletes the context, closing its query iterators. Idempotent.
    fn delete(&self, channel_id: &str, tx_id: &str);

    /// Closes the query iterators of every live context.
    fn close(&self);
}

/// Registry of handlers by chaincode name, with launch-waiter signalling.
pub trait Registry: Send + Sync {
    fn register(&self, handler: Arc<Handler>) -> Result<(), HandlerError>;

    fn ready(&self, name: &str);

    fn failed(&self, name: &str, err: HandlerError);

    fn deregister(&self, name: &str) -> Result<(), HandlerError>;
}

/// Pages an open query iterator into one bounded response.
pub trait QueryResponseBuilder: Send + Sync {
    fn build_query_response(
        &self,
        tx_context: &TransactionContext,
        iterator: &QueryIterator,
        query_id: &str,
    ) -> Result<Option<QueryResponse>, HandlerError>;
}

/// Everything a handler reaches outside itself.
pub struct Collaborators {
    pub acl_provider: Arc<dyn AclProvider>,
    pub active_transactions: Arc<dyn TransactionRegistry>,
    pub definition_getter: Arc<dyn ChaincodeDefinitionGetter>,
    pub executor: Arc<dyn Executor>,
    pub ledger_getter: Arc<dyn LedgerGetter>,
    pub policy_checker: Arc<dyn PolicyChecker>,
    pub query_response_builder: Arc<dyn QueryResponseBuilder>,
    pub registry: Arc<dyn Registry>,
    pub system_cc_provider: Arc<dyn SystemCcProvider>,
    pub tx_contexts: Arc<dyn ContextRegistry>,
    pub uuid_generator: Arc<dyn UuidGenerator>,
}

/// One message queued for the sender task. A synchronous send attaches an
/// ack slot; a fire-and-forget send reports failures to the error sink.
struct Outgoing {
    message: ChaincodeMessage,
    ack: Option<oneshot::Sender<Result<(), StreamError>>>,
}

/// Peer-side handler for one chaincode stream.
pub struct Handler {
    acl_provider: Arc<dyn AclProvider>,
    active_transactions: Arc<dyn TransactionRegistry>,
    definition_getter: Arc<dyn ChaincodeDefinitionGetter>,
    executor: Arc<dyn Executor>,
    ledger_getter: Arc<dyn LedgerGetter>,
    policy_checker: Arc<dyn PolicyChecker>,
    query_response_builder: Arc<dyn QueryResponseBuilder>,
    registry: Arc<dyn Registry>,
    system_cc_provider: Arc<dyn SystemCcProvider>,
    tx_contexts: Arc<dyn ContextRegistry>,
    uuid_generator: Arc<dyn UuidGenerator>,

    system_cc_version: String,
    keepalive: Duration,
    metrics: Arc<HandlerMetrics>,

    // Handed to the registry and to dispatch workers; the handler itself
    // always lives in an `Arc`.
    weak_self: Weak<Handler>,

    state: Mutex<State>,
    chaincode_id: Mutex<Option<ChaincodeId>>,
    cc_instance: Mutex<Option<ChaincodeInstance>>,

    outgoing_tx: mpsc::Sender<Outgoing>,
    outgoing_rx: Mutex<Option<mpsc::Receiver<Outgoing>>>,
    // Send failures from fire-and-forget sends land here; capacity 1 is
    // enough, the first error already tears the stream down.
    errc_tx: mpsc::Sender<HandlerError>,
    errc_rx: Mutex<Option<mpsc::Receiver<HandlerError>>>,
}

impl Handler {
    pub fn new(
        collaborators: Collaborators,
        config: &Config,
        metrics: Arc<HandlerMetrics>,
    ) -> Arc<Self> {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);
        let (errc_tx, errc_rx) = mpsc::channel(1);

        Arc::new_cyclic(|weak_self| Handler {
            acl_provider: collaborators.acl_provider,
            active_transactions: collaborators.active_transactions,
            definition_getter: collaborators.definition_getter,
            executor: collaborators.executor,
            ledger_getter: collaborators.ledger_getter,
            policy_checker: collaborators.policy_checker,
            query_response_builder: collaborators.query_response_builder,
            registry: collaborators.registry,
            system_cc_provider: collaborators.system_cc_provider,
            tx_contexts: collaborators.tx_contexts,
            uuid_generator: collaborators.uuid_generator,
            system_cc_version: config.system_cc_version.clone(),
            keepalive: config.keepalive,
            metrics,
            weak_self: Weak::clone(weak_self),
            state: Mutex::new(State::Created),
            chaincode_id: Mutex::new(None),
            cc_instance: Mutex::new(None),
            outgoing_tx,
            outgoing_rx: Mutex::new(Some(outgoing_rx)),
            errc_tx,
            errc_rx: Mutex::new(Some(errc_rx)),
        })
    }

    pub fn state(&self) -> State {
        *self.state.lock().expect("lock poisoned")
    }

    fn set_state(&self, state: State) {
        *self.state.lock().expect("lock poisoned") = state;
    }

    /// The chaincode identity presented at registration, if registered.
    pub fn chaincode_id(&self) -> Option<ChaincodeId> {
        self.chaincode_id.lock().expect("lock poisoned").clone()
    }

    /// Root chaincode name used as the ledger namespace. Empty until the
    /// chaincode has registered.
    pub fn chaincode_name(&self) -> String {
        self.cc_instance
            .lock()
            .expect("lock poisoned")
            .as_ref()
            .map(|instance| instance.chaincode_name.clone())
            .unwrap_or_default()
    }

    // ---- serialized send path -------------------------------------------

    /// Sends a message and waits for the sender task to report the result.
    async fn serial_send(&self, msg: ChaincodeMessage) -> Result<(), StreamError> {
        let (ack, ack_rx) = oneshot::channel();
        let outgoing = Outgoing {
            message: msg,
            ack: Some(ack),
        };
        if self.outgoing_tx.send(outgoing).await.is_err() {
            return Err(StreamError::Transport("chaincode stream is closed".to_owned()));
        }
        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err(StreamError::Transport("chaincode stream is closed".to_owned())),
        }
    }

    /// Queues a message without waiting; a failure surfaces on the async
    /// error sink and ends the stream.
    async fn serial_send_async(&self, msg: ChaincodeMessage) {
        let outgoing = Outgoing {
            message: msg,
            ack: None,
        };
        if self.outgoing_tx.send(outgoing).await.is_err() {
            debug!("dropping outgoing message, stream sender is gone");
        }
    }

    // ---- stream pump ----------------------------------------------------

    /// Runs the stream to completion: spawns the sender task and reads
    /// messages until the transport fails, the remote closes, or a message
    /// is illegal in the current state.
    pub async fn process_stream(
        &self,
        stream: Arc<dyn ChaincodeStream>,
    ) -> Result<(), HandlerError> {
        let outgoing_rx = self.outgoing_rx.lock().expect("lock poisoned").take();
        let errc_rx = self.errc_rx.lock().expect("lock poisoned").take();
        let (outgoing_rx, mut errc_rx) = match (outgoing_rx, errc_rx) {
            (Some(outgoing_rx), Some(errc_rx)) => (outgoing_rx, errc_rx),
            _ => {
                return Err(HandlerError::External(ExternalError::new(
                    "handler is already processing a stream",
                )))
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let sender = tokio::spawn(sender_task(
            Arc::clone(&stream),
            outgoing_rx,
            self.errc_tx.clone(),
            shutdown_rx,
            self.keepalive,
            Arc::clone(&self.metrics),
        ));

        let err = self.read_loop(stream.as_ref(), &mut errc_rx).await;

        drop(shutdown_tx);
        sender.abort();

        self.deregister();
        self.tx_contexts.close();
        if !matches!(err, HandlerError::Eof) {
            self.metrics.stream_failures.inc();
        }

        Err(err)
    }

    async fn read_loop(
        &self,
        stream: &dyn ChaincodeStream,
        errc_rx: &mut mpsc::Receiver<HandlerError>,
    ) -> HandlerError {
        loop {
            tokio::select! {
                biased;

                maybe_err = errc_rx.recv() => {
                    if let Some(err) = maybe_err {
                        return HandlerError::AsyncSendFailed(Box::new(err));
                    }
                }

                received = stream.recv() => {
                    match received {
                        Err(StreamError::Eof) => return HandlerError::Eof,
                        Err(err) => return HandlerError::ReceiveFailed(err),
                        Ok(None) => return HandlerError::NilMessage,
                        Ok(Some(msg)) => {
                            if let Err(err) = self.handle_message(msg).await {
                                return HandlerError::HandleMessageFailed(Box::new(err));
                            }
                        }
                    }
                }
            }
        }
    }

    fn deregister(&self) {
        if let Some(chaincode_id) = self.chaincode_id() {
            if let Err(err) = self.registry.deregister(&chaincode_id.name) {
                debug!(%err, "deregister failed");
            }
        }
    }

    // ---- per-message routing --------------------------------------------

    async fn handle_message(&self, msg: ChaincodeMessage) -> Result<(), HandlerError> {
        debug!(
            txid = %short_txid(&msg.txid),
            message_type = %msg.type_string(),
            state = %self.state(),
            "handling chaincode message",
        );

        if msg.message_kind() == Some(MessageType::Keepalive) {
            return Ok(());
        }

        match self.state() {
            State::Created => self.handle_message_created_state(msg).await,
            State::Ready => self.handle_message_ready_state(msg),
            state @ State::Established => Err(HandlerError::InvalidState {
                txid: msg.txid,
                state,
            }),
        }
    }

    async fn handle_message_created_state(
        &self,
        msg: ChaincodeMessage,
    ) -> Result<(), HandlerError> {
        match msg.message_kind() {
            Some(MessageType::Register) => {
                self.handle_register(msg).await;
                Ok(())
            }
            _ => Err(HandlerError::UnexpectedMessage {
                txid: msg.txid.clone(),
                message_type: msg.type_string(),
                state: State::Created,
            }),
        }
    }

    fn handle_message_ready_state(&self, msg: ChaincodeMessage) -> Result<(), HandlerError> {
        match msg.message_kind() {
            Some(MessageType::Completed) | Some(MessageType::Error) => {
                self.notify(&msg);
                Ok(())
            }
            Some(kind) if msg.is_ledger_message() => {
                let handler = match self.weak_self.upgrade() {
                    Some(handler) => handler,
                    None => return Ok(()),
                };
                // One worker per in-flight message; the read loop must
                // never block on simulator work.
                tokio::spawn(async move {
                    let delegate = Arc::clone(&handler);
                    handler
                        .handle_transaction(msg, move |msg, tx_context| async move {
                            match kind {
                                MessageType::GetState => {
                                    delegate.handle_get_state(&msg, &tx_context).await
                                }
                                MessageType::PutState => {
                                    delegate.handle_put_state(&msg, &tx_context).await
                                }
                                MessageType::DelState => {
                                    delegate.handle_del_state(&msg, &tx_context).await
                                }
                                MessageType::GetStateByRange => {
                                    delegate.handle_get_state_by_range(&msg, &tx_context).await
                                }
                                MessageType::QueryStateNext => {
                                    delegate.handle_query_state_next(&msg, &tx_context).await
                                }
                                MessageType::QueryStateClose => {
                                    delegate.handle_query_state_close(&msg, &tx_context).await
                                }
                                MessageType::GetQueryResult => {
                                    delegate.handle_get_query_result(&msg, &tx_context).await
                                }
                                MessageType::GetHistoryForKey => {
                                    delegate.handle_get_history_for_key(&msg, &tx_context).await
                                }
                                MessageType::InvokeChaincode => {
                                    delegate.handle_invoke_chaincode(&msg, &tx_context).await
                                }
                                other => Err(HandlerError::UnexpectedMessage {
                                    txid: msg.txid.clone(),
                                    message_type: other.to_string(),
                                    state: State::Ready,
                                }),
                            }
                        })
                        .await;
                });
                Ok(())
            }
            _ => Err(HandlerError::UnexpectedMessage {
                txid: msg.txid.clone(),
                message_type: msg.type_string(),
                state: State::Ready,
            }),
        }
    }

    // ---- registration ---------------------------------------------------

    /// Handles REGISTER: records the chaincode identity, registers with the
    /// handler registry, and walks the state machine to `Ready` by sending
    /// REGISTERED and READY.
    pub async fn handle_register(&self, msg: ChaincodeMessage) {
        let chaincode_id: ChaincodeId = match unmarshal(&msg.payload) {
            Ok(chaincode_id) => chaincode_id,
            Err(err) => {
                error!(%err, "error unmarshalling chaincode id");
                return;
            }
        };
        debug!(chaincode = %chaincode_id.name, "received REGISTER");
        *self.chaincode_id.lock().expect("lock poisoned") = Some(chaincode_id.clone());

        let handler = match self.weak_self.upgrade() {
            Some(handler) => handler,
            None => return,
        };
        if let Err(err) = self.registry.register(handler) {
            self.notify_registry(Err(err));
            return;
        }

        // The registered name may be composite; its root is the namespace
        // every ledger access is keyed by.
        *self.cc_instance.lock().expect("lock poisoned") = Some(parse_name(&chaincode_id.name));

        if let Err(err) = self.serial_send(ChaincodeMessage::new(MessageType::Registered)).await {
            error!(%err, "error sending REGISTERED");
            return;
        }
        self.set_state(State::Established);
        debug!(chaincode = %chaincode_id.name, "changed state to established");

        self.send_ready().await;
    }

    async fn send_ready(&self) {
        let ready = ChaincodeMessage::new(MessageType::Ready);
        let txid = ready.txid.clone();
        if let Err(source) = self.serial_send(ready).await {
            let err = HandlerError::SendFailed {
                txid,
                message_type: MessageType::Ready.to_string(),
                source,
            };
            error!(%err, "error sending READY");
            self.notify_registry(Err(err));
            return;
        }
        self.set_state(State::Ready);
        debug!("changed state to ready");
        self.notify_registry(Ok(()));
    }

    fn notify_registry(&self, outcome: Result<(), HandlerError>) {
        let name = self
            .chaincode_id()
            .map(|chaincode_id| chaincode_id.name)
            .unwrap_or_default();
        match outcome {
            Ok(()) => self.registry.ready(&name),
            Err(err) => self.registry.failed(&name, err),
        }
    }

    // ---- transaction envelope -------------------------------------------

    /// Common envelope for every ledger-mediating message: claim the txid,
    /// resolve and validate the transaction context, run the delegate, send
    /// exactly one response, release the txid. A concurrent duplicate is
    /// dropped without any of that.
    pub async fn handle_transaction<D, Fut>(&self, msg: ChaincodeMessage, delegate: D)
    where
        D: FnOnce(ChaincodeMessage, Arc<TransactionContext>) -> Fut + Send,
        Fut: Future<Output = Result<ChaincodeMessage, HandlerError>> + Send,
    {
        let channel_id = msg.channel_id.clone();
        let txid = msg.txid.clone();
        let op = msg.type_string();

        if !self.active_transactions.add(&channel_id, &txid) {
            self.metrics.duplicate_transactions_dropped.inc();
            debug!(
                txid = %short_txid(&txid),
                channel_id = %channel_id,
                "dropping duplicate transaction message",
            );
            return;
        }

        let tx_context = if msg.message_kind() == Some(MessageType::InvokeChaincode) {
            self.get_tx_context_for_invoke(&channel_id, &txid, &msg.payload)
        } else {
            self.valid_tx_context(&channel_id, &txid, HandlerError::NoLedgerContext)
        };

        let result = match tx_context {
            Ok(tx_context) => delegate(msg, tx_context).await,
            Err(err) => Err(err),
        };

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(
                    txid = %short_txid(&txid),
                    %err,
                    "transaction-local failure, returning error to chaincode",
                );
                ChaincodeMessage {
                    message_type: MessageType::Error.tag(),
                    payload: format!("{} failed: transaction ID: {}: {}", op, txid, err)
                        .into_bytes(),
                    txid: txid.clone(),
                    channel_id: channel_id.clone(),
                    proposal: None,
                }
            }
        };

        self.serial_send_async(response).await;
        self.active_transactions.remove(&channel_id, &txid);
    }

    /// A context with a live simulator, or `on_missing`.
    fn valid_tx_context(
        &self,
        channel_id: &str,
        txid: &str,
        on_missing: HandlerError,
    ) -> Result<Arc<TransactionContext>, HandlerError> {
        match self.tx_contexts.get(channel_id, txid) {
            Some(tx_context) if tx_context.tx_simulator().is_some() => Ok(tx_context),
            _ => Err(on_missing),
        }
    }

    /// Context resolution for INVOKE_CHAINCODE. On the empty channel a
    /// system-chaincode target may execute without a ledger context, so the
    /// simulator check is skipped for it; everything else validates as a
    /// normal transaction.
    fn get_tx_context_for_invoke(
        &self,
        channel_id: &str,
        txid: &str,
        payload: &[u8],
    ) -> Result<Arc<TransactionContext>, HandlerError> {
        if !channel_id.is_empty() {
            return self.valid_tx_context(channel_id, txid, HandlerError::InvalidTransaction);
        }

        let spec: ChaincodeSpec = unmarshal(payload).map_err(HandlerError::Unmarshal)?;
        let target_name = spec
            .chaincode_id
            .as_ref()
            .map(|chaincode_id| chaincode_id.name.as_str())
            .unwrap_or_default();
        let target = parse_name(target_name);

        // A user chaincode invoked without a channel has no ledger context
        // and must fail the simulator check like any other transaction.
        if !self.system_cc_provider.is_sys_cc(&target.chaincode_name) {
            return self.valid_tx_context(channel_id, txid, HandlerError::InvalidTransaction);
        }

        self.tx_contexts
            .get(channel_id, txid)
            .ok_or(HandlerError::MissingTxContext)
    }

    // ---- state sub-handlers ---------------------------------------------

    pub async fn handle_get_state(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: GetState = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;
        let namespace = self.chaincode_name();
        let simulator = tx_simulator_of(tx_context)?;

        let value = if request.collection.is_empty() {
            simulator.get_state(&namespace, &request.key)?
        } else {
            simulator.get_private_data(&namespace, &request.collection, &request.key)?
        };
        debug!(
            txid = %short_txid(&msg.txid),
            key = %request.key,
            "got state, sending response",
        );

        Ok(response_message(msg, value.unwrap_or_default()))
    }

    pub async fn handle_put_state(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: PutState = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;
        let namespace = self.chaincode_name();
        let simulator = tx_simulator_of(tx_context)?;

        if request.collection.is_empty() {
            simulator.set_state(&namespace, &request.key, request.value)?;
        } else {
            simulator.set_private_data(&namespace, &request.collection, &request.key, request.value)?;
        }

        Ok(response_message(msg, Vec::new()))
    }

    pub async fn handle_del_state(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: DelState = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;
        let namespace = self.chaincode_name();
        let simulator = tx_simulator_of(tx_context)?;

        if request.collection.is_empty() {
            simulator.delete_state(&namespace, &request.key)?;
        } else {
            simulator.delete_private_data(&namespace, &request.collection, &request.key)?;
        }

        Ok(response_message(msg, Vec::new()))
    }

    pub async fn handle_get_state_by_range(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: GetStateByRange = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;
        let query_id = self.uuid_generator.new_uuid();
        let namespace = self.chaincode_name();
        let simulator = tx_simulator_of(tx_context)?;

        let iterator = if request.collection.is_empty() {
            simulator.get_state_range_scan_iterator(&namespace, &request.start_key, &request.end_key)?
        } else {
            simulator.get_private_data_range_scan_iterator(
                &namespace,
                &request.collection,
                &request.start_key,
                &request.end_key,
            )?
        };
        tx_context.initialize_query_context(&query_id, iterator);

        self.build_query_response_message(msg, tx_context, &query_id)
    }

    pub async fn handle_query_state_next(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: QueryStateNext = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;
        self.build_query_response_message(msg, tx_context, &request.id)
    }

    pub async fn handle_query_state_close(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: QueryStateClose = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;

        // Closing a query the context no longer knows is not an error; the
        // builder may have exhausted and released it already.
        if tx_context.get_query_iterator(&request.id).is_some() {
            tx_context.cleanup_query_context(&request.id);
        }

        let response = QueryResponse {
            results: Vec::new(),
            has_more: false,
            id: request.id,
        };
        let payload = marshal(Some(&response)).map_err(HandlerError::Marshal)?;
        Ok(response_message(msg, payload))
    }

    pub async fn handle_get_query_result(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: GetQueryResult = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;
        let query_id = self.uuid_generator.new_uuid();
        let namespace = self.chaincode_name();
        let simulator = tx_simulator_of(tx_context)?;

        let iterator = if request.collection.is_empty() {
            simulator.execute_query(&namespace, &request.query)?
        } else {
            simulator.execute_query_on_private_data(&namespace, &request.collection, &request.query)?
        };
        tx_context.initialize_query_context(&query_id, iterator);

        self.build_query_response_message(msg, tx_context, &query_id)
    }

    pub async fn handle_get_history_for_key(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let request: GetHistoryForKey = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;
        let query_id = self.uuid_generator.new_uuid();
        let namespace = self.chaincode_name();

        let history_query_executor = tx_context
            .history_query_executor()
            .ok_or(HandlerError::NoLedgerContext)?;
        let iterator = history_query_executor.get_history_for_key(&namespace, &request.key)?;
        tx_context.initialize_query_context(&query_id, iterator);

        self.build_query_response_message(msg, tx_context, &query_id)
    }

    /// Pages the open query into one RESPONSE message. Any failure after
    /// the iterator exists releases the query context for `query_id`.
    fn build_query_response_message(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
        query_id: &str,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let iterator = tx_context
            .get_query_iterator(query_id)
            .ok_or(HandlerError::QueryIteratorNotFound)?;

        let response =
            match self
                .query_response_builder
                .build_query_response(tx_context, &iterator, query_id)
            {
                Ok(response) => response,
                Err(err) => {
                    tx_context.cleanup_query_context(query_id);
                    return Err(err);
                }
            };

        match marshal(response.as_ref()) {
            Ok(payload) => Ok(response_message(msg, payload)),
            Err(err) => {
                tx_context.cleanup_query_context(query_id);
                Err(HandlerError::Marshal(err))
            }
        }
    }

    // ---- cross-chaincode invocation -------------------------------------

    pub async fn handle_invoke_chaincode(
        &self,
        msg: &ChaincodeMessage,
        tx_context: &TransactionContext,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let mut spec: ChaincodeSpec = unmarshal(&msg.payload).map_err(HandlerError::Unmarshal)?;

        let chaincode_id = spec
            .chaincode_id
            .as_mut()
            .ok_or(HandlerError::MissingChaincodeId)?;
        let mut target = parse_name(&chaincode_id.name);
        chaincode_id.name = target.chaincode_name.clone();
        if target.chain_id.is_empty() {
            // Same-channel call unless the composite name says otherwise.
            target.chain_id = tx_context.chain_id().to_owned();
        }
        debug!(
            txid = %short_txid(&msg.txid),
            target = %target.chaincode_name,
            channel_id = %target.chain_id,
            "chaincode invoking chaincode",
        );

        self.check_acl(tx_context.signed_proposal(), &target)?;

        let mut execute_ctx = ExecuteContext {
            tx_simulator: tx_context.tx_simulator(),
            history_query_executor: tx_context.history_query_executor(),
        };

        // A cross-channel target simulates against its own channel's
        // ledger; the fresh simulator is released when execution finishes,
        // on every path.
        let _simulator_guard = if target.chain_id != tx_context.chain_id() {
            let ledger = self
                .ledger_getter
                .get_ledger(&target.chain_id)
                .ok_or_else(|| HandlerError::LedgerNotFound(target.chain_id.clone()))?;
            let simulator = ledger.new_tx_simulator(&msg.txid)?;
            let guard = SimulatorGuard(Arc::clone(&simulator));
            let history_query_executor = ledger.new_history_query_executor()?;
            execute_ctx.tx_simulator = Some(simulator);
            execute_ctx.history_query_executor = Some(history_query_executor);
            Some(guard)
        } else {
            None
        };

        let version = if self.system_cc_provider.is_sys_cc(&target.chaincode_name) {
            self.system_cc_version.clone()
        } else {
            if tx_context.signed_proposal().is_none() {
                return Err(HandlerError::NilSignedProposal(target.clone()));
            }
            let definition = self.definition_getter.get_chaincode_definition(
                &execute_ctx,
                &msg.txid,
                tx_context.signed_proposal(),
                tx_context.proposal(),
                &target.chain_id,
                &target.chaincode_name,
            )?;
            self.policy_checker.check_instantiation_policy(
                &target.chaincode_name,
                definition.version(),
                definition.as_ref(),
            )?;
            definition.version().to_owned()
        };

        debug!(
            txid = %short_txid(&msg.txid),
            target = %target.chaincode_name,
            %version,
            "launching chaincode for cc2cc invocation",
        );
        let cccid = ChaincodeContext {
            chain_id: target.chain_id.clone(),
            name: target.chaincode_name.clone(),
            version,
            tx_id: msg.txid.clone(),
            syscc: false,
            signed_proposal: tx_context.signed_proposal().cloned(),
            proposal: tx_context.proposal().cloned(),
        };

        let (response, _event) = self
            .executor
            .execute(&execute_ctx, &cccid, &spec)
            .await
            .map_err(HandlerError::ExecuteFailed)?;

        let payload = marshal(response.as_ref()).map_err(HandlerError::Marshal)?;
        Ok(response_message(msg, payload))
    }

    fn check_acl(
        &self,
        signed_proposal: Option<&SignedProposal>,
        target: &ChaincodeInstance,
    ) -> Result<(), HandlerError> {
        if self
            .system_cc_provider
            .is_sys_cc_and_not_invokable_cc2cc(&target.chaincode_name)
        {
            return Err(HandlerError::NotInvokableCc2cc(target.chaincode_name.clone()));
        }

        // Peer system chaincodes are exempt from channel ACLs.
        if self.system_cc_provider.is_sys_cc(&target.chaincode_name) {
            return Ok(());
        }

        self.acl_provider
            .check_acl(PEER_CHAINCODE_TO_CHAINCODE, &target.chain_id, signed_proposal)?;
        Ok(())
    }

    // ---- peer-initiated execution ---------------------------------------

    /// Delivers a TRANSACTION or INIT message to the chaincode and blocks
    /// until the matching terminal response arrives or `timeout` expires.
    /// The transaction context is deleted on every exit after creation.
    pub async fn execute(
        &self,
        ctx: &ExecuteContext,
        cccid: &ChaincodeContext,
        mut msg: ChaincodeMessage,
        timeout: Duration,
    ) -> Result<Option<ChaincodeMessage>, HandlerError> {
        debug!(txid = %short_txid(&msg.txid), "executing transaction");

        let channel_id = msg.channel_id.clone();
        let txid = msg.txid.clone();
        let tx_context = self.tx_contexts.create(
            ctx,
            &channel_id,
            &txid,
            cccid.signed_proposal.clone(),
            cccid.proposal.clone(),
        )?;

        let result = async {
            if cccid.proposal.is_some() {
                match cccid.signed_proposal.clone() {
                    Some(signed_proposal) => msg.proposal = Some(signed_proposal),
                    None => return Err(HandlerError::NilProposalContext),
                }
            }

            let mut response_rx = match tx_context.take_response_receiver() {
                Some(response_rx) => response_rx,
                None => {
                    return Err(HandlerError::External(ExternalError::new(
                        "transaction already has a driver attached",
                    )))
                }
            };

            self.serial_send_async(msg).await;

            match time::timeout(timeout, response_rx.recv()).await {
                Ok(response) => Ok(response),
                Err(_) => Err(HandlerError::ExecuteTimeout),
            }
        }
        .await;

        self.tx_contexts.delete(&channel_id, &txid);
        result
    }

    /// Routes a terminal COMPLETED/ERROR message to the driver waiting on
    /// its transaction, closing the transaction's open query iterators.
    /// Unknown transactions are ignored; a late response after a timeout
    /// lands here and is discarded.
    pub fn notify(&self, msg: &ChaincodeMessage) {
        match self.tx_contexts.get(&msg.channel_id, &msg.txid) {
            None => {
                debug!(
                    txid = %msg.txid,
                    channel_id = %msg.channel_id,
                    message_type = %msg.type_string(),
                    "no transaction context for message, ignoring",
                );
            }
            Some(tx_context) => {
                debug!(
                    txid = %short_txid(&msg.txid),
                    channel_id = %msg.channel_id,
                    "notifying transaction",
                );
                tx_context.notify(msg.clone());
                tx_context.close_query_iterators();
            }
        }
    }
}

/// Releases a freshly created simulator when the invocation is over.
struct SimulatorGuard(Arc<dyn TxSimulator>);

impl Drop for SimulatorGuard {
    fn drop(&mut self) {
        self.0.done();
    }
}

fn tx_simulator_of(
    tx_context: &TransactionContext,
) -> Result<Arc<dyn TxSimulator>, HandlerError> {
    tx_context.tx_simulator().ok_or(HandlerError::NoLedgerContext)
}

/// A RESPONSE mirroring the request's transaction and channel.
fn response_message(msg: &ChaincodeMessage, payload: Vec<u8>) -> ChaincodeMessage {
    ChaincodeMessage {
        message_type: MessageType::Response.tag(),
        payload,
        txid: msg.txid.clone(),
        channel_id: msg.channel_id.clone(),
        proposal: None,
    }
}

/// First eight characters of a transaction id, for log lines.
fn short_txid(txid: &str) -> &str {
    txid.get(..8).unwrap_or(txid)
}

/// The sole writer to the stream. Drains the outgoing queue, emits
/// keepalives on idle, and reports fire-and-forget failures to the async
/// error sink before exiting.
async fn sender_task(
    stream: Arc<dyn ChaincodeStream>,
    mut outgoing_rx: mpsc::Receiver<Outgoing>,
    errc: mpsc::Sender<HandlerError>,
    mut shutdown_rx: watch::Receiver<()>,
    keepalive: Duration,
    metrics: Arc<HandlerMetrics>,
) {
    let mut keepalive_ticker = if keepalive.is_zero() {
        None
    } else {
        Some(time::interval_at(time::Instant::now() + keepalive, keepalive))
    };

    loop {
        tokio::select! {
            maybe_outgoing = outgoing_rx.recv() => {
                let outgoing = match maybe_outgoing {
                    Some(outgoing) => outgoing,
                    None => return,
                };
                let txid = outgoing.message.txid.clone();
                let message_type = outgoing.message.type_string();
                let result = stream.send(outgoing.message).await;

                match outgoing.ack {
                    Some(ack) => {
                        // The caller owns the outcome.
                        let _ = ack.send(result);
                    }
                    None => {
                        if let Err(source) = result {
                            let err = HandlerError::SendFailed {
                                txid,
                                message_type,
                                source,
                            };
                            warn!(%err, "error sending message, ending sender");
                            if errc.try_send(err).is_err() {
                                debug!("async error sink already holds an error");
                            }
                            return;
                        }
                    }
                }
            }

            // We do not need the result, the guard ensures the ticker exists.
            _ = async { keepalive_ticker.as_mut().unwrap().tick().await },
                if keepalive_ticker.is_some() =>
            {
                let keepalive_msg = ChaincodeMessage::new(MessageType::Keepalive);
                if let Err(source) = stream.send(keepalive_msg).await {
                    let err = HandlerError::SendFailed {
                        txid: String::new(),
                        message_type: MessageType::Keepalive.to_string(),
                        source,
                    };
                    warn!(%err, "error sending keepalive, ending sender");
                    if errc.try_send(err).is_err() {
                        debug!("async error sink already holds an error");
                    }
                    return;
                }
                metrics.keepalives_sent.inc();
            }

            _ = shutdown_rx.changed() => return,
        }
    }
}
