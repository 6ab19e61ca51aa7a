//! Hand-rolled recording fakes for the collaborator seams.
//!
//! Every fake is cheaply cloneable and shares its recorded calls through an
//! inner `Arc`, so a test can keep one handle for assertions while the
//! handler owns another.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use chaincode_protocol::{
    ChaincodeEvent, ChaincodeMessage, ChaincodeSpec, Proposal, QueryResponse, QueryResult,
    Response, SignedProposal,
};

use crate::{
    error::{ExternalError, HandlerError, StreamError},
    handler::{
        ChaincodeStream, ContextRegistry, Handler, QueryResponseBuilder, Registry,
        TransactionRegistry,
    },
    ledger::{
        HistoryQueryExecutor, LedgerGetter, PeerLedger, QueryIterator, ResultsIterator,
        TxSimulator,
    },
    runtime::{
        AclProvider, ChaincodeContext, ChaincodeDefinition, ChaincodeDefinitionGetter,
        ExecuteContext, Executor, PolicyChecker, SystemCcProvider,
    },
    transaction_context::TransactionContext,
};

// ---- iterator ------------------------------------------------------------

#[derive(Default)]
struct FakeIteratorState {
    rows: Mutex<VecDeque<QueryResult>>,
    error_when_exhausted: Mutex<Option<ExternalError>>,
    close_count: AtomicUsize,
}

/// A scripted [`ResultsIterator`].
#[derive(Clone, Default)]
pub(crate) struct FakeIterator {
    state: Arc<FakeIteratorState>,
}

impl FakeIterator {
    pub(crate) fn with_rows(rows: Vec<QueryResult>) -> Self {
        let iterator = FakeIterator::default();
        *iterator.state.rows.lock().expect("lock poisoned") = rows.into();
        iterator
    }

    /// Makes `next` fail with `message` once the scripted rows run out.
    pub(crate) fn fail_when_exhausted(&self, message: &str) {
        *self.state.error_when_exhausted.lock().expect("lock poisoned") =
            Some(ExternalError::new(message));
    }

    pub(crate) fn close_count(&self) -> usize {
        self.state.close_count.load(Ordering::SeqCst)
    }
}

impl ResultsIterator for FakeIterator {
    fn next(&mut self) -> Result<Option<QueryResult>, ExternalError> {
        if let Some(row) = self.state.rows.lock().expect("lock poisoned").pop_front() {
            return Ok(Some(row));
        }
        match self
            .state
            .error_when_exhausted
            .lock()
            .expect("lock poisoned")
            .clone()
        {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.state.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

// ---- stream --------------------------------------------------------------

type RecvOutcome = Result<Option<ChaincodeMessage>, StreamError>;

#[derive(Default)]
struct FakeStreamState {
    sent: Mutex<Vec<ChaincodeMessage>>,
    send_results: Mutex<HashMap<usize, Result<(), StreamError>>>,
    send_default: Mutex<Option<StreamError>>,
    send_count: AtomicUsize,

    recv_queue: Mutex<VecDeque<RecvOutcome>>,
    recv_on_call: Mutex<HashMap<usize, RecvOutcome>>,
    recv_default: Mutex<Option<RecvOutcome>>,
    recv_count: AtomicUsize,
    recv_wakeup: Notify,
}

/// A scripted bidirectional stream.
///
/// `recv` serves a per-call override first, then queued outcomes, then the
/// default outcome; with none of those it stays pending until something is
/// queued.
#[derive(Clone, Default)]
pub(crate) struct FakeStream {
    state: Arc<FakeStreamState>,
}

impl FakeStream {
    pub(crate) fn sent(&self) -> Vec<ChaincodeMessage> {
        self.state.sent.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn send_count(&self) -> usize {
        self.state.send_count.load(Ordering::SeqCst)
    }

    pub(crate) fn recv_count(&self) -> usize {
        self.state.recv_count.load(Ordering::SeqCst)
    }

    /// Makes every send fail with `message`.
    pub(crate) fn fail_sends(&self, message: &str) {
        *self.state.send_default.lock().expect("lock poisoned") =
            Some(StreamError::Transport(message.to_owned()));
    }

    /// Makes the `call`-th send (zero-based) fail with `message`.
    pub(crate) fn fail_send_on_call(&self, call: usize, message: &str) {
        self.state
            .send_results
            .lock()
            .expect("lock poisoned")
            .insert(call, Err(StreamError::Transport(message.to_owned())));
    }

    /// Queues one receive outcome.
    pub(crate) fn push_recv(&self, outcome: RecvOutcome) {
        self.state
            .recv_queue
            .lock()
            .expect("lock poisoned")
            .push_back(outcome);
        self.state.recv_wakeup.notify_one();
    }

    /// Fixes the outcome served when the queue is empty.
    pub(crate) fn set_recv_default(&self, outcome: RecvOutcome) {
        *self.state.recv_default.lock().expect("lock poisoned") = Some(outcome);
    }

    /// Overrides the outcome of the `call`-th receive (zero-based).
    pub(crate) fn set_recv_on_call(&self, call: usize, outcome: RecvOutcome) {
        self.state
            .recv_on_call
            .lock()
            .expect("lock poisoned")
            .insert(call, outcome);
    }
}

#[async_trait]
impl ChaincodeStream for FakeStream {
    async fn send(&self, msg: ChaincodeMessage) -> Result<(), StreamError> {
        let call = self.state.send_count.fetch_add(1, Ordering::SeqCst);
        self.state.sent.lock().expect("lock poisoned").push(msg);

        if let Some(result) = self
            .state
            .send_results
            .lock()
            .expect("lock poisoned")
            .remove(&call)
        {
            return result;
        }
        match self.state.send_default.lock().expect("lock poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn recv(&self) -> Result<Option<ChaincodeMessage>, StreamError> {
        let call = self.state.recv_count.fetch_add(1, Ordering::SeqCst);

        if let Some(outcome) = self
            .state
            .recv_on_call
            .lock()
            .expect("lock poisoned")
            .remove(&call)
        {
            return outcome;
        }

        loop {
            if let Some(outcome) = self
                .state
                .recv_queue
                .lock()
                .expect("lock poisoned")
                .pop_front()
            {
                return outcome;
            }
            if let Some(outcome) = self.state.recv_default.lock().expect("lock poisoned").clone()
            {
                return outcome;
            }
            self.state.recv_wakeup.notified().await;
        }
    }
}

// ---- simulator and history ----------------------------------------------

/// One recorded simulator call, arguments included.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum SimulatorCall {
    GetState {
        namespace: String,
        key: String,
    },
    SetState {
        namespace: String,
        key: String,
        value: Vec<u8>,
    },
    DeleteState {
        namespace: String,
        key: String,
    },
    GetPrivateData {
        namespace: String,
        collection: String,
        key: String,
    },
    SetPrivateData {
        namespace: String,
        collection: String,
        key: String,
        value: Vec<u8>,
    },
    DeletePrivateData {
        namespace: String,
        collection: String,
        key: String,
    },
    GetStateRangeScanIterator {
        namespace: String,
        start_key: String,
        end_key: String,
    },
    GetPrivateDataRangeScanIterator {
        namespace: String,
        collection: String,
        start_key: String,
        end_key: String,
    },
    ExecuteQuery {
        namespace: String,
        query: String,
    },
    ExecuteQueryOnPrivateData {
        namespace: String,
        collection: String,
        query: String,
    },
}

#[derive(Default)]
struct FakeTxSimulatorState {
    calls: Mutex<Vec<SimulatorCall>>,
    value: Mutex<Option<Vec<u8>>>,
    iterator: Mutex<Option<FakeIterator>>,
    error: Mutex<Option<ExternalError>>,
    done_count: AtomicUsize,
}

/// A recording [`TxSimulator`]. A configured error applies to every call.
#[derive(Clone, Default)]
pub(crate) struct FakeTxSimulator {
    state: Arc<FakeTxSimulatorState>,
}

impl FakeTxSimulator {
    pub(crate) fn calls(&self) -> Vec<SimulatorCall> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_value(&self, value: Vec<u8>) {
        *self.state.value.lock().expect("lock poisoned") = Some(value);
    }

    pub(crate) fn set_iterator(&self, iterator: FakeIterator) {
        *self.state.iterator.lock().expect("lock poisoned") = Some(iterator);
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.state.error.lock().expect("lock poisoned") = Some(ExternalError::new(message));
    }

    pub(crate) fn done_count(&self) -> usize {
        self.state.done_count.load(Ordering::SeqCst)
    }

    fn record(&self, call: SimulatorCall) -> Result<(), ExternalError> {
        self.state.calls.lock().expect("lock poisoned").push(call);
        match self.state.error.lock().expect("lock poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn iterator(&self) -> Box<dyn ResultsIterator> {
        let iterator = self
            .state
            .iterator
            .lock()
            .expect("lock poisoned")
            .clone()
            .unwrap_or_default();
        Box::new(iterator)
    }
}

impl TxSimulator for FakeTxSimulator {
    fn get_state(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>, ExternalError> {
        self.record(SimulatorCall::GetState {
            namespace: namespace.to_owned(),
            key: key.to_owned(),
        })?;
        Ok(self.state.value.lock().expect("lock poisoned").clone())
    }

    fn set_state(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<(), ExternalError> {
        self.record(SimulatorCall::SetState {
            namespace: namespace.to_owned(),
            key: key.to_owned(),
            value,
        })
    }

    fn delete_state(&self, namespace: &str, key: &str) -> Result<(), ExternalError> {
        self.record(SimulatorCall::DeleteState {
            namespace: namespace.to_owned(),
            key: key.to_owned(),
        })
    }

    fn get_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<Vec<u8>>, ExternalError> {
        self.record(SimulatorCall::GetPrivateData {
            namespace: namespace.to_owned(),
            collection: collection.to_owned(),
            key: key.to_owned(),
        })?;
        Ok(self.state.value.lock().expect("lock poisoned").clone())
    }

    fn set_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), ExternalError> {
        self.record(SimulatorCall::SetPrivateData {
            namespace: namespace.to_owned(),
            collection: collection.to_owned(),
            key: key.to_owned(),
            value,
        })
    }

    fn delete_private_data(
        &self,
        namespace: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), ExternalError> {
        self.record(SimulatorCall::DeletePrivateData {
            namespace: namespace.to_owned(),
            collection: collection.to_owned(),
            key: key.to_owned(),
        })
    }

    fn get_state_range_scan_iterator(
        &self,
        namespace: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError> {
        self.record(SimulatorCall::GetStateRangeScanIterator {
            namespace: namespace.to_owned(),
            start_key: start_key.to_owned(),
            end_key: end_key.to_owned(),
        })?;
        Ok(self.iterator())
    }

    fn get_private_data_range_scan_iterator(
        &self,
        namespace: &str,
        collection: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError> {
        self.record(SimulatorCall::GetPrivateDataRangeScanIterator {
            namespace: namespace.to_owned(),
            collection: collection.to_owned(),
            start_key: start_key.to_owned(),
            end_key: end_key.to_owned(),
        })?;
        Ok(self.iterator())
    }

    fn execute_query(
        &self,
        namespace: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError> {
        self.record(SimulatorCall::ExecuteQuery {
            namespace: namespace.to_owned(),
            query: query.to_owned(),
        })?;
        Ok(self.iterator())
    }

    fn execute_query_on_private_data(
        &self,
        namespace: &str,
        collection: &str,
        query: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError> {
        self.record(SimulatorCall::ExecuteQueryOnPrivateData {
            namespace: namespace.to_owned(),
            collection: collection.to_owned(),
            query: query.to_owned(),
        })?;
        Ok(self.iterator())
    }

    fn done(&self) {
        self.state.done_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeHistoryQueryExecutorState {
    calls: Mutex<Vec<(String, String)>>,
    iterator: Mutex<Option<FakeIterator>>,
    error: Mutex<Option<ExternalError>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeHistoryQueryExecutor {
    state: Arc<FakeHistoryQueryExecutorState>,
}

impl FakeHistoryQueryExecutor {
    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_iterator(&self, iterator: FakeIterator) {
        *self.state.iterator.lock().expect("lock poisoned") = Some(iterator);
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.state.error.lock().expect("lock poisoned") = Some(ExternalError::new(message));
    }
}

impl HistoryQueryExecutor for FakeHistoryQueryExecutor {
    fn get_history_for_key(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Box<dyn ResultsIterator>, ExternalError> {
        self.state
            .calls
            .lock()
            .expect("lock poisoned")
            .push((namespace.to_owned(), key.to_owned()));
        if let Some(err) = self.state.error.lock().expect("lock poisoned").clone() {
            return Err(err);
        }
        let iterator = self
            .state
            .iterator
            .lock()
            .expect("lock poisoned")
            .clone()
            .unwrap_or_default();
        Ok(Box::new(iterator))
    }
}

// ---- registries ----------------------------------------------------------

#[derive(Default)]
struct FakeTransactionRegistryState {
    add_calls: Mutex<Vec<(String, String)>>,
    remove_calls: Mutex<Vec<(String, String)>>,
    add_result: Mutex<Option<bool>>,
}

/// Recording [`TransactionRegistry`]; `add` returns true unless overridden.
#[derive(Clone, Default)]
pub(crate) struct FakeTransactionRegistry {
    state: Arc<FakeTransactionRegistryState>,
}

impl FakeTransactionRegistry {
    pub(crate) fn add_calls(&self) -> Vec<(String, String)> {
        self.state.add_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn remove_calls(&self) -> Vec<(String, String)> {
        self.state.remove_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_add_result(&self, added: bool) {
        *self.state.add_result.lock().expect("lock poisoned") = Some(added);
    }
}

impl TransactionRegistry for FakeTransactionRegistry {
    fn add(&self, channel_id: &str, tx_id: &str) -> bool {
        self.state
            .add_calls
            .lock()
            .expect("lock poisoned")
            .push((channel_id.to_owned(), tx_id.to_owned()));
        self.state
            .add_result
            .lock()
            .expect("lock poisoned")
            .unwrap_or(true)
    }

    fn remove(&self, channel_id: &str, tx_id: &str) {
        self.state
            .remove_calls
            .lock()
            .expect("lock poisoned")
            .push((channel_id.to_owned(), tx_id.to_owned()));
    }
}

/// Arguments observed by [`FakeContextRegistry::create`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CreateContextCall {
    pub(crate) channel_id: String,
    pub(crate) tx_id: String,
    pub(crate) signed_proposal: Option<SignedProposal>,
    pub(crate) proposal: Option<Proposal>,
}

#[derive(Default)]
struct FakeContextRegistryState {
    get_calls: Mutex<Vec<(String, String)>>,
    create_calls: Mutex<Vec<CreateContextCall>>,
    delete_calls: Mutex<Vec<(String, String)>>,
    close_count: AtomicUsize,
    context: Mutex<Option<Arc<TransactionContext>>>,
    create_error: Mutex<Option<ExternalError>>,
}

/// Recording [`ContextRegistry`] serving one preconfigured context.
#[derive(Clone, Default)]
pub(crate) struct FakeContextRegistry {
    state: Arc<FakeContextRegistryState>,
}

impl FakeContextRegistry {
    pub(crate) fn set_context(&self, tx_context: Option<Arc<TransactionContext>>) {
        *self.state.context.lock().expect("lock poisoned") = tx_context;
    }

    pub(crate) fn fail_create(&self, message: &str) {
        *self.state.create_error.lock().expect("lock poisoned") =
            Some(ExternalError::new(message));
    }

    pub(crate) fn get_calls(&self) -> Vec<(String, String)> {
        self.state.get_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn create_calls(&self) -> Vec<CreateContextCall> {
        self.state.create_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn delete_calls(&self) -> Vec<(String, String)> {
        self.state.delete_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.state.close_count.load(Ordering::SeqCst)
    }
}

impl ContextRegistry for FakeContextRegistry {
    fn create(
        &self,
        _ctx: &ExecuteContext,
        channel_id: &str,
        tx_id: &str,
        signed_proposal: Option<SignedProposal>,
        proposal: Option<Proposal>,
    ) -> Result<Arc<TransactionContext>, HandlerError> {
        self.state
            .create_calls
            .lock()
            .expect("lock poisoned")
            .push(CreateContextCall {
                channel_id: channel_id.to_owned(),
                tx_id: tx_id.to_owned(),
                signed_proposal,
                proposal,
            });
        if let Some(err) = self.state.create_error.lock().expect("lock poisoned").clone() {
            return Err(HandlerError::External(err));
        }
        match self.state.context.lock().expect("lock poisoned").clone() {
            Some(tx_context) => Ok(tx_context),
            None => Err(HandlerError::External(ExternalError::new(
                "fake registry has no context configured",
            ))),
        }
    }

    fn get(&self, channel_id: &str, tx_id: &str) -> Option<Arc<TransactionContext>> {
        self.state
            .get_calls
            .lock()
            .expect("lock poisoned")
            .push((channel_id.to_owned(), tx_id.to_owned()));
        self.state.context.lock().expect("lock poisoned").clone()
    }

    fn delete(&self, channel_id: &str, tx_id: &str) {
        self.state
            .delete_calls
            .lock()
            .expect("lock poisoned")
            .push((channel_id.to_owned(), tx_id.to_owned()));
    }

    fn close(&self) {
        self.state.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeRegistryState {
    register_calls: Mutex<Vec<Option<chaincode_protocol::ChaincodeId>>>,
    ready_calls: Mutex<Vec<String>>,
    failed_calls: Mutex<Vec<(String, String)>>,
    deregister_calls: Mutex<Vec<String>>,
    register_error: Mutex<Option<ExternalError>>,
}

/// Recording handler [`Registry`].
#[derive(Clone, Default)]
pub(crate) struct FakeRegistry {
    state: Arc<FakeRegistryState>,
}

impl FakeRegistry {
    pub(crate) fn register_calls(&self) -> Vec<Option<chaincode_protocol::ChaincodeId>> {
        self.state.register_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn ready_calls(&self) -> Vec<String> {
        self.state.ready_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn failed_calls(&self) -> Vec<(String, String)> {
        self.state.failed_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn deregister_calls(&self) -> Vec<String> {
        self.state.deregister_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn fail_register(&self, message: &str) {
        *self.state.register_error.lock().expect("lock poisoned") =
            Some(ExternalError::new(message));
    }
}

impl Registry for FakeRegistry {
    fn register(&self, handler: Arc<Handler>) -> Result<(), HandlerError> {
        self.state
            .register_calls
            .lock()
            .expect("lock poisoned")
            .push(handler.chaincode_id());
        match self.state.register_error.lock().expect("lock poisoned").clone() {
            Some(err) => Err(HandlerError::External(err)),
            None => Ok(()),
        }
    }

    fn ready(&self, name: &str) {
        self.state
            .ready_calls
            .lock()
            .expect("lock poisoned")
            .push(name.to_owned());
    }

    fn failed(&self, name: &str, err: HandlerError) {
        self.state
            .failed_calls
            .lock()
            .expect("lock poisoned")
            .push((name.to_owned(), err.to_string()));
    }

    fn deregister(&self, name: &str) -> Result<(), HandlerError> {
        self.state
            .deregister_calls
            .lock()
            .expect("lock poisoned")
            .push(name.to_owned());
        Ok(())
    }
}

// ---- authorization and execution ----------------------------------------

#[derive(Default)]
struct FakeAclProviderState {
    calls: Mutex<Vec<(String, String, Option<SignedProposal>)>>,
    error: Mutex<Option<ExternalError>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeAclProvider {
    state: Arc<FakeAclProviderState>,
}

impl FakeAclProvider {
    pub(crate) fn calls(&self) -> Vec<(String, String, Option<SignedProposal>)> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.state.error.lock().expect("lock poisoned") = Some(ExternalError::new(message));
    }
}

impl AclProvider for FakeAclProvider {
    fn check_acl(
        &self,
        resource: &str,
        channel_id: &str,
        signed_proposal: Option<&SignedProposal>,
    ) -> Result<(), ExternalError> {
        self.state.calls.lock().expect("lock poisoned").push((
            resource.to_owned(),
            channel_id.to_owned(),
            signed_proposal.cloned(),
        ));
        match self.state.error.lock().expect("lock poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
struct FakeSystemCcProviderState {
    is_sys_cc_calls: Mutex<Vec<String>>,
    not_invokable_calls: Mutex<Vec<String>>,
    is_sys_cc: Mutex<bool>,
    not_invokable: Mutex<bool>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeSystemCcProvider {
    state: Arc<FakeSystemCcProviderState>,
}

impl FakeSystemCcProvider {
    pub(crate) fn is_sys_cc_calls(&self) -> Vec<String> {
        self.state.is_sys_cc_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn not_invokable_calls(&self) -> Vec<String> {
        self.state.not_invokable_calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_is_sys_cc(&self, is_sys_cc: bool) {
        *self.state.is_sys_cc.lock().expect("lock poisoned") = is_sys_cc;
    }

    pub(crate) fn set_not_invokable(&self, not_invokable: bool) {
        *self.state.not_invokable.lock().expect("lock poisoned") = not_invokable;
    }
}

impl SystemCcProvider for FakeSystemCcProvider {
    fn is_sys_cc(&self, name: &str) -> bool {
        self.state
            .is_sys_cc_calls
            .lock()
            .expect("lock poisoned")
            .push(name.to_owned());
        *self.state.is_sys_cc.lock().expect("lock poisoned")
    }

    fn is_sys_cc_and_not_invokable_cc2cc(&self, name: &str) -> bool {
        self.state
            .not_invokable_calls
            .lock()
            .expect("lock poisoned")
            .push(name.to_owned());
        *self.state.not_invokable.lock().expect("lock poisoned")
    }
}

/// A fixed [`ChaincodeDefinition`].
#[derive(Clone, Debug)]
pub(crate) struct FakeDefinition {
    pub(crate) name: String,
    pub(crate) version: String,
}

impl ChaincodeDefinition for FakeDefinition {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct DefinitionGetterCall {
    pub(crate) txid: String,
    pub(crate) signed_proposal: Option<SignedProposal>,
    pub(crate) proposal: Option<Proposal>,
    pub(crate) channel_id: String,
    pub(crate) name: String,
}

#[derive(Default)]
struct FakeDefinitionGetterState {
    calls: Mutex<Vec<DefinitionGetterCall>>,
    definition: Mutex<Option<Arc<FakeDefinition>>>,
    error: Mutex<Option<ExternalError>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeDefinitionGetter {
    state: Arc<FakeDefinitionGetterState>,
}

impl FakeDefinitionGetter {
    pub(crate) fn calls(&self) -> Vec<DefinitionGetterCall> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_definition(&self, definition: FakeDefinition) {
        *self.state.definition.lock().expect("lock poisoned") = Some(Arc::new(definition));
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.state.error.lock().expect("lock poisoned") = Some(ExternalError::new(message));
    }
}

impl ChaincodeDefinitionGetter for FakeDefinitionGetter {
    fn get_chaincode_definition(
        &self,
        _ctx: &ExecuteContext,
        txid: &str,
        signed_proposal: Option<&SignedProposal>,
        proposal: Option<&Proposal>,
        channel_id: &str,
        name: &str,
    ) -> Result<Arc<dyn ChaincodeDefinition>, ExternalError> {
        self.state
            .calls
            .lock()
            .expect("lock poisoned")
            .push(DefinitionGetterCall {
                txid: txid.to_owned(),
                signed_proposal: signed_proposal.cloned(),
                proposal: proposal.cloned(),
                channel_id: channel_id.to_owned(),
                name: name.to_owned(),
            });
        if let Some(err) = self.state.error.lock().expect("lock poisoned").clone() {
            return Err(err);
        }
        match self.state.definition.lock().expect("lock poisoned").clone() {
            Some(definition) => Ok(definition),
            None => Err(ExternalError::new("fake definition getter has no definition")),
        }
    }
}

#[derive(Default)]
struct FakePolicyCheckerState {
    calls: Mutex<Vec<(String, String, String)>>,
    error: Mutex<Option<ExternalError>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakePolicyChecker {
    state: Arc<FakePolicyCheckerState>,
}

impl FakePolicyChecker {
    /// Recorded (name, version, definition version) triples.
    pub(crate) fn calls(&self) -> Vec<(String, String, String)> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.state.error.lock().expect("lock poisoned") = Some(ExternalError::new(message));
    }
}

impl PolicyChecker for FakePolicyChecker {
    fn check_instantiation_policy(
        &self,
        name: &str,
        version: &str,
        definition: &dyn ChaincodeDefinition,
    ) -> Result<(), ExternalError> {
        self.state.calls.lock().expect("lock poisoned").push((
            name.to_owned(),
            version.to_owned(),
            definition.version().to_owned(),
        ));
        match self.state.error.lock().expect("lock poisoned").clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Arguments observed by [`FakeExecutor::execute`].
#[derive(Clone)]
pub(crate) struct ExecutorCall {
    pub(crate) ctx: ExecuteContext,
    pub(crate) cccid_chain_id: String,
    pub(crate) cccid_name: String,
    pub(crate) cccid_version: String,
    pub(crate) spec: ChaincodeSpec,
}

type ExecuteHook = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct FakeExecutorState {
    calls: Mutex<Vec<ExecutorCall>>,
    response: Mutex<Option<Response>>,
    error: Mutex<Option<ExternalError>>,
    on_execute: Mutex<Option<ExecuteHook>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeExecutor {
    state: Arc<FakeExecutorState>,
}

impl FakeExecutor {
    pub(crate) fn calls(&self) -> Vec<ExecutorCall> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_response(&self, response: Option<Response>) {
        *self.state.response.lock().expect("lock poisoned") = response;
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.state.error.lock().expect("lock poisoned") = Some(ExternalError::new(message));
    }

    /// Runs `hook` inside every `execute` call, before it returns.
    pub(crate) fn on_execute(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.state.on_execute.lock().expect("lock poisoned") = Some(Box::new(hook));
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(
        &self,
        ctx: &ExecuteContext,
        cccid: &ChaincodeContext,
        spec: &ChaincodeSpec,
    ) -> Result<(Option<Response>, Option<ChaincodeEvent>), ExternalError> {
        self.state.calls.lock().expect("lock poisoned").push(ExecutorCall {
            ctx: ctx.clone(),
            cccid_chain_id: cccid.chain_id.clone(),
            cccid_name: cccid.name.clone(),
            cccid_version: cccid.version.clone(),
            spec: spec.clone(),
        });
        if let Some(hook) = self.state.on_execute.lock().expect("lock poisoned").as_ref() {
            hook();
        }
        if let Some(err) = self.state.error.lock().expect("lock poisoned").clone() {
            return Err(err);
        }
        Ok((self.state.response.lock().expect("lock poisoned").clone(), None))
    }
}

// ---- ledger lookup -------------------------------------------------------

#[derive(Default)]
struct FakePeerLedgerState {
    new_tx_simulator_calls: Mutex<Vec<String>>,
    new_history_query_executor_count: AtomicUsize,
    simulator: Mutex<Option<Arc<FakeTxSimulator>>>,
    history_query_executor: Mutex<Option<Arc<FakeHistoryQueryExecutor>>>,
    simulator_error: Mutex<Option<ExternalError>>,
    history_error: Mutex<Option<ExternalError>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakePeerLedger {
    state: Arc<FakePeerLedgerState>,
}

impl FakePeerLedger {
    pub(crate) fn new_tx_simulator_calls(&self) -> Vec<String> {
        self.state
            .new_tx_simulator_calls
            .lock()
            .expect("lock poisoned")
            .clone()
    }

    pub(crate) fn new_history_query_executor_count(&self) -> usize {
        self.state.new_history_query_executor_count.load(Ordering::SeqCst)
    }

    pub(crate) fn set_simulator(&self, simulator: Arc<FakeTxSimulator>) {
        *self.state.simulator.lock().expect("lock poisoned") = Some(simulator);
    }

    pub(crate) fn set_history_query_executor(&self, executor: Arc<FakeHistoryQueryExecutor>) {
        *self.state.history_query_executor.lock().expect("lock poisoned") = Some(executor);
    }

    pub(crate) fn fail_new_tx_simulator(&self, message: &str) {
        *self.state.simulator_error.lock().expect("lock poisoned") =
            Some(ExternalError::new(message));
    }

    pub(crate) fn fail_new_history_query_executor(&self, message: &str) {
        *self.state.history_error.lock().expect("lock poisoned") =
            Some(ExternalError::new(message));
    }
}

impl PeerLedger for FakePeerLedger {
    fn new_tx_simulator(&self, txid: &str) -> Result<Arc<dyn TxSimulator>, ExternalError> {
        self.state
            .new_tx_simulator_calls
            .lock()
            .expect("lock poisoned")
            .push(txid.to_owned());
        if let Some(err) = self.state.simulator_error.lock().expect("lock poisoned").clone() {
            return Err(err);
        }
        let simulator = self
            .state
            .simulator
            .lock()
            .expect("lock poisoned")
            .clone()
            .unwrap_or_default();
        Ok(simulator)
    }

    fn new_history_query_executor(
        &self,
    ) -> Result<Arc<dyn HistoryQueryExecutor>, ExternalError> {
        self.state
            .new_history_query_executor_count
            .fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.history_error.lock().expect("lock poisoned").clone() {
            return Err(err);
        }
        let executor = self
            .state
            .history_query_executor
            .lock()
            .expect("lock poisoned")
            .clone()
            .unwrap_or_default();
        Ok(executor)
    }
}

#[derive(Default)]
struct FakeLedgerGetterState {
    calls: Mutex<Vec<String>>,
    ledger: Mutex<Option<Arc<FakePeerLedger>>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeLedgerGetter {
    state: Arc<FakeLedgerGetterState>,
}

impl FakeLedgerGetter {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_ledger(&self, ledger: Option<Arc<FakePeerLedger>>) {
        *self.state.ledger.lock().expect("lock poisoned") = ledger;
    }
}

impl LedgerGetter for FakeLedgerGetter {
    fn get_ledger(&self, channel_id: &str) -> Option<Arc<dyn PeerLedger>> {
        self.state
            .calls
            .lock()
            .expect("lock poisoned")
            .push(channel_id.to_owned());
        self.state
            .ledger
            .lock()
            .expect("lock poisoned")
            .clone()
            .map(|ledger| ledger as Arc<dyn PeerLedger>)
    }
}

// ---- query response builder ---------------------------------------------

#[derive(Default)]
struct FakeQueryResponseBuilderState {
    calls: Mutex<Vec<String>>,
    response: Mutex<Option<QueryResponse>>,
    error: Mutex<Option<ExternalError>>,
}

/// Recording [`QueryResponseBuilder`] with a fixed outcome.
#[derive(Clone, Default)]
pub(crate) struct FakeQueryResponseBuilder {
    state: Arc<FakeQueryResponseBuilderState>,
}

impl FakeQueryResponseBuilder {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.calls.lock().expect("lock poisoned").clone()
    }

    pub(crate) fn set_response(&self, response: Option<QueryResponse>) {
        *self.state.response.lock().expect("lock poisoned") = response;
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.state.error.lock().expect("lock poisoned") = Some(ExternalError::new(message));
    }
}

impl QueryResponseBuilder for FakeQueryResponseBuilder {
    fn build_query_response(
        &self,
        _tx_context: &TransactionContext,
        _iterator: &QueryIterator,
        query_id: &str,
    ) -> Result<Option<QueryResponse>, HandlerError> {
        self.state
            .calls
            .lock()
            .expect("lock poisoned")
            .push(query_id.to_owned());
        if let Some(err) = self.state.error.lock().expect("lock poisoned").clone() {
            return Err(HandlerError::External(err));
        }
        Ok(self.state.response.lock().expect("lock poisoned").clone())
    }
}
