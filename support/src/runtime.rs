//! Execution and authorization collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use chaincode_protocol::{
    ChaincodeEvent, ChaincodeSpec, Proposal, Response, SignedProposal,
};

use crate::{
    error::ExternalError,
    ledger::{HistoryQueryExecutor, TxSimulator},
};

/// ACL resource checked before a chaincode invokes another chaincode.
pub const PEER_CHAINCODE_TO_CHAINCODE: &str = "peer/ChaincodeToChaincode";

/// Ledger resources attached to one execution.
///
/// The simulator and history executor travel with the call chain so that a
/// nested invocation on a different channel can swap in fresh ones without
/// touching the originating transaction context.
#[derive(Clone, Default)]
pub struct ExecuteContext {
    pub tx_simulator: Option<Arc<dyn TxSimulator>>,
    pub history_query_executor: Option<Arc<dyn HistoryQueryExecutor>>,
}

/// Identity and authorization material for one chaincode execution.
#[derive(Clone)]
pub struct ChaincodeContext {
    pub chain_id: String,
    pub name: String,
    pub version: String,
    pub tx_id: String,
    pub syscc: bool,
    pub signed_proposal: Option<SignedProposal>,
    pub proposal: Option<Proposal>,
}

/// Runs a chaincode to completion and returns its response.
///
/// This is the seam to the launcher/execution subsystem; the handler uses
/// it for chaincode-to-chaincode invocations.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecuteContext,
        cccid: &ChaincodeContext,
        spec: &ChaincodeSpec,
    ) -> Result<(Option<Response>, Option<ChaincodeEvent>), ExternalError>;
}

/// Access-control checks against channel policy.
pub trait AclProvider: Send + Sync {
    fn check_acl(
        &self,
        resource: &str,
        channel_id: &str,
        signed_proposal: Option<&SignedProposal>,
    ) -> Result<(), ExternalError>;
}

/// Classification of peer system chaincodes.
///
/// Deliberately a collaborator: the carve-outs for system chaincodes are a
/// trust boundary and must not degrade into inline string comparisons.
pub trait SystemCcProvider: Send + Sync {
    fn is_sys_cc(&self, name: &str) -> bool;

    fn is_sys_cc_and_not_invokable_cc2cc(&self, name: &str) -> bool;
}

/// The registered definition of a chaincode on some channel.
pub trait ChaincodeDefinition: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;
}

/// Evaluates a chaincode's instantiation policy against its definition.
pub trait PolicyChecker: Send + Sync {
    fn check_instantiation_policy(
        &self,
        name: &str,
        version: &str,
        definition: &dyn ChaincodeDefinition,
    ) -> Result<(), ExternalError>;
}

/// Looks up chaincode definitions.
pub trait ChaincodeDefinitionGetter: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn get_chaincode_definition(
        &self,
        ctx: &ExecuteContext,
        txid: &str,
        signed_proposal: Option<&SignedProposal>,
        proposal: Option<&Proposal>,
        channel_id: &str,
        name: &str,
    ) -> Result<Arc<dyn ChaincodeDefinition>, ExternalError>;
}

/// Produces ids for open queries. Swappable so tests can pin the id.
pub trait UuidGenerator: Send + Sync {
    fn new_uuid(&self) -> String;
}

impl<F> UuidGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn new_uuid(&self) -> String {
        self()
    }
}

/// Production id source: random UUIDv4.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomUuids;

impl UuidGenerator for RandomUuids {
    fn new_uuid(&self) -> String {
        Uuid::new_v4().to_string()
    }
}
