//! Handler configuration.

use std::time::Duration;

use datasize::DataSize;
use serde::{Deserialize, Serialize};

/// Version string reported for system chaincode targets when no explicit
/// version is configured.
const DEFAULT_SYSTEM_CHAINCODE_VERSION: &str = "latest";

/// Number of result rows packed into one query-response page.
const DEFAULT_MAX_QUERY_RESULT_LIMIT: usize = 100;

/// Configuration options for chaincode stream support.
#[derive(Clone, DataSize, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Interval between KEEPALIVE probes on an idle stream. Zero disables
    /// keepalives.
    #[data_size(skip)]
    pub keepalive: Duration,
    /// Version used when the target of a chaincode-to-chaincode invocation
    /// is a system chaincode.
    pub system_cc_version: String,
    /// Upper bound on the number of rows in a single query-response page.
    pub max_query_result_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            keepalive: Duration::ZERO,
            system_cc_version: DEFAULT_SYSTEM_CHAINCODE_VERSION.to_owned(),
            max_query_result_limit: DEFAULT_MAX_QUERY_RESULT_LIMIT,
        }
    }
}
