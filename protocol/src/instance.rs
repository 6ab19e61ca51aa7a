//! Composite chaincode names.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// A structured reference to a chaincode instance, produced by
/// [`parse_name`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeInstance {
    pub chaincode_name: String,
    pub chaincode_version: String,
    pub chain_id: String,
}

impl Display for ChaincodeInstance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}#{}",
            self.chain_id, self.chaincode_name, self.chaincode_version
        )
    }
}

/// Parses a composite chaincode name of the form `name[:version][/channel]`.
///
/// The `/` separates the channel from the rest, the `:` separates the
/// version from the name. Absent parts stay empty.
pub fn parse_name(name: &str) -> ChaincodeInstance {
    let mut instance = ChaincodeInstance::default();

    let rest = match name.split_once('/') {
        Some((rest, chain_id)) => {
            instance.chain_id = chain_id.to_owned();
            rest
        }
        None => name,
    };
    match rest.split_once(':') {
        Some((name, version)) => {
            instance.chaincode_name = name.to_owned();
            instance.chaincode_version = version.to_owned();
        }
        None => instance.chaincode_name = rest.to_owned(),
    }

    instance
}
