pub mod amount;
pub mod chain;
pub mod health;
pub mod transfer;

pub use amount::{Amount, Asset};
pub use chain::{parse_evm_address, ChainFamily, ChainId};
pub use health::{HealthMetrics, HealthStatus, ProtocolHealthSnapshot};
pub use transfer::{
    FeeEstimate, PartialProgress, Proof, Protocol, ProtocolFailure, TransferFailure, TransferRequest,
    TransferRequestBuilder, TransferResult, TxRef, Validation,
};

/// Serializes a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Same as [`duration_ms`] for optional durations.
pub mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
