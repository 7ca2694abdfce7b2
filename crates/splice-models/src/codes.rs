use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Server status codes communicated to clients alongside every response.
///
/// The numeric values are part of the wire protocol and may end up persisted
/// in stored responses, so they must not be renumbered when new codes are
/// added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Success = 0,

    RequestUnreadable = 101,
    JsonEmpty = 102,
    JsonUnmarshalError = 103,
    JsonMarshalError = 104,
    ReqProcessingError = 105,
    InvalidCertError = 106,
    InvalidGceMeta = 107,

    // Default validator codes.
    RequestHostBlank = 201,
    RequestHostLength = 202,
    RequestClientIdBlank = 203,
    RequestResultReplay = 204,
    RequestGeneratorError = 205,

    // Dependency validator codes.
    DependencyValidationError = 301,

    // Datastore codes.
    DatastoreClientCreateError = 401,
    DatastoreTxCreateError = 402,
    DatastoreWriteError = 403,
    DatastoreLookupError = 404,
    DatastoreLookupNotFound = 405,
    DatastoreUpdateError = 406,
    DatastoreTxCommitError = 407,

    // Pubsub codes.
    PubsubFailure = 501,
}

impl StatusCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for StatusCode {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, i32> {
        Ok(match v {
            0 => StatusCode::Success,
            101 => StatusCode::RequestUnreadable,
            102 => StatusCode::JsonEmpty,
            103 => StatusCode::JsonUnmarshalError,
            104 => StatusCode::JsonMarshalError,
            105 => StatusCode::ReqProcessingError,
            106 => StatusCode::InvalidCertError,
            107 => StatusCode::InvalidGceMeta,
            201 => StatusCode::RequestHostBlank,
            202 => StatusCode::RequestHostLength,
            203 => StatusCode::RequestClientIdBlank,
            204 => StatusCode::RequestResultReplay,
            205 => StatusCode::RequestGeneratorError,
            301 => StatusCode::DependencyValidationError,
            401 => StatusCode::DatastoreClientCreateError,
            402 => StatusCode::DatastoreTxCreateError,
            403 => StatusCode::DatastoreWriteError,
            404 => StatusCode::DatastoreLookupError,
            405 => StatusCode::DatastoreLookupNotFound,
            406 => StatusCode::DatastoreUpdateError,
            407 => StatusCode::DatastoreTxCommitError,
            501 => StatusCode::PubsubFailure,
            other => return Err(other),
        })
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = i32::deserialize(deserializer)?;
        StatusCode::try_from(v).map_err(|v| D::Error::custom(format!("unknown status code {v}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_wire_stable() {
        // Spot checks against the published protocol table.
        assert_eq!(StatusCode::Success.as_i32(), 0);
        assert_eq!(StatusCode::InvalidCertError.as_i32(), 106);
        assert_eq!(StatusCode::InvalidGceMeta.as_i32(), 107);
        assert_eq!(StatusCode::RequestHostBlank.as_i32(), 201);
        assert_eq!(StatusCode::RequestHostLength.as_i32(), 202);
        assert_eq!(StatusCode::RequestClientIdBlank.as_i32(), 203);
        assert_eq!(StatusCode::RequestResultReplay.as_i32(), 204);
        assert_eq!(StatusCode::RequestGeneratorError.as_i32(), 205);
        assert_eq!(StatusCode::DatastoreLookupNotFound.as_i32(), 405);
        assert_eq!(StatusCode::PubsubFailure.as_i32(), 501);
    }

    #[test]
    fn roundtrip_through_integer() {
        for code in [
            StatusCode::Success,
            StatusCode::ReqProcessingError,
            StatusCode::DatastoreTxCommitError,
            StatusCode::PubsubFailure,
        ] {
            assert_eq!(StatusCode::try_from(code.as_i32()), Ok(code));
        }
        assert!(StatusCode::try_from(999).is_err());
    }
}
