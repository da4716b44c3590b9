pub mod request;
pub mod response;

use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;

/// Parse a tagged wire object, reporting unknown tags and malformed fields as protocol errors.
#[cfg(feature = "tracing")]
pub(crate) fn parse_tagged<T: DeserializeOwned>(text: &str) -> Result<T> {
    use std::any::type_name;

    let jd = &mut serde_json::Deserializer::from_str(text);
    serde_path_to_error::deserialize(jd).map_err(|e| {
        tracing::error!(
            type_name = %type_name::<T>(),
            path = %e.path(),
            error = %e.inner(),
            "rejected wire message"
        );
        Error::protocol(e.inner().to_string())
    })
}

#[cfg(not(feature = "tracing"))]
pub(crate) fn parse_tagged<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::protocol(e.to_string()))
}
