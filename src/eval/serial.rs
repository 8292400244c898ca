// eval/serial.rs - Versioned parameter blocks
//
// Every node writes `[version: u8][params]` with bincode. Readers accept
// exactly the version they know and fail closed on anything else.

use crate::error::ProcError;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::io::{Read, Write};

pub fn write_versioned<P: Serialize>(
    sink: &mut dyn Write,
    version: u8,
    params: &P,
) -> Result<(), ProcError> {
    bincode::serialize_into(&mut *sink, &version)?;
    bincode::serialize_into(&mut *sink, params)?;
    Ok(())
}

pub fn read_versioned<P: DeserializeOwned>(
    source: &mut dyn Read,
    what: &str,
    supported: u8,
) -> Result<P, ProcError> {
    let found: u8 = bincode::deserialize_from(&mut *source)?;
    if found != supported {
        warn!("rejecting {what} parameter block version {found} (expected {supported})");
        return Err(ProcError::UnsupportedVersion {
            what: what.to_string(),
            found: u32::from(found),
        });
    }
    Ok(bincode::deserialize_from(&mut *source)?)
}

/// Parse editor or description parameters. `null` means "all defaults".
pub fn params_from_json<P: DeserializeOwned + Default>(
    kind: &str,
    params: Value,
) -> Result<P, ProcError> {
    if params.is_null() {
        return Ok(P::default());
    }
    serde_json::from_value(params).map_err(|e| ProcError::InvalidParams {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}
