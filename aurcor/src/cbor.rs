//! Self-describing CBOR documents used for persisted state.

use std::io;

use ciborium::value::Value;
use ciborium_ll::{Decoder, Header};
use log::trace;

use crate::result::{Error, Result};

/// RFC 8949 §3.4.6 self-described CBOR tag.
pub const SELF_DESCRIBE_TAG: u64 = 55799;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Array,
    Map,
}

/// Parses `data`, requiring the top level to be a definite-length
/// `container`. A leading self-describe tag is optional and stripped.
pub fn read_document(data: &[u8], container: Container) -> Result<Value> {
    let mut decoder = Decoder::from(data);
    let mut header = decoder.pull().map_err(|_| {
        trace!("Document is empty or truncated");
        Error::ParseError
    })?;

    if let Header::Tag(SELF_DESCRIBE_TAG) = header {
        header = decoder.pull().map_err(|_| {
            trace!("Document has no content after the self-describe tag");
            Error::ParseError
        })?;
    }

    match (container, header) {
        (Container::Array, Header::Array(Some(_))) | (Container::Map, Header::Map(Some(_))) => {}
        (_, Header::Array(None)) | (_, Header::Map(None)) => {
            trace!("Document root has indefinite length");
            return Err(Error::ParseError);
        }
        _ => {
            trace!("Document root is not a {:?}", container);
            return Err(Error::ParseError);
        }
    }

    let value: Value = ciborium::de::from_reader(data).map_err(|err| {
        trace!("Document is not well formed: {:?}", err);
        Error::ParseError
    })?;

    Ok(match value {
        Value::Tag(SELF_DESCRIBE_TAG, inner) => *inner,
        other => other,
    })
}

/// Serialises `value` behind a self-describe tag.
pub fn write_document(value: Value) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();

    ciborium::ser::into_writer(&Value::Tag(SELF_DESCRIBE_TAG, Box::new(value)), &mut data)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, format!("{:?}", err)))?;

    Ok(data)
}

/// Reads an unsigned integer; negative values are out of range and
/// anything that isn't an integer is a parse error.
pub fn read_unsigned(value: &Value) -> Result<u64> {
    match value {
        Value::Integer(integer) => u64::try_from(*integer).map_err(|_| Error::OutOfRange),
        _ => Err(Error::ParseError),
    }
}
