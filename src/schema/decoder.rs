use super::registry::SchemaRevision;
use apache_avro::{from_avro_datum, to_avro_datum, types::Value, Schema};
use carrier_error::{AppError, AppResult};

/// A compiled decoder for one schema revision.
///
/// Immutable once compiled; the revision cache hands out shared references
/// for the process lifetime.
#[derive(Debug)]
pub struct RevisionDecoder {
    pub revision_id: String,
    schema: Schema,
}

impl RevisionDecoder {
    /// Compile a registry revision into a usable decoder
    pub fn compile(revision: &SchemaRevision) -> AppResult<Self> {
        let schema = Schema::parse_str(&revision.definition)?;
        Ok(Self {
            revision_id: revision.revision_id.clone(),
            schema,
        })
    }

    /// Decode a raw payload into a JSON value.
    ///
    /// Failures are decode errors: the payload does not match this
    /// revision's wire format.
    pub fn decode(&self, payload: &[u8]) -> AppResult<serde_json::Value> {
        let mut reader = payload;
        let value = from_avro_datum(&self.schema, &mut reader, None)
            .map_err(|e| AppError::decode(format!("payload does not match schema: {e}")))?;
        apache_avro::from_value::<serde_json::Value>(&value)
            .map_err(|e| AppError::decode(format!("decoded value is not representable: {e}")))
    }

    /// Encode a JSON value, validating it against this revision
    pub fn encode(&self, payload: &serde_json::Value) -> AppResult<Vec<u8>> {
        let value = Value::try_from(payload.clone())?;
        let resolved = value.resolve(&self.schema)?;
        Ok(to_avro_datum(&self.schema, resolved)?)
    }
}
