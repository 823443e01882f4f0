use super::{DelimitedEncoder, Decoder, Encoder, JsonPb, MarshalError, Marshaler, OneShotDecoder, Payload};
use crate::populate::{populate_query_parameters, FieldPathFilter, QueryValues};
use bytes::Bytes;
use prost_reflect::DynamicMessage;
use std::io::{Read, Write};

/// Reads `application/x-www-form-urlencoded` bodies, writes JSON.
///
/// Form keys are dotted field paths, assigned like query parameters.
#[derive(Debug, Clone, Default)]
pub struct FormUrlEncoded {
    json: JsonPb,
}

impl FormUrlEncoded {
    pub fn new(json: JsonPb) -> Self {
        Self { json }
    }
}

impl Marshaler for FormUrlEncoded {
    fn marshal(&self, payload: Payload<'_>) -> Result<Bytes, MarshalError> {
        self.json.marshal(payload)
    }

    fn unmarshal(&self, data: &[u8], message: &mut DynamicMessage) -> Result<(), MarshalError> {
        let values = QueryValues::parse(data);
        populate_query_parameters(message, &values, &FieldPathFilter::new())?;
        Ok(())
    }

    fn new_decoder<'a>(&'a self, reader: Box<dyn Read + 'a>) -> Box<dyn Decoder + 'a> {
        Box::new(OneShotDecoder::new(self, reader))
    }

    fn new_encoder<'a>(&'a self, writer: Box<dyn Write + 'a>) -> Box<dyn Encoder + 'a> {
        Box::new(DelimitedEncoder {
            marshaler: self,
            writer,
        })
    }

    fn content_type(&self) -> &'static str {
        self.json.content_type()
    }
}
