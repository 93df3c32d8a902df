//! Decoding of oracle results.
//!
//! An oracle result is published as JSON whose `calldata` and `result` fields
//! are base64 encoded OBI payloads. OBI encodes integers big-endian, and
//! strings and vectors as a `u32` length followed by their elements.

use relay_core::{u64_str, Price, PriceData, Task};
use serde::Deserialize;

/// Errors decoding an oracle result message
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message is not a valid oracle result JSON object
    #[error("Invalid oracle result message: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload ended before the value was complete
    #[error("Unexpected end of OBI payload")]
    UnexpectedEof,
    /// A string is not valid utf-8
    #[error("Invalid utf-8 string in OBI payload")]
    InvalidUtf8,
    /// Bytes remained after the value was decoded
    #[error("{0} trailing bytes in OBI payload")]
    TrailingBytes(usize),
}

/// Oracle result as published on the task feed
#[derive(Debug, Clone, Deserialize)]
pub struct OracleResult {
    #[serde(default)]
    pub client_id: String,
    #[serde(default, with = "u64_str")]
    pub oracle_script_id: u64,
    #[serde(with = "base64_bytes")]
    pub calldata: Vec<u8>,
    #[serde(default, with = "u64_str")]
    pub ask_count: u64,
    #[serde(default, with = "u64_str")]
    pub min_count: u64,
    #[serde(with = "u64_str")]
    pub request_id: u64,
    #[serde(default, with = "u64_str")]
    pub ans_count: u64,
    #[serde(default, with = "u64_str")]
    pub request_time: u64,
    #[serde(with = "u64_str")]
    pub resolve_time: u64,
    #[serde(default)]
    pub resolve_status: serde_json::Value,
    #[serde(with = "base64_bytes")]
    pub result: Vec<u8>,
}

/// Request parameters of the price oracle script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calldata {
    pub symbols: Vec<String>,
    pub minimum_source_count: u8,
}

/// One symbol answer of the price oracle script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResponse {
    pub symbol: String,
    pub response_code: u8,
    pub rate: u64,
}

struct ObiDecoder<'a> {
    data: &'a [u8],
}

impl<'a> ObiDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.data.len() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn vec<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let len = self.u32()? as usize;
        // the length is untrusted, every item takes at least one byte
        let mut out = Vec::with_capacity(len.min(self.data.len()));
        for _ in 0..len {
            out.push(item(self)?);
        }
        Ok(out)
    }

    fn finish(self) -> Result<(), DecodeError> {
        match self.data.len() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

impl Calldata {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = ObiDecoder::new(data);
        let symbols = decoder.vec(ObiDecoder::string)?;
        let minimum_source_count = decoder.u8()?;
        decoder.finish()?;
        Ok(Self {
            symbols,
            minimum_source_count,
        })
    }
}

impl OracleResponse {
    /// Decode the `responses` vector of an oracle script result
    pub fn decode_all(data: &[u8]) -> Result<Vec<Self>, DecodeError> {
        let mut decoder = ObiDecoder::new(data);
        let responses = decoder.vec(|d| {
            Ok(OracleResponse {
                symbol: d.string()?,
                response_code: d.u8()?,
                rate: d.u64()?,
            })
        })?;
        decoder.finish()?;
        Ok(responses)
    }
}

/// Requested symbols and the successful `(symbol, response_code, rate)`
/// answers. Answers with a non-zero response code are left out.
pub fn decode_prices(
    calldata: &[u8],
    result: &[u8],
) -> Result<(Vec<String>, Vec<OracleResponse>), DecodeError> {
    let calldata = Calldata::decode(calldata)?;
    let responses = OracleResponse::decode_all(result)?
        .into_iter()
        .filter(|response| response.response_code == 0)
        .collect();
    Ok((calldata.symbols, responses))
}

/// Build a task from a raw feed message. The task may carry no prices, which
/// the caller treats as nothing to relay.
pub fn task_from_message(data: &[u8]) -> Result<Task, DecodeError> {
    let result: OracleResult = serde_json::from_slice(data)?;
    let (_symbols, responses) = decode_prices(&result.calldata, &result.result)?;
    let prices = responses
        .into_iter()
        .map(|response| Price::new(response.symbol, response.rate))
        .collect();
    Ok(Task::new(PriceData::new(
        prices,
        result.resolve_time,
        result.request_id,
    )))
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de::Error, Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(D::Error::custom)
    }
}


#[cfg(test)]
mod tests {
    use base64::{engine::general_purpose::STANDARD, Engine};

    use super::*;

    #[test]
    fn test_decode_calldata() {
        let calldata = Calldata::decode(&encode::calldata(&["BTC", "ETH"], 3)).unwrap();
        assert_eq!(calldata.symbols, vec!["BTC", "ETH"]);
        assert_eq!(calldata.minimum_source_count, 3);
    }

    #[test]
    fn test_non_zero_response_codes_are_excluded() {
        let (symbols, responses) = decode_prices(
            &encode::calldata(&["BTC", "ETH", "XYZ"], 3),
            &encode::result(&[
                ("BTC", 0, 65_000_000_000_000),
                ("ETH", 0, 3_500_000_000_000),
                ("XYZ", 1, 0),
            ]),
        )
        .unwrap();
        assert_eq!(symbols.len(), 3);
        assert_eq!(
            responses,
            vec![
                OracleResponse {
                    symbol: "BTC".into(),
                    response_code: 0,
                    rate: 65_000_000_000_000
                },
                OracleResponse {
                    symbol: "ETH".into(),
                    response_code: 0,
                    rate: 3_500_000_000_000
                },
            ]
        );
    }

    #[test]
    fn test_truncated_and_padded_payloads_fail() {
        let mut data = encode::result(&[("BTC", 0, 1)]);
        data.pop();
        assert!(matches!(
            OracleResponse::decode_all(&data),
            Err(DecodeError::UnexpectedEof)
        ));

        let mut data = encode::calldata(&["BTC"], 1);
        data.push(0);
        assert!(matches!(
            Calldata::decode(&data),
            Err(DecodeError::TrailingBytes(1))
        ));

        // a huge declared length must not allocate or loop forever
        assert!(Calldata::decode(&u32::MAX.to_be_bytes()).is_err());
    }

    #[test]
    fn test_task_from_message() {
        let task = task_from_message(&encode::message(
            42,
            &[("BTC", 0, 65_000), ("ETH", 2, 0)],
        ))
        .unwrap();
        assert_eq!(task.request_id(), 42);
        assert_eq!(task.price_data.resolve_time, 1_700_000_004);
        assert_eq!(task.price_data.prices, vec![Price::new("BTC".into(), 65_000)]);
        assert_eq!(task.retry_counter, 0);
        assert!(!task.has_ack_handle());
    }

    #[test]
    fn test_numeric_fields_accept_json_numbers() {
        let message = serde_json::json!({
            "calldata": STANDARD.encode(encode::calldata(&["BTC"], 1)),
            "request_id": 7,
            "resolve_time": 1_700_000_004u64,
            "result": STANDARD.encode(encode::result(&[("BTC", 0, 1)])),
        });
        let task = task_from_message(message.to_string().as_bytes()).unwrap();
        assert_eq!(task.request_id(), 7);
    }

    #[test]
    fn test_garbage_message_is_decode_error() {
        assert!(matches!(
            task_from_message(b"not json"),
            Err(DecodeError::Json(_))
        ));
    }
}
