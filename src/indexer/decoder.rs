use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;

use crate::abi::{canonical_type, EventParam, EventRegistry};
use crate::indexer::types::DecodedEvent;

/// Attempt to decode a raw log against the registry.
///
/// Returns `None` (not an error) when the emitting address is unregistered,
/// the log has no topics, or topic0 maps to no known event shape; logs for
/// untracked events are expected and silently skipped.
///
/// Indexed parameters are taken from topic slots starting at 1; non-indexed
/// parameters come from one bulk structural decode of the payload. The two
/// cursors advance independently, but output fields follow parameter
/// declaration order exactly.
pub fn decode_log(log: &Log, registry: &EventRegistry) -> Option<DecodedEvent> {
    let address = log.inner.address;
    let shapes = registry.shapes_for(&address)?;

    let topics = log.inner.data.topics();
    let topic0 = topics.first()?;
    let shape = shapes.get(topic0)?;

    let non_indexed: Vec<&EventParam> = shape.params.iter().filter(|p| !p.indexed).collect();
    let decoded = decode_data_section(log.inner.data.data.as_ref(), &non_indexed);

    let mut fields: Vec<(String, String)> = Vec::new();
    let mut topic_cursor = 1usize;
    let mut data_cursor = 0usize;

    for param in &shape.params {
        if param.indexed {
            let value = match topics.get(topic_cursor) {
                Some(topic) => {
                    topic_cursor += 1;
                    decode_indexed(topic, &param.kind)
                }
                None => String::new(),
            };
            fields.push((param.name.clone(), value));
        } else {
            let value = decoded.get(data_cursor).and_then(|v| v.as_ref());
            match (param.kind.as_str(), &param.components) {
                ("tuple", Some(components)) => {
                    // Expand into one field per component, dotted.
                    let parts: &[DynSolValue] = match value {
                        Some(DynSolValue::Tuple(values)) => values,
                        _ => &[],
                    };
                    for (i, component) in components.iter().enumerate() {
                        let rendered = parts.get(i).map(format_value).unwrap_or_default();
                        fields.push((format!("{}.{}", param.name, component.name), rendered));
                    }
                }
                _ => {
                    fields.push((
                        param.name.clone(),
                        value.map(format_value).unwrap_or_default(),
                    ));
                }
            }
            data_cursor += 1;
        }
    }

    Some(DecodedEvent {
        contract_name: shape.contract_name.clone(),
        event_name: shape.name.clone(),
        round: None,
        block_number: log.block_number.unwrap_or_default(),
        tx_hash: log
            .transaction_hash
            .map(|h| h.to_string())
            .unwrap_or_default(),
        tx_index: log.transaction_index.unwrap_or_default(),
        log_index: log.log_index.unwrap_or_default(),
        address: address.to_checksum(None),
        fields,
    })
}

/// Bulk-decode the payload against the ordered non-indexed type list. Any
/// structural failure yields a same-length list of placeholders so one bad
/// record never aborts a batch.
fn decode_data_section(data: &[u8], params: &[&EventParam]) -> Vec<Option<DynSolValue>> {
    if params.is_empty() {
        return Vec::new();
    }
    if data.is_empty() {
        return vec![None; params.len()];
    }

    let mut types = Vec::with_capacity(params.len());
    for param in params {
        match canonical_type(param).parse::<DynSolType>() {
            Ok(t) => types.push(t),
            Err(_) => return vec![None; params.len()],
        }
    }

    match DynSolType::Tuple(types).abi_decode_sequence(data) {
        Ok(DynSolValue::Tuple(values)) if values.len() == params.len() => {
            values.into_iter().map(Some).collect()
        }
        _ => vec![None; params.len()],
    }
}

/// Interpret one 32-byte topic slot per its declared type tag. Signed ints
/// are read as unsigned big integers; `bytes*` and unrecognized tags pass
/// through as the raw hex word.
fn decode_indexed(topic: &B256, kind: &str) -> String {
    if kind == "address" {
        Address::from_word(*topic).to_checksum(None)
    } else if kind.starts_with("uint") || kind.starts_with("int") {
        U256::from_be_bytes(topic.0).to_string()
    } else if kind == "bool" {
        (!topic.is_zero()).to_string()
    } else {
        topic.to_string()
    }
}

/// Render a decoded value as its stored scalar string form.
fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(address) => address.to_checksum(None),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::FixedBytes(word, size) => {
            format!("0x{}", hex::encode(&word.as_slice()[..*size]))
        }
        DynSolValue::Bytes(bytes) => format!("0x{}", hex::encode(bytes)),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Array(values)
        | DynSolValue::FixedArray(values)
        | DynSolValue::Tuple(values) => {
            let parts: Vec<String> = values.iter().map(format_value).collect();
            format!("[{}]", parts.join(";"))
        }
        DynSolValue::Function(f) => format!("0x{}", hex::encode(f.as_slice())),
        _ => String::new(),
    }
}
