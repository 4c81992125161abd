use alloy::primitives::{keccak256, Address, B256};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use crate::config::ContractConfig;

/// A single event parameter as declared in an interface description.
/// `components` is present only for tuple-typed parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct EventParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub components: Option<Vec<EventParam>>,
}

/// One decodable event shape for a contract address. Identity for decoding is
/// (address, topic); identity for sync bookkeeping is (contract_name, name).
#[derive(Debug, Clone)]
pub struct EventShape {
    pub contract_name: String,
    pub name: String,
    pub params: Vec<EventParam>,
    pub topic: B256,
}

#[derive(Debug, Deserialize)]
struct AbiEntry {
    #[serde(rename = "type")]
    kind: String,
    name: Option<String>,
    #[serde(default)]
    inputs: Vec<EventParam>,
}

/// Interface descriptions come either as a bare entry array or wrapped in an
/// artifact object (`{"abi": [...]}`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AbiDocument {
    Wrapped { abi: Vec<AbiEntry> },
    Flat(Vec<AbiEntry>),
}

/// Render the canonical type tag for a parameter. Tuples become parenthesized
/// component lists, recursively, keeping any array suffix (`tuple[]` becomes
/// `(...)[]`).
pub fn canonical_type(param: &EventParam) -> String {
    if param.kind.starts_with("tuple") {
        if let Some(components) = &param.components {
            let inner: Vec<String> = components.iter().map(canonical_type).collect();
            return format!("({}){}", inner.join(","), &param.kind["tuple".len()..]);
        }
    }
    param.kind.clone()
}

/// Canonical event signature: `Name(type1,...,typeN)`.
pub fn event_signature(name: &str, params: &[EventParam]) -> String {
    let types: Vec<String> = params.iter().map(canonical_type).collect();
    format!("{}({})", name, types.join(","))
}

/// Extract every event declaration from an interface description document.
/// Non-event entries are skipped; a document with zero events is valid and
/// yields an empty list.
pub fn parse_abi_events(json: &str, contract_name: &str) -> eyre::Result<Vec<EventShape>> {
    let document: AbiDocument = serde_json::from_str(json)
        .map_err(|e| eyre::eyre!("Malformed interface description: {}", e))?;
    let entries = match document {
        AbiDocument::Wrapped { abi } => abi,
        AbiDocument::Flat(entries) => entries,
    };

    let mut shapes = Vec::new();
    for entry in entries {
        if entry.kind != "event" {
            continue;
        }
        let name = entry.name.unwrap_or_else(|| "Unknown".to_string());
        let topic = keccak256(event_signature(&name, &entry.inputs).as_bytes());
        shapes.push(EventShape {
            contract_name: contract_name.to_string(),
            name,
            params: entry.inputs,
            topic,
        });
    }
    Ok(shapes)
}

/// Immutable per-address lookup from topic identifier to event shape, built
/// once at startup and passed by reference into the decoder and orchestrator.
#[derive(Debug, Default)]
pub struct EventRegistry {
    by_address: HashMap<Address, HashMap<B256, EventShape>>,
}

impl EventRegistry {
    /// Build the registry from configured contracts. Multiple entries sharing
    /// one address union their event sets; a duplicate topic for the same
    /// address is last-registered-wins, so callers must not alias topics
    /// across config entries for one address.
    pub fn build(contracts: &[ContractConfig]) -> eyre::Result<Self> {
        let mut registry = Self::default();
        for contract in contracts {
            let address = Address::from_str(&contract.address).map_err(|e| {
                eyre::eyre!(
                    "Invalid address '{}' for contract '{}': {}",
                    contract.address,
                    contract.name,
                    e
                )
            })?;
            for abi_file in &contract.abi_files {
                let json = std::fs::read_to_string(abi_file).map_err(|e| {
                    eyre::eyre!(
                        "Failed to read interface description '{}' for contract '{}': {}",
                        abi_file,
                        contract.name,
                        e
                    )
                })?;
                let shapes = parse_abi_events(&json, &contract.name)?;
                registry.register(address, shapes);
            }
        }
        Ok(registry)
    }

    pub fn register(&mut self, address: Address, shapes: Vec<EventShape>) {
        let entry = self.by_address.entry(address).or_default();
        for shape in shapes {
            entry.insert(shape.topic, shape);
        }
    }

    pub fn shapes_for(&self, address: &Address) -> Option<&HashMap<B256, EventShape>> {
        self.by_address.get(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.by_address.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &HashMap<B256, EventShape>)> {
        self.by_address.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// The (contract_name, event_name) pairs hosted at an address, used for
    /// sync cursor bookkeeping.
    pub fn tracked_pairs_for(&self, address: &Address) -> BTreeSet<(String, String)> {
        self.by_address
            .get(address)
            .map(|shapes| {
                shapes
                    .values()
                    .map(|s| (s.contract_name.clone(), s.name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
