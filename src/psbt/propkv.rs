//! `BITGO` proprietary key-values.
//!
//! MuSig2 session data is stored under the `BITGO` identifier so documents stay readable by
//! other wallets of the same family.

use std::collections::BTreeMap;

pub use crate::bitcoin::psbt::raw::ProprietaryKey;

pub const BITGO: &[u8] = b"BITGO";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProprietaryKeySubtype {
    Musig2ParticipantPubKeys = 0x01,
    Musig2PubNonce = 0x02,
    Musig2PartialSig = 0x03,
}

impl ProprietaryKeySubtype {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ProprietaryKeySubtype::Musig2ParticipantPubKeys),
            0x02 => Some(ProprietaryKeySubtype::Musig2PubNonce),
            0x03 => Some(ProprietaryKeySubtype::Musig2PartialSig),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitGoKeyValue {
    pub subtype: ProprietaryKeySubtype,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl BitGoKeyValue {
    pub fn new(subtype: ProprietaryKeySubtype, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            subtype,
            key,
            value,
        }
    }

    /// `None` for keys outside the `BITGO` namespace or with a subtype this crate doesn't use.
    pub fn from_key_value(key: &ProprietaryKey, value: &[u8]) -> Option<Self> {
        if !is_bitgo_key(key) {
            return None;
        }
        let subtype = ProprietaryKeySubtype::from_u8(key.subtype)?;
        Some(Self::new(subtype, key.key.clone(), value.to_vec()))
    }

    pub fn to_key_value(&self) -> (ProprietaryKey, Vec<u8>) {
        let key = ProprietaryKey {
            prefix: BITGO.to_vec(),
            subtype: self.subtype as u8,
            key: self.key.clone(),
        };
        (key, self.value.clone())
    }
}

pub fn find_kv(
    subtype: ProprietaryKeySubtype,
    map: &BTreeMap<ProprietaryKey, Vec<u8>>,
) -> impl Iterator<Item = BitGoKeyValue> + '_ {
    map.iter()
        .filter(move |(k, _)| is_bitgo_key(k) && k.subtype == subtype as u8)
        .filter_map(|(k, v)| BitGoKeyValue::from_key_value(k, v))
}

pub fn is_bitgo_key(key: &ProprietaryKey) -> bool {
    key.prefix.as_slice() == BITGO
}

pub fn is_musig2_key(key: &ProprietaryKey) -> bool {
    is_bitgo_key(key) && ProprietaryKeySubtype::from_u8(key.subtype).is_some()
}

/// Drop every MuSig2 record from a proprietary map.
pub fn remove_musig2_keys(map: &mut BTreeMap<ProprietaryKey, Vec<u8>>) {
    map.retain(|k, _| !is_musig2_key(k));
}
