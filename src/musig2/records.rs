//! MuSig2 records stored in PSBT input proprietary key-values.
//!
//! | subtype | keydata | value |
//! |---|---|---|
//! | participants | `<tapOutputKey><tapInternalKey>` | `<participantKey1><participantKey2>` |
//! | public nonce | `<participantKey><tapOutputKey>` | `<pubNonce>` |
//! | partial sig | `<participantKey><tapOutputKey>` | `<sig>` or `<sig><sighash>` |

use ::musig2::PubNonce;

use crate::bitcoin::hashes::hex::DisplayHex;
use crate::bitcoin::hashes::Hash as _;
use crate::bitcoin::psbt::Input;
use crate::bitcoin::secp256k1::XOnlyPublicKey;
use crate::bitcoin::CompressedPublicKey;
use crate::psbt::propkv::{find_kv, is_musig2_key, BitGoKeyValue, ProprietaryKeySubtype};
use crate::taproot::tap_tweak_pubkey;

use super::{key_agg, Musig2Error};

fn parse_compressed(bytes: &[u8], what: &'static str) -> Result<CompressedPublicKey, Musig2Error> {
    CompressedPublicKey::from_slice(bytes).map_err(|e| Musig2Error::InvalidEncoding {
        what,
        reason: e.to_string(),
    })
}

fn parse_xonly(bytes: &[u8], what: &'static str) -> Result<XOnlyPublicKey, Musig2Error> {
    XOnlyPublicKey::from_slice(bytes).map_err(|e| Musig2Error::InvalidEncoding {
        what,
        reason: e.to_string(),
    })
}

fn check_keydata(kv: &BitGoKeyValue, expected: usize) -> Result<(), Musig2Error> {
    if kv.key.len() != expected {
        return Err(Musig2Error::InvalidKeydataLength {
            expected,
            got: kv.key.len(),
        });
    }
    Ok(())
}

/// The two signers of a key-path spend and the keys they commit to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Musig2Participants {
    pub tap_output_key: XOnlyPublicKey,
    pub tap_internal_key: XOnlyPublicKey,
    pub participant_pub_keys: [CompressedPublicKey; 2],
}

impl Musig2Participants {
    pub fn from_key_value(kv: &BitGoKeyValue) -> Result<Self, Musig2Error> {
        check_keydata(kv, 64)?;
        if kv.value.len() != 66 {
            return Err(Musig2Error::InvalidValueLength {
                expected: "66",
                got: kv.value.len(),
            });
        }
        let key1 = parse_compressed(&kv.value[..33], "participant key")?;
        let key2 = parse_compressed(&kv.value[33..], "participant key")?;
        if key1 == key2 {
            return Err(Musig2Error::DuplicateParticipantKeys);
        }
        Ok(Musig2Participants {
            tap_output_key: parse_xonly(&kv.key[..32], "tap output key")?,
            tap_internal_key: parse_xonly(&kv.key[32..], "tap internal key")?,
            participant_pub_keys: [key1, key2],
        })
    }

    pub fn to_key_value(&self) -> BitGoKeyValue {
        let mut key = self.tap_output_key.serialize().to_vec();
        key.extend_from_slice(&self.tap_internal_key.serialize());
        let mut value = self.participant_pub_keys[0].to_bytes().to_vec();
        value.extend_from_slice(&self.participant_pub_keys[1].to_bytes());
        BitGoKeyValue::new(ProprietaryKeySubtype::Musig2ParticipantPubKeys, key, value)
    }

    /// Position of `key` in the participant pair.
    pub fn index_of(&self, key: &CompressedPublicKey) -> Option<usize> {
        self.participant_pub_keys.iter().position(|k| k == key)
    }

    pub fn contains(&self, key: &CompressedPublicKey) -> bool {
        self.index_of(key).is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Musig2PubNonce {
    pub participant_pub_key: CompressedPublicKey,
    pub tap_output_key: XOnlyPublicKey,
    pub pub_nonce: PubNonce,
}

impl PartialEq for Musig2PubNonce {
    fn eq(&self, other: &Self) -> bool {
        self.participant_pub_key == other.participant_pub_key
            && self.tap_output_key == other.tap_output_key
            && self.pub_nonce.serialize() == other.pub_nonce.serialize()
    }
}

impl Eq for Musig2PubNonce {}

impl Musig2PubNonce {
    pub fn from_key_value(kv: &BitGoKeyValue) -> Result<Self, Musig2Error> {
        check_keydata(kv, 65)?;
        if kv.value.len() != 66 {
            return Err(Musig2Error::InvalidValueLength {
                expected: "66",
                got: kv.value.len(),
            });
        }
        let pub_nonce =
            PubNonce::try_from(&kv.value[..]).map_err(|e| Musig2Error::InvalidEncoding {
                what: "public nonce",
                reason: e.to_string(),
            })?;
        Ok(Musig2PubNonce {
            participant_pub_key: parse_compressed(&kv.key[..33], "participant key")?,
            tap_output_key: parse_xonly(&kv.key[33..], "tap output key")?,
            pub_nonce,
        })
    }

    pub fn to_key_value(&self) -> BitGoKeyValue {
        let mut key = self.participant_pub_key.to_bytes().to_vec();
        key.extend_from_slice(&self.tap_output_key.serialize());
        BitGoKeyValue::new(
            ProprietaryKeySubtype::Musig2PubNonce,
            key,
            self.pub_nonce.serialize().to_vec(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Musig2PartialSig {
    pub participant_pub_key: CompressedPublicKey,
    pub tap_output_key: XOnlyPublicKey,
    pub signature: [u8; 32],
    /// Present only when the sighash type is not `SIGHASH_DEFAULT`.
    pub sighash: Option<u8>,
}

impl Musig2PartialSig {
    pub fn from_key_value(kv: &BitGoKeyValue) -> Result<Self, Musig2Error> {
        check_keydata(kv, 65)?;
        let (sig, sighash) = match kv.value.len() {
            32 => (&kv.value[..], None),
            33 => (&kv.value[..32], Some(kv.value[32])),
            got => {
                return Err(Musig2Error::InvalidValueLength {
                    expected: "32 or 33",
                    got,
                })
            }
        };
        let mut signature = [0u8; 32];
        signature.copy_from_slice(sig);
        ::musig2::PartialSignature::try_from(&signature[..]).map_err(|e| {
            Musig2Error::InvalidEncoding {
                what: "partial signature",
                reason: e.to_string(),
            }
        })?;
        Ok(Musig2PartialSig {
            participant_pub_key: parse_compressed(&kv.key[..33], "participant key")?,
            tap_output_key: parse_xonly(&kv.key[33..], "tap output key")?,
            signature,
            sighash,
        })
    }

    pub fn to_key_value(&self) -> BitGoKeyValue {
        let mut key = self.participant_pub_key.to_bytes().to_vec();
        key.extend_from_slice(&self.tap_output_key.serialize());
        let mut value = self.signature.to_vec();
        value.extend(self.sighash);
        BitGoKeyValue::new(ProprietaryKeySubtype::Musig2PartialSig, key, value)
    }

    pub fn partial_signature(&self) -> Result<::musig2::PartialSignature, Musig2Error> {
        ::musig2::PartialSignature::try_from(&self.signature[..]).map_err(|e| {
            Musig2Error::InvalidEncoding {
                what: "partial signature",
                reason: e.to_string(),
            }
        })
    }
}

/// `None` when the input carries no participant record.
pub fn parse_musig2_participants(input: &Input) -> Result<Option<Musig2Participants>, Musig2Error> {
    let kvs: Vec<_> = find_kv(
        ProprietaryKeySubtype::Musig2ParticipantPubKeys,
        &input.proprietary,
    )
    .collect();
    match kvs.as_slice() {
        [] => Ok(None),
        [kv] => Musig2Participants::from_key_value(kv).map(Some),
        _ => Err(Musig2Error::TooManyKeyValues {
            what: "participant",
            expected: 1,
            got: kvs.len(),
        }),
    }
}

pub fn parse_musig2_nonces(input: &Input) -> Result<Vec<Musig2PubNonce>, Musig2Error> {
    let kvs: Vec<_> = find_kv(ProprietaryKeySubtype::Musig2PubNonce, &input.proprietary).collect();
    if kvs.len() > 2 {
        return Err(Musig2Error::TooManyKeyValues {
            what: "public nonce",
            expected: 2,
            got: kvs.len(),
        });
    }
    kvs.iter().map(Musig2PubNonce::from_key_value).collect()
}

pub fn parse_musig2_partial_sigs(input: &Input) -> Result<Vec<Musig2PartialSig>, Musig2Error> {
    let kvs: Vec<_> =
        find_kv(ProprietaryKeySubtype::Musig2PartialSig, &input.proprietary).collect();
    if kvs.len() > 2 {
        return Err(Musig2Error::TooManyKeyValues {
            what: "partial signature",
            expected: 2,
            got: kvs.len(),
        });
    }
    kvs.iter().map(Musig2PartialSig::from_key_value).collect()
}

pub fn is_musig2_input(input: &Input) -> bool {
    input.proprietary.keys().any(is_musig2_key)
}

/// Participant record of a key-path input, checked against the input's taproot fields.
///
/// The internal key must be the BIP327 aggregate of the participant pair and must equal
/// `tap_internal_key`; tweaking it with `tap_merkle_root` must give the record's output key.
pub fn get_participants(input: &Input) -> Result<Musig2Participants, Musig2Error> {
    let participants =
        parse_musig2_participants(input)?.ok_or(Musig2Error::MissingParticipants)?;

    if let Some(internal_key) = input.tap_internal_key {
        if internal_key != participants.tap_internal_key {
            return Err(Musig2Error::TapInternalKeyMismatch {
                expected: internal_key.serialize().to_lower_hex_string(),
                got: participants
                    .tap_internal_key
                    .serialize()
                    .to_lower_hex_string(),
            });
        }
    }

    let aggregate = key_agg(&participants.participant_pub_keys)?;
    if aggregate != participants.tap_internal_key.serialize() {
        return Err(Musig2Error::TapInternalKeyMismatch {
            expected: participants
                .tap_internal_key
                .serialize()
                .to_lower_hex_string(),
            got: aggregate.to_lower_hex_string(),
        });
    }

    let merkle_root = input.tap_merkle_root.map(|r| r.to_byte_array());
    let (output_key, _) = tap_tweak_pubkey(
        &participants.tap_internal_key.serialize(),
        merkle_root.as_ref(),
    )
    .map_err(|e| Musig2Error::InvalidEncoding {
        what: "tap internal key",
        reason: e.to_string(),
    })?;
    if output_key != participants.tap_output_key.serialize() {
        return Err(Musig2Error::TapOutputKeyMismatch {
            expected: participants.tap_output_key.serialize().to_lower_hex_string(),
            got: output_key.to_lower_hex_string(),
        });
    }
    Ok(participants)
}

/// Both public nonces, ordered like the participant keys.
pub fn get_nonces(
    input: &Input,
    participants: &Musig2Participants,
) -> Result<[Musig2PubNonce; 2], Musig2Error> {
    let nonces = parse_musig2_nonces(input)?;
    if nonces.len() != 2 {
        return Err(Musig2Error::NonceCount {
            expected: 2,
            got: nonces.len(),
        });
    }
    let mut ordered: [Option<Musig2PubNonce>; 2] = [None, None];
    for nonce in nonces {
        if nonce.tap_output_key != participants.tap_output_key {
            return Err(Musig2Error::TapOutputKeyMismatch {
                expected: participants.tap_output_key.serialize().to_lower_hex_string(),
                got: nonce.tap_output_key.serialize().to_lower_hex_string(),
            });
        }
        let index = participants
            .index_of(&nonce.participant_pub_key)
            .ok_or_else(|| Musig2Error::UnknownParticipant(nonce.participant_pub_key.to_string()))?;
        if ordered[index].is_some() {
            return Err(Musig2Error::DuplicateRecord {
                what: "public nonce",
                participant: nonce.participant_pub_key.to_string(),
            });
        }
        ordered[index] = Some(nonce);
    }
    match ordered {
        [Some(a), Some(b)] => Ok([a, b]),
        _ => Err(Musig2Error::NonceCount {
            expected: 2,
            got: 1,
        }),
    }
}
