//! Key-path inputs spent with a two-party MuSig2 session.

use ::musig2::PubNonce;

use crate::bitcoin::hashes::Hash;
use crate::bitcoin::psbt::Psbt;
use crate::bitcoin::secp256k1::{Secp256k1, SecretKey};
use crate::bitcoin::sighash::TapSighashType;
use crate::bitcoin::taproot;
use crate::bitcoin::CompressedPublicKey;
use crate::error::{Error, Result};
use crate::musig2::{
    deterministic_nonce, get_nonces, get_participants, parse_musig2_nonces,
    parse_musig2_partial_sigs, Musig2Error, Musig2NonceStore, Musig2PartialSig,
    Musig2Participants, Musig2PubNonce, Musig2Session, NonceOptions,
};

use super::propkv::BitGoKeyValue;
use super::sighash::{collect_prevouts, taproot_sighash};

/// Key-path digest the session signs.
pub(crate) fn key_path_message(
    psbt: &Psbt,
    index: usize,
    sighash_type: TapSighashType,
) -> Result<[u8; 32]> {
    let prevouts = collect_prevouts(psbt)?;
    taproot_sighash(&psbt.unsigned_tx, index, &prevouts, None, sighash_type)
}

fn sighash_from_byte(sighash: Option<u8>) -> Result<TapSighashType> {
    match sighash {
        None => Ok(TapSighashType::Default),
        Some(byte) => TapSighashType::from_consensus_u8(byte)
            .map_err(|e| Error::validation(format!("invalid sighash byte: {}", e))),
    }
}

fn sighash_to_byte(sighash_type: TapSighashType) -> Option<u8> {
    match sighash_type {
        TapSighashType::Default => None,
        other => Some(other as u8),
    }
}

fn insert_record(psbt: &mut Psbt, index: usize, kv: BitGoKeyValue) {
    let (key, value) = kv.to_key_value();
    psbt.inputs[index].proprietary.insert(key, value);
}

fn participant_of(
    participants: &Musig2Participants,
    secret: &SecretKey,
) -> Result<(usize, CompressedPublicKey)> {
    let participant = CompressedPublicKey(secret.public_key(&Secp256k1::signing_only()));
    let index = participants
        .index_of(&participant)
        .ok_or_else(|| Musig2Error::UnknownParticipant(participant.to_string()))?;
    Ok((index, participant))
}

fn session(
    psbt: &Psbt,
    index: usize,
    participants: &Musig2Participants,
    nonces: &[Musig2PubNonce; 2],
    sighash_type: TapSighashType,
) -> Result<Musig2Session> {
    let message = key_path_message(psbt, index, sighash_type)?;
    let merkle_root = psbt.inputs[index]
        .tap_merkle_root
        .map(|root| root.to_byte_array());
    Ok(Musig2Session::new(
        [nonces[0].pub_nonce.clone(), nonces[1].pub_nonce.clone()],
        participants.participant_pub_keys,
        message,
        &participants.tap_internal_key,
        merkle_root,
    )?)
}

/// Add the public nonce of the participant holding `secret`.
///
/// Calling this again for the same participant and message returns the recorded nonce.
pub(crate) fn set_nonce(
    psbt: &mut Psbt,
    index: usize,
    store: &mut Musig2NonceStore,
    secret: &SecretKey,
    options: NonceOptions,
    sighash_type: TapSighashType,
) -> Result<PubNonce> {
    let input = &psbt.inputs[index];
    let participants = get_participants(input)?;
    let (participant_index, participant) = participant_of(&participants, secret)?;
    let existing = parse_musig2_nonces(input)?;
    let message = key_path_message(psbt, index, sighash_type)?;

    let pub_nonce = if options.deterministic {
        if options.session_id.is_some() {
            return Err(Musig2Error::DeterministicWithSessionId.into());
        }
        if participant_index != 1 {
            return Err(Musig2Error::DeterministicFirstParticipant.into());
        }
        let first_key = participants.participant_pub_keys[0];
        let first = existing
            .iter()
            .find(|n| n.participant_pub_key == first_key)
            .ok_or(Musig2Error::DeterministicRequiresFirstNonce)?;
        let (_, pub_nonce) = deterministic_nonce(
            secret,
            &first.pub_nonce,
            &participants.tap_output_key,
            &message,
        )?;
        pub_nonce
    } else {
        store.create_nonce(
            secret,
            &participant,
            &participants.tap_output_key,
            &message,
            options.session_id,
        )?
    };

    if let Some(recorded) = existing
        .iter()
        .find(|n| n.participant_pub_key == participant)
    {
        if recorded.pub_nonce.serialize() == pub_nonce.serialize() {
            return Ok(pub_nonce);
        }
        return Err(Musig2Error::DuplicateRecord {
            what: "public nonce",
            participant: participant.to_string(),
        }
        .into());
    }

    let record = Musig2PubNonce {
        participant_pub_key: participant,
        tap_output_key: participants.tap_output_key,
        pub_nonce: pub_nonce.clone(),
    };
    insert_record(psbt, index, record.to_key_value());
    Ok(pub_nonce)
}

/// Add the partial signature of the participant holding `secret`. Both nonces must be set.
pub(crate) fn sign(
    psbt: &mut Psbt,
    index: usize,
    store: &mut Musig2NonceStore,
    secret: &SecretKey,
    sighash_type: TapSighashType,
) -> Result<()> {
    let input = &psbt.inputs[index];
    let participants = get_participants(input)?;
    let (participant_index, participant) = participant_of(&participants, secret)?;
    if parse_musig2_partial_sigs(input)?
        .iter()
        .any(|p| p.participant_pub_key == participant)
    {
        return Err(Musig2Error::DuplicateRecord {
            what: "partial signature",
            participant: participant.to_string(),
        }
        .into());
    }
    let nonces = get_nonces(input, &participants)?;
    let session = session(psbt, index, &participants, &nonces, sighash_type)?;
    let signature =
        session.partial_sign(secret, &nonces[participant_index].pub_nonce, store)?;

    let record = Musig2PartialSig {
        participant_pub_key: participant,
        tap_output_key: participants.tap_output_key,
        signature,
        sighash: sighash_to_byte(sighash_type),
    };
    insert_record(psbt, index, record.to_key_value());
    Ok(())
}

/// Check the partial signatures of a key-path input.
///
/// With one matching partial only that partial is verified. With both, each is verified and
/// then the aggregate is checked against the output key; an aggregate that fails although
/// both partials verify is an error, not `false`.
pub(crate) fn validate(
    psbt: &Psbt,
    index: usize,
    pubkey: Option<&CompressedPublicKey>,
) -> Result<bool> {
    let input = &psbt.inputs[index];
    let partials = parse_musig2_partial_sigs(input)?;
    let selected: Vec<&Musig2PartialSig> = partials
        .iter()
        .filter(|p| pubkey.map_or(true, |key| p.participant_pub_key == *key))
        .collect();
    if selected.is_empty() {
        return Ok(false);
    }

    let participants = get_participants(input)?;
    let nonces = get_nonces(input, &participants)?;
    for partial in &selected {
        let session = session(
            psbt,
            index,
            &participants,
            &nonces,
            sighash_from_byte(partial.sighash)?,
        )?;
        if !session.partial_verify(&partial.participant_pub_key, &partial.signature)? {
            return Ok(false);
        }
    }

    if partials.len() == 2 && (pubkey.is_none() || selected.len() == 2) {
        aggregate_with(psbt, index, &participants, &nonces, &partials)?;
    }
    Ok(true)
}

fn aggregate_with(
    psbt: &Psbt,
    index: usize,
    participants: &Musig2Participants,
    nonces: &[Musig2PubNonce; 2],
    partials: &[Musig2PartialSig],
) -> Result<taproot::Signature> {
    let sighash = partials.first().and_then(|p| p.sighash);
    let session = session(psbt, index, participants, nonces, sighash_from_byte(sighash)?)?;
    Ok(session.aggregate(partials)?)
}

/// Aggregate both partial signatures into the key-path signature.
pub(crate) fn aggregate(psbt: &Psbt, index: usize) -> Result<taproot::Signature> {
    let input = &psbt.inputs[index];
    let participants = get_participants(input)?;
    let nonces = get_nonces(input, &participants)?;
    let partials = parse_musig2_partial_sigs(input)?;
    aggregate_with(psbt, index, &participants, &nonces, &partials)
}
