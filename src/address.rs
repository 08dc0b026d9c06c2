//! Address encoding for the output scripts this crate produces.
//!
//! Segwit programs (v0 and v1) use bech32/bech32m through the `bech32` crate, script-hash
//! outputs use base58check with the network's version prefix.

use bech32::{Fe32, Hrp};

use crate::bitcoin::blockdata::opcodes::all::{OP_EQUAL, OP_HASH160};
use crate::bitcoin::blockdata::script::Builder;
use crate::bitcoin::hashes::{hash160, Hash};
use crate::bitcoin::{base58, Script, ScriptBuf};
use crate::error::{Error, Result};
use crate::Network;

fn bech32_hrp(network: Network) -> Option<&'static str> {
    match network {
        Network::Bitcoin => Some("bc"),
        Network::BitcoinTestnet3 | Network::BitcoinTestnet4 | Network::BitcoinSignet => Some("tb"),
        Network::Litecoin => Some("ltc"),
        Network::LitecoinTestnet => Some("tltc"),
        _ => None,
    }
}

fn script_hash_prefix(network: Network) -> &'static [u8] {
    match network {
        Network::Bitcoin => &[0x05],
        Network::BitcoinTestnet3 | Network::BitcoinTestnet4 | Network::BitcoinSignet => &[0xc4],
        Network::Litecoin => &[0x32],
        Network::LitecoinTestnet => &[0x3a],
        Network::Dogecoin => &[0x16],
        Network::DogecoinTestnet => &[0xc4],
        Network::Zcash => &[0x1c, 0xbd],
        Network::ZcashTestnet => &[0x1c, 0xba],
    }
}

/// Encode a witness program as a bech32 (v0) or bech32m (v1+) address.
pub fn encode_witness_program(network: Network, version: u8, program: &[u8]) -> Result<String> {
    let hrp = bech32_hrp(network)
        .ok_or_else(|| Error::Address(format!("{} has no segwit addresses", network)))?;
    let hrp = Hrp::parse(hrp).map_err(|e| Error::Address(e.to_string()))?;
    let version = Fe32::try_from(version).map_err(|e| Error::Address(e.to_string()))?;
    bech32::segwit::encode(hrp, version, program).map_err(|e| Error::Address(e.to_string()))
}

/// Decode a bech32/bech32m address into `(version, program)`, checking the network prefix.
pub fn decode_witness_program(network: Network, address: &str) -> Result<(u8, Vec<u8>)> {
    let expected = bech32_hrp(network)
        .ok_or_else(|| Error::Address(format!("{} has no segwit addresses", network)))?;
    let (hrp, version, program) =
        bech32::segwit::decode(address).map_err(|e| Error::Address(e.to_string()))?;
    if hrp.to_lowercase() != expected {
        return Err(Error::Address(format!(
            "address prefix {} does not match network {}",
            hrp, network
        )));
    }
    Ok((version.to_u8(), program))
}

pub fn from_output_script_with_network(script: &Script, network: Network) -> Result<String> {
    let bytes = script.as_bytes();
    if script.is_p2sh() {
        let mut data = script_hash_prefix(network).to_vec();
        data.extend_from_slice(&bytes[2..22]);
        return Ok(base58::encode_check(&data));
    }
    if script.is_witness_program() {
        // OP_0 is 0x00, OP_1..OP_16 are 0x51..0x60
        let version = match bytes[0] {
            0x00 => 0,
            op => op - 0x50,
        };
        return encode_witness_program(network, version, &bytes[2..]);
    }
    Err(Error::Address(format!(
        "unsupported output script {}",
        script.to_hex_string()
    )))
}

pub fn to_output_script_with_network(address: &str, network: Network) -> Result<ScriptBuf> {
    if let Ok((version, program)) = decode_witness_program(network, address) {
        let version =
            crate::bitcoin::WitnessVersion::try_from(version).map_err(|e| Error::Address(e.to_string()))?;
        let program = crate::bitcoin::WitnessProgram::new(version, &program)
            .map_err(|e| Error::Address(e.to_string()))?;
        return Ok(ScriptBuf::new_witness_program(&program));
    }

    let data = base58::decode_check(address).map_err(|e| Error::Address(e.to_string()))?;
    let prefix = script_hash_prefix(network);
    if data.len() != prefix.len() + 20 || !data.starts_with(prefix) {
        return Err(Error::Address(format!(
            "{} is not a script-hash address for {}",
            address, network
        )));
    }
    let hash = hash160::Hash::from_slice(&data[prefix.len()..])
        .map_err(|e| Error::Address(e.to_string()))?;
    Ok(Builder::new()
        .push_opcode(OP_HASH160)
        .push_slice(hash.to_byte_array())
        .push_opcode(OP_EQUAL)
        .into_script())
}
