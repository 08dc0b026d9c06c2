//! JavaScript bindings for [`WalletPsbt`].
//!
//! Keys cross the boundary as base58 strings and byte arrays. Errors surface as JS `Error`
//! objects carrying the crate error's message.

use std::str::FromStr;

use wasm_bindgen::prelude::*;

use crate::bitcoin::bip32::{Xpriv, Xpub};
use crate::bitcoin::consensus::serialize;
use crate::bitcoin::CompressedPublicKey;
use crate::error::{Error, Result};
use crate::musig2::NonceOptions;
use crate::{Network, WalletPsbt};

impl From<Error> for JsValue {
    fn from(e: Error) -> JsValue {
        js_sys::Error::new(&e.to_string()).into()
    }
}

type WasmResult<T> = std::result::Result<T, JsValue>;

fn parse_xpriv(xpriv: &str) -> Result<Xpriv> {
    Ok(Xpriv::from_str(xpriv)?)
}

fn parse_xpubs(xpubs: &[String]) -> Result<Vec<Xpub>> {
    xpubs
        .iter()
        .map(|s| Xpub::from_str(s).map_err(Error::from))
        .collect()
}

fn parse_nonce_options(session_id: Option<Vec<u8>>, deterministic: bool) -> Result<NonceOptions> {
    let session_id = session_id
        .map(|bytes| {
            <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
                Error::validation(format!(
                    "session id must be 32 bytes, got {}",
                    bytes.len()
                ))
            })
        })
        .transpose()?;
    Ok(NonceOptions {
        session_id,
        deterministic,
    })
}

fn to_u32_indices(indices: Vec<usize>) -> Vec<u32> {
    indices.into_iter().map(|i| i as u32).collect()
}

#[wasm_bindgen]
pub struct WalletPsbtJs {
    inner: WalletPsbt,
}

#[wasm_bindgen]
impl WalletPsbtJs {
    /// Deserialize a PSBT for `network` (network name or coin ticker).
    pub fn from_bytes(bytes: &[u8], network: &str) -> WasmResult<WalletPsbtJs> {
        let network = Network::from_str(network)?;
        Ok(WalletPsbtJs {
            inner: WalletPsbt::deserialize(bytes, network)?,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.inner.serialize()
    }

    pub fn network(&self) -> String {
        self.inner.network().to_string()
    }

    pub fn unsigned_txid(&self) -> String {
        self.inner.unsigned_txid().to_string()
    }

    pub fn input_count(&self) -> usize {
        self.inner.input_count()
    }

    pub fn is_input_finalized(&self, input_index: usize) -> WasmResult<bool> {
        Ok(self.inner.is_input_finalized(input_index)?)
    }

    /// Spend kind of the input, e.g. `"p2wsh"` or `"taprootKeyPath"`.
    pub fn spend_kind(&self, input_index: usize) -> WasmResult<String> {
        Ok(self.inner.classify_input(input_index)?.to_string())
    }

    /// Sign a single input with the key `xpriv` derives for it.
    ///
    /// MuSig2 key-path inputs need both nonces recorded first.
    pub fn sign_with_xpriv(&mut self, input_index: usize, xpriv: &str) -> WasmResult<()> {
        let xpriv = parse_xpriv(xpriv)?;
        Ok(self.inner.sign_any_input_hd(input_index, &xpriv)?)
    }

    /// Sign every input `xpriv` can sign. Returns the signed input indices.
    pub fn sign_all_with_xpriv(&mut self, xpriv: &str) -> WasmResult<Vec<u32>> {
        let xpriv = parse_xpriv(xpriv)?;
        Ok(to_u32_indices(self.inner.sign_all_inputs_hd(&xpriv)?))
    }

    /// Record this participant's MuSig2 nonce on the input and return it (66 bytes).
    ///
    /// `session_id` seeds a random nonce when given. With `deterministic` the nonce is
    /// derived from the counterparty's nonce, which must already be present.
    pub fn generate_musig2_nonce(
        &mut self,
        input_index: usize,
        xpriv: &str,
        session_id: Option<Vec<u8>>,
        deterministic: bool,
    ) -> WasmResult<Vec<u8>> {
        let xpriv = parse_xpriv(xpriv)?;
        let options = parse_nonce_options(session_id, deterministic)?;
        let nonce = self
            .inner
            .set_input_musig2_nonce_hd(input_index, &xpriv, options)?;
        Ok(nonce.serialize().to_vec())
    }

    pub fn sign_musig2_input(&mut self, input_index: usize, xpriv: &str) -> WasmResult<()> {
        let xpriv = parse_xpriv(xpriv)?;
        Ok(self.inner.sign_taproot_musig2_input_hd(input_index, &xpriv)?)
    }

    /// Whether the input's signatures are valid, optionally only those by `pubkey`
    /// (33-byte compressed key).
    pub fn validate_signatures_of_input(
        &self,
        input_index: usize,
        pubkey: Option<Vec<u8>>,
    ) -> WasmResult<bool> {
        let pubkey = pubkey
            .map(|bytes| CompressedPublicKey::from_slice(&bytes).map_err(Error::from))
            .transpose()?;
        Ok(self
            .inner
            .validate_signatures_of_input(input_index, pubkey.as_ref())?)
    }

    /// Signed flags in the order of `xpubs`. Without `xpubs` the global xpubs are used in
    /// the order of the document's xpub map, not by wallet role.
    pub fn get_signature_validation_array(
        &self,
        input_index: usize,
        xpubs: Option<Vec<String>>,
    ) -> WasmResult<Vec<u8>> {
        let xpubs = xpubs.as_deref().map(parse_xpubs).transpose()?;
        let flags = self
            .inner
            .get_signature_validation_array(input_index, xpubs.as_deref())?;
        Ok(flags.iter().map(|&signed| u8::from(signed)).collect())
    }

    pub fn signature_count(&self, input_index: usize) -> WasmResult<usize> {
        Ok(self.inner.signature_count(input_index)?)
    }

    pub fn finalize_input(&mut self, input_index: usize) -> WasmResult<()> {
        Ok(self.inner.finalize_input(input_index)?)
    }

    /// Finalize every input that can be. Returns the finalized input indices.
    pub fn finalize_all_inputs(&mut self) -> WasmResult<Vec<u32>> {
        Ok(to_u32_indices(self.inner.finalize_all_inputs()?))
    }

    /// Consensus-serialized signed transaction.
    pub fn extract_transaction(&self) -> WasmResult<Vec<u8>> {
        Ok(serialize(&self.inner.extract_transaction()?))
    }

    pub fn extract_half_signed_legacy_transaction(&self) -> WasmResult<Vec<u8>> {
        Ok(serialize(&self.inner.extract_half_signed_legacy_transaction()?))
    }
}
