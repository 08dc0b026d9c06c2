//! Fully populated PSBTs for every spend kind, built from seed-derived test wallets.

use crate::bitcoin::absolute::LockTime;
use crate::bitcoin::bip32::DerivationPath;
use crate::bitcoin::hashes::Hash;
use crate::bitcoin::psbt::{Input, Psbt};
use crate::bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, XOnlyPublicKey};
use crate::bitcoin::taproot::{LeafVersion, TapLeafHash, TapNodeHash};
use crate::bitcoin::transaction::Version;
use crate::bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use crate::fixed_script_wallet::wallet_keys::tests::{
    get_test_wallet_keys, get_test_wallet_xprvs, XprivTriple,
};
use crate::fixed_script_wallet::{
    build_multisig_script_2_of_3, build_p2pk_script, derivation_path, to_pub_triple, PubTriple,
    RootWalletKeys, ScriptP2tr,
};
use crate::musig2::Musig2Participants;
use crate::Network;

pub const FIXTURE_SEED: &str = "wallet-psbt";
pub const INPUT_VALUE: Amount = Amount::from_sat(100_000);
pub const FEE: Amount = Amount::from_sat(1_000);

/// Shape of a fixture input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    P2sh,
    P2shP2wsh,
    P2wsh,
    /// Single user key wrapped in p2sh.
    P2shP2pk,
    /// Legacy p2tr output spent through the user/bitgo leaf.
    P2trLegacyScriptPath,
    /// MuSig2 p2tr output spent through the user/backup leaf.
    P2trMusig2ScriptPath,
    /// MuSig2 p2tr output spent by user and bitgo with a key-path signature.
    P2trMusig2KeyPath,
}

impl InputShape {
    pub fn chain(&self) -> u32 {
        match self {
            InputShape::P2sh | InputShape::P2shP2pk => 0,
            InputShape::P2shP2wsh => 10,
            InputShape::P2wsh => 20,
            InputShape::P2trLegacyScriptPath => 30,
            InputShape::P2trMusig2ScriptPath | InputShape::P2trMusig2KeyPath => 40,
        }
    }

    fn uses_non_witness_utxo(&self) -> bool {
        matches!(self, InputShape::P2sh | InputShape::P2shP2pk)
    }
}

pub struct Fixture {
    pub psbt: Psbt,
    pub wallet_keys: RootWalletKeys,
    pub xprivs: XprivTriple,
    pub network: Network,
    /// `(chain, index)` each input was derived at.
    pub derivations: Vec<(u32, u32)>,
}

impl Fixture {
    pub fn pub_triple(&self, input_index: usize) -> PubTriple {
        let (chain, index) = self.derivations[input_index];
        to_pub_triple(
            &self
                .wallet_keys
                .derive_for_chain_and_index(chain, index)
                .unwrap(),
        )
    }

    /// User, backup and bitgo secret keys of input `input_index`.
    pub fn secrets(&self, input_index: usize) -> [SecretKey; 3] {
        let (chain, index) = self.derivations[input_index];
        let secp = Secp256k1::new();
        let derive = |i: usize| {
            let path =
                derivation_path(&self.wallet_keys.derivation_prefixes[i], chain, index);
            self.xprivs[i].derive_priv(&secp, &path).unwrap().private_key
        };
        [derive(0), derive(1), derive(2)]
    }

    pub fn prevouts(&self) -> Vec<TxOut> {
        crate::psbt::sighash::collect_prevouts(&self.psbt).unwrap()
    }
}

fn funding_tx(script_pubkey: ScriptBuf) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: INPUT_VALUE,
            script_pubkey,
        }],
    }
}

fn xonly(key: &PublicKey) -> XOnlyPublicKey {
    key.x_only_public_key().0
}

fn add_bip32_derivation(
    input: &mut Input,
    wallet_keys: &RootWalletKeys,
    keys: &PubTriple,
    roles: &[usize],
    chain: u32,
    index: u32,
) {
    for &role in roles {
        let path = derivation_path(&wallet_keys.derivation_prefixes[role], chain, index);
        input
            .bip32_derivation
            .insert(keys[role].0, (wallet_keys.xpubs[role].fingerprint(), path));
    }
}

/// Script-path input through the leaf signed by `signers` (role indices).
fn add_script_path(
    input: &mut Input,
    wallet_keys: &RootWalletKeys,
    keys: &PubTriple,
    script: &ScriptP2tr,
    signers: [usize; 2],
    chain: u32,
    index: u32,
) {
    let (_, leaf_script, control_block) = script
        .leaf_for_signers([keys[signers[0]], keys[signers[1]]])
        .unwrap();
    let leaf_hash = TapLeafHash::from_script(&leaf_script, LeafVersion::TapScript);
    input.tap_scripts.insert(
        control_block.to_bitcoin().unwrap(),
        (leaf_script, LeafVersion::TapScript),
    );
    for role in signers {
        let path = derivation_path(&wallet_keys.derivation_prefixes[role], chain, index);
        input.tap_key_origins.insert(
            xonly(&keys[role].0),
            (vec![leaf_hash], (wallet_keys.xpubs[role].fingerprint(), path)),
        );
    }
    input.tap_internal_key = Some(XOnlyPublicKey::from_slice(&script.internal_key()).unwrap());
    input.tap_merkle_root = script.merkle_root().map(TapNodeHash::from_byte_array);
}

fn add_key_path(
    input: &mut Input,
    wallet_keys: &RootWalletKeys,
    keys: &PubTriple,
    script: &ScriptP2tr,
    chain: u32,
    index: u32,
) {
    let internal_key = XOnlyPublicKey::from_slice(&script.internal_key()).unwrap();
    let output_key =
        XOnlyPublicKey::from_slice(&script.output_script().as_bytes()[2..34]).unwrap();
    input.tap_internal_key = Some(internal_key);
    input.tap_merkle_root = script.merkle_root().map(TapNodeHash::from_byte_array);
    for role in [0, 2] {
        let path = derivation_path(&wallet_keys.derivation_prefixes[role], chain, index);
        input.tap_key_origins.insert(
            xonly(&keys[role].0),
            (vec![], (wallet_keys.xpubs[role].fingerprint(), path)),
        );
    }
    let participants = Musig2Participants {
        tap_output_key: output_key,
        tap_internal_key: internal_key,
        participant_pub_keys: [keys[0], keys[2]],
    };
    let (key, value) = participants.to_key_value().to_key_value();
    input.proprietary.insert(key, value);
}

/// Input of `shape` derived at `(chain, index)`, together with the output it spends.
fn build_input(
    shape: InputShape,
    wallet_keys: &RootWalletKeys,
    chain: u32,
    index: u32,
) -> (Input, ScriptBuf) {
    let keys = to_pub_triple(&wallet_keys.derive_for_chain_and_index(chain, index).unwrap());
    let mut input = Input::default();
    let script_pubkey = match shape {
        InputShape::P2sh => {
            let redeem_script = build_multisig_script_2_of_3(&keys);
            add_bip32_derivation(&mut input, wallet_keys, &keys, &[0, 1, 2], chain, index);
            input.redeem_script = Some(redeem_script.clone());
            redeem_script.to_p2sh()
        }
        InputShape::P2shP2wsh => {
            let witness_script = build_multisig_script_2_of_3(&keys);
            let redeem_script = witness_script.to_p2wsh();
            add_bip32_derivation(&mut input, wallet_keys, &keys, &[0, 1, 2], chain, index);
            input.witness_script = Some(witness_script);
            input.redeem_script = Some(redeem_script.clone());
            redeem_script.to_p2sh()
        }
        InputShape::P2wsh => {
            let witness_script = build_multisig_script_2_of_3(&keys);
            add_bip32_derivation(&mut input, wallet_keys, &keys, &[0, 1, 2], chain, index);
            input.witness_script = Some(witness_script.clone());
            witness_script.to_p2wsh()
        }
        InputShape::P2shP2pk => {
            let redeem_script = build_p2pk_script(&keys[0]);
            add_bip32_derivation(&mut input, wallet_keys, &keys, &[0], chain, index);
            input.redeem_script = Some(redeem_script.clone());
            redeem_script.to_p2sh()
        }
        InputShape::P2trLegacyScriptPath => {
            let script = ScriptP2tr::new(&keys, false).unwrap();
            add_script_path(&mut input, wallet_keys, &keys, &script, [0, 2], chain, index);
            script.output_script()
        }
        InputShape::P2trMusig2ScriptPath => {
            let script = ScriptP2tr::new(&keys, true).unwrap();
            add_script_path(&mut input, wallet_keys, &keys, &script, [0, 1], chain, index);
            script.output_script()
        }
        InputShape::P2trMusig2KeyPath => {
            let script = ScriptP2tr::new(&keys, true).unwrap();
            add_key_path(&mut input, wallet_keys, &keys, &script, chain, index);
            script.output_script()
        }
    };
    (input, script_pubkey)
}

/// A PSBT spending one wallet output per entry of `shapes` into a single p2wsh output.
///
/// Input `i` is derived at `m/0/0/{chain}/{i}`. The wallet's root keys are recorded as
/// global xpubs.
pub fn build_psbt(shapes: &[InputShape]) -> Fixture {
    let wallet_keys = get_test_wallet_keys(FIXTURE_SEED);
    let xprivs = get_test_wallet_xprvs(FIXTURE_SEED);

    let mut inputs = Vec::new();
    let mut derivations = Vec::new();
    let mut funding = Vec::new();
    for (i, shape) in shapes.iter().enumerate() {
        let (chain, index) = (shape.chain(), i as u32);
        let (input, script_pubkey) = build_input(*shape, &wallet_keys, chain, index);
        inputs.push(input);
        derivations.push((chain, index));
        funding.push(funding_tx(script_pubkey));
    }

    let change_keys = to_pub_triple(&wallet_keys.derive_for_chain_and_index(21, 0).unwrap());
    let total = INPUT_VALUE * shapes.len() as u64;
    let unsigned_tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: funding
            .iter()
            .map(|tx| TxIn {
                previous_output: OutPoint {
                    txid: tx.compute_txid(),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: vec![TxOut {
            value: total.checked_sub(FEE).unwrap_or(Amount::ZERO),
            script_pubkey: build_multisig_script_2_of_3(&change_keys).to_p2wsh(),
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx).unwrap();
    for (i, ((input, shape), tx)) in inputs.into_iter().zip(shapes).zip(funding).enumerate() {
        psbt.inputs[i] = input;
        if shape.uses_non_witness_utxo() {
            psbt.inputs[i].non_witness_utxo = Some(tx);
        } else {
            psbt.inputs[i].witness_utxo = Some(tx.output[0].clone());
        }
    }
    for xpub in &wallet_keys.xpubs {
        psbt.xpub
            .insert(*xpub, (xpub.fingerprint(), DerivationPath::master()));
    }

    Fixture {
        psbt,
        wallet_keys,
        xprivs,
        network: Network::Bitcoin,
        derivations,
    }
}
