//! Choice of the outputs to blind and of the key each one is blinded to.

use std::collections::BTreeMap;

use lwk_wollet::elements::Address;
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::secp256k1_zkp::PublicKey;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlindingSelection {
    /// Output indexes to blind, ascending.
    pub indices: Vec<usize>,
    /// Keys for outputs not owned by the wallet. Indexes absent here are
    /// blinded with the wallet's own key.
    pub keys: BTreeMap<usize, PublicKey>,
}

/// Select every output with a non-empty script. Outputs paying exactly the
/// recipient's script are mapped to the recipient's blinding key.
pub fn select_outputs(
    pset: &PartiallySignedTransaction,
    recipient: Option<&Address>,
) -> BlindingSelection {
    let recipient = recipient.and_then(|address| {
        address
            .blinding_pubkey
            .map(|key| (address.script_pubkey(), key))
    });

    let mut selection = BlindingSelection::default();
    for (idx, output) in pset.outputs().iter().enumerate() {
        if output.script_pubkey.is_empty() {
            continue;
        }
        selection.indices.push(idx);
        if let Some((script, key)) = &recipient {
            if &output.script_pubkey == script {
                selection.keys.insert(idx, *key);
            }
        }
    }
    selection
}
