//! Derivation cursor recovered from persisted addresses.

use crate::wallet::AddressRecord;

pub const EXTERNAL_CHAIN: u32 = 0;
pub const INTERNAL_CHAIN: u32 = 1;

/// Highest index used on each chain, `None` when the chain is untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestorerState {
    pub last_used_external_index: Option<u32>,
    pub last_used_internal_index: Option<u32>,
}

impl RestorerState {
    pub fn from_addresses<'a>(addresses: impl IntoIterator<Item = &'a AddressRecord>) -> Self {
        let mut state = Self::default();
        for (chain, index) in addresses
            .into_iter()
            .filter_map(|a| a.derivation_path.as_deref())
            .filter_map(chain_and_index)
        {
            let slot = if chain == INTERNAL_CHAIN {
                &mut state.last_used_internal_index
            } else {
                &mut state.last_used_external_index
            };
            *slot = Some(slot.map_or(index, |last| last.max(index)));
        }
        state
    }

    pub fn next_index(&self, chain: u32) -> u32 {
        let last = if chain == INTERNAL_CHAIN {
            self.last_used_internal_index
        } else {
            self.last_used_external_index
        };
        last.map_or(0, |i| i.saturating_add(1))
    }
}

/// Split the last two components of `m/.../chain/index`. Hardened or
/// malformed tails are ignored.
fn chain_and_index(path: &str) -> Option<(u32, u32)> {
    let mut parts = path.rsplit('/');
    let index = parts.next()?.parse().ok()?;
    let chain = parts.next()?.parse().ok()?;
    Some((chain, index))
}
