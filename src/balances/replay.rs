use std::collections::BTreeMap;

use alloy::primitives::{Address, I256, U256};

use crate::types::TransferEvent;

/// Token to signed raw balance. Signed so that replaying an incomplete event history can
/// pass through negative balances without wrapping.
pub type Ledger = BTreeMap<Address, I256>;

/// Seed a ledger from unsigned anchor balances.
pub fn ledger_from_anchor<I>(balances: I) -> Ledger
where
    I: IntoIterator<Item = (Address, U256)>,
{
    let mut ledger = Ledger::new();
    for (token, raw) in balances {
        let entry = ledger.entry(token).or_insert(I256::ZERO);
        *entry = entry.saturating_add(to_signed(raw));
    }
    ledger
}

/// Positive balances only, as unsigned raw amounts.
pub fn positive_balances(ledger: &Ledger) -> Vec<(Address, U256)> {
    ledger
        .iter()
        .filter(|(_, v)| v.is_positive())
        .map(|(token, v)| (*token, v.into_raw()))
        .collect()
}

fn to_signed(raw: U256) -> I256 {
    I256::try_from(raw).unwrap_or(I256::MAX)
}

/// Undo one transfer: receipts are subtracted, sends are added back.
fn reverse(ledger: &mut Ledger, wallet: Address, event: &TransferEvent) {
    let value = to_signed(event.value);
    let entry = ledger.entry(event.token).or_insert(I256::ZERO);
    if event.to == wallet {
        *entry = entry.saturating_sub(value);
    }
    if event.from == wallet {
        *entry = entry.saturating_add(value);
    }
}

/// Reconstruct past ledgers by walking events and targets backwards in lockstep.
///
/// `events` must be sorted newest first by `(block, log_index)` and `targets`
/// (`(timestamp, block)` pairs) newest first by block. The ledger for a target block `b` is
/// the state before `b` executes, so every event at or above `b` is undone before it is
/// captured. Each event is visited once. Output follows the order of `targets`.
pub fn replay_backward(
    wallet: Address,
    anchor: &Ledger,
    events: &[TransferEvent],
    targets: &[(u64, u64)],
) -> Vec<(u64, Ledger)> {
    debug_assert!(events
        .windows(2)
        .all(|w| w[0].ordering_key() >= w[1].ordering_key()));
    debug_assert!(targets.windows(2).all(|w| w[0].1 >= w[1].1));

    let mut ledger = anchor.clone();
    let mut cursor = 0;
    let mut snapshots = Vec::with_capacity(targets.len());

    for &(timestamp, block) in targets {
        while cursor < events.len() && events[cursor].block_number >= block {
            reverse(&mut ledger, wallet, &events[cursor]);
            cursor += 1;
        }
        snapshots.push((timestamp, ledger.clone()));
    }

    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256};

    const WALLET: Address = address!("0x1111111111111111111111111111111111111111");
    const OTHER: Address = address!("0x2222222222222222222222222222222222222222");
    const USDC: Address = address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");
    const DAI: Address = address!("0x6B175474E89094C44Da98b954EedeAC495271d0F");

    fn transfer(token: Address, from: Address, to: Address, value: u64, block: u64, log_index: u64) -> TransferEvent {
        TransferEvent {
            chain: "ethereum".to_string(),
            token,
            from,
            to,
            value: U256::from(value),
            block_number: block,
            tx_hash: B256::ZERO,
            log_index,
        }
    }

    fn balance(ledger: &Ledger, token: Address) -> I256 {
        ledger.get(&token).copied().unwrap_or(I256::ZERO)
    }

    #[test]
    fn test_single_incoming_transfer_boundary() {
        let head = 1_000u64;
        let anchor = ledger_from_anchor([(USDC, U256::from(500u64))]);
        let events = vec![transfer(USDC, OTHER, WALLET, 200, head - 10, 0)];
        let targets = vec![
            (6, head),
            (5, head - 9),
            (4, head - 10),
            (3, head - 11),
            (2, head - 500),
        ];

        let snapshots = replay_backward(WALLET, &anchor, &events, &targets);
        let values: Vec<I256> = snapshots.iter().map(|(_, l)| balance(l, USDC)).collect();

        let b = I256::try_from(500).unwrap();
        let b_minus_a = I256::try_from(300).unwrap();
        assert_eq!(values, vec![b, b, b_minus_a, b_minus_a, b_minus_a]);
        assert_eq!(snapshots[0].0, 6);
    }

    #[test]
    fn test_outgoing_transfers_are_added_back() {
        let anchor = ledger_from_anchor([(USDC, U256::from(100u64))]);
        let events = vec![
            transfer(USDC, WALLET, OTHER, 40, 90, 1),
            transfer(USDC, OTHER, WALLET, 10, 90, 0),
            transfer(USDC, WALLET, OTHER, 25, 50, 3),
        ];
        let snapshots = replay_backward(WALLET, &anchor, &events, &[(2, 80), (1, 10)]);

        assert_eq!(balance(&snapshots[0].1, USDC), I256::try_from(130).unwrap());
        assert_eq!(balance(&snapshots[1].1, USDC), I256::try_from(155).unwrap());
    }

    #[test]
    fn test_tokens_seen_only_through_events_are_tracked() {
        let anchor = ledger_from_anchor([(USDC, U256::from(100u64))]);
        // DAI was fully sent away before the anchor.
        let events = vec![transfer(DAI, WALLET, OTHER, 70, 20, 0)];
        let snapshots = replay_backward(WALLET, &anchor, &events, &[(2, 30), (1, 10)]);

        assert_eq!(positive_balances(&snapshots[0].1), vec![(USDC, U256::from(100u64))]);
        let earlier = positive_balances(&snapshots[1].1);
        assert!(earlier.contains(&(DAI, U256::from(70u64))));
    }

    #[test]
    fn test_self_transfer_is_neutral_and_negatives_are_dropped() {
        let anchor = ledger_from_anchor([(USDC, U256::from(5u64))]);
        let events = vec![
            transfer(USDC, WALLET, WALLET, 1_000, 40, 1),
            transfer(USDC, OTHER, WALLET, 50, 30, 0),
        ];
        let snapshots = replay_backward(WALLET, &anchor, &events, &[(1, 10)]);

        assert_eq!(balance(&snapshots[0].1, USDC), I256::try_from(-45).unwrap());
        assert!(positive_balances(&snapshots[0].1).is_empty());
    }

    #[test]
    fn test_no_events_repeats_anchor() {
        let anchor = ledger_from_anchor([(USDC, U256::from(9u64))]);
        let snapshots = replay_backward(WALLET, &anchor, &[], &[(3, 300), (2, 200), (1, 100)]);
        assert!(snapshots.iter().all(|(_, l)| *l == anchor));
    }
}
