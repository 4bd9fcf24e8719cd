//! Notification formatting (pure, deterministic).

use chrono::{DateTime, Local};

use crate::{
    domain::{BlockRecord, LinkButton},
    errors::Error,
    Result,
};

/// Fixed reward minted with every block.
pub const BLOCK_REWARD_BIL: u64 = 600;

const ADDRESS_PREFIX_LEN: usize = 12;
const ADDRESS_SUFFIX_LEN: usize = 8;

const ICPSWAP_URL: &str =
    "https://www.kongswap.io/swap?from=ktra4-taaaa-aaaag-atveq-cai&to=ryjl3-tyaaa-aaaaa-aaaba-cai";
const KONGSWAP_URL: &str =
    "https://www.kongswap.io/swap?from=ktra4-taaaa-aaaag-atveq-cai&to=ryjl3-tyaaa-aaaaa-aaaba-cai";
const WEBSITE_URL: &str = "https://xnrj3-raaaa-aaaad-aaepq-cai.icp0.io/";

/// Link buttons attached to every block notification.
pub fn notification_links() -> Vec<LinkButton> {
    vec![
        LinkButton::new("\u{1F31F} ICPSwap!", ICPSWAP_URL),
        LinkButton::new("\u{1F389} KongSwap!", KONGSWAP_URL),
        LinkButton::new("\u{1F38A} Website!", WEBSITE_URL),
    ]
}

/// Render the human-readable notification for a freshly mined block.
///
/// Fails with `MalformedRecord` on a block without transactions instead of
/// indexing past the end; the miner is read from the first (coinbase)
/// transaction.
pub fn render_block_notification(block: &BlockRecord) -> Result<String> {
    let height = block.header.height.0;
    let Some(coinbase) = block.transactions.first() else {
        return Err(Error::MalformedRecord(format!(
            "block {height} has no transactions"
        )));
    };

    let miner = shorten_address(&coinbase.recipient);
    let time = format_timestamp_nanos(coinbase.timestamp_nanos);

    Ok(format!(
        "\u{1F514}\u{1F514}\u{1F514} New Bil Block! \u{1F514}\u{1F514}\u{1F514}\n\
         Block Number: {height}\n\
         BlockReward: {BLOCK_REWARD_BIL} BIL\n\
         MinedBy: {miner}\n\
         Time: {time}"
    ))
}

/// Shorten an opaque ledger address for display: keep a short prefix and
/// suffix, elide the middle. Short addresses pass through untouched.
pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= ADDRESS_PREFIX_LEN + ADDRESS_SUFFIX_LEN {
        return address.to_string();
    }
    let prefix: String = chars[..ADDRESS_PREFIX_LEN].iter().collect();
    let suffix: String = chars[chars.len() - ADDRESS_SUFFIX_LEN..].iter().collect();
    format!("{prefix}...{suffix}")
}

/// Convert a nanosecond epoch timestamp to local calendar time.
pub fn format_timestamp_nanos(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos)
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BlockHeader, BlockHeight, Transaction};

    const SAMPLE_NANOS: i64 = 1_700_000_000_000_000_000;

    fn sample_block(transactions: Vec<Transaction>) -> BlockRecord {
        BlockRecord {
            header: BlockHeader {
                height: BlockHeight(42),
                timestamp_nanos: SAMPLE_NANOS,
            },
            transactions,
        }
    }

    #[test]
    fn shorten_address_keeps_prefix_and_suffix() {
        let address = "abcdef0123456789abcdef0123456789";
        assert_eq!(shorten_address(address), "abcdef012345...23456789");
    }

    #[test]
    fn shorten_address_passes_short_values_through() {
        assert_eq!(shorten_address("abc"), "abc");
        assert_eq!(shorten_address(""), "");
    }

    #[test]
    fn notification_contains_height_reward_miner_and_time() {
        let block = sample_block(vec![Transaction {
            recipient: "abcdef0123456789abcdef0123456789".to_string(),
            timestamp_nanos: SAMPLE_NANOS,
        }]);

        let text = render_block_notification(&block).unwrap();
        assert!(text.contains("Block Number: 42"));
        assert!(text.contains("BlockReward: 600 BIL"));
        assert!(text.contains("abcdef012345...23456789"));
        // Nov 2023 in UTC; no local offset can move it out of 2023.
        assert!(text.contains("2023"));
        assert!(text.contains(&format_timestamp_nanos(SAMPLE_NANOS)));
    }

    #[test]
    fn empty_transaction_list_is_malformed_not_a_panic() {
        let err = render_block_notification(&sample_block(vec![])).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)));
    }

    #[test]
    fn notification_links_are_well_formed() {
        let links = notification_links();
        assert_eq!(links.len(), 3);
        assert!(links.iter().all(|l| l.url.starts_with("https://")));
    }
}
