//! `mining.authorize` username grammar (spec.md §4.6):
//! `payout[,aux_payout][.worker][+pseudoshare_diff][/share_diff]`.
//!
//! Generalized from the teacher's `worker_name.split('.')` placeholder in
//! `mining/src/pool.rs::process_share`, which only ever recovered a worker
//! label and left the payout address as a `[0u8; 20]` stub. Here the payout
//! (and optional aux payout) address is decoded for real via
//! `p2pool_crypto::PayoutAddress` and turned into a P2PKH scriptPubKey, the
//! same script shape the teacher's `create_p2pkh_script` built.

use p2pool_crypto::{CryptoError, PayoutAddress};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUsername {
    pub payout_script: Vec<u8>,
    pub aux_payout_script: Option<Vec<u8>>,
    pub worker: Option<String>,
    pub pseudoshare_difficulty: Option<f64>,
    pub share_difficulty: Option<f64>,
}

/// Standard pay-to-pubkey-hash scriptPubKey: `OP_DUP OP_HASH160 <push 20>
/// <hash> OP_EQUALVERIFY OP_CHECKSIG`.
pub fn p2pkh_script(payload: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(0x76); // OP_DUP
    script.push(0xa9); // OP_HASH160
    script.push(0x14); // push 20 bytes
    script.extend_from_slice(payload);
    script.push(0x88); // OP_EQUALVERIFY
    script.push(0xac); // OP_CHECKSIG
    script
}

fn address_to_script(addr: &str) -> Result<Vec<u8>, CryptoError> {
    let decoded = PayoutAddress::from_base58check(addr)?;
    Ok(p2pkh_script(&decoded.payload))
}

/// Parse the username grammar. The optional suffixes are stripped from the
/// right (`share_diff`, then `pseudoshare_diff`, then `.worker`), leaving a
/// `payout[,aux_payout]` prefix that is decoded as base58check addresses.
pub fn parse_username(raw: &str) -> Result<ParsedUsername, CryptoError> {
    let mut rest = raw;

    let share_difficulty = if let Some(pos) = rest.rfind('/') {
        let (head, tail) = rest.split_at(pos);
        let value: f64 = tail[1..].parse().unwrap_or(0.0);
        rest = head;
        if value > 0.0 {
            Some(value)
        } else {
            None
        }
    } else {
        None
    };

    let pseudoshare_difficulty = if let Some(pos) = rest.rfind('+') {
        let (head, tail) = rest.split_at(pos);
        let value: f64 = tail[1..].parse().unwrap_or(0.0);
        rest = head;
        if value > 0.0 {
            Some(value)
        } else {
            None
        }
    } else {
        None
    };

    let worker = if let Some(pos) = rest.rfind('.') {
        let (head, tail) = rest.split_at(pos);
        let worker = tail[1..].to_string();
        rest = head;
        if worker.is_empty() {
            None
        } else {
            Some(worker)
        }
    } else {
        None
    };

    let (payout_part, aux_part) = match rest.split_once(',') {
        Some((payout, aux)) => (payout, Some(aux)),
        None => (rest, None),
    };

    let payout_script = address_to_script(payout_part)?;
    let aux_payout_script = match aux_part {
        Some(aux) if !aux.is_empty() => Some(address_to_script(aux)?),
        _ => None,
    };

    Ok(ParsedUsername {
        payout_script,
        aux_payout_script,
        worker,
        pseudoshare_difficulty,
        share_difficulty,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_address() -> String {
        PayoutAddress::new(0x00, [7u8; 20]).to_base58check()
    }

    #[test]
    fn parses_bare_payout_address() {
        let addr = sample_address();
        let parsed = parse_username(&addr).unwrap();
        assert_eq!(parsed.payout_script, p2pkh_script(&[7u8; 20]));
        assert!(parsed.aux_payout_script.is_none());
        assert!(parsed.worker.is_none());
    }

    #[test]
    fn parses_worker_and_difficulties() {
        let addr = sample_address();
        let raw = format!("{addr}.rig1+8/32");
        let parsed = parse_username(&raw).unwrap();
        assert_eq!(parsed.worker.as_deref(), Some("rig1"));
        assert_eq!(parsed.pseudoshare_difficulty, Some(8.0));
        assert_eq!(parsed.share_difficulty, Some(32.0));
    }

    #[test]
    fn parses_aux_payout() {
        let payout = sample_address();
        let aux = PayoutAddress::new(0x00, [9u8; 20]).to_base58check();
        let raw = format!("{payout},{aux}.worker1");
        let parsed = parse_username(&raw).unwrap();
        assert_eq!(parsed.aux_payout_script, Some(p2pkh_script(&[9u8; 20])));
        assert_eq!(parsed.worker.as_deref(), Some("worker1"));
    }

    #[test]
    fn rejects_malformed_address() {
        assert!(parse_username("not-a-valid-address").is_err());
    }
}
