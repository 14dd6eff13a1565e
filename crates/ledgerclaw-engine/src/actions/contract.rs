//! `contract_call` — sign, submit and await an on-chain invocation.

use std::time::Duration;

use ledgerclaw_core::traits::{LedgerClient, TransactionSigner};
use ledgerclaw_core::{ActionConfig, ActionError, ContractInvocation, Hash160};
use serde_json::Value;

/// How long to wait for a submitted transaction to land in a block.
#[derive(Debug, Clone, Copy)]
pub struct Confirmation {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for Confirmation {
    fn default() -> Self {
        Self {
            attempts: 60,
            interval: Duration::from_secs(1),
        }
    }
}

/// `0x`-prefixed hashes are big-endian, bare ones little-endian.
pub fn parse_contract_hash(raw: &str) -> Result<Hash160, ActionError> {
    raw.parse::<Hash160>()
        .map_err(|e| ActionError::InvalidContractHash(format!("{raw}: {e}")))
}

/// Decode the call parameters into an invocation signed by `signer`.
pub fn build_invocation(
    config: &ActionConfig,
    signer: Hash160,
    network_magic: u32,
) -> Result<ContractInvocation, ActionError> {
    let contract_hash = parse_contract_hash(config.str_param("contract_hash")?)?;
    let method = config.str_param("method")?;
    let args = config
        .parameters
        .get("parameters")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Ok(ContractInvocation {
        contract_hash,
        method: method.to_string(),
        args,
        signer,
        network_magic,
    })
}

pub async fn call_contract(
    ledger: &dyn LedgerClient,
    signer: &dyn TransactionSigner,
    network_magic: u32,
    confirmation: Confirmation,
    config: &ActionConfig,
) -> Result<Value, ActionError> {
    let invocation = build_invocation(config, signer.account(), network_magic)?;
    let signed = signer.sign(&invocation)?;
    let tx_hash = ledger.send_raw_transaction(&signed).await?;
    tracing::info!(
        "📤 Sent {}.{} as {}",
        invocation.contract_hash,
        invocation.method,
        tx_hash
    );

    for attempt in 1..=confirmation.attempts {
        tokio::time::sleep(confirmation.interval).await;
        match ledger.transaction_height(&tx_hash).await {
            Ok(Some(height)) => {
                tracing::info!("✅ {tx_hash} confirmed in block {height}");
                return Ok(serde_json::json!({
                    "tx_hash": tx_hash,
                    "block_height": height,
                }));
            }
            Ok(None) => {}
            Err(e) => tracing::debug!("Confirmation check {attempt} for {tx_hash} failed: {e}"),
        }
    }

    Err(ActionError::TransactionNotConfirmed {
        tx_hash,
        attempts: confirmation.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(params: Value) -> ActionConfig {
        ActionConfig {
            action_type: "contract_call".into(),
            parameters: params.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_hash_endianness() {
        let be = parse_contract_hash("0xd2a4cff31913016155e38e474a2c06d08be276cf").unwrap();
        let le = parse_contract_hash("cf76e28bd0062c4a478ee35561011319f3cfa4d2").unwrap();
        assert_eq!(be, le);
        assert!(matches!(
            parse_contract_hash("0x1234"),
            Err(ActionError::InvalidContractHash(_))
        ));
    }

    #[test]
    fn test_build_invocation() {
        let cfg = config(json!({
            "contract_hash": "0xd2a4cff31913016155e38e474a2c06d08be276cf",
            "method": "transfer",
            "parameters": ["alice", 10]
        }));
        let inv = build_invocation(&cfg, Hash160::ZERO, 860833102).unwrap();
        assert_eq!(inv.method, "transfer");
        assert_eq!(inv.args, vec![json!("alice"), json!(10)]);
        assert_eq!(inv.network_magic, 860833102);

        // parameters is optional
        let cfg = config(json!({
            "contract_hash": "0xd2a4cff31913016155e38e474a2c06d08be276cf",
            "method": "ping"
        }));
        assert!(build_invocation(&cfg, Hash160::ZERO, 0).unwrap().args.is_empty());
    }

    #[test]
    fn test_missing_fields() {
        let cfg = config(json!({"method": "ping"}));
        assert_eq!(
            build_invocation(&cfg, Hash160::ZERO, 0),
            Err(ActionError::MissingParameter("contract_hash".into()))
        );
        let cfg = config(json!({"contract_hash": "0xd2a4cff31913016155e38e474a2c06d08be276cf"}));
        assert_eq!(
            build_invocation(&cfg, Hash160::ZERO, 0),
            Err(ActionError::MissingParameter("method".into()))
        );
    }
}
