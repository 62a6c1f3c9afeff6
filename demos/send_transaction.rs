use std::error::Error;

use alloy_primitives::{hex, Address, Bytes, U256};
use fiber_sdk::stream::client::RelayClient;
use fiber_sdk::tx::{DynamicFeeTx, Signature, Transaction};
use k256::ecdsa::SigningKey;
use secrecy::SecretString;

fn main() -> Result<(), Box<dyn Error>> {
    let api_key = "REPLACE_WITH_API_KEY".to_string();
    let private_key_hex = "REPLACE_WITH_PRIVATE_KEY_HEX".to_string();
    let recipient: Address = "REPLACE_WITH_RECIPIENT_ADDRESS".parse()?;
    let nonce = 0_u64;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let key = SigningKey::from_slice(&hex::decode(private_key_hex)?)?;
        let tx = Transaction::from(DynamicFeeTx {
            chain_id: 1,
            nonce,
            max_priority_fee_per_gas: U256::from(2_000_000_000_u64),
            max_fee_per_gas: U256::from(40_000_000_000_u64),
            gas_limit: 21_000,
            to: Some(recipient),
            value: U256::from(1_000_000_000_000_000_u64),
            input: Bytes::new(),
            access_list: Vec::new(),
            signature: Signature::default(),
        })
        .sign(&key)?;

        let client = RelayClient::new(SecretString::new(api_key));
        let connection = client.connect().await?;

        let single = connection.send_transaction(&tx).await;
        let raw = connection.send_raw_transaction(tx.encoded()).await;
        connection.close().await;

        let single = single?;
        println!("hash={} timestamp_us={}", single.hash, single.timestamp);
        match raw {
            Ok(result) => println!("raw hash={} timestamp_us={}", result.hash, result.timestamp),
            Err(err) => println!("raw resend rejected: {err}"),
        }
        Ok::<(), Box<dyn Error>>(())
    })
}
