use std::error::Error;

use fiber_sdk::stream::client::RelayClient;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn main() -> Result<(), Box<dyn Error>> {
    let api_key = "REPLACE_WITH_API_KEY".to_string();
    let max_blocks = 3_usize;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let connection = RelayClient::new(SecretString::new(api_key))
            .connect()
            .await?;

        let cancel = CancellationToken::new();
        let (payload_tx, mut payload_rx) = mpsc::channel(16);
        let (beacon_tx, mut beacon_rx) = mpsc::channel(16);

        let (payloads, beacon_blocks, ()) = tokio::join!(
            connection.subscribe_execution_payloads(payload_tx, cancel.clone()),
            connection.subscribe_beacon_blocks(beacon_tx, cancel.clone()),
            async {
                let mut seen = 0;
                loop {
                    tokio::select! {
                        Some(payload) = payload_rx.recv() => {
                            println!(
                                "block={} hash={} txs={} withdrawals={}",
                                payload.header.block_number,
                                payload.header.block_hash,
                                payload.transactions.len(),
                                payload.withdrawals.len(),
                            );
                            seen += 1;
                            if seen == max_blocks {
                                cancel.cancel();
                            }
                        }
                        Some(block) = beacon_rx.recv() => {
                            println!(
                                "slot={} proposer={} execution_block_hash={}",
                                block.slot, block.proposer_index, block.execution_block_hash,
                            );
                        }
                        else => break,
                    }
                }
            }
        );

        connection.close().await;
        payloads?;
        beacon_blocks?;
        Ok::<(), Box<dyn Error>>(())
    })
}
