use std::error::Error;

use fiber_sdk::stream::client::RelayClient;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn main() -> Result<(), Box<dyn Error>> {
    let api_key = "REPLACE_WITH_API_KEY".to_string();
    let max_transactions = 25_usize;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let connection = RelayClient::new(SecretString::new(api_key))
            .connect()
            .await?;

        let cancel = CancellationToken::new();
        let (feed_tx, mut feed_rx) = mpsc::channel(256);
        let (result, ()) = tokio::join!(
            connection.subscribe_new_transactions(None, feed_tx, cancel.clone()),
            async {
                let mut seen = 0;
                while let Some(tx) = feed_rx.recv().await {
                    println!(
                        "hash={} type={:?} nonce={} to={:?}",
                        tx.hash(),
                        tx.tx_type(),
                        tx.nonce(),
                        tx.to()
                    );
                    seen += 1;
                    if seen == max_transactions {
                        cancel.cancel();
                    }
                }
            }
        );

        connection.close().await;
        result?;
        Ok::<(), Box<dyn Error>>(())
    })
}
