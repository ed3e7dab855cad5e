/*!
 * Demo CLI: connects to a deployment named by a `mongodb://` connection
 * string, waits for a server to become selectable, and pings it.
 *
 * Grounded in the teacher's `main.rs::run_server_mode` logging-then-start
 * shape, inverted from "bind and accept" into "parse options and dial out".
 */

use mongo_driver_core::client::Client;
use mongo_driver_core::logger::{init_tracing, LogLevel};

#[tokio::main]
async fn main() -> mongo_driver_core::error::Result<()> {
    init_tracing(LogLevel::Info);

    let uri = std::env::args().nth(1).unwrap_or_else(|| "mongodb://localhost:27017".to_string());
    tracing::info!(%uri, "connecting");

    let client = Client::with_uri_str(&uri)?;
    client.ping().await?;

    tracing::info!("ping succeeded");
    Ok(())
}
