//! Binary entrypoint that wires the seedgate services together and blocks
//! until shutdown.

mod bootstrap;
mod servables;
mod supervisor;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::run().await
}
