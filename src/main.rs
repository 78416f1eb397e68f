#![allow(missing_docs)]

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    url_monitor_lib::run().await
}
