mod backend;
mod dispatcher;
mod host;
mod location;
mod mirror;
mod provisioning;
mod session;
mod setup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
