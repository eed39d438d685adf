use clap::Parser;
use redwire::config::Config;
use redwire::handler::RespHandler;
use redwire::{server, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::parse();
    let handler = RespHandler::from_config(&config);

    server::listen_and_serve_with_signal(&config, handler).await?;
    Ok(())
}
