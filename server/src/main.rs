use clap::Parser;
use log::info;
use relay_server::{Config, Server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::parse();
    let server = Server::bind(config)?;

    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Interrupt received, shutting down...");
        handle.shutdown();
    })?;

    server.run()?;
    Ok(())
}
