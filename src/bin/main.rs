use std::path::PathBuf;

use mio::Poll;
use origin_server::{config, config::display::display_config, error::Result, server::Server};

fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "server.conf".to_string());

    let servers = config::load(&PathBuf::from(&config_path))?;
    display_config(&servers);

    let poll = Poll::new()?;
    let mut server = Server::new(servers, &poll)?;
    server.install_signal_handlers()?;
    server.run(poll)
}
