use rand::{rngs::StdRng, SeedableRng};
use std::{error::Error, net::TcpListener, sync::Arc};
use vm_node::{
    config::Config,
    engine::Engine,
    inventory::Inventory,
    net::{Directory, Receiver, Sender},
    reservation::ReservationStore,
    ThreadJoin,
};

fn main() -> Result<(), Box<dyn Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_owned());
    let config = match Config::load_toml_file(&path) {
        Ok(config) => config,
        Err(_) => Config::load_toml_file("vm-node/config.toml")?,
    };

    let inventory = Inventory::new(config.drinks.iter().map(|d| (d.code.clone(), d.quantity)));
    let reservations = ReservationStore::new(StdRng::from_entropy());
    let directory = Arc::new(Directory::new(config.peers.clone()));
    let sender = Sender::new(directory, config.connect_timeout);
    let engine = Arc::new(Engine::new(&config, inventory, reservations, sender));

    let mut receiver = Receiver::new(config.thread_count)?;
    engine.register_handlers(&mut receiver);

    let listener = TcpListener::bind(config.listen)?;
    println!("Machine {} listening on {}", config.id, config.listen);
    receiver.start(listener)?.join_and_format_error()?;

    Ok(())
}
