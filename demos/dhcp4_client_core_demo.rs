// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use dhcp4_client_core::{
    Client, ClientConfig, EthernetDhcpSocket, JsonFileLeaseStore, State,
};

const TEST_NIC: &str = "dhcpcli";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    enable_log();

    let mut config = ClientConfig::new(TEST_NIC);
    config.set_lease_store(Arc::new(JsonFileLeaseStore::new(".")));

    let socket = EthernetDhcpSocket::open(TEST_NIC, [0, 1, 2, 3, 4, 5])?;
    let mut cli = Client::new(config, socket);

    cli.enter().await?;
    cli.wait_for_state(State::Bound, Duration::from_secs(60)).await?;
    println!("bound on {}, press enter to release and exit", cli.interface());

    let mut line = String::new();
    std::io::stdin().read_line(&mut line).ok();
    cli.exit().await;
    Ok(())
}

fn enable_log() {
    env_logger::Builder::new()
        .filter(Some("dhcp4_client_core"), log::LevelFilter::Debug)
        .init();
}
