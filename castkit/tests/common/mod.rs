//! Shared test harness: one client wired to a mock peer, with the dispatch
//! loop running on a dedicated thread the way the lifecycle runs it.

use std::sync::Arc;
use std::thread::JoinHandle;

use castkit::mock::{stream_pair, MockPeer};
use castkit::{Client, Serializer};

pub fn connected_client() -> (Arc<Client>, MockPeer, JoinHandle<()>) {
    let (stream, peer) = stream_pair();
    let closer = stream.closer();
    let serializer = Arc::new(Serializer::new(Box::new(stream), Box::new(closer)));
    let client = Arc::new(Client::new(serializer));

    let dispatcher = std::thread::spawn({
        let client = Arc::clone(&client);
        move || while client.dispatch().is_ok() {}
    });
    (client, peer, dispatcher)
}
