//! Integration-Test: kompletter Server-Start mit Weiterleitung eines Offers

use std::time::Duration;

use callbridge_call::RelayConnection;
use callbridge_protocol::events::OfferRequest;
use callbridge_protocol::{ClientEvent, EventName, RelayEvent, SdpType, SessionDescription};
use callbridge_server::{config::ServerConfig, Server};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(5);

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.netzwerk.bind_adresse = "127.0.0.1".into();
    config.netzwerk.tcp_port = 0;
    config.observability.aktiviert = false;
    config
}

#[tokio::test]
async fn offer_wird_ueber_den_server_zugestellt() {
    let laufend = Server::neu(test_config()).binden().await.unwrap();

    let a = RelayConnection::connect(laufend.signaling_adresse).await.unwrap();
    let b = RelayConnection::connect(laufend.signaling_adresse).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _abo = b.on(EventName::Offer, move |event| {
        let _ = tx.send(event);
    });

    a.send(ClientEvent::Offer(OfferRequest {
        from: a.socket_id().clone(),
        to: b.socket_id().clone(),
        offer: SessionDescription::new(SdpType::Offer, "v=0"),
    }))
    .await
    .unwrap();

    let event = tokio::time::timeout(TIMEOUT, rx.recv())
        .await
        .expect("Offer nicht zugestellt")
        .unwrap();
    match event {
        RelayEvent::Offer(offer) => {
            assert_eq!(&offer.from_socket_id, a.socket_id());
            assert_eq!(offer.offer.sdp, "v=0");
        }
        andere => panic!("unerwartetes Event: {:?}", andere),
    }
    assert_eq!(laufend.state.registry.len(), 1);

    a.close().await;
    b.close().await;
    laufend.stoppen().await;
}

#[tokio::test]
async fn volles_relay_lehnt_weitere_endpunkte_ab() {
    let mut config = test_config();
    config.server.max_clients = 1;
    let laufend = Server::neu(config).binden().await.unwrap();

    let erster = RelayConnection::connect(laufend.signaling_adresse).await.unwrap();
    let zweiter = RelayConnection::connect(laufend.signaling_adresse).await;
    assert!(zweiter.is_err(), "zweiter Endpunkt darf kein Connected erhalten");
    assert_eq!(laufend.state.broadcaster.endpoint_anzahl(), 1);

    erster.close().await;
    laufend.stoppen().await;
}
