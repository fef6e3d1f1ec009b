// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the MQTT session using mockforge-mqtt and a
//! scripted in-process broker.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mockforge_mqtt::broker::MqttConfig;
use mockforge_mqtt::start_mqtt_server;
use mqtt_session::{
    ConnectionState, Error, ProtocolError, PublishOutcome, QoS, ReconnectionPolicy, Session,
    SessionError,
};
use tokio::time::sleep;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Helper to find an available port for testing.
fn get_test_port() -> u16 {
    use std::sync::atomic::{AtomicU16, Ordering};
    static PORT_COUNTER: AtomicU16 = AtomicU16::new(18950);
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Starts a mock MQTT broker on the given port.
async fn start_mock_broker(port: u16) {
    let config = MqttConfig {
        port,
        host: "127.0.0.1".to_string(),
        ..Default::default()
    };

    tokio::spawn(async move {
        let _ = start_mqtt_server(config).await;
    });

    // Give the broker time to start, bind to port, and be ready to accept connections
    sleep(Duration::from_millis(500)).await;
}

fn collect_states(session: &Session) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    let _handle = session.listen_connection_state(move |state| {
        sink.lock().unwrap().push(state);
    });
    states
}

// ============================================================================
// Connection lifecycle
// ============================================================================

mod connection {
    use super::*;

    #[tokio::test]
    async fn init_connects_to_broker() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let endpoint = format!("mqtt://127.0.0.1:{port}");
        let session = Session::init(&endpoint, Some("init_test"), None, None, true)
            .await
            .unwrap();

        session
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
            .await
            .unwrap();
        assert!(session.is_connected());
        assert_eq!(session.config().client_id(), "init_test");
    }

    #[tokio::test]
    async fn connect_with_tcp_scheme_and_without_scheme() {
        let port = get_test_port();
        start_mock_broker(port).await;

        for endpoint in [format!("tcp://127.0.0.1:{port}"), format!("127.0.0.1:{port}")] {
            let session = Session::builder().endpoint(endpoint).build().await.unwrap();
            session
                .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn listener_sees_connecting_then_connected() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let session = Session::builder()
            .endpoint(format!("mqtt://127.0.0.1:{port}"))
            .build_without_connect()
            .unwrap();
        let states = collect_states(&session);

        session.connect().await.unwrap();
        session
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(
            *states.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
    }

    #[tokio::test]
    async fn disconnect_does_not_reconnect() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let session = Session::builder()
            .endpoint(format!("mqtt://127.0.0.1:{port}"))
            .reconnection(ReconnectionPolicy::new().with_initial_delay(Duration::from_millis(100)))
            .build()
            .await
            .unwrap();
        session
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
            .await
            .unwrap();

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        sleep(Duration::from_millis(500)).await;
        assert_eq!(session.state(), ConnectionState::Disconnected);

        // Connecting again is allowed after a deliberate disconnect
        session.connect().await.unwrap();
        session
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_broker_reports_connection_failure() {
        // Nothing listens on this port
        let port = get_test_port();

        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&diagnostics);
        let session = Session::builder()
            .endpoint(format!("127.0.0.1:{port}"))
            .reconnection(ReconnectionPolicy::disabled())
            .on_diagnostic(move |e| sink.lock().unwrap().push(e.clone()))
            .build()
            .await
            .unwrap();

        session
            .wait_for_state(ConnectionState::Disconnected, CONNECT_TIMEOUT)
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;

        let diagnostics = diagnostics.lock().unwrap();
        assert!(
            diagnostics
                .iter()
                .any(|e| matches!(e, SessionError::ConnectionFailure(_))),
            "expected a connection failure, got {diagnostics:?}"
        );
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn malformed_endpoint_is_rejected() {
        let result = Session::init("ws://127.0.0.1:1883", None, None, None, false).await;
        assert!(matches!(
            result,
            Err(Error::Protocol(ProtocolError::InvalidAddress(_)))
        ));
    }
}

// ============================================================================
// Subscriptions and publishing
// ============================================================================

mod traffic {
    use super::*;

    async fn connected_session(port: u16) -> Session {
        start_mock_broker(port).await;
        let session = Session::builder()
            .endpoint(format!("mqtt://127.0.0.1:{port}"))
            .build()
            .await
            .unwrap();
        session
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn subscribe_while_connected() {
        let session = connected_session(get_test_port()).await;

        session
            .subscribe([("sensors/+/temp", QoS::AtLeastOnce)], false)
            .await
            .unwrap();
        session
            .subscribe([("sensors/+/temp", QoS::AtLeastOnce)], false)
            .await
            .unwrap();

        let desired = session.subscriptions().await.unwrap();
        assert_eq!(desired.len(), 1);
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn publish_while_connected_is_sent() {
        let session = connected_session(get_test_port()).await;

        let outcome = session
            .publish("sensors/kitchen/temp", "21.5", QoS::AtMostOnce, false)
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Sent);
    }

    #[tokio::test]
    async fn buffered_publishes_flush_on_connect() {
        let port = get_test_port();
        start_mock_broker(port).await;

        let session = Session::builder()
            .endpoint(format!("mqtt://127.0.0.1:{port}"))
            .build_without_connect()
            .unwrap();

        for i in 0..3 {
            let outcome = session
                .publish("queue/test", i.to_string(), QoS::AtLeastOnce, false)
                .await
                .unwrap();
            assert_eq!(outcome, PublishOutcome::Buffered);
        }
        assert_eq!(session.buffered_count().await.unwrap(), 3);

        session.connect().await.unwrap();
        session
            .wait_for_state(ConnectionState::Connected, CONNECT_TIMEOUT)
            .await
            .unwrap();

        assert_eq!(session.buffered_count().await.unwrap(), 0);
    }
}

// ============================================================================
// Reconnects and request backpressure against a scripted broker
// ============================================================================

mod scripted {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    type Subscribes = Arc<Mutex<Vec<Vec<String>>>>;

    /// Speaks just enough MQTT 3.1.1 to accept connections and subscriptions.
    ///
    /// Records the filters of every SUBSCRIBE packet, one list per accepted
    /// connection.
    struct ScriptedBroker {
        port: u16,
        subscribes: Subscribes,
    }

    impl ScriptedBroker {
        /// Starts the broker. With `drop_first_after`, the first connection is
        /// closed once it has acknowledged that many SUBSCRIBE packets.
        async fn start(drop_first_after: Option<usize>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            let subscribes: Subscribes = Arc::default();

            let record = Arc::clone(&subscribes);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let slot = {
                        let mut all = record.lock().unwrap();
                        all.push(Vec::new());
                        all.len() - 1
                    };
                    let close_after = if slot == 0 { drop_first_after } else { None };
                    tokio::spawn(serve(stream, Arc::clone(&record), slot, close_after));
                }
            });

            Self { port, subscribes }
        }

        fn endpoint(&self) -> String {
            format!("mqtt://127.0.0.1:{}", self.port)
        }

        fn subscribes(&self) -> Vec<Vec<String>> {
            self.subscribes.lock().unwrap().clone()
        }

        /// Polls the recorded SUBSCRIBE filters until `done` holds or the
        /// connect timeout passes.
        async fn wait_until(&self, done: impl Fn(&[Vec<String>]) -> bool) {
            let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
            while !done(&self.subscribes()) && tokio::time::Instant::now() < deadline {
                sleep(Duration::from_millis(20)).await;
            }
        }
    }

    async fn serve(
        mut stream: TcpStream,
        record: Subscribes,
        slot: usize,
        close_after: Option<usize>,
    ) {
        let mut acked = 0_usize;
        while let Ok((header, body)) = read_packet(&mut stream).await {
            let reply = match header >> 4 {
                // CONNECT
                1 => vec![0x20, 0x02, 0x00, 0x00],
                // SUBSCRIBE
                8 => {
                    let (pkid, filters) = subscribe_filters(&body);
                    let granted = filters.len();
                    record.lock().unwrap()[slot].extend(filters);
                    acked += 1;

                    let mut ack = vec![0x90, u8::try_from(2 + granted).unwrap()];
                    ack.extend_from_slice(&pkid.to_be_bytes());
                    ack.extend(vec![0x01; granted]);
                    ack
                }
                // PINGREQ
                12 => vec![0xD0, 0x00],
                // DISCONNECT
                14 => return,
                _ => continue,
            };
            if stream.write_all(&reply).await.is_err() {
                return;
            }
            if close_after.is_some_and(|n| acked >= n) {
                return;
            }
        }
    }

    async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
        let header = stream.read_u8().await?;
        let mut len = 0_usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await?;
            len |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; len];
        stream.read_exact(&mut body).await?;
        Ok((header, body))
    }

    /// Splits a SUBSCRIBE body into its packet id and topic filters.
    fn subscribe_filters(body: &[u8]) -> (u16, Vec<String>) {
        let pkid = u16::from_be_bytes([body[0], body[1]]);
        let mut filters = Vec::new();
        let mut pos = 2;
        while pos + 2 <= body.len() {
            let len = usize::from(u16::from_be_bytes([body[pos], body[pos + 1]]));
            pos += 2;
            filters.push(String::from_utf8_lossy(&body[pos..pos + len]).into_owned());
            // Skip the requested QoS byte
            pos += len + 1;
        }
        (pkid, filters)
    }

    #[tokio::test]
    async fn lost_connection_reconnects_and_resubscribes_once() {
        let broker = ScriptedBroker::start(Some(2)).await;

        let session = Session::builder()
            .endpoint(broker.endpoint())
            .client_id("scripted_reconnect")
            .reconnection(ReconnectionPolicy::new().with_initial_delay(Duration::from_millis(100)))
            .build_without_connect()
            .unwrap();
        let states = collect_states(&session);
        session
            .subscribe([("a/b", QoS::AtLeastOnce), ("c/#", QoS::AtLeastOnce)], false)
            .await
            .unwrap();

        session.connect().await.unwrap();
        broker
            .wait_until(|seen| seen.get(1).is_some_and(|second| second.len() >= 2))
            .await;
        // Leave room for any duplicate SUBSCRIBE to show up
        sleep(Duration::from_millis(200)).await;

        let expected = vec!["a/b".to_string(), "c/#".to_string()];
        assert_eq!(broker.subscribes(), vec![expected.clone(), expected]);
        assert_eq!(
            *states.lock().unwrap(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn resync_larger_than_request_queue_reaches_broker() {
        let broker = ScriptedBroker::start(None).await;

        let diagnostics = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&diagnostics);
        let session = Session::builder()
            .endpoint(broker.endpoint())
            .client_id("scripted_backpressure")
            .request_capacity(2)
            .on_diagnostic(move |e| sink.lock().unwrap().push(e.clone()))
            .build_without_connect()
            .unwrap();

        let filters = ["t/0", "t/1", "t/2", "t/3", "t/4"];
        session
            .subscribe(filters.map(|f| (f, QoS::AtLeastOnce)), false)
            .await
            .unwrap();
        session.connect().await.unwrap();

        broker
            .wait_until(|seen| seen.first().is_some_and(|first| first.len() >= filters.len()))
            .await;
        sleep(Duration::from_millis(100)).await;

        assert_eq!(broker.subscribes(), vec![filters.map(String::from).to_vec()]);
        let diagnostics = diagnostics.lock().unwrap();
        assert!(
            diagnostics.is_empty(),
            "unexpected diagnostics: {diagnostics:?}"
        );
        assert!(session.is_connected());
    }
}
