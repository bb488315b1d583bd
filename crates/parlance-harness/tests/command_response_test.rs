//! Command/response correlation over the simulated network.

use parlance_client::{Client, ClientConfig, NoopHandler, SessionError};
use parlance_harness::{SimServer, SimTransport};

fn client_config() -> ClientConfig {
    ClientConfig { host: "server".to_string(), ..ClientConfig::default() }
}

#[test]
fn commands_resolve_with_correlated_replies() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        SimServer::default()
            .serve("0.0.0.0:8080", |cmd| Ok(cmd.to_ascii_uppercase()))
            .await?;
        Ok(())
    });

    sim.client("client", async {
        let client = Client::connect(SimTransport, client_config(), &b"token"[..], NoopHandler);

        let first = client.command(&b"status"[..]).await?;
        assert_eq!(&first[..], b"STATUS");

        let second = client.command(&b"uptime"[..]).await?;
        assert_eq!(&second[..], b"UPTIME");

        client.shutdown().await;
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn concurrent_commands_each_get_their_own_reply() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        SimServer::default().serve("0.0.0.0:8080", |cmd| Ok(cmd.to_vec())).await?;
        Ok(())
    });

    sim.client("client", async {
        let client = Client::connect(SimTransport, client_config(), &b"token"[..], NoopHandler);

        // Interleave several in-flight commands; replies must correlate
        // by sequence, not by arrival order.
        let (a, b, c) = tokio::join!(
            client.command(&b"alpha"[..]),
            client.command(&b"beta"[..]),
            client.command(&b"gamma"[..]),
        );
        assert_eq!(&a?[..], b"alpha");
        assert_eq!(&b?[..], b"beta");
        assert_eq!(&c?[..], b"gamma");

        client.shutdown().await;
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn peer_error_frame_rejects_the_waiter() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        SimServer::default()
            .serve("0.0.0.0:8080", |cmd| {
                if cmd == b"forbidden" {
                    Err("denied".to_string())
                } else {
                    Ok(b"ok".to_vec())
                }
            })
            .await?;
        Ok(())
    });

    sim.client("client", async {
        let client = Client::connect(SimTransport, client_config(), &b"token"[..], NoopHandler);

        let err = client.command(&b"forbidden"[..]).await.unwrap_err();
        assert_eq!(err, SessionError::Rejected { message: "denied".to_string() });

        // The connection survives a peer rejection.
        let ok = client.command(&b"allowed"[..]).await?;
        assert_eq!(&ok[..], b"ok");

        client.shutdown().await;
        Ok(())
    });

    sim.run().unwrap();
}

#[test]
fn rejected_credentials_end_the_client() {
    let mut sim = turmoil::Builder::new().build();

    sim.host("server", || async {
        SimServer { accept_auth: false, ..SimServer::default() }
            .serve("0.0.0.0:8080", |_| Ok(Vec::new()))
            .await?;
        Ok(())
    });

    sim.client("client", async {
        let client = Client::connect(SimTransport, client_config(), &b"bad"[..], NoopHandler);

        // Auth rejection is terminal: queued commands are drained with a
        // connection-closed rejection and no reconnect is attempted.
        let err = client.command(&b"status"[..]).await.unwrap_err();
        assert_eq!(err, SessionError::ConnectionClosed);
        Ok(())
    });

    sim.run().unwrap();
}
