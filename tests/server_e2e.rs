#[cfg(test)]
mod server_tests {
    use fault_tolerant_server::protocol::{FrameCodec, PeerFrame};
    use fault_tolerant_server::server::{self, ServerState};
    use fault_tolerant_server::tracer;
    use futures::{SinkExt, StreamExt};
    use std::future::Future;
    use std::net::SocketAddr;
    use std::sync::Once;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{sleep, timeout};
    use tokio_util::codec::Framed;

    type Conn = Framed<TcpStream, FrameCodec>;

    static TRACING: Once = Once::new();

    fn init_tracing() {
        TRACING.call_once(|| {
            let _x = tracer::setup_simple_tracing();
        });
    }

    // --- Test Helper: Start server on random port ---
    async fn start_server(max_clients: usize) -> (SocketAddr, ServerState) {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = ServerState::new(max_clients);

        tokio::spawn(server::serve(listener, state.clone()));

        (addr, state)
    }

    async fn identify(addr: SocketAddr, token: &str) -> anyhow::Result<Conn> {
        let socket = TcpStream::connect(addr).await?;
        let mut conn = Framed::new(socket, FrameCodec::peer());
        conn.send(PeerFrame::Identify(token.to_string())).await?;
        Ok(conn)
    }

    async fn recv(conn: &mut Conn) -> anyhow::Result<Option<String>> {
        let frame = timeout(Duration::from_secs(2), conn.next()).await?;
        Ok(frame.transpose()?)
    }

    async fn request(conn: &mut Conn, text: &str) -> anyhow::Result<String> {
        conn.send(PeerFrame::Request(text.to_string())).await?;
        recv(conn)
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed while waiting for reply"))
    }

    async fn heartbeat(conn: &mut Conn) -> anyhow::Result<Option<String>> {
        conn.send(PeerFrame::Heartbeat).await?;
        recv(conn).await
    }

    /// True when the server closed (or reset) the connection.
    async fn is_closed(conn: &mut Conn) -> bool {
        match timeout(Duration::from_secs(2), conn.next()).await {
            Err(_elapsed) => false,
            Ok(None) => true,
            Ok(Some(Err(_))) => true,
            Ok(Some(Ok(_))) => false,
        }
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..100 {
            if condition().await {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    fn state_in(reply: &str) -> u64 {
        reply
            .rsplit("Current state: ")
            .next()
            .and_then(|n| n.trim().parse().ok())
            .expect("reply carries the counter")
    }

    #[tokio::test]
    async fn round_trip_uppercases_and_increments() -> anyhow::Result<()> {
        let (addr, state) = start_server(4).await;
        let before = state.counter().await;

        let mut conn = identify(addr, "round-trip").await?;
        let reply = request(&mut conn, "hello").await?;

        assert!(reply.contains("HELLO"), "reply was {reply}");
        assert!(state_in(&reply) > before);
        assert_eq!(reply, "Server reply to C1: HELLO. Current state: 1");
        Ok(())
    }

    #[tokio::test]
    async fn two_clients_share_one_counter() -> anyhow::Result<()> {
        let (addr, state) = start_server(4).await;

        let mut a = identify(addr, "client-a").await?;
        let mut b = identify(addr, "client-b").await?;

        let reply_a = request(&mut a, "ping").await?;
        assert!(reply_a.contains("PING"));
        assert_eq!(state_in(&reply_a), 1);

        let reply_b = request(&mut b, "foo").await?;
        assert!(reply_b.contains("FOO"));
        assert_eq!(state_in(&reply_b), 2);

        assert_eq!(state.counter().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_clients_get_distinct_counter_values() -> anyhow::Result<()> {
        let (addr, state) = start_server(8).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            handles.push(tokio::spawn(async move {
                let mut conn = identify(addr, &format!("worker-{i}")).await?;
                let mut seen = Vec::new();
                for n in 0..10 {
                    let reply = request(&mut conn, &format!("msg {n}")).await?;
                    seen.push(state_in(&reply));
                }
                anyhow::Ok(seen)
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            let seen = handle.await??;
            // per connection replies are strictly ordered
            assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
            all.extend(seen);
        }
        all.sort_unstable();
        assert_eq!(all, (1..=80).collect::<Vec<u64>>());
        assert_eq!(state.counter().await, 80);
        Ok(())
    }

    #[tokio::test]
    async fn reconnect_keeps_handle() -> anyhow::Result<()> {
        let (addr, state) = start_server(4).await;

        let mut alpha = identify(addr, "alpha").await?;
        let reply = request(&mut alpha, "first").await?;
        assert!(reply.starts_with("Server reply to C1:"));
        drop(alpha);

        wait_until(|| {
            let state = state.clone();
            async move { state.active_sessions().await == 0 }
        })
        .await;

        let mut alpha = identify(addr, "alpha").await?;
        let reply = request(&mut alpha, "second").await?;
        assert_eq!(reply, "Server reply to C1: SECOND. Current state: 2");

        let mut beta = identify(addr, "beta").await?;
        let reply = request(&mut beta, "third").await?;
        assert!(reply.starts_with("Server reply to C2:"));

        assert_eq!(state.registered_clients().await, 2);
        Ok(())
    }

    #[tokio::test]
    async fn admission_refused_at_capacity() -> anyhow::Result<()> {
        let (addr, state) = start_server(1).await;

        let mut first = identify(addr, "first").await?;
        request(&mut first, "occupy").await?;

        // a new identity and the already-known one are both refused
        let mut newcomer = identify(addr, "newcomer").await?;
        assert!(is_closed(&mut newcomer).await);
        let mut twin = identify(addr, "first").await?;
        assert!(is_closed(&mut twin).await);

        assert_eq!(state.active_sessions().await, 1);
        assert_eq!(state.registered_clients().await, 1);

        // the admitted session is unaffected
        let reply = request(&mut first, "still here").await?;
        assert_eq!(state_in(&reply), 2);
        Ok(())
    }

    #[tokio::test]
    async fn single_watchdog_slot() -> anyhow::Result<()> {
        let (addr, state) = start_server(1).await;

        let mut lfd = identify(addr, "LFD").await?;
        assert_eq!(recv(&mut lfd).await?.as_deref(), Some("LFD_ACCEPTED"));
        assert_eq!(heartbeat(&mut lfd).await?.as_deref(), Some("ALIVE"));

        let mut second = identify(addr, "LFD").await?;
        assert_eq!(recv(&mut second).await?.as_deref(), Some("LFD_REFUSED"));
        assert!(is_closed(&mut second).await);

        // occupant unaffected
        assert_eq!(heartbeat(&mut lfd).await?.as_deref(), Some("ALIVE"));

        drop(lfd);
        wait_until(|| {
            let state = state.clone();
            async move { state.watchdog().await.is_none() }
        })
        .await;

        let mut third = identify(addr, "LFD").await?;
        assert_eq!(recv(&mut third).await?.as_deref(), Some("LFD_ACCEPTED"));
        Ok(())
    }

    #[tokio::test]
    async fn watchdog_ignores_unexpected_frames() -> anyhow::Result<()> {
        let (addr, state) = start_server(1).await;

        let mut lfd = identify(addr, "LFD").await?;
        assert_eq!(recv(&mut lfd).await?.as_deref(), Some("LFD_ACCEPTED"));

        lfd.send(PeerFrame::Request("status?".into())).await?;
        assert_eq!(heartbeat(&mut lfd).await?.as_deref(), Some("ALIVE"));

        // watchdog traffic never touches the counter
        assert_eq!(state.counter().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn watchdog_does_not_take_client_capacity() -> anyhow::Result<()> {
        let (addr, _state) = start_server(1).await;

        let mut lfd = identify(addr, "LFD").await?;
        assert_eq!(recv(&mut lfd).await?.as_deref(), Some("LFD_ACCEPTED"));

        let mut client = identify(addr, "only-client").await?;
        let reply = request(&mut client, "hi").await?;
        assert!(reply.contains("HI"));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_identification_closes_connection() -> anyhow::Result<()> {
        let (addr, state) = start_server(1).await;

        let socket = TcpStream::connect(addr).await?;
        let mut conn = Framed::new(socket, FrameCodec::peer());
        conn.send(PeerFrame::Request("hello".into())).await?;

        assert!(is_closed(&mut conn).await);
        assert_eq!(state.registered_clients().await, 0);
        assert_eq!(state.counter().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn request_split_across_writes_counts_once() -> anyhow::Result<()> {
        let (addr, state) = start_server(1).await;

        let mut conn = identify(addr, "split-writer").await?;
        conn.get_mut().write_all(b"hel").await?;
        sleep(Duration::from_millis(100)).await;
        conn.get_mut().write_all(b"lo\n").await?;

        let reply = recv(&mut conn).await?;
        assert_eq!(
            reply.as_deref(),
            Some("Server reply to C1: HELLO. Current state: 1")
        );
        // nothing else is on the way
        assert!(
            timeout(Duration::from_millis(300), conn.next())
                .await
                .is_err()
        );
        assert_eq!(state.counter().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn undelimited_peer_gets_one_reply_per_write() -> anyhow::Result<()> {
        let (addr, state) = start_server(1).await;

        let socket = TcpStream::connect(addr).await?;
        let mut conn = Framed::new(socket, FrameCodec::peer());
        conn.get_mut().write_all(b"IDENTIFY:legacy").await?;
        wait_until(|| {
            let state = state.clone();
            async move { state.active_sessions().await == 1 }
        })
        .await;

        conn.get_mut().write_all(b"ping").await?;
        assert_eq!(
            recv(&mut conn).await?.as_deref(),
            Some("Server reply to C1: PING. Current state: 1")
        );
        Ok(())
    }
}
