// Integration tests for moderation replication between LAN peers

use airchat::chat::*;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

async fn loopback() -> UdpSocket {
    UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap()
}

/// Build a peer whose broadcasts go to `target`
async fn peer(name: &str, tag: &str, target: SocketAddr) -> LanPeer {
    LanPeer::with_socket(
        &PeerConfig::new(name),
        Identity::from_tag(tag),
        loopback().await,
        target,
    )
}

async fn next_line(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for peer")
        .expect("receiver stopped")
}

#[tokio::test]
async fn test_ban_reaches_only_peers_that_receive_it() {
    // C exists but nothing is ever sent to it
    let c = peer("carol", "cccc0003", "127.0.0.1:9".parse().unwrap()).await;

    let b_socket = loopback().await;
    let b_addr = b_socket.local_addr().unwrap();
    let b = LanPeer::with_socket(
        &PeerConfig::new("bob"),
        Identity::from_tag("bbbb0002"),
        b_socket,
        b_addr,
    );
    let (render_tx, mut render_rx) = mpsc::unbounded_channel();
    let receiver = b.spawn_receiver(render_tx);

    let a = peer("air", "aaaa0001", b_addr).await;
    let notice = a.handle_line("/ban 9.9.9.9").await.unwrap();
    assert_eq!(notice, "[System] admin air banned IP 9.9.9.9");

    assert_eq!(
        next_line(&mut render_rx).await,
        "[System] admin air banned IP 9.9.9.9"
    );

    assert!(a.replicator().is_banned("9.9.9.9").await);
    assert!(b.replicator().is_banned("9.9.9.9").await);
    assert!(!c.replicator().is_banned("9.9.9.9").await);

    // C converges once it sees an equivalent command
    c.replicator()
        .receive(b"ADMIN:aaaa0001:BAN:9.9.9.9:air")
        .await;
    assert!(c.replicator().is_banned("9.9.9.9").await);

    receiver.abort();
}

#[tokio::test]
async fn test_receive_loop_survives_noise_and_skips_echo() {
    let b_socket = loopback().await;
    let b_addr = b_socket.local_addr().unwrap();
    // B broadcasts to itself, like a real broadcast medium would
    let b = LanPeer::with_socket(
        &PeerConfig::new("bob"),
        Identity::from_tag("bbbb0002"),
        b_socket,
        b_addr,
    );
    let (render_tx, mut render_rx) = mpsc::unbounded_channel();
    let receiver = b.spawn_receiver(render_tx);

    let stranger = loopback().await;
    stranger.send_to(b"complete garbage", b_addr).await.unwrap();
    stranger
        .send_to(b"ADMIN:eeee0005:BAN:1.1.1.1:mallory", b_addr)
        .await
        .unwrap();

    // Our own chat comes back to us and must not be shown again
    assert_eq!(b.handle_line("hi all").await.as_deref(), Some("[bob]: hi all"));

    stranger
        .send_to(b"CHAT:eeee0005:[eve]: still here", b_addr)
        .await
        .unwrap();

    assert_eq!(next_line(&mut render_rx).await, "[eve]: still here");
    assert!(!b.replicator().is_banned("1.1.1.1").await);

    receiver.abort();
}

#[tokio::test]
async fn test_grant_then_delegate() {
    let b_socket = loopback().await;
    let b_addr = b_socket.local_addr().unwrap();
    let b = LanPeer::with_socket(
        &PeerConfig::new("bob"),
        Identity::from_tag("bbbb0002"),
        b_socket,
        b_addr,
    );
    let (render_tx, mut render_rx) = mpsc::unbounded_channel();
    let receiver = b.spawn_receiver(render_tx);

    let air = peer("air", "aaaa0001", b_addr).await;
    let dave = peer("dave", "dddd0004", b_addr).await;

    // dave is not an admin anywhere yet
    let refused = dave.handle_line("/ban 2.2.2.2").await.unwrap();
    assert!(refused.starts_with("[Error]"));

    air.handle_line("/op dave").await.unwrap();
    assert_eq!(next_line(&mut render_rx).await, "[System] dave is now an admin");
    assert!(b.replicator().is_admin("dave").await);

    // dave's own peer never heard the grant, so it still refuses locally
    let refused = dave.handle_line("/ban 2.2.2.2").await.unwrap();
    assert!(refused.starts_with("[Error]"));

    // A frame from dave is honoured by bob, whose roster now includes dave
    let frame = Envelope::admin(
        "dddd0004",
        ModerationCommand::new(Action::Ban, "2.2.2.2", "dave"),
    );
    let raw = loopback().await;
    raw.send_to(&frame.to_bytes(), b_addr).await.unwrap();
    assert_eq!(
        next_line(&mut render_rx).await,
        "[System] admin dave banned IP 2.2.2.2"
    );
    assert!(b.replicator().is_banned("2.2.2.2").await);

    air.handle_line("/deop dave").await.unwrap();
    assert_eq!(
        next_line(&mut render_rx).await,
        "[System] dave is no longer an admin"
    );
    assert!(!b.replicator().is_admin("dave").await);

    receiver.abort();
}

#[tokio::test]
async fn test_identical_command_applied_twice_is_noop() {
    let replicator = Replicator::new(
        Identity::from_tag("bbbb0002"),
        "bob",
        ModerationState::with_admins(["air"]),
    );
    let frame = b"ADMIN:aaaa0001:BAN:1.2.3.4:air";

    let first = replicator.receive(frame).await;
    let second = replicator.receive(frame).await;

    assert!(matches!(first, Inbound::Applied { changed: true, .. }));
    assert!(matches!(second, Inbound::Applied { changed: false, .. }));
    assert_eq!(replicator.state().read().await.bans().count(), 1);
}
