//! Sends one request to a running nrpd and prints what comes back.
//!
//! Usage: cargo run --example probe -- 127.0.0.1:7777 [entropy-bytes]

use nrp_common::entries::decode_peers;
use nrp_common::types::MAX_RESPONSE_MESSAGE_SIZE;
use nrp_common::{Direction, MsgType, Packet, PacketBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let target: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:7777".into())
        .parse()?;
    let size: u8 = match args.next() {
        Some(s) => s.parse()?,
        None => 32,
    };

    let mut b = PacketBuilder::new(Direction::Request, 64);
    b.entropy_request(size)?;
    b.peers_request(MsgType::Ip4Peers, 0)?;
    b.peers_request(MsgType::Ip6Peers, 0)?;
    let request = b.finish()?;

    let bind = if target.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    let socket = UdpSocket::bind(bind).await?;
    socket.send_to(&request, target).await?;
    println!("sent {} byte request to {}", request.len(), target);

    let mut buf = vec![0u8; MAX_RESPONSE_MESSAGE_SIZE];
    let (n, from) =
        tokio::time::timeout(Duration::from_secs(3), socket.recv_from(&mut buf)).await??;
    println!("received {} bytes from {}", n, from);

    let packet = Packet::parse(&buf[..n], Direction::Response)?;
    for msg in packet.messages() {
        match msg.msg_type() {
            Some(MsgType::Entropy) => {
                let hex: String = msg.content().iter().map(|b| format!("{b:02x}")).collect();
                println!("  entropy ({} bytes): {}", msg.content().len(), hex);
            }
            Some(t @ (MsgType::Ip4Peers | MsgType::Ip6Peers)) => {
                let peers = decode_peers(t, msg.content())?;
                println!("  {:?}: {} peers", t, peers.len());
                for p in peers {
                    println!("    {p}");
                }
            }
            Some(MsgType::Reject) => {
                for entry in msg.reject_entries().unwrap_or_default() {
                    println!("  reject: {:?} {:?}", entry.msg_type(), entry.reason());
                }
            }
            other => println!("  unexpected message {:?}", other),
        }
    }
    Ok(())
}
