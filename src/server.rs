use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::binding::IaType;
use crate::config::Config;
use crate::ddns::{DdnsUpdater, LoggingDdnsUpdater};
use crate::error::{Error, Result};
use crate::policy::Policy;
use crate::processor::{Inbound, ServerContext, process_v4, process_v6};
use crate::store::{self, LeaseStore};
use crate::v4::{Dhcp4Packet, MessageType};

const RECV_BUFFER_SIZE: usize = 1500;

/// All_DHCP_Relay_Agents_and_Servers (RFC 8415 §7.1).
pub const ALL_DHCP_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);

pub struct DhcpServer {
    ctx: Arc<ServerContext>,
    v4_socket: Option<Arc<UdpSocket>>,
    v6_socket: Option<Arc<UdpSocket>>,
    /// Bound to `server.v6_address`; messages arriving here were unicast.
    v6_unicast_socket: Option<Arc<UdpSocket>>,
}

impl DhcpServer {
    /// Opens the lease store, reconciles it against the pools and binds the
    /// sockets for each family that has pools.
    pub async fn new(config: Config) -> Result<Self> {
        let store = store::open(&config).await?;
        Self::with_store(config, store, Arc::new(LoggingDdnsUpdater)).await
    }

    pub async fn with_store(
        config: Config,
        store: Arc<dyn LeaseStore>,
        ddns: Arc<dyn DdnsUpdater>,
    ) -> Result<Self> {
        let ctx = Arc::new(ServerContext::new(config, store, ddns)?);
        ctx.reconcile().await?;

        let server = &ctx.config.server;
        let has_v4 = ctx.links.pools(IaType::V4).next().is_some();
        let has_v6 = [IaType::Na, IaType::Ta, IaType::Pd]
            .into_iter()
            .any(|ia_type| ctx.links.pools(ia_type).next().is_some());

        let v4_socket = if has_v4 {
            info!(
                "DHCPv4 server {} listening on port {}",
                server.v4_address.unwrap_or(Ipv4Addr::UNSPECIFIED),
                server.v4_port
            );
            Some(Arc::new(create_v4_socket(&ctx.config)?))
        } else {
            None
        };

        let (v6_socket, v6_unicast_socket) = if has_v6 {
            let multicast = create_v6_socket(&ctx.config, Ipv6Addr::UNSPECIFIED, true)?;
            let unicast = match server.v6_address {
                Some(address) => Some(Arc::new(create_v6_socket(&ctx.config, address, false)?)),
                None => None,
            };
            info!(
                "DHCPv6 server listening on [{}]:{}{}",
                ALL_DHCP_SERVERS,
                server.v6_port,
                server
                    .v6_address
                    .map(|address| format!(" and [{}]:{}", address, server.v6_port))
                    .unwrap_or_default()
            );
            (Some(Arc::new(multicast)), unicast)
        } else {
            (None, None)
        };

        for link in ctx.links.links() {
            info!("Link {} ({}) with {} pools", link.name, link.subnet, link.pools.len());
        }

        Ok(Self {
            ctx,
            v4_socket,
            v6_socket,
            v6_unicast_socket,
        })
    }

    /// Serves every socket and runs the reaper until a task fails.
    pub async fn run(&self) -> Result<()> {
        let mut tasks = JoinSet::new();
        let server = &self.ctx.config.server;

        if let Some(socket) = &self.v4_socket {
            tasks.spawn(serve_v4(self.ctx.clone(), socket.clone()));
        }
        let v6_local = IpAddr::V6(server.v6_address.unwrap_or(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0)));
        if let Some(socket) = &self.v6_socket {
            tasks.spawn(serve_v6(self.ctx.clone(), socket.clone(), v6_local, false));
        }
        if let Some(socket) = &self.v6_unicast_socket {
            tasks.spawn(serve_v6(self.ctx.clone(), socket.clone(), v6_local, true));
        }
        tasks.spawn(reap(self.ctx.clone()));

        info!("DHCP server ready and listening");

        match tasks.join_next().await {
            Some(Ok(result)) => result,
            Some(Err(error)) => Err(Error::Io(std::io::Error::other(error))),
            None => Ok(()),
        }
    }

    pub async fn save_leases(&self) -> Result<()> {
        self.ctx.store().save().await
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }
}

fn socket_error(what: &str, error: std::io::Error) -> Error {
    Error::Socket(format!("Failed to {}: {}", what, error))
}

fn create_v4_socket(config: &Config) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|error| socket_error("create socket", error))?;

    socket
        .set_reuse_address(true)
        .map_err(|error| socket_error("set SO_REUSEADDR", error))?;
    socket
        .set_broadcast(true)
        .map_err(|error| socket_error("set SO_BROADCAST", error))?;
    socket
        .set_nonblocking(true)
        .map_err(|error| socket_error("set non-blocking", error))?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.server.v4_port);
    socket
        .bind(&bind_addr.into())
        .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

    if let Some(interface_index) = config.server.interface_index {
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            if let Err(error) = set_interface_index(socket.as_raw_socket(), interface_index) {
                warn!("Failed to set interface index {}: {}", interface_index, error);
            }
        }
        #[cfg(not(windows))]
        {
            warn!(
                "interface_index ({}) is only supported on Windows and will be ignored",
                interface_index
            );
        }
    }

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|error| socket_error("convert to tokio socket", error))
}

/// Binds a DHCPv6 socket on `address`. The multicast socket joins
/// [`ALL_DHCP_SERVERS`] on the configured interface.
fn create_v6_socket(config: &Config, address: Ipv6Addr, multicast: bool) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|error| socket_error("create socket", error))?;

    socket
        .set_only_v6(true)
        .map_err(|error| socket_error("set IPV6_V6ONLY", error))?;
    socket
        .set_reuse_address(true)
        .map_err(|error| socket_error("set SO_REUSEADDR", error))?;
    socket
        .set_nonblocking(true)
        .map_err(|error| socket_error("set non-blocking", error))?;

    let bind_addr = SocketAddrV6::new(address, config.server.v6_port, 0, 0);
    socket
        .bind(&bind_addr.into())
        .map_err(|error| Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error)))?;

    if multicast {
        let interface = config.server.interface_index.unwrap_or(0);
        socket
            .join_multicast_v6(&ALL_DHCP_SERVERS, interface)
            .map_err(|error| socket_error("join ff02::1:2", error))?;
    }

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(|error| socket_error("convert to tokio socket", error))
}

/// Where a DHCPv4 reply goes (RFC 2131 §4.1): the relay when there is one,
/// broadcast for NAKs, broadcast-flagged clients and clients without an
/// address, and the client's address otherwise.
pub fn reply_destination(reply: &Dhcp4Packet, server_port: u16) -> SocketAddr {
    let client_port = server_port.wrapping_add(1);
    if reply.is_relayed() {
        SocketAddr::new(IpAddr::V4(reply.giaddr), server_port)
    } else if reply.message_type() == Some(MessageType::Nak)
        || reply.is_broadcast()
        || reply.ciaddr.is_unspecified()
    {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), client_port)
    } else {
        SocketAddr::new(IpAddr::V4(reply.ciaddr), client_port)
    }
}

/// DHCPv4 receive loop; one task per datagram.
pub async fn serve_v4(ctx: Arc<ServerContext>, socket: Arc<UdpSocket>) -> Result<()> {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];
    let local = IpAddr::V4(ctx.config.server.v4_address.unwrap_or(Ipv4Addr::UNSPECIFIED));
    let server_port = ctx.config.server.v4_port;

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, source)) => {
                let data = buffer[..size].to_vec();
                let ctx = ctx.clone();
                let socket = socket.clone();

                tokio::spawn(async move {
                    let inbound = Inbound {
                        local,
                        remote: source,
                        interface: ctx.config.server.interface.clone(),
                        unicast: false,
                    };
                    let Some(reply) = process_v4(&ctx, &data, &inbound).await else {
                        return;
                    };
                    let destination = reply_destination(&reply, server_port);
                    if let Err(error) = socket.send_to(&reply.encode(), destination).await {
                        warn!("Error sending reply to {}: {}", destination, error);
                    }
                });
            }
            Err(error) => {
                error!("Error receiving packet: {}", error);
            }
        }
    }
}

/// DHCPv6 receive loop. `local` is the address used for link resolution;
/// `unicast` marks the socket bound to the server's own address.
pub async fn serve_v6(
    ctx: Arc<ServerContext>,
    socket: Arc<UdpSocket>,
    local: IpAddr,
    unicast: bool,
) -> Result<()> {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];

    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, source)) => {
                let data = buffer[..size].to_vec();
                let ctx = ctx.clone();
                let socket = socket.clone();

                tokio::spawn(async move {
                    let inbound = Inbound {
                        local,
                        remote: source,
                        interface: ctx.config.server.interface.clone(),
                        unicast,
                    };
                    let Some(reply) = process_v6(&ctx, &data, &inbound).await else {
                        return;
                    };
                    debug!("{} to {}", reply.message_type, source);
                    if let Err(error) = socket.send_to(&reply.encode(), source).await {
                        warn!("Error sending reply to {}: {}", source, error);
                    }
                });
            }
            Err(error) => {
                error!("Error receiving packet: {}", error);
            }
        }
    }
}

/// Periodically returns expired leases to their pools and flushes the store.
pub async fn reap(ctx: Arc<ServerContext>) -> Result<()> {
    let seconds = ctx.global_scope().get_long(Policy::ReaperInterval).max(1);
    let mut interval = tokio::time::interval(Duration::from_secs(seconds as u64));
    interval.tick().await;

    loop {
        interval.tick().await;
        match ctx.reap_expired().await {
            Ok(0) => {}
            Ok(count) => info!("Reaper reclaimed {} leases", count),
            Err(error) => warn!("Reaper pass failed: {}", error),
        }
        if let Err(error) = ctx.store().save().await {
            warn!("Failed to save leases: {}", error);
        }
    }
}

#[cfg(windows)]
fn set_interface_index(raw_socket: std::os::windows::io::RawSocket, index: u32) -> Result<()> {
    use windows_sys::Win32::Networking::WinSock::{IPPROTO_IP, SOCKET, setsockopt};

    const IP_UNICAST_IF: i32 = 31;

    let index_bytes = index.to_be_bytes();
    let result = unsafe {
        setsockopt(
            raw_socket as SOCKET,
            IPPROTO_IP,
            IP_UNICAST_IF,
            index_bytes.as_ptr(),
            std::mem::size_of::<u32>() as i32,
        )
    };

    if result != 0 {
        return Err(Error::Socket(format!(
            "setsockopt IP_UNICAST_IF failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLeaseStore;
    use crate::v4::Dhcp4Option;
    use crate::v4::packet::{BOOTREQUEST, BROADCAST_FLAG, HLEN_ETHERNET, HTYPE_ETHERNET};
    use crate::v6::{Dhcp6Message, Dhcp6Option, Ia, MessageType as V6Type};

    fn request(flags: u16, ciaddr: Ipv4Addr, giaddr: Ipv4Addr) -> Dhcp4Packet {
        Dhcp4Packet {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: 0x12345678,
            secs: 0,
            flags,
            ciaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr,
            chaddr: [0xaa; 16],
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![Dhcp4Option::MessageType(MessageType::Request)],
        }
    }

    fn reply_for(request: &Dhcp4Packet, message_type: MessageType) -> Dhcp4Packet {
        let mut reply = Dhcp4Packet::create_reply(
            request,
            message_type,
            Ipv4Addr::new(192, 168, 1, 100),
            Ipv4Addr::new(192, 168, 1, 1),
            vec![],
        );
        reply.ciaddr = request.ciaddr;
        reply
    }

    #[test]
    fn test_reply_destination_broadcast() {
        let request = request(BROADCAST_FLAG, Ipv4Addr::UNSPECIFIED, Ipv4Addr::UNSPECIFIED);
        let reply = reply_for(&request, MessageType::Offer);
        assert_eq!(reply_destination(&reply, 67), "255.255.255.255:68".parse().unwrap());
    }

    #[test]
    fn test_reply_destination_relay() {
        let request = request(0, Ipv4Addr::UNSPECIFIED, Ipv4Addr::new(192, 168, 2, 1));
        let reply = reply_for(&request, MessageType::Offer);
        assert_eq!(reply_destination(&reply, 67), "192.168.2.1:67".parse().unwrap());
    }

    #[test]
    fn test_reply_destination_unicast_and_nak() {
        let ciaddr = Ipv4Addr::new(192, 168, 1, 100);
        let request = request(0, ciaddr, Ipv4Addr::UNSPECIFIED);
        let ack = reply_for(&request, MessageType::Ack);
        assert_eq!(reply_destination(&ack, 67), "192.168.1.100:68".parse().unwrap());

        let mut nak = reply_for(&request, MessageType::Nak);
        nak.ciaddr = Ipv4Addr::UNSPECIFIED;
        assert_eq!(reply_destination(&nak, 67), "255.255.255.255:68".parse().unwrap());
    }

    #[tokio::test]
    async fn test_serve_v6_answers_solicit() {
        let mut config = Config::default();
        config.leases_file = None;
        let ctx = Arc::new(
            ServerContext::new(
                config,
                Arc::new(MemoryLeaseStore::new()),
                Arc::new(LoggingDdnsUpdater),
            )
            .unwrap(),
        );
        let server = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let address = server.local_addr().unwrap();
        let local: IpAddr = "2001:db8:1::1".parse().unwrap();
        let task = tokio::spawn(serve_v6(ctx, server, local, false));

        let mut solicit = Dhcp6Message::new(V6Type::Solicit, 0x00abcd);
        solicit.options.push(Dhcp6Option::ClientId(vec![0, 3, 0, 1, 2, 0, 0, 0, 0, 1]));
        solicit.options.push(Dhcp6Option::Ia(Ia::empty(IaType::Na, 1)));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&solicit.encode(), address).await.unwrap();

        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let (size, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        let advertise = Dhcp6Message::parse(&buffer[..size]).unwrap();
        assert_eq!(advertise.message_type, V6Type::Advertise);
        assert_eq!(advertise.transaction_id, 0x00abcd);
        let ia = advertise.ias().next().unwrap();
        assert_eq!(
            ia.addresses().next().unwrap().address,
            "2001:db8:1::100".parse::<Ipv6Addr>().unwrap()
        );

        task.abort();
    }
}
