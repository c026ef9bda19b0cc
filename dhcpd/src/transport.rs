use std::net::{SocketAddrV4, UdpSocket};

use dhcp_core::{HardwareAddr, Transport};

/// Sends replies out the same bound DHCP socket the daemon listens on.
///
/// `send_packet_no_arp` is only overridden when `raw` is `Some`: reaching a
/// client that can't yet be ARPed for needs a raw socket framing its own
/// link-layer destination itself (`dhcp-raw` supplies the IP/UDP half of
/// that framing). Opening one needs `CAP_NET_RAW` and a named interface, so
/// without `--interface` the `Transport` default falls back to a normal
/// `send_packet`, which works on any network where the client accepts an
/// ARP request for the address it's about to receive.
pub struct UdpTransport<'a> {
    socket: &'a UdpSocket,
    raw: Option<&'a RawSocket>,
}

impl<'a> UdpTransport<'a> {
    pub fn new(socket: &'a UdpSocket, raw: Option<&'a RawSocket>) -> Self {
        Self { socket, raw }
    }
}

impl Transport for UdpTransport<'_> {
    fn send_packet(&mut self, _from: SocketAddrV4, to: SocketAddrV4, data: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(data, to)?;
        Ok(())
    }

    fn send_packet_no_arp(
        &mut self,
        from: SocketAddrV4,
        to: SocketAddrV4,
        to_hw: &HardwareAddr,
        data: &[u8],
    ) -> std::io::Result<()> {
        match self.raw {
            Some(raw) => raw.send(from, to, to_hw, data),
            None => self.send_packet(from, to, data),
        }
    }
}

#[cfg(target_os = "linux")]
mod raw {
    use std::ffi::CString;
    use std::net::SocketAddrV4;
    use std::os::fd::RawFd;

    use dhcp_core::HardwareAddr;

    /// An `AF_PACKET`/`SOCK_DGRAM` socket bound to one interface, used to
    /// reach a client by its hardware address directly instead of letting
    /// the kernel ARP for an address it doesn't have yet. The kernel fills
    /// in the Ethernet header from `sockaddr_ll`; the buffer handed to
    /// `sendto` only needs to be the IP packet, which `dhcp_raw::ip_udp_encode`
    /// builds. Mirrors the raw-socket idiom of `edge-nal-std`'s raw module,
    /// minus the async plumbing this engine has no use for.
    pub struct RawSocket {
        fd: RawFd,
        ifindex: u32,
    }

    impl RawSocket {
        pub fn bind(interface: &str) -> std::io::Result<Self> {
            let ifindex = interface_index(interface)?;

            // SAFETY: a single `socket(2)` call, no output pointers involved.
            let fd = unsafe {
                libc::socket(libc::PF_PACKET, libc::SOCK_DGRAM, (libc::ETH_P_IP as u16).to_be() as libc::c_int)
            };
            if fd < 0 {
                return Err(std::io::Error::last_os_error());
            }

            let sockaddr = libc::sockaddr_ll {
                sll_family: libc::AF_PACKET as u16,
                sll_protocol: (libc::ETH_P_IP as u16).to_be(),
                sll_ifindex: ifindex as i32,
                sll_hatype: 0,
                sll_pkttype: 0,
                sll_halen: 0,
                sll_addr: Default::default(),
            };

            // SAFETY: `sockaddr` is a valid `sockaddr_ll` of the size passed.
            let rc = unsafe {
                libc::bind(
                    fd,
                    &sockaddr as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err);
            }

            Ok(Self { fd, ifindex })
        }

        pub fn send(
            &self,
            from: SocketAddrV4,
            to: SocketAddrV4,
            to_hw: &HardwareAddr,
            data: &[u8],
        ) -> std::io::Result<()> {
            let mut buf = [0u8; 1500];
            let packet = dhcp_raw::ip_udp_encode(&mut buf, from, to, |out| {
                out[..data.len()].copy_from_slice(data);
                Ok(data.len())
            })
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

            let halen = (to_hw.hlen as usize).min(8);
            let mut sockaddr = libc::sockaddr_ll {
                sll_family: libc::AF_PACKET as u16,
                sll_protocol: (libc::ETH_P_IP as u16).to_be(),
                sll_ifindex: self.ifindex as i32,
                sll_hatype: 0,
                sll_pkttype: 0,
                sll_halen: halen as u8,
                sll_addr: Default::default(),
            };
            sockaddr.sll_addr[..halen].copy_from_slice(&to_hw.bytes()[..halen]);

            // SAFETY: `packet` and `sockaddr` both outlive the call.
            let rc = unsafe {
                libc::sendto(
                    self.fd,
                    packet.as_ptr() as *const libc::c_void,
                    packet.len(),
                    0,
                    &sockaddr as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };

            if rc < 0 {
                Err(std::io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }

    impl Drop for RawSocket {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }

    fn interface_index(name: &str) -> std::io::Result<u32> {
        let cname = CString::new(name)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "interface name contains a NUL"))?;

        // SAFETY: `cname` is a valid NUL-terminated C string for the call's duration.
        let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
        if index == 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(index)
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod raw {
    use std::net::SocketAddrV4;

    use dhcp_core::HardwareAddr;

    /// `AF_PACKET` is Linux-specific; elsewhere raw unicast-without-ARP
    /// just isn't available, and `--interface` is rejected at startup.
    pub struct RawSocket(());

    impl RawSocket {
        pub fn bind(_interface: &str) -> std::io::Result<Self> {
            Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "raw unicast-without-ARP sending needs AF_PACKET, which is Linux-only",
            ))
        }

        pub fn send(
            &self,
            _from: SocketAddrV4,
            _to: SocketAddrV4,
            _to_hw: &HardwareAddr,
            _data: &[u8],
        ) -> std::io::Result<()> {
            unreachable!("bind() never succeeds off Linux")
        }
    }
}

pub use raw::RawSocket;
