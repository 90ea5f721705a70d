use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::MAX_DATAGRAM_SIZE;
use super::stats::NetworkStats;

/// Raw datagram and the address it came from or goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub data: Vec<u8>,
}

/// Non-blocking UDP socket drained once per tick.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: Box<[u8]>,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            // one spare byte so oversized datagrams are detectable
            recv_buffer: vec![0u8; MAX_DATAGRAM_SIZE + 1].into_boxed_slice(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Datagram exceeds MTU",
            ));
        }

        let bytes = self.socket.send_to(data, addr)?;

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;

        Ok(bytes)
    }

    pub fn send(&mut self, datagram: &Datagram) -> io::Result<usize> {
        self.send_to(&datagram.data, datagram.addr)
    }

    /// Drains everything the OS has buffered without blocking.
    pub fn receive(&mut self) -> io::Result<Vec<Datagram>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    if size > MAX_DATAGRAM_SIZE {
                        self.stats.packets_dropped += 1;
                        continue;
                    }

                    self.stats.packets_received += 1;
                    self.stats.bytes_received += size as u64;
                    datagrams.push(Datagram {
                        addr,
                        data: self.recv_buffer[..size].to_vec(),
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }
}
