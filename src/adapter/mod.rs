//! Transport adapters (C6): the per-attempt state holder that binds a socket
//! to a Connection. See `stream`, `datagram`, and `demux` for the three
//! backends unified here.

pub(crate) mod datagram;
pub(crate) mod demux;
pub(crate) mod multicast;
pub(crate) mod stream;

use crate::message::MessageContext;
use crate::Result;
use datagram::DatagramAdapter;
use demux::DemuxAdapter;
use multicast::McastAdapter;
use std::net::SocketAddr;
use stream::StreamAdapter;

/// The transport backend bound to one Connection, once a racing candidate
/// has won or a listener has accepted/demuxed/joined an inbound flow.
pub(crate) enum Adapter {
    Stream(StreamAdapter),
    Datagram(DatagramAdapter),
    Demux(DemuxAdapter),
    Multicast(McastAdapter),
}

impl Adapter {
    pub(crate) async fn write(&self, data: &[u8], context: &MessageContext, eom: bool) -> Result<()> {
        match self {
            Adapter::Stream(s) => s.write(data, context, eom).await,
            Adapter::Datagram(d) => d.write(data).await,
            Adapter::Demux(d) => d.write(data).await,
            Adapter::Multicast(m) => m.write(data).await,
        }
    }

    pub(crate) async fn read(
        &self,
        min_incomplete: usize,
        max_length: Option<usize>,
    ) -> Result<(Vec<u8>, MessageContext, bool)> {
        match self {
            Adapter::Stream(s) => s.read(min_incomplete, max_length).await,
            Adapter::Datagram(d) => d.read().await,
            Adapter::Demux(d) => d.read().await,
            Adapter::Multicast(m) => m.read().await,
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        match self {
            Adapter::Stream(s) => s.close().await,
            Adapter::Datagram(d) => d.close().await,
            Adapter::Demux(d) => d.close().await,
            Adapter::Multicast(m) => m.close().await,
        }
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Adapter::Stream(s) => s.peer_addr(),
            Adapter::Datagram(d) => d.peer_addr(),
            Adapter::Demux(d) => d.peer_addr(),
            Adapter::Multicast(m) => m.peer_addr(),
        }
    }

    pub(crate) fn is_datagram(&self) -> bool {
        matches!(
            self,
            Adapter::Datagram(_) | Adapter::Demux(_) | Adapter::Multicast(_)
        )
    }
}
