use std::fmt::Write as _;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

/// Destination for periodic traffic aggregates
pub trait MetricsSink: Send + 'static {
    /// Add `value` to counter `name`.
    fn count(&self, name: &str, value: u64, tags: &[String]);
    /// Set gauge `name` to `value`.
    fn gauge(&self, name: &str, value: u64, tags: &[String]);
}

/// Fire-and-forget DogStatsD client over UDP
///
/// Datagrams look like `shunt.request.count:3|c|#module:shunt,appid:abc`.
/// Send errors are logged at debug and never retried.
#[derive(Debug)]
pub struct StatsdSink {
    socket: UdpSocket,
    namespace: String,
    tags: Vec<String>,
}

impl StatsdSink {
    /// Bind an ephemeral local socket and connect it to `addr`.
    ///
    /// The first resolved address wins; the local socket uses its family.
    pub async fn connect(addr: &str, namespace: String, tags: Vec<String>) -> io::Result<Self> {
        let target = lookup_host(addr).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{addr} did not resolve"))
        })?;
        let socket = UdpSocket::bind(local_bind_for(&target)).await?;
        socket.connect(target).await?;
        Ok(Self { socket, namespace, tags })
    }

    fn send(&self, name: &str, value: u64, kind: &str, tags: &[String]) {
        let line = format_line(&self.namespace, name, value, kind, &self.tags, tags);
        if let Err(e) = self.socket.try_send(line.as_bytes()) {
            debug!(error = %e, metric = name, "statsd send failed");
        }
    }
}

impl MetricsSink for StatsdSink {
    fn count(&self, name: &str, value: u64, tags: &[String]) {
        self.send(name, value, "c", tags);
    }

    fn gauge(&self, name: &str, value: u64, tags: &[String]) {
        self.send(name, value, "g", tags);
    }
}

/// Wildcard address with an ephemeral port, in the family of `target`
fn local_bind_for(target: &SocketAddr) -> SocketAddr {
    let ip = match target {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

/// Render one DogStatsD line
pub fn format_line(
    namespace: &str,
    name: &str,
    value: u64,
    kind: &str,
    constant_tags: &[String],
    tags: &[String],
) -> String {
    let mut line = format!("{namespace}{name}:{value}|{kind}");
    let mut all = constant_tags.iter().chain(tags.iter()).peekable();
    if all.peek().is_some() {
        line.push_str("|#");
        for (i, tag) in all.enumerate() {
            if i > 0 {
                line.push(',');
            }
            let _ = write!(line, "{tag}");
        }
    }
    line
}

/// One emitted sample, as recorded by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub kind: SampleKind,
    pub name: String,
    pub value: u64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Count,
    Gauge,
}

/// In-memory sink; clones share the recorded samples
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<Sample> {
        match self.samples.lock() {
            Ok(mut s) => std::mem::take(&mut *s),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn push(&self, kind: SampleKind, name: &str, value: u64, tags: &[String]) {
        let sample = Sample { kind, name: name.to_string(), value, tags: tags.to_vec() };
        match self.samples.lock() {
            Ok(mut s) => s.push(sample),
            Err(poisoned) => poisoned.into_inner().push(sample),
        }
    }
}

impl MetricsSink for RecordingSink {
    fn count(&self, name: &str, value: u64, tags: &[String]) {
        self.push(SampleKind::Count, name, value, tags);
    }

    fn gauge(&self, name: &str, value: u64, tags: &[String]) {
        self.push(SampleKind::Gauge, name, value, tags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_with_constant_and_call_tags() {
        let line = format_line(
            "shunt.",
            "request.count",
            3,
            "c",
            &["module:shunt".to_string()],
            &["appid:abc".to_string()],
        );
        assert_eq!(line, "shunt.request.count:3|c|#module:shunt,appid:abc");
    }

    #[test]
    fn line_without_tags() {
        assert_eq!(format_line("", "num.source", 0, "g", &[], &[]), "num.source:0|g");
    }

    #[test]
    fn local_bind_follows_target_family() {
        let v4: SocketAddr = "10.0.0.5:8125".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::5]:8125".parse().unwrap();
        assert_eq!(local_bind_for(&v4), "0.0.0.0:0".parse::<SocketAddr>().unwrap());
        assert_eq!(local_bind_for(&v6), "[::]:0".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn statsd_sink_reaches_ipv6_target() -> io::Result<()> {
        // hosts without an IPv6 loopback cannot run this
        let Ok(receiver) = UdpSocket::bind("[::1]:0").await else {
            return Ok(());
        };
        let addr = receiver.local_addr()?.to_string();
        let sink = StatsdSink::connect(&addr, String::new(), Vec::new()).await?;

        sink.count("request.count", 1, &[]);

        let mut buf = [0u8; 64];
        let n = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no datagram"))??;
        assert_eq!(&buf[..n], b"request.count:1|c");
        Ok(())
    }

    #[tokio::test]
    async fn statsd_sink_sends_datagram() -> io::Result<()> {
        let receiver = UdpSocket::bind("127.0.0.1:0").await?;
        let addr = receiver.local_addr()?.to_string();
        let sink = StatsdSink::connect(&addr, "shunt.".into(), vec!["module:shunt".into()]).await?;

        sink.gauge("num.source", 2, &["appid:abc".to_string()]);

        let mut buf = [0u8; 256];
        let n = tokio::time::timeout(std::time::Duration::from_secs(2), receiver.recv(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no datagram"))??;
        assert_eq!(&buf[..n], b"shunt.num.source:2|g|#module:shunt,appid:abc");
        Ok(())
    }
}
