mod announcer;
mod interface;
mod render;
mod session;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use netump_protocol::endpoint::{DeviceIdentity, DiscoveryFilter, EndpointInfo, EndpointResponder, UmpSink};
use netump_protocol::mdns::ProductInstanceId;
use netump_protocol::netump::{decode_datagram, SIGNATURE};
use netump_protocol::ringbuf::{ump_ring_buffer, PushError, UmpConsumer, UmpProducer, DEFAULT_QUEUE_WORDS};
use netump_protocol::ump::{classify, Inbound};

use crate::announcer::ServiceAnnouncer;
use crate::interface::InterfaceInfo;
use crate::render::{JackNotifications, RenderCycle};
use crate::session::UmpLink;

/// Largest datagram we expect from a peer.
const RECV_BUFFER_BYTES: usize = 2048;

/// How often the render → network queue is drained.
const OUTBOUND_TICK: Duration = Duration::from_millis(1);

#[derive(Parser, Debug)]
#[command(name = "jacknetumpd", about = "JACK to Network UMP bridge", version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Remote Network UMP host (learned from the first datagram when unset)
    #[arg(long)]
    host: Option<String>,

    /// Local UDP port
    #[arg(long)]
    local_port: Option<u16>,

    /// Remote UDP port
    #[arg(long)]
    remote_port: Option<u16>,

    /// UMP endpoint name
    #[arg(long)]
    endpoint_name: Option<String>,

    /// Network interface used for the mDNS announcement
    #[arg(long)]
    interface: Option<String>,

    /// Do not announce the endpoint over mDNS
    #[arg(long)]
    no_announce: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub endpoint: EndpointSection,
    #[serde(default)]
    pub announce: AnnounceSection,
    #[serde(default)]
    pub jack: JackSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_port")]
    pub local_port: u16,
    #[serde(default)]
    pub remote_host: Option<String>,
    #[serde(default = "default_port")]
    pub remote_port: u16,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            local_port: netump_protocol::DEFAULT_LOCAL_PORT,
            remote_host: None,
            remote_port: netump_protocol::DEFAULT_REMOTE_PORT,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSection {
    #[serde(default = "default_endpoint_name")]
    pub name: String,
    /// Host name announced as `<hostname>.local` (system host name when unset)
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub info: EndpointInfo,
    #[serde(default)]
    pub identity: DeviceIdentity,
}

impl Default for EndpointSection {
    fn default() -> Self {
        Self {
            name: default_endpoint_name(),
            hostname: None,
            info: EndpointInfo::default(),
            identity: DeviceIdentity::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnounceSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_announce_interval")]
    pub interval_ms: u64,
    /// Interface name (first usable interface when unset)
    #[serde(default)]
    pub interface: Option<String>,
}

impl Default for AnnounceSection {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: netump_protocol::DEFAULT_ANNOUNCE_INTERVAL_MS,
            interface: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JackSection {
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_input_port")]
    pub input_port: String,
    #[serde(default = "default_output_port")]
    pub output_port: String,
    #[serde(default = "default_queue_words")]
    pub queue_words: usize,
}

impl Default for JackSection {
    fn default() -> Self {
        Self {
            client_name: default_client_name(),
            input_port: default_input_port(),
            output_port: default_output_port(),
            queue_words: DEFAULT_QUEUE_WORDS,
        }
    }
}

// Default value functions
fn default_port() -> u16 { netump_protocol::DEFAULT_LOCAL_PORT }
fn default_endpoint_name() -> String { netump_protocol::DEFAULT_ENDPOINT_NAME.to_string() }
fn default_true() -> bool { true }
fn default_announce_interval() -> u64 { netump_protocol::DEFAULT_ANNOUNCE_INTERVAL_MS }
fn default_client_name() -> String { "jacknetumpd".to_string() }
fn default_input_port() -> String { "netump_in".to_string() }
fn default_output_port() -> String { "netump_out".to_string() }
fn default_queue_words() -> usize { DEFAULT_QUEUE_WORDS }

impl Args {
    /// Command line values win over the file.
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(host) = &self.host {
            config.session.remote_host = Some(host.clone());
        }
        if let Some(port) = self.local_port {
            config.session.local_port = port;
        }
        if let Some(port) = self.remote_port {
            config.session.remote_port = port;
        }
        if let Some(name) = &self.endpoint_name {
            config.endpoint.name = name.clone();
        }
        if let Some(interface) = &self.interface {
            config.announce.interface = Some(interface.clone());
        }
        if self.no_announce {
            config.announce.enabled = false;
        }
    }
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DaemonConfig> {
    let Some(path) = path else {
        return Ok(DaemonConfig::default());
    };

    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        error!("Failed to read config file {:?}: {}", path, e);
        e
    })?;

    let config: DaemonConfig = toml::from_str(&config_str).map_err(|e| {
        error!("Failed to parse config: {}", e);
        e
    })?;

    if config.jack.queue_words <= netump_protocol::ump::MAX_UMP_WORDS {
        anyhow::bail!(
            "jack.queue_words must exceed {} (got {})",
            netump_protocol::ump::MAX_UMP_WORDS,
            config.jack.queue_words
        );
    }

    Ok(config)
}

/// What happened to one inbound UMP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// Endpoint Discovery request answered with this many notifications.
    Answered(usize),
    /// Queued for the render cycle.
    Queued,
    Dropped(PushError),
}

/// Answer discovery requests through `replies`, queue everything else.
fn dispatch(
    words: &[u32],
    responder: &EndpointResponder,
    replies: &mut impl UmpSink,
    queue: &mut UmpProducer,
) -> Dispatch {
    match classify(words) {
        Inbound::Discovery { filter_word } => {
            let filter = DiscoveryFilter::from_request(filter_word);
            Dispatch::Answered(responder.handle_discovery(filter, replies))
        }
        Inbound::PassThrough => match queue.push(words) {
            Ok(()) => Dispatch::Queued,
            Err(e) => Dispatch::Dropped(e),
        },
    }
}

fn handle_datagram(
    datagram: &[u8],
    src: SocketAddr,
    link: &mut UmpLink,
    responder: &EndpointResponder,
    queue: &mut UmpProducer,
) {
    if !datagram.starts_with(&SIGNATURE) {
        debug!(peer = %src, bytes = datagram.len(), "Ignoring non Network UMP datagram");
        return;
    }
    if !link.accept_from(src) {
        debug!(peer = %src, "Ignoring datagram from foreign peer");
        return;
    }

    let summary = decode_datagram(datagram, |_sequence, packet| {
        match dispatch(packet.words(), responder, &mut *link, queue) {
            Dispatch::Answered(count) => debug!(replies = count, "Endpoint discovery answered"),
            Dispatch::Dropped(PushError::Malformed) => debug!("Malformed UMP packet dropped"),
            // Overflow is reported from the drop counters
            Dispatch::Queued | Dispatch::Dropped(PushError::Full) => {}
        }
    });

    if let Some(summary) = summary {
        if summary.discarded_words > 0 {
            debug!(
                peer = %src,
                discarded = summary.discarded_words,
                "Truncated UMP packet discarded"
            );
        }
    }

    link.flush();
}

/// Overflow counters last reported, one per queue direction.
#[derive(Debug, Default)]
struct DropReport {
    inbound: u64,
    outbound: u64,
}

impl DropReport {
    fn check(&mut self, inbound: u64, outbound: u64) {
        if inbound != self.inbound {
            warn!(dropped = inbound - self.inbound, total = inbound, "Network → JACK queue overflow");
            self.inbound = inbound;
        }
        if outbound != self.outbound {
            warn!(dropped = outbound - self.outbound, total = outbound, "JACK → network queue overflow");
            self.outbound = outbound;
        }
    }
}

/// Pick the first IPv4 address for the configured remote host.
async fn resolve_peer(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve remote host {host}"))?;

    addrs
        .find(SocketAddr::is_ipv4)
        .with_context(|| format!("Remote host {host} has no IPv4 address"))
}

fn start_announcer(
    config: &DaemonConfig,
    interface: Option<&InterfaceInfo>,
    hostname: &str,
) -> Option<ServiceAnnouncer> {
    if !config.announce.enabled {
        info!("mDNS announcement disabled");
        return None;
    }
    let interface = interface?;

    match ServiceAnnouncer::initialize(
        interface,
        &config.endpoint.name,
        hostname,
        config.session.local_port,
    ) {
        Ok(announcer) => Some(announcer),
        Err(e) => {
            warn!("Continuing without mDNS announcement: {:#}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let mut config = load_config(args.config.as_ref()).await?;
    args.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("NETUMP_GIT_HASH"),
        endpoint = %config.endpoint.name,
        local_port = config.session.local_port,
        "jacknetumpd starting"
    );

    let interface = match interface::resolve(config.announce.interface.as_deref()) {
        Ok(found) => {
            info!(interface = %found.name, address = %found.ipv4, "Using network interface");
            Some(found)
        }
        Err(e) => {
            warn!("No usable network interface: {:#}", e);
            None
        }
    };
    let hostname = config
        .endpoint
        .hostname
        .clone()
        .or_else(interface::system_hostname)
        .unwrap_or_else(|| "zynthian".to_string());

    let instance_id = ProductInstanceId::from_mac(interface.as_ref().map_or([0; 6], |i| i.mac));
    let responder = EndpointResponder::new(
        &config.endpoint.name,
        instance_id.hex_digits(),
        config.endpoint.info,
        config.endpoint.identity,
    );

    let mut announcer = start_announcer(&config, interface.as_ref(), &hostname);

    // Network → JACK and JACK → network queues
    let (mut to_render, from_network) = ump_ring_buffer(config.jack.queue_words);
    let (to_network, mut from_render) = ump_ring_buffer(config.jack.queue_words);

    let peer = match &config.session.remote_host {
        Some(host) => Some(resolve_peer(host, config.session.remote_port).await?),
        None => None,
    };
    let mut link = UmpLink::bind(config.session.local_port, peer).await?;
    info!(
        local = %link.local_addr()?,
        peer = ?link.peer(),
        "Network UMP link ready"
    );

    let shutdown = Arc::new(Notify::new());
    let jack_client = start_jack(&config, from_network, to_network, Arc::clone(&shutdown))?;

    let mut recv_buf = vec![0u8; RECV_BUFFER_BYTES];
    let mut outbound_tick = tokio::time::interval(OUTBOUND_TICK);
    outbound_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut announce_tick = tokio::time::interval(Duration::from_millis(config.announce.interval_ms.max(1)));
    announce_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut drops = DropReport::default();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            received = link.recv(&mut recv_buf) => match received {
                Ok((len, src)) => {
                    handle_datagram(&recv_buf[..len], src, &mut link, &responder, &mut to_render);
                }
                Err(e) => warn!("Network UMP receive failed: {}", e),
            },
            _ = outbound_tick.tick() => {
                forward_outbound(&mut from_render, &mut link);
                drops.check(to_render.dropped(), from_render.dropped());
            }
            _ = announce_tick.tick(), if announcer.is_some() => {
                if let Some(announcer) = &announcer {
                    announcer.broadcast();
                }
            }
            _ = shutdown.notified() => {
                warn!("JACK server shut down");
                break;
            }
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                break;
            }
        }
    }

    if let Err(e) = jack_client.deactivate() {
        warn!("JACK deactivate failed: {}", e);
    }
    if let Some(announcer) = announcer.as_mut() {
        announcer.terminate();
    }

    info!(sent = link.datagrams_sent(), "jacknetumpd stopped");
    Ok(())
}

/// Connect to the running JACK server and start the render cycle.
fn start_jack(
    config: &DaemonConfig,
    from_network: UmpConsumer,
    to_network: UmpProducer,
    shutdown: Arc<Notify>,
) -> anyhow::Result<jack::AsyncClient<JackNotifications, RenderCycle>> {
    let (client, status) = jack::Client::new(&config.jack.client_name, jack::ClientOptions::NO_START_SERVER)
        .context("Failed to connect to JACK server")?;
    debug!(?status, "JACK client opened");

    let midi_in = client
        .register_port(&config.jack.input_port, jack::MidiIn::default())
        .with_context(|| format!("Failed to register JACK port {}", config.jack.input_port))?;
    let midi_out = client
        .register_port(&config.jack.output_port, jack::MidiOut::default())
        .with_context(|| format!("Failed to register JACK port {}", config.jack.output_port))?;

    info!(
        client = %client.name(),
        sample_rate = client.sample_rate(),
        buffer_size = client.buffer_size(),
        "JACK client ready"
    );

    let render = RenderCycle::new(from_network, to_network, midi_in, midi_out);
    client
        .activate_async(JackNotifications::new(shutdown), render)
        .context("Failed to activate JACK client")
}

/// Send everything the render cycle queued since the last tick.
fn forward_outbound(from_render: &mut UmpConsumer, link: &mut UmpLink) {
    let forwarded = from_render.drain(|words| link.queue_words(words));
    if forwarded > 0 {
        link.flush();
    }
}
