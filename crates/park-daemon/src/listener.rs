//! MQTT bus listener.
//!
//! - One long-lived client; every ConnAck (first connect and each reconnect)
//!   re-subscribes both topics, since sessions are clean.
//! - Each publish is admitted on the event-loop task, which fixes its turn
//!   in arrival order, then handled in its own task, at most
//!   `max_in_flight` at a time. When the limit is reached the event loop is
//!   not polled.
//! - Connection errors are retried with capped exponential backoff; the
//!   delay resets after a successful ConnAck.
//! - Shutdown stops polling, drains in-flight tasks, then disconnects.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use park_config::{IngestSettings, ResolvedSecrets};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::ingest::Ingestor;

/// Requests buffered between `AsyncClient` and the event loop.
const CLIENT_CHANNEL_CAP: usize = 64;

/// Largest accepted packet; illegal batches can carry many cars.
const MAX_PACKET_BYTES: usize = 256 * 1024;

const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Delay before reconnect attempt `attempt` (0-based): `base * 2^attempt`,
/// capped at `max`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Connection options from settings and resolved credentials.
pub fn mqtt_options(settings: &IngestSettings, secrets: &ResolvedSecrets) -> MqttOptions {
    let bus = &settings.bus;
    let client_id = bus.client_id.clone().unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("park-ingest-{}", &id[..8])
    });

    let mut opts = MqttOptions::new(client_id, bus.host.clone(), bus.port);
    opts.set_keep_alive(Duration::from_secs(bus.keep_alive_secs.max(5)));
    opts.set_clean_session(true);
    opts.set_max_packet_size(MAX_PACKET_BYTES, MAX_PACKET_BYTES);

    if let Some(user) = &secrets.bus_username {
        opts.set_credentials(
            user.clone(),
            secrets.bus_password.clone().unwrap_or_default(),
        );
    }
    if bus.tls {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub struct BusListener {
    ingestor: Ingestor,
    options: MqttOptions,
    in_flight: Arc<Semaphore>,
}

impl BusListener {
    pub fn new(ingestor: Ingestor, options: MqttOptions) -> Self {
        let max = ingestor.context().settings.ingest.max_in_flight;
        Self {
            ingestor,
            options,
            in_flight: Arc::new(Semaphore::new(max)),
        }
    }

    /// Run until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let ctx = Arc::clone(self.ingestor.context());
        let topics = ctx.settings.topics.clone();
        let reconnect = ctx.settings.bus.reconnect.clone();

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), CLIENT_CHANNEL_CAP);
        let (host, port) = self.options.broker_address();
        info!(host = %host, port, status_topic = %topics.status, illegal_topic = %topics.illegal, "bus listener starting");

        let mut tasks = JoinSet::new();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            reap_finished(&mut tasks);

            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                ev = eventloop.poll() => ev,
            };

            match event {
                // A refused CONNACK surfaces as `ConnectionError::ConnectionRefused`
                // in the error arm, so every ConnAck seen here is accepted.
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    attempt = 0;
                    info!(session_present = ack.session_present, "bus connected; subscribing");
                    for topic in [&topics.status, &topics.illegal] {
                        // try_subscribe: the request is queued for this same
                        // event loop, so it must not await.
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            warn!(topic = %topic, error = %e, "subscribe request failed");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let permit = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        permit = Arc::clone(&self.in_flight).acquire_owned() => {
                            permit.context("in-flight semaphore closed")?
                        }
                    };
                    let msg = self.ingestor.admit(&p.topic, &p.payload);
                    let ingestor = self.ingestor.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        ingestor.dispatch(msg).await;
                    });
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    info!(pkid = ack.pkid, return_codes = ?ack.return_codes, "subscription acknowledged");
                }
                Ok(_) => {}
                Err(e) => {
                    let delay = backoff_delay(attempt, reconnect.base_ms, reconnect.max_ms);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "bus connection error; reconnecting");
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(in_flight = tasks.len(), "bus listener stopping; draining in-flight messages");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "message task failed");
            }
        }

        disconnect(&client, &mut eventloop).await;
        info!(stats = ?ctx.stats.snapshot(), "bus listener stopped");
        Ok(())
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(res) = tasks.try_join_next() {
        if let Err(e) = res {
            error!(error = %e, "message task failed");
        }
    }
}

/// Queue a DISCONNECT and poll until it is written or the connection is gone.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if let Err(e) = client.try_disconnect() {
        warn!(error = %e, "disconnect request failed");
        return;
    }
    let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        warn!("bus disconnect not confirmed before timeout");
    }
}
