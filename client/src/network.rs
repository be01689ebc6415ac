use crate::input::{InputFrame, InputManager};
use crate::prediction::ClientPrediction;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{self, Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use shared::{ModifierCategory, ModifierLevel, ModifierTable, ModifierTier, MovementConfig};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep};

/// Simulated network conditions applied on the client side
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkConditions {
    /// Round trip latency added in milliseconds, split evenly between directions
    pub fake_ping_ms: u64,
    /// Probability in `0..=1` that an outgoing move packet is dropped
    pub packet_loss: f64,
}

pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    connected: bool,

    config: MovementConfig,
    table: ModifierTable,
    prediction: Option<ClientPrediction>,
    input_manager: InputManager,

    link: LinkConditions,
    link_rng: StdRng,
    inbound: VecDeque<(Instant, Packet)>,
    dropped_packets: u32,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        config: MovementConfig,
        link: LinkConditions,
        seed: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr = server_addr.parse()?;
        let table = config.modifiers.build_table()?;

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            config,
            table,
            prediction: None,
            input_manager: InputManager::new(seed),
            link,
            link_rng: StdRng::seed_from_u64(seed.wrapping_add(1)),
            inbound: VecDeque::new(),
            dropped_packets: 0,
        })
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to server...");

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        self.send_packet(&packet)?;

        Ok(())
    }

    /// Encodes and sends a packet, delaying it by half the fake ping
    fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = protocol::encode(packet)?;
        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;
        let delay = Duration::from_millis(self.link.fake_ping_ms / 2);

        tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            if let Err(e) = socket.send_to(&data, server_addr).await {
                error!("Failed to send packet: {}", e);
            }
        });
        Ok(())
    }

    fn send_move(&mut self, packet: Packet) {
        if self.link.packet_loss > 0.0
            && self
                .link_rng
                .gen_bool(self.link.packet_loss.clamp(0.0, 1.0))
        {
            self.dropped_packets += 1;
            debug!("Simulated loss of move packet");
            return;
        }
        if let Err(e) = self.send_packet(&packet) {
            error!("Error sending moves: {}", e);
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected { client_id, spawn } => {
                info!(
                    "Connected! Client ID: {} at ({}, {}, {})",
                    client_id, spawn.x, spawn.y, spawn.z
                );
                self.connected = true;
                self.prediction = Some(ClientPrediction::new(
                    client_id,
                    spawn,
                    self.config.clone(),
                    self.table.clone(),
                ));
            }

            Packet::AckGoodMove { timestamp } => {
                if let Some(prediction) = self.prediction.as_mut() {
                    prediction.handle_ack(timestamp);
                }
            }

            Packet::MoveResponse(response) => {
                if let Some(prediction) = self.prediction.as_mut() {
                    prediction.handle_response(&response);
                }
            }

            Packet::WorldState { entities, .. } => {
                if let Some(prediction) = self.prediction.as_mut() {
                    prediction.apply_world_state(&entities);
                }
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.prediction = None;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }
    }

    fn apply_input(prediction: &mut ClientPrediction, frame: &InputFrame) {
        let mover = prediction.mover_mut();
        mover.set_gait_intent(frame.wants_to_walk, frame.wants_to_sprint);

        if let Some(category) = frame.toggle_modifier {
            Self::toggle_modifier(prediction, category);
        }
    }

    /// Presses or releases the weakest level of `category` on the Local tier
    fn toggle_modifier(prediction: &mut ClientPrediction, category: ModifierCategory) {
        let level = ModifierLevel::new(0);
        let Some(name) = prediction
            .mover()
            .table()
            .name_of(category, level)
            .map(str::to_string)
        else {
            return;
        };
        let requested = prediction
            .mover()
            .stack(category)
            .wants(ModifierTier::Local)
            .contains(level);

        if requested {
            prediction.end_modifier(category, &name);
        } else {
            prediction.start_modifier(category, &name);
        }
        debug!("{} {:?} '{}'", if requested { "Released" } else { "Requested" }, category, name);
    }

    fn deliver_inbound(&mut self) {
        let now = Instant::now();
        while self
            .inbound
            .front()
            .map_or(false, |(deliver_at, _)| *deliver_at <= now)
        {
            if let Some((_, packet)) = self.inbound.pop_front() {
                self.handle_packet(packet);
            }
        }
    }

    fn tick(&mut self, dt: f32) {
        self.deliver_inbound();

        let frame = self.input_manager.update(dt);
        let Some(prediction) = self.prediction.as_mut() else {
            return;
        };

        Self::apply_input(prediction, &frame);
        let packet = prediction.tick(frame.input, dt);
        for event in prediction.take_events() {
            if event.is_discrete() {
                debug!("Movement event {:?}", event);
            }
        }

        if let Some(packet) = packet {
            self.send_move(packet);
        }
    }

    fn log_status(&self) {
        let Some(prediction) = self.prediction.as_ref() else {
            return;
        };
        let mover = prediction.mover();
        let location = mover.location();
        let stats = prediction.stats();
        info!(
            "t={:.1}s pos=({:.0}, {:.0}, {:.0}) stamina={:.0} sprint={} walk={} levels={:?} \
             sent={} acks={} corrections={} dropped={} remotes={}",
            prediction.client_time(),
            location.x,
            location.y,
            location.z,
            mover.stamina(),
            mover.is_sprinting(),
            mover.is_walking(),
            ModifierCategory::ALL.map(|c| mover.level_name(c).unwrap_or("-").to_string()),
            stats.packets_sent,
            stats.acks,
            stats.corrections,
            self.dropped_packets,
            prediction.remote_ids().len(),
        );
    }

    /// Runs the client until `duration` elapses, or forever when it is None
    pub async fn run(
        &mut self,
        tick_rate: u32,
        duration: Option<Duration>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let tick_duration = Duration::from_secs_f64(1.0 / tick_rate.max(1) as f64);
        let mut tick_interval = interval(tick_duration);
        let mut status_interval = interval(Duration::from_secs(2));
        let started = Instant::now();
        let mut last_tick = Instant::now();

        let socket = Arc::clone(&self.socket);
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        let inbound_delay = Duration::from_millis(self.link.fake_ping_ms / 2);

        loop {
            if duration.map_or(false, |d| started.elapsed() >= d) {
                break;
            }

            tokio::select! {
                result = socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => match protocol::decode(&buffer[0..len]) {
                            Ok(packet) => {
                                self.inbound.push_back((Instant::now() + inbound_delay, packet));
                            }
                            Err(e) => warn!("Dropping packet from server: {}", e),
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;
                    if self.connected {
                        self.tick(dt);
                    } else {
                        self.deliver_inbound();
                    }
                },

                _ = status_interval.tick() => {
                    self.log_status();
                },
            }
        }

        if self.connected {
            self.send_packet(&Packet::Disconnect)?;
            // Give the delayed send a chance to leave before the runtime stops
            sleep(Duration::from_millis(self.link.fake_ping_ms / 2 + 10)).await;
        }

        Ok(())
    }
}
