//! Integration tests for the predicted movement workspace
//!
//! These tests drive the client prediction and the authoritative server together,
//! in process and over real UDP sockets.

use assert_approx_eq::assert_approx_eq;
use client::prediction::ClientPrediction;
use server::client_manager::ClientManager;
use server::game::GameState;
use shared::modifier::{DEFAULT_HASTE, DEFAULT_SLOW};
use shared::movement::{EffectiveScalars, MovementState};
use shared::protocol::{self, MoveData, MoveResponse, Packet, ReplicatedEntity, PROTOCOL_VERSION};
use shared::{
    ClientAuthParams, ModifierCategory, ModifierLevel, ModifierTier, ModifierWantSet, MoveInput,
    MovementConfig, MovementPhysics, Vec3,
};
use std::time::Duration;

const DT: f32 = 1.0 / 60.0;

/// Constant speed along the input direction, so combined and split moves agree exactly
struct Kinematic;

impl MovementPhysics for Kinematic {
    fn simulate_tick(
        &self,
        state: &mut MovementState,
        input: &MoveInput,
        scalars: &EffectiveScalars,
        dt: f32,
    ) {
        state.velocity = input.acceleration.normalize().scale(100.0 * scalars.speed);
        state.location += state.velocity.scale(dt);
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests packet serialization round-trip for every packet kind
    #[test]
    fn packet_serialization_roundtrip() {
        let mut prediction = new_client(&MovementConfig::default(), 1, Vec3::ZERO);
        prediction.tick(forward(), DT);
        let data = MoveData::from_saved_move(prediction.saved_moves().iter().next().unwrap());

        let test_packets = vec![
            Packet::Connect {
                client_version: PROTOCOL_VERSION,
            },
            Packet::Move {
                old: Some(data.clone()),
                moves: vec![data.clone(), data],
            },
            Packet::Disconnect,
            Packet::Connected {
                client_id: 42,
                spawn: Vec3::new(200.0, 0.0, 0.0),
            },
            Packet::AckGoodMove { timestamp: 1.25 },
            Packet::MoveResponse(MoveResponse {
                timestamp: 1.25,
                movement: MovementState::at(Vec3::new(1.0, 2.0, 0.0)),
                stamina: 55.0,
                stamina_drained: true,
                modifiers: Default::default(),
                client_auth_alpha: Some(0.5),
            }),
            Packet::WorldState {
                tick: 7,
                entities: vec![ReplicatedEntity {
                    id: 3,
                    movement: MovementState::default(),
                    levels: [ModifierLevel::new(0), shared::NO_LEVEL, shared::NO_LEVEL],
                    stamina: 100.0,
                    is_sprinting: false,
                    is_walking: true,
                }],
            },
            Packet::Disconnected {
                reason: "Test".to_string(),
            },
        ];

        for packet in test_packets {
            let bytes = protocol::encode(&packet).unwrap();
            assert_eq!(protocol::decode(&bytes).unwrap(), packet);
        }
    }

    /// Tests real UDP socket communication with encoded packets
    #[tokio::test]
    async fn udp_socket_communication() {
        let server_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server_socket.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; protocol::MAX_PACKET_SIZE];
            if let Ok((size, client_addr)) = server_socket.recv_from(&mut buf).await {
                let _ = server_socket.send_to(&buf[..size], client_addr).await;
            }
        });

        let client_socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = Packet::AckGoodMove { timestamp: 0.5 };
        client_socket
            .send_to(&protocol::encode(&packet).unwrap(), server_addr)
            .await
            .unwrap();

        let mut buf = [0u8; protocol::MAX_PACKET_SIZE];
        let (size, _) = tokio::time::timeout(Duration::from_secs(1), client_socket.recv_from(&mut buf))
            .await
            .expect("Timed out waiting for echo")
            .unwrap();
        assert_eq!(protocol::decode(&buf[..size]).unwrap(), packet);
    }
}

/// PREDICTION AND MODIFIER TESTS
mod prediction_tests {
    use super::*;
    use shared::{Mover, NetRole, SavedMoveBuffer, Stamina, StaminaConfig};
    use std::sync::Arc;

    /// Tests that a combined move ends where the two separate moves end
    #[test]
    fn combine_matches_sequential_simulation() {
        let config = MovementConfig::default();
        let table = Arc::new(config.modifiers.build_table().unwrap());
        let mut mover = Mover::new(NetRole::AutonomousProxy, table, &config);
        mover.start_modifier_by_name(ModifierCategory::Haste, DEFAULT_HASTE, ModifierTier::Local);
        mover.start_sprint();
        mover.perform_move(&forward(), DT, &Kinematic);
        assert!(mover.is_sprinting());

        let mut buffer = SavedMoveBuffer::new(8);
        let start = mover.snapshot();
        let first = buffer.record(0.25, 0.25, forward(), start.clone());
        mover.perform_move(&forward(), 0.25, &Kinematic);
        buffer.finalize(first, mover.snapshot());

        let second = buffer.record(0.75, 0.5, forward(), mover.snapshot());
        mover.perform_move(&forward(), 0.5, &Kinematic);
        let sequential = mover.snapshot();

        assert!(buffer.try_combine(second, 1.0));
        assert_eq!(buffer.len(), 1);
        let combined = buffer.get(second).unwrap();
        assert_approx_eq!(combined.delta_time, 0.75);

        mover.restore(&combined.start);
        mover.perform_move(&forward(), combined.delta_time, &Kinematic);
        let merged = mover.snapshot();

        assert_approx_eq!(merged.movement.location.x, sequential.movement.location.x, 0.001);
        assert_approx_eq!(merged.stamina, sequential.stamina, 0.001);
        for category in ModifierCategory::ALL {
            assert_eq!(merged.category(category).level, sequential.category(category).level);
        }
    }

    /// Tests that a Correction tier request is never folded into the previous move
    #[test]
    fn correction_request_not_combined() {
        let config = MovementConfig::default();
        let mut prediction = new_client(&config, 1, Vec3::ZERO);
        prediction.tick(forward(), DT);
        prediction.mover_mut().start_modifier_by_name(
            ModifierCategory::Slow,
            DEFAULT_SLOW,
            ModifierTier::Correction,
        );
        let packet = prediction.tick(forward(), DT);

        let Some(Packet::Move { moves, .. }) = packet else {
            panic!("Important move should be sent immediately");
        };
        assert_eq!(moves.len(), 2);
        assert!(moves[0].wants(ModifierCategory::Slow).correction.is_empty());
        assert!(!moves[1].wants(ModifierCategory::Slow).correction.is_empty());
    }

    /// Tests that a want-set never grows past its cap
    #[test]
    fn cap_enforcement() {
        let mut set = ModifierWantSet::new();
        for level in 0..8 {
            assert!(set.insert(ModifierLevel::new(level)));
        }
        assert_eq!(set.len(), 8);

        set.insert(ModifierLevel::new(8));
        assert_eq!(set.len(), 8);
        assert!(!set.contains(ModifierLevel::new(0)));
        assert!(set.contains(ModifierLevel::new(1)));
        assert!(set.contains(ModifierLevel::new(8)));
    }

    /// Tests drained hysteresis at the 20% recovery threshold
    #[test]
    fn hysteresis_correctness() {
        let mut stamina = Stamina::new(StaminaConfig {
            recovery_from_pct: true,
            recovery_pct: 0.2,
            ..StaminaConfig::default()
        });
        stamina.set(0.0);
        assert!(stamina.is_drained());

        stamina.set(19.0);
        assert!(stamina.is_drained());

        stamina.set(20.0);
        assert!(!stamina.is_drained());
    }

    /// Tests that applying the same correction twice equals applying it once
    #[test]
    fn idempotent_correction() {
        let config = MovementConfig::default();
        let (mut game, spawn) = new_game(&config, 1);
        let mut prediction = new_client(&config, 1, spawn);
        assert!(game.start_modifier(1, ModifierCategory::Slow, DEFAULT_SLOW, ModifierTier::Server));

        let mut response = None;
        for _ in 0..8 {
            if let Some(Packet::Move { old, moves }) = prediction.tick(forward(), DT) {
                let batch: Vec<MoveData> = old.into_iter().chain(moves).collect();
                if let Some(Packet::MoveResponse(r)) = game.process_moves(1, &batch) {
                    response = Some(r);
                    break;
                }
            }
        }
        let response = response.expect("Server tier modifier should trigger a correction");

        assert!(prediction.handle_response(&response));
        let once = prediction.mover().snapshot();
        let slow = prediction
            .mover()
            .table()
            .level_of(ModifierCategory::Slow, DEFAULT_SLOW);
        assert_eq!(prediction.mover().level(ModifierCategory::Slow), slow);

        assert!(!prediction.handle_response(&response));
        assert_eq!(prediction.mover().snapshot(), once);
    }
}

/// CLIENT AUTHORITY TESTS
mod authority_tests {
    use super::*;
    use shared::{AuthorityVerdict, ClientAuthStack};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn knockback_config() -> MovementConfig {
        let mut config = MovementConfig::default();
        config.client_auth.insert(
            "Knockback".to_string(),
            ClientAuthParams {
                client_auth_time: 1.0,
                max_client_auth_distance: 100.0,
                reject_client_auth_distance: 500.0,
                ..ClientAuthParams::default()
            },
        );
        config
    }

    /// Tests the accept, partial and reject bands
    #[test]
    fn authority_blend_boundaries() {
        let mut sources = HashMap::new();
        sources.insert(
            "Knockback".to_string(),
            ClientAuthParams {
                max_client_auth_distance: 100.0,
                reject_client_auth_distance: 500.0,
                ..ClientAuthParams::default()
            },
        );
        let mut stack = ClientAuthStack::new(Arc::new(sources));
        stack.grant("Knockback", None).unwrap();
        let server = Vec3::ZERO;

        match stack.evaluate(Vec3::new(50.0, 0.0, 0.0), server, 0.001) {
            AuthorityVerdict::Accept { location, alpha, .. } => {
                assert_approx_eq!(alpha, 1.0);
                assert_approx_eq!(location.x, 50.0);
            }
            other => panic!("Expected full accept, got {:?}", other),
        }

        match stack.evaluate(Vec3::new(250.0, 0.0, 0.0), server, 0.001) {
            AuthorityVerdict::Accept { location, alpha, .. } => {
                assert_approx_eq!(alpha, 0.4);
                assert_approx_eq!(location.x, 100.0, 0.001);
            }
            other => panic!("Expected partial accept, got {:?}", other),
        }

        let verdict = stack.evaluate(Vec3::new(600.0, 0.0, 0.0), server, 0.001);
        assert!(matches!(verdict, AuthorityVerdict::Reject { .. }));
        assert_approx_eq!(verdict.alpha(), 0.0);
    }

    /// Tests partial authority from the server through to the client blend
    #[test]
    fn partial_authority_round_trip() {
        let config = knockback_config();
        let (mut game, spawn) = new_game(&config, 1);
        let mut prediction = new_client(&config, 1, spawn);
        assert!(game.grant_client_authority(1, "Knockback", None).is_some());

        // Standing still; the client claims it was knocked 250 units sideways.
        let knocked = spawn + Vec3::new(0.0, 250.0, 0.0);
        prediction.tick(MoveInput::default(), DT);
        let Some(Packet::Move { mut moves, .. }) = prediction.tick(MoveInput::default(), DT)
        else {
            panic!("Expected a move packet");
        };
        prediction.mover_mut().set_location(knocked);
        for data in &mut moves {
            data.location = knocked;
        }
        let reported = moves;

        let Some(Packet::MoveResponse(response)) = game.process_moves(1, &reported) else {
            panic!("Partial authority must be corrected");
        };
        assert_approx_eq!(response.client_auth_alpha.unwrap(), 0.4);
        assert_approx_eq!(response.movement.location.y, spawn.y, 0.001);
        assert_approx_eq!(game.entities[&1].mover.location().y, 100.0, 0.01);

        assert!(prediction.handle_response(&response));
        // Blended 40% of the way back toward the predicted 250.
        assert_approx_eq!(prediction.mover().location().y, 100.0, 0.01);
    }

    /// Tests that a report beyond the reject distance is ignored
    #[test]
    fn rejected_authority_keeps_server_position() {
        let config = knockback_config();
        let (mut game, spawn) = new_game(&config, 1);
        let mut prediction = new_client(&config, 1, spawn);
        game.grant_client_authority(1, "Knockback", None);

        prediction.tick(MoveInput::default(), DT);
        let Some(Packet::Move { mut moves, .. }) = prediction.tick(MoveInput::default(), DT) else {
            panic!("Expected a move packet");
        };
        for data in &mut moves {
            data.location = spawn + Vec3::new(600.0, 0.0, 0.0);
        }

        let Some(Packet::MoveResponse(response)) = game.process_moves(1, &moves) else {
            panic!("Rejected report must be corrected");
        };
        assert!(response.client_auth_alpha.is_none());
        assert_approx_eq!(response.movement.location.x, spawn.x, 0.001);
        assert_eq!(game.entities[&1].authority.rejections(), 1);
    }
}

/// CLIENT-SERVER INTERACTION TESTS
mod client_server_tests {
    use super::*;
    use server::network::Server;

    /// Tests that three identical ticks travel as one move and are acknowledged
    #[test]
    fn three_moves_one_packet_acknowledged() {
        let mut config = MovementConfig::default();
        config.network.client_send_interval = 3.0 * DT;
        let (mut game, spawn) = new_game(&config, 1);
        let mut prediction = new_client(&config, 1, spawn);

        assert!(prediction.tick(forward(), DT).is_none());
        assert!(prediction.tick(forward(), DT).is_none());
        let Some(Packet::Move { old, moves }) = prediction.tick(forward(), DT) else {
            panic!("Third tick should send");
        };
        assert!(old.is_none());
        assert_eq!(moves.len(), 1);
        assert_approx_eq!(moves[0].delta_time, 3.0 * DT);

        let reply = game.process_moves(1, &moves);
        assert_eq!(
            reply,
            Some(Packet::AckGoodMove {
                timestamp: moves[0].timestamp
            })
        );
        assert_eq!(prediction.handle_ack(moves[0].timestamp), 1);
        assert!(prediction.saved_moves().is_empty());
        assert_eq!(
            game.entities[&1].mover.location(),
            prediction.mover().location()
        );
    }

    /// Tests that a lost important move rides along with later packets
    #[test]
    fn important_move_resent_after_loss() {
        let config = MovementConfig::default();
        let mut manager = ClientManager::new(4);
        let client_id = manager.add_client("127.0.0.1:9000".parse().unwrap()).unwrap();
        let (mut game, spawn) = new_game(&config, client_id);
        let mut prediction = new_client(&config, client_id, spawn);

        // First packet arrives and is acknowledged.
        prediction.tick(forward(), DT);
        let Some(Packet::Move { old, moves }) = prediction.tick(forward(), DT) else {
            panic!("Expected first packet");
        };
        manager.add_moves(client_id, old, moves);
        for (id, batch) in manager.take_pending_moves() {
            if let Some(Packet::AckGoodMove { timestamp }) = game.process_moves(id, &batch) {
                prediction.handle_ack(timestamp);
            }
        }
        let acked = prediction.saved_moves().ack_timestamp();

        // The packet carrying the Correction request is lost.
        prediction.tick(forward(), DT);
        prediction.mover_mut().start_modifier_by_name(
            ModifierCategory::Slow,
            DEFAULT_SLOW,
            ModifierTier::Correction,
        );
        let Some(Packet::Move { moves: lost, .. }) = prediction.tick(forward(), DT) else {
            panic!("Important move should be sent immediately");
        };
        let important_ts = lost.last().unwrap().timestamp;

        // A late duplicate of the old ack does not clear it.
        prediction.handle_ack(acked);

        let mut resent = None;
        for _ in 0..4 {
            if let Some(Packet::Move { old, moves }) = prediction.tick(forward(), DT) {
                resent = old.clone();
                manager.add_moves(client_id, old, moves);
                break;
            }
        }
        let resent = resent.expect("Important move must be resent");
        assert_eq!(resent.timestamp, important_ts);

        let batches = manager.take_pending_moves();
        assert_eq!(batches[0].1[0].timestamp, important_ts);

        // The server does not hold the Correction request, so it is reverted.
        let Some(Packet::MoveResponse(response)) = game.process_moves(client_id, &batches[0].1)
        else {
            panic!("Unmatched Correction tier must be corrected");
        };
        prediction.handle_response(&response);
        assert!(prediction
            .mover()
            .stack(ModifierCategory::Slow)
            .wants(ModifierTier::Correction)
            .is_empty());
    }

    /// Tests a full session against the real server loop over UDP
    #[tokio::test]
    async fn udp_session_acknowledges_moves() {
        let config = MovementConfig::default();
        let table = config.modifiers.build_table().unwrap();
        let mut server = Server::new(
            "127.0.0.1:0",
            Duration::from_millis(10),
            4,
            GameState::new(config.clone(), table),
        )
        .await
        .unwrap();
        let server_addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let send = |packet: Packet| protocol::encode(&packet).unwrap();
        socket
            .send_to(
                &send(Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                }),
                server_addr,
            )
            .await
            .unwrap();

        let (client_id, spawn) = match recv_until(&socket, |p| matches!(p, Packet::Connected { .. })).await {
            Packet::Connected { client_id, spawn } => (client_id, spawn),
            other => panic!("Unexpected packet {:?}", other),
        };
        assert_eq!(client_id, 1);

        let mut prediction = new_client(&config, client_id, spawn);
        prediction.tick(forward(), DT);
        let packet = prediction.tick(forward(), DT).expect("Expected a move packet");
        let Packet::Move { moves, .. } = &packet else {
            panic!("Expected a move packet");
        };
        let sent_ts = moves.last().unwrap().timestamp;
        socket.send_to(&send(packet), server_addr).await.unwrap();

        let reply = recv_until(&socket, |p| {
            matches!(p, Packet::AckGoodMove { .. } | Packet::MoveResponse(_))
        })
        .await;
        assert_eq!(reply, Packet::AckGoodMove { timestamp: sent_ts });

        socket
            .send_to(&send(Packet::Disconnect), server_addr)
            .await
            .unwrap();
    }

    async fn recv_until(
        socket: &tokio::net::UdpSocket,
        wanted: impl Fn(&Packet) -> bool,
    ) -> Packet {
        let mut buf = [0u8; protocol::MAX_PACKET_SIZE];
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let (size, _) = socket.recv_from(&mut buf).await.unwrap();
                if let Ok(packet) = protocol::decode(&buf[..size]) {
                    if wanted(&packet) {
                        return packet;
                    }
                }
            }
        })
        .await
        .expect("Timed out waiting for server")
    }
}

/// STRESS AND ERROR HANDLING TESTS
mod stress_tests {
    use super::*;
    use client::input::InputManager;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Tests many scripted clients against one server for ten simulated seconds
    #[test]
    fn many_clients_stay_in_sync() {
        let config = MovementConfig::default();
        let table = config.modifiers.build_table().unwrap();
        let mut game = GameState::new(config.clone(), table);

        let mut clients: Vec<(ClientPrediction, InputManager)> = (1..=8)
            .map(|id| {
                let spawn = game.add_player(id);
                (new_client(&config, id, spawn), InputManager::new(id as u64))
            })
            .collect();

        for _ in 0..600 {
            for (prediction, input) in &mut clients {
                let frame = input.update(DT);
                prediction
                    .mover_mut()
                    .set_gait_intent(frame.wants_to_walk, frame.wants_to_sprint);
                let Some(Packet::Move { old, moves }) = prediction.tick(frame.input, DT) else {
                    continue;
                };
                let batch: Vec<MoveData> = old.into_iter().chain(moves).collect();
                match game.process_moves(prediction.client_id(), &batch) {
                    Some(Packet::AckGoodMove { timestamp }) => {
                        prediction.handle_ack(timestamp);
                    }
                    Some(Packet::MoveResponse(response)) => {
                        prediction.handle_response(&response);
                    }
                    other => panic!("Unexpected reply {:?}", other),
                }
            }
            game.tick(DT);
        }

        for (prediction, _) in &clients {
            let id = prediction.client_id();
            assert!(prediction.saved_moves().len() <= 2, "Client {} kept unacked moves", id);
            let server = game.entities[&id].mover.location();
            assert_approx_eq!(server.x, prediction.mover().location().x, 0.1);
            assert_approx_eq!(server.y, prediction.mover().location().y, 0.1);
            assert_eq!(prediction.stats().corrections, 0, "Client {} was corrected", id);
        }
        assert_eq!(game.snapshot_entities().len(), 8);
    }

    /// Tests that random bytes never decode into a panic
    #[test]
    fn malformed_packet_handling() {
        let valid = protocol::encode(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .unwrap();
        assert!(protocol::decode(&valid[..valid.len() / 2]).is_err());
        assert!(protocol::decode(&[]).is_err());

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..1000 {
            let len = rng.gen_range(0..64);
            let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let _ = protocol::decode(&bytes);
        }
    }
}

// HELPER FUNCTIONS

fn forward() -> MoveInput {
    MoveInput::new(Vec3::new(2048.0, 0.0, 0.0))
}

fn new_game(config: &MovementConfig, client_id: u32) -> (GameState, Vec3) {
    let table = config.modifiers.build_table().unwrap();
    let mut game = GameState::new(config.clone(), table);
    let spawn = game.add_player(client_id);
    (game, spawn)
}

fn new_client(config: &MovementConfig, client_id: u32, spawn: Vec3) -> ClientPrediction {
    let table = config.modifiers.build_table().unwrap();
    ClientPrediction::new(client_id, spawn, config.clone(), table)
}
