//! Strider - Headless character movement runner
//!
//! Builds a small demo scene and drives one character three ways at once: the
//! predicting client, the authoritative server copy, and a simulated proxy fed
//! by snapshots. Messages between them go through the JSON encoding.

mod settings;

use std::path::PathBuf;

use anyhow::{Context, Result};
use glam::{Quat, Vec3};
use strider_core::{PhysicsVolume, SimClock, SurfaceId};
use strider_movement::{CharacterMovement, MoveFlags, MovementEvent};
use strider_net::{decode, encode, ClientMove, ClientPrediction, ReplicatedMovement, ServerMoveHandler};
use strider_physics::PhysicsWorld;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use settings::SimSettings;

const SPAWN: Vec3 = Vec3::new(0.0, 0.0, 90.15);
const PLATFORM_ORIGIN: Vec3 = Vec3::new(900.0, 0.0, 20.0);
const PLATFORM_SWING: f32 = 200.0;
const PLATFORM_RATE: f32 = 0.5;

/// Demo geometry
struct Scene {
    world: PhysicsWorld,
    platform: SurfaceId,
}

impl Scene {
    fn build() -> Self {
        let mut world = PhysicsWorld::new();
        world.create_ground(0.0);

        // A step low enough to walk up, then a shallow ramp
        world.create_static_box(Vec3::new(100.0, 400.0, 15.0), Vec3::new(400.0, 0.0, 15.0));
        world.create_rotated_box(
            Vec3::new(150.0, 400.0, 10.0),
            Vec3::new(620.0, 0.0, 0.0),
            Quat::from_rotation_y(-0.2),
        );

        // Something to push around
        world.create_dynamic_box(Vec3::new(30.0, 30.0, 30.0), Vec3::new(250.0, 40.0, 30.0), 0.0005);

        let platform = world.create_platform(Vec3::new(150.0, 300.0, 20.0), PLATFORM_ORIGIN);

        world.add_water_volume(
            Vec3::new(1300.0, -500.0, 0.0),
            Vec3::new(1900.0, 500.0, 400.0),
            PhysicsVolume {
                water: true,
                ..PhysicsVolume::default()
            },
        );

        world.refresh_queries();
        Self { world, platform }
    }
}

/// One character simulated on both ends of the connection
struct Simulation {
    settings: SimSettings,
    scene: Scene,
    clock: SimClock,
    elapsed: f32,
    steps: u32,
    server: CharacterMovement,
    client: CharacterMovement,
    proxy: CharacterMovement,
    server_net: ServerMoveHandler,
    client_net: ClientPrediction,
    jumped: bool,
    corrections: u32,
}

impl Simulation {
    fn new(settings: SimSettings) -> Self {
        let scene = Scene::build();
        let world = &scene.world;

        let spawn = |location: Vec3, authority: bool| {
            let mut character = CharacterMovement::new(settings.movement.clone());
            character.set_authority(authority);
            if let Some(direction) = settings.scenario.gravity_direction {
                character.set_gravity_direction(direction);
            }
            character.initialize(world, location);
            character
        };
        let server = spawn(SPAWN, true);
        let client = spawn(SPAWN + settings.scenario.client_offset, false);
        let proxy = spawn(SPAWN, false);

        Self {
            clock: SimClock::new(settings.time.clone()),
            server_net: ServerMoveHandler::new(settings.net.clone()),
            client_net: ClientPrediction::new(settings.net.clone()),
            settings,
            scene,
            elapsed: 0.0,
            steps: 0,
            server,
            client,
            proxy,
            jumped: false,
            corrections: 0,
        }
    }

    fn run(&mut self) -> Result<()> {
        let frame_time = self.settings.scenario.frame_time;
        let fixed_dt = self.clock.step_length();
        let config = &self.clock.config;
        anyhow::ensure!(
            frame_time > 0.0 && fixed_dt > 0.0 && config.time_scale > 0.0 && config.max_frame_time > 0.0,
            "frame time, timestep, time scale and max frame time must be positive"
        );

        let duration = f64::from(self.settings.scenario.duration);
        while self.clock.elapsed() < duration {
            for _ in 0..self.clock.advance(frame_time) {
                self.fixed_step(fixed_dt)?;
            }
        }
        self.report();
        Ok(())
    }

    fn fixed_step(&mut self, dt: f32) -> Result<()> {
        self.elapsed += dt;
        self.steps += 1;
        self.move_platform()?;

        let world = &self.scene.world;
        let jump = match self.settings.scenario.jump.time() {
            Some(at) if !self.jumped && self.elapsed >= at => {
                self.jumped = true;
                true
            }
            _ => false,
        };
        let flags = MoveFlags { jump, crouch: false };
        let acceleration = self.settings.scenario.input.normalize_or_zero() * self.client.max_acceleration();

        // Client predicts, server re-simulates from the wire message
        let sent = self.client_net.replicate_move(&mut self.client, world, dt, acceleration, flags);
        let received: ClientMove = decode(&encode(&sent)?)?;
        if let Err(e) = self.server_net.handle_move(&mut self.server, world, &received) {
            warn!("Dropped client move: {}", e);
        }

        for message in self.server.drain_gravity_messages() {
            self.client.apply_gravity_message(message);
            self.proxy.apply_gravity_message(message);
        }

        if let Some(response) = self.server_net.send_client_adjustment() {
            if response.is_correction() {
                self.corrections += 1;
            }
            let response = decode(&encode(&response)?)?;
            if let Err(e) = self.client_net.handle_response(&mut self.client, world, &response) {
                warn!("Dropped server response: {}", e);
            }
        }

        if (self.steps - 1) % self.settings.scenario.snapshot_interval.max(1) == 0 {
            let snapshot = ReplicatedMovement::capture(&self.server, world);
            snapshot
                .apply(&mut self.proxy, world)
                .context("Failed to apply movement snapshot")?;
        }
        self.proxy.simulate_movement(world, dt);

        self.client.drain_events();
        self.proxy.drain_events();
        let events = self.server.drain_events();
        for event in events {
            self.handle_event(event);
        }

        self.scene.world.step();
        Ok(())
    }

    fn move_platform(&mut self) -> Result<()> {
        let phase = self.elapsed * PLATFORM_RATE;
        let position = PLATFORM_ORIGIN + Vec3::Y * PLATFORM_SWING * phase.sin();
        let velocity = Vec3::Y * PLATFORM_SWING * PLATFORM_RATE * phase.cos();
        self.scene
            .world
            .move_kinematic_body(self.scene.platform, position, Quat::IDENTITY, velocity)
            .context("Failed to move platform")?;
        Ok(())
    }

    fn handle_event(&mut self, event: MovementEvent) {
        match event {
            MovementEvent::ImpactForce {
                surface,
                force,
                point,
                impulse,
            } => {
                let result = if impulse {
                    self.scene.world.apply_impulse_at(surface, force, point)
                } else {
                    self.scene.world.add_force_at(surface, force, point)
                };
                if let Err(e) = result {
                    warn!("Could not push {:?}: {}", surface, e);
                }
            }
            MovementEvent::ModeChanged { previous, current } => {
                info!("[{:.2}s] {:?} -> {:?}", self.elapsed, previous, current);
            }
            MovementEvent::Landed { hit } => {
                info!("[{:.2}s] Landed on {:?} at {:.1?}", self.elapsed, hit.surface, hit.impact_point);
            }
            MovementEvent::Jumped => info!("[{:.2}s] Jumped", self.elapsed),
            other => debug!(?other, "movement event"),
        }
    }

    fn report(&self) {
        let transform = self.server.transform();
        let server = transform.position;
        info!(
            character = ?self.server.id(),
            "Finished {} steps: server at {:.1?} facing {:.2?} ({:?}), client error {:.3}, proxy error {:.3}, {} corrections",
            self.steps,
            server,
            transform.forward(),
            self.server.mode(),
            (self.client.location() - server).length(),
            (self.proxy.location() - server).length(),
            self.corrections,
        );
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")?;

    info!("Starting Strider movement runner...");

    let settings = match std::env::args().nth(1).as_deref() {
        Some("--write-settings") => {
            let path = SimSettings::default_path().context("No config directory on this platform")?;
            return SimSettings::default().save_to(&path);
        }
        Some(path) => SimSettings::load_from(&PathBuf::from(path)),
        None => SimSettings::load(),
    };

    let mut simulation = Simulation::new(settings);
    simulation.run()
}
