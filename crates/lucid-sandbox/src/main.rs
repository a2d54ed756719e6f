//! Lucid Sandbox
//!
//! Headless run of a small level: a floor, a crate, an enemy, and a player
//! walking and jumping on a scripted keyboard. Landing on the enemy destroys
//! it. Draw calls and audio commands go to the log.

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use glam::Vec2;
use lucid_core::{
    ActorId, ActorKind, AudioCmd, BodyDesc, BodyType, Engine, EngineConfig, Event, EventType, Key,
    KeyboardState, Light, NodeId, NodeKind, RenderError, SceneNode, SceneRenderer, ShapeDesc,
    Transform2D, audio_channel,
};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lucid engine sandbox
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// JSON engine config. Defaults apply when omitted.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 240)]
    frames: u32,

    /// Hold the right key for this many frames.
    #[arg(long, default_value_t = 60)]
    walk_frames: u32,

    /// Press jump on this frame.
    #[arg(long, default_value_t = 90)]
    jump_frame: u32,
}

/// Logs every visible sprite.
#[derive(Default)]
struct LogRenderer {
    drawn: usize,
}

impl SceneRenderer for LogRenderer {
    fn draw(&mut self, id: NodeId, node: &SceneNode, world: Transform2D) -> Result<(), RenderError> {
        match &node.kind {
            NodeKind::Sprite(sprite) => debug!(
                node = %id,
                texture = %sprite.texture,
                animation = ?sprite.animation,
                reverse = sprite.reverse,
                x = world.translation.x,
                y = world.translation.y,
                "draw sprite"
            ),
            NodeKind::Light(light) => debug!(node = %id, radius = light.radius, x = world.translation.x, "draw light"),
            NodeKind::Transform => {}
        }
        self.drawn += 1;
        Ok(())
    }
}

/// Stand-in for a mixer thread.
fn spawn_audio_player(rx: Receiver<AudioCmd>) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let mut played = 0;
        for cmd in rx {
            match cmd {
                AudioCmd::PlayFx { id } => {
                    info!(clip = %id, "play");
                    played += 1;
                }
                AudioCmd::SetListener { .. } => {}
                AudioCmd::Shutdown => break,
            }
        }
        played
    })
}

struct Level {
    player: ActorId,
    crate_box: ActorId,
    enemy: ActorId,
}

fn build_level(engine: &mut Engine) -> anyhow::Result<Level> {
    let floor = engine.create_actor(ActorKind::Static, Vec2::new(0.0, 500.0), Vec2::new(1280.0, 40.0));
    engine.add_body(floor, &BodyDesc::new(ShapeDesc::Box { hit_box_scale: 1.0 }))?;
    engine.add_node(floor, SceneNode::sprite("floor", "textures/floor.png", Vec2::new(1280.0, 40.0)))?;

    let crate_box = engine.create_actor(ActorKind::Interactable, Vec2::new(400.0, 300.0), Vec2::new(48.0, 48.0));
    engine.add_body(
        crate_box,
        &BodyDesc::new(ShapeDesc::Box { hit_box_scale: 0.9 })
            .with_body_type(BodyType::Dynamic)
            .with_density(2.0),
    )?;
    engine.add_node(crate_box, SceneNode::sprite("crate", "textures/crate.png", Vec2::new(48.0, 48.0)))?;

    let enemy = engine.create_actor(ActorKind::Enemy, Vec2::new(240.0, 468.0), Vec2::new(64.0, 32.0));
    engine.add_body(
        enemy,
        &BodyDesc::new(ShapeDesc::Box { hit_box_scale: 1.0 }).with_body_type(BodyType::Dynamic),
    )?;
    engine.add_node(enemy, SceneNode::sprite("slime", "textures/slime.png", Vec2::new(64.0, 32.0)))?;

    let player = engine.create_actor(ActorKind::Player, Vec2::new(100.0, 400.0), Vec2::new(32.0, 64.0));
    engine.add_body(
        player,
        &BodyDesc::new(ShapeDesc::Character).with_body_type(BodyType::Dynamic),
    )?;
    let body = engine.add_node(player, SceneNode::sprite("player", "textures/player.png", Vec2::new(32.0, 64.0)))?;
    engine.attach_node(
        body,
        SceneNode::light(
            "lantern",
            Light {
                radius: 120.0,
                ..Light::default()
            },
        ),
    )?;
    engine.attach_control(player)?;

    Ok(Level {
        player,
        crate_box,
        enemy,
    })
}

/// Destroys the enemy once the player's feet touch it.
fn stomp_enemy(engine: &Engine, level: &Level) {
    let bus = Rc::clone(engine.bus());
    let (player, enemy) = (level.player, level.enemy);
    engine.bus().subscribe(EventType::PostCollisionAdd, move |event| {
        if let Event::PostCollisionAdd(contact) = event
            && contact.is_sensor_contact_for(player)
            && contact.side_of(enemy).is_some()
        {
            info!(%enemy, "enemy stomped");
            bus.queue_event(Event::DestroyActor(enemy));
        }
    });
}

/// Counts actors flushed from the world.
fn count_removals(engine: &Engine) -> Rc<Cell<usize>> {
    let removed = Rc::new(Cell::new(0));
    let removed_in = Rc::clone(&removed);
    engine.bus().subscribe(EventType::ActorRemoved, move |event| {
        if let Event::ActorRemoved(actor) = event {
            debug!(%actor, "actor removed");
            removed_in.set(removed_in.get() + 1);
        }
    });
    removed
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let frame_time = config.physics.fixed_timestep;

    let keyboard = Rc::new(KeyboardState::new());
    let (audio, audio_rx) = audio_channel();
    let player_thread = spawn_audio_player(audio_rx);

    let mut engine = Engine::new(config, Rc::new(audio.clone()), keyboard.clone());
    let level = build_level(&mut engine)?;
    stomp_enemy(&engine, &level);
    let removed = count_removals(&engine);
    info!(frames = cli.frames, "sandbox started");

    for frame in 0..cli.frames {
        keyboard.set(Key::D, frame < cli.walk_frames);
        keyboard.set(Key::Space, frame == cli.jump_frame);
        if frame == cli.frames / 2 {
            engine.destroy_actor(level.crate_box);
        }

        engine.advance(frame_time);

        if frame % 30 == 0 {
            let mut renderer = LogRenderer::default();
            engine.render(&mut renderer)?;
            if let (Some(actor), Some(control)) = (engine.actor(level.player), engine.control(level.player)) {
                let state = control.state();
                info!(
                    frame,
                    x = actor.position.x,
                    y = actor.position.y,
                    animation = ?state.animation,
                    on_ground = control.on_ground(),
                    drawn = renderer.drawn,
                    "player"
                );
            }
        }
    }

    audio.shutdown();
    let played = player_thread
        .join()
        .map_err(|_| anyhow::anyhow!("audio player thread panicked"))?;
    info!(
        frames = engine.frame(),
        actors = engine.actors().count(),
        actors_removed = removed.get(),
        clips_played = played,
        "sandbox finished"
    );
    Ok(())
}
