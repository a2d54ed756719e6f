//! Engine configuration, loaded from JSON.
//!
//! Every section falls back to its defaults, so a config file only needs the
//! values it overrides.

use std::path::Path;

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::input::Key;
use crate::physics::PHYSICS_DT;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub physics: PhysicsConfig,
    pub control: ControlConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Gravity in m/s². Screen convention: +y points down.
    pub gravity: Vec2,
    /// Conversion between scene pixels and physics meters.
    pub pixels_per_meter: f32,
    /// Length of one simulation tick in seconds.
    pub fixed_timestep: f32,
    /// Upper bound of ticks run by a single `Engine::advance` call.
    pub max_substeps: u32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec2::new(0.0, 20.0),
            pixels_per_meter: 100.0,
            fixed_timestep: PHYSICS_DT,
            max_substeps: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Horizontal speed cap in m/s.
    pub max_velocity: f32,
    /// Horizontal impulse per tick is `max_velocity * move_impulse_scale * dt`.
    pub move_impulse_scale: f32,
    /// Upward impulse of a jump, in N·s.
    pub jump_impulse: f32,
    /// A jump only pushes while `velocity.y` is at or above this value.
    pub jump_velocity_threshold: f32,
    /// Offset of light children (lanterns) while facing right, in pixels.
    pub lantern_offset: Vec2,
    pub jump_clip: String,
    pub bindings: KeyBindings,
    pub animations: AnimationNames,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_velocity: 3.0,
            move_impulse_scale: 0.5,
            jump_impulse: 1.5,
            jump_velocity_threshold: -5.0,
            lantern_offset: Vec2::new(12.0, 10.0),
            jump_clip: "audio/jump.mp3".to_string(),
            bindings: KeyBindings::default(),
            animations: AnimationNames::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    pub left: Key,
    pub right: Key,
    pub jump: Key,
}

impl Default for KeyBindings {
    fn default() -> Self {
        Self {
            left: Key::A,
            right: Key::D,
            jump: Key::Space,
        }
    }
}

/// Sprite animation names requested for each control state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationNames {
    pub idle: String,
    pub walk: String,
    pub jump: String,
}

impl Default for AnimationNames {
    fn default() -> Self {
        Self {
            idle: "idle".to_string(),
            walk: "walk".to_string(),
            jump: "jump".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_default() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json(
            r#"{
                "physics": { "pixels_per_meter": 32.0 },
                "control": { "max_velocity": 5.0, "bindings": { "jump": "Up" } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.physics.pixels_per_meter, 32.0);
        assert_eq!(config.physics.fixed_timestep, PHYSICS_DT);
        assert_eq!(config.control.max_velocity, 5.0);
        assert_eq!(config.control.bindings.jump, Key::Up);
        assert_eq!(config.control.bindings.left, Key::A);
        assert_eq!(config.control.animations.idle, "idle");
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::load("/nonexistent/lucid.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
