//! Audio commands leaving the core.
//!
//! Playback lives elsewhere (typically a dedicated thread). The core only
//! sends [`AudioCmd`] messages through an [`AudioChannel`]; the receiving end
//! is handed to whoever owns the mixer.

use crossbeam_channel::{Receiver, Sender, unbounded};
use glam::Vec2;

use crate::ports::AudioPort;

/// Commands sent to the audio player.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioCmd {
    PlayFx { id: String },
    SetListener { position: Vec2 },
    Shutdown,
}

/// [`AudioPort`] that forwards commands over a channel.
#[derive(Debug, Clone)]
pub struct AudioChannel {
    tx_cmd: Sender<AudioCmd>,
}

impl AudioChannel {
    pub fn new(tx_cmd: Sender<AudioCmd>) -> Self {
        Self { tx_cmd }
    }

    /// Asks the player to stop.
    pub fn shutdown(&self) {
        let _ = self.tx_cmd.send(AudioCmd::Shutdown);
    }

    fn send(&self, cmd: AudioCmd) {
        // Receiver gone means no player; commands are best-effort.
        if self.tx_cmd.send(cmd).is_err() {
            tracing::trace!("audio receiver dropped, command discarded");
        }
    }
}

/// Creates a connected channel pair.
pub fn audio_channel() -> (AudioChannel, Receiver<AudioCmd>) {
    let (tx_cmd, rx_cmd) = unbounded::<AudioCmd>();
    (AudioChannel::new(tx_cmd), rx_cmd)
}

impl AudioPort for AudioChannel {
    fn play_sound(&self, clip: &str) {
        self.send(AudioCmd::PlayFx {
            id: clip.to_string(),
        });
    }

    fn set_listener_position(&self, position: Vec2) {
        self.send(AudioCmd::SetListener { position });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_arrive_in_order() {
        let (audio, rx) = audio_channel();
        audio.play_sound("audio/jump.mp3");
        audio.set_listener_position(Vec2::new(1.0, 2.0));
        audio.shutdown();

        let received: Vec<AudioCmd> = rx.try_iter().collect();
        assert_eq!(
            received,
            vec![
                AudioCmd::PlayFx {
                    id: "audio/jump.mp3".to_string()
                },
                AudioCmd::SetListener {
                    position: Vec2::new(1.0, 2.0)
                },
                AudioCmd::Shutdown,
            ]
        );
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (audio, rx) = audio_channel();
        drop(rx);
        audio.play_sound("audio/jump.mp3");
    }
}
