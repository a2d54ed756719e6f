//! Keys and the in-process keyboard state.

use std::cell::RefCell;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ports::InputPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    A,
    D,
    S,
    W,
    Space,
    Left,
    Right,
    Up,
    Down,
    Enter,
    Escape,
}

/// Keyboard snapshot written by the windowing layer (or a script) and polled
/// by components each frame.
#[derive(Debug, Default)]
pub struct KeyboardState {
    pressed: RefCell<BTreeSet<Key>>,
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, key: Key) {
        self.pressed.borrow_mut().insert(key);
    }

    pub fn release(&self, key: Key) {
        self.pressed.borrow_mut().remove(&key);
    }

    pub fn set(&self, key: Key, pressed: bool) {
        if pressed {
            self.press(key);
        } else {
            self.release(key);
        }
    }

    pub fn release_all(&self) {
        self.pressed.borrow_mut().clear();
    }
}

impl InputPort for KeyboardState {
    fn is_key_pressed(&self, key: Key) -> bool {
        self.pressed.borrow().contains(&key)
    }
}
