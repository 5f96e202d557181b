// Virtual control keys shared by bots and the human-controlled entity.
// Bots express every steering decision as key presses so both go through
// the same acceleration and turn-rate integration.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlKey {
    TurnLeft,
    TurnRight,
    Accelerate,
    Brake,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputState {
    keys_held: HashSet<ControlKey>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, key: ControlKey) {
        self.keys_held.insert(key);
    }

    pub fn release(&mut self, key: ControlKey) {
        self.keys_held.remove(&key);
    }

    /// Release every key. Bots call this before synthesising a new frame.
    pub fn clear(&mut self) {
        self.keys_held.clear();
    }

    pub fn is_key_held(&self, key: ControlKey) -> bool {
        self.keys_held.contains(&key)
    }

    /// -1 for left, +1 for right, 0 for neither or both.
    pub fn turn_axis(&self) -> f32 {
        match (self.is_key_held(ControlKey::TurnLeft), self.is_key_held(ControlKey::TurnRight)) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposing_turn_keys_cancel() {
        let mut input = InputState::new();
        input.press(ControlKey::TurnLeft);
        assert_eq!(input.turn_axis(), -1.0);
        input.press(ControlKey::TurnRight);
        assert_eq!(input.turn_axis(), 0.0);
        input.release(ControlKey::TurnLeft);
        assert_eq!(input.turn_axis(), 1.0);
    }

    #[test]
    fn clear_releases_everything() {
        let mut input = InputState::new();
        input.press(ControlKey::Accelerate);
        input.press(ControlKey::Brake);
        input.clear();
        assert!(!input.is_key_held(ControlKey::Accelerate));
        assert!(!input.is_key_held(ControlKey::Brake));
    }
}
