//! Keyboard state exposed to passes as a 256x3 single-channel texture.
//!
//! Row 0 holds keys currently down, row 1 keys pressed this frame and row 2
//! a toggle that flips on every press.

pub const KEYBOARD_WIDTH: u32 = 256;
pub const KEYBOARD_HEIGHT: u32 = 3;

const ROW: usize = KEYBOARD_WIDTH as usize;

#[derive(Debug, Clone)]
pub struct KeyboardState {
    texels: [u8; ROW * 3],
    dirty: bool,
}

impl Default for KeyboardState {
    fn default() -> Self {
        Self {
            texels: [0; ROW * 3],
            dirty: true,
        }
    }
}

impl KeyboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_down(&mut self, code: u8) {
        let k = code as usize;
        if self.texels[k] == 255 {
            // auto-repeat
            return;
        }
        self.texels[k] = 255;
        self.texels[ROW + k] = 255;
        self.texels[2 * ROW + k] = 255 - self.texels[2 * ROW + k];
        self.dirty = true;
    }

    pub fn key_up(&mut self, code: u8) {
        let k = code as usize;
        if self.texels[k] != 0 {
            self.texels[k] = 0;
            self.dirty = true;
        }
    }

    pub fn is_down(&self, code: u8) -> bool {
        self.texels[code as usize] != 0
    }

    pub fn was_pressed(&self, code: u8) -> bool {
        self.texels[ROW + code as usize] != 0
    }

    pub fn is_toggled(&self, code: u8) -> bool {
        self.texels[2 * ROW + code as usize] != 0
    }

    /// Drop the per-frame "pressed" edges.
    pub fn clear_edges(&mut self) {
        let edges = &mut self.texels[ROW..2 * ROW];
        if edges.iter().any(|b| *b != 0) {
            edges.fill(0);
            self.dirty = true;
        }
    }

    pub fn reset(&mut self) {
        self.texels.fill(0);
        self.dirty = true;
    }

    pub fn texels(&self) -> &[u8] {
        &self.texels
    }

    /// Returns the texels when they changed since the last call.
    pub fn take_dirty(&mut self) -> Option<&[u8]> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(&self.texels[..])
    }
}
