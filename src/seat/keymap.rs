// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The xkbcommon seam. The engine owns compiled keymap and key state; the
//! seat only sees serialised modifier snapshots, keysyms, and the wlkit
//! modifier/led bitfields.

use std::rc::Rc;

use crate::config::XkbRuleNames;
use crate::prelude::*;

/// Modifier bits as reported to the embedder.
pub mod modifier {
    pub const SHIFT: u32 = 1 << 0;
    pub const CAPS: u32 = 1 << 1;
    pub const CTRL: u32 = 1 << 2;
    pub const ALT: u32 = 1 << 3;
    pub const MOD2: u32 = 1 << 4;
    pub const MOD3: u32 = 1 << 5;
    pub const LOGO: u32 = 1 << 6;
    pub const MOD5: u32 = 1 << 7;
}

pub mod led {
    pub const NUM: u32 = 1 << 0;
    pub const CAPS: u32 = 1 << 1;
    pub const SCROLL: u32 = 1 << 2;
}

/// Modifier and led state handed to embedder callbacks.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Modifiers {
    pub leds: u32,
    pub mods: u32,
}

/// Serialised xkb state, compared between events to decide whether clients
/// need a wl_keyboard.modifiers event.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ModSerialization {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

pub trait XkbEngine {
    /// The serialised keymap delivered on wl_keyboard.keymap.
    fn keymap_string(&self) -> Rc<str>;

    /// Feeds one evdev keycode; the +8 offset is the engine's business.
    fn update_key(&mut self, keycode: u32, pressed: bool);

    fn serialize(&self) -> ModSerialization;

    fn keysym(&self, keycode: u32) -> u32;

    /// Current modifiers translated to the `modifier`/`led` bitfields.
    fn modifiers(&self) -> Modifiers;
}

/// Compiles an engine from `XKB_DEFAULT_*` rule names.
pub trait KeymapCompiler {
    fn compile(&self, names: &XkbRuleNames) -> Result<Box<dyn XkbEngine>>;
}

/// Engine with no keymap: keysyms echo keycodes, no modifiers ever change.
/// Tests and headless runs use it.
#[derive(Debug, Default)]
pub struct NullXkbEngine {
    pressed: Vec<u32>,
}

impl XkbEngine for NullXkbEngine {
    fn keymap_string(&self) -> Rc<str> {
        Rc::from("")
    }

    fn update_key(&mut self, keycode: u32, pressed: bool) {
        if pressed {
            if !self.pressed.contains(&keycode) {
                self.pressed.push(keycode);
            }
        } else {
            self.pressed.retain(|k| *k != keycode);
        }
    }

    fn serialize(&self) -> ModSerialization {
        ModSerialization::default()
    }

    fn keysym(&self, keycode: u32) -> u32 {
        keycode
    }

    fn modifiers(&self) -> Modifiers {
        Modifiers::default()
    }
}
