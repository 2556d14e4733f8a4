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

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::prelude::*;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum DebugChannel {
    Handle,
    Render,
    RenderLoop,
    Focus,
    Xwm,
    Keyboard,
    Commit,
    Request,
}

impl FromStr for DebugChannel {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "handle" => Self::Handle,
            "render" => Self::Render,
            "render-loop" => Self::RenderLoop,
            "focus" => Self::Focus,
            "xwm" => Self::Xwm,
            "keyboard" => Self::Keyboard,
            "commit" => Self::Commit,
            "request" => Self::Request,
            other => bail!("unknown debug channel {other:?}"),
        })
    }
}

/// XKB_DEFAULT_* rule names, handed verbatim to the keymap engine.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct XkbRuleNames {
    pub rules: Option<String>,
    pub model: Option<String>,
    pub layout: Option<String>,
    pub variant: Option<String>,
    pub options: Option<String>,
}

impl XkbRuleNames {
    fn from_env() -> Self {
        Self {
            rules: env::var("XKB_DEFAULT_RULES").ok(),
            model: env::var("XKB_DEFAULT_MODEL").ok(),
            layout: env::var("XKB_DEFAULT_LAYOUT").ok(),
            variant: env::var("XKB_DEFAULT_VARIANT").ok(),
            options: env::var("XKB_DEFAULT_OPTIONS").ok(),
        }
    }
}

/// Library-wide configuration. Defaults come from an optional RON file; the
/// environment always overrides it, since the variables below are the
/// interface embedders and users script against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub debug_channels: Vec<DebugChannel>,
    /// Seconds of inactivity before outputs are blanked.
    pub idle_time_secs: u32,
    /// DRM node under /dev/dri to open.
    pub drm_device: String,
    /// Force this many fake outputs in the nested and X11 backends.
    pub forced_outputs: Option<u32>,
    pub enable_background: bool,
    pub enable_xwayland: bool,
    /// None means "use libinput exactly when running on DRM".
    pub use_libinput: Option<bool>,
    /// Debug aid: draw occluded views too.
    pub draw_opaque: bool,
    pub xdg_seat: String,
    pub xdg_vtnr: Option<u32>,
    pub xkb: XkbRuleNames,

    #[serde(skip)]
    pub xdg_runtime_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug_channels: Vec::new(),
            idle_time_secs: 300,
            drm_device: "card0".to_string(),
            forced_outputs: None,
            enable_background: true,
            enable_xwayland: true,
            use_libinput: None,
            draw_opaque: false,
            xdg_seat: "seat0".to_string(),
            xdg_vtnr: None,
            xkb: XkbRuleNames::default(),
            xdg_runtime_dir: PathBuf::new(),
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| v != "0")
}

fn env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.parse().log(loc!()).ok())
}

pub fn default_config_file() -> PathBuf {
    let base = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| Path::join(home.as_ref(), ".config")))
        .unwrap_or_else(|| "/etc".into());
    Path::join(&base, "wlkit/wlkit.ron")
}

impl Config {
    /// Builds the running configuration: RON file defaults (if present),
    /// then the environment on top. Fails only when `XDG_RUNTIME_DIR` is
    /// missing, which nothing downstream can work without.
    pub fn from_env() -> Result<Self> {
        let mut config = match fs::read_to_string(default_config_file()) {
            Ok(text) => ron::from_str(&text)
                .map_err(|e| anyhow!("error parsing config file: {e}"))
                .location(loc!())?,
            Err(_) => Self::default(),
        };

        if let Ok(channels) = env::var("WLC_DEBUG") {
            config.debug_channels = channels
                .split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| DebugChannel::from_str(s).warn(loc!()).ok())
                .collect();
        }
        if let Some(secs) = env_u32("WLC_IDLE_TIME") {
            config.idle_time_secs = secs;
        }
        if let Ok(device) = env::var("WLC_DRM_DEVICE") {
            config.drm_device = device;
        }
        if let Some(n) = env_u32("WLC_OUTPUTS") {
            config.forced_outputs = Some(n.max(1));
        }
        if let Some(bg) = env_flag("WLC_BG") {
            config.enable_background = bg;
        }
        if let Some(xwayland) = env_flag("WLC_XWAYLAND") {
            config.enable_xwayland = xwayland;
        }
        if let Some(libinput) = env_flag("WLC_LIBINPUT") {
            config.use_libinput = Some(libinput);
        }
        if let Some(draw_opaque) = env_flag("WLC_DRAW_OPAQUE") {
            config.draw_opaque = draw_opaque;
        }

        config.xdg_seat = env::var("XDG_SEAT").unwrap_or_else(|_| "seat0".to_string());
        config.xdg_vtnr = env_u32("XDG_VTNR");
        config.xkb = XkbRuleNames::from_env();

        config.xdg_runtime_dir = env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("XDG_RUNTIME_DIR is not set"))
            .location(loc!())?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_channel_parsing() {
        assert_eq!(
            DebugChannel::from_str("render-loop").unwrap(),
            DebugChannel::RenderLoop
        );
        assert!(DebugChannel::from_str("nonsense").is_err());
    }

    #[test]
    fn default_round_trips_through_ron() {
        let text = ron::to_string(&Config::default()).unwrap();
        let parsed: Config = ron::from_str(&text).unwrap();
        assert_eq!(parsed.idle_time_secs, 300);
        assert_eq!(parsed.drm_device, "card0");
        assert!(parsed.enable_background);
    }
}
