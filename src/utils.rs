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

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use nix::time::ClockId;
use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

use crate::config::DebugChannel;
use crate::prelude::*;

/// Per-subsystem trace targets, toggled through `WLC_DEBUG`.
pub mod channel {
    pub const HANDLE: &str = "wlkit::handle";
    pub const RENDER: &str = "wlkit::render";
    pub const RENDER_LOOP: &str = "wlkit::render_loop";
    pub const FOCUS: &str = "wlkit::focus";
    pub const XWM: &str = "wlkit::xwm";
    pub const KEYBOARD: &str = "wlkit::keyboard";
    pub const COMMIT: &str = "wlkit::commit";
    pub const REQUEST: &str = "wlkit::request";
}

impl DebugChannel {
    pub fn target(self) -> &'static str {
        match self {
            DebugChannel::Handle => channel::HANDLE,
            DebugChannel::Render => channel::RENDER,
            DebugChannel::RenderLoop => channel::RENDER_LOOP,
            DebugChannel::Focus => channel::FOCUS,
            DebugChannel::Xwm => channel::XWM,
            DebugChannel::Keyboard => channel::KEYBOARD,
            DebugChannel::Commit => channel::COMMIT,
            DebugChannel::Request => channel::REQUEST,
        }
    }
}

/// Sets up the stderr (and optionally file) tracing layers. The debug
/// channels widen specific targets to TRACE without touching the base level.
pub fn configure_tracing<P: AsRef<Path>>(
    stderr_log_level: Level,
    path: Option<P>,
    file_log_level: Level,
    debug_channels: &[DebugChannel],
) -> Result<()> {
    let mut directives = format!("wlkit={stderr_log_level}");
    for channel in debug_channels {
        directives.push_str(&format!(",{}=trace", channel.target()));
    }
    let filter = EnvFilter::try_new(&directives).location(loc!())?;

    let mut layers = Vec::new();

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr.with_max_level(stderr_log_level))
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    if let Some(path) = path {
        let log_file = File::create(path).location(loc!())?;
        let log_file_writer = Mutex::new(log_file).with_max_level(file_log_level);
        let layer = layer.map_writer(|w| w.and(log_file_writer));
        layers.push(layer.boxed());
    } else {
        layers.push(layer.boxed());
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .init();
    Ok(())
}

/// Milliseconds on the monotonic clock, truncated the way the wire expects.
/// u32 wraps after ~50 days; every consumer compares with wrapping arithmetic.
pub fn monotonic_time_ms() -> u32 {
    let ts = nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC)
        .expect("CLOCK_MONOTONIC is always readable");
    (ts.tv_sec() as u64 * 1000 + ts.tv_nsec() as u64 / 1_000_000) as u32
}

pub fn monotonic_duration() -> Duration {
    let ts = nix::time::clock_gettime(ClockId::CLOCK_MONOTONIC)
        .expect("CLOCK_MONOTONIC is always readable");
    Duration::new(ts.tv_sec() as u64, ts.tv_nsec() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_time_does_not_go_backwards() {
        let a = monotonic_duration();
        let b = monotonic_duration();
        assert!(b >= a);
    }
}
