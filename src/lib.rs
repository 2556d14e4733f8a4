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

pub mod backend;
pub mod compositor;
pub mod config;
pub mod data_device;
pub mod error_utils;
pub mod geometry;
pub mod interface;
pub mod output;
pub mod prelude;
pub mod region;
pub mod registry;
pub mod renderer;
pub mod seat;
pub mod session;
pub mod shell;
pub mod signals;
pub mod surface;
pub mod utils;
pub mod view;
pub mod wire;
pub mod xwayland;
