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

//! End-to-end behaviour over the testing seams: output lifecycle, the
//! commit protocol, focus transitions, the repaint pacing, and clipboard
//! brokering.

use std::cell::RefCell;
use std::io::Read;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::rc::Rc;
use std::time::Duration;

use wlkit::compositor::Compositor;
use wlkit::compositor::testing;
use wlkit::data_device;
use wlkit::geometry::Geometry;
use wlkit::geometry::Point;
use wlkit::geometry::Size;
use wlkit::interface::EventHandler;
use wlkit::output;
use wlkit::output::scheduler;
use wlkit::registry::Handle;
use wlkit::registry::Resource;
use wlkit::seat::keyboard;
use wlkit::session::input::InputEvent;
use wlkit::shell;
use wlkit::signals::Signal;
use wlkit::surface;
use wlkit::view;
use wlkit::wire::ClientId;
use wlkit::wire::KeyState;
use wlkit::wire::ProtocolError;
use wlkit::wire::WireEvent;

#[derive(Clone, Default)]
struct EventLog {
    events: Rc<RefCell<Vec<String>>>,
    /// When set, fullscreen state requests are honoured onto this output.
    fullscreen_target: Rc<RefCell<Handle>>,
}

impl EventLog {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.events.borrow_mut())
    }

    fn push(&self, entry: String) {
        self.events.borrow_mut().push(entry);
    }
}

impl EventHandler for EventLog {
    fn output_created(&mut self, _comp: &mut Compositor, output: Handle) -> bool {
        self.push(format!("output_created {output:?}"));
        true
    }

    fn output_destroyed(&mut self, _comp: &mut Compositor, output: Handle) {
        self.push(format!("output_destroyed {output:?}"));
    }

    fn output_focus(&mut self, _comp: &mut Compositor, output: Handle, focused: bool) {
        self.push(format!("output_focus {output:?} {focused}"));
    }

    fn view_created(&mut self, _comp: &mut Compositor, view: Handle) -> bool {
        self.push(format!("view_created {view:?}"));
        true
    }

    fn view_destroyed(&mut self, _comp: &mut Compositor, view: Handle) {
        self.push(format!("view_destroyed {view:?}"));
    }

    fn view_focus(&mut self, _comp: &mut Compositor, view: Handle, focused: bool) {
        self.push(format!("view_focus {view:?} {focused}"));
    }

    fn view_move_to_output(
        &mut self,
        _comp: &mut Compositor,
        view: Handle,
        from: Handle,
        to: Handle,
    ) {
        self.push(format!("view_move_to_output {view:?} {from:?} {to:?}"));
    }

    fn view_request_state(&mut self, comp: &mut Compositor, vid: Handle, bit: u32, on: bool) {
        self.push(format!("view_request_state {vid:?} {bit:#x} {on}"));
        let target = *self.fullscreen_target.borrow();
        if bit == view::bit::FULLSCREEN && target != Handle::NONE {
            view::view_set_state(comp, vid, bit, on);
            if on {
                view::view_set_output(comp, vid, target);
                let resolution = comp.outputs.get(target).unwrap().resolution;
                view::view_set_geometry(
                    comp,
                    vid,
                    0,
                    Geometry::from_size(resolution),
                );
            }
        }
    }
}

fn log_compositor() -> (calloop::EventLoop<'static, Compositor>, Compositor, EventLog) {
    let log = EventLog::default();
    let (event_loop, comp) = testing::compositor_with(Box::new(log.clone()));
    (event_loop, comp, log)
}

#[test]
fn output_hotplug_round_trip() {
    let (_loop, mut comp, log) = log_compositor();

    let h1 = testing::add_output(&mut comp, Size::new(1920, 1080));
    let events = log.take();
    assert!(events.contains(&format!("output_created {h1:?}")));
    assert!(events.contains(&format!("output_focus {h1:?} true")));

    let h2 = testing::add_output(&mut comp, Size::new(1280, 720));
    let events = log.take();
    assert_eq!(
        events
            .iter()
            .filter(|e| *e == &format!("output_created {h2:?}"))
            .count(),
        1
    );
    // Focus is unchanged by a plug-in.
    assert!(!events.iter().any(|e| e.starts_with("output_focus")));

    // Removing the focused output moves focus to the survivor.
    scheduler::output_terminate(&mut comp, h1);
    comp.drain_signals();
    let events = log.take();
    assert!(events.contains(&format!("output_destroyed {h1:?}")));
    assert!(events.contains(&format!("output_focus {h2:?} true")));
    assert!(!comp.outputs.contains(h1));
}

#[test]
fn surface_commit_publishes_pending_state() {
    let (_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));

    let client = testing::client(&mut comp, 1);
    let sid = surface::surface_new(&mut comp, client.handle(10));
    view::view_new(&mut comp, sid);
    let buffer = testing::test_buffer(&mut comp, &client, 11, Size::new(320, 240));

    // Stage everything.
    surface::surface_attach(&mut comp, sid, buffer, Point::ZERO);
    surface::surface_set_buffer_scale(&mut comp, sid, 2);

    {
        let s = comp.surfaces.get(sid).unwrap();
        assert!(s.pending.attached);
        assert!(!s.commit.attached);
    }

    surface::surface_commit(&mut comp, sid);

    {
        let s = comp.surfaces.get(sid).unwrap();
        // Size is buffer size over scale.
        assert_eq!(s.size, Size::new(160, 120));
        assert!(!s.pending.attached);
        assert!(s.commit.attached);
        assert_eq!(s.commit.scale, 2);
        assert_eq!(s.pending.scale, s.commit.scale);
        assert_eq!(s.commit.buffer, buffer);
        assert_eq!(s.pending.buffer, Resource::NONE);
    }

    // Regions clamp against the committed surface size.
    surface::surface_damage(&mut comp, sid, Geometry::new(0, 0, 5000, 5000));
    let region = surface::region_new(&mut comp, client.handle(12));
    surface::region_add(&mut comp, region, Geometry::new(-10, -10, 500, 500));
    surface::surface_set_opaque_region(&mut comp, sid, Some(region));
    surface::surface_commit(&mut comp, sid);

    let s = comp.surfaces.get(sid).unwrap();
    assert_eq!(s.opaque_extents(), Geometry::new(0, 0, 160, 120));
    assert!(s.bounds().contains(&s.commit.damage.extents()));
}

#[test]
fn invalid_scale_and_transform_are_protocol_errors() {
    let (_loop, mut comp) = testing::compositor();
    let client = testing::client(&mut comp, 1);
    let sid = surface::surface_new(&mut comp, client.handle(10));

    surface::surface_set_buffer_scale(&mut comp, sid, 0);
    surface::surface_set_buffer_transform(&mut comp, sid, 8);
    surface::surface_set_buffer_transform(&mut comp, sid, -1);

    let recording = client.recording.borrow();
    let errors: Vec<ProtocolError> = recording.errors.iter().map(|(_, e, _)| *e).collect();
    assert_eq!(
        errors,
        vec![
            ProtocolError::InvalidScale,
            ProtocolError::InvalidTransform,
            ProtocolError::InvalidTransform,
        ]
    );
    drop(recording);

    // No state change happened.
    let s = comp.surfaces.get(sid).unwrap();
    assert_eq!(s.pending.scale, 1);
    assert_eq!(s.pending.transform, wlkit::geometry::Transform::Normal);
}

#[test]
fn subsurface_self_parenting_is_rejected() {
    let (_loop, mut comp) = testing::compositor();
    let client = testing::client(&mut comp, 1);
    let sid = surface::surface_new(&mut comp, client.handle(10));

    let link = surface::subsurface::subsurface_new(&mut comp, client.handle(20), sid, sid);
    assert_eq!(link, Resource::NONE);
    assert!(
        client
            .recording
            .borrow()
            .errors
            .iter()
            .any(|(_, e, _)| *e == ProtocolError::BadSurface)
    );
}

#[test]
fn synchronized_subsurface_commits_with_parent() {
    let (_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));
    let client = testing::client(&mut comp, 1);

    let parent = testing::mapped_surface(&mut comp, &client, 10, 11, Size::new(100, 100));
    view::view_new(&mut comp, parent);
    surface::surface_commit(&mut comp, parent);
    let child = surface::surface_new(&mut comp, client.handle(20));
    let child_buffer = testing::test_buffer(&mut comp, &client, 21, Size::new(50, 50));

    let link = surface::subsurface::subsurface_new(&mut comp, client.handle(22), child, parent);
    assert_ne!(link, Resource::NONE);
    surface::subsurface::subsurface_set_sync(&mut comp, link, true);
    surface::subsurface::subsurface_set_position(&mut comp, link, Point::new(7, 9));

    surface::surface_attach(&mut comp, child, child_buffer, Point::ZERO);
    // A synchronised child's own commit is cached.
    surface::surface_commit(&mut comp, child);
    assert!(!comp.surfaces.get(child).unwrap().commit.attached);

    // The parent commit publishes it, position included.
    surface::surface_commit(&mut comp, parent);
    let c = comp.surfaces.get(child).unwrap();
    assert!(c.commit.attached);
    assert_eq!(c.commit.subsurface_position, Point::new(7, 9));
}

#[test]
fn desync_grandchild_below_sync_child_is_published_by_the_root_commit() {
    let (_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));
    let client = testing::client(&mut comp, 1);

    // root (desync) -> child (sync) -> grandchild (desync).
    let root = testing::mapped_surface(&mut comp, &client, 10, 11, Size::new(100, 100));
    view::view_new(&mut comp, root);
    surface::surface_commit(&mut comp, root);

    let child = surface::surface_new(&mut comp, client.handle(20));
    let child_link = surface::subsurface::subsurface_new(&mut comp, client.handle(21), child, root);
    surface::subsurface::subsurface_set_sync(&mut comp, child_link, true);

    let grandchild = surface::surface_new(&mut comp, client.handle(30));
    let grandchild_link =
        surface::subsurface::subsurface_new(&mut comp, client.handle(31), grandchild, child);
    surface::subsurface::subsurface_set_sync(&mut comp, grandchild_link, false);

    let buffer = testing::test_buffer(&mut comp, &client, 32, Size::new(25, 25));
    surface::surface_attach(&mut comp, grandchild, buffer, Point::ZERO);
    // The sync ancestor makes the grandchild effectively synchronised, so
    // its own commit is cached.
    surface::surface_commit(&mut comp, grandchild);
    assert!(!comp.surfaces.get(grandchild).unwrap().commit.attached);

    // The root cascade flushes the whole subtree, the desync grandchild
    // included.
    surface::surface_commit(&mut comp, root);
    assert!(comp.surfaces.get(grandchild).unwrap().commit.attached);
}

#[test]
fn buffer_release_fires_exactly_once_at_zero_references() {
    let (_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));
    let client = testing::client(&mut comp, 1);

    let sid = surface::surface_new(&mut comp, client.handle(10));
    let b1 = testing::test_buffer(&mut comp, &client, 11, Size::new(64, 64));
    let b2 = testing::test_buffer(&mut comp, &client, 12, Size::new(64, 64));

    surface::surface_attach(&mut comp, sid, b1, Point::ZERO);
    surface::surface_commit(&mut comp, sid);
    assert_eq!(comp.buffers.get(b1).unwrap().references, 1);

    // Replacing the committed buffer drops the old one to zero.
    surface::surface_attach(&mut comp, sid, b2, Point::ZERO);
    surface::surface_commit(&mut comp, sid);

    assert!(!comp.buffers.contains(b1));
    let releases = client
        .recording
        .borrow()
        .sent
        .iter()
        .filter(|(object, event)| *object == 11 && matches!(event, WireEvent::BufferRelease))
        .count();
    assert_eq!(releases, 1);
}

#[test]
fn view_geometry_round_trips_through_commit() {
    let (_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));
    let client = testing::client(&mut comp, 1);

    let sid = testing::mapped_surface(&mut comp, &client, 10, 11, Size::new(320, 240));
    let shell_surface = shell::shell_surface_new(&mut comp, client.handle(12), sid);
    assert_ne!(shell_surface, Resource::NONE);
    let vid = comp.surfaces.get(sid).unwrap().view;

    let wanted = Geometry::new(30, 40, 200, 100);
    view::view_set_geometry(&mut comp, vid, 0, wanted);
    view::view_commit_state(&mut comp, vid);
    assert_eq!(comp.views.get(vid).unwrap().commit.geometry, wanted);

    // Degenerate sizes clamp to one pixel.
    view::view_set_geometry(&mut comp, vid, 0, Geometry::new(0, 0, 0, 0));
    view::view_commit_state(&mut comp, vid);
    assert_eq!(
        comp.views.get(vid).unwrap().commit.geometry.size,
        Size::new(1, 1)
    );
}

#[test]
fn fullscreen_request_propagates_to_embedder_and_back() {
    let (_loop, mut comp, log) = log_compositor();

    let o1 = testing::add_output(&mut comp, Size::new(640, 480));
    let o2 = testing::add_output(&mut comp, Size::new(1920, 1080));
    *log.fullscreen_target.borrow_mut() = o2;

    let client = testing::client(&mut comp, 1);
    let sid = testing::mapped_surface(&mut comp, &client, 10, 11, Size::new(320, 240));
    let shell_surface = shell::shell_surface_new(&mut comp, client.handle(12), sid);
    let vid = comp.surfaces.get(sid).unwrap().view;
    view::view_commit_state(&mut comp, vid); // maps and reports creation
    log.take();

    shell::shell_surface_request_state(&mut comp, shell_surface, view::bit::FULLSCREEN, true);
    comp.drain_signals();

    let events = log.take();
    assert!(
        events
            .iter()
            .any(|e| e.starts_with(&format!("view_request_state {vid:?}")))
    );
    let moves: Vec<&String> = events
        .iter()
        .filter(|e| e.starts_with("view_move_to_output"))
        .collect();
    assert_eq!(
        moves,
        vec![&format!("view_move_to_output {vid:?} {o1:?} {o2:?}")]
    );

    // The next state commit configures the client to the new mode.
    view::view_commit_state(&mut comp, vid);
    let configures = client.sent_to(12);
    assert!(
        configures
            .iter()
            .any(|e| e.contains("ShellConfigure") && e.contains("1920") && e.contains("1080")),
        "no fullscreen-sized configure in {configures:?}"
    );
}

#[test]
fn focus_change_synthesises_releases_before_leave() {
    let (_loop, mut comp, log) = log_compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));
    comp.seat.keymap = Some(Box::new(wlkit::seat::keymap::NullXkbEngine::default()));

    let client_a = testing::client(&mut comp, 1);
    let client_b = testing::client(&mut comp, 2);

    let sid_a = testing::mapped_surface(&mut comp, &client_a, 10, 11, Size::new(64, 64));
    let sid_b = testing::mapped_surface(&mut comp, &client_b, 20, 21, Size::new(64, 64));
    let va = view::view_new(&mut comp, sid_a);
    let vb = view::view_new(&mut comp, sid_b);

    keyboard::get_keyboard(&mut comp, client_a.handle(15));
    keyboard::get_keyboard(&mut comp, client_b.handle(25));

    keyboard::keyboard_focus(&mut comp, va);
    client_a.take_sent();
    log.take();

    // Hold A and B on the focused client.
    comp.signals.emit(Signal::Input(InputEvent::Key {
        time_ms: 1,
        key: 30,
        state: KeyState::Pressed,
    }));
    comp.signals.emit(Signal::Input(InputEvent::Key {
        time_ms: 2,
        key: 48,
        state: KeyState::Pressed,
    }));
    comp.drain_signals();
    assert_eq!(comp.seat.keyboard.keys, vec![30, 48]);
    client_a.take_sent();

    keyboard::keyboard_focus(&mut comp, vb);

    let sent = client_a.take_sent();
    let mut releases = Vec::new();
    let mut leave_index = None;
    for (i, (_, event)) in sent.iter().enumerate() {
        match event {
            WireEvent::KeyboardKey { key, state, .. } if *state == KeyState::Released => {
                releases.push(*key);
            },
            WireEvent::KeyboardLeave { .. } => leave_index = Some(i),
            _ => {},
        }
    }
    assert_eq!(releases, vec![30, 48]);
    let leave_index = leave_index.expect("leave was sent");
    assert!(releases.len() == 2 && leave_index >= 2, "releases precede leave");

    // The entering client got an empty-keys enter.
    let entered = client_b.take_sent();
    assert!(entered.iter().any(|(_, e)| matches!(
        e,
        WireEvent::KeyboardEnter { keys, .. } if keys.is_empty()
    )));

    let focus_events = log.take();
    assert!(focus_events.contains(&format!("view_focus {va:?} false")));
    assert!(focus_events.contains(&format!("view_focus {vb:?} true")));
}

#[test]
fn held_keys_are_delivered_after_the_focus_lock() {
    let (mut event_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));
    comp.seat.keymap = Some(Box::new(wlkit::seat::keymap::NullXkbEngine::default()));

    let client = testing::client(&mut comp, 1);
    let sid = testing::mapped_surface(&mut comp, &client, 10, 11, Size::new(64, 64));
    let vid = view::view_new(&mut comp, sid);
    keyboard::get_keyboard(&mut comp, client.handle(15));

    comp.signals.emit(Signal::Input(InputEvent::Key {
        time_ms: 1,
        key: 30,
        state: KeyState::Pressed,
    }));
    comp.drain_signals();

    keyboard::keyboard_focus(&mut comp, vid);
    client.take_sent();
    assert!(comp.seat.keyboard.locked);

    // Run the loop past the lock; the held key arrives as a fresh press.
    for _ in 0..20 {
        event_loop
            .dispatch(Some(Duration::from_millis(20)), &mut comp)
            .unwrap();
        if !comp.seat.keyboard.locked {
            break;
        }
    }
    assert!(!comp.seat.keyboard.locked);
    let sent = client.take_sent();
    assert!(sent.iter().any(|(_, e)| matches!(
        e,
        WireEvent::KeyboardKey { key: 30, state: KeyState::Pressed, .. }
    )));
}

#[test]
fn adaptive_idle_decays_under_activity_and_recovers_when_idle() {
    let (_loop, mut comp) = testing::compositor();
    let (oid, _ops) = testing::add_manual_output(&mut comp, Size::new(640, 480));

    let mut now = 1000;
    // Continuous damage: activity marked before every frame.
    for _ in 0..60 {
        scheduler::schedule_repaint(&mut comp, oid);
        scheduler::repaint(&mut comp, oid);
        now += 16;
        scheduler::finish_frame(&mut comp, oid, now);
    }
    let busy_ims = comp.outputs.get(oid).unwrap().state.ims;
    assert!(
        (busy_ims - scheduler::IDLE_MIN_MS).abs() < 0.5,
        "ims decayed toward the floor, got {busy_ims}"
    );

    // Idle with the background visible: the interval stretches back out.
    for _ in 0..60 {
        scheduler::repaint(&mut comp, oid);
        now += 16;
        scheduler::finish_frame(&mut comp, oid, now);
    }
    let idle_ims = comp.outputs.get(oid).unwrap().state.ims;
    assert!(
        (idle_ims - scheduler::IDLE_MAX_MS).abs() < 0.5,
        "ims grew toward the ceiling, got {idle_ims}"
    );
}

#[test]
fn repaint_while_flip_pending_only_drains_tasks() {
    let (_loop, mut comp) = testing::compositor();
    let (oid, ops) = testing::add_manual_output(&mut comp, Size::new(640, 480));

    scheduler::schedule_repaint(&mut comp, oid);
    assert!(scheduler::repaint(&mut comp, oid));
    assert!(comp.outputs.get(oid).unwrap().state.pending);
    let flips = ops.flips.get();

    // Pending gates further frames.
    scheduler::schedule_repaint(&mut comp, oid);
    assert!(!scheduler::repaint(&mut comp, oid));
    assert_eq!(ops.flips.get(), flips);

    scheduler::finish_frame(&mut comp, oid, 2000);
    assert!(!comp.outputs.get(oid).unwrap().state.pending);
}

#[test]
fn terminate_with_pending_flip_is_deferred_to_finish_frame() {
    let (_loop, mut comp) = testing::compositor();
    let (oid, _ops) = testing::add_manual_output(&mut comp, Size::new(640, 480));

    scheduler::schedule_repaint(&mut comp, oid);
    scheduler::repaint(&mut comp, oid);
    scheduler::output_terminate(&mut comp, oid);
    assert!(comp.outputs.contains(oid), "terminate deferred while pending");

    scheduler::finish_frame(&mut comp, oid, 2000);
    comp.drain_signals();
    assert!(!comp.outputs.contains(oid));
}

#[test]
fn set_views_normalises_duplicates_preserving_order() {
    let (_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    let client = testing::client(&mut comp, 1);

    let s1 = testing::mapped_surface(&mut comp, &client, 10, 11, Size::new(64, 64));
    let s2 = testing::mapped_surface(&mut comp, &client, 20, 21, Size::new(64, 64));
    let v1 = view::view_new(&mut comp, s1);
    let v2 = view::view_new(&mut comp, s2);

    assert!(output::output_set_views(&mut comp, oid, &[v2, v1, v2, v1]));
    assert_eq!(output::output_get_views(&comp, oid), vec![v2, v1]);
    assert_eq!(output::output_get_mutable_views(&comp, oid), vec![v2, v1]);
}

#[test]
fn data_device_round_trips_bytes_through_the_source() {
    let (_loop, mut comp) = testing::compositor();
    let offerer = testing::client(&mut comp, 1);
    let receiver = testing::client(&mut comp, 2);

    // Client 1 advertises a selection.
    let source = data_device::create_data_source(&mut comp, offerer.handle(10));
    data_device::data_source_offer(&mut comp, source, "text/plain;charset=utf-8".to_string());
    data_device::get_data_device(&mut comp, offerer.handle(11));
    data_device::device_set_selection(&mut comp, ClientId(1), source);

    // Client 2 sees a fresh offer with the advertised type.
    data_device::get_data_device(&mut comp, receiver.handle(20));
    data_device::offer_to_client(&mut comp, ClientId(2));

    let offer_object = receiver
        .recording
        .borrow()
        .sent
        .iter()
        .find_map(|(_, e)| match e {
            WireEvent::DataDeviceDataOffer { offer } => Some(*offer),
            _ => None,
        })
        .expect("an offer was introduced");
    let offer = comp.registry.resource_for_wire(ClientId(2), offer_object);
    assert_ne!(offer, Resource::NONE);
    assert!(receiver.recording.borrow().sent.iter().any(|(_, e)| matches!(
        e,
        WireEvent::DataOfferMimeType { mime_type } if mime_type == "text/plain;charset=utf-8"
    )));

    // Receive: the write end lands at the source, byte-for-byte.
    let (read_end, write_end) = nix::unistd::pipe().unwrap();
    data_device::offer_receive(
        &mut comp,
        offer,
        "text/plain;charset=utf-8".to_string(),
        write_end,
    );

    let sent_fd: Option<OwnedFd> =
        offerer
            .take_sent()
            .into_iter()
            .find_map(|(_, e)| match e {
                WireEvent::DataSourceSend { mime_type, fd } => {
                    assert_eq!(mime_type, "text/plain;charset=utf-8");
                    Some(fd)
                },
                _ => None,
            });
    let sent_fd = sent_fd.expect("send reached the source");

    let payload = b"clipboard contents";
    {
        let mut writer = std::fs::File::from(sent_fd);
        writer.write_all(payload).unwrap();
    }
    let mut received = Vec::new();
    std::fs::File::from(read_end)
        .read_to_end(&mut received)
        .unwrap();
    assert_eq!(received, payload);
}

#[test]
fn selection_replacement_cancels_the_previous_source() {
    let (_loop, mut comp) = testing::compositor();
    let client = testing::client(&mut comp, 1);

    let first = data_device::create_data_source(&mut comp, client.handle(10));
    data_device::data_source_offer(&mut comp, first, "text/plain".to_string());
    data_device::get_data_device(&mut comp, client.handle(11));
    data_device::device_set_selection(&mut comp, ClientId(1), first);

    let second = data_device::create_data_source(&mut comp, client.handle(12));
    data_device::device_set_selection(&mut comp, ClientId(1), second);

    assert!(
        client
            .recording
            .borrow()
            .sent
            .iter()
            .any(|(object, e)| *object == 10 && matches!(e, WireEvent::DataSourceCancelled))
    );
}

#[test]
fn pointer_focus_follows_motion() {
    let (_loop, mut comp) = testing::compositor();
    let oid = testing::add_output(&mut comp, Size::new(640, 480));
    assert!(comp.outputs.contains(oid));
    comp.seat.keymap = Some(Box::new(wlkit::seat::keymap::NullXkbEngine::default()));

    let client = testing::client(&mut comp, 1);
    let sid = testing::mapped_surface(&mut comp, &client, 10, 11, Size::new(640, 480));
    let vid = view::view_new(&mut comp, sid);
    view::view_commit_state(&mut comp, vid);
    wlkit::seat::pointer::get_pointer(&mut comp, client.handle(15));

    comp.signals.emit(Signal::Input(InputEvent::MotionAbsolute {
        time_ms: 1,
        x: 0.5,
        y: 0.5,
    }));
    comp.drain_signals();

    assert_eq!(comp.seat.pointer.focused_view, vid);
    let sent = client.take_sent();
    assert!(sent.iter().any(|(_, e)| matches!(e, WireEvent::PointerEnter { .. })));
    assert!(sent.iter().any(|(_, e)| matches!(e, WireEvent::PointerMotion { .. })));
}
