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

//! The library context: every subsystem's state, the event loop, the
//! signal router, and the lifecycle (init -> run -> terminate). All work is
//! single-threaded and serialised by the calloop loop; handlers never
//! re-enter the loop.

use std::os::fd::OwnedFd;
use std::rc::Rc;

use calloop::EventLoop;
use calloop::LoopHandle;
use calloop::LoopSignal;
use calloop::PostAction;
use calloop::channel::Event as ChannelEvent;

use crate::backend;
use crate::backend::Backend;
use crate::backend::ContextFactory;
use crate::backend::NullContextFactory;
use crate::backend::drm::DrmDevice;
use crate::backend::wayland::HostDisplay;
use crate::config::Config;
use crate::data_device;
use crate::geometry::Point;
use crate::interface::EventHandler;
use crate::output;
use crate::output::Output;
use crate::output::OutputBind;
use crate::output::scheduler;
use crate::prelude::*;
use crate::region::Region;
use crate::registry::Handle;
use crate::registry::HandleSource;
use crate::registry::Registry;
use crate::registry::Resource;
use crate::registry::ResourceSource;
use crate::registry::Source;
use crate::seat;
use crate::seat::Seat;
use crate::seat::keyboard;
use crate::seat::keymap::KeymapCompiler;
use crate::session;
use crate::session::Session;
use crate::session::input::InputSource;
use crate::shell::ShellSurface;
use crate::shell::XdgPopup;
use crate::shell::XdgSurface;
use crate::shell::XdgToplevel;
use crate::shell;
use crate::signals::Signal;
use crate::signals::SignalBus;
use crate::signals::SurfaceSignalKind;
use crate::surface;
use crate::surface::FrameCallback;
use crate::surface::Surface;
use crate::surface::buffer;
use crate::surface::buffer::Buffer;
use crate::surface::subsurface;
use crate::surface::subsurface::SubsurfaceLink;
use crate::utils::channel;
use crate::view;
use crate::wire::ClientId;
use crate::wire::ObjectId;
use crate::wire::Serials;
use crate::xwayland::Xwayland;
use crate::xwayland::selection;

/// Creates compositor-side client connections; the XWayland server gets
/// its connection through this.
pub trait ClientSocketFactory {
    fn create_client_socket(&mut self) -> Result<(OwnedFd, ClientId)>;
}

/// The external-collaborator seams the embedder's platform layer provides.
/// Everything is optional: a missing seam just disables the paths that
/// need it.
pub struct Platform {
    pub context: Rc<dyn ContextFactory>,
    pub keymap: Option<Box<dyn KeymapCompiler>>,
    pub input: Option<Box<dyn InputSource>>,
    pub drm: Option<Box<dyn DrmDevice>>,
    pub host: Option<Box<dyn HostDisplay>>,
    pub client_sockets: Option<Box<dyn ClientSocketFactory>>,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            context: Rc::new(NullContextFactory),
            keymap: None,
            input: None,
            drm: None,
            host: None,
            client_sockets: None,
        }
    }
}

pub struct Compositor {
    pub config: Config,
    pub platform: Platform,
    pub handler: Option<Box<dyn EventHandler>>,

    pub registry: Registry,
    pub serials: Serials,
    pub signals: SignalBus,

    pub outputs: HandleSource<Output>,
    pub views: HandleSource<view::View>,
    pub surfaces: ResourceSource<Surface>,
    pub buffers: ResourceSource<Buffer>,
    pub regions: ResourceSource<Region>,
    pub callbacks: ResourceSource<FrameCallback>,
    pub subsurface_links: ResourceSource<SubsurfaceLink>,
    pub shell_surfaces: ResourceSource<ShellSurface>,
    pub xdg_surfaces: ResourceSource<XdgSurface>,
    pub xdg_toplevels: ResourceSource<XdgToplevel>,
    pub xdg_popups: ResourceSource<XdgPopup>,
    pub output_binds: ResourceSource<OutputBind>,

    pub seat: Seat,
    pub session: Session,
    pub backend: Option<Box<dyn Backend>>,
    pub xwayland: Option<Xwayland>,
    pub xwayland_client: Option<ClientId>,

    pub loop_handle: LoopHandle<'static, Compositor>,
    pub loop_signal: LoopSignal,

    /// Session holds the seat; rendering and input are gated on it.
    pub active: bool,
    pub terminating: bool,
    pub focused_output: Handle,

    draining: bool,
    /// Notifications raised while the handler is already on the stack;
    /// delivered when the outer callback returns.
    pending_notifications: Vec<Box<dyn FnOnce(&mut dyn EventHandler, &mut Compositor)>>,
}

impl Compositor {
    fn new(
        config: Config,
        handler: Box<dyn EventHandler>,
        platform: Platform,
        session: Session,
        loop_handle: LoopHandle<'static, Compositor>,
        loop_signal: LoopSignal,
    ) -> Self {
        let registry = Registry::new();
        let seat = Seat::new(&registry, config.xdg_seat.clone());
        Self {
            outputs: Source::new("output", &registry.handles),
            views: Source::new("view", &registry.handles),
            surfaces: Source::new("surface", &registry.resources),
            buffers: Source::new("buffer", &registry.resources),
            regions: Source::new("region", &registry.resources),
            callbacks: Source::new("callback", &registry.resources),
            subsurface_links: Source::new("subsurface", &registry.resources),
            shell_surfaces: Source::new("shell-surface", &registry.resources),
            xdg_surfaces: Source::new("xdg-surface", &registry.resources),
            xdg_toplevels: Source::new("xdg-toplevel", &registry.resources),
            xdg_popups: Source::new("xdg-popup", &registry.resources),
            output_binds: Source::new("output-bind", &registry.resources),
            registry,
            seat,
            config,
            platform,
            handler: Some(handler),
            serials: Serials::default(),
            signals: SignalBus::new(),
            session,
            backend: None,
            xwayland: None,
            xwayland_client: None,
            loop_handle,
            loop_signal,
            active: true,
            terminating: false,
            focused_output: Handle::NONE,
            draining: false,
            pending_notifications: Vec::new(),
        }
    }

    /// Runs a closure with the embedder handler temporarily taken out, so
    /// the handler can freely call back into the compositor. Consulting
    /// callbacks (the bool-returning ones) go through here and must not be
    /// reached from inside another callback; notifications raised there are
    /// queued and flushed on return.
    pub fn with_handler<R>(
        &mut self,
        f: impl FnOnce(&mut dyn EventHandler, &mut Compositor) -> R,
    ) -> Option<R> {
        let mut handler = self.handler.take()?;
        let result = f(handler.as_mut(), self);
        self.flush_notifications(handler.as_mut());
        self.handler = Some(handler);
        Some(result)
    }

    /// Fire-and-forget callback delivery; safe to call from inside another
    /// callback (the mutators do), in which case delivery is deferred until
    /// the outer callback returns.
    pub fn notify_handler(
        &mut self,
        f: impl FnOnce(&mut dyn EventHandler, &mut Compositor) + 'static,
    ) {
        match self.handler.take() {
            Some(mut handler) => {
                f(handler.as_mut(), self);
                self.flush_notifications(handler.as_mut());
                self.handler = Some(handler);
            },
            None => self.pending_notifications.push(Box::new(f)),
        }
    }

    fn flush_notifications(&mut self, handler: &mut dyn EventHandler) {
        while !self.pending_notifications.is_empty() {
            let pending = std::mem::take(&mut self.pending_notifications);
            for notification in pending {
                notification(handler, self);
            }
        }
    }

    /// Routes every queued signal. Safe to call re-entrantly; an inner
    /// call is a no-op and the outer drain picks the new signals up.
    pub fn drain_signals(&mut self) {
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(signal) = self.signals.pop() {
            self.route_signal(signal);
        }
        self.draining = false;
    }

    fn route_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Activate { active, .. } => session::apply_activate(self, active),
            Signal::Terminate => start_terminate(self),
            Signal::Ready => {
                self.notify_handler(|h, c| h.compositor_ready(c));
            },
            Signal::Surface { surface, kind } => match kind {
                SurfaceSignalKind::Created => {
                    if let Some(mut wm) =
                        self.xwayland.as_mut().and_then(|x| x.wm.take())
                    {
                        wm.try_pair_all(self);
                        if let Some(xw) = self.xwayland.as_mut() {
                            xw.wm = Some(wm);
                        }
                    }
                    let _ = surface;
                },
                SurfaceSignalKind::Destroyed => {},
            },
            Signal::Focus { view, focused } => {
                if focused {
                    keyboard::keyboard_focus(self, view);
                    if let Some(client) = view_client(self, view) {
                        data_device::offer_to_client(self, client);
                    }
                } else if self.seat.keyboard.focused_view == view {
                    keyboard::keyboard_focus(self, Handle::NONE);
                }
            },
            Signal::Input(event) => seat::seat_input(self, event),
            Signal::OutputSurface { .. } => session::respond_activate_pending(self),
            Signal::Hotplug => {
                if let Some(mut backend) = self.backend.take() {
                    backend.update_outputs(self);
                    self.backend = Some(backend);
                }
            },
            Signal::Xwayland { available } => {
                info!("xwayland {}", if available { "up" } else { "down" });
            },
            Signal::SelectionChanged => {
                selection::handle_native_selection_change(self);
                let focused = self.seat.keyboard.focused_view;
                if let Some(client) = view_client(self, focused) {
                    data_device::offer_to_client(self, client);
                }
            },
        }
    }

    /// The embedder's protocol layer announces which client is XWayland.
    pub fn set_xwayland_client(&mut self, client: ClientId) {
        self.xwayland_client = Some(client);
    }

    /// Device topology changed (udev monitor or equivalent); backends
    /// re-enumerate their outputs.
    pub fn notify_hotplug(&mut self) {
        self.signals.emit(Signal::Hotplug);
        self.drain_signals();
    }

    /// Destroy-listener edge: a protocol object died. Routed by tag to the
    /// owning subsystem's teardown.
    pub fn wire_object_destroyed(&mut self, client: ClientId, object: ObjectId) {
        let Some((resource, tag)) = self.registry.wire_object_destroyed(client, object) else {
            return;
        };
        release_by_tag(self, resource, tag);
        self.drain_signals();
    }

    /// Client disconnect tears resources down in a defined order: input
    /// binds first, then surfaces (and roles), buffers, and regions.
    pub fn client_disconnected(&mut self, client: ClientId) {
        let mut resources = self.registry.resources_of_client(client);
        let order = |tag: &str| match tag {
            "keyboard" | "pointer" | "touch" => 0,
            "data-device" | "data-offer" | "data-source" => 1,
            "xdg-popup" | "xdg-toplevel" | "xdg-surface" | "shell-surface" | "subsurface" => 2,
            "surface" | "callback" => 3,
            "buffer" => 4,
            "region" => 5,
            _ => 6,
        };
        resources.sort_by_key(|(_, tag)| order(tag));
        for (resource, tag) in resources {
            // The wire link dies with the client; break it first so the
            // teardown does not destroy dead protocol objects.
            self.registry.invalidate(resource);
            release_by_tag(self, resource, tag);
        }
        if self.xwayland_client == Some(client) {
            self.xwayland_client = None;
        }
        self.drain_signals();
    }
}

fn view_client(comp: &Compositor, vid: Handle) -> Option<ClientId> {
    let sid = comp.views.get(vid)?.surface;
    Some(comp.registry.wire(sid, "surface")?.client())
}

fn release_by_tag(comp: &mut Compositor, resource: Resource, tag: &'static str) {
    match tag {
        "surface" => surface::surface_wire_destroyed(comp, resource),
        "buffer" => buffer::buffer_wire_destroyed(comp, resource),
        "region" => surface::region_wire_destroyed(comp, resource),
        "callback" => {
            comp.callbacks.release(resource);
        },
        "subsurface" => subsurface::subsurface_wire_destroyed(comp, resource),
        "shell-surface" => shell::shell_surface_wire_destroyed(comp, resource),
        "xdg-surface" => shell::xdg_surface_wire_destroyed(comp, resource),
        "xdg-toplevel" => shell::xdg_toplevel_wire_destroyed(comp, resource),
        "xdg-popup" => shell::xdg_popup_wire_destroyed(comp, resource),
        "keyboard" => keyboard::keyboard_bind_wire_destroyed(comp, resource),
        "pointer" => seat::pointer::pointer_bind_wire_destroyed(comp, resource),
        "touch" => seat::touch::touch_bind_wire_destroyed(comp, resource),
        "data-source" => data_device::source_wire_destroyed(comp, resource),
        "data-device" => data_device::device_wire_destroyed(comp, resource),
        "data-offer" => data_device::offer_wire_destroyed(comp, resource),
        "output-bind" => output::output_bind_wire_destroyed(comp, resource),
        other => warn!("no teardown for tag {other:?}"),
    }
}

/// Orderly shutdown. Outputs with pending flips finish their frame before
/// release; the loop stops when the last output is gone.
fn start_terminate(comp: &mut Compositor) {
    if comp.terminating {
        return;
    }
    comp.terminating = true;
    comp.notify_handler(|h, c| h.compositor_terminate(c));

    if let Some(mut backend) = comp.backend.take() {
        backend.terminate(comp);
        comp.backend = Some(backend);
    }

    let remaining: Vec<Handle> = comp.outputs.ids();
    if remaining.is_empty() {
        comp.loop_signal.stop();
        return;
    }
    for oid in remaining {
        scheduler::output_terminate(comp, oid);
    }
}

/// Public termination entry, also reachable via `Signal::Terminate`.
pub fn terminate(comp: &mut Compositor) {
    comp.signals.emit(Signal::Terminate);
    comp.drain_signals();
}

fn insert_unix_signals(comp: &mut Compositor) -> Result<()> {
    use calloop::signals::Signal as UnixSignal;
    use calloop::signals::Signals;

    let signals = Signals::new(&[
        UnixSignal::SIGUSR1,
        UnixSignal::SIGUSR2,
        UnixSignal::SIGTERM,
        UnixSignal::SIGINT,
        UnixSignal::SIGCHLD,
    ])
    .location(loc!())?;

    comp.loop_handle
        .insert_source(signals, |event, _, comp| {
            match event.signal() {
                UnixSignal::SIGUSR1 => {
                    // Shared between the VT protocol and Xwayland's
                    // readiness notification; a pending Xwayland start
                    // claims it.
                    let waiting = comp
                        .xwayland
                        .as_ref()
                        .is_some_and(|x| x.waiting_ready);
                    if waiting {
                        Xwayland::on_ready(comp);
                    } else {
                        session::handle_vt_release(comp);
                    }
                },
                UnixSignal::SIGUSR2 => session::handle_vt_acquire(comp),
                UnixSignal::SIGTERM | UnixSignal::SIGINT => {
                    comp.signals.emit(Signal::Terminate);
                },
                UnixSignal::SIGCHLD => handle_child_exit(comp),
                _ => {},
            }
            comp.drain_signals();
        })
        .map_err(|e| anyhow!("failed to insert signal source: {e:?}"))
        .location(loc!())?;
    Ok(())
}

fn handle_child_exit(comp: &mut Compositor) {
    use nix::sys::wait::WaitPidFlag;
    use nix::sys::wait::WaitStatus;
    use nix::sys::wait::waitpid;
    use nix::unistd::Pid;

    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, _)) | Ok(WaitStatus::Signaled(pid, _, _)) => {
                let broker_pid = comp.session.broker.as_ref().map(|b| b.child);
                if broker_pid == Some(pid) {
                    // Without the broker no device can be reopened; the
                    // session is lost.
                    error!("fd broker died; terminating");
                    comp.signals.emit(Signal::Terminate);
                    continue;
                }
                let xwayland_pid = comp.xwayland.as_ref().map(|x| x.child_pid());
                if xwayland_pid == Some(pid.as_raw() as u32) {
                    let socket = comp
                        .platform
                        .client_sockets
                        .as_mut()
                        .and_then(|f| f.create_client_socket().log(loc!()).ok());
                    let socket = socket.map(|(fd, client)| {
                        comp.xwayland_client = Some(client);
                        fd
                    });
                    Xwayland::on_child_exit(comp, socket);
                }
            },
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => break,
        }
    }
}

fn spawn_xwayland(comp: &mut Compositor) {
    if !comp.config.enable_xwayland {
        return;
    }
    let Some(sockets) = comp.platform.client_sockets.as_mut() else {
        debug!("no client socket factory; xwayland disabled");
        return;
    };
    match sockets.create_client_socket() {
        Ok((fd, client)) => {
            comp.xwayland_client = Some(client);
            match Xwayland::spawn(fd) {
                Ok(xw) => comp.xwayland = Some(xw),
                Err(e) => error!("failed to spawn Xwayland: {e:?}"),
            }
        },
        Err(e) => error!("failed to create Xwayland client socket: {e:?}"),
    }
}

/// Brings the library up: session, seat keymap, backends, input, XWayland.
/// Fails when no backend has an environment to run in.
pub fn init(
    config: Config,
    handler: Box<dyn EventHandler>,
    platform: Platform,
) -> Result<(EventLoop<'static, Compositor>, Compositor)> {
    let session = Session::init(&config).location(loc!())?;

    let event_loop: EventLoop<'static, Compositor> =
        EventLoop::try_new().location(loc!())?;
    let loop_handle = event_loop.handle();
    let loop_signal = event_loop.get_signal();

    let mut comp = Compositor::new(config, handler, platform, session, loop_handle, loop_signal);

    insert_unix_signals(&mut comp).location(loc!())?;

    if let Some(compiler) = comp.platform.keymap.take() {
        match compiler.compile(&comp.config.xkb) {
            Ok(engine) => comp.seat.keymap = Some(engine),
            Err(e) => error!("keymap compilation failed: {e:?}"),
        }
        comp.platform.keymap = Some(compiler);
    }

    let backend = backend::init(&mut comp).location(loc!())?;
    let on_drm = backend.name() == "drm";
    comp.backend = Some(backend);

    // Input events: libinput by default only on DRM (nested and X11
    // backends get input from their host), overridable via WLC_LIBINPUT.
    let want_input = comp.config.use_libinput.unwrap_or(on_drm);
    if want_input {
        comp.session.input = comp.platform.input.take();
    }
    if let Some(fd) = comp.session.input.as_ref().and_then(|i| i.fd()) {
        let source = calloop::generic::Generic::new(
            // SAFETY: the input source (and its fd) lives in the session
            // for the life of the loop.
            unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
            calloop::Interest::READ,
            calloop::Mode::Level,
        );
        comp.loop_handle
            .insert_source(source, |_, _, comp| {
                let events = comp
                    .session
                    .input
                    .as_mut()
                    .map(|i| i.poll())
                    .unwrap_or_default();
                for event in events {
                    comp.signals.emit(Signal::Input(event));
                }
                comp.drain_signals();
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow!("failed to insert input source: {e:?}"))
            .location(loc!())?;
    }

    // Logind signal stream.
    if let Some(events) = comp.session.logind.as_mut().and_then(|l| l.events.take()) {
        comp.loop_handle
            .insert_source(events, |event, _, comp| {
                if let ChannelEvent::Msg(event) = event {
                    session::handle_logind_event(comp, event);
                }
                comp.drain_signals();
            })
            .map_err(|e| anyhow!("failed to insert logind channel: {e:?}"))
            .location(loc!())?;
    }

    spawn_xwayland(&mut comp);

    comp.signals.emit(Signal::Ready);
    comp.drain_signals();

    info!("wlkit initialized");
    Ok((event_loop, comp))
}

/// Runs until terminate. The TTY and session are restored on return.
pub fn run(mut event_loop: EventLoop<'static, Compositor>, mut comp: Compositor) -> Result<()> {
    event_loop
        .run(None, &mut comp, |comp| {
            comp.drain_signals();
        })
        .location(loc!())?;

    trace!(target: channel::RENDER_LOOP, "loop exited");
    if let Some(mut backend) = comp.backend.take() {
        backend.terminate(&mut comp);
    }
    comp.xwayland = None;
    info!("Cleanup wlkit");
    Ok(())
}

/// Test scaffolding: a headless compositor over recording seams. Lives in
/// the crate (not behind cfg(test)) so integration tests and embedders'
/// tests can drive real subsystem code.
pub mod testing {
    use std::rc::Rc;

    use super::*;
    use crate::backend::BackendSurface;
    use crate::backend::BackendSurfaceOps;
    use crate::geometry::Size;
    use crate::interface::NullHandler;
    use crate::output::OutputInformation;
    use crate::output::OutputMode;
    use crate::output::mode_flag;
    use crate::renderer::NullRenderer;
    use crate::renderer::Renderer;
    use crate::wire::testing::RecordingChannel;

    /// Backend surface whose flips complete synchronously.
    #[derive(Debug, Default)]
    pub struct TestSurfaceOps;

    impl BackendSurfaceOps for TestSurfaceOps {
        fn page_flip(&self, _surface: &BackendSurface) -> bool {
            false
        }

        fn create_renderer(&self, _surface: &BackendSurface) -> Result<Box<dyn Renderer>> {
            Ok(Box::new(NullRenderer::default()))
        }
    }

    /// Backend surface that holds flips in flight until released by hand.
    #[derive(Debug, Default)]
    pub struct ManualFlipOps {
        pub flips: std::cell::Cell<u32>,
    }

    impl BackendSurfaceOps for Rc<ManualFlipOps> {
        fn page_flip(&self, _surface: &BackendSurface) -> bool {
            self.flips.set(self.flips.get() + 1);
            true
        }

        fn create_renderer(&self, _surface: &BackendSurface) -> Result<Box<dyn Renderer>> {
            Ok(Box::new(NullRenderer::default()))
        }
    }

    pub fn compositor() -> (EventLoop<'static, Compositor>, Compositor) {
        compositor_with(Box::new(NullHandler))
    }

    pub fn compositor_with(
        handler: Box<dyn EventHandler>,
    ) -> (EventLoop<'static, Compositor>, Compositor) {
        let event_loop: EventLoop<'static, Compositor> =
            EventLoop::try_new().expect("event loop");
        let loop_handle = event_loop.handle();
        let loop_signal = event_loop.get_signal();
        let comp = Compositor::new(
            Config::default(),
            handler,
            Platform::default(),
            Session::default(),
            loop_handle,
            loop_signal,
        );
        (event_loop, comp)
    }

    pub fn output_information(size: Size) -> OutputInformation {
        OutputInformation {
            modes: vec![OutputMode {
                width: size.w as i32,
                height: size.h as i32,
                refresh: 60_000,
                flags: mode_flag::CURRENT | mode_flag::PREFERRED,
            }],
            ..OutputInformation::default()
        }
    }

    /// Adds an output with a synchronously flipping backend surface.
    pub fn add_output(comp: &mut Compositor, size: Size) -> Handle {
        let bsurface = BackendSurface {
            display: 1,
            window: 1,
            ops: Rc::new(TestSurfaceOps),
        };
        let oid = output::output_add(comp, output_information(size), bsurface);
        comp.drain_signals();
        oid
    }

    /// Adds an output whose flips stay pending until `finish_frame`.
    pub fn add_manual_output(
        comp: &mut Compositor,
        size: Size,
    ) -> (Handle, Rc<ManualFlipOps>) {
        let ops = Rc::new(ManualFlipOps::default());
        let bsurface = BackendSurface {
            display: 1,
            window: 1,
            ops: Rc::new(ops.clone()),
        };
        let oid = output::output_add(comp, output_information(size), bsurface);
        comp.drain_signals();
        (oid, ops)
    }

    pub fn client(comp: &mut Compositor, id: u64) -> Rc<RecordingChannel> {
        let _ = comp;
        RecordingChannel::new(ClientId(id))
    }

    /// Creates a surface with a committed shm-like buffer of `size`.
    pub fn mapped_surface(
        comp: &mut Compositor,
        channel: &Rc<RecordingChannel>,
        surface_object: ObjectId,
        buffer_object: ObjectId,
        size: Size,
    ) -> Resource {
        let sid = surface::surface_new(comp, channel.handle(surface_object));
        let buffer = test_buffer(comp, channel, buffer_object, size);
        surface::surface_attach(comp, sid, buffer, Point::ZERO);
        surface::surface_commit(comp, sid);
        comp.drain_signals();
        sid
    }

    pub fn test_buffer(
        comp: &mut Compositor,
        channel: &Rc<RecordingChannel>,
        object: ObjectId,
        size: Size,
    ) -> Resource {
        #[derive(Debug)]
        struct NoPool;
        impl crate::surface::buffer::ShmAccess for NoPool {
            fn with_contents(&self, f: &mut dyn FnMut(&[u8])) {
                f(&[]);
            }
        }
        buffer::buffer_new(
            comp,
            channel.handle(object),
            crate::surface::buffer::BufferBacking::Shm {
                stride: size.w as i32 * 4,
                format: crate::surface::buffer::ShmFormat::Argb8888,
                pool: Rc::new(NoPool),
            },
            size,
        )
    }
}
