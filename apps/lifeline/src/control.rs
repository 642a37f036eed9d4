use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use lifeline_proto::{Modifiers, RemoteEvent};

use crate::peer::PeerConnectionManager;

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("a control surface is already attached")]
    AlreadyAttached,
}

/// Pixel geometry of the shared view inside the local UI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceBounds {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// The seam between the control handler and whatever UI toolkit hosts
/// the session view. The capture side only needs geometry and focus
/// state; the replay side needs the two mutations a remote agent is
/// allowed to perform.
pub trait ControlSurface: Send + Sync {
    fn bounds(&self) -> SurfaceBounds;
    /// Activate the interactive element under the given surface pixel,
    /// if any. Returns whether something was actually clicked.
    fn activate_at(&self, x: f64, y: f64) -> bool;
    /// Smooth-scroll the view by raw wheel deltas.
    fn scroll_by(&self, delta_x: f64, delta_y: f64);
    /// Whether keyboard focus currently sits inside a text entry.
    fn text_entry_focused(&self) -> bool;
}

/// Where captured events go. `false` means the transport dropped the
/// event (channel not ready) — callers treat that as lossy, not fatal.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send_event(&self, event: &RemoteEvent) -> bool;
}

#[async_trait]
impl EventSink for PeerConnectionManager {
    async fn send_event(&self, event: &RemoteEvent) -> bool {
        self.send_remote_event(event).await
    }
}

/// One local input occurrence, as reported by the embedding UI shell.
/// Pointer coordinates are absolute (client) pixels; translation to
/// container-relative fractions happens here.
#[derive(Debug, Clone)]
pub enum InputCapture {
    PointerMove { x: f64, y: f64 },
    PointerDown { x: f64, y: f64, button: u8 },
    PointerUp { x: f64, y: f64, button: u8 },
    PointerClick { x: f64, y: f64, button: u8 },
    Wheel { delta_x: f64, delta_y: f64 },
    KeyDown { key: String, code: String, modifiers: Modifiers },
    KeyUp { key: String, code: String, modifiers: Modifiers },
}

type CursorListener = Box<dyn Fn(f64, f64) + Send + Sync>;

/// Translates local input into wire events on the viewer side and
/// replays incoming events on the host side.
///
/// `enable`/`disable` only gate transmission — the surface stays
/// attached either way so toggling control doesn't churn listeners.
/// Replay likewise does not consult the flag: the host UI decides
/// whether to route incoming events here based on the session's
/// remote-control state.
pub struct RemoteControlHandler {
    sink: Arc<dyn EventSink>,
    surface: Mutex<Option<Arc<dyn ControlSurface>>>,
    enabled: AtomicBool,
    cursor_listener: Mutex<Option<CursorListener>>,
}

impl RemoteControlHandler {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            surface: Mutex::new(None),
            enabled: AtomicBool::new(false),
            cursor_listener: Mutex::new(None),
        }
    }

    /// Bind to the session view. Errors if a surface is already bound:
    /// attach is only idempotent after a detach.
    pub fn attach(&self, surface: Arc<dyn ControlSurface>) -> Result<(), ControlError> {
        let mut slot = self.surface.lock().expect("surface lock");
        if slot.is_some() {
            return Err(ControlError::AlreadyAttached);
        }
        *slot = Some(surface);
        Ok(())
    }

    pub fn detach(&self) {
        self.surface.lock().expect("surface lock").take();
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Observer for remote cursor movement; replayed `mousemove` events
    /// go here and nowhere else.
    pub fn set_cursor_listener<F>(&self, listener: F)
    where
        F: Fn(f64, f64) + Send + Sync + 'static,
    {
        *self.cursor_listener.lock().expect("cursor lock") = Some(Box::new(listener));
    }

    /// Capture one local input occurrence. Returns whether a wire event
    /// was actually handed to the transport.
    pub async fn capture(&self, input: InputCapture) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let surface = match self.surface.lock().expect("surface lock").clone() {
            Some(surface) => surface,
            None => return false,
        };
        let event = match translate(&input, surface.bounds(), surface.text_entry_focused()) {
            Some(event) => event,
            None => return false,
        };
        self.sink.send_event(&event).await
    }

    /// Replay one event received from the remote side.
    ///
    /// Keyboard events are logged only: trusted synthetic key dispatch
    /// is not available to this process, and faking it at another layer
    /// would change the security posture. This is a documented product
    /// limitation, not a gap.
    pub fn handle_remote_event(&self, event: &RemoteEvent) {
        match event {
            RemoteEvent::MouseMove { x, y } => {
                if let Some(listener) = self.cursor_listener.lock().expect("cursor lock").as_ref()
                {
                    listener(*x, *y);
                }
            }
            RemoteEvent::Click { x, y, button } => {
                let surface = self.surface.lock().expect("surface lock").clone();
                let Some(surface) = surface else { return };
                let bounds = surface.bounds();
                let px = bounds.left + x * bounds.width;
                let py = bounds.top + y * bounds.height;
                if surface.activate_at(px, py) {
                    debug!(x = px, y = py, button, "replayed remote click");
                } else {
                    debug!(x = px, y = py, "remote click hit nothing interactive");
                }
            }
            RemoteEvent::Scroll { delta_x, delta_y } => {
                let surface = self.surface.lock().expect("surface lock").clone();
                if let Some(surface) = surface {
                    surface.scroll_by(*delta_x, *delta_y);
                }
            }
            RemoteEvent::MouseDown { .. } | RemoteEvent::MouseUp { .. } => {
                // Only full clicks are replayed; raw press/release pairs
                // carry no extra meaning for button/link activation.
                debug!(?event, "ignoring raw pointer transition");
            }
            RemoteEvent::KeyDown { key, .. } | RemoteEvent::KeyUp { key, .. } => {
                debug!(%key, "keyboard replay suppressed");
            }
        }
    }

    /// Full teardown: drop the surface, the cursor observer, and the
    /// transmission gate.
    pub fn cleanup(&self) {
        self.detach();
        self.cursor_listener.lock().expect("cursor lock").take();
        self.disable();
    }
}

/// Local input → wire event. Pointer positions become container-
/// relative fractions, wheel deltas pass through raw, and key events
/// are suppressed while a text entry has focus so local typing is
/// never hijacked.
fn translate(
    input: &InputCapture,
    bounds: SurfaceBounds,
    text_entry_focused: bool,
) -> Option<RemoteEvent> {
    if bounds.width <= 0.0 || bounds.height <= 0.0 {
        return None;
    }
    let normalize = |x: f64, y: f64| {
        (
            (x - bounds.left) / bounds.width,
            (y - bounds.top) / bounds.height,
        )
    };

    match input {
        InputCapture::PointerMove { x, y } => {
            let (x, y) = normalize(*x, *y);
            Some(RemoteEvent::MouseMove { x, y })
        }
        InputCapture::PointerDown { x, y, button } => {
            let (x, y) = normalize(*x, *y);
            Some(RemoteEvent::MouseDown {
                x,
                y,
                button: *button,
            })
        }
        InputCapture::PointerUp { x, y, button } => {
            let (x, y) = normalize(*x, *y);
            Some(RemoteEvent::MouseUp {
                x,
                y,
                button: *button,
            })
        }
        InputCapture::PointerClick { x, y, button } => {
            let (x, y) = normalize(*x, *y);
            Some(RemoteEvent::Click {
                x,
                y,
                button: *button,
            })
        }
        InputCapture::Wheel { delta_x, delta_y } => Some(RemoteEvent::Scroll {
            delta_x: *delta_x,
            delta_y: *delta_y,
        }),
        InputCapture::KeyDown {
            key,
            code,
            modifiers,
        } => {
            if text_entry_focused {
                return None;
            }
            Some(RemoteEvent::KeyDown {
                key: key.clone(),
                code: code.clone(),
                modifiers: *modifiers,
            })
        }
        InputCapture::KeyUp {
            key,
            code,
            modifiers,
        } => {
            if text_entry_focused {
                return None;
            }
            Some(RemoteEvent::KeyUp {
                key: key.clone(),
                code: code.clone(),
                modifiers: *modifiers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        events: StdMutex<Vec<RemoteEvent>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send_event(&self, event: &RemoteEvent) -> bool {
            self.events.lock().unwrap().push(event.clone());
            true
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum SurfaceCall {
        Activate(f64, f64),
        Scroll(f64, f64),
    }

    struct ScriptedSurface {
        bounds: SurfaceBounds,
        text_entry_focused: bool,
        interactive: bool,
        calls: StdMutex<Vec<SurfaceCall>>,
    }

    impl ScriptedSurface {
        fn new() -> Self {
            Self {
                bounds: SurfaceBounds {
                    left: 100.0,
                    top: 50.0,
                    width: 200.0,
                    height: 100.0,
                },
                text_entry_focused: false,
                interactive: true,
                calls: StdMutex::new(Vec::new()),
            }
        }
    }

    impl ControlSurface for ScriptedSurface {
        fn bounds(&self) -> SurfaceBounds {
            self.bounds
        }

        fn activate_at(&self, x: f64, y: f64) -> bool {
            self.calls.lock().unwrap().push(SurfaceCall::Activate(x, y));
            self.interactive
        }

        fn scroll_by(&self, delta_x: f64, delta_y: f64) {
            self.calls
                .lock()
                .unwrap()
                .push(SurfaceCall::Scroll(delta_x, delta_y));
        }

        fn text_entry_focused(&self) -> bool {
            self.text_entry_focused
        }
    }

    fn handler_with(
        surface: Arc<ScriptedSurface>,
    ) -> (RemoteControlHandler, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let handler = RemoteControlHandler::new(sink.clone());
        handler.attach(surface).unwrap();
        (handler, sink)
    }

    #[test_timeout::timeout]
    fn pointer_positions_normalize_to_container_fractions() {
        let bounds = SurfaceBounds {
            left: 100.0,
            top: 50.0,
            width: 200.0,
            height: 100.0,
        };
        let event = translate(
            &InputCapture::PointerMove { x: 184.0, y: 137.0 },
            bounds,
            false,
        )
        .unwrap();
        match event {
            RemoteEvent::MouseMove { x, y } => {
                assert!((x - 0.42).abs() < 1e-9);
                assert!((y - 0.87).abs() < 1e-9);
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Degenerate geometry produces nothing rather than NaN.
        let flat = SurfaceBounds {
            left: 0.0,
            top: 0.0,
            width: 0.0,
            height: 100.0,
        };
        assert!(translate(&InputCapture::PointerMove { x: 1.0, y: 1.0 }, flat, false).is_none());
    }

    #[test_timeout::timeout]
    fn keys_are_suppressed_while_typing_locally() {
        let bounds = SurfaceBounds {
            left: 0.0,
            top: 0.0,
            width: 100.0,
            height: 100.0,
        };
        let key = InputCapture::KeyDown {
            key: "a".to_string(),
            code: "KeyA".to_string(),
            modifiers: Modifiers::default(),
        };
        assert!(translate(&key, bounds, true).is_none());
        assert!(matches!(
            translate(&key, bounds, false),
            Some(RemoteEvent::KeyDown { .. })
        ));
        // Wheel deltas pass through raw either way.
        assert!(matches!(
            translate(
                &InputCapture::Wheel {
                    delta_x: -3.0,
                    delta_y: 120.0
                },
                bounds,
                true
            ),
            Some(RemoteEvent::Scroll {
                delta_x,
                delta_y
            }) if delta_x == -3.0 && delta_y == 120.0
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn capture_is_gated_by_the_enable_flag() {
        let (handler, sink) = handler_with(Arc::new(ScriptedSurface::new()));

        assert!(
            !handler
                .capture(InputCapture::PointerMove { x: 150.0, y: 100.0 })
                .await
        );
        assert!(sink.events.lock().unwrap().is_empty());

        handler.enable();
        assert!(
            handler
                .capture(InputCapture::PointerMove { x: 150.0, y: 100.0 })
                .await
        );
        assert_eq!(sink.events.lock().unwrap().len(), 1);

        handler.disable();
        assert!(
            !handler
                .capture(InputCapture::PointerMove { x: 150.0, y: 100.0 })
                .await
        );
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn mousemove_round_trips_through_capture_and_replay() {
        let surface = Arc::new(ScriptedSurface::new());
        let (handler, sink) = handler_with(surface.clone());
        handler.enable();

        // 0.42/0.87 in surface-local fractions.
        assert!(
            handler
                .capture(InputCapture::PointerMove { x: 184.0, y: 137.0 })
                .await
        );
        let sent = sink.events.lock().unwrap().last().cloned().unwrap();

        let observed = Arc::new(StdMutex::new(None));
        let observed_in = observed.clone();
        handler.set_cursor_listener(move |x, y| {
            *observed_in.lock().unwrap() = Some((x, y));
        });
        handler.handle_remote_event(&sent);

        let (x, y) = observed.lock().unwrap().expect("cursor listener fired");
        assert!((x - 0.42).abs() < 1e-9);
        assert!((y - 0.87).abs() < 1e-9);
        // Cursor updates never touch the surface.
        assert!(surface.calls.lock().unwrap().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn clicks_and_scrolls_replay_against_the_surface() {
        let surface = Arc::new(ScriptedSurface::new());
        let (handler, _sink) = handler_with(surface.clone());

        handler.handle_remote_event(&RemoteEvent::Click {
            x: 0.5,
            y: 0.5,
            button: 0,
        });
        handler.handle_remote_event(&RemoteEvent::Scroll {
            delta_x: 0.0,
            delta_y: 80.0,
        });
        // Keyboard replay is deliberately a no-op.
        handler.handle_remote_event(&RemoteEvent::KeyDown {
            key: "Enter".to_string(),
            code: "Enter".to_string(),
            modifiers: Modifiers::default(),
        });

        let calls = surface.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                SurfaceCall::Activate(200.0, 100.0),
                SurfaceCall::Scroll(0.0, 80.0),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn attach_is_exclusive_until_detach() {
        let sink = Arc::new(RecordingSink::default());
        let handler = RemoteControlHandler::new(sink);

        handler.attach(Arc::new(ScriptedSurface::new())).unwrap();
        assert_eq!(
            handler.attach(Arc::new(ScriptedSurface::new())),
            Err(ControlError::AlreadyAttached)
        );

        handler.detach();
        assert!(handler.attach(Arc::new(ScriptedSurface::new())).is_ok());

        handler.enable();
        handler.cleanup();
        assert!(!handler.is_enabled());
        assert!(
            !handler
                .capture(InputCapture::PointerMove { x: 1.0, y: 1.0 })
                .await
        );
    }
}
