//! Viewport state, pointer and touch gestures, and camera sync.
//!
//! Screen space has its origin at the window's top-left corner with y growing
//! downwards, like the scan's world space. The viewport maps between them
//! with `screen = world * zoom + offset`.

use bevy::camera::{OrthographicProjection, Projection};
use bevy::ecs::message::{MessageReader, MessageWriter};
use bevy::input::mouse::{MouseScrollUnit, MouseWheel};
use bevy::input::touch::Touches;
use bevy::prelude::*;
use bevy::window::PrimaryWindow;

use crate::geometry::{distance, midpoint};
use crate::plugins::core::MapConfig;
use crate::plugins::snapshot::ScanStore;

/// Below this finger spread a pinch is ignored.
const MIN_PINCH_DISTANCE: f32 = 1.0;

// =============================================================================
// Messages
// =============================================================================

/// A press and release that stayed within the click slop.
#[derive(Message, Debug, Clone, Copy)]
pub struct MapClick {
    pub screen: Vec2,
}

// =============================================================================
// Resources
// =============================================================================

#[derive(Resource, Debug, Clone, PartialEq)]
pub struct Viewport {
    zoom: f32,
    offset: Vec2,
    zoom_min: f32,
    zoom_max: f32,
    panning: bool,
    last_pointer: Option<Vec2>,
}

impl FromWorld for Viewport {
    fn from_world(world: &mut World) -> Self {
        let config = world
            .get_resource::<MapConfig>()
            .cloned()
            .unwrap_or_default();
        Viewport::new(config.zoom_default, config.zoom_min, config.zoom_max)
    }
}

impl Viewport {
    pub fn new(zoom: f32, zoom_min: f32, zoom_max: f32) -> Self {
        Self {
            zoom: zoom.clamp(zoom_min, zoom_max),
            offset: Vec2::ZERO,
            zoom_min,
            zoom_max,
            panning: false,
            last_pointer: None,
        }
    }

    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.offset = offset;
        self
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn label(&self) -> String {
        format!("{:.1}x", self.zoom)
    }

    pub fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        (screen - self.offset) / self.zoom
    }

    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        world * self.zoom + self.offset
    }

    /// Sets the zoom while keeping the world point under `anchor` fixed.
    pub fn zoom_to(&mut self, anchor: Vec2, requested: f32) -> bool {
        if !requested.is_finite() {
            return false;
        }
        let next = requested.clamp(self.zoom_min, self.zoom_max);
        if next == self.zoom {
            return false;
        }

        let world = self.screen_to_world(anchor);
        self.zoom = next;
        self.offset = anchor - world * next;
        true
    }

    /// `delta_y` is in pixels; negative values zoom in.
    pub fn wheel_zoom_at(&mut self, anchor: Vec2, delta_y: f32, divisor: f32) -> bool {
        if divisor <= 0.0 {
            return false;
        }
        let requested = self.zoom - (delta_y / divisor) * self.zoom;
        self.zoom_to(anchor, requested)
    }

    /// Fingers moving apart zoom in.
    pub fn pinch_zoom_at(
        &mut self,
        midpoint: Vec2,
        last_distance: f32,
        distance: f32,
        divisor: f32,
    ) -> bool {
        if last_distance < MIN_PINCH_DISTANCE || distance < MIN_PINCH_DISTANCE || divisor <= 0.0 {
            return false;
        }
        let delta = last_distance - distance;
        let requested = self.zoom - (delta / divisor) * self.zoom;
        self.zoom_to(midpoint, requested)
    }

    pub fn start_pan(&mut self, pointer: Vec2) {
        self.panning = true;
        self.last_pointer = Some(pointer);
    }

    /// Moves the offset by the pointer travel since the last call.
    pub fn pan_to(&mut self, pointer: Vec2) -> Vec2 {
        if !self.panning {
            return Vec2::ZERO;
        }

        match self.last_pointer {
            Some(last) => {
                let delta = pointer - last;
                self.offset += delta;
                self.last_pointer = Some(pointer);
                delta
            }
            None => {
                self.last_pointer = Some(pointer);
                Vec2::ZERO
            }
        }
    }

    pub fn end_pan(&mut self) {
        self.panning = false;
        self.last_pointer = None;
    }

    pub fn is_panning(&self) -> bool {
        self.panning
    }

    /// Puts `world` at `screen`.
    pub fn center_on(&mut self, world: Vec2, screen: Vec2) {
        self.offset = screen - world * self.zoom;
    }
}

/// Press point of the current mouse gesture.
#[derive(Resource, Debug, Default)]
pub struct PointerGesture {
    press: Option<Vec2>,
}

impl PointerGesture {
    pub fn press(&mut self, at: Vec2) {
        self.press = Some(at);
    }

    /// True when the release counts as a click.
    pub fn release(&mut self, at: Vec2, slop: f32) -> bool {
        match self.press.take() {
            Some(press) => distance(press, at) <= slop,
            None => false,
        }
    }

    pub fn cancel(&mut self) {
        self.press = None;
    }

    pub fn is_pressed(&self) -> bool {
        self.press.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchStep {
    Idle,
    /// The finger count changed; references were taken from the new touches.
    Reseeded,
    Pan {
        to: Vec2,
    },
    Pinch {
        midpoint: Vec2,
        last_distance: f32,
        distance: f32,
    },
}

#[derive(Resource, Debug, Default)]
pub struct TouchGesture {
    count: usize,
    peak: usize,
    last_distance: Option<f32>,
}

impl TouchGesture {
    /// Feeds the active touch points, sorted by touch id.
    pub fn update(&mut self, points: &[Vec2]) -> TouchStep {
        if points.len() != self.count {
            if self.count == 0 {
                self.peak = points.len();
            } else {
                self.peak = self.peak.max(points.len());
            }
            self.count = points.len();
            self.last_distance = match points {
                [a, b, ..] => Some(distance(*a, *b)),
                _ => None,
            };
            return match points.len() {
                0 => TouchStep::Idle,
                _ => TouchStep::Reseeded,
            };
        }

        match points {
            [] => TouchStep::Idle,
            [only] => TouchStep::Pan { to: *only },
            [a, b, ..] => {
                let spread = distance(*a, *b);
                let last_distance = self.last_distance.replace(spread).unwrap_or(spread);
                TouchStep::Pinch {
                    midpoint: midpoint(*a, *b),
                    last_distance,
                    distance: spread,
                }
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Most fingers seen since the gesture began.
    pub fn peak(&self) -> usize {
        self.peak
    }
}

// =============================================================================
// Systems
// =============================================================================

pub fn setup_camera(mut commands: Commands, viewport: Res<Viewport>) {
    info!("Setting up map camera at zoom {}", viewport.label());

    commands.spawn((
        Camera2d,
        Projection::Orthographic(OrthographicProjection {
            scale: 1.0 / viewport.zoom(),
            ..OrthographicProjection::default_2d()
        }),
        Name::new("MapCamera"),
    ));
}

/// Centers the view on the viewer's first occupied star.
pub fn center_on_home(
    store: Res<ScanStore>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut viewport: ResMut<Viewport>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    let Some(scan) = store.scan() else {
        return;
    };
    let home = scan
        .stars
        .iter()
        .find(|star| scan.is_viewer(star.occupier.as_ref()))
        .map(|star| star.position.vec())
        .unwrap_or(Vec2::ZERO);

    viewport.center_on(home, window.size() / 2.0);
    info!("Map centered on ({:.1}, {:.1})", home.x, home.y);
}

pub fn sync_camera(
    viewport: Res<Viewport>,
    windows: Query<&Window, With<PrimaryWindow>>,
    mut cameras: Query<(&mut Projection, &mut Transform), With<Camera2d>>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    let center = to_render(viewport.screen_to_world(window.size() / 2.0));
    let scale = 1.0 / viewport.zoom();

    for (mut projection, mut transform) in cameras.iter_mut() {
        if let Projection::Orthographic(orthographic) = &mut *projection {
            if orthographic.scale != scale {
                orthographic.scale = scale;
            }
        }
        transform.translation.x = center.x;
        transform.translation.y = center.y;
    }
}

pub fn handle_wheel_zoom(
    mut wheel: MessageReader<MouseWheel>,
    windows: Query<&Window, With<PrimaryWindow>>,
    config: Res<MapConfig>,
    mut viewport: ResMut<Viewport>,
) {
    let Ok(window) = windows.single() else {
        return;
    };
    let Some(cursor) = window.cursor_position() else {
        wheel.clear();
        return;
    };

    for event in wheel.read() {
        let delta_y = wheel_delta_pixels(event.unit, event.y, config.wheel_line_px);
        viewport.wheel_zoom_at(cursor, delta_y, config.wheel_zoom_divisor);
    }
}

/// Left drag pans; a release near the press point is a click.
pub fn handle_mouse_pointer(
    buttons: Res<ButtonInput<MouseButton>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    config: Res<MapConfig>,
    mut viewport: ResMut<Viewport>,
    mut gesture: ResMut<PointerGesture>,
    mut clicks: MessageWriter<MapClick>,
) {
    let Ok(window) = windows.single() else {
        return;
    };

    // Leaving the window ends a mouse drag; touch pans are left alone.
    let Some(cursor) = window.cursor_position() else {
        if gesture.is_pressed() {
            viewport.end_pan();
            gesture.cancel();
        }
        return;
    };

    if buttons.just_pressed(MouseButton::Left) {
        viewport.start_pan(cursor);
        gesture.press(cursor);
    } else if buttons.pressed(MouseButton::Left) && viewport.is_panning() {
        viewport.pan_to(cursor);
    }

    if buttons.just_released(MouseButton::Left) {
        viewport.end_pan();
        if gesture.release(cursor, config.click_slop_px) {
            clicks.write(MapClick { screen: cursor });
        }
    }
}

pub fn handle_touch(
    touches: Res<Touches>,
    config: Res<MapConfig>,
    mut viewport: ResMut<Viewport>,
    mut gesture: ResMut<TouchGesture>,
    mut clicks: MessageWriter<MapClick>,
) {
    let mut active: Vec<(u64, Vec2)> = touches.iter().map(|t| (t.id(), t.position())).collect();
    let released = touches.iter_just_released().count() + touches.iter_just_canceled().count();
    if active.is_empty() && gesture.count() == 0 && released == 0 {
        return;
    }
    active.sort_by_key(|(id, _)| *id);
    let points: Vec<Vec2> = active.into_iter().map(|(_, position)| position).collect();

    match gesture.update(&points) {
        TouchStep::Reseeded => match points.as_slice() {
            [only] => viewport.start_pan(*only),
            _ => viewport.end_pan(),
        },
        TouchStep::Pan { to } => {
            viewport.pan_to(to);
        }
        TouchStep::Pinch {
            midpoint,
            last_distance,
            distance,
        } => {
            viewport.pinch_zoom_at(midpoint, last_distance, distance, config.pinch_zoom_divisor);
        }
        TouchStep::Idle => {
            if viewport.is_panning() {
                viewport.end_pan();
            }
        }
    }

    if points.is_empty() && gesture.peak() == 1 {
        for touch in touches.iter_just_released() {
            if distance(touch.start_position(), touch.position()) <= config.click_slop_px {
                clicks.write(MapClick {
                    screen: touch.position(),
                });
            }
        }
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Wheel travel as DOM-style pixels: positive means scrolling down.
pub fn wheel_delta_pixels(unit: MouseScrollUnit, y: f32, line_px: f32) -> f32 {
    let scale = match unit {
        MouseScrollUnit::Line => line_px,
        MouseScrollUnit::Pixel => 1.0,
    };
    -y * scale
}

/// Scan space has y pointing down; Bevy's world has it pointing up.
pub fn to_render(world: Vec2) -> Vec2 {
    Vec2::new(world.x, -world.y)
}

// =============================================================================
// Tests
// =============================================================================
