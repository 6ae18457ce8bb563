//! Position, drag, lock and visibility state of the floating timer widget.
//!
//! Purely presentational: nothing here touches the countdown, and nothing is
//! persisted across restarts.

use serde::{Deserialize, Serialize};

pub const DEFAULT_POSITION: Point = Point { x: 20, y: 80 };
pub const DEFAULT_WIDGET_SIZE: Size = Size {
    width: 200,
    height: 200,
};
pub const DEFAULT_VIEWPORT: Size = Size {
    width: 1280,
    height: 800,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FloatingWidget {
    position: Point,
    viewport: Size,
    size: Size,
    /// Last pointer position seen during a drag; `None` when not dragging.
    #[serde(skip)]
    last_pointer: Option<Point>,
    locked: bool,
    visible: bool,
}

impl Default for FloatingWidget {
    fn default() -> Self {
        Self::new(DEFAULT_VIEWPORT)
    }
}

impl FloatingWidget {
    pub fn new(viewport: Size) -> Self {
        Self::with_geometry(DEFAULT_POSITION, DEFAULT_WIDGET_SIZE, viewport)
    }

    pub fn with_geometry(position: Point, size: Size, viewport: Size) -> Self {
        let mut widget = Self {
            position,
            viewport,
            size,
            last_pointer: None,
            locked: false,
            visible: true,
        };
        widget.position = widget.clamp(position);
        widget
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn is_dragging(&self) -> bool {
        self.last_pointer.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Begins a drag at `pointer`. Ignored while locked.
    pub fn on_drag_start(&mut self, pointer: Point) {
        if self.locked {
            return;
        }
        self.last_pointer = Some(pointer);
    }

    /// Moves the widget by the pointer delta since the last event, keeping it
    /// fully inside the viewport.
    pub fn on_drag_move(&mut self, pointer: Point) {
        let Some(last) = self.last_pointer else {
            return;
        };
        // Pointer input arrives from clients unchecked; saturate instead of
        // overflowing so extreme values still clamp to the right edge.
        let moved = Point::new(
            self.position.x.saturating_add(pointer.x.saturating_sub(last.x)),
            self.position.y.saturating_add(pointer.y.saturating_sub(last.y)),
        );
        self.last_pointer = Some(pointer);
        self.position = self.clamp(moved);
    }

    pub fn on_drag_end(&mut self) {
        self.last_pointer = None;
    }

    pub fn toggle_lock(&mut self) -> bool {
        self.locked = !self.locked;
        self.locked
    }

    /// Hidden widgets are replaced by a small re-open button.
    pub fn toggle_visible(&mut self) -> bool {
        self.visible = !self.visible;
        if !self.visible {
            self.last_pointer = None;
        }
        self.visible
    }

    /// Applies a new viewport and pulls the widget back inside it.
    pub fn resize(&mut self, viewport: Size) {
        self.viewport = viewport;
        self.position = self.clamp(self.position);
    }

    // Upper bounds below zero (viewport smaller than the widget) pin to 0.
    fn clamp(&self, p: Point) -> Point {
        let max_x = self.viewport.width.saturating_sub(self.size.width);
        let max_y = self.viewport.height.saturating_sub(self.size.height);
        Point::new(p.x.min(max_x).max(0), p.y.min(max_y).max(0))
    }
}
