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

use num_enum::TryFromPrimitive;
use serde_derive::Deserialize;
use serde_derive::Serialize;

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ZERO: Self = Self { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn min(self, other: Self) -> Self {
        Self {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
        }
    }

    pub fn max(self, other: Self) -> Self {
        Self {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
        }
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl std::ops::Add for Point {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub w: u32,
    pub h: u32,
}

impl Size {
    pub const ZERO: Self = Self { w: 0, h: 0 };

    pub fn new(w: u32, h: u32) -> Self {
        Self { w, h }
    }

    /// Views and surfaces never shrink below a single pixel.
    pub fn clamp_min_area(self) -> Self {
        Self {
            w: self.w.max(1),
            h: self.h.max(1),
        }
    }

    pub fn max(self, other: Self) -> Self {
        Self {
            w: self.w.max(other.w),
            h: self.h.max(other.h),
        }
    }

    pub fn is_zero(self) -> bool {
        self.w == 0 || self.h == 0
    }
}

impl From<(u32, u32)> for Size {
    fn from((w, h): (u32, u32)) -> Self {
        Self { w, h }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Geometry {
    pub origin: Point,
    pub size: Size,
}

impl Geometry {
    pub const ZERO: Self = Self {
        origin: Point::ZERO,
        size: Size::ZERO,
    };

    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self {
            origin: Point::new(x, y),
            size: Size::new(w, h),
        }
    }

    pub fn from_size(size: Size) -> Self {
        Self {
            origin: Point::ZERO,
            size,
        }
    }

    pub fn right(&self) -> i32 {
        self.origin.x + self.size.w as i32
    }

    pub fn bottom(&self) -> i32 {
        self.origin.y + self.size.h as i32
    }

    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.origin.x && p.x < self.right() && p.y >= self.origin.y && p.y < self.bottom()
    }

    /// True when `other` lies entirely inside self.
    pub fn contains(&self, other: &Geometry) -> bool {
        self.origin.x <= other.origin.x
            && self.origin.y <= other.origin.y
            && self.right() >= other.right()
            && self.bottom() >= other.bottom()
    }

    pub fn intersects(&self, other: &Geometry) -> bool {
        !(other.right() <= self.origin.x
            || other.origin.x >= self.right()
            || other.bottom() <= self.origin.y
            || other.origin.y >= self.bottom())
    }

    pub fn intersection(&self, other: &Geometry) -> Option<Geometry> {
        if !self.intersects(other) {
            return None;
        }
        let x = self.origin.x.max(other.origin.x);
        let y = self.origin.y.max(other.origin.y);
        let r = self.right().min(other.right());
        let b = self.bottom().min(other.bottom());
        Some(Geometry::new(x, y, (r - x) as u32, (b - y) as u32))
    }

    pub fn union(&self, other: &Geometry) -> Geometry {
        if self.size.is_zero() {
            return *other;
        }
        if other.size.is_zero() {
            return *self;
        }
        let x = self.origin.x.min(other.origin.x);
        let y = self.origin.y.min(other.origin.y);
        let r = self.right().max(other.right());
        let b = self.bottom().max(other.bottom());
        Geometry::new(x, y, (r - x) as u32, (b - y) as u32)
    }
}

/// wl_output transform enumeration; wire values 0..=7. Anything else is a
/// protocol violation.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u32)]
pub enum Transform {
    #[default]
    Normal = 0,
    Rotated90 = 1,
    Rotated180 = 2,
    Rotated270 = 3,
    Flipped = 4,
    Flipped90 = 5,
    Flipped180 = 6,
    Flipped270 = 7,
}

/// Scale factor from view-local to surface-local coordinates, kept as a pair
/// of ratios so letterboxed shell and X11 surfaces track correctly.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CoordinateTransform {
    pub w: f64,
    pub h: f64,
}

impl Default for CoordinateTransform {
    fn default() -> Self {
        Self { w: 1.0, h: 1.0 }
    }
}

impl CoordinateTransform {
    /// Ratio of view visible size to surface size.
    pub fn between(visible: Size, surface: Size) -> Self {
        if surface.is_zero() {
            return Self::default();
        }
        Self {
            w: visible.w as f64 / surface.w as f64,
            h: visible.h as f64 / surface.h as f64,
        }
    }
}

/// Fits `content` inside `bounds` preserving aspect ratio, centering the
/// result. Used when a shell or X11 surface is smaller than its view bounds.
pub fn letterbox(content: Size, bounds: Geometry) -> Geometry {
    if content.is_zero() || bounds.size.is_zero() {
        return bounds;
    }

    let sx = bounds.size.w as f64 / content.w as f64;
    let sy = bounds.size.h as f64 / content.h as f64;
    let scale = sx.min(sy);
    let w = ((content.w as f64 * scale) as u32).max(1);
    let h = ((content.h as f64 * scale) as u32).max(1);
    let x = bounds.origin.x + ((bounds.size.w as i32 - w as i32) / 2);
    let y = bounds.origin.y + ((bounds.size.h as i32 - h as i32) / 2);
    Geometry::new(x, y, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_inclusive_of_edges() {
        let outer = Geometry::new(0, 0, 100, 100);
        assert!(outer.contains(&Geometry::new(0, 0, 100, 100)));
        assert!(outer.contains(&Geometry::new(10, 10, 90, 90)));
        assert!(!outer.contains(&Geometry::new(10, 10, 91, 90)));
    }

    #[test]
    fn intersection_clips() {
        let a = Geometry::new(0, 0, 10, 10);
        let b = Geometry::new(5, 5, 10, 10);
        assert_eq!(a.intersection(&b), Some(Geometry::new(5, 5, 5, 5)));
        assert_eq!(a.intersection(&Geometry::new(20, 20, 5, 5)), None);
    }

    #[test]
    fn transform_range() {
        assert_eq!(Transform::try_from(3).unwrap(), Transform::Rotated270);
        assert!(Transform::try_from(8).is_err());
    }

    #[test]
    fn letterbox_preserves_aspect() {
        let fitted = letterbox(Size::new(320, 240), Geometry::new(0, 0, 1280, 720));
        assert_eq!(fitted.size, Size::new(960, 720));
        assert_eq!(fitted.origin, Point::new(160, 0));
    }

    #[test]
    fn coordinate_transform_ratios() {
        let t = CoordinateTransform::between(Size::new(640, 480), Size::new(320, 240));
        assert_eq!(t.w, 2.0);
        assert_eq!(t.h, 2.0);
    }
}
