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

use crate::geometry::Geometry;
use crate::geometry::Point;

/// A set of pixels represented as a list of rectangles. Damage, opaque, and
/// input regions are all small in practice (clients send a handful of rects
/// per commit), so no banding is done; extents are kept incrementally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Geometry>,
    extents: Geometry,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Geometry) -> Self {
        let mut region = Self::new();
        region.add(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn extents(&self) -> Geometry {
        self.extents
    }

    pub fn rects(&self) -> &[Geometry] {
        &self.rects
    }

    pub fn clear(&mut self) {
        self.rects.clear();
        self.extents = Geometry::ZERO;
    }

    /// Union a rectangle into the set. Rectangles already covered are
    /// dropped; a rectangle covering the whole set replaces it.
    pub fn add(&mut self, rect: Geometry) {
        if rect.size.is_zero() {
            return;
        }
        if self.rects.iter().any(|r| r.contains(&rect)) {
            return;
        }
        self.rects.retain(|r| !rect.contains(r));
        self.rects.push(rect);
        self.extents = self.extents.union(&rect);
    }

    /// Union another region into this one.
    pub fn add_region(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    /// Intersect the region with `bounds`, dropping everything outside.
    /// Surface commits clamp all three client regions to the surface size.
    pub fn clamp(&mut self, bounds: Geometry) {
        let mut clamped = Region::new();
        for rect in &self.rects {
            if let Some(clipped) = rect.intersection(&bounds) {
                clamped.add(clipped);
            }
        }
        *self = clamped;
    }

    pub fn contains_point(&self, p: Point) -> bool {
        self.rects.iter().any(|r| r.contains_point(p))
    }

    /// Exact coverage test: true when every pixel of `target` is inside the
    /// region. Works by subtracting each rect from a worklist of uncovered
    /// pieces.
    pub fn covers(&self, target: Geometry) -> bool {
        if target.size.is_zero() {
            return true;
        }
        let mut uncovered = vec![target];
        for rect in &self.rects {
            let mut next = Vec::with_capacity(uncovered.len());
            for piece in uncovered {
                subtract(piece, *rect, &mut next);
            }
            uncovered = next;
            if uncovered.is_empty() {
                return true;
            }
        }
        false
    }
}

/// Appends `piece - rect` (up to four fragments) onto `out`.
fn subtract(piece: Geometry, rect: Geometry, out: &mut Vec<Geometry>) {
    let Some(overlap) = piece.intersection(&rect) else {
        out.push(piece);
        return;
    };

    // Above the overlap.
    if overlap.origin.y > piece.origin.y {
        out.push(Geometry::new(
            piece.origin.x,
            piece.origin.y,
            piece.size.w,
            (overlap.origin.y - piece.origin.y) as u32,
        ));
    }
    // Below the overlap.
    if overlap.bottom() < piece.bottom() {
        out.push(Geometry::new(
            piece.origin.x,
            overlap.bottom(),
            piece.size.w,
            (piece.bottom() - overlap.bottom()) as u32,
        ));
    }
    // Left of the overlap, clipped to the overlap's rows.
    if overlap.origin.x > piece.origin.x {
        out.push(Geometry::new(
            piece.origin.x,
            overlap.origin.y,
            (overlap.origin.x - piece.origin.x) as u32,
            overlap.size.h,
        ));
    }
    // Right of the overlap, clipped to the overlap's rows.
    if overlap.right() < piece.right() {
        out.push(Geometry::new(
            overlap.right(),
            overlap.origin.y,
            (piece.right() - overlap.right()) as u32,
            overlap.size.h,
        ));
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::geometry::Size;

    #[test]
    fn add_deduplicates_covered_rects() {
        let mut region = Region::new();
        region.add(Geometry::new(0, 0, 100, 100));
        region.add(Geometry::new(10, 10, 10, 10));
        assert_eq!(region.rects().len(), 1);

        let mut region = Region::new();
        region.add(Geometry::new(10, 10, 10, 10));
        region.add(Geometry::new(0, 0, 100, 100));
        assert_eq!(region.rects().len(), 1);
    }

    #[test]
    fn clamp_clips_to_bounds() {
        let mut region = Region::from_rect(Geometry::new(-20, -20, 100, 100));
        region.clamp(Geometry::new(0, 0, 50, 50));
        assert_eq!(region.extents(), Geometry::new(0, 0, 50, 50));
    }

    #[test]
    fn clamp_drops_disjoint_rects() {
        let mut region = Region::from_rect(Geometry::new(200, 200, 10, 10));
        region.clamp(Geometry::new(0, 0, 50, 50));
        assert!(region.is_empty());
    }

    #[test]
    fn covers_needs_full_coverage() {
        let mut region = Region::new();
        region.add(Geometry::new(0, 0, 50, 100));
        assert!(!region.covers(Geometry::new(0, 0, 100, 100)));
        region.add(Geometry::new(50, 0, 50, 100));
        assert!(region.covers(Geometry::new(0, 0, 100, 100)));
    }

    #[test]
    fn covers_handles_overlap() {
        let mut region = Region::new();
        region.add(Geometry::new(0, 0, 60, 100));
        region.add(Geometry::new(40, 0, 60, 100));
        assert!(region.covers(Geometry::new(0, 0, 100, 100)));
    }

    fn arb_rect() -> impl Strategy<Value = Geometry> {
        (0i32..64, 0i32..64, 1u32..32, 1u32..32)
            .prop_map(|(x, y, w, h)| Geometry::new(x, y, w, h))
    }

    proptest! {
        #[test]
        fn union_extents_clipped_to_bounds(rects in prop::collection::vec(arb_rect(), 1..8)) {
            let bounds = Geometry::from_size(Size::new(48, 48));
            let mut region = Region::new();
            for r in &rects {
                region.add(*r);
            }
            region.clamp(bounds);
            if !region.is_empty() {
                prop_assert!(bounds.contains(&region.extents()));
            }
        }

        #[test]
        fn every_added_point_is_contained(rects in prop::collection::vec(arb_rect(), 1..8)) {
            let mut region = Region::new();
            for r in &rects {
                region.add(*r);
            }
            for r in &rects {
                prop_assert!(region.contains_point(r.origin));
                prop_assert!(region.covers(*r));
            }
        }

        #[test]
        fn covers_agrees_with_pointwise_check(
            rects in prop::collection::vec(arb_rect(), 1..6),
            target in arb_rect(),
        ) {
            let mut region = Region::new();
            for r in &rects {
                region.add(*r);
            }
            let covered = region.covers(target);
            let mut all_points = true;
            'outer: for x in target.origin.x..target.right() {
                for y in target.origin.y..target.bottom() {
                    if !region.contains_point(Point::new(x, y)) {
                        all_points = false;
                        break 'outer;
                    }
                }
            }
            prop_assert_eq!(covered, all_points);
        }
    }
}
