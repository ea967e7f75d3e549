//! Region geometry
//!
//! Rotated bounding quadrilaterals for detected text and the axis-aligned
//! crop rectangles derived from them.

use imageproc::geometry::convex_hull;
use imageproc::point::Point;

/// Rotated bounding quadrilateral of a text region, integer corners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPolygon(pub [Point<i32>; 4]);

impl RegionPolygon {
    /// Corner points
    pub fn points(&self) -> &[Point<i32>; 4] {
        &self.0
    }

    /// Smallest axis-aligned rectangle containing all four corners
    ///
    /// Width and height count pixels inclusively, so a single-point polygon
    /// has a 1x1 bounding rectangle.
    pub fn bounding_rect(&self) -> IntRect {
        let min_x = self.0.iter().map(|p| p.x).min().unwrap_or(0);
        let min_y = self.0.iter().map(|p| p.y).min().unwrap_or(0);
        let max_x = self.0.iter().map(|p| p.x).max().unwrap_or(0);
        let max_y = self.0.iter().map(|p| p.y).max().unwrap_or(0);

        IntRect {
            x: min_x,
            y: min_y,
            width: max_x - min_x + 1,
            height: max_y - min_y + 1,
        }
    }
}

/// Axis-aligned rectangle that may extend outside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Axis-aligned rectangle guaranteed to lie inside its image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Whether the rectangle covers no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Map the rectangle through per-axis scale factors
    pub fn scaled(&self, sx: f32, sy: f32) -> CropRect {
        CropRect {
            x: (self.x as f32 * sx) as u32,
            y: (self.y as f32 * sy) as u32,
            width: (self.width as f32 * sx) as u32,
            height: (self.height as f32 * sy) as u32,
        }
    }
}

/// Grow `rect` by a margin on every side and clamp it to the image
///
/// The horizontal margin on each side is `horizontal_ratio * width`
/// (truncated), the vertical margin `vertical_ratio * height`.
pub fn expand_rect(
    rect: IntRect,
    horizontal_ratio: f32,
    vertical_ratio: f32,
    image_width: u32,
    image_height: u32,
) -> CropRect {
    let img_w = i64::from(image_width);
    let img_h = i64::from(image_height);

    let dx = (rect.width as f32 * horizontal_ratio) as i64;
    let dy = (rect.height as f32 * vertical_ratio) as i64;

    let new_x = (i64::from(rect.x) - dx).clamp(0, img_w);
    let new_y = (i64::from(rect.y) - dy).clamp(0, img_h);
    let new_w = (i64::from(rect.width) + 2 * dx).min(img_w - new_x).max(0);
    let new_h = (i64::from(rect.height) + 2 * dy).min(img_h - new_y).max(0);

    CropRect {
        x: new_x as u32,
        y: new_y as u32,
        width: new_w as u32,
        height: new_h as u32,
    }
}

/// Corners of the minimum-area rotated rectangle enclosing `points`
///
/// Rotating calipers over every hull edge, the closing edge included.
/// Corner coordinates are truncated toward zero. Returns `None` for an
/// empty point set.
pub fn min_area_rect(points: &[Point<u32>]) -> Option<RegionPolygon> {
    let mut unique = points.to_vec();
    unique.sort_unstable_by_key(|p| (p.x, p.y));
    unique.dedup();

    let hull: Vec<(f64, f64)> = convex_hull(unique)
        .into_iter()
        .map(|p| (f64::from(p.x), f64::from(p.y)))
        .collect();
    let first = *hull.first()?;

    let mut best: Option<(f64, [(f64, f64); 4])> = None;
    for i in 0..hull.len() {
        let (ax, ay) = hull[i];
        let (bx, by) = hull[(i + 1) % hull.len()];
        let (ex, ey) = (bx - ax, by - ay);
        let len = ex.hypot(ey);
        if len == 0.0 {
            continue;
        }
        // Edge direction and its normal
        let (ux, uy) = (ex / len, ey / len);
        let (vx, vy) = (-uy, ux);

        let (mut min_u, mut max_u) = (f64::MAX, f64::MIN);
        let (mut min_v, mut max_v) = (f64::MAX, f64::MIN);
        for &(px, py) in &hull {
            let (rx, ry) = (px - ax, py - ay);
            let u = rx * ux + ry * uy;
            let v = rx * vx + ry * vy;
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }

        let area = (max_u - min_u) * (max_v - min_v);
        if best.as_ref().map_or(true, |(best_area, _)| area < *best_area) {
            let corner = |u: f64, v: f64| (ax + u * ux + v * vx, ay + u * uy + v * vy);
            best = Some((
                area,
                [
                    corner(min_u, min_v),
                    corner(max_u, min_v),
                    corner(max_u, max_v),
                    corner(min_u, max_v),
                ],
            ));
        }
    }

    let corners = match best {
        Some((_, corners)) => corners.map(|(x, y)| Point::new(truncate(x), truncate(y))),
        None => [Point::new(first.0 as i32, first.1 as i32); 4],
    };
    Some(RegionPolygon(corners))
}

/// Truncate toward zero, absorbing rotation round-off near integers
fn truncate(v: f64) -> i32 {
    let nearest = v.round();
    if (v - nearest).abs() < 1e-6 {
        nearest as i32
    } else {
        v.trunc() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[(u32, u32)]) -> Vec<Point<u32>> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_min_area_rect_ignores_interior_and_duplicate_points() {
        let polygon = min_area_rect(&pts(&[
            (0, 0), (4, 0), (4, 4), (0, 4), (2, 2), (2, 0), (4, 4), (0, 0), (1, 3),
        ]))
        .unwrap();

        assert_eq!(polygon.bounding_rect(), IntRect { x: 0, y: 0, width: 5, height: 5 });
    }

    #[test]
    fn test_min_area_rect_rotated_rectangle() {
        // 2x6 rectangle (times sqrt 2) tilted 45 degrees, plus an interior point
        let polygon = min_area_rect(&pts(&[(0, 2), (2, 0), (8, 6), (6, 8), (4, 4)])).unwrap();

        let mut corners: Vec<(i32, i32)> = polygon.points().iter().map(|p| (p.x, p.y)).collect();
        corners.sort_unstable();
        assert_eq!(corners, vec![(0, 2), (2, 0), (6, 8), (8, 6)]);
    }

    #[test]
    fn test_min_area_rect_axis_aligned() {
        let polygon = min_area_rect(&pts(&[(2, 3), (12, 3), (12, 8), (2, 8), (7, 5)])).unwrap();
        let rect = polygon.bounding_rect();

        assert_eq!(rect, IntRect { x: 2, y: 3, width: 11, height: 6 });
    }

    #[test]
    fn test_min_area_rect_rotated_square() {
        // Diamond: the minimum rectangle follows the diagonal edges
        let polygon = min_area_rect(&pts(&[(5, 0), (10, 5), (5, 10), (0, 5)])).unwrap();

        let mut corners: Vec<(i32, i32)> = polygon.points().iter().map(|p| (p.x, p.y)).collect();
        corners.sort_unstable();
        assert_eq!(corners, vec![(0, 5), (5, 0), (5, 10), (10, 5)]);
    }

    #[test]
    fn test_min_area_rect_degenerate_inputs() {
        assert!(min_area_rect(&[]).is_none());

        let single = min_area_rect(&pts(&[(3, 4)])).unwrap();
        assert!(single.points().iter().all(|p| p.x == 3 && p.y == 4));
        assert_eq!(single.bounding_rect(), IntRect { x: 3, y: 4, width: 1, height: 1 });

        let line = min_area_rect(&pts(&[(1, 1), (6, 1), (3, 1)])).unwrap();
        assert_eq!(line.bounding_rect(), IntRect { x: 1, y: 1, width: 6, height: 1 });
    }

    #[test]
    fn test_expand_rect_margins() {
        let rect = IntRect { x: 50, y: 40, width: 100, height: 20 };
        let crop = expand_rect(rect, 0.2, 0.5, 400, 300);

        assert_eq!(crop, CropRect { x: 30, y: 30, width: 140, height: 40 });
    }

    #[test]
    fn test_expand_rect_clamps_to_image() {
        let rect = IntRect { x: 2, y: 1, width: 50, height: 10 };
        let crop = expand_rect(rect, 0.2, 0.5, 55, 12);

        assert_eq!(crop.x, 0);
        assert_eq!(crop.y, 0);
        assert!(crop.x + crop.width <= 55);
        assert!(crop.y + crop.height <= 12);
    }

    #[test]
    fn test_expand_rect_invariant_holds_everywhere() {
        let (img_w, img_h) = (64u32, 48u32);
        for x in (-10..70).step_by(7) {
            for y in (-10..60).step_by(5) {
                for (w, h) in [(1, 1), (5, 3), (40, 20), (80, 60)] {
                    let crop = expand_rect(IntRect { x, y, width: w, height: h }, 0.2, 0.5, img_w, img_h);
                    assert!(crop.x + crop.width <= img_w, "{:?}", crop);
                    assert!(crop.y + crop.height <= img_h, "{:?}", crop);
                }
            }
        }
    }

    #[test]
    fn test_expand_rect_outside_image_is_empty() {
        let crop = expand_rect(IntRect { x: 100, y: 100, width: 4, height: 4 }, 0.2, 0.5, 50, 50);
        assert!(crop.is_empty());
    }

    #[test]
    fn test_crop_rect_scaled() {
        let rect = CropRect { x: 10, y: 20, width: 30, height: 40 };
        assert_eq!(rect.scaled(2.0, 0.5), CropRect { x: 20, y: 10, width: 60, height: 20 });
    }
}
