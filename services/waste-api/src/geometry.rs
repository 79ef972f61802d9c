use serde_json::Value;
use thiserror::Error;

/// Side length of the square canvas detections are projected onto
pub const CANVAS_SIZE: f64 = 1000.0;

/// Zone reported when the detection center lies outside every configured zone
pub const DEFAULT_ZONE: &str = "Bunker";

/// Normalized axis-aligned box as `[xmin, ymin, xmax, ymax]`
pub type Xyxy = [f64; 4];

type Pixel = (i64, i64);

/// Errors raised while building zones or reading detection polygons
#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("zone {zone}: expected an even number of coordinates, got {count}")]
    OddCoordinates { zone: String, count: usize },

    #[error("zone {zone}: a polygon needs at least 3 vertices, got {count}")]
    TooFewVertices { zone: String, count: usize },

    #[error("zone {zone}: coordinate {value} is outside [0, 1]")]
    OutOfBounds { zone: String, value: f64 },

    #[error("polygon has no points")]
    EmptyPolygon,

    #[error("malformed polygon: {0}")]
    MalformedPolygon(String),
}

/// A named polygon on the pixel canvas
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    name: String,
    polygon: Vec<Pixel>,
}

impl Zone {
    /// Build a zone from flattened normalized coordinates `x1, y1, x2, y2, ...`
    pub fn new(name: &str, coords: &[f64]) -> Result<Self, GeometryError> {
        if coords.len() % 2 != 0 {
            return Err(GeometryError::OddCoordinates {
                zone: name.to_string(),
                count: coords.len(),
            });
        }

        if let Some(value) = coords.iter().find(|c| !(0.0..=1.0).contains(*c)) {
            return Err(GeometryError::OutOfBounds {
                zone: name.to_string(),
                value: *value,
            });
        }

        let polygon: Vec<Pixel> = coords
            .chunks_exact(2)
            .map(|p| to_pixel(p[0], p[1]))
            .collect();

        if polygon.len() < 3 {
            return Err(GeometryError::TooFewVertices {
                zone: name.to_string(),
                count: polygon.len(),
            });
        }

        Ok(Self {
            name: name.to_string(),
            polygon,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the pixel lies inside the polygon or on its boundary
    fn contains(&self, point: Pixel) -> bool {
        let (px, py) = point;
        let n = self.polygon.len();
        let mut inside = false;

        for i in 0..n {
            let a = self.polygon[i];
            let b = self.polygon[(i + 1) % n];

            if on_segment(a, b, point) {
                return true;
            }

            let (x1, y1) = a;
            let (x2, y2) = b;
            if (y1 > py) != (y2 > py) {
                // px < x-intercept of the edge at py, without division
                let lhs = (px - x1) * (y2 - y1);
                let rhs = (py - y1) * (x2 - x1);
                let left_of_edge = if y2 > y1 { lhs < rhs } else { lhs > rhs };
                if left_of_edge {
                    inside = !inside;
                }
            }
        }

        inside
    }
}

fn to_pixel(x: f64, y: f64) -> Pixel {
    ((x * CANVAS_SIZE) as i64, (y * CANVAS_SIZE) as i64)
}

fn on_segment(a: Pixel, b: Pixel, p: Pixel) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    cross == 0
        && p.0 >= a.0.min(b.0)
        && p.0 <= a.0.max(b.0)
        && p.1 >= a.1.min(b.1)
        && p.1 <= a.1.max(b.1)
}

/// Center of a normalized box on the pixel canvas
fn bbox_center(xyxyn: &Xyxy) -> Pixel {
    let (xmin, ymin) = to_pixel(xyxyn[0], xyxyn[1]);
    let (xmax, ymax) = to_pixel(xyxyn[2], xyxyn[3]);
    (midpoint(xmin, xmax), midpoint(ymin, ymax))
}

/// Truncating midpoint, kept within one canvas width of the canvas. A point
/// off the canvas stays outside every zone.
fn midpoint(a: i64, b: i64) -> i64 {
    let bound = CANVAS_SIZE as i128;
    (i128::from(a) + i128::from(b))
        .div_euclid(2)
        .clamp(-bound, 2 * bound) as i64
}

/// Name of the first zone containing the box center, or [`DEFAULT_ZONE`]
pub fn map_to_zone<'a>(xyxyn: &Xyxy, zones: &'a [Zone]) -> &'a str {
    let center = bbox_center(xyxyn);
    zones
        .iter()
        .find(|zone| zone.contains(center))
        .map(Zone::name)
        .unwrap_or(DEFAULT_ZONE)
}

/// Tight bounding box around a list of `(x, y)` points
pub fn bbox_from_polygon(points: &[[f64; 2]]) -> Result<Xyxy, GeometryError> {
    let first = points.first().ok_or(GeometryError::EmptyPolygon)?;
    let init = [first[0], first[1], first[0], first[1]];

    Ok(points.iter().fold(init, |acc, [x, y]| {
        [acc[0].min(*x), acc[1].min(*y), acc[2].max(*x), acc[3].max(*y)]
    }))
}

/// Decode a stored `object_polygon` JSON value (`[[x, y], ...]`)
pub fn polygon_from_json(value: &Value) -> Result<Vec<[f64; 2]>, GeometryError> {
    serde_json::from_value(value.clone())
        .map_err(|e| GeometryError::MalformedPolygon(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Zone {
        Zone::new(
            "Square",
            &[0.125, 0.125, 0.625, 0.125, 0.625, 0.625, 0.125, 0.625],
        )
        .unwrap()
    }

    #[test]
    fn test_interior_point_maps_to_zone() {
        let zones = vec![square()];
        assert_eq!(map_to_zone(&[0.25, 0.25, 0.5, 0.5], &zones), "Square");
    }

    #[test]
    fn test_boundary_point_maps_to_zone() {
        let zones = vec![square()];
        // center lands on the left edge
        assert_eq!(map_to_zone(&[0.125, 0.25, 0.125, 0.5], &zones), "Square");
        // center lands on a vertex
        assert_eq!(map_to_zone(&[0.125, 0.125, 0.125, 0.125], &zones), "Square");
    }

    #[test]
    fn test_outside_point_maps_to_bunker() {
        let zones = vec![square()];
        assert_eq!(map_to_zone(&[0.75, 0.75, 0.875, 0.875], &zones), DEFAULT_ZONE);
        assert_eq!(map_to_zone(&[0.25, 0.25, 0.5, 0.5], &[]), DEFAULT_ZONE);
    }

    #[test]
    fn test_extreme_coordinates_map_to_bunker() {
        let zones = vec![square()];
        assert_eq!(map_to_zone(&[1e300; 4], &zones), DEFAULT_ZONE);
        assert_eq!(map_to_zone(&[-1e300; 4], &zones), DEFAULT_ZONE);
        assert_eq!(
            map_to_zone(&[f64::MAX, f64::MIN, f64::MAX, f64::MIN], &zones),
            DEFAULT_ZONE
        );
    }

    #[test]
    fn test_first_matching_zone_wins() {
        let inner = Zone::new("Inner", &[0.25, 0.25, 0.5, 0.25, 0.5, 0.5, 0.25, 0.5]).unwrap();
        let zones = vec![inner, square()];
        assert_eq!(map_to_zone(&[0.375, 0.375, 0.375, 0.375], &zones), "Inner");
        assert_eq!(map_to_zone(&[0.125, 0.5, 0.25, 0.625], &zones), "Square");
    }

    #[test]
    fn test_concave_polygon() {
        // U shape opening upwards
        let u = Zone::new(
            "U",
            &[
                0.125, 0.125, 0.25, 0.125, 0.25, 0.5, 0.5, 0.5, 0.5, 0.125, 0.625, 0.125, 0.625,
                0.625, 0.125, 0.625,
            ],
        )
        .unwrap();
        let zones = vec![u];
        // inside the notch, which is outside the polygon
        assert_eq!(map_to_zone(&[0.375, 0.25, 0.375, 0.25], &zones), DEFAULT_ZONE);
        // in the bottom bar
        assert_eq!(map_to_zone(&[0.375, 0.5625, 0.375, 0.5625], &zones), "U");
    }

    #[test]
    fn test_tor06_zone() {
        let tor06 = Zone::new(
            "Tor06",
            &[
                0.337_117_537_856_102_05,
                0.810_818_150_639_534,
                0.177_146_104_340_876_13,
                0.200_324_556_431_775_16,
                0.680_009_763_355_248_8,
                0.198_697_654_812_697_22,
                0.566_499_277_218_509_3,
                0.820_174_073_300_474_2,
            ],
        )
        .unwrap();
        let zones = vec![tor06];
        assert_eq!(map_to_zone(&[0.375, 0.375, 0.5, 0.625], &zones), "Tor06");
        assert_eq!(map_to_zone(&[0.0, 0.0, 0.125, 0.125], &zones), DEFAULT_ZONE);
    }

    #[test]
    fn test_zone_validation() {
        assert_eq!(
            Zone::new("Odd", &[0.1, 0.2, 0.3]),
            Err(GeometryError::OddCoordinates {
                zone: "Odd".to_string(),
                count: 3
            })
        );
        assert!(matches!(
            Zone::new("Line", &[0.1, 0.1, 0.2, 0.2]),
            Err(GeometryError::TooFewVertices { count: 2, .. })
        ));
        assert!(matches!(
            Zone::new("Big", &[0.1, 0.1, 1.5, 0.2, 0.3, 0.3]),
            Err(GeometryError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_bbox_from_polygon() {
        let polygon = [[0.5, 0.25], [0.125, 0.75], [0.625, 0.5]];
        assert_eq!(bbox_from_polygon(&polygon).unwrap(), [0.125, 0.25, 0.625, 0.75]);
        assert_eq!(bbox_from_polygon(&[]), Err(GeometryError::EmptyPolygon));
    }

    #[test]
    fn test_polygon_from_json() {
        let value = serde_json::json!([[0.1, 0.2], [0.3, 0.4]]);
        assert_eq!(polygon_from_json(&value).unwrap(), vec![[0.1, 0.2], [0.3, 0.4]]);

        let bad = serde_json::json!({"points": []});
        assert!(matches!(
            polygon_from_json(&bad),
            Err(GeometryError::MalformedPolygon(_))
        ));
    }
}
