//! Zone mapping
//!
//! Resolves a zone label from where a face is in the frame and which way the
//! head is turned. The tracker never calls this; the detector resolves zones
//! before detections reach it.

use gaze_session_core::UNKNOWN_ZONE;
use serde::{Deserialize, Serialize};

/// Everything a zone mapper may look at for one face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeContext {
    pub yaw: f64,
    pub pitch: f64,
    pub face_center_x: f64,
    pub face_center_y: f64,
    pub frame_width: f64,
    pub frame_height: f64,
    pub confidence: f64,
}

/// A named region of the monitored space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub display_name: String,
    pub category: Option<String>,
}

impl Zone {
    fn new(name: &str, display_name: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            category: Some(category.to_string()),
        }
    }
}

/// Zone mapping capability
pub trait ZoneMapper: Send {
    /// Zone label for one face
    fn map_to_zone(&self, context: &GazeContext) -> String;

    /// All zones this mapper can produce
    fn zones(&self) -> &[Zone];
}

/// Where the face sits horizontally in the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Left,
    Right,
}

/// Which way the head is turned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Left,
    Forward,
    Right,
}

/// Fixed layout of a bakery counter seen from a single camera
///
/// Faces in the left third of the frame stand near the entrance; everyone
/// else stands along the counter. Yaw within ±25° counts as looking forward.
/// Looking forward or left from the counter splits by height in the frame:
/// faces in the upper part see the top shelves.
pub struct BakeryZoneMapper {
    zones: Vec<Zone>,
    left_position_max: f64,
    forward_yaw_limit: f64,
    upper_shelf_max_y: f64,
}

impl BakeryZoneMapper {
    pub const PASTRY: &'static str = "Left_sandwich_and_croissant_shelves";
    pub const CAKES: &'static str = "Cake_Display";
    pub const COOKIES: &'static str = "Cookie_Shelves";
    pub const BREAD: &'static str = "Right_sandwich_and_bread_shelves";
    pub const ENTRANCE: &'static str = "Entrance";

    pub fn new() -> Self {
        Self {
            zones: vec![
                Zone::new(Self::PASTRY, "PASTRY/SANDWICH", "food_display"),
                Zone::new(Self::CAKES, "CAKES", "food_display"),
                Zone::new(Self::COOKIES, "COOKIES", "food_display"),
                Zone::new(Self::BREAD, "BREAD", "food_display"),
                Zone::new(Self::ENTRANCE, "ENTRANCE", "navigation"),
                Zone::new(UNKNOWN_ZONE, "UNKNOWN", "other"),
            ],
            left_position_max: 0.33,
            forward_yaw_limit: 25.0,
            upper_shelf_max_y: 0.45,
        }
    }

    fn position(&self, context: &GazeContext) -> Position {
        if context.frame_width <= 0.0 {
            return Position::Right;
        }
        if context.face_center_x / context.frame_width < self.left_position_max {
            Position::Left
        } else {
            Position::Right
        }
    }

    fn direction(&self, context: &GazeContext) -> Direction {
        if context.yaw > self.forward_yaw_limit {
            Direction::Right
        } else if context.yaw < -self.forward_yaw_limit {
            Direction::Left
        } else {
            Direction::Forward
        }
    }

    fn is_upper(&self, context: &GazeContext) -> bool {
        context.face_center_y < context.frame_height * self.upper_shelf_max_y
    }
}

impl Default for BakeryZoneMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneMapper for BakeryZoneMapper {
    fn map_to_zone(&self, context: &GazeContext) -> String {
        if !context.yaw.is_finite() {
            return UNKNOWN_ZONE.to_string();
        }

        let zone = match (self.position(context), self.direction(context)) {
            (Position::Left, Direction::Forward) => Self::PASTRY,
            (Position::Left, Direction::Right) => Self::CAKES,
            (Position::Left, Direction::Left) => Self::ENTRANCE,
            (Position::Right, Direction::Left) => {
                if self.is_upper(context) {
                    Self::CAKES
                } else {
                    Self::PASTRY
                }
            }
            (Position::Right, Direction::Forward) => {
                if self.is_upper(context) {
                    Self::COOKIES
                } else {
                    Self::BREAD
                }
            }
            (Position::Right, Direction::Right) => Self::BREAD,
        };
        zone.to_string()
    }

    fn zones(&self) -> &[Zone] {
        &self.zones
    }
}

/// Mapper for recordings whose faces already carry zone labels
///
/// Anything that reaches it is unlabeled, so it is reported as unknown.
pub struct PassthroughZoneMapper {
    zones: Vec<Zone>,
}

impl PassthroughZoneMapper {
    pub fn new() -> Self {
        Self {
            zones: vec![Zone::new(UNKNOWN_ZONE, "UNKNOWN", "other")],
        }
    }
}

impl Default for PassthroughZoneMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneMapper for PassthroughZoneMapper {
    fn map_to_zone(&self, _context: &GazeContext) -> String {
        UNKNOWN_ZONE.to_string()
    }

    fn zones(&self) -> &[Zone] {
        &self.zones
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(x: f64, y: f64, yaw: f64) -> GazeContext {
        GazeContext {
            yaw,
            pitch: 0.0,
            face_center_x: x,
            face_center_y: y,
            frame_width: 1000.0,
            frame_height: 1000.0,
            confidence: 1.0,
        }
    }

    #[test]
    fn test_bakery_left_position() {
        let mapper = BakeryZoneMapper::new();
        assert_eq!(mapper.map_to_zone(&context(100.0, 500.0, 0.0)), BakeryZoneMapper::PASTRY);
        assert_eq!(mapper.map_to_zone(&context(100.0, 500.0, 40.0)), BakeryZoneMapper::CAKES);
        assert_eq!(mapper.map_to_zone(&context(100.0, 500.0, -40.0)), BakeryZoneMapper::ENTRANCE);
    }

    #[test]
    fn test_bakery_right_position_splits_by_height() {
        let mapper = BakeryZoneMapper::new();
        assert_eq!(mapper.map_to_zone(&context(800.0, 200.0, 0.0)), BakeryZoneMapper::COOKIES);
        assert_eq!(mapper.map_to_zone(&context(800.0, 800.0, 0.0)), BakeryZoneMapper::BREAD);
        assert_eq!(mapper.map_to_zone(&context(800.0, 200.0, -30.0)), BakeryZoneMapper::CAKES);
        assert_eq!(mapper.map_to_zone(&context(800.0, 800.0, -30.0)), BakeryZoneMapper::PASTRY);
        assert_eq!(mapper.map_to_zone(&context(800.0, 800.0, 30.0)), BakeryZoneMapper::BREAD);
    }

    #[test]
    fn test_forward_band_is_inclusive() {
        let mapper = BakeryZoneMapper::new();
        assert_eq!(mapper.map_to_zone(&context(100.0, 500.0, 25.0)), BakeryZoneMapper::PASTRY);
        assert_eq!(mapper.map_to_zone(&context(100.0, 500.0, -25.0)), BakeryZoneMapper::PASTRY);
    }

    #[test]
    fn test_non_finite_yaw_is_unknown() {
        let mapper = BakeryZoneMapper::new();
        assert_eq!(mapper.map_to_zone(&context(100.0, 500.0, f64::NAN)), UNKNOWN_ZONE);
    }

    #[test]
    fn test_zone_catalogue() {
        let mapper = BakeryZoneMapper::new();
        assert_eq!(mapper.zones().len(), 6);
        assert!(mapper.zones().iter().any(|z| z.name == BakeryZoneMapper::ENTRANCE));
        assert_eq!(PassthroughZoneMapper::new().map_to_zone(&context(0.0, 0.0, 0.0)), UNKNOWN_ZONE);
    }
}
