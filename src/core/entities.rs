// core/entities.rs

// Typed geographic objects reported by the capability interface: waypoints,
// obstacle markers, geofences and formation targets. Navigation behaviors consume
// them; the world model keeps at most one entity per (kind, name).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Default obstacle radius in meters
pub const DEFAULT_OBSTACLE_RADIUS: f64 = 2.0;

/// Minimum number of vertices in a geofence ring
pub const MIN_FENCE_WAYPOINTS: usize = 3;

/// Geographic coordinate in decimal degrees
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    /// Latitude
    pub lat: f64,
    /// Longitude
    pub lon: f64,
}

impl LatLon {
    /// Creates a coordinate
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLon { lat, lon }
    }
}

/// Entity with a name and a location
pub trait GeoEntity {
    /// Entity name, unique per kind
    fn name(&self) -> &str;
    /// Location
    fn position(&self) -> LatLon;
}

/// Navigation target
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    /// Name
    pub name: String,
    /// Location
    pub position: LatLon,
}

impl Waypoint {
    /// Creates a waypoint
    pub fn new(name: impl Into<String>, position: LatLon) -> Self {
        Waypoint {
            name: name.into(),
            position,
        }
    }
}

impl GeoEntity for Waypoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> LatLon {
        self.position
    }
}

fn default_radius() -> f64 {
    DEFAULT_OBSTACLE_RADIUS
}

/// Circular area to keep clear of
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleLocation {
    /// Name
    pub name: String,
    /// Center
    pub position: LatLon,
    /// Radius in meters, >= 0
    #[serde(default = "default_radius")]
    pub radius: f64,
}

impl ObstacleLocation {
    /// Creates an obstacle, rejecting negative or non-finite radii
    pub fn new(name: impl Into<String>, position: LatLon, radius: f64) -> Result<Self, EntityError> {
        let name = name.into();
        if !(radius >= 0.0 && radius.is_finite()) {
            return Err(EntityError::InvalidRadius { name, radius });
        }
        Ok(ObstacleLocation {
            name,
            position,
            radius,
        })
    }

    /// Creates an obstacle with the default 2 m radius
    pub fn with_default_radius(name: impl Into<String>, position: LatLon) -> Self {
        ObstacleLocation {
            name: name.into(),
            position,
            radius: DEFAULT_OBSTACLE_RADIUS,
        }
    }
}

impl GeoEntity for ObstacleLocation {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> LatLon {
        self.position
    }
}

#[derive(Deserialize)]
struct GeoFenceRepr {
    name: String,
    waypoints: Vec<Waypoint>,
}

/// Closed ring of waypoints bounding an operating area
///
/// The last waypoint connects back to the first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoFenceRepr")]
pub struct GeoFence {
    name: String,
    waypoints: Vec<Waypoint>,
}

impl TryFrom<GeoFenceRepr> for GeoFence {
    type Error = EntityError;

    fn try_from(repr: GeoFenceRepr) -> Result<Self, Self::Error> {
        GeoFence::new(repr.name, repr.waypoints)
    }
}

impl GeoFence {
    /// Creates a fence from at least three waypoints
    pub fn new(name: impl Into<String>, waypoints: Vec<Waypoint>) -> Result<Self, EntityError> {
        let name = name.into();
        if waypoints.len() < MIN_FENCE_WAYPOINTS {
            return Err(EntityError::FenceTooSmall {
                name,
                count: waypoints.len(),
            });
        }
        Ok(GeoFence { name, waypoints })
    }

    /// Fence name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ring vertices in order
    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    /// Boundary edges, including the closing edge from last to first
    pub fn edges(&self) -> impl Iterator<Item = (&Waypoint, &Waypoint)> + '_ {
        let n = self.waypoints.len();
        (0..n).map(move |i| (&self.waypoints[i], &self.waypoints[(i + 1) % n]))
    }
}

/// Planned motion of a formation target
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionProfile {
    /// Heading in degrees
    pub heading_degrees: f64,
    /// Speed in meters per second
    pub speed_mps: f64,
}

/// Slot in a formation that one drone can occupy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormationTarget {
    /// Name
    pub name: String,
    /// Location
    pub position: LatLon,
    /// Whether a drone currently holds this slot
    #[serde(default)]
    pub occupied: bool,
    /// Optional motion profile
    #[serde(default)]
    pub motion: Option<MotionProfile>,
}

impl GeoEntity for FormationTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> LatLon {
        self.position
    }
}

/// Entity discriminant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// `Waypoint`
    Waypoint,
    /// `ObstacleLocation`
    Obstacle,
    /// `GeoFence`
    GeoFence,
    /// `FormationTarget`
    Formation,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Waypoint => "waypoint",
            EntityKind::Obstacle => "obstacle",
            EntityKind::GeoFence => "geofence",
            EntityKind::Formation => "formation",
        };
        f.write_str(name)
    }
}

/// Any entity the world model can hold
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    /// Navigation target
    Waypoint(Waypoint),
    /// Area to avoid
    Obstacle(ObstacleLocation),
    /// Operating area boundary
    #[serde(rename = "geofence")]
    GeoFence(GeoFence),
    /// Formation slot
    Formation(FormationTarget),
}

impl Entity {
    /// Entity name
    pub fn name(&self) -> &str {
        match self {
            Entity::Waypoint(w) => &w.name,
            Entity::Obstacle(o) => &o.name,
            Entity::GeoFence(g) => g.name(),
            Entity::Formation(t) => &t.name,
        }
    }

    /// Entity discriminant
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Waypoint(_) => EntityKind::Waypoint,
            Entity::Obstacle(_) => EntityKind::Obstacle,
            Entity::GeoFence(_) => EntityKind::GeoFence,
            Entity::Formation(_) => EntityKind::Formation,
        }
    }

    fn validate(&self) -> Result<(), EntityError> {
        if let Entity::Obstacle(o) = self {
            if !(o.radius >= 0.0 && o.radius.is_finite()) {
                return Err(EntityError::InvalidRadius {
                    name: o.name.clone(),
                    radius: o.radius,
                });
            }
        }
        Ok(())
    }
}

/// Entity validation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EntityError {
    /// Two entities share kind and name
    #[error("duplicate {kind} '{name}'")]
    Duplicate {
        /// Entity kind
        kind: EntityKind,
        /// Entity name
        name: String,
    },
    /// Geofence with fewer than three vertices
    #[error("geofence '{name}' needs at least 3 waypoints, got {count}")]
    FenceTooSmall {
        /// Fence name
        name: String,
        /// Vertices supplied
        count: usize,
    },
    /// Obstacle radius below zero or not finite
    #[error("obstacle '{name}' has invalid radius {radius}")]
    InvalidRadius {
        /// Obstacle name
        name: String,
        /// Radius supplied
        radius: f64,
    },
}

/// Ordered entity snapshot with unique (kind, name) pairs
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorldModel {
    entities: Vec<Entity>,
}

impl WorldModel {
    /// Empty world
    pub fn new() -> Self {
        WorldModel::default()
    }

    /// Builds a snapshot, rejecting duplicates and invalid entities
    pub fn from_entities(entities: Vec<Entity>) -> Result<Self, EntityError> {
        let mut seen = HashSet::with_capacity(entities.len());
        for entity in &entities {
            entity.validate()?;
            if !seen.insert((entity.kind(), entity.name())) {
                return Err(EntityError::Duplicate {
                    kind: entity.kind(),
                    name: entity.name().to_string(),
                });
            }
        }
        Ok(WorldModel { entities })
    }

    /// Inserts an entity, replacing the one with the same kind and name
    pub fn upsert(&mut self, entity: Entity) -> Result<(), EntityError> {
        entity.validate()?;
        match self
            .entities
            .iter_mut()
            .find(|e| e.kind() == entity.kind() && e.name() == entity.name())
        {
            Some(existing) => *existing = entity,
            None => self.entities.push(entity),
        }
        Ok(())
    }

    /// Removes and returns an entity
    pub fn remove(&mut self, kind: EntityKind, name: &str) -> Option<Entity> {
        let index = self
            .entities
            .iter()
            .position(|e| e.kind() == kind && e.name() == name)?;
        Some(self.entities.remove(index))
    }

    /// Looks up an entity
    pub fn find(&self, kind: EntityKind, name: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.kind() == kind && e.name() == name)
    }

    /// Copy of all entities in order
    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities.clone()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Waypoints in order
    pub fn waypoints(&self) -> Vec<&Waypoint> {
        waypoints(&self.entities)
    }

    /// Obstacles in order
    pub fn obstacles(&self) -> Vec<&ObstacleLocation> {
        self.entities
            .iter()
            .filter_map(|e| match e {
                Entity::Obstacle(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    /// Geofences in order
    pub fn geofences(&self) -> Vec<&GeoFence> {
        self.entities
            .iter()
            .filter_map(|e| match e {
                Entity::GeoFence(g) => Some(g),
                _ => None,
            })
            .collect()
    }
}

/// Waypoints contained in an entity list, in order
pub fn waypoints(entities: &[Entity]) -> Vec<&Waypoint> {
    entities
        .iter()
        .filter_map(|e| match e {
            Entity::Waypoint(w) => Some(w),
            _ => None,
        })
        .collect()
}
