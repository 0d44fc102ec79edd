//! Built-in entity behaviours: movement, rotation and fuel.
//!
//! Each behaviour is a command over a narrow capability trait ([`Movable`],
//! [`Rotatable`], [`ConsumesFuel`]); [`ObjectAdapter`] implements all of them on top of
//! a property store.

use crate::objects::{get_typed, set_typed, GameObject};
use serde::{Deserialize, Serialize};
use skirmish_runtime::{BoxedCommand, Command, CommandError, MacroCommand};
use std::f64::consts::TAU;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_DIRECTIONS: u32 = 72;

pub const POSITION: &str = "position";
pub const VELOCITY: &str = "velocity";
pub const ANGLE: &str = "angle";
pub const ANGULAR_VELOCITY: &str = "angular_velocity";
pub const FUEL_AMOUNT: &str = "fuel_amount";
pub const FUEL_CONSUMPTION: &str = "fuel_consumption";

/// Integer 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vector {
    pub x: i64,
    pub y: i64,
}

impl Vector {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Vector of the given length pointing along `angle`, rounded to integers.
    pub fn from_angle_and_length(angle: Angle, length: f64) -> Self {
        let rads = angle.to_radians();
        Self {
            x: (length * rads.cos()).round() as i64,
            y: (length * rads.sin()).round() as i64,
        }
    }

    pub fn length(&self) -> f64 {
        (self.x as f64).hypot(self.y as f64)
    }

    pub fn angle(&self, directions: u32) -> Angle {
        Angle::from_radians((self.y as f64).atan2(self.x as f64), directions)
    }

    /// Component-wise sum; fails instead of wrapping when a coordinate leaves `i64`.
    pub fn checked_add(self, other: Vector) -> Result<Vector, CommandError> {
        match (self.x.checked_add(other.x), self.y.checked_add(other.y)) {
            (Some(x), Some(y)) => Ok(Vector::new(x, y)),
            _ => Err(CommandError::domain(
                "coordinate_overflow",
                format!("cannot add {other:?} to {self:?}"),
            )),
        }
    }
}

fn default_directions() -> u32 {
    DEFAULT_DIRECTIONS
}

/// A direction on a circle split into `directions` equal sectors.
///
/// Deserializing rejects a zero sector count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAngle")]
pub struct Angle {
    pub direction: u32,
    pub directions: u32,
}

#[derive(Deserialize)]
struct RawAngle {
    direction: u32,
    #[serde(default = "default_directions")]
    directions: u32,
}

impl TryFrom<RawAngle> for Angle {
    type Error = String;

    fn try_from(raw: RawAngle) -> Result<Self, Self::Error> {
        if raw.directions == 0 {
            return Err("an angle needs at least one direction".to_string());
        }
        Ok(Angle::new(raw.direction, raw.directions))
    }
}

impl Angle {
    pub fn new(direction: u32, directions: u32) -> Self {
        let directions = directions.max(1);
        Self {
            direction: direction % directions,
            directions,
        }
    }

    pub fn from_degrees(degrees: f64, directions: u32) -> Self {
        Self::from_turns(degrees / 360.0, directions)
    }

    pub fn from_radians(rads: f64, directions: u32) -> Self {
        Self::from_turns(rads / TAU, directions)
    }

    fn from_turns(turns: f64, directions: u32) -> Self {
        let directions = directions.max(1);
        let sector = (turns * directions as f64).round() as i64;
        Self::new(sector.rem_euclid(directions as i64) as u32, directions)
    }

    pub fn to_degrees(&self) -> f64 {
        self.direction as f64 * 360.0 / self.directions as f64
    }

    pub fn to_radians(&self) -> f64 {
        self.direction as f64 * TAU / self.directions as f64
    }

    /// Adds two angles split into the same number of directions.
    pub fn checked_add(self, other: Angle) -> Result<Angle, CommandError> {
        if self.directions != other.directions {
            return Err(CommandError::domain(
                "angle_mismatch",
                format!("cannot add {self} and {other}: different direction counts"),
            ));
        }
        if self.directions == 0 {
            return Err(CommandError::domain("angle_mismatch", "angle has no directions"));
        }
        let sum = (u64::from(self.direction) + u64::from(other.direction))
            % u64::from(self.directions);
        Ok(Angle::new(sum as u32, self.directions))
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.1}°)", self.direction, self.directions, self.to_degrees())
    }
}

pub trait Movable: Send + Sync {
    fn position(&self) -> Result<Vector, CommandError>;
    fn set_position(&self, position: Vector) -> Result<(), CommandError>;
    fn velocity(&self) -> Result<Vector, CommandError>;
}

pub trait Rotatable: Send + Sync {
    fn angle(&self) -> Result<Angle, CommandError>;
    fn set_angle(&self, angle: Angle) -> Result<(), CommandError>;
    fn angular_velocity(&self) -> Result<Angle, CommandError>;
}

pub trait ConsumesFuel: Send + Sync {
    fn fuel_amount(&self) -> Result<i64, CommandError>;
    fn set_fuel_amount(&self, amount: i64) -> Result<(), CommandError>;
    fn fuel_consumption(&self) -> Result<i64, CommandError>;
}

/// Exposes a property store through the behaviour capability traits.
#[derive(Clone)]
pub struct ObjectAdapter(pub Arc<dyn GameObject>);

impl Movable for ObjectAdapter {
    fn position(&self) -> Result<Vector, CommandError> {
        get_typed(self.0.as_ref(), POSITION)
    }

    fn set_position(&self, position: Vector) -> Result<(), CommandError> {
        set_typed(self.0.as_ref(), POSITION, &position)
    }

    fn velocity(&self) -> Result<Vector, CommandError> {
        get_typed(self.0.as_ref(), VELOCITY)
    }
}

impl Rotatable for ObjectAdapter {
    fn angle(&self) -> Result<Angle, CommandError> {
        get_typed(self.0.as_ref(), ANGLE)
    }

    fn set_angle(&self, angle: Angle) -> Result<(), CommandError> {
        set_typed(self.0.as_ref(), ANGLE, &angle)
    }

    fn angular_velocity(&self) -> Result<Angle, CommandError> {
        get_typed(self.0.as_ref(), ANGULAR_VELOCITY)
    }
}

impl ConsumesFuel for ObjectAdapter {
    fn fuel_amount(&self) -> Result<i64, CommandError> {
        get_typed(self.0.as_ref(), FUEL_AMOUNT)
    }

    fn set_fuel_amount(&self, amount: i64) -> Result<(), CommandError> {
        set_typed(self.0.as_ref(), FUEL_AMOUNT, &amount)
    }

    fn fuel_consumption(&self) -> Result<i64, CommandError> {
        get_typed(self.0.as_ref(), FUEL_CONSUMPTION)
    }
}

/// Moves an entity by its velocity.
pub struct MoveCommand<M>(pub M);

impl<M: Movable + 'static> Command for MoveCommand<M> {
    fn execute(&mut self) -> Result<(), CommandError> {
        let position = self.0.position()?;
        let velocity = self.0.velocity()?;
        debug!(?position, ?velocity, "Moving entity");
        self.0.set_position(position.checked_add(velocity)?)
    }
}

/// Turns an entity by its angular velocity.
pub struct RotateCommand<R>(pub R);

impl<R: Rotatable + 'static> Command for RotateCommand<R> {
    fn execute(&mut self) -> Result<(), CommandError> {
        let angle = self.0.angle()?;
        let angular_velocity = self.0.angular_velocity()?;
        debug!(%angle, %angular_velocity, "Rotating entity");
        self.0.set_angle(angle.checked_add(angular_velocity)?)
    }
}

/// Fails with [`CommandError::InsufficientResource`] when the entity cannot afford one burn.
pub struct CheckFuelCommand<F>(pub F);

impl<F: ConsumesFuel + 'static> Command for CheckFuelCommand<F> {
    fn execute(&mut self) -> Result<(), CommandError> {
        let available = self.0.fuel_amount()?;
        let required = self.0.fuel_consumption()?;
        if available < required {
            return Err(CommandError::InsufficientResource {
                resource: "fuel",
                available,
                required,
            });
        }
        Ok(())
    }
}

pub struct BurnFuelCommand<F>(pub F);

impl<F: ConsumesFuel + 'static> Command for BurnFuelCommand<F> {
    fn execute(&mut self) -> Result<(), CommandError> {
        let available = self.0.fuel_amount()?;
        let required = self.0.fuel_consumption()?;
        debug!(available, required, "Burning fuel");
        let remaining = available.checked_sub(required).ok_or_else(|| {
            CommandError::domain(
                "fuel_overflow",
                format!("cannot burn {required} from {available}"),
            )
        })?;
        self.0.set_fuel_amount(remaining)
    }
}

/// Check fuel, move, burn fuel; nothing moves or burns when the check fails.
pub fn fuel_checked_move(object: ObjectAdapter) -> MacroCommand {
    let steps: Vec<BoxedCommand> = vec![
        Box::new(CheckFuelCommand(object.clone())),
        Box::new(MoveCommand(object.clone())),
        Box::new(BurnFuelCommand(object)),
    ];
    MacroCommand::new(steps)
}
