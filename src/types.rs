use chrono::{DateTime, Utc};

/// Mount axis selector. The controller addresses its three steppers by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Axis {
    /// Altitude.
    X = 0,
    /// Roll (field rotation). Does not affect pointing direction.
    Y = 1,
    /// Azimuth.
    Z = 2,
}

/// Telemetry snapshot carried by a status event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountStatus {
    /// Controller board temperature in degrees Celsius.
    pub temperature_c: f32,
    /// Encoder positions in arcseconds.
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub enabled: bool,
    pub paused: bool,
    pub celestial_tracking: bool,
    /// Cooling fan duty cycle, 0-100.
    pub fan_pct: u8,
}

/// Unsolicited messages from the mount, delivered in wire order.
#[derive(Debug, Clone, PartialEq)]
pub enum MountEvent {
    /// Encoder positions in arcseconds.
    Position { x: i32, y: i32, z: i32 },
    Status(MountStatus),
    /// The controller lost its position reference; recorded alignment
    /// points no longer match the encoders.
    ReferenceLost,
}

/// One recorded alignment observation: where the sky target was and where
/// the mount encoders were when the user centered it. Append-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentPoint {
    /// Right ascension in hours.
    pub ra_hours: f32,
    /// Declination in degrees.
    pub dec_degrees: f32,
    /// Encoder readings in arcseconds.
    pub mount_x: i32,
    pub mount_y: i32,
    pub mount_z: i32,
    /// UTC instant the point was captured.
    pub captured_at: DateTime<Utc>,
}

/// Observing site. Latitude and longitude in degrees, east positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

/// How well the solved rotation fits the recorded points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentQuality {
    /// Average residual below 0.10 degrees.
    Excellent,
    /// Average residual below 0.25 degrees.
    Ok,
    /// Usable, but residuals or pairwise separations are elevated.
    Marginal,
}
