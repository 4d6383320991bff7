//! Alignment façade and tracking: records alignment points, re-solves
//! the rotation against a fresh reference epoch, and starts firmware
//! tracking or an approximate goto.

use crate::align::{self, Alignment, AlignmentSet};
use crate::astro;
use crate::client::MountClient;
use crate::error::MountError;
use crate::mat3;
use crate::types::{AlignmentPoint, Axis, Observer};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Altitude above which tracking an alt-az mount gets dubious: azimuth
/// rates blow up near the zenith.
const ZENITH_WARN_DEG: f64 = 80.0;

/// Result of a successful tracking start.
#[derive(Debug, Clone)]
pub struct TrackingStart {
    pub alignment: Alignment,
    /// Predicted initial mount altitude of the target, degrees.
    pub predicted_alt_deg: f64,
    /// Predicted initial mount azimuth, degrees from North through East.
    pub predicted_az_deg: f64,
}

/// Owns the recorded alignment points and drives the mount from them.
pub struct Tracker {
    client: Arc<MountClient>,
    observer: Observer,
    points: AlignmentSet,
}

impl Tracker {
    pub fn new(client: Arc<MountClient>, observer: Observer) -> Self {
        Self {
            client,
            observer,
            points: AlignmentSet::new(),
        }
    }

    pub fn observer(&self) -> Observer {
        self.observer
    }

    pub fn points(&self) -> &AlignmentSet {
        &self.points
    }

    /// Record that the target at (RA, Dec) is currently centered with
    /// the given encoder readings.
    pub fn record_point(&mut self, ra_hours: f32, dec_degrees: f32, x: i32, y: i32, z: i32) {
        self.record_point_at(ra_hours, dec_degrees, x, y, z, Utc::now());
    }

    fn record_point_at(
        &mut self,
        ra_hours: f32,
        dec_degrees: f32,
        x: i32,
        y: i32,
        z: i32,
        captured_at: DateTime<Utc>,
    ) {
        self.points.push(AlignmentPoint {
            ra_hours,
            dec_degrees,
            mount_x: x,
            mount_y: y,
            mount_z: z,
            captured_at,
        });
        log::info!(
            "alignment point {} recorded: RA {:.4} h, Dec {:.4}°, encoders ({}, {}, {})",
            self.points.len(),
            ra_hours,
            dec_degrees,
            x,
            y,
            z
        );
    }

    /// Discard all recorded points.
    pub fn clear_alignment(&mut self) {
        self.points.clear();
    }

    /// Start celestial tracking of the target.
    ///
    /// Snapshots the current UTC as the reference epoch, re-solves the
    /// alignment so the recorded points absorb any sidereal drift since
    /// capture, and ships the matrix, target, and epoch to the firmware.
    pub fn start_tracking(&self, ra_hours: f64, dec_degrees: f64) -> Result<TrackingStart> {
        self.start_tracking_at(ra_hours, dec_degrees, Utc::now())
    }

    fn start_tracking_at(
        &self,
        ra_hours: f64,
        dec_degrees: f64,
        reference: DateTime<Utc>,
    ) -> Result<TrackingStart> {
        let alignment = align::solve(self.points.points(), reference)?;

        let target = astro::sky_vector(ra_hours, dec_degrees, reference, reference);
        let predicted = mat3::mul_vec(&alignment.matrix, target);
        let predicted_alt_deg = predicted[2].clamp(-1.0, 1.0).asin().to_degrees();
        let predicted_az_deg = predicted[1].atan2(predicted[0]).to_degrees().rem_euclid(360.0);

        if predicted_alt_deg > ZENITH_WARN_DEG {
            log::warn!(
                "target starts at predicted altitude {:.1}°; azimuth rates near the zenith may exceed the mount",
                predicted_alt_deg
            );
        }

        self.client.track_celestial(
            ra_hours as f32,
            dec_degrees as f32,
            &alignment.matrix_f32(),
            reference.timestamp() as u64,
            self.observer.latitude_deg as f32,
        )?;

        log::info!(
            "tracking started: RA {:.4} h, Dec {:.4}°, predicted alt {:.1}° az {:.1}°",
            ra_hours,
            dec_degrees,
            predicted_alt_deg,
            predicted_az_deg
        );

        Ok(TrackingStart {
            alignment,
            predicted_alt_deg,
            predicted_az_deg,
        })
    }

    /// Coarse goto without a solved matrix: compare the first recorded
    /// point's alt-az at its capture time with the target's alt-az now,
    /// and issue the difference as relative moves. Returns the altitude
    /// and azimuth deltas in arcseconds.
    pub fn goto_approximate(&self, ra_hours: f64, dec_degrees: f64) -> Result<(i32, i32)> {
        self.goto_approximate_at(ra_hours, dec_degrees, Utc::now())
    }

    fn goto_approximate_at(
        &self,
        ra_hours: f64,
        dec_degrees: f64,
        now: DateTime<Utc>,
    ) -> Result<(i32, i32)> {
        let anchor = self.points.points().first().ok_or_else(|| {
            MountError::AlignmentRejected("no alignment points recorded".into())
        })?;

        let (anchor_alt, anchor_az) = astro::radec_to_altaz(
            anchor.ra_hours as f64,
            anchor.dec_degrees as f64,
            anchor.captured_at,
            self.observer,
        );
        let (target_alt, target_az) =
            astro::radec_to_altaz(ra_hours, dec_degrees, now, self.observer);

        let delta_alt = ((target_alt - anchor_alt) * 3600.0).round() as i32;
        let delta_az = (wrap_az_delta(target_az - anchor_az) * 3600.0).round() as i32;

        log::info!(
            "approximate goto: ΔAlt {} arcsec, ΔAz {} arcsec",
            delta_alt,
            delta_az
        );

        self.client.move_relative(Axis::X, delta_alt)?;
        self.client.move_relative(Axis::Z, delta_az)?;

        Ok((delta_alt, delta_az))
    }
}

/// Wrap an azimuth difference into (-180, +180] degrees so the mount
/// always takes the short way around.
fn wrap_az_delta(mut delta_deg: f64) -> f64 {
    while delta_deg > 180.0 {
        delta_deg -= 360.0;
    }
    while delta_deg <= -180.0 {
        delta_deg += 360.0;
    }
    delta_deg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testpipe::*;
    use crate::frame::{CMD_ACK, CMD_MOVE_RELATIVE, CMD_TRACK_CELESTIAL};
    use chrono::TimeZone;
    use std::time::Duration;

    fn observer() -> Observer {
        Observer {
            latitude_deg: 47.5,
            longitude_deg: 11.0,
        }
    }

    #[test]
    fn wrap_takes_the_short_way() {
        assert_eq!(wrap_az_delta(10.0), 10.0);
        assert_eq!(wrap_az_delta(190.0), -170.0);
        assert_eq!(wrap_az_delta(-190.0), 170.0);
        assert_eq!(wrap_az_delta(180.0), 180.0);
        assert_eq!(wrap_az_delta(-180.0), 180.0);
        assert_eq!(wrap_az_delta(540.0), 180.0);
    }

    #[test]
    fn start_tracking_ships_matrix_target_and_epoch() {
        let (client, fw_tx, fw_rx) = pipes();
        let mut tracker = Tracker::new(Arc::new(client), observer());

        // Two-star geometry whose solution is the 90° z-rotation:
        // sky (1,0,0)->mount (0,1,0), sky (0,1,0)->mount (-1,0,0).
        let t0 = Utc::now();
        tracker.record_point_at(0.0, 0.0, 0, 0, 90 * 3600, t0);
        tracker.record_point_at(6.0, 0.0, 0, 0, 180 * 3600, t0);

        let responder = std::thread::spawn(move || {
            let frame = recv_frame(&fw_rx, Duration::from_secs(2)).unwrap();
            send_packet(&fw_tx, CMD_ACK, 0x51, &[frame.id]);
            frame
        });

        let before = Utc::now().timestamp();
        let start = tracker.start_tracking(6.0, 30.0).unwrap();
        let after = Utc::now().timestamp();

        let frame = responder.join().unwrap();
        assert_eq!(frame.cmd, CMD_TRACK_CELESTIAL);
        assert_eq!(frame.payload.len(), 56);

        let p = &frame.payload;
        let f = |o: usize| f32::from_le_bytes([p[o], p[o + 1], p[o + 2], p[o + 3]]);
        assert_eq!(f(0), 6.0);
        assert_eq!(f(4), 30.0);

        let expected = [0.0f32, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        for (i, &cell) in expected.iter().enumerate() {
            assert!(
                (f(8 + 4 * i) - cell).abs() < 1e-3,
                "matrix cell {} was {}",
                i,
                f(8 + 4 * i)
            );
        }

        let ref_time = u64::from_le_bytes([
            p[44], p[45], p[46], p[47], p[48], p[49], p[50], p[51],
        ]) as i64;
        assert!(ref_time >= before && ref_time <= after);
        assert_eq!(f(52), 47.5);

        // Predicted initial direction for this geometry: alt 30°, az 180°.
        assert!((start.predicted_alt_deg - 30.0).abs() < 0.1);
        assert!((start.predicted_az_deg - 180.0).abs() < 0.1);
    }

    #[test]
    fn start_tracking_refuses_without_alignment() {
        let (client, _fw_tx, fw_rx) = pipes();
        let tracker = Tracker::new(Arc::new(client), observer());

        assert!(matches!(
            tracker.start_tracking(6.0, 30.0),
            Err(MountError::AlignmentRejected(_))
        ));
        // Nothing went on the wire.
        assert!(recv_frame(&fw_rx, Duration::from_millis(100)).is_none());
    }

    #[test]
    fn near_zenith_target_still_starts() {
        let (client, fw_tx, fw_rx) = pipes();
        let mut tracker = Tracker::new(Arc::new(client), observer());

        // Identity alignment: sky and mount frames coincide.
        let t0 = Utc::now();
        tracker.record_point_at(0.0, 0.0, 0, 0, 0, t0);
        tracker.record_point_at(6.0, 0.0, 0, 0, 90 * 3600, t0);

        let responder = std::thread::spawn(move || {
            let frame = recv_frame(&fw_rx, Duration::from_secs(2)).unwrap();
            send_packet(&fw_tx, CMD_ACK, 0x52, &[frame.id]);
        });

        let start = tracker.start_tracking(3.0, 85.0).unwrap();
        responder.join().unwrap();
        assert!(start.predicted_alt_deg > ZENITH_WARN_DEG);
    }

    #[test]
    fn goto_approximate_issues_two_relative_moves() {
        let (client, fw_tx, fw_rx) = pipes();
        let mut tracker = Tracker::new(Arc::new(client), observer());

        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap();
        tracker.record_point_at(5.5, 40.0, 150_000, 0, 400_000, t0);
        let now = t0 + chrono::Duration::minutes(10);

        let (anchor_alt, anchor_az) =
            astro::radec_to_altaz(5.5, 40.0, t0, observer());
        let (target_alt, target_az) =
            astro::radec_to_altaz(7.25, 15.0, now, observer());
        let want_alt = ((target_alt - anchor_alt) * 3600.0).round() as i32;
        let want_az = (wrap_az_delta(target_az - anchor_az) * 3600.0).round() as i32;

        let responder = std::thread::spawn(move || {
            let mut frames = Vec::new();
            for _ in 0..2 {
                let frame = recv_frame(&fw_rx, Duration::from_secs(2)).unwrap();
                send_packet(&fw_tx, CMD_ACK, 0x53, &[frame.id]);
                frames.push(frame);
            }
            frames
        });

        let (delta_alt, delta_az) = tracker.goto_approximate_at(7.25, 15.0, now).unwrap();
        assert_eq!(delta_alt, want_alt);
        assert_eq!(delta_az, want_az);

        let frames = responder.join().unwrap();
        assert!(frames.iter().all(|f| f.cmd == CMD_MOVE_RELATIVE));
        assert_eq!(frames[0].payload[0], Axis::X as u8);
        assert_eq!(
            i32::from_le_bytes(frames[0].payload[1..5].try_into().unwrap()),
            want_alt
        );
        assert_eq!(frames[1].payload[0], Axis::Z as u8);
        assert_eq!(
            i32::from_le_bytes(frames[1].payload[1..5].try_into().unwrap()),
            want_az
        );
    }

    #[test]
    fn goto_approximate_needs_a_point() {
        let (client, _fw_tx, _fw_rx) = pipes();
        let tracker = Tracker::new(Arc::new(client), observer());
        assert!(tracker.goto_approximate(1.0, 2.0).is_err());
    }
}
