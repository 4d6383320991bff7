//! Time and coordinate conversions: Julian date, sidereal time, alt-az,
//! and the unit vectors the alignment solver works on.

use crate::mat3::Vec3;
use crate::types::Observer;
use chrono::{DateTime, Datelike, Timelike, Utc};

/// Nominal sidereal rate in arcseconds of RA per wall-clock second.
/// Must match the firmware's tracking constant exactly.
pub const SIDEREAL_RATE_ARCSEC_PER_SEC: f64 = 15.041;

const J2000_JD: f64 = 2451545.0;

/// Julian date of a UTC instant (Meeus, valid for Gregorian dates).
pub fn julian_date(t: DateTime<Utc>) -> f64 {
    let mut y = t.year() as f64;
    let mut m = t.month() as f64;
    let day = t.day() as f64
        + (t.hour() as f64
            + t.minute() as f64 / 60.0
            + (t.second() as f64 + t.nanosecond() as f64 * 1e-9) / 3600.0)
            / 24.0;

    if m <= 2.0 {
        y -= 1.0;
        m += 12.0;
    }
    let a = (y / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    (365.25 * (y + 4716.0)).floor() + (30.6001 * (m + 1.0)).floor() + day + b - 1524.5
}

/// Greenwich mean sidereal time in hours, [0, 24).
pub fn gmst_hours(jd: f64) -> f64 {
    let d = jd - J2000_JD;
    (18.697374558 + 24.06570982441908 * d).rem_euclid(24.0)
}

/// Local sidereal time in hours, [0, 24). Longitude east positive.
pub fn lst_hours(jd: f64, longitude_deg: f64) -> f64 {
    (gmst_hours(jd) + longitude_deg / 15.0).rem_euclid(24.0)
}

/// Altitude and azimuth in degrees for a target at a UTC instant.
/// Azimuth is measured from North, clockwise through East.
pub fn radec_to_altaz(
    ra_hours: f64,
    dec_degrees: f64,
    t: DateTime<Utc>,
    observer: Observer,
) -> (f64, f64) {
    let lst = lst_hours(julian_date(t), observer.longitude_deg);
    let ha = ((lst - ra_hours) * 15.0).to_radians();
    let dec = dec_degrees.to_radians();
    let lat = observer.latitude_deg.to_radians();

    let sin_alt = (dec.sin() * lat.sin() + dec.cos() * lat.cos() * ha.cos()).clamp(-1.0, 1.0);
    let alt = sin_alt.asin();

    let denom = alt.cos() * lat.cos();
    let az = if denom.abs() < 1e-12 {
        // At the zenith (or pole) azimuth is undefined; report North.
        0.0
    } else {
        let cos_az = ((dec.sin() - sin_alt * lat.sin()) / denom).clamp(-1.0, 1.0);
        let az = cos_az.acos();
        if ha.sin() > 0.0 {
            std::f64::consts::TAU - az
        } else {
            az
        }
    };

    (alt.to_degrees(), az.to_degrees())
}

/// Unit vector of a sky target in the rotating frame anchored at
/// `reference`.
///
/// The recorded RA is advanced by the sidereal drift between the
/// observation instant and the reference instant, so vectors captured at
/// different times become comparable in one frame.
pub fn sky_vector(
    ra_hours: f64,
    dec_degrees: f64,
    reference: DateTime<Utc>,
    observed: DateTime<Utc>,
) -> Vec3 {
    let drift_s = (reference - observed).num_milliseconds() as f64 / 1000.0;
    let ra_arcsec = ra_hours * 15.0 * 3600.0 + SIDEREAL_RATE_ARCSEC_PER_SEC * drift_s;
    let ra = (ra_arcsec / 3600.0).to_radians();
    let dec = dec_degrees.to_radians();

    [dec.cos() * ra.cos(), dec.cos() * ra.sin(), dec.sin()]
}

/// Unit pointing vector from mount encoder readings in arcseconds.
/// X is altitude, Z azimuth; Y (roll) does not move the optical axis.
pub fn mount_vector(x_arcsec: i32, _y_arcsec: i32, z_arcsec: i32) -> Vec3 {
    let alt = (x_arcsec as f64 / 3600.0).to_radians();
    let az = (z_arcsec as f64 / 3600.0).to_radians();

    [alt.cos() * az.cos(), alt.cos() * az.sin(), alt.sin()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn julian_date_of_j2000_epoch() {
        let t = Utc.with_ymd_and_hms(2000, 1, 1, 12, 0, 0).unwrap();
        assert!((julian_date(t) - 2451545.0).abs() < 1e-9);
    }

    #[test]
    fn julian_date_of_known_instant() {
        // Meeus example 7.a: 1957 October 4.81 UTC (Sputnik launch epoch).
        let t = Utc.with_ymd_and_hms(1957, 10, 4, 19, 26, 24).unwrap();
        assert!((julian_date(t) - 2436116.31).abs() < 1e-4);
    }

    #[test]
    fn gmst_at_j2000() {
        assert!((gmst_hours(2451545.0) - 18.697374558).abs() < 1e-9);
    }

    #[test]
    fn gmst_gains_roughly_four_minutes_per_day() {
        let g0 = gmst_hours(2460000.0);
        let g1 = gmst_hours(2460001.0);
        let gain = (g1 - g0).rem_euclid(24.0);
        assert!((gain - 0.0657098).abs() < 1e-4);
    }

    #[test]
    fn lst_wraps_longitude() {
        let jd = 2460310.25;
        let greenwich = lst_hours(jd, 0.0);
        let east_90 = lst_hours(jd, 90.0);
        assert!(((east_90 - greenwich).rem_euclid(24.0) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn culmination_altitude_and_azimuth() {
        // A target on the local meridian culminates at 90 - |lat - dec|,
        // due south when it passes below the zenith.
        let observer = Observer {
            latitude_deg: 52.0,
            longitude_deg: 13.0,
        };
        let t = Utc.with_ymd_and_hms(2024, 3, 20, 22, 0, 0).unwrap();
        let ra = lst_hours(julian_date(t), observer.longitude_deg);
        let (alt, az) = radec_to_altaz(ra, 20.0, t, observer);
        assert!((alt - 58.0).abs() < 1e-6);
        assert!((az - 180.0).abs() < 1e-6);
    }

    #[test]
    fn azimuth_flips_after_transit() {
        let observer = Observer {
            latitude_deg: 40.0,
            longitude_deg: 0.0,
        };
        let t = Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap();
        let lst = lst_hours(julian_date(t), 0.0);
        // One hour east (rising) vs one hour west (setting) of the meridian.
        let (_, az_rising) = radec_to_altaz(lst + 1.0, 10.0, t, observer);
        let (_, az_setting) = radec_to_altaz(lst - 1.0, 10.0, t, observer);
        assert!(az_rising < 180.0);
        assert!(az_setting > 180.0);
    }

    #[test]
    fn sky_vector_is_unit_length() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let v = sky_vector(5.5, -20.0, t, t);
        let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        assert!((n - 1.0).abs() < 1e-12);
    }

    #[test]
    fn reframing_adds_sidereal_drift_to_ra() {
        let t_obs = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t_ref = t_obs + chrono::Duration::seconds(100);

        let reframed = sky_vector(6.0, 30.0, t_ref, t_obs);

        // 100 s of drift is exactly 1504.1 arcsec of RA.
        let shifted_ra = 6.0 + SIDEREAL_RATE_ARCSEC_PER_SEC * 100.0 / (15.0 * 3600.0);
        let direct = sky_vector(shifted_ra, 30.0, t_ref, t_ref);

        for i in 0..3 {
            assert!((reframed[i] - direct[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn mount_vector_axes() {
        // Horizon north.
        let v = mount_vector(0, 12345, 0);
        assert!((v[0] - 1.0).abs() < 1e-12);

        // Straight up, azimuth irrelevant.
        let v = mount_vector(90 * 3600, 0, 45 * 3600);
        assert!((v[2] - 1.0).abs() < 1e-12);

        // Horizon east.
        let v = mount_vector(0, 0, 90 * 3600);
        assert!(v[1] > 0.999_999);
    }
}
