//! Orientation of the payload from the IMU, and the vertical component of its acceleration.
//!
//! Two strategies share one contract: given a sample and the time since the previous one,
//! produce the body-to-world rotation or nothing when the inputs for it are missing.
//! - [`DirectFusion`] solves the attitude from accelerometer + magnetometer every tick
//!   (Davenport's q-method), so it never drifts but needs both sensors.
//! - [`GyroFusion`] integrates the gyroscope from the IMU's first reported quaternion. It drifts,
//!   which is fine for a flight that lasts minutes.

use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::config::{EstimatorConfig, FusionMode};
use crate::imu::SensorSample;

/// Roll, pitch and yaw in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

impl EulerAngles {
    pub fn from_quaternion(orientation: &UnitQuaternion<f64>) -> Self {
        let (roll, pitch, yaw) = orientation.euler_angles();
        EulerAngles {
            roll: roll.to_degrees(),
            pitch: pitch.to_degrees(),
            yaw: yaw.to_degrees(),
        }
    }
}

pub trait Fusion {
    /// Advances the estimate with a new sample. `dt` is in seconds.
    fn update(&mut self, sample: &SensorSample, dt: f64) -> Option<UnitQuaternion<f64>>;

    /// The upward world-frame component of a body-frame specific force.
    fn up_specific_force(
        &self,
        orientation: &UnitQuaternion<f64>,
        acceleration: &Vector3<f64>,
    ) -> f64;
}

pub struct DirectFusion {
    gravity_reference: Vector3<f64>,
    magnetic_reference: Vector3<f64>,
    accelerometer_weight: f64,
    magnetometer_weight: f64,
}

impl DirectFusion {
    pub fn new(
        magnetic_dip_degrees: f64,
        accelerometer_weight: f64,
        magnetometer_weight: f64,
    ) -> Self {
        let dip = magnetic_dip_degrees.to_radians();
        DirectFusion {
            gravity_reference: Vector3::z(),
            magnetic_reference: Vector3::new(dip.cos(), 0.0, dip.sin()),
            accelerometer_weight,
            magnetometer_weight,
        }
    }

    /// Best fit rotation taking the measured directions onto the reference directions.
    pub fn estimate(
        &self,
        acceleration: &Vector3<f64>,
        magnetic_field: &Vector3<f64>,
    ) -> Option<UnitQuaternion<f64>> {
        let a = acceleration.try_normalize(f64::EPSILON)?;
        let m = magnetic_field.try_normalize(f64::EPSILON)?;

        let b: Matrix3<f64> = a * self.gravity_reference.transpose() * self.accelerometer_weight
            + m * self.magnetic_reference.transpose() * self.magnetometer_weight;
        let sigma = b.trace();
        let z = Vector3::new(
            b[(1, 2)] - b[(2, 1)],
            b[(2, 0)] - b[(0, 2)],
            b[(0, 1)] - b[(1, 0)],
        );
        let s = b + b.transpose();

        // Scalar part first.
        let mut k = Matrix4::<f64>::zeros();
        k[(0, 0)] = sigma;
        for i in 0..3 {
            k[(0, i + 1)] = z[i];
            k[(i + 1, 0)] = z[i];
            for j in 0..3 {
                k[(i + 1, j + 1)] = s[(i, j)] - if i == j { sigma } else { 0.0 };
            }
        }

        let eigen = k.symmetric_eigen();
        let q = eigen.eigenvectors.column(eigen.eigenvalues.imax());
        Some(UnitQuaternion::from_quaternion(Quaternion::new(
            q[0], q[1], q[2], q[3],
        )))
    }
}

impl Fusion for DirectFusion {
    fn update(&mut self, sample: &SensorSample, _dt: f64) -> Option<UnitQuaternion<f64>> {
        // Never fuse a partial magnetometer reading.
        let magnetic_field = sample.magnetic_field()?;
        let acceleration = sample.acceleration()?;
        self.estimate(&acceleration, &magnetic_field)
    }

    fn up_specific_force(
        &self,
        orientation: &UnitQuaternion<f64>,
        acceleration: &Vector3<f64>,
    ) -> f64 {
        orientation.transform_vector(acceleration).z
    }
}

#[derive(Default)]
pub struct GyroFusion {
    orientation: Option<UnitQuaternion<f64>>,
}

impl GyroFusion {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fusion for GyroFusion {
    fn update(&mut self, sample: &SensorSample, dt: f64) -> Option<UnitQuaternion<f64>> {
        match self.orientation.as_mut() {
            None => {
                let seed = sample.quaternion()?;
                if seed.norm() <= f64::EPSILON {
                    return None;
                }
                self.orientation = Some(UnitQuaternion::from_quaternion(seed));
            }
            Some(orientation) => {
                if let Some(rate) = sample.angular_rate().filter(|_| dt > 0.0) {
                    *orientation = *orientation * UnitQuaternion::from_scaled_axis(rate * dt);
                }
            }
        }
        self.orientation
    }

    fn up_specific_force(
        &self,
        orientation: &UnitQuaternion<f64>,
        acceleration: &Vector3<f64>,
    ) -> f64 {
        // The IMU's z axis reads about -g at rest.
        -orientation.transform_vector(acceleration).z
    }
}

pub enum OrientationFusion {
    Direct(DirectFusion),
    Gyro(GyroFusion),
}

impl OrientationFusion {
    pub fn new(config: &EstimatorConfig) -> Self {
        match config.fusion {
            FusionMode::Direct => OrientationFusion::Direct(DirectFusion::new(
                config.magnetic_dip_degrees,
                config.accelerometer_weight,
                config.magnetometer_weight,
            )),
            FusionMode::Gyro => OrientationFusion::Gyro(GyroFusion::new()),
        }
    }

    pub fn update(&mut self, sample: &SensorSample, dt: f64) -> Option<UnitQuaternion<f64>> {
        match self {
            OrientationFusion::Direct(fusion) => fusion.update(sample, dt),
            OrientationFusion::Gyro(fusion) => fusion.update(sample, dt),
        }
    }

    pub fn up_specific_force(
        &self,
        orientation: &UnitQuaternion<f64>,
        acceleration: &Vector3<f64>,
    ) -> f64 {
        match self {
            OrientationFusion::Direct(fusion) => {
                fusion.up_specific_force(orientation, acceleration)
            }
            OrientationFusion::Gyro(fusion) => fusion.up_specific_force(orientation, acceleration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    fn direct() -> DirectFusion {
        DirectFusion::new(62.0, 3.0, 1.0)
    }

    fn body_sample(orientation: &UnitQuaternion<f64>, fusion: &DirectFusion) -> SensorSample {
        let acc = orientation.inverse_transform_vector(&(fusion.gravity_reference * 9.8));
        let mag = orientation.inverse_transform_vector(&(fusion.magnetic_reference * 48.0));
        SensorSample {
            accel_x: Some(acc.x),
            accel_y: Some(acc.y),
            accel_z: Some(acc.z),
            mag_x: Some(mag.x),
            mag_y: Some(mag.y),
            mag_z: Some(mag.z),
            ..Default::default()
        }
    }

    #[test]
    fn direct_fusion_level_and_aligned_is_identity() {
        let mut fusion = direct();
        let sample = body_sample(&UnitQuaternion::identity(), &fusion);

        let angles = EulerAngles::from_quaternion(&fusion.update(&sample, 0.0).unwrap());

        assert_abs_diff_eq!(angles.roll, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(angles.pitch, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(angles.yaw, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn direct_fusion_recovers_arbitrary_attitude() {
        let mut fusion = direct();
        let truth = UnitQuaternion::from_euler_angles(0.3, -0.2, 1.0);
        let sample = body_sample(&truth, &fusion);

        let estimate = fusion.update(&sample, 0.0).unwrap();
        assert!(estimate.angle_to(&truth) < 1e-6);

        let angles = EulerAngles::from_quaternion(&estimate);
        assert_abs_diff_eq!(angles.roll, 0.3f64.to_degrees(), epsilon = 1e-5);
        assert_abs_diff_eq!(angles.pitch, (-0.2f64).to_degrees(), epsilon = 1e-5);
        assert_abs_diff_eq!(angles.yaw, 1.0f64.to_degrees(), epsilon = 1e-5);

        // Gravity comes out on the world up axis.
        let acc = sample.acceleration().unwrap();
        assert_abs_diff_eq!(fusion.up_specific_force(&estimate, &acc), 9.8, epsilon = 1e-6);
    }

    #[test]
    fn direct_fusion_refuses_partial_magnetometer() {
        let mut fusion = direct();
        let mut sample = body_sample(&UnitQuaternion::identity(), &fusion);
        sample.mag_y = None;
        assert!(fusion.update(&sample, 0.01).is_none());

        let mut sample = body_sample(&UnitQuaternion::identity(), &fusion);
        sample.mag_x = Some(0.0);
        sample.mag_y = Some(0.0);
        sample.mag_z = Some(0.0);
        assert!(fusion.update(&sample, 0.01).is_none());
    }

    #[test]
    fn gyro_fusion_waits_for_a_seed_quaternion() {
        let mut fusion = GyroFusion::new();
        let unseeded = SensorSample {
            gyro_z: Some(1.0),
            ..Default::default()
        };
        assert!(fusion.update(&unseeded, 0.1).is_none());

        let seed = SensorSample {
            quat_w: Some(2.0),
            quat_x: Some(0.0),
            quat_y: Some(0.0),
            quat_z: Some(0.0),
            ..Default::default()
        };
        let orientation = fusion.update(&seed, 0.0).unwrap();
        assert_abs_diff_eq!(orientation.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn gyro_fusion_integrates_yaw_rate() {
        let mut fusion = GyroFusion::new();
        let seed = SensorSample {
            quat_w: Some(1.0),
            quat_x: Some(0.0),
            quat_y: Some(0.0),
            quat_z: Some(0.0),
            ..Default::default()
        };
        fusion.update(&seed, 0.0);

        let turning = SensorSample {
            gyro_x: Some(0.0),
            gyro_y: Some(0.0),
            gyro_z: Some(FRAC_PI_2),
            ..Default::default()
        };
        let mut orientation = None;
        for _ in 0..10 {
            orientation = fusion.update(&turning, 0.1);
        }
        let angles = EulerAngles::from_quaternion(&orientation.unwrap());

        assert_abs_diff_eq!(angles.yaw, 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(angles.roll, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(angles.pitch, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn gyro_fusion_holds_on_zero_dt_or_missing_axis() {
        let mut fusion = GyroFusion::new();
        let seed = SensorSample {
            quat_w: Some(1.0),
            quat_x: Some(0.0),
            quat_y: Some(0.0),
            quat_z: Some(0.0),
            ..Default::default()
        };
        fusion.update(&seed, 0.0);

        let turning = SensorSample {
            gyro_x: Some(1.0),
            gyro_y: Some(1.0),
            gyro_z: Some(1.0),
            ..Default::default()
        };
        let held = fusion.update(&turning, 0.0).unwrap();
        assert_abs_diff_eq!(held.angle(), 0.0, epsilon = 1e-12);

        let partial = SensorSample {
            gyro_x: Some(1.0),
            ..Default::default()
        };
        let held = fusion.update(&partial, 0.1).unwrap();
        assert_abs_diff_eq!(held.angle(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn gyro_fusion_flips_imu_z_axis() {
        let fusion = GyroFusion::new();
        let at_rest = Vector3::new(0.0, 0.0, -9.798);
        assert_abs_diff_eq!(
            fusion.up_specific_force(&UnitQuaternion::identity(), &at_rest),
            9.798,
            epsilon = 1e-12
        );
    }
}
