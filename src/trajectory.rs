use std::f64::consts::PI;

use crate::motor::{Gains, MitParam};
use crate::{Error, Result};

/// `amplitude * sin(2π f t)`
pub fn sine(amplitude: f64, frequency: f64, t: f64) -> f64 {
    amplitude * (2.0 * PI * frequency * t).sin()
}

/// Neighbouring joints swing in opposite directions.
pub fn alternating_phase(index: usize) -> f64 {
    if index % 2 == 0 {
        0.0
    } else {
        PI
    }
}

/// Setpoint source for one motor group, evaluated against elapsed seconds.
pub trait Trajectory: Send {
    /// Arm commands in registration order.
    fn arm(&self, t: f64) -> Vec<MitParam>;

    fn gripper(&self, _t: f64) -> Option<f64> {
        None
    }

    /// Command sent once on the way out, before the group is disabled.
    fn hold(&self) -> Vec<MitParam>;

    fn gripper_hold(&self) -> Option<f64> {
        None
    }
}

/// Amplitude and frequency shared by every joint of a demo.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct WaveConfig {
    /// rad
    pub amplitude: f64,
    /// Hz
    pub frequency: f64,
}

impl WaveConfig {
    pub fn new(amplitude: f64, frequency: f64) -> Result<WaveConfig> {
        if !amplitude.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "amplitude must be finite, got {}",
                amplitude
            )));
        }
        if !frequency.is_finite() || frequency < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "frequency must be a non-negative number, got {}",
                frequency
            )));
        }
        Ok(WaveConfig {
            amplitude,
            frequency,
        })
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct JointWave {
    pub amplitude: f64,
    pub phase: f64,
    /// Constant posture offset added to the swing.
    pub bias: f64,
}

impl JointWave {
    pub fn new(amplitude: f64, phase: f64, bias: f64) -> JointWave {
        JointWave {
            amplitude,
            phase,
            bias,
        }
    }

    pub fn at(&self, frequency: f64, t: f64) -> f64 {
        self.bias + self.amplitude * (2.0 * PI * frequency * t + self.phase).sin()
    }
}

/// Open/close cycle mapped onto [0, 1].
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct GripperWave {
    pub frequency: f64,
}

impl GripperWave {
    pub fn at(&self, t: f64) -> f64 {
        0.5 * ((2.0 * PI * self.frequency * t).sin() + 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct SineTrajectory {
    frequency: f64,
    gains: Gains,
    joints: Vec<JointWave>,
    gripper: Option<GripperWave>,
}

impl SineTrajectory {
    pub fn new(frequency: f64, gains: Gains, joints: Vec<JointWave>) -> SineTrajectory {
        SineTrajectory {
            frequency,
            gains,
            joints,
            gripper: None,
        }
    }

    pub fn with_gripper(mut self, wave: GripperWave) -> SineTrajectory {
        self.gripper = Some(wave);
        self
    }

    pub fn joints(&self) -> &[JointWave] {
        &self.joints
    }
}

impl Trajectory for SineTrajectory {
    fn arm(&self, t: f64) -> Vec<MitParam> {
        self.joints
            .iter()
            .map(|joint| MitParam::position(joint.at(self.frequency, t), self.gains))
            .collect()
    }

    fn gripper(&self, t: f64) -> Option<f64> {
        self.gripper.map(|wave| wave.at(t))
    }

    fn hold(&self) -> Vec<MitParam> {
        vec![MitParam::position(0.0, self.gains); self.joints.len()]
    }

    fn gripper_hold(&self) -> Option<f64> {
        self.gripper.map(|_| 0.0)
    }
}
