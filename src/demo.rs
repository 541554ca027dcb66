//! The scripted OpenArm demos as data: which IDs go on which bus, how each
//! joint swings and how the loop is timed.

use std::f64::consts::PI;

use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::bus::{ArmBus, Connector};
use crate::control_loop::{ControlLoop, LoopConfig, LoopReport, MotorGroup, StopFlag};
use crate::motor::{
    local_joint, ControlMode, Gains, MotorGroupSpec, MotorSpec, MotorType, RECV_ID_OFFSET,
};
use crate::trajectory::{alternating_phase, GripperWave, JointWave, SineTrajectory, WaveConfig};
use crate::{Error, Result};

pub const PAIR_IDS: [u32; 2] = [7, 8];
pub const DUAL_RIGHT_IDS: [u32; 4] = [2, 4, 6, 8];
pub const DUAL_LEFT_IDS: [u32; 4] = [1, 3, 5, 7];
pub const COMBO_ARM_IDS: [u32; 3] = [2, 4, 6];
pub const GRIPPER_ID: u32 = 0x08;
pub const GRIPPER_SPEED_LIMIT: f64 = 6.0;
pub const GRIPPER_TORQUE_LIMIT: f64 = 0.6;
pub const GRIPPER_FREQUENCY: f64 = 0.2;

pub const SWEEP_IDS: std::ops::RangeInclusive<u32> = 1..=15;
pub const SWEEP_AMPLITUDE: f64 = 0.6;
pub const SWEEP_FREQUENCY: f64 = 0.35;
pub const SWEEP_GAINS: Gains = Gains { kp: 4.0, kd: 0.4 };
pub const SWEEP_TICKS: u64 = 140;
pub const SWEEP_PAUSE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Right,
    Left,
}

/// Swing scale for each local joint; proximal joints stay moderate so the
/// arm clears the body.
pub fn joint_amplitude(local: u32) -> f64 {
    match local {
        1 => 0.45,
        2 => 0.30,
        3 => 0.40,
        4 => 0.35,
        5 => 0.30,
        6 => 0.25,
        7 => 0.25,
        8 => 0.02,
        _ => 0.20,
    }
}

/// Open posture offset. The shoulder spread is mirrored between sides.
pub fn outward_bias(side: Side, local: u32) -> f64 {
    match (side, local) {
        (Side::Right, 2) => 0.90,
        (Side::Left, 2) => -0.90,
        (_, 4) => 0.65,
        (_, 8) => 0.01,
        _ => 0.0,
    }
}

fn streaming_config(duration: Duration, disable_timeout: Duration) -> LoopConfig {
    LoopConfig {
        duration,
        tick: Duration::from_millis(30),
        recv_timeout: Duration::from_millis(600),
        print_interval: Some(Duration::from_secs(1)),
        max_ticks: None,
        enable_timeout: Duration::from_millis(2000),
        settle_timeout: Duration::from_millis(700),
        disable_timeout,
    }
}

pub fn pair_config(duration: Duration) -> LoopConfig {
    streaming_config(duration, Duration::from_millis(1200))
}

pub fn dual_config(duration: Duration) -> LoopConfig {
    streaming_config(duration, Duration::from_millis(1500))
}

pub fn combo_config(duration: Duration) -> LoopConfig {
    dual_config(duration)
}

pub fn sweep_config() -> LoopConfig {
    LoopConfig {
        // the tick count ends each ID; the deadline only caps a stalled bus
        duration: Duration::from_secs(30),
        tick: Duration::from_millis(50),
        recv_timeout: Duration::from_millis(500),
        print_interval: None,
        max_ticks: Some(SWEEP_TICKS),
        enable_timeout: Duration::from_millis(2000),
        settle_timeout: Duration::from_millis(500),
        disable_timeout: Duration::from_millis(1000),
    }
}

/// Wrist joint 7 at full amplitude, joint 8 at half amplitude in antiphase.
pub fn pair_trajectory(wave: WaveConfig) -> SineTrajectory {
    SineTrajectory::new(
        wave.frequency,
        Gains::default(),
        vec![
            JointWave::new(wave.amplitude, 0.0, 0.0),
            JointWave::new(0.5 * wave.amplitude, PI, 0.0),
        ],
    )
}

pub fn dual_trajectory(side: Side, ids: &[u32], wave: WaveConfig) -> SineTrajectory {
    let joints = ids
        .iter()
        .enumerate()
        .map(|(index, id)| {
            let local = local_joint(*id);
            JointWave::new(
                wave.amplitude * joint_amplitude(local),
                alternating_phase(index),
                outward_bias(side, local),
            )
        })
        .collect();
    SineTrajectory::new(wave.frequency, Gains::default(), joints)
}

/// Shoulder and elbow held out and swinging in antiphase, wrist a quarter
/// period behind, gripper cycling open and closed.
pub fn combo_trajectory(wave: WaveConfig) -> SineTrajectory {
    SineTrajectory::new(
        wave.frequency,
        Gains::default(),
        vec![
            JointWave::new(0.35 * wave.amplitude, 0.0, 0.75),
            JointWave::new(0.35 * wave.amplitude, PI, 0.55),
            JointWave::new(0.25 * wave.amplitude, PI / 2.0, 0.0),
        ],
    )
    .with_gripper(GripperWave {
        frequency: GRIPPER_FREQUENCY,
    })
}

pub fn sweep_trajectory() -> SineTrajectory {
    SineTrajectory::new(
        SWEEP_FREQUENCY,
        SWEEP_GAINS,
        vec![JointWave::new(SWEEP_AMPLITUDE, 0.0, 0.0)],
    )
}

fn arm_group(
    connector: &dyn Connector,
    interface: &str,
    spec: MotorGroupSpec,
) -> Result<Box<dyn ArmBus>> {
    let mut bus = connector.open(interface, true)?;
    bus.init_arm_motors(spec)?;
    Ok(bus)
}

pub fn pair_groups(
    connector: &dyn Connector,
    interface: &str,
    wave: WaveConfig,
) -> Result<Vec<MotorGroup>> {
    let spec = MotorGroupSpec::from_lists(
        &[MotorType::DM4310, MotorType::DM4310],
        &PAIR_IDS,
        &[0x17, 0x18],
    )?;
    let bus = arm_group(connector, interface, spec)?;
    Ok(vec![MotorGroup::new(
        interface,
        bus,
        Box::new(pair_trajectory(wave)),
    )])
}

/// Right and left buses, left opened first. Groups come back right first.
pub fn dual_groups(
    connector: &dyn Connector,
    right: &str,
    left: &str,
    wave: WaveConfig,
) -> Result<Vec<MotorGroup>> {
    let left_bus = arm_group(connector, left, MotorGroupSpec::joints(&DUAL_LEFT_IDS))?;
    let right_bus = arm_group(connector, right, MotorGroupSpec::joints(&DUAL_RIGHT_IDS))?;
    Ok(vec![
        MotorGroup::new(
            right,
            right_bus,
            Box::new(dual_trajectory(Side::Right, &DUAL_RIGHT_IDS, wave)),
        ),
        MotorGroup::new(
            left,
            left_bus,
            Box::new(dual_trajectory(Side::Left, &DUAL_LEFT_IDS, wave)),
        ),
    ])
}

/// Both arms run the same joint commands; the left mirrors the right.
pub fn combo_groups(
    connector: &dyn Connector,
    right: &str,
    left: &str,
    wave: WaveConfig,
) -> Result<Vec<MotorGroup>> {
    let mut groups = vec![];
    for (name, interface) in [("right", right), ("left", left)] {
        let mut bus = arm_group(connector, interface, MotorGroupSpec::joints(&COMBO_ARM_IDS))?;
        bus.init_gripper_motor(
            MotorSpec::new(MotorType::DM4310, GRIPPER_ID, GRIPPER_ID + RECV_ID_OFFSET),
            ControlMode::PosForce,
        )?;
        bus.set_gripper_limit(GRIPPER_SPEED_LIMIT, GRIPPER_TORQUE_LIMIT)?;
        groups.push(MotorGroup::new(name, bus, Box::new(combo_trajectory(wave))));
    }
    Ok(groups)
}

/// Single-joint group used by the sweep; replies arrive on `id + 16`.
pub fn sweep_group(connector: &dyn Connector, interface: &str, id: u32) -> Result<MotorGroup> {
    let spec = MotorGroupSpec::new(vec![MotorSpec::joint(id)]);
    let bus = arm_group(connector, interface, spec)?;
    Ok(MotorGroup::new(
        format!("id{}", id),
        bus,
        Box::new(sweep_trajectory()),
    ))
}

#[derive(Debug)]
pub enum SweepEvent {
    Started { id: u32, recv_id: u32 },
    Done { id: u32, report: LoopReport },
    Skipped { id: u32, error: Error },
}

/// Exercise each ID on its own, skipping any that fail.
pub async fn sweep<F>(
    connector: &dyn Connector,
    interface: &str,
    ids: impl IntoIterator<Item = u32>,
    stop: &StopFlag,
    mut on_event: F,
) -> Result<Vec<SweepEvent>>
where
    F: FnMut(&SweepEvent),
{
    let control = ControlLoop::new(sweep_config())?;
    let mut outcomes = vec![];
    for id in ids {
        if stop.is_stopped() {
            info!(id, "sweep stopped");
            break;
        }
        let started = SweepEvent::Started {
            id,
            recv_id: id + RECV_ID_OFFSET,
        };
        on_event(&started);

        let result = match sweep_group(connector, interface, id) {
            Ok(group) => {
                let mut groups = vec![group];
                control.execute(&mut groups, stop, |_| {}).await
            }
            Err(error) => Err(error),
        };
        let outcome = match result {
            Ok(report) => SweepEvent::Done { id, report },
            Err(error) => {
                warn!(id, %error, "skipping motor");
                SweepEvent::Skipped { id, error }
            }
        };
        on_event(&outcome);
        outcomes.push(outcome);

        sleep(SWEEP_PAUSE).await;
    }
    Ok(outcomes)
}
