//! In-process stand-in for an OpenArm on a CAN interface.
//!
//! Joints run the MIT control law `kp (q* - q) + kd (dq* - dq) + tau` with
//! the torque clamped to the motor's rating and are integrated in 1 ms
//! steps. Every command, enable or disable queues one reply per responding
//! motor; `recv_all` drains them or, when there are none, sleeps out its
//! timeout.

use async_trait::async_trait;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, trace};

use crate::bus::{ArmBus, Connector};
use crate::motor::{
    CallbackMode, ControlMode, Gains, MitParam, MotorGroupSpec, MotorSpec, MotorState,
};
use crate::{Error, Result};

const STEP: f64 = 0.001;
const MAX_STEPS: usize = 10_000;
// kg·m² per Nm of rated torque
const INERTIA_PER_NM: f64 = 0.002;
// Nm·s/rad acting on unpowered joints
const FRICTION: f64 = 0.05;
const MAX_INTERFACE_NAME: usize = 15;

#[derive(Debug, Clone, Default)]
pub struct SimulatedConnector {
    offline: Vec<u32>,
}

impl SimulatedConnector {
    pub fn new() -> SimulatedConnector {
        SimulatedConnector::default()
    }

    /// Motors with these send IDs never answer.
    pub fn with_offline(offline: Vec<u32>) -> SimulatedConnector {
        SimulatedConnector { offline }
    }
}

impl Connector for SimulatedConnector {
    fn open(&self, interface: &str, fd: bool) -> Result<Box<dyn ArmBus>> {
        let arm = SimulatedArm::open(interface, fd)?.with_offline(self.offline.clone());
        Ok(Box::new(arm))
    }
}

#[derive(Debug, Clone)]
struct SimJoint {
    spec: MotorSpec,
    q: f64,
    dq: f64,
    tau: f64,
    command: Option<MitParam>,
}

impl SimJoint {
    fn new(spec: MotorSpec) -> SimJoint {
        SimJoint {
            spec,
            q: 0.0,
            dq: 0.0,
            tau: 0.0,
            command: None,
        }
    }

    fn step(&mut self, h: f64, powered: bool) {
        let limits = self.spec.motor_type.limits();
        let inertia = limits.torque * INERTIA_PER_NM;
        self.tau = match (powered, self.command) {
            (true, Some(cmd)) => (cmd.kp * (cmd.q - self.q) + cmd.kd * (cmd.dq - self.dq) + cmd.tau)
                .clamp(-limits.torque, limits.torque),
            _ => -FRICTION * self.dq,
        };
        self.dq = (self.dq + self.tau / inertia * h).clamp(-limits.velocity, limits.velocity);
        self.q += self.dq * h;
        if self.q.abs() > limits.position {
            self.q = self.q.clamp(-limits.position, limits.position);
            self.dq = 0.0;
        }
    }

    fn state(&self) -> MotorState {
        MotorState {
            id: self.spec.send_id,
            position: self.q,
            velocity: self.dq,
            torque: self.tau,
        }
    }
}

#[derive(Debug, Clone)]
struct SimGripper {
    joint: SimJoint,
    mode: ControlMode,
    speed: f64,
    torque: f64,
    target: Option<f64>,
}

impl SimGripper {
    fn step(&mut self, h: f64, powered: bool) {
        match (self.mode, self.target) {
            (ControlMode::PosForce, Some(target)) if powered => {
                let max_step = self.speed * h;
                let delta = (target - self.joint.q).clamp(-max_step, max_step);
                self.joint.q += delta;
                self.joint.dq = delta / h;
                self.joint.tau = if delta.abs() < max_step { 0.0 } else { self.torque };
            }
            (ControlMode::PosForce, _) => self.joint.step(h, false),
            (ControlMode::Mit, target) => {
                self.joint.command = target.map(|q| MitParam::position(q, Gains::default()));
                self.joint.step(h, powered);
            }
        }
    }
}

pub struct SimulatedArm {
    interface: String,
    fd: bool,
    enabled: bool,
    callback: CallbackMode,
    arm: Vec<SimJoint>,
    gripper: Option<SimGripper>,
    offline: Vec<u32>,
    pending: usize,
    last_step: Instant,
    arm_states: Vec<MotorState>,
    gripper_state: Option<MotorState>,
}

impl SimulatedArm {
    pub fn open(interface: &str, fd: bool) -> Result<SimulatedArm> {
        validate_interface(interface)?;
        debug!(interface, fd, "opened simulated arm");
        Ok(SimulatedArm {
            interface: interface.to_owned(),
            fd,
            enabled: false,
            callback: CallbackMode::State,
            arm: vec![],
            gripper: None,
            offline: vec![],
            pending: 0,
            last_step: Instant::now(),
            arm_states: vec![],
            gripper_state: None,
        })
    }

    pub fn with_offline(mut self, offline: Vec<u32>) -> SimulatedArm {
        self.offline = offline;
        self
    }

    pub fn is_fd(&self) -> bool {
        self.fd
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn motor_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.arm
            .iter()
            .map(|joint| joint.spec.send_id)
            .chain(self.gripper.iter().map(|gripper| gripper.joint.spec.send_id))
    }

    fn responders(&self) -> usize {
        self.motor_ids()
            .filter(|id| !self.offline.contains(id))
            .count()
    }

    fn advance(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_step).as_secs_f64();
        self.last_step = now;
        if elapsed <= 0.0 {
            return;
        }
        let steps = ((elapsed / STEP).ceil() as usize).clamp(1, MAX_STEPS);
        let h = elapsed / steps as f64;
        for _ in 0..steps {
            for joint in self.arm.iter_mut() {
                joint.step(h, self.enabled);
            }
            if let Some(gripper) = self.gripper.as_mut() {
                gripper.step(h, self.enabled);
            }
        }
    }

    fn publish(&mut self) {
        if self.callback != CallbackMode::State {
            return;
        }
        let offline = &self.offline;
        self.arm_states = self
            .arm
            .iter()
            .filter(|joint| !offline.contains(&joint.spec.send_id))
            .map(SimJoint::state)
            .collect();
        self.gripper_state = self
            .gripper
            .as_ref()
            .filter(|gripper| !offline.contains(&gripper.joint.spec.send_id))
            .map(|gripper| gripper.joint.state());
    }
}

fn validate_interface(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty name"
    } else if name.len() > MAX_INTERFACE_NAME {
        "name longer than 15 bytes"
    } else if name.chars().any(|c| c.is_whitespace() || c == '/') {
        "name contains whitespace or '/'"
    } else {
        return Ok(());
    };
    Err(Error::Interface {
        name: name.to_owned(),
        reason: reason.to_owned(),
    })
}

#[async_trait]
impl ArmBus for SimulatedArm {
    fn interface(&self) -> &str {
        &self.interface
    }

    fn init_arm_motors(&mut self, group: MotorGroupSpec) -> Result<()> {
        if group.is_empty() {
            return Err(Error::InvalidConfig("arm motor group is empty".into()));
        }
        self.arm = group.motors().iter().copied().map(SimJoint::new).collect();
        self.arm_states.clear();
        Ok(())
    }

    fn init_gripper_motor(&mut self, motor: MotorSpec, mode: ControlMode) -> Result<()> {
        let limits = motor.motor_type.limits();
        self.gripper = Some(SimGripper {
            joint: SimJoint::new(motor),
            mode,
            speed: limits.velocity,
            torque: limits.torque,
            target: None,
        });
        self.gripper_state = None;
        Ok(())
    }

    fn set_gripper_limit(&mut self, speed: f64, torque: f64) -> Result<()> {
        let gripper = self.gripper.as_mut().ok_or(Error::NotRegistered("gripper"))?;
        gripper.speed = speed.abs();
        gripper.torque = torque.abs();
        Ok(())
    }

    fn set_callback_mode_all(&mut self, mode: CallbackMode) {
        self.callback = mode;
    }

    async fn enable_all(&mut self) -> Result<()> {
        if self.arm.is_empty() && self.gripper.is_none() {
            return Err(Error::NotRegistered("arm"));
        }
        self.advance();
        if let Some(id) = self.motor_ids().find(|id| self.offline.contains(id)) {
            return Err(Error::NoResponse(id));
        }
        self.enabled = true;
        self.pending += self.responders();
        Ok(())
    }

    async fn disable_all(&mut self) -> Result<()> {
        self.advance();
        self.enabled = false;
        self.pending += self.responders();
        Ok(())
    }

    async fn mit_control_all(&mut self, params: &[MitParam]) -> Result<()> {
        if self.arm.is_empty() {
            return Err(Error::NotRegistered("arm"));
        }
        if params.len() != self.arm.len() {
            return Err(Error::CommandCount {
                expected: self.arm.len(),
                got: params.len(),
            });
        }
        self.advance();
        for (joint, param) in self.arm.iter_mut().zip(params) {
            joint.command = Some(*param);
        }
        if self.enabled {
            let offline = &self.offline;
            self.pending += self
                .arm
                .iter()
                .filter(|joint| !offline.contains(&joint.spec.send_id))
                .count();
        }
        trace!(interface = %self.interface, commands = params.len(), "mit command");
        Ok(())
    }

    async fn set_gripper_position(&mut self, position: f64) -> Result<()> {
        self.advance();
        let gripper = self.gripper.as_mut().ok_or(Error::NotRegistered("gripper"))?;
        gripper.target = Some(position);
        if self.enabled && !self.offline.contains(&gripper.joint.spec.send_id) {
            self.pending += 1;
        }
        Ok(())
    }

    async fn recv_all(&mut self, timeout: Duration) -> Result<usize> {
        if self.pending == 0 {
            sleep(timeout).await;
            self.advance();
            return Ok(0);
        }
        self.advance();
        let replies = std::mem::take(&mut self.pending);
        self.publish();
        Ok(replies)
    }

    fn arm_states(&self) -> Vec<MotorState> {
        self.arm_states.clone()
    }

    fn gripper_state(&self) -> Option<MotorState> {
        self.gripper_state
    }
}
