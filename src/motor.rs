/// Offset between a joint's command ID and the ID its state reports arrive on.
pub const RECV_ID_OFFSET: u32 = 0x10;

/// Number of IDs covered by one arm before the joint layout repeats.
pub const JOINTS_PER_ARM: u32 = 8;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[allow(non_camel_case_types)]
pub enum MotorType {
    DM3507,
    DM4310,
    DM4310_48V,
    DM4340,
    DM4340_48V,
    DM6006,
    DM8006,
    DM8009,
    DM10010L,
    DM10010,
    DMH3510,
    DMH6215,
    DMG6220,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct MotorLimits {
    /// rad
    pub position: f64,
    /// rad/s
    pub velocity: f64,
    /// Nm
    pub torque: f64,
}

impl MotorType {
    pub fn limits(&self) -> MotorLimits {
        let (position, velocity, torque) = match self {
            MotorType::DM3507 => (12.566, 50.0, 5.0),
            MotorType::DM4310 => (12.5, 30.0, 10.0),
            MotorType::DM4310_48V => (12.5, 50.0, 10.0),
            MotorType::DM4340 => (12.5, 8.0, 28.0),
            MotorType::DM4340_48V => (12.5, 10.0, 28.0),
            MotorType::DM6006 => (12.5, 45.0, 20.0),
            MotorType::DM8006 => (12.5, 45.0, 40.0),
            MotorType::DM8009 => (12.5, 45.0, 54.0),
            MotorType::DM10010L => (12.5, 25.0, 200.0),
            MotorType::DM10010 => (12.5, 20.0, 200.0),
            MotorType::DMH3510 => (12.5, 280.0, 1.0),
            MotorType::DMH6215 => (12.5, 45.0, 10.0),
            MotorType::DMG6220 => (12.5, 45.0, 10.0),
        };
        MotorLimits {
            position,
            velocity,
            torque,
        }
    }

    /// Motor fitted at `id` on an OpenArm.
    ///
    /// The layout repeats every eight IDs: local joints 1-2 are DM8009,
    /// 3-4 are DM4340 and the wrist joints and gripper are DM4310.
    pub fn for_joint_id(id: u32) -> MotorType {
        match local_joint(id) {
            1 | 2 => MotorType::DM8009,
            3 | 4 => MotorType::DM4340,
            _ => MotorType::DM4310,
        }
    }
}

/// Position of `id` within its arm, 1 through 8.
pub fn local_joint(id: u32) -> u32 {
    (id.saturating_sub(1) % JOINTS_PER_ARM) + 1
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CallbackMode {
    /// Replies are drained but do not touch the cached state.
    Ignore,
    State,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ControlMode {
    Mit,
    PosForce,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MotorSpec {
    pub motor_type: MotorType,
    pub send_id: u32,
    pub recv_id: u32,
}

impl MotorSpec {
    pub fn new(motor_type: MotorType, send_id: u32, recv_id: u32) -> MotorSpec {
        MotorSpec {
            motor_type,
            send_id,
            recv_id,
        }
    }

    /// Standard OpenArm joint: type from the arm layout, replies on `id + 0x10`.
    pub fn joint(id: u32) -> MotorSpec {
        MotorSpec::new(MotorType::for_joint_id(id), id, id + RECV_ID_OFFSET)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct MotorGroupSpec {
    motors: Vec<MotorSpec>,
}

impl MotorGroupSpec {
    pub fn new(motors: Vec<MotorSpec>) -> MotorGroupSpec {
        MotorGroupSpec { motors }
    }

    pub fn joints(ids: &[u32]) -> MotorGroupSpec {
        MotorGroupSpec::new(ids.iter().map(|id| MotorSpec::joint(*id)).collect())
    }

    /// Build from the parallel lists the SDK registration call takes.
    pub fn from_lists(
        types: &[MotorType],
        send_ids: &[u32],
        recv_ids: &[u32],
    ) -> crate::Result<MotorGroupSpec> {
        if types.len() != send_ids.len() || send_ids.len() != recv_ids.len() {
            return Err(crate::Error::GroupMismatch {
                types: types.len(),
                send_ids: send_ids.len(),
                recv_ids: recv_ids.len(),
            });
        }
        let motors = types
            .iter()
            .zip(send_ids)
            .zip(recv_ids)
            .map(|((motor_type, send_id), recv_id)| MotorSpec::new(*motor_type, *send_id, *recv_id))
            .collect();
        Ok(MotorGroupSpec { motors })
    }

    pub fn motors(&self) -> &[MotorSpec] {
        &self.motors
    }

    pub fn send_ids(&self) -> Vec<u32> {
        self.motors.iter().map(|motor| motor.send_id).collect()
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Gains {
    pub kp: f64,
    pub kd: f64,
}

impl Gains {
    pub fn new(kp: f64, kd: f64) -> Gains {
        Gains { kp, kd }
    }
}

impl Default for Gains {
    fn default() -> Self {
        Gains { kp: 6.0, kd: 1.2 }
    }
}

/// One MIT-mode setpoint. Fields are named so callers cannot transpose
/// gains and targets.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct MitParam {
    pub kp: f64,
    pub kd: f64,
    /// rad
    pub q: f64,
    /// rad/s
    pub dq: f64,
    /// Nm
    pub tau: f64,
}

impl MitParam {
    pub fn position(q: f64, gains: Gains) -> MitParam {
        MitParam {
            kp: gains.kp,
            kd: gains.kd,
            q,
            dq: 0.0,
            tau: 0.0,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct MotorState {
    pub id: u32,
    pub position: f64,
    pub velocity: f64,
    pub torque: f64,
}

impl MotorState {
    pub fn new(id: u32) -> MotorState {
        MotorState {
            id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_layout_repeats_every_eight_ids() {
        let first: Vec<MotorType> = (1..=8).map(MotorType::for_joint_id).collect();
        let second: Vec<MotorType> = (9..=16).map(MotorType::for_joint_id).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], MotorType::DM8009);
        assert_eq!(first[1], MotorType::DM8009);
        assert_eq!(first[2], MotorType::DM4340);
        assert_eq!(first[3], MotorType::DM4340);
        assert!(first[4..].iter().all(|t| *t == MotorType::DM4310));
    }

    #[test]
    fn joint_spec_offsets_recv_id() {
        let spec = MotorSpec::joint(7);
        assert_eq!(spec.recv_id, 0x17);
        assert_eq!(spec.motor_type, MotorType::DM4310);
    }

    #[test]
    fn group_from_mismatched_lists_fails() {
        let result = MotorGroupSpec::from_lists(&[MotorType::DM4310], &[7, 8], &[0x17, 0x18]);
        assert!(matches!(
            result,
            Err(crate::Error::GroupMismatch {
                types: 1,
                send_ids: 2,
                recv_ids: 2
            })
        ));
    }

    #[test]
    fn group_from_lists_keeps_order() {
        let group = MotorGroupSpec::from_lists(
            &[MotorType::DM4310, MotorType::DM4340],
            &[7, 3],
            &[0x17, 0x13],
        )
        .unwrap();
        assert_eq!(group.send_ids(), vec![7, 3]);
        assert_eq!(group.motors()[1].motor_type, MotorType::DM4340);
    }

    #[test]
    fn position_command_uses_gains() {
        let cmd = MitParam::position(0.5, Gains::new(4.0, 0.4));
        assert_eq!(cmd.q, 0.5);
        assert_eq!(cmd.kp, 4.0);
        assert_eq!(cmd.kd, 0.4);
        assert_eq!(cmd.dq, 0.0);
        assert_eq!(cmd.tau, 0.0);
    }
}
