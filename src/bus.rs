use async_trait::async_trait;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::motor::{CallbackMode, ControlMode, MitParam, MotorGroupSpec, MotorSpec, MotorState};
use crate::Result;

/// One OpenArm transport handle: a CAN interface with an arm motor group
/// and an optional gripper registered on it.
///
/// Framing, the Damiao MIT encoding and the enable handshake live behind
/// this trait.
#[async_trait]
pub trait ArmBus: Send {
    fn interface(&self) -> &str;

    fn init_arm_motors(&mut self, group: MotorGroupSpec) -> Result<()>;

    fn init_gripper_motor(&mut self, motor: MotorSpec, mode: ControlMode) -> Result<()>;

    /// Speed (rad/s) and torque (Nm) caps for a gripper in position-force mode.
    fn set_gripper_limit(&mut self, speed: f64, torque: f64) -> Result<()>;

    fn set_callback_mode_all(&mut self, mode: CallbackMode);

    async fn enable_all(&mut self) -> Result<()>;

    async fn disable_all(&mut self) -> Result<()>;

    /// `params` must match the registered arm motors in count and order.
    async fn mit_control_all(&mut self, params: &[MitParam]) -> Result<()>;

    async fn set_gripper_position(&mut self, position: f64) -> Result<()>;

    /// Wait up to `timeout` for replies and return how many arrived.
    /// Running out of time is not an error.
    async fn recv_all(&mut self, timeout: Duration) -> Result<usize>;

    fn arm_states(&self) -> Vec<MotorState>;

    fn gripper_state(&self) -> Option<MotorState>;
}

/// Opens transport handles by CAN interface name.
pub trait Connector {
    /// `fd` selects CAN-FD framing.
    fn open(&self, interface: &str, fd: bool) -> Result<Box<dyn ArmBus>>;
}

/// Disable every motor on `bus`, logging instead of returning failures.
pub async fn safe_disable(bus: &mut dyn ArmBus, timeout: Duration) {
    if let Err(error) = bus.disable_all().await {
        warn!(interface = bus.interface(), %error, "disable failed");
        return;
    }
    match bus.recv_all(timeout).await {
        Ok(replies) => debug!(interface = bus.interface(), replies, "disabled"),
        Err(error) => warn!(interface = bus.interface(), %error, "no disable acknowledgement"),
    }
}
