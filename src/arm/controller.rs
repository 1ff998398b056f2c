// High-level arm controller
//
// Combines inverse kinematics, servo calibration and the bus protocol:
// one pose request becomes exactly one multi-servo move frame.

use serde::Serialize;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use super::diagnostics::Diagnostic;
use super::kinematics::{self, ArmGeometry, CartesianPose, JointAngles};
use super::trajectory;
use crate::config::{ArmConfig, MAX_INTERPOLATION_STEPS};
use crate::error::{ArmError, Result};
use crate::servo::{BusPort, ExchangeState, Joint, SerialLink, ServoBus, ServoDirectory, ServoTarget};

/// What a move actually sent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveReport {
    /// Angles before range clamping
    pub requested: JointAngles,
    /// Angles after range clamping
    pub commanded: JointAngles,
    pub wrist_roll: f64,
    /// Targets in frame order: base, shoulder, elbow, wrist pitch, wrist roll, gripper
    pub targets: Vec<ServoTarget>,
    pub duration_ms: u16,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct ArmController<P: BusPort = SerialLink> {
    bus: ServoBus<P>,
    geometry: ArmGeometry,
    servos: ServoDirectory,
    last_pose: Option<CartesianPose>,
}

impl ArmController<SerialLink> {
    /// Open the serial controller described by `config`
    pub fn open(config: &ArmConfig) -> Result<Self> {
        config.validate()?;
        info!("Opening servo controller on {} @ {} baud", config.port, config.baud_rate);
        let bus = ServoBus::open_with(&config.port, config.baud_rate, config.bus_timing())?;
        Self::new(bus, config.geometry, config.servos.clone())
    }
}

impl<P: BusPort> ArmController<P> {
    pub fn new(bus: ServoBus<P>, geometry: ArmGeometry, servos: ServoDirectory) -> Result<Self> {
        geometry.validate()?;
        servos.validate()?;
        Ok(Self {
            bus,
            geometry,
            servos,
            last_pose: None,
        })
    }

    /// Move the tool tip to `pose`.
    ///
    /// `wrist_roll` is an angle in degrees, `gripper_raw` a raw position.
    /// Nothing is sent if the pose has no IK solution.
    pub fn move_to(
        &mut self,
        pose: &CartesianPose,
        wrist_roll: f64,
        gripper_raw: u16,
        duration_ms: u16,
    ) -> Result<MoveReport> {
        let solution = kinematics::solve(&self.geometry, pose)?;
        debug!(
            "IK ({:.2}, {:.2}, {:.2}, {:.1}) -> base={:.2} shoulder={:.2} elbow={:.2} wrist={:.2}",
            pose.x,
            pose.y,
            pose.z,
            pose.pitch,
            solution.joints.base,
            solution.joints.shoulder,
            solution.joints.elbow,
            solution.joints.wrist_pitch
        );

        let report = self.command_joints(
            solution.joints,
            wrist_roll,
            gripper_raw,
            duration_ms,
            solution.diagnostics,
        )?;
        self.last_pose = Some(*pose);
        Ok(report)
    }

    /// Move to explicit joint angles (degrees), bypassing IK
    pub fn move_joints(
        &mut self,
        joints: JointAngles,
        wrist_roll: f64,
        gripper_raw: u16,
        duration_ms: u16,
    ) -> Result<MoveReport> {
        if !joints.is_finite() {
            return Err(ArmError::invalid(format!("non-finite joint angles {:?}", joints)));
        }
        let report = self.command_joints(joints, wrist_roll, gripper_raw, duration_ms, Vec::new())?;
        self.last_pose = Some(kinematics::forward(&self.geometry, &report.commanded));
        Ok(report)
    }

    /// Raw passthrough: positions are sent as given, in one frame
    pub fn move_servos(&mut self, targets: &[ServoTarget], duration_ms: u16) -> Result<()> {
        self.bus.move_servos(targets, duration_ms)
    }

    fn command_joints(
        &mut self,
        requested: JointAngles,
        wrist_roll: f64,
        gripper_raw: u16,
        duration_ms: u16,
        mut diagnostics: Vec<Diagnostic>,
    ) -> Result<MoveReport> {
        if !wrist_roll.is_finite() {
            return Err(ArmError::invalid(format!("non-finite wrist roll {}", wrist_roll)));
        }

        let mut commanded = requested;
        let mut targets = Vec::with_capacity(6);
        let joint_angles = requested.iter().chain([(Joint::WristRoll, wrist_roll)]);
        for (joint, angle) in joint_angles {
            let channel = self.servos.channel(joint);
            let clamped = channel.clamp(angle);
            if clamped != angle {
                diagnostics.push(Diagnostic::AngleClamped {
                    joint,
                    servo_id: channel.id,
                    requested: angle,
                    clamped,
                    min: channel.angle_min,
                    max: channel.angle_max,
                });
            }
            commanded.set(joint, clamped);
            targets.push(ServoTarget::new(channel.id, channel.to_raw(clamped)));
        }
        let wrist_roll_commanded = self.servos.wrist_roll.clamp(wrist_roll);

        let gripper = self.servos.gripper;
        let grip = gripper.clamp(gripper_raw);
        if grip != gripper_raw {
            diagnostics.push(Diagnostic::GripperClamped {
                requested: gripper_raw,
                clamped: grip,
            });
        }
        targets.push(ServoTarget::new(gripper.id, grip));

        for diagnostic in &diagnostics {
            diagnostic.emit();
        }

        self.bus.move_servos(&targets, duration_ms)?;
        debug!(?targets, duration_ms, "Move frame sent");

        Ok(MoveReport {
            requested,
            commanded,
            wrist_roll: wrist_roll_commanded,
            targets,
            duration_ms,
            diagnostics,
        })
    }

    /// Approach `pose` along a straight line in `steps` moves spread over
    /// `total`. The first pose ever commanded is reached in a single move.
    ///
    /// `steps` is capped at [`MAX_INTERPOLATION_STEPS`] and every step must
    /// last at least one millisecond; otherwise nothing is sent.
    pub fn interpolate_to(
        &mut self,
        pose: &CartesianPose,
        wrist_roll: f64,
        gripper_raw: u16,
        steps: usize,
        total: Duration,
    ) -> Result<Vec<MoveReport>> {
        let steps = steps.max(1);
        if steps > MAX_INTERPOLATION_STEPS {
            return Err(ArmError::invalid(format!(
                "{} interpolation steps exceed the limit of {}",
                steps, MAX_INTERPOLATION_STEPS
            )));
        }
        let step_duration = total / steps as u32;
        let step_ms = duration_to_ms(step_duration);
        if step_ms == 0 {
            return Err(ArmError::invalid(format!(
                "{} steps over {}ms leaves no time per step",
                steps,
                total.as_millis()
            )));
        }

        let Some(previous) = self.last_pose else {
            let duration_ms = duration_to_ms(total);
            return Ok(vec![self.move_to(pose, wrist_roll, gripper_raw, duration_ms)?]);
        };

        let poses = trajectory::interpolate(&previous, pose, steps);

        let mut reports = Vec::with_capacity(poses.len());
        for (i, step) in poses.iter().enumerate() {
            info!(
                "Interpolate step [{}]: {:.2} {:.2} {:.2} | Duration: {}",
                i + 1,
                step.x,
                step.y,
                step.z,
                step_ms
            );
            reports.push(self.move_to(step, wrist_roll, gripper_raw, step_ms)?);
            thread::sleep(step_duration);
        }
        Ok(reports)
    }

    // === Telemetry ===

    pub fn battery_voltage(&mut self) -> Result<f32> {
        self.bus.battery_voltage()
    }

    pub fn read_positions(&mut self, ids: &[u8]) -> Result<BTreeMap<u8, u16>> {
        self.bus.read_positions(ids)
    }

    /// Raw positions of every servo on the arm
    pub fn read_all_positions(&mut self) -> Result<BTreeMap<u8, u16>> {
        let ids = self.servos.ids();
        self.bus.read_positions(&ids)
    }

    /// Present angles of the calibrated joints, mapped back from raw
    pub fn read_joint_angles(&mut self) -> Result<BTreeMap<Joint, f64>> {
        let ids: Vec<u8> = Joint::ALL
            .iter()
            .map(|&joint| self.servos.channel(joint).id)
            .collect();
        let positions = self.bus.read_positions(&ids)?;

        Ok(Joint::ALL
            .iter()
            .filter_map(|&joint| {
                let channel = self.servos.channel(joint);
                positions
                    .get(&channel.id)
                    .map(|&raw| (joint, channel.to_angle(raw)))
            })
            .collect())
    }

    /// Tool tip pose from the present joint angles
    pub fn read_pose(&mut self) -> Result<CartesianPose> {
        let angles = self.read_joint_angles()?;
        let mut joints = JointAngles::default();
        for (&joint, &angle) in &angles {
            joints.set(joint, angle);
        }
        Ok(kinematics::forward(&self.geometry, &joints))
    }

    /// Cut motor power on the given servos
    pub fn unload(&mut self, ids: &[u8]) -> Result<()> {
        info!("Unloading servos {:?}", ids);
        self.bus.unload(ids)
    }

    pub fn unload_all(&mut self) -> Result<()> {
        let ids = self.servos.ids();
        self.unload(&ids)
    }

    // === Accessors ===

    pub fn last_pose(&self) -> Option<CartesianPose> {
        self.last_pose
    }

    pub fn geometry(&self) -> &ArmGeometry {
        &self.geometry
    }

    pub fn servos(&self) -> &ServoDirectory {
        &self.servos
    }

    pub fn bus_state(&self) -> ExchangeState {
        self.bus.state()
    }

    pub fn bus(&self) -> &ServoBus<P> {
        &self.bus
    }
}

fn duration_to_ms(duration: Duration) -> u16 {
    duration.as_millis().min(u16::MAX as u128) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::{BusTiming, SimulatedController};

    fn sim_arm() -> ArmController<SimulatedController> {
        let bus = ServoBus::with_port(SimulatedController::new(), BusTiming::default());
        ArmController::new(bus, ArmGeometry::default(), ServoDirectory::default()).unwrap()
    }

    #[test]
    fn test_move_to_sends_one_frame_with_six_servos() {
        let mut arm = sim_arm();
        let report = arm
            .move_to(&CartesianPose::new(21.0, 0.0, 10.0, 0.0), 90.0, 900, 900)
            .unwrap();

        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        assert_eq!(
            report.targets,
            vec![
                ServoTarget::new(6, 480),
                ServoTarget::new(5, 457),
                ServoTarget::new(4, 808),
                ServoTarget::new(3, 501),
                ServoTarget::new(2, 460),
                ServoTarget::new(1, 900),
            ]
        );

        let moves = arm.bus().port().moves();
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0], (900, report.targets.clone()));
        assert_eq!(arm.last_pose(), Some(CartesianPose::new(21.0, 0.0, 10.0, 0.0)));
    }

    #[test]
    fn test_out_of_range_joints_are_clamped_not_rejected() {
        let mut arm = sim_arm();
        let report = arm
            .move_joints(JointAngles::new(120.0, 90.0, 0.0, 0.0), 200.0, 1500, 500)
            .unwrap();

        assert_eq!(report.commanded.base, 90.0);
        assert_eq!(report.wrist_roll, 180.0);
        assert_eq!(report.targets[0], ServoTarget::new(6, 860));
        assert_eq!(report.targets[4], ServoTarget::new(2, 20));
        assert_eq!(report.targets[5], ServoTarget::new(1, 1000));

        let clamped: Vec<Joint> = report
            .diagnostics
            .iter()
            .filter_map(|d| match d {
                Diagnostic::AngleClamped { joint, .. } => Some(*joint),
                _ => None,
            })
            .collect();
        assert_eq!(clamped, vec![Joint::Base, Joint::WristRoll]);
        assert!(report
            .diagnostics
            .contains(&Diagnostic::GripperClamped { requested: 1500, clamped: 1000 }));
        assert_eq!(arm.bus().port().moves().len(), 1);
    }

    #[test]
    fn test_unreachable_sends_nothing() {
        let mut arm = sim_arm();
        let l3 = arm.geometry().l3;
        let result = arm.move_to(&CartesianPose::new(l3, 0.0, 0.0, 0.0), 90.0, 500, 900);

        assert!(matches!(result, Err(ArmError::Unreachable { .. })));
        assert!(arm.bus().port().moves().is_empty());
        assert_eq!(arm.last_pose(), None);
    }

    #[test]
    fn test_non_finite_input_rejected_before_sending() {
        let mut arm = sim_arm();
        let joints = JointAngles::new(f64::NAN, 0.0, 0.0, 0.0);
        assert!(matches!(
            arm.move_joints(joints, 90.0, 500, 900),
            Err(ArmError::InvalidArgument(_))
        ));
        assert!(matches!(
            arm.move_to(&CartesianPose::new(21.0, 0.0, 10.0, 0.0), f64::INFINITY, 500, 900),
            Err(ArmError::InvalidArgument(_))
        ));
        assert!(arm.bus().port().moves().is_empty());
    }

    #[test]
    fn test_read_back_after_move() {
        let mut arm = sim_arm();
        let target = CartesianPose::new(15.0, 8.0, 5.0, -30.0);
        let report = arm.move_to(&target, 45.0, 300, 900).unwrap();

        let positions = arm.read_all_positions().unwrap();
        for sent in &report.targets {
            assert_eq!(positions.get(&sent.id), Some(&sent.position));
        }

        let angles = arm.read_joint_angles().unwrap();
        assert!((angles[&Joint::Base] - report.commanded.base).abs() < 0.5);
        assert!((angles[&Joint::WristRoll] - 45.0).abs() < 0.5);

        // Raw quantisation costs a few millimetres at most
        let pose = arm.read_pose().unwrap();
        assert!((pose.x - target.x).abs() < 1.0);
        assert!((pose.y - target.y).abs() < 1.0);
        assert!((pose.z - target.z).abs() < 1.0);
    }

    #[test]
    fn test_interpolation() {
        let mut arm = sim_arm();
        let start = CartesianPose::new(21.0, 0.0, 10.0, 0.0);
        let end = CartesianPose::new(15.0, 5.0, 5.0, -20.0);

        // First pose has nothing to interpolate from
        let first = arm
            .interpolate_to(&start, 90.0, 500, 4, Duration::from_millis(20))
            .unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].duration_ms, 20);

        let reports = arm
            .interpolate_to(&end, 90.0, 500, 4, Duration::from_millis(20))
            .unwrap();
        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(|r| r.duration_ms == 5));
        assert_eq!(arm.bus().port().moves().len(), 5);
        assert_eq!(arm.last_pose(), Some(end));
    }

    #[test]
    fn test_interpolation_step_bounds() {
        let mut arm = sim_arm();
        let start = CartesianPose::new(21.0, 0.0, 10.0, 0.0);
        let end = CartesianPose::new(18.0, 0.0, 10.0, 0.0);
        arm.move_to(&start, 90.0, 500, 900).unwrap();

        let too_many = arm.interpolate_to(
            &end,
            90.0,
            500,
            MAX_INTERPOLATION_STEPS + 1,
            Duration::from_secs(60),
        );
        assert!(matches!(too_many, Err(ArmError::InvalidArgument(_))));

        // 50 steps in 20ms would round every step down to 0ms
        let too_short = arm.interpolate_to(&end, 90.0, 500, 50, Duration::from_millis(20));
        assert!(matches!(too_short, Err(ArmError::InvalidArgument(_))));

        assert_eq!(arm.bus().port().moves().len(), 1);
        assert_eq!(arm.last_pose(), Some(start));
    }

    #[test]
    fn test_unload_all() {
        let mut arm = sim_arm();
        arm.unload_all().unwrap();
        for id in arm.servos().ids() {
            assert!(arm.bus().port().is_unloaded(id));
        }
    }

    #[test]
    fn test_battery_voltage() {
        let mut arm = sim_arm();
        let volts = arm.battery_voltage().unwrap();
        assert!(volts > 7.0 && volts < 8.0);
        assert_eq!(arm.bus_state(), ExchangeState::Complete);
    }
}
